//! LLM 客户端抽象
//!
//! 所有后端（OpenAI 兼容 / Gemini / Scripted）实现 LlmClient：
//! complete（纯文本）、complete_with_tools（可返回 Tool Call）、complete_stream（可选，流式片段）。
//! 是否支持流式由 supports_streaming 在每次请求时探测。

use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::{Stream, StreamExt};
use serde::Serialize;
use thiserror::Error;
use tokio::time::timeout;

use crate::memory::{Message, ToolCall};

/// LLM 调用错误
#[derive(Debug, Error)]
pub enum LlmError {
    #[error("request failed: {0}")]
    Request(String),

    #[error("invalid response: {0}")]
    InvalidResponse(String),

    #[error("timed out after {0}s")]
    Timeout(u64),

    #[error("incremental completion is not supported by this backend")]
    StreamingUnsupported,
}

/// 流式片段
pub type TokenStream = Pin<Box<dyn Stream<Item = Result<String, LlmError>> + Send>>;

/// 暴露给 LLM 的可调用工具描述（OpenAI function 格式）
#[derive(Debug, Clone, Serialize)]
pub struct ToolSpec {
    pub name: String,
    pub description: String,
    pub parameters: serde_json::Value,
}

/// 一次带工具的完成结果：文本 + 零个或多个工具调用
#[derive(Debug, Clone, Default)]
pub struct LlmResponse {
    pub text: String,
    pub tool_calls: Vec<ToolCall>,
}

impl LlmResponse {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            tool_calls: Vec::new(),
        }
    }

    pub fn tool_calls(calls: Vec<ToolCall>) -> Self {
        Self {
            text: String::new(),
            tool_calls: calls,
        }
    }
}

/// LLM 客户端 trait
#[async_trait]
pub trait LlmClient: Send + Sync {
    /// 纯文本完成（无工具）
    async fn complete(&self, messages: &[Message]) -> Result<String, LlmError>;

    /// 携带工具 schema 的完成；LLM 可返回 tool_calls
    async fn complete_with_tools(
        &self,
        messages: &[Message],
        tools: &[ToolSpec],
    ) -> Result<LlmResponse, LlmError>;

    /// 是否支持真正的增量完成
    fn supports_streaming(&self) -> bool {
        false
    }

    /// 流式完成，返回文本片段流
    async fn complete_stream(&self, _messages: &[Message]) -> Result<TokenStream, LlmError> {
        Err(LlmError::StreamingUnsupported)
    }

    /// 获取累计 token 使用统计：(prompt_tokens, completion_tokens, total_tokens)
    fn token_usage(&self) -> (u64, u64, u64) {
        (0, 0, 0)
    }
}

/// 超时包装：对每次 LLM 调用施加超时，超时视为普通失败（LlmError::Timeout）
pub struct TimeoutLlmClient {
    inner: Arc<dyn LlmClient>,
    request_timeout: Duration,
    stream_timeout: Duration,
}

impl TimeoutLlmClient {
    pub fn new(inner: Arc<dyn LlmClient>, request_secs: u64, stream_secs: u64) -> Self {
        Self {
            inner,
            request_timeout: Duration::from_secs(request_secs.max(1)),
            stream_timeout: Duration::from_secs(stream_secs.max(1)),
        }
    }
}

#[async_trait]
impl LlmClient for TimeoutLlmClient {
    async fn complete(&self, messages: &[Message]) -> Result<String, LlmError> {
        timeout(self.request_timeout, self.inner.complete(messages))
            .await
            .map_err(|_| LlmError::Timeout(self.request_timeout.as_secs()))?
    }

    async fn complete_with_tools(
        &self,
        messages: &[Message],
        tools: &[ToolSpec],
    ) -> Result<LlmResponse, LlmError> {
        timeout(
            self.request_timeout,
            self.inner.complete_with_tools(messages, tools),
        )
        .await
        .map_err(|_| LlmError::Timeout(self.request_timeout.as_secs()))?
    }

    fn supports_streaming(&self) -> bool {
        self.inner.supports_streaming()
    }

    /// 建立流与每个片段之间的等待都受 stream 超时约束
    async fn complete_stream(&self, messages: &[Message]) -> Result<TokenStream, LlmError> {
        let limit = self.stream_timeout;
        let mut inner = timeout(limit, self.inner.complete_stream(messages))
            .await
            .map_err(|_| LlmError::Timeout(limit.as_secs()))??;
        let guarded = async_stream::stream! {
            loop {
                match timeout(limit, inner.next()).await {
                    Ok(Some(item)) => yield item,
                    Ok(None) => break,
                    Err(_) => {
                        yield Err(LlmError::Timeout(limit.as_secs()));
                        break;
                    }
                }
            }
        };
        Ok(Box::pin(guarded))
    }

    fn token_usage(&self) -> (u64, u64, u64) {
        self.inner.token_usage()
    }
}
