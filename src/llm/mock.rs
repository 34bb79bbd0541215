//! Scripted LLM 客户端（用于测试与离线运行，无需 API）
//!
//! 按顺序回放预置的回复（文本或 Tool Call），并记录每次请求的消息，便于断言调用次数与上下文。
//! 队列耗尽后回显最后一条 User 消息。可选提供流式片段以模拟增量完成。

use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::stream;

use crate::llm::{LlmClient, LlmError, LlmResponse, TokenStream, ToolSpec};
use crate::memory::{Message, Role, ToolCall};

/// 一次被记录的请求
#[derive(Debug, Clone)]
pub struct RecordedRequest {
    pub messages: Vec<Message>,
    /// 请求时暴露的工具名；None 表示纯文本完成
    pub tools: Option<Vec<String>>,
    pub streamed: bool,
}

enum Scripted {
    Reply(LlmResponse),
    Fail(String),
}

/// 预置脚本的 LLM
#[derive(Default)]
pub struct ScriptedLlm {
    script: Mutex<VecDeque<Scripted>>,
    stream_fragments: Option<Vec<String>>,
    stream_error_after: Option<usize>,
    latency: Option<Duration>,
    usage_per_call: (u64, u64),
    requests: Mutex<Vec<RecordedRequest>>,
}

impl ScriptedLlm {
    pub fn new() -> Self {
        Self::default()
    }

    /// 追加一条纯文本回复
    pub fn with_reply(self, text: impl Into<String>) -> Self {
        self.push(Scripted::Reply(LlmResponse::text(text)));
        self
    }

    /// 追加一轮工具调用
    pub fn with_tool_calls(self, calls: Vec<ToolCall>) -> Self {
        self.push(Scripted::Reply(LlmResponse::tool_calls(calls)));
        self
    }

    /// 追加一次失败
    pub fn with_failure(self, message: impl Into<String>) -> Self {
        self.push(Scripted::Fail(message.into()));
        self
    }

    /// 启用增量完成，按给定片段输出
    pub fn with_stream<S: Into<String>>(mut self, fragments: Vec<S>) -> Self {
        self.stream_fragments = Some(fragments.into_iter().map(Into::into).collect());
        self
    }

    /// 输出 n 个片段后流内报错
    pub fn with_stream_error_after(mut self, n: usize) -> Self {
        self.stream_error_after = Some(n);
        self
    }

    /// 每次非流式完成前等待
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    /// 每次请求计入的 (prompt, completion) token 数
    pub fn with_usage_per_call(mut self, prompt: u64, completion: u64) -> Self {
        self.usage_per_call = (prompt, completion);
        self
    }

    async fn delay(&self) {
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
    }

    fn push(&self, item: Scripted) {
        self.script
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push_back(item);
    }

    fn record(&self, messages: &[Message], tools: Option<&[ToolSpec]>, streamed: bool) {
        self.requests
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(RecordedRequest {
                messages: messages.to_vec(),
                tools: tools.map(|t| t.iter().map(|s| s.name.clone()).collect()),
                streamed,
            });
    }

    fn next_scripted(&self, messages: &[Message]) -> Result<LlmResponse, LlmError> {
        let next = self
            .script
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .pop_front();
        match next {
            Some(Scripted::Reply(r)) => Ok(r),
            Some(Scripted::Fail(msg)) => Err(LlmError::Request(msg)),
            None => {
                let last_user = messages
                    .iter()
                    .rev()
                    .find(|m| m.role == Role::User)
                    .map(|m| m.content.as_str())
                    .unwrap_or("(no input)");
                Ok(LlmResponse::text(format!("Echo from Mock: {}", last_user)))
            }
        }
    }

    /// 所有被记录的请求
    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.requests
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    pub fn call_count(&self) -> usize {
        self.requests.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    /// 带工具的请求次数
    pub fn tool_request_count(&self) -> usize {
        self.requests()
            .iter()
            .filter(|r| r.tools.is_some())
            .count()
    }
}

#[async_trait]
impl LlmClient for ScriptedLlm {
    async fn complete(&self, messages: &[Message]) -> Result<String, LlmError> {
        self.record(messages, None, false);
        self.delay().await;
        self.next_scripted(messages).map(|r| r.text)
    }

    async fn complete_with_tools(
        &self,
        messages: &[Message],
        tools: &[ToolSpec],
    ) -> Result<LlmResponse, LlmError> {
        self.record(messages, Some(tools), false);
        self.delay().await;
        self.next_scripted(messages)
    }

    fn token_usage(&self) -> (u64, u64, u64) {
        let calls = self.call_count() as u64;
        let (prompt, completion) = self.usage_per_call;
        (prompt * calls, completion * calls, (prompt + completion) * calls)
    }

    fn supports_streaming(&self) -> bool {
        self.stream_fragments.is_some()
    }

    async fn complete_stream(&self, messages: &[Message]) -> Result<TokenStream, LlmError> {
        let fragments = self
            .stream_fragments
            .clone()
            .ok_or(LlmError::StreamingUnsupported)?;
        self.record(messages, None, true);
        let mut items: Vec<Result<String, LlmError>> = fragments.into_iter().map(Ok).collect();
        if let Some(n) = self.stream_error_after {
            items.truncate(n);
            items.push(Err(LlmError::Request("stream interrupted".to_string())));
        }
        Ok(Box::pin(stream::iter(items)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::StreamExt;

    #[tokio::test]
    async fn test_replays_in_order_then_echoes() {
        let llm = ScriptedLlm::new()
            .with_tool_calls(vec![ToolCall::new("c1", "list_students", serde_json::json!({}))])
            .with_reply("done");
        let msgs = vec![Message::user("list them")];

        let first = llm.complete_with_tools(&msgs, &[]).await.unwrap();
        assert_eq!(first.tool_calls.len(), 1);
        let second = llm.complete_with_tools(&msgs, &[]).await.unwrap();
        assert_eq!(second.text, "done");
        let third = llm.complete(&msgs).await.unwrap();
        assert_eq!(third, "Echo from Mock: list them");
        assert_eq!(llm.call_count(), 3);
        assert_eq!(llm.tool_request_count(), 2);
    }

    #[tokio::test]
    async fn test_stream_with_error() {
        let llm = ScriptedLlm::new()
            .with_stream(vec!["a ", "b ", "c"])
            .with_stream_error_after(1);
        let items: Vec<_> = llm.complete_stream(&[]).await.unwrap().collect().await;
        assert_eq!(items.len(), 2);
        assert!(items[1].is_err());
    }
}
