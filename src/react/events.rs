//! 过程事件
//!
//! - StreamEvent：对外的流式回复协议，kind ∈ {message, complete, error}，data 为 Snapshot
//! - LoopEvent：工具循环内部的步骤事件（轮次、工具调用、观察），供前端展示

use chrono::Utc;
use serde::{Deserialize, Serialize};

/// 流事件类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    Message,
    Complete,
    Error,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::Message => "message",
            EventKind::Complete => "complete",
            EventKind::Error => "error",
        }
    }
}

/// 回复快照：response 为截至目前的完整文本（累积），progress ∈ [0, 100]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    pub response: String,
    pub session_id: String,
    pub timestamp: String,
    pub progress: f64,
    #[serde(default)]
    pub complete: bool,
    #[serde(default)]
    pub error: bool,
    #[serde(default)]
    pub streaming: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub word_count: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_words: Option<usize>,
}

impl Snapshot {
    pub fn new(response: impl Into<String>, session_id: &str, progress: f64) -> Self {
        Self {
            response: response.into(),
            session_id: session_id.to_string(),
            timestamp: Utc::now().to_rfc3339(),
            progress,
            complete: false,
            error: false,
            streaming: false,
            word_count: None,
            total_words: None,
        }
    }
}

/// 单个流事件
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamEvent {
    pub kind: EventKind,
    pub data: Snapshot,
}

impl StreamEvent {
    pub fn message(data: Snapshot) -> Self {
        Self {
            kind: EventKind::Message,
            data,
        }
    }

    /// 终止事件：progress 固定为 100，complete=true
    pub fn complete(mut data: Snapshot) -> Self {
        data.progress = 100.0;
        data.complete = true;
        Self {
            kind: EventKind::Complete,
            data,
        }
    }

    pub fn error(mut data: Snapshot) -> Self {
        data.error = true;
        data.complete = false;
        Self {
            kind: EventKind::Error,
            data,
        }
    }

    /// 消费方只在收到此类事件后认为流结束
    pub fn is_terminal(&self) -> bool {
        self.data.complete
    }
}

/// 工具循环步骤事件（可序列化为 JSON 供前端展示）
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum LoopEvent {
    /// 第几轮 LLM 调用
    RoundStarted { round: usize, max_rounds: usize },
    /// 调用工具
    ToolCall {
        tool: String,
        args: serde_json::Value,
    },
    /// 工具返回（预览）
    Observation {
        tool: String,
        success: bool,
        preview: String,
    },
    /// 达到轮数上限
    Exhausted { rounds: usize },
}
