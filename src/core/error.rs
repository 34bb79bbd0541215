//! Agent 错误类型
//!
//! 编排层内部统一使用 AgentError 传播；到达编排边界后一律转为致歉文本或带 error 标记的流事件，
//! 不会抛给调用方。

use thiserror::Error;

use crate::llm::LlmError;
use crate::store::StoreError;

/// Agent 运行过程中可能出现的错误（LLM、工具、存储、取消等）
#[derive(Error, Debug)]
pub enum AgentError {
    #[error("LLM error: {0}")]
    LlmError(#[from] LlmError),

    #[error("Tool execution failed: {0}")]
    ToolExecutionFailed(String),

    #[error("Tool timeout: {0}")]
    ToolTimeout(String),

    #[error("Storage error: {0}")]
    StorageError(#[from] StoreError),

    #[error("Config error: {0}")]
    ConfigError(String),

    #[error("Cancelled")]
    Cancelled,

    #[error("Tool loop stopped after {0} rounds")]
    MaxRoundsExceeded(usize),
}

impl AgentError {
    /// 面向用户的致歉文本，携带错误细节
    pub fn apology(&self) -> String {
        format!(
            "I apologize, but I encountered an error while processing your request: {}",
            self
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_apology_carries_detail() {
        let err = AgentError::LlmError(LlmError::Timeout(30));
        let text = err.apology();
        assert!(text.starts_with("I apologize"));
        assert!(text.contains("30"));
    }
}
