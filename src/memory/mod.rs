//! 消息层：LLM 对话消息与工具调用结构

pub mod conversation;

pub use conversation::{Message, Role, ToolCall};
