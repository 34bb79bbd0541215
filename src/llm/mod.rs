//! LLM 层：客户端抽象与实现（OpenAI 兼容 / Gemini / Scripted）

pub mod gemini;
pub mod mock;
pub mod openai;
pub mod traits;

pub use gemini::{create_gemini_client, GEMINI_BASE_URL, GEMINI_FLASH};
pub use mock::{RecordedRequest, ScriptedLlm};
pub use openai::{OpenAiClient, TokenUsage};
pub use traits::{LlmClient, LlmError, LlmResponse, TimeoutLlmClient, TokenStream, ToolSpec};
