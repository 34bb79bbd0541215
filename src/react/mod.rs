//! 回复生成层：管理路径的工具循环、流式渲染策略、提示词

pub mod events;
pub mod loop_;
pub mod prompts;
pub mod stream;

pub use events::{EventKind, LoopEvent, Snapshot, StreamEvent};
pub use loop_::{ToolLoop, ToolLoopOutcome, DEFAULT_MAX_TOOL_ROUNDS, EMPTY_ANSWER, GIVE_UP_ANSWER};
pub use stream::{render_incremental, replay_chunks, StreamOutcome, StreamSink};
