//! 核心层：错误类型、组件构建、工具并发调度

pub mod builder;
pub mod error;
pub mod task_scheduler;

pub use builder::{
    create_llm_from_config, create_notifier, create_search, open_stores, AgentBuilder,
    AgentComponents, AgentSettings,
};
pub use error::AgentError;
pub use task_scheduler::TaskScheduler;
