//! Campus Agent - 校园管理对话后端
//!
//! 模块划分：
//! - **agent**: 编排器（意图分支、会话、流式回复）
//! - **config**: 应用配置加载（TOML + 环境变量）
//! - **core**: 错误类型、组件构建、工具并发调度
//! - **intent**: 意图识别
//! - **knowledge**: 静态语料检索与网页搜索
//! - **llm**: LLM 客户端抽象与实现（OpenAI 兼容 / Gemini / Scripted）
//! - **memory**: 对话消息与工具调用结构
//! - **notify**: 邮件通知（模板 + 投递方式）
//! - **observability**: 日志初始化
//! - **react**: 工具循环、流式渲染、提示词
//! - **session**: 进程内会话存储与淘汰策略
//! - **store**: 学生登记与对话日志（SQLite / 内存）
//! - **tools**: 校园管理工具集与执行器

pub mod agent;
pub mod config;
pub mod core;
pub mod intent;
pub mod knowledge;
pub mod llm;
pub mod memory;
pub mod notify;
pub mod observability;
pub mod react;
pub mod session;
pub mod store;
pub mod tools;

pub use agent::{Orchestrator, StreamHandle, TurnResult, DEFAULT_USER};
