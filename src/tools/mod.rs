//! 工具层：封闭的校园管理工具集、参数 schema、执行器

pub mod executor;
pub mod registry;
pub mod schema;
pub mod students;

pub use executor::{ToolExecutor, ToolResult};
pub use registry::{tool_specs, CampusTool};
pub use students::StudentTools;
