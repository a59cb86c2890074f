//! 工具层：跨工具进程的方法注册表与调用执行器

pub mod executor;
pub mod registry;

pub use executor::ToolExecutor;
pub use registry::ToolRegistry;
