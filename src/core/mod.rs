//! 核心层：错误类型、会话上下文、优雅关闭与会话构建

pub mod builder;
pub mod context;
pub mod error;
pub mod shutdown;

pub use builder::{register_all, SessionBuilder};
pub use context::SessionContext;
pub use error::AgentError;
pub use shutdown::{ShutdownCoordinator, ShutdownManager, ShutdownReason};
