//! Agent 错误类型
//!
//! 传播策略：工具层失败（Invocation / InvocationTimeout / UnknownMethod）在轮次内被转为工具结果文本，
//! 只有启动期（ProviderUnavailable / NoBackend / Config）与模型调用期（ModelCallFailure）的错误才会上抛到会话循环。

use std::time::Duration;

use thiserror::Error;

/// 会话运行过程中可能出现的错误
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AgentError {
    /// 工具进程启动失败或未能在启动窗口内公布方法目录（启动期致命）
    #[error("Provider '{provider}' unavailable: {reason}")]
    ProviderUnavailable { provider: String, reason: String },

    #[error("Invocation of '{method}' failed: {reason}")]
    Invocation { method: String, reason: String },

    #[error("Invocation of '{method}' timed out after {timeout:?}")]
    InvocationTimeout { method: String, timeout: Duration },

    #[error("Unknown method: {0}")]
    UnknownMethod(String),

    /// 两个工具进程声明了同名方法；先注册者保留
    #[error("Method '{method}' already provided by '{kept}', ignoring copy from '{rejected}'")]
    NameCollision {
        method: String,
        kept: String,
        rejected: String,
    },

    #[error("Model call failed: {0}")]
    ModelCallFailure(String),

    #[error("No model backend available: {0}")]
    NoBackend(String),

    #[error("Config error: {0}")]
    Config(String),

    #[error("Provider '{provider}' did not stop cleanly: {reason}")]
    ProviderStop { provider: String, reason: String },

    /// 启动期间收到关闭信号
    #[error("Startup interrupted by shutdown request")]
    Interrupted,
}

impl AgentError {
    /// 是否属于单次工具调用失败（应作为工具结果内容交还给模型，而不是中止轮次）
    pub fn is_invocation_failure(&self) -> bool {
        matches!(
            self,
            AgentError::Invocation { .. }
                | AgentError::InvocationTimeout { .. }
                | AgentError::UnknownMethod(_)
        )
    }
}
