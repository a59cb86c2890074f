//! 优雅关闭处理
//!
//! ShutdownManager 把 Ctrl+C / SIGTERM / 用户退出统一为一个取消 token，并记录最先到达的原因；
//! ShutdownCoordinator 负责会话结束时关闭全部工具进程，无论从哪条路径退出都只执行一次。

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::tools::ToolRegistry;

/// 关闭原因
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ShutdownReason {
    /// 用户发起的退出（Ctrl+C 或 quit 命令）
    UserInitiated,
    /// SIGTERM 信号
    Signal,
    /// 输入流结束（EOF）
    EndOfInput,
}

/// 关闭信号管理器
#[derive(Clone, Default)]
pub struct ShutdownManager {
    shutdown_token: CancellationToken,
    /// 第一次触发时的原因
    reason: Arc<OnceLock<ShutdownReason>>,
}

impl ShutdownManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// 获取关闭 token（用于取消等待中的输入读取）
    pub fn token(&self) -> CancellationToken {
        self.shutdown_token.clone()
    }

    /// 触发关闭；重复触发不覆盖最初的原因
    pub fn shutdown(&self, reason: ShutdownReason) {
        let _ = self.reason.set(reason);
        self.shutdown_token.cancel();
    }

    pub fn is_shutdown(&self) -> bool {
        self.shutdown_token.is_cancelled()
    }

    pub fn reason(&self) -> Option<ShutdownReason> {
        self.reason.get().cloned()
    }

    pub async fn wait_for_shutdown(&self) {
        self.shutdown_token.cancelled().await;
    }

    /// 安装系统信号处理器 (Ctrl+C, SIGTERM)
    pub fn install_signal_handlers(self: &Arc<Self>) {
        let manager = Arc::clone(self);
        tokio::spawn(async move {
            if let Ok(()) = tokio::signal::ctrl_c().await {
                tracing::info!("Received Ctrl+C, initiating graceful shutdown...");
                manager.shutdown(ShutdownReason::UserInitiated);
            }
        });

        #[cfg(unix)]
        {
            let manager = Arc::clone(self);
            tokio::spawn(async move {
                use tokio::signal::unix::{signal, SignalKind};
                if let Ok(mut sigterm) = signal(SignalKind::terminate()) {
                    sigterm.recv().await;
                    tracing::info!("Received SIGTERM, initiating graceful shutdown...");
                    manager.shutdown(ShutdownReason::Signal);
                }
            });
        }
    }
}

/// 关闭协调器：会话结束时关闭注册表中的全部工具进程
pub struct ShutdownCoordinator {
    registry: Arc<ToolRegistry>,
    grace: Duration,
    done: AtomicBool,
}

impl ShutdownCoordinator {
    pub fn new(registry: Arc<ToolRegistry>, grace: Duration) -> Self {
        Self {
            registry,
            grace,
            done: AtomicBool::new(false),
        }
    }

    /// 关闭全部通道并返回未能干净关闭的通道名；已经执行过时返回 None
    pub async fn run_cleanup(&self) -> Option<Vec<String>> {
        if self.done.swap(true, Ordering::SeqCst) {
            return None;
        }
        let channels = self.registry.channel_names();
        tracing::info!("Stopping {} tool providers...", channels.len());
        let failed = self.registry.shutdown_all(self.grace).await;
        if failed.is_empty() {
            tracing::info!("All tool providers stopped");
        } else {
            tracing::warn!(failed = ?failed, "some tool providers did not stop cleanly");
        }
        Some(failed)
    }

    pub fn has_run(&self) -> bool {
        self.done.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::AgentError;
    use crate::memory::ToolPayload;
    use crate::provider::{MethodSpec, ProviderChannel, ToolProvider};
    use async_trait::async_trait;
    use serde_json::{Map, Value};
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn test_shutdown_manager_token() {
        let manager = ShutdownManager::new();
        let token = manager.token();
        assert!(!token.is_cancelled());
        assert_eq!(manager.reason(), None);
        manager.shutdown(ShutdownReason::Signal);
        assert!(token.is_cancelled());
        assert!(manager.is_shutdown());
    }

    #[test]
    fn test_first_reason_wins() {
        let manager = ShutdownManager::new();
        manager.shutdown(ShutdownReason::EndOfInput);
        manager.shutdown(ShutdownReason::Signal);
        assert_eq!(manager.reason(), Some(ShutdownReason::EndOfInput));
    }

    struct Counting(Arc<AtomicUsize>);

    #[async_trait]
    impl ToolProvider for Counting {
        fn name(&self) -> &str {
            "counting"
        }

        fn methods(&self) -> Vec<MethodSpec> {
            Vec::new()
        }

        async fn call(
            &self,
            _method: &str,
            _args: Map<String, Value>,
        ) -> Result<ToolPayload, AgentError> {
            Ok(ToolPayload::Text(String::new()))
        }

        async fn shutdown(&self) -> Result<(), AgentError> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_cleanup_runs_once() {
        let stops = Arc::new(AtomicUsize::new(0));
        let mut registry = ToolRegistry::new();
        registry.register(ProviderChannel::new(
            Arc::new(Counting(stops.clone())),
            Duration::from_secs(1),
        ));
        let coordinator = ShutdownCoordinator::new(Arc::new(registry), Duration::from_millis(100));

        assert_eq!(coordinator.run_cleanup().await, Some(Vec::new()));
        assert_eq!(coordinator.run_cleanup().await, None);
        assert!(coordinator.has_run());
        assert_eq!(stops.load(Ordering::SeqCst), 1);
    }
}
