//! 会话构建器：统一的启动流程
//!
//! 解析后端 -> 并发启动工具进程（任一失败则关闭已启动的进程并中止）-> 按进程注册通道 ->
//! 组装执行器、Agent 与编排器 -> 测量目录 token 开销 -> 创建账本与会话。

use std::sync::Arc;
use std::time::Duration;

use futures_util::future::join_all;

use crate::agent::ToolCallingAgent;
use crate::config::AppConfig;
use crate::core::{AgentError, SessionContext, ShutdownCoordinator, ShutdownManager};
use crate::ledger::UsageLedger;
use crate::llm::{
    create_client, estimate_catalog_tokens, resolve_backend, LlmClient, UsageExtractor,
};
use crate::provider::{McpProvider, ProviderChannel, ToolProvider};
use crate::session::{Session, SystemPrompt};
use crate::tools::{ToolExecutor, ToolRegistry};
use crate::turn::TurnOrchestrator;
use crate::ui::{BannerInfo, ConsoleRenderer, Renderer};

/// 会话构建器
pub struct SessionBuilder {
    config: AppConfig,
    backend: Option<String>,
    model: Option<String>,
    renderer: Arc<dyn Renderer>,
    shutdown: Arc<ShutdownManager>,
}

impl SessionBuilder {
    pub fn new(config: AppConfig) -> Self {
        Self {
            config,
            backend: None,
            model: None,
            renderer: Arc::new(ConsoleRenderer),
            shutdown: Arc::new(ShutdownManager::new()),
        }
    }

    /// 显式后端（命令行），优先于配置 llm.provider
    pub fn with_backend(mut self, backend: Option<String>) -> Self {
        self.backend = backend;
        self
    }

    pub fn with_model(mut self, model: Option<String>) -> Self {
        self.model = model;
        self
    }

    /// 打开代码模式；false 时保持配置中的值
    pub fn with_code_mode(mut self, code_mode: bool) -> Self {
        self.config.app.code_mode |= code_mode;
        self
    }

    pub fn with_renderer(mut self, renderer: Arc<dyn Renderer>) -> Self {
        self.renderer = renderer;
        self
    }

    pub fn with_shutdown(mut self, shutdown: Arc<ShutdownManager>) -> Self {
        self.shutdown = shutdown;
        self
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    /// 会话的 system prompt 来源
    pub fn system_prompt(&self) -> SystemPrompt {
        if self.config.app.code_mode {
            SystemPrompt::code_mode()
        } else {
            match &self.config.app.system_prompt {
                Some(text) => SystemPrompt::Static(text.clone()),
                None => SystemPrompt::None,
            }
        }
    }

    /// 完整启动：后端解析失败时不会启动任何工具进程
    pub async fn build(self) -> Result<Session, AgentError> {
        let explicit = self
            .backend
            .clone()
            .unwrap_or_else(|| self.config.llm.provider.clone());
        let kind = resolve_backend(Some(&explicit), |var| std::env::var(var).ok())?;
        let llm = create_client(kind, &self.config.llm, self.model.as_deref())?;
        tracing::info!(backend = %kind, model = %llm.model_id(), "model backend resolved");

        // 启动窗口内收到关闭信号时立即放弃；已启动的子进程随 future 丢弃而终止
        let shutdown = Arc::clone(&self.shutdown);
        let registry = tokio::select! {
            biased;
            _ = shutdown.wait_for_shutdown() => {
                tracing::warn!("shutdown requested during provider startup");
                return Err(AgentError::Interrupted);
            }
            registry = self.start_providers() => registry?,
        };
        Ok(self.assemble(llm, registry).await)
    }

    /// 并发启动所有活动工具进程并注册；任一失败则关闭已启动者并返回该错误
    pub async fn start_providers(&self) -> Result<ToolRegistry, AgentError> {
        let active = self.config.active_providers();
        if active.is_empty() {
            tracing::warn!("no tool providers configured");
        }

        let starts = active.iter().map(|(name, entry)| {
            let startup = self.config.startup_timeout(entry);
            let call_timeout = self.config.call_timeout(entry);
            async move {
                let result = McpProvider::start(name, entry, startup).await;
                (*name, call_timeout, result)
            }
        });

        let mut started: Vec<(Arc<dyn ToolProvider>, Duration)> = Vec::new();
        let mut first_error = None;
        for (name, call_timeout, result) in join_all(starts).await {
            match result {
                Ok(provider) => {
                    let provider: Arc<dyn ToolProvider> = Arc::new(provider);
                    started.push((provider, call_timeout));
                }
                Err(e) => {
                    tracing::error!(provider = %name, error = %e, "provider failed to start");
                    if first_error.is_none() {
                        first_error = Some(e);
                    }
                }
            }
        }

        let registry = register_all(started);
        if let Some(err) = first_error {
            let failed = registry.shutdown_all(self.config.tools.shutdown_grace()).await;
            if !failed.is_empty() {
                tracing::warn!(failed = ?failed, "providers did not stop after failed bootstrap");
            }
            return Err(err);
        }
        Ok(registry)
    }

    /// 用已就绪的模型客户端与注册表组装会话，并输出启动横幅
    pub async fn assemble(self, llm: Arc<dyn LlmClient>, registry: ToolRegistry) -> Session {
        let registry = Arc::new(registry);
        let executor = Arc::new(ToolExecutor::new(Arc::clone(&registry)));
        let system_prompt = self.system_prompt();
        let system_text = system_prompt.render();

        let system_tokens = match llm
            .count_catalog_tokens(system_text.as_deref(), executor.catalog())
            .await
        {
            Ok(tokens) => tokens,
            Err(e) => {
                tracing::warn!(error = %e, "catalog token count failed, using estimate");
                estimate_catalog_tokens(system_text.as_deref(), executor.catalog())
            }
        };

        let banner = BannerInfo {
            model_name: llm.backend().display_name().to_string(),
            model_id: llm.model_id().to_string(),
            providers: registry.channel_names(),
            methods: executor.catalog().iter().map(|m| m.signature()).collect(),
            system_tokens,
            code_mode: self.config.app.code_mode,
        };
        self.renderer.banner(&banner);

        let usage = UsageExtractor::for_backend(llm.backend());
        let agent = ToolCallingAgent::new(llm, executor, self.config.llm.max_steps);
        let orchestrator = TurnOrchestrator::new(Arc::new(agent), usage);
        let ctx = SessionContext::new(self.renderer);
        tracing::info!(
            session = %ctx.session_id(),
            methods = banner.methods.len(),
            system_tokens,
            "session ready"
        );

        Session::new(
            ctx,
            orchestrator,
            UsageLedger::new(system_tokens),
            system_prompt,
            self.shutdown,
            ShutdownCoordinator::new(registry, self.config.tools.shutdown_grace()),
        )
    }
}

/// 按启动顺序注册通道；名称冲突只记日志
pub fn register_all(providers: Vec<(Arc<dyn ToolProvider>, Duration)>) -> ToolRegistry {
    let mut registry = ToolRegistry::new();
    for (provider, call_timeout) in providers {
        let collisions = registry.register(ProviderChannel::new(provider, call_timeout));
        if !collisions.is_empty() {
            tracing::debug!(count = collisions.len(), "method name collisions during registration");
        }
    }
    registry
}
