//! 模型后端选择
//!
//! 显式指定（命令行 --backend 或配置 llm.provider）优先；否则按 API Key 环境变量依次尝试
//! ANTHROPIC_API_KEY、OPENAI_API_KEY。必须恰好解析出一个后端，否则启动失败。

use std::sync::Arc;
use std::time::Duration;

use crate::config::LlmSection;
use crate::core::AgentError;
use crate::llm::{AnthropicClient, LlmClient, MockLlmClient, OpenAiClient};

pub const ANTHROPIC_KEY_VAR: &str = "ANTHROPIC_API_KEY";
pub const OPENAI_KEY_VAR: &str = "OPENAI_API_KEY";

/// 模型后端标识；也用于选择用量字段的抽取方式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BackendKind {
    Anthropic,
    OpenAi,
    Mock,
}

impl BackendKind {
    pub fn parse(name: &str) -> Option<Self> {
        match name.trim().to_lowercase().as_str() {
            "anthropic" | "claude" => Some(BackendKind::Anthropic),
            "openai" => Some(BackendKind::OpenAi),
            "mock" => Some(BackendKind::Mock),
            _ => None,
        }
    }

    pub fn default_model(&self) -> &'static str {
        match self {
            BackendKind::Anthropic => "claude-sonnet-4-5-20250929",
            BackendKind::OpenAi => "gpt-4o",
            BackendKind::Mock => "mock-echo",
        }
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            BackendKind::Anthropic => "Claude Sonnet",
            BackendKind::OpenAi => "GPT-4o",
            BackendKind::Mock => "Mock",
        }
    }

    /// 该后端需要的 API Key 环境变量
    pub fn key_var(&self) -> Option<&'static str> {
        match self {
            BackendKind::Anthropic => Some(ANTHROPIC_KEY_VAR),
            BackendKind::OpenAi => Some(OPENAI_KEY_VAR),
            BackendKind::Mock => None,
        }
    }
}

impl std::fmt::Display for BackendKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            BackendKind::Anthropic => "anthropic",
            BackendKind::OpenAi => "openai",
            BackendKind::Mock => "mock",
        };
        f.write_str(name)
    }
}

/// 解析本次会话使用的后端；env 为环境变量查询函数（便于测试注入）
pub fn resolve_backend(
    explicit: Option<&str>,
    env: impl Fn(&str) -> Option<String>,
) -> Result<BackendKind, AgentError> {
    let has_key = |var: &str| env(var).is_some_and(|v| !v.trim().is_empty());

    if let Some(name) = explicit.filter(|n| !n.eq_ignore_ascii_case("auto")) {
        let kind = BackendKind::parse(name)
            .ok_or_else(|| AgentError::Config(format!("unknown backend '{name}'")))?;
        return match kind.key_var() {
            Some(var) if !has_key(var) => Err(AgentError::NoBackend(format!(
                "backend '{kind}' selected but {var} is not set"
            ))),
            _ => Ok(kind),
        };
    }

    [BackendKind::Anthropic, BackendKind::OpenAi]
        .into_iter()
        .find(|kind| kind.key_var().is_some_and(|var| has_key(var)))
        .ok_or_else(|| {
            AgentError::NoBackend(format!("set {OPENAI_KEY_VAR} or {ANTHROPIC_KEY_VAR}"))
        })
}

/// 按后端构建客户端；model 优先级：参数 > 配置 llm.model > 后端默认
pub fn create_client(
    kind: BackendKind,
    section: &LlmSection,
    model: Option<&str>,
) -> Result<Arc<dyn LlmClient>, AgentError> {
    let model = model
        .or(section.model.as_deref())
        .unwrap_or(kind.default_model());
    let timeout = Duration::from_secs(section.timeouts.request);
    let key = |var: &str| {
        std::env::var(var).map_err(|_| AgentError::NoBackend(format!("{var} is not set")))
    };

    let client: Arc<dyn LlmClient> = match kind {
        BackendKind::Anthropic => Arc::new(
            AnthropicClient::new(key(ANTHROPIC_KEY_VAR)?, model, timeout)?
                .with_base_url(section.base_url.as_deref()),
        ),
        BackendKind::OpenAi => Arc::new(OpenAiClient::new(
            section.base_url.as_deref(),
            model,
            Some(key(OPENAI_KEY_VAR)?.as_str()),
            timeout,
        )),
        BackendKind::Mock => Arc::new(MockLlmClient),
    };
    Ok(client)
}
