//! 应用配置：从 config/default.toml 与环境变量加载
//!
//! 加载顺序：先读 TOML 文件，再用环境变量 `SWITCHBOARD__*` 覆盖（双下划线表示嵌套，如 `SWITCHBOARD__LLM__PROVIDER=openai`）。

use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;

/// 应用配置根（对应 config/default.toml 的顶层）
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    pub app: AppSection,
    pub llm: LlmSection,
    pub tools: ToolsSection,
    /// 工具进程：名称 -> 启动方式（BTreeMap 保证启动与注册顺序稳定）
    pub providers: BTreeMap<String, ProviderEntry>,
}

/// [app] 段
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AppSection {
    pub name: String,
    /// 代码模式：只启动 code_mode_providers 中的工具进程，并生成带环境信息的 system prompt
    pub code_mode: bool,
    pub code_mode_providers: Vec<String>,
    /// 固定 system prompt（非代码模式下可选）
    pub system_prompt: Option<String>,
}

impl Default for AppSection {
    fn default() -> Self {
        Self {
            name: "switchboard".to_string(),
            code_mode: false,
            code_mode_providers: vec!["bash".to_string()],
            system_prompt: None,
        }
    }
}

/// [llm] 段：后端选择、模型覆盖、步数上限与超时
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LlmSection {
    /// auto / anthropic / openai / mock；auto 时按 API Key 环境变量选择
    pub provider: String,
    pub model: Option<String>,
    pub base_url: Option<String>,
    /// 单轮内模型最多执行的步数（每步可能发起一批工具调用）
    pub max_steps: usize,
    pub timeouts: LlmTimeoutsSection,
}

impl Default for LlmSection {
    fn default() -> Self {
        Self {
            provider: "auto".to_string(),
            model: None,
            base_url: None,
            max_steps: 20,
            timeouts: LlmTimeoutsSection::default(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LlmTimeoutsSection {
    pub request: u64,
}

impl Default for LlmTimeoutsSection {
    fn default() -> Self {
        Self { request: 120 }
    }
}

/// [tools] 段：调用超时、启动窗口、关闭宽限期（秒）
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ToolsSection {
    pub call_timeout_secs: u64,
    pub startup_timeout_secs: u64,
    pub shutdown_grace_secs: u64,
}

impl Default for ToolsSection {
    fn default() -> Self {
        Self {
            call_timeout_secs: 120,
            startup_timeout_secs: 30,
            shutdown_grace_secs: 5,
        }
    }
}

impl ToolsSection {
    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.shutdown_grace_secs)
    }
}

/// [providers.<name>] 段：一个工具进程的启动方式
#[derive(Debug, Clone, Deserialize, Default, PartialEq)]
pub struct ProviderEntry {
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub env: HashMap<String, String>,
    /// 覆盖 [tools].startup_timeout_secs
    pub startup_timeout_secs: Option<u64>,
    /// 覆盖 [tools].call_timeout_secs
    pub call_timeout_secs: Option<u64>,
}

impl AppConfig {
    /// 本次会话要启动的工具进程；代码模式下只保留 code_mode_providers
    pub fn active_providers(&self) -> Vec<(&str, &ProviderEntry)> {
        self.providers
            .iter()
            .filter(|(name, _)| {
                !self.app.code_mode || self.app.code_mode_providers.iter().any(|p| p == *name)
            })
            .map(|(name, entry)| (name.as_str(), entry))
            .collect()
    }

    pub fn startup_timeout(&self, entry: &ProviderEntry) -> Duration {
        Duration::from_secs(
            entry
                .startup_timeout_secs
                .unwrap_or(self.tools.startup_timeout_secs),
        )
    }

    pub fn call_timeout(&self, entry: &ProviderEntry) -> Duration {
        Duration::from_secs(entry.call_timeout_secs.unwrap_or(self.tools.call_timeout_secs))
    }
}

/// 从 config 目录加载配置，环境变量 SWITCHBOARD__* 可覆盖
///
/// 1. 按顺序查找 config/default.toml、../config/default.toml、default.toml，找到则作为第一源
/// 2. 若传入 config_path 且文件存在，则追加该文件（可覆盖前面的键）
/// 3. 最后叠加环境变量 SWITCHBOARD__*（双下划线表示嵌套键）
pub fn load_config(config_path: Option<PathBuf>) -> Result<AppConfig, config::ConfigError> {
    let mut builder = config::Config::builder();

    let default_names = ["config/default", "../config/default", "default"];
    for name in default_names {
        let path = format!("{}.toml", name);
        if std::path::Path::new(&path).exists() {
            builder = builder.add_source(config::File::with_name(name).required(false));
            break;
        }
    }

    if let Some(ref path) = config_path {
        if path.exists() {
            builder = builder.add_source(config::File::from(path.clone()).required(false));
        } else {
            tracing::warn!(path = %path.display(), "config file not found, ignoring");
        }
    }

    builder = builder.add_source(
        config::Environment::with_prefix("SWITCHBOARD")
            .separator("__")
            .try_parsing(true),
    );

    let c = builder.build()?;
    c.try_deserialize()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn sample_config() -> AppConfig {
        let mut config = AppConfig::default();
        config.providers.insert(
            "bash".into(),
            ProviderEntry {
                command: "uv".into(),
                args: vec!["run".into(), "server.py".into()],
                call_timeout_secs: Some(300),
                ..Default::default()
            },
        );
        config.providers.insert(
            "open_data".into(),
            ProviderEntry {
                command: "uv".into(),
                ..Default::default()
            },
        );
        config
    }

    #[test]
    fn test_defaults() {
        let config = AppConfig::default();
        assert_eq!(config.llm.provider, "auto");
        assert_eq!(config.llm.max_steps, 20);
        assert_eq!(config.tools.call_timeout_secs, 120);
        assert_eq!(config.app.code_mode_providers, vec!["bash".to_string()]);
    }

    #[test]
    fn test_code_mode_filters_providers() {
        let mut config = sample_config();
        let names: Vec<_> = config.active_providers().iter().map(|(n, _)| *n).collect();
        assert_eq!(names, vec!["bash", "open_data"]);

        config.app.code_mode = true;
        let names: Vec<_> = config.active_providers().iter().map(|(n, _)| *n).collect();
        assert_eq!(names, vec!["bash"]);
    }

    #[test]
    fn test_per_provider_timeout_overrides() {
        let config = sample_config();
        let bash = &config.providers["bash"];
        let open_data = &config.providers["open_data"];
        assert_eq!(config.call_timeout(bash), Duration::from_secs(300));
        assert_eq!(config.call_timeout(open_data), Duration::from_secs(120));
        assert_eq!(config.startup_timeout(bash), Duration::from_secs(30));
    }

    #[test]
    fn test_load_explicit_file() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            r#"
[llm]
provider = "mock"
max_steps = 4

[providers.echo]
command = "echo-server"
args = ["--stdio"]
"#
        )
        .unwrap();

        let config = load_config(Some(file.path().to_path_buf())).unwrap();
        assert_eq!(config.llm.provider, "mock");
        assert_eq!(config.llm.max_steps, 4);
        let echo = &config.providers["echo"];
        assert_eq!(echo.command, "echo-server");
        assert_eq!(echo.args, vec!["--stdio".to_string()]);
    }
}
