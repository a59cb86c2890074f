//! System prompt
//!
//! 代码模式下的 prompt 含运行环境信息（OS、CPU 架构、本地时间、PATH 中可用的常用命令），
//! 每次 clear 都重新生成，时间不会停留在会话开始时。

use std::ffi::OsStr;

use chrono::Local;

/// 代码模式下检查的命令及其说明
pub const USEFUL_COMMANDS: &[(&str, &str)] = &[
    ("jq", "JSON processor"),
    ("rg", "ripgrep (fast search)"),
    ("grep", "text search"),
    ("awk", "text processing"),
    ("sed", "stream editor"),
    ("cut", "column extraction"),
    ("sort", "sorting"),
    ("uniq", "deduplication"),
    ("xargs", "argument builder"),
    ("curl", "HTTP client"),
    ("head", "first lines"),
    ("tail", "last lines"),
    ("wc", "word/line count"),
];

const CODE_MODE_TEMPLATE: &str = "\
You are a CODE MODE agent with ONLY bash access. Use the `tool` CLI to discover and call tools.

## Environment
- OS: {os_info}
- CPU: {cpu_info}
- Time: {current_time}
- Available commands: {available_commands}

## Workflow
1. DISCOVER: `tool grep <keyword> -c` (descriptions usually name the parameters)
2. CLARIFY (only if needed): `tool info <tool> -m <method> -c`
3. EXECUTE: `tool call <tool> -m <method> -p key=value -c`

When the output of one call feeds another, chain them in ONE script and extract fields with jq:
```bash
ID=$(tool call open-data-mcp -m search_movies -p query=\"Inception\" -c | jq -r '.results[0].imdb_id')
tool call open-data-mcp -m get_movie -p imdb_id=\"$ID\" -c
```

## Rules
1. Do not over-discover: grep descriptions are often enough
2. Never run `tool info <tool> -c` without `-m <method>`
3. Use separate calls only when the next step cannot be predicted
";

/// 会话的 system prompt 来源；clear 时据此重建
#[derive(Debug, Clone, PartialEq)]
pub enum SystemPrompt {
    None,
    Static(String),
    /// 模板中的 {os_info} {cpu_info} {current_time} {available_commands} 在生成时替换
    CodeMode { template: String },
}

impl SystemPrompt {
    /// 代码模式：优先读取 config/prompts/code_mode.md，缺失时用内置模板
    pub fn code_mode() -> Self {
        let template = ["config/prompts/code_mode.md", "../config/prompts/code_mode.md"]
            .into_iter()
            .find_map(|p| std::fs::read_to_string(p).ok())
            .unwrap_or_else(|| CODE_MODE_TEMPLATE.to_string());
        SystemPrompt::CodeMode { template }
    }

    /// 生成当前的 prompt 文本
    pub fn render(&self) -> Option<String> {
        match self {
            SystemPrompt::None => None,
            SystemPrompt::Static(text) => Some(text.clone()),
            SystemPrompt::CodeMode { template } => Some(build_code_mode_prompt(
                template,
                &available_commands(std::env::var_os("PATH").as_deref()),
            )),
        }
    }
}

pub fn build_code_mode_prompt(template: &str, commands: &[String]) -> String {
    let os_info = format!("{} ({})", std::env::consts::OS, std::env::consts::FAMILY);
    template
        .replace("{os_info}", &os_info)
        .replace("{cpu_info}", std::env::consts::ARCH)
        .replace("{current_time}", &Local::now().format("%Y-%m-%d %H:%M %Z").to_string())
        .replace("{available_commands}", &commands.join(", "))
}

/// PATH 中能找到的常用命令，形如 `jq (JSON processor)`，按 USEFUL_COMMANDS 顺序
pub fn available_commands(path: Option<&OsStr>) -> Vec<String> {
    let cwd = std::env::current_dir().unwrap_or_default();
    USEFUL_COMMANDS
        .iter()
        .filter(|(cmd, _)| which::which_in(cmd, path, &cwd).is_ok())
        .map(|(cmd, desc)| format!("{cmd} ({desc})"))
        .collect()
}
