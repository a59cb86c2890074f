//! 终端渲染
//!
//! Renderer 是会话输出的唯一出口：启动横幅、每轮的文本段与调用批次、每轮 token 行、
//! tokens 表格、提示与错误。ConsoleRenderer 用 crossterm 着色写 stdout（日志走 stderr）；
//! RecordingRenderer 只记录事件，供无终端场景与测试使用。

use std::io::Write;
use std::sync::Mutex;

use crossterm::style::Stylize;
use serde_json::Value;

use crate::ledger::{TokenCounts, UsageSummary};
use crate::turn::{CallBatch, CompletedCall, TurnOutput, TurnSegment};

/// 启动横幅信息
#[derive(Debug, Clone, PartialEq)]
pub struct BannerInfo {
    pub model_name: String,
    pub model_id: String,
    pub providers: Vec<String>,
    /// 各方法签名
    pub methods: Vec<String>,
    pub system_tokens: u64,
    pub code_mode: bool,
}

pub trait Renderer: Send + Sync {
    fn banner(&self, info: &BannerInfo);

    /// 输入提示符
    fn prompt(&self);

    /// 一轮的输出与本轮 token 行；session_total 为账本当前总量
    fn turn(&self, output: &TurnOutput, session_total: u64);

    fn usage_table(&self, summary: &UsageSummary);

    fn notice(&self, text: &str);

    fn error(&self, text: &str);
}

/// 千分位格式：1234567 -> "1,234,567"
pub fn format_thousands(n: u64) -> String {
    let digits = n.to_string();
    let mut out = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, ch) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            out.push(',');
        }
        out.push(ch);
    }
    out
}

/// 调用标题：`method(k=v, ...)`，值以 JSON 形式显示
pub fn call_title(call: &CompletedCall) -> String {
    let args = call
        .args
        .iter()
        .map(|(k, v)| format!("{}={}", k, display_value(v)))
        .collect::<Vec<_>>()
        .join(", ");
    format!("{}({})", call.method, args)
}

fn display_value(v: &Value) -> String {
    match v {
        Value::String(s) => format!("{s:?}"),
        other => other.to_string(),
    }
}

/// 每轮 token 行；缓存数为 0 时省略括号部分
pub fn turn_tokens_line(usage: &TokenCounts, session_total: u64) -> String {
    let cached = if usage.cached > 0 {
        format!(" ({} cached)", format_thousands(usage.cached))
    } else {
        String::new()
    };
    format!(
        "Tokens: {} in{} / {} out | Total: {}",
        format_thousands(usage.input),
        cached,
        format_thousands(usage.output),
        format_thousands(session_total)
    )
}

/// tokens 表格的行；平均值只在有轮次时出现
pub fn usage_rows(summary: &UsageSummary) -> Vec<(&'static str, String)> {
    let mut rows = vec![
        ("System (tools)", format_thousands(summary.system_tokens)),
        ("Turns", summary.turns.to_string()),
        ("Input tokens", format_thousands(summary.input)),
        ("Output tokens", format_thousands(summary.output)),
        ("Cached tokens", format_thousands(summary.cached)),
        ("Total tokens", format_thousands(summary.total)),
    ];
    if let Some(avg) = summary.average_per_turn {
        rows.push(("Avg per turn", format_thousands(avg)));
    }
    rows
}

/// 彩色终端输出
#[derive(Debug, Default)]
pub struct ConsoleRenderer;

impl ConsoleRenderer {
    fn print_call(&self, call: &CompletedCall, indent: &str, parallel: bool) {
        let title = call_title(call);
        let title = if parallel { title.magenta() } else { title.cyan() };
        println!("{indent}{title}");
        for line in call.output.lines() {
            let line = format!("{indent}  {line}");
            if call.is_error {
                println!("{}", line.red());
            } else {
                println!("{}", line.dim());
            }
        }
    }

    fn print_batch(&self, batch: &CallBatch) {
        if batch.parallel {
            println!(
                "  {}",
                format!("⚡ Parallel batch {}", batch.sequence).magenta().bold()
            );
            for call in &batch.calls {
                self.print_call(call, "    ", true);
            }
        } else {
            for call in &batch.calls {
                self.print_call(call, "  ", false);
            }
        }
    }
}

impl Renderer for ConsoleRenderer {
    fn banner(&self, info: &BannerInfo) {
        let mode = if info.code_mode {
            " | Code Mode".yellow().bold().to_string()
        } else {
            String::new()
        };
        println!(
            "{} {} ({}) | Providers: {} | Methods: {} | System + schemas: {} tokens{}",
            "Model:".bold(),
            info.model_name,
            info.model_id.clone().dim(),
            info.providers.join(", "),
            info.methods.len(),
            format_thousands(info.system_tokens),
            mode
        );
        for sig in &info.methods {
            println!("  {}", sig.clone().dim());
        }
        println!("{}", "Commands: quit / exit / q, clear, tokens".dim());
        println!();
    }

    fn prompt(&self) {
        print!("{} ", "You:".blue().bold());
        let _ = std::io::stdout().flush();
    }

    fn turn(&self, output: &TurnOutput, session_total: u64) {
        println!();
        println!("{}", "Assistant".green().bold());
        for segment in &output.segments {
            match segment {
                TurnSegment::Text { text } => {
                    for line in text.lines() {
                        println!("  {line}");
                    }
                }
                TurnSegment::Batch(batch) => self.print_batch(batch),
            }
        }
        println!("{}", turn_tokens_line(&output.usage, session_total).dim());
        println!();
    }

    fn usage_table(&self, summary: &UsageSummary) {
        println!("{}", "Token Usage".cyan().bold());
        let rows = usage_rows(summary);
        let width = rows.iter().map(|(label, _)| label.len()).max().unwrap_or(0);
        for (label, value) in rows {
            println!("  {:<width$}  {}", label, format!("{value:>12}").yellow(), width = width);
        }
        println!();
    }

    fn notice(&self, text: &str) {
        println!("{}", text.green());
    }

    fn error(&self, text: &str) {
        println!("{} {}", "Error:".red().bold(), text);
    }
}

/// 记录下来的渲染事件
#[derive(Debug, Clone, PartialEq)]
pub enum RenderEvent {
    Banner(BannerInfo),
    Prompt,
    Turn { output: TurnOutput, session_total: u64 },
    Usage(UsageSummary),
    Notice(String),
    Error(String),
}

/// 只记录不输出的渲染器
#[derive(Debug, Default)]
pub struct RecordingRenderer {
    events: Mutex<Vec<RenderEvent>>,
}

impl RecordingRenderer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<RenderEvent> {
        self.events.lock().map(|e| e.clone()).unwrap_or_default()
    }

    fn record(&self, event: RenderEvent) {
        if let Ok(mut events) = self.events.lock() {
            events.push(event);
        }
    }
}

impl Renderer for RecordingRenderer {
    fn banner(&self, info: &BannerInfo) {
        self.record(RenderEvent::Banner(info.clone()));
    }

    fn prompt(&self) {
        self.record(RenderEvent::Prompt);
    }

    fn turn(&self, output: &TurnOutput, session_total: u64) {
        self.record(RenderEvent::Turn {
            output: output.clone(),
            session_total,
        });
    }

    fn usage_table(&self, summary: &UsageSummary) {
        self.record(RenderEvent::Usage(*summary));
    }

    fn notice(&self, text: &str) {
        self.record(RenderEvent::Notice(text.to_string()));
    }

    fn error(&self, text: &str) {
        self.record(RenderEvent::Error(text.to_string()));
    }
}
