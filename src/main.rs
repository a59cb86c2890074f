//! Switchboard - 交互式工具调用智能体
//!
//! 入口：初始化日志、解析命令行、构建会话并运行读取-执行循环。

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use switchboard::config::load_config;
use switchboard::core::{SessionBuilder, ShutdownManager};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser, Debug)]
#[command(name = "switchboard", version, about = "Interactive agent over MCP tool providers")]
struct Args {
    /// 额外的配置文件（覆盖 config/default.toml）
    #[arg(long)]
    config: Option<PathBuf>,

    /// 模型后端：anthropic / openai / mock / auto
    #[arg(long)]
    backend: Option<String>,

    /// 覆盖后端默认模型
    #[arg(long)]
    model: Option<String>,

    /// 代码模式：只启动 bash 工具进程
    #[arg(long)]
    code: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // 日志写 stderr，默认 info，可通过 RUST_LOG 覆盖
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,rmcp=warn,reqwest=warn,hyper=warn"));
    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr))
        .init();

    let config = load_config(args.config).context("Failed to load config")?;

    let shutdown = Arc::new(ShutdownManager::new());
    shutdown.install_signal_handlers();

    let mut session = SessionBuilder::new(config)
        .with_backend(args.backend)
        .with_model(args.model)
        .with_code_mode(args.code)
        .with_shutdown(Arc::clone(&shutdown))
        .build()
        .await
        .context("Failed to start session")?;

    let reason = session
        .run(tokio::io::BufReader::new(tokio::io::stdin()))
        .await;
    tracing::info!(?reason, "session finished");

    Ok(())
}
