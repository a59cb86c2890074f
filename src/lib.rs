//! Switchboard - 交互式工具调用智能体
//!
//! 模块划分：
//! - **agent**: 工具调用循环（模型一步 -> 并发执行工具 -> 回填结果）
//! - **config**: 应用配置加载（TOML + 环境变量）
//! - **core**: 错误类型、会话上下文、优雅关闭、会话构建
//! - **ledger**: 会话级 token 用量账本
//! - **llm**: 模型客户端抽象与实现（Anthropic / OpenAI 兼容 / Mock）
//! - **memory**: 对话历史与消息模型
//! - **provider**: 工具进程抽象与 MCP stdio 实现
//! - **session**: 会话循环、控制词与 system prompt
//! - **tools**: 方法注册表与调用执行器
//! - **turn**: 轮次编排与调用批次重建
//! - **ui**: 终端渲染

pub mod agent;
pub mod config;
pub mod core;
pub mod ledger;
pub mod llm;
pub mod memory;
pub mod provider;
pub mod session;
pub mod tools;
pub mod turn;
pub mod ui;

pub use crate::core::{AgentError, SessionBuilder};
pub use session::Session;
