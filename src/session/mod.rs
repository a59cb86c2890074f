//! 会话循环
//!
//! 逐行读取输入：整行（去首尾空白、转小写后）等于控制词时执行控制动作，空行忽略，其余作为一轮
//! 用户输入交给编排器。EOF、quit 或中断信号结束会话，结束时工具进程只关闭一次。
//! 中断只打断等待中的输入读取，不打断已经开始的轮次。

pub mod prompt;

use std::sync::Arc;

use tokio::io::{AsyncBufRead, AsyncBufReadExt};

use crate::core::{SessionContext, ShutdownCoordinator, ShutdownManager, ShutdownReason};
use crate::ledger::UsageLedger;
use crate::memory::Conversation;
use crate::turn::TurnOrchestrator;

pub use prompt::{available_commands, build_code_mode_prompt, SystemPrompt, USEFUL_COMMANDS};

/// 控制词
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Control {
    Quit,
    Clear,
    Tokens,
}

impl Control {
    /// 只有整行匹配才算控制词
    pub fn parse(line: &str) -> Option<Self> {
        match line.trim().to_lowercase().as_str() {
            "quit" | "exit" | "q" => Some(Control::Quit),
            "clear" => Some(Control::Clear),
            "tokens" => Some(Control::Tokens),
            _ => None,
        }
    }
}

/// 处理一行输入后的去向
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineOutcome {
    Continue,
    Quit,
}

/// 交互会话：独占对话历史与用量账本
pub struct Session {
    ctx: SessionContext,
    orchestrator: TurnOrchestrator,
    conversation: Conversation,
    ledger: UsageLedger,
    system_prompt: SystemPrompt,
    shutdown: Arc<ShutdownManager>,
    coordinator: ShutdownCoordinator,
}

impl Session {
    pub fn new(
        ctx: SessionContext,
        orchestrator: TurnOrchestrator,
        ledger: UsageLedger,
        system_prompt: SystemPrompt,
        shutdown: Arc<ShutdownManager>,
        coordinator: ShutdownCoordinator,
    ) -> Self {
        Self {
            conversation: Conversation::new(system_prompt.render()),
            ctx,
            orchestrator,
            ledger,
            system_prompt,
            shutdown,
            coordinator,
        }
    }

    pub fn conversation(&self) -> &Conversation {
        &self.conversation
    }

    pub fn ledger(&self) -> &UsageLedger {
        &self.ledger
    }

    /// 运行到会话结束，返回结束原因；返回前已关闭全部工具进程
    pub async fn run<R>(&mut self, input: R) -> ShutdownReason
    where
        R: AsyncBufRead + Unpin,
    {
        let token = self.shutdown.token();
        let mut lines = input.lines();

        loop {
            self.ctx.renderer().prompt();
            let line = tokio::select! {
                biased;
                _ = token.cancelled() => break,
                line = lines.next_line() => line,
            };
            match line {
                Ok(Some(line)) => {
                    if self.handle_line(&line).await == LineOutcome::Quit {
                        self.shutdown.shutdown(ShutdownReason::UserInitiated);
                        break;
                    }
                }
                Ok(None) => {
                    self.shutdown.shutdown(ShutdownReason::EndOfInput);
                    break;
                }
                Err(e) => {
                    tracing::warn!(parent: self.ctx.span(), error = %e, "failed to read input");
                    self.shutdown.shutdown(ShutdownReason::EndOfInput);
                    break;
                }
            }
        }

        let reason = self.shutdown.reason().unwrap_or(ShutdownReason::UserInitiated);
        let duration_secs = (chrono::Local::now() - self.ctx.started_at()).num_seconds();
        tracing::info!(
            parent: self.ctx.span(),
            ?reason,
            turns = self.ledger.summary().turns,
            duration_secs,
            "session ending"
        );
        self.ctx.renderer().notice("Goodbye!");
        self.teardown().await;
        reason
    }

    /// 处理一行输入
    pub async fn handle_line(&mut self, line: &str) -> LineOutcome {
        if line.trim().is_empty() {
            return LineOutcome::Continue;
        }

        match Control::parse(line) {
            Some(Control::Quit) => return LineOutcome::Quit,
            Some(Control::Clear) => {
                self.conversation.reset(self.system_prompt.render());
                self.ledger.reset();
                tracing::info!(parent: self.ctx.span(), "conversation cleared");
                self.ctx.renderer().notice("Cleared");
            }
            Some(Control::Tokens) => self.ctx.renderer().usage_table(&self.ledger.summary()),
            None => {
                match self
                    .orchestrator
                    .run_turn(&self.ctx, &mut self.conversation, &mut self.ledger, line)
                    .await
                {
                    Ok(output) => self.ctx.renderer().turn(&output, self.ledger.total()),
                    Err(e) => self.ctx.renderer().error(&e.to_string()),
                }
            }
        }
        LineOutcome::Continue
    }

    /// 关闭全部工具进程；多次调用只生效一次
    pub async fn teardown(&self) -> Option<Vec<String>> {
        self.coordinator.run_cleanup().await
    }
}
