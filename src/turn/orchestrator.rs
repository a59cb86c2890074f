//! 轮次编排
//!
//! 一轮：追加用户消息 -> 调用模型（黑盒内部完成多步工具调用）-> 按序遍历新消息，重建调用批次、
//! 收集文本段、汇总用量 -> 追加最终助手回复并记账。模型调用失败时历史回滚到本轮之前。

use std::sync::Arc;

use serde::Serialize;
use tracing::Instrument;

use crate::agent::ConversationModel;
use crate::core::{AgentError, SessionContext};
use crate::ledger::{TokenCounts, UsageLedger};
use crate::llm::UsageExtractor;
use crate::memory::{Conversation, Message};
use crate::turn::{BatchTracker, CallBatch, Resolution};

/// 轮次输出中的一段，按消息隐含的相对顺序排列
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TurnSegment {
    Text { text: String },
    Batch(CallBatch),
}

/// 一轮的渲染数据
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct TurnOutput {
    pub segments: Vec<TurnSegment>,
    /// 本轮所有助手消息用量之和
    pub usage: TokenCounts,
    /// 轮次结束时仍未收齐结果的批次数（不渲染）
    pub unclosed_batches: usize,
    /// 写入历史的最终助手回复
    pub reply: String,
}

impl TurnOutput {
    pub fn batches(&self) -> impl Iterator<Item = &CallBatch> {
        self.segments.iter().filter_map(|s| match s {
            TurnSegment::Batch(b) => Some(b),
            TurnSegment::Text { .. } => None,
        })
    }
}

/// 轮次编排器：持有模型与会话启动时选定的用量抽取器
pub struct TurnOrchestrator {
    model: Arc<dyn ConversationModel>,
    usage: UsageExtractor,
}

impl TurnOrchestrator {
    pub fn new(model: Arc<dyn ConversationModel>, usage: UsageExtractor) -> Self {
        Self { model, usage }
    }

    /// 运行一轮。成功时历史多出 user 与 assistant 各一条，账本记一轮；
    /// 失败时历史与账本都保持本轮之前的状态
    pub async fn run_turn(
        &self,
        ctx: &SessionContext,
        conversation: &mut Conversation,
        ledger: &mut UsageLedger,
        input: &str,
    ) -> Result<TurnOutput, AgentError> {
        self.run_turn_inner(conversation, ledger, input)
            .instrument(ctx.span().clone())
            .await
    }

    async fn run_turn_inner(
        &self,
        conversation: &mut Conversation,
        ledger: &mut UsageLedger,
        input: &str,
    ) -> Result<TurnOutput, AgentError> {
        let checkpoint = conversation.checkpoint();
        conversation.push(Message::user(input));

        let produced = match self.model.invoke(conversation.messages()).await {
            Ok(messages) => messages,
            Err(e) => {
                conversation.rollback(checkpoint);
                tracing::warn!(error = %e, "model call failed, turn rolled back");
                return Err(e);
            }
        };

        let output = reconstruct(&produced, &self.usage);
        conversation.push(Message::assistant(output.reply.clone()));
        ledger.record(output.usage);

        tracing::info!(
            messages = produced.len(),
            batches = output.batches().count(),
            input_tokens = output.usage.input,
            output_tokens = output.usage.output,
            cached_tokens = output.usage.cached,
            "turn complete"
        );
        Ok(output)
    }
}

/// 按序遍历本轮新消息，得到渲染段、用量与最终回复
pub fn reconstruct(messages: &[Message], usage: &UsageExtractor) -> TurnOutput {
    let mut tracker = BatchTracker::new();
    let mut output = TurnOutput::default();

    for msg in messages {
        if let Some(raw) = msg.usage() {
            output.usage += usage.extract(raw);
        }
        match msg {
            Message::ToolCallBatch { calls, .. } => {
                if let Some(sequence) = tracker.open(calls) {
                    tracing::debug!(sequence, calls = calls.len(), "batch opened");
                }
            }
            Message::Text { content, .. } if !content.is_empty() => {
                output.segments.push(TurnSegment::Text {
                    text: content.clone(),
                });
            }
            Message::ToolResult {
                call_id,
                payload,
                is_error,
            } => match tracker.resolve(call_id, payload, *is_error) {
                Resolution::Closed(batch) => output.segments.push(TurnSegment::Batch(batch)),
                Resolution::Pending => {}
                Resolution::Unmatched => {
                    tracing::warn!(
                        call_id = %call_id,
                        "tool result without a pending call, ignoring"
                    )
                }
            },
            Message::Text { .. } | Message::User { .. } | Message::System { .. } => {}
        }
    }

    let unclosed = tracker.drain_unclosed();
    for batch in &unclosed {
        tracing::warn!(
            sequence = batch.sequence,
            pending = ?batch.pending_ids,
            "batch never closed, omitted from output"
        );
    }
    output.unclosed_batches = unclosed.len();
    output.reply = final_reply(messages);
    output
}

/// 最后一条助手消息的文本；没有助手消息时为空
fn final_reply(messages: &[Message]) -> String {
    messages
        .iter()
        .rev()
        .find_map(|m| match m {
            Message::Text { content, .. } => Some(content.clone()),
            Message::ToolCallBatch { content, .. } => Some(content.clone().unwrap_or_default()),
            _ => None,
        })
        .unwrap_or_default()
}
