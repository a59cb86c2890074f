//! 调用批次重建
//!
//! 同一条助手消息中发起的调用组成一个批次（多于一个即为并行批次）。结果按 id 回填，批次的
//! 全部调用都有结果时关闭；关闭顺序取决于最后一个结果在消息序列中的位置，与请求顺序无关。

use std::collections::{BTreeMap, HashMap, HashSet};

use serde::Serialize;
use serde_json::{Map, Value};

use crate::memory::{ToolCallRequest, ToolPayload};

/// 渲染用输出的长度上限（按字符计）
pub const DISPLAY_LIMIT: usize = 500;
pub const CONTINUATION_MARKER: &str = "...";

/// 超过 DISPLAY_LIMIT 的文本截断为前 DISPLAY_LIMIT 个字符并加续接标记
pub fn truncate_for_display(text: &str) -> String {
    match text.char_indices().nth(DISPLAY_LIMIT) {
        Some((cut, _)) => format!("{}{}", &text[..cut], CONTINUATION_MARKER),
        None => text.to_string(),
    }
}

/// 已有结果的一次调用（渲染用）
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CompletedCall {
    pub id: String,
    pub method: String,
    pub args: Map<String, Value>,
    /// 截断后的结果文本
    pub output: String,
    pub is_error: bool,
}

/// 一个已关闭的批次；calls 保持请求顺序
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CallBatch {
    /// 本轮内从 1 开始的批次序号
    pub sequence: usize,
    pub parallel: bool,
    pub calls: Vec<CompletedCall>,
}

/// 回填一个结果的结果
#[derive(Debug, Clone, PartialEq)]
pub enum Resolution {
    /// 批次仍有未到的结果
    Pending,
    Closed(CallBatch),
    /// id 不在待决表中（未知或已消费）
    Unmatched,
}

/// 结束时仍未关闭的批次
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnclosedBatch {
    pub sequence: usize,
    pub pending_ids: Vec<String>,
}

struct OpenBatch {
    calls: Vec<ToolCallRequest>,
    outputs: HashMap<String, (String, bool)>,
    open: HashSet<String>,
}

/// 轮次内的待决调用表
#[derive(Default)]
pub struct BatchTracker {
    opened: usize,
    batches: BTreeMap<usize, OpenBatch>,
    /// 调用 id -> 批次序号
    pending: HashMap<String, usize>,
}

impl BatchTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// 为一条助手消息的调用开启批次并返回序号。
    /// 已在待决表中的 id（或同一消息中的重复 id）被丢弃；全部被丢弃时不开启批次
    pub fn open(&mut self, calls: &[ToolCallRequest]) -> Option<usize> {
        let mut accepted: Vec<ToolCallRequest> = Vec::with_capacity(calls.len());
        for call in calls {
            if self.pending.contains_key(&call.id) || accepted.iter().any(|c| c.id == call.id) {
                tracing::warn!(
                    call_id = %call.id,
                    method = %call.method,
                    "duplicate call id, ignoring"
                );
                continue;
            }
            accepted.push(call.clone());
        }
        if accepted.is_empty() {
            return None;
        }

        self.opened += 1;
        let sequence = self.opened;
        for call in &accepted {
            self.pending.insert(call.id.clone(), sequence);
        }
        self.batches.insert(
            sequence,
            OpenBatch {
                open: accepted.iter().map(|c| c.id.clone()).collect(),
                calls: accepted,
                outputs: HashMap::new(),
            },
        );
        Some(sequence)
    }

    /// 按 id 回填结果；批次因此关闭时返回该批次
    pub fn resolve(&mut self, call_id: &str, payload: &ToolPayload, is_error: bool) -> Resolution {
        let Some(sequence) = self.pending.remove(call_id) else {
            return Resolution::Unmatched;
        };
        let Some(batch) = self.batches.get_mut(&sequence) else {
            return Resolution::Unmatched;
        };

        batch.open.remove(call_id);
        batch
            .outputs
            .insert(call_id.to_string(), (truncate_for_display(&payload.to_text()), is_error));
        if !batch.open.is_empty() {
            return Resolution::Pending;
        }

        let Some(mut batch) = self.batches.remove(&sequence) else {
            return Resolution::Unmatched;
        };
        let parallel = batch.calls.len() > 1;
        let calls = batch
            .calls
            .into_iter()
            .map(|call| {
                let (output, is_error) = batch.outputs.remove(&call.id).unwrap_or_default();
                CompletedCall {
                    id: call.id,
                    method: call.method,
                    args: call.args,
                    output,
                    is_error,
                }
            })
            .collect();
        Resolution::Closed(CallBatch {
            sequence,
            parallel,
            calls,
        })
    }

    pub fn open_count(&self) -> usize {
        self.batches.len()
    }

    /// 取出仍未关闭的批次（按序号），待决 id 保持请求顺序
    pub fn drain_unclosed(&mut self) -> Vec<UnclosedBatch> {
        self.pending.clear();
        std::mem::take(&mut self.batches)
            .into_iter()
            .map(|(sequence, batch)| UnclosedBatch {
                sequence,
                pending_ids: batch
                    .calls
                    .iter()
                    .filter(|c| batch.open.contains(&c.id))
                    .map(|c| c.id.clone())
                    .collect(),
            })
            .collect()
    }
}
