//! Mock LLM 客户端（用于测试，无需 API）
//!
//! MockLlmClient 回显最后一条 User 消息，便于离线跑通会话；ScriptedLlmClient 按预设脚本
//! 逐步返回消息，供编排流程的测试使用。

use std::collections::VecDeque;
use std::sync::Mutex;

use async_trait::async_trait;
use serde_json::json;

use crate::core::AgentError;
use crate::llm::{BackendKind, LlmClient, TokenEstimator};
use crate::memory::Message;
use crate::provider::MethodSpec;

/// Mock 客户端：回显用户最后一条消息，附估算用量
#[derive(Debug, Default)]
pub struct MockLlmClient;

#[async_trait]
impl LlmClient for MockLlmClient {
    fn backend(&self) -> BackendKind {
        BackendKind::Mock
    }

    fn model_id(&self) -> &str {
        BackendKind::Mock.default_model()
    }

    async fn step(
        &self,
        messages: &[Message],
        _tools: &[MethodSpec],
    ) -> Result<Message, AgentError> {
        let last_user = messages
            .iter()
            .rev()
            .find_map(|m| match m {
                Message::User { content } => Some(content.as_str()),
                _ => None,
            })
            .unwrap_or("(no input)");

        let reply = format!("Echo from Mock: {last_user}");
        let input: u64 = messages
            .iter()
            .map(|m| match m {
                Message::System { content }
                | Message::User { content }
                | Message::Text { content, .. } => TokenEstimator::estimate(content),
                _ => 0,
            })
            .sum();
        let usage = json!({
            "input_tokens": input,
            "output_tokens": TokenEstimator::estimate(&reply),
        });
        Ok(Message::assistant_with_usage(reply, usage))
    }
}

/// 脚本客户端：每步弹出一条预设结果；记录每步收到的历史长度
pub struct ScriptedLlmClient {
    backend: BackendKind,
    script: Mutex<VecDeque<Result<Message, AgentError>>>,
    seen: Mutex<Vec<usize>>,
}

impl ScriptedLlmClient {
    pub fn new(backend: BackendKind, steps: Vec<Result<Message, AgentError>>) -> Self {
        Self {
            backend,
            script: Mutex::new(steps.into()),
            seen: Mutex::new(Vec::new()),
        }
    }

    /// 每步调用时历史的消息条数
    pub fn history_lengths(&self) -> Vec<usize> {
        self.seen.lock().map(|s| s.clone()).unwrap_or_default()
    }

    pub fn remaining(&self) -> usize {
        self.script.lock().map(|s| s.len()).unwrap_or_default()
    }
}

#[async_trait]
impl LlmClient for ScriptedLlmClient {
    fn backend(&self) -> BackendKind {
        self.backend
    }

    fn model_id(&self) -> &str {
        "scripted"
    }

    async fn step(
        &self,
        messages: &[Message],
        _tools: &[MethodSpec],
    ) -> Result<Message, AgentError> {
        if let Ok(mut seen) = self.seen.lock() {
            seen.push(messages.len());
        }
        self.script
            .lock()
            .map_err(|_| AgentError::ModelCallFailure("script lock poisoned".into()))?
            .pop_front()
            .unwrap_or_else(|| Err(AgentError::ModelCallFailure("script exhausted".into())))
    }
}
