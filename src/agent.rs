//! 工具调用 Agent
//!
//! 对编排层而言模型是一个黑盒：给定完整历史，返回本轮新产生的消息序列（助手文本、工具调用、
//! 工具结果交错）。ToolCallingAgent 在内部反复调用 LlmClient：每步若请求工具调用，则并发执行
//! 这一批调用并按完成顺序追加结果，再进入下一步；纯文本回复或达到步数上限时结束。

use std::sync::Arc;

use async_trait::async_trait;
use futures_util::stream::{FuturesUnordered, StreamExt};

use crate::core::AgentError;
use crate::llm::LlmClient;
use crate::memory::Message;
use crate::tools::ToolExecutor;

/// 模型边界
#[async_trait]
pub trait ConversationModel: Send + Sync {
    /// 返回新消息（不含传入的历史）；模型调用失败时整体失败
    async fn invoke(&self, history: &[Message]) -> Result<Vec<Message>, AgentError>;
}

/// LlmClient + ToolExecutor 组成的多步工具调用循环
pub struct ToolCallingAgent {
    llm: Arc<dyn LlmClient>,
    executor: Arc<ToolExecutor>,
    max_steps: usize,
}

impl ToolCallingAgent {
    pub fn new(llm: Arc<dyn LlmClient>, executor: Arc<ToolExecutor>, max_steps: usize) -> Self {
        Self {
            llm,
            executor,
            max_steps: max_steps.max(1),
        }
    }
}

#[async_trait]
impl ConversationModel for ToolCallingAgent {
    async fn invoke(&self, history: &[Message]) -> Result<Vec<Message>, AgentError> {
        let catalog = self.executor.catalog();
        let mut working = history.to_vec();
        let mut produced = Vec::new();

        for step in 0..self.max_steps {
            let reply = self.llm.step(&working, catalog).await?;
            let calls = match &reply {
                Message::ToolCallBatch { calls, .. } => calls.clone(),
                _ => Vec::new(),
            };
            tracing::debug!(step, calls = calls.len(), "model step");
            working.push(reply.clone());
            produced.push(reply);

            if calls.is_empty() {
                return Ok(produced);
            }

            let mut pending: FuturesUnordered<_> =
                calls.iter().map(|call| self.executor.execute(call)).collect();
            while let Some(result) = pending.next().await {
                working.push(result.clone());
                produced.push(result);
            }
        }

        tracing::warn!(
            max_steps = self.max_steps,
            "step limit reached, ending turn without final text"
        );
        Ok(produced)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::{BackendKind, ScriptedLlmClient};
    use crate::memory::{ToolCallRequest, ToolPayload};
    use crate::provider::{MethodSpec, ProviderChannel, ToolProvider};
    use crate::tools::ToolRegistry;
    use serde_json::{json, Map, Value};
    use std::time::Duration;

    /// "slow" 比 "fast" 晚返回，用于验证结果按完成顺序追加
    struct Timed;

    #[async_trait]
    impl ToolProvider for Timed {
        fn name(&self) -> &str {
            "timed"
        }

        fn methods(&self) -> Vec<MethodSpec> {
            vec![MethodSpec::new("wait", "", json!({"type": "object"}))]
        }

        async fn call(
            &self,
            _method: &str,
            args: Map<String, Value>,
        ) -> Result<ToolPayload, AgentError> {
            let ms = args.get("ms").and_then(Value::as_u64).unwrap_or(0);
            tokio::time::sleep(Duration::from_millis(ms)).await;
            Ok(ToolPayload::Text(format!("waited {ms}")))
        }

        async fn shutdown(&self) -> Result<(), AgentError> {
            Ok(())
        }
    }

    fn executor_with(providers: Vec<Arc<dyn ToolProvider>>) -> Arc<ToolExecutor> {
        let mut registry = ToolRegistry::new();
        for p in providers {
            registry.register(ProviderChannel::new(p, Duration::from_secs(2)));
        }
        Arc::new(ToolExecutor::new(Arc::new(registry)))
    }

    fn wait_call(id: &str, ms: u64) -> ToolCallRequest {
        let mut args = Map::new();
        args.insert("ms".into(), json!(ms));
        ToolCallRequest::new(id, "wait", args)
    }

    #[tokio::test]
    async fn test_text_only_reply_is_single_step() {
        let llm = Arc::new(ScriptedLlmClient::new(
            BackendKind::Mock,
            vec![Ok(Message::assistant("hi"))],
        ));
        let agent = ToolCallingAgent::new(llm.clone(), executor_with(vec![]), 5);
        let out = agent.invoke(&[Message::user("hello")]).await.unwrap();
        assert_eq!(out, vec![Message::assistant("hi")]);
        assert_eq!(llm.history_lengths(), vec![1]);
    }

    #[tokio::test]
    async fn test_tool_results_follow_their_batch() {
        let llm = Arc::new(ScriptedLlmClient::new(
            BackendKind::Mock,
            vec![
                Ok(Message::tool_calls(vec![wait_call("x", 5)])),
                Ok(Message::assistant("done")),
            ],
        ));
        let agent = ToolCallingAgent::new(llm.clone(), executor_with(vec![Arc::new(Timed)]), 5);
        let out = agent.invoke(&[Message::user("go")]).await.unwrap();

        assert_eq!(out.len(), 3);
        assert_eq!(out[1], Message::tool_result("x", "waited 5"));
        assert_eq!(out[2], Message::assistant("done"));
        // 第二步看到：user + 调用 + 结果
        assert_eq!(llm.history_lengths(), vec![1, 3]);
    }

    #[tokio::test]
    async fn test_step_limit_stops_loop() {
        let llm = Arc::new(ScriptedLlmClient::new(
            BackendKind::Mock,
            vec![
                Ok(Message::tool_calls(vec![wait_call("a", 0)])),
                Ok(Message::tool_calls(vec![wait_call("b", 0)])),
                Ok(Message::assistant("never reached")),
            ],
        ));
        let agent = ToolCallingAgent::new(llm.clone(), executor_with(vec![Arc::new(Timed)]), 2);
        let out = agent.invoke(&[Message::user("loop")]).await.unwrap();
        assert_eq!(out.len(), 4);
        assert_eq!(llm.remaining(), 1);
    }

    #[tokio::test]
    async fn test_model_failure_propagates() {
        let llm = Arc::new(ScriptedLlmClient::new(
            BackendKind::Mock,
            vec![Err(AgentError::ModelCallFailure("HTTP 529: overloaded".into()))],
        ));
        let agent = ToolCallingAgent::new(llm, executor_with(vec![]), 3);
        let err = agent.invoke(&[Message::user("x")]).await.unwrap_err();
        assert!(matches!(err, AgentError::ModelCallFailure(_)));
    }
}
