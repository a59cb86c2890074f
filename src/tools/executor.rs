//! 工具执行器
//!
//! 持有 ToolRegistry，execute(call) 经注册表分发（超时由所属通道施加）；
//! 失败或超时不向上抛出，而是转为该调用的工具结果文本，让模型看到错误并自行应对。
//! 每次调用输出结构化审计日志（JSON）。

use std::sync::Arc;
use std::time::Instant;

use crate::core::AgentError;
use crate::memory::{Message, ToolCallRequest, ToolPayload};
use crate::provider::MethodSpec;
use crate::tools::ToolRegistry;

/// 工具执行器：分发调用并把结果/错误统一包装为 ToolResult 消息
pub struct ToolExecutor {
    registry: Arc<ToolRegistry>,
}

impl ToolExecutor {
    pub fn new(registry: Arc<ToolRegistry>) -> Self {
        Self { registry }
    }

    /// 执行一次调用，返回与其 id 关联的 ToolResult
    pub async fn execute(&self, call: &ToolCallRequest) -> Message {
        let start = Instant::now();
        let result = self.registry.dispatch(&call.method, call.args.clone()).await;

        let outcome = outcome_label(&result);
        if let Err(e) = &result {
            if !e.is_invocation_failure() {
                tracing::warn!(
                    method = %call.method,
                    error = %e,
                    "unexpected error kind from dispatch"
                );
            }
        }
        let audit = serde_json::json!({
            "event": "tool_audit",
            "call_id": call.id,
            "method": call.method,
            "ok": result.is_ok(),
            "outcome": outcome,
            "duration_ms": start.elapsed().as_millis() as u64,
            "args_preview": args_preview(&call.args),
        });
        tracing::info!(audit = %audit.to_string(), "tool");

        match result {
            Ok(payload) => Message::ToolResult {
                call_id: call.id.clone(),
                payload,
                is_error: false,
            },
            Err(e) => Message::tool_error(call.id.clone(), format!("Error: {}", e)),
        }
    }

    pub fn catalog(&self) -> &[MethodSpec] {
        self.registry.describe_all()
    }
}

/// 审计日志中的结果分类
fn outcome_label(result: &Result<ToolPayload, AgentError>) -> &'static str {
    match result {
        Ok(_) => "ok",
        Err(AgentError::InvocationTimeout { .. }) => "timeout",
        Err(AgentError::UnknownMethod(_)) => "unknown_method",
        Err(e) if e.is_invocation_failure() => "error",
        Err(_) => "unexpected",
    }
}

fn args_preview(args: &serde_json::Map<String, serde_json::Value>) -> String {
    let s = serde_json::Value::Object(args.clone()).to_string();
    if s.chars().count() > 200 {
        format!("{}...", s.chars().take(200).collect::<String>())
    } else {
        s
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::{ProviderChannel, ToolProvider};
    use async_trait::async_trait;
    use serde_json::{json, Map, Value};
    use std::time::Duration;

    struct Sleepy;

    #[async_trait]
    impl ToolProvider for Sleepy {
        fn name(&self) -> &str {
            "sleepy"
        }

        fn methods(&self) -> Vec<MethodSpec> {
            vec![
                MethodSpec::new("nap", "", json!({"type": "object"})),
                MethodSpec::new("quick", "", json!({"type": "object"})),
            ]
        }

        async fn call(
            &self,
            method: &str,
            _args: Map<String, Value>,
        ) -> Result<ToolPayload, AgentError> {
            if method == "nap" {
                tokio::time::sleep(Duration::from_secs(5)).await;
            }
            Ok(ToolPayload::Text("awake".into()))
        }

        async fn shutdown(&self) -> Result<(), AgentError> {
            Ok(())
        }
    }

    fn executor() -> ToolExecutor {
        let mut registry = ToolRegistry::new();
        registry.register(ProviderChannel::new(Arc::new(Sleepy), Duration::from_millis(30)));
        ToolExecutor::new(Arc::new(registry))
    }

    #[tokio::test]
    async fn test_timeout_becomes_error_payload() {
        let call = ToolCallRequest::new("c1", "nap", Map::new());
        match executor().execute(&call).await {
            Message::ToolResult {
                call_id,
                payload,
                is_error,
            } => {
                assert_eq!(call_id, "c1");
                assert!(is_error);
                assert!(payload.to_text().contains("timed out"));
            }
            other => panic!("expected tool result, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_unknown_method_becomes_error_payload() {
        let call = ToolCallRequest::new("c2", "teleport", Map::new());
        let msg = executor().execute(&call).await;
        assert_eq!(
            msg,
            Message::tool_error("c2", "Error: Unknown method: teleport")
        );
    }

    #[tokio::test]
    async fn test_success_keeps_payload() {
        let call = ToolCallRequest::new("c3", "quick", Map::new());
        assert_eq!(executor().execute(&call).await, Message::tool_result("c3", "awake"));
    }

    #[test]
    fn test_outcome_labels() {
        assert_eq!(outcome_label(&Ok(ToolPayload::Text("x".into()))), "ok");
        assert_eq!(
            outcome_label(&Err(AgentError::UnknownMethod("nope".into()))),
            "unknown_method"
        );
        assert_eq!(
            outcome_label(&Err(AgentError::Invocation {
                method: "exec".into(),
                reason: "exit 1".into()
            })),
            "error"
        );
        assert_eq!(
            outcome_label(&Err(AgentError::ModelCallFailure("503".into()))),
            "unexpected"
        );
    }
}
