//! MCP 工具进程（stdio 传输）
//!
//! 通过 rmcp 启动子进程并完成握手，在启动窗口内拉取方法目录；调用经 `tools/call` 发送。
//! 子进程以 kill_on_drop 启动：关闭超过宽限期时，丢弃 RunningService 即强制终止进程。

use std::borrow::Cow;
use std::time::Duration;

use async_trait::async_trait;
use rmcp::model::{CallToolRequestParams, CallToolResult, RawContent, Tool as McpTool};
use rmcp::service::{Peer, RoleClient, RunningService};
use rmcp::transport::TokioChildProcess;
use rmcp::ServiceExt;
use serde_json::{Map, Value};
use tokio::process::Command;
use tokio::sync::Mutex;

use crate::config::ProviderEntry;
use crate::core::AgentError;
use crate::memory::{ContentItem, ToolPayload};
use crate::provider::{MethodSpec, ToolProvider};

/// 一个已启动的 MCP 工具进程
pub struct McpProvider {
    name: String,
    peer: Peer<RoleClient>,
    /// 关闭时取出并消费；None 表示已关闭
    service: Mutex<Option<RunningService<RoleClient, ()>>>,
    methods: Vec<MethodSpec>,
}

impl McpProvider {
    /// 启动进程并等待其公布方法目录；超过 startup_timeout 视为不可用
    pub async fn start(
        name: &str,
        entry: &ProviderEntry,
        startup_timeout: Duration,
    ) -> Result<Self, AgentError> {
        let unavailable = |reason: String| AgentError::ProviderUnavailable {
            provider: name.to_string(),
            reason,
        };

        let mut cmd = Command::new(&entry.command);
        cmd.args(&entry.args).envs(&entry.env).kill_on_drop(true);

        let transport = TokioChildProcess::new(cmd)
            .map_err(|e| unavailable(format!("failed to launch '{}': {}", entry.command, e)))?;

        let handshake = async {
            let service = ()
                .serve(transport)
                .await
                .map_err(|e| unavailable(format!("handshake failed: {e}")))?;
            let tools = service
                .peer()
                .list_all_tools()
                .await
                .map_err(|e| unavailable(format!("tools/list failed: {e}")))?;
            Ok::<_, AgentError>((service, tools))
        };

        let (service, tools) = tokio::time::timeout(startup_timeout, handshake)
            .await
            .map_err(|_| unavailable(format!("no method catalog within {startup_timeout:?}")))??;

        let methods: Vec<MethodSpec> = tools.into_iter().map(method_from_mcp).collect();
        tracing::info!(provider = %name, methods = methods.len(), "provider ready");

        Ok(Self {
            name: name.to_string(),
            peer: service.peer().clone(),
            service: Mutex::new(Some(service)),
            methods,
        })
    }
}

#[async_trait]
impl ToolProvider for McpProvider {
    fn name(&self) -> &str {
        &self.name
    }

    fn methods(&self) -> Vec<MethodSpec> {
        self.methods.clone()
    }

    async fn call(
        &self,
        method: &str,
        args: Map<String, Value>,
    ) -> Result<ToolPayload, AgentError> {
        let params = CallToolRequestParams {
            meta: None,
            name: Cow::Owned(method.to_string()),
            arguments: Some(args),
            task: None,
        };
        let result = self
            .peer
            .call_tool(params)
            .await
            .map_err(|e| AgentError::Invocation {
                method: method.to_string(),
                reason: e.to_string(),
            })?;
        payload_from_result(result).map_err(|reason| AgentError::Invocation {
            method: method.to_string(),
            reason,
        })
    }

    async fn shutdown(&self) -> Result<(), AgentError> {
        let Some(service) = self.service.lock().await.take() else {
            return Ok(());
        };
        let reason = service.cancel().await.map_err(|e| AgentError::ProviderStop {
            provider: self.name.clone(),
            reason: e.to_string(),
        })?;
        tracing::debug!(provider = %self.name, ?reason, "provider stopped");
        Ok(())
    }
}

fn method_from_mcp(tool: McpTool) -> MethodSpec {
    MethodSpec {
        name: tool.name.into_owned(),
        description: tool.description.map(|d| d.into_owned()).unwrap_or_default(),
        input_schema: Value::Object(tool.input_schema.as_ref().clone()),
        output_schema: tool.output_schema.map(|s| Value::Object(s.as_ref().clone())),
    }
}

/// 将 tools/call 结果转为载荷；is_error 时返回错误文本
fn payload_from_result(result: CallToolResult) -> Result<ToolPayload, String> {
    let items: Vec<ContentItem> = result
        .content
        .into_iter()
        .map(|c| match c.raw {
            RawContent::Text(t) => ContentItem::Text(t.text),
            other => ContentItem::Structured(serde_json::to_value(&other).unwrap_or(Value::Null)),
        })
        .collect();

    if result.is_error == Some(true) {
        return Err(ToolPayload::Items(items).to_text());
    }

    match items.as_slice() {
        [] => Ok(ToolPayload::Text(
            result
                .structured_content
                .map(|v| v.to_string())
                .unwrap_or_default(),
        )),
        [ContentItem::Text(text)] => Ok(ToolPayload::Text(text.clone())),
        _ => Ok(ToolPayload::Items(items)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rmcp::model::Content;
    use serde_json::json;
    use std::sync::Arc;

    #[test]
    fn test_method_from_mcp() {
        let schema = json!({
            "type": "object",
            "properties": {"command": {"type": "string"}},
            "required": ["command"]
        });
        let tool = McpTool {
            name: Cow::Borrowed("exec"),
            title: None,
            description: Some(Cow::Borrowed("Execute a bash command")),
            input_schema: Arc::new(schema.as_object().unwrap().clone()),
            output_schema: None,
            annotations: None,
            execution: None,
            icons: None,
            meta: None,
        };
        let spec = method_from_mcp(tool);
        assert_eq!(spec.name, "exec");
        assert_eq!(spec.description, "Execute a bash command");
        assert_eq!(spec.signature(), "exec(command*: string)");
    }

    #[test]
    fn test_single_text_result_is_plain_text() {
        let result = CallToolResult::success(vec![Content::text("total 0")]);
        assert_eq!(
            payload_from_result(result).unwrap(),
            ToolPayload::Text("total 0".into())
        );
    }

    #[test]
    fn test_multi_item_result_keeps_items() {
        let result = CallToolResult::success(vec![Content::text("a"), Content::text("b")]);
        let payload = payload_from_result(result).unwrap();
        assert_eq!(payload.to_text(), "a\nb");
        assert!(matches!(payload, ToolPayload::Items(ref items) if items.len() == 2));
    }

    #[test]
    fn test_error_result_becomes_err() {
        let result = CallToolResult::error(vec![Content::text("no such movie")]);
        assert_eq!(payload_from_result(result).unwrap_err(), "no such movie");
    }

    #[tokio::test]
    async fn test_start_missing_binary_is_unavailable() {
        let entry = ProviderEntry {
            command: "/nonexistent/switchboard-provider".into(),
            ..Default::default()
        };
        let err = McpProvider::start("ghost", &entry, Duration::from_secs(2))
            .await
            .err()
            .unwrap();
        assert!(matches!(
            err,
            AgentError::ProviderUnavailable { ref provider, .. } if provider == "ghost"
        ));
    }
}
