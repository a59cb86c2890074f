//! OpenAI 兼容 API 客户端
//!
//! 通过 async_openai 调用任意 OpenAI 兼容端点（可配置 base_url）。请求与响应以 JSON 自带类型
//! （byot）收发：工具调用的参数在线上是 JSON 字符串，进出时各解析/序列化一次。

use std::time::Duration;

use async_openai::config::OpenAIConfig;
use async_openai::Client;
use async_trait::async_trait;
use serde_json::{json, Map, Value};

use crate::core::AgentError;
use crate::llm::{BackendKind, LlmClient};
use crate::memory::{Message, ToolCallRequest};
use crate::provider::MethodSpec;

/// OpenAI 兼容客户端：持有 Client 与 model 名
pub struct OpenAiClient {
    client: Client<OpenAIConfig>,
    model: String,
    timeout: Duration,
}

impl OpenAiClient {
    pub fn new(
        base_url: Option<&str>,
        model: &str,
        api_key: Option<&str>,
        timeout: Duration,
    ) -> Self {
        let api_key = api_key
            .map(String::from)
            .or_else(|| std::env::var("OPENAI_API_KEY").ok())
            .unwrap_or_default();

        let config = if let Some(url) = base_url {
            OpenAIConfig::new().with_api_base(url).with_api_key(api_key)
        } else {
            OpenAIConfig::new().with_api_key(api_key)
        };

        Self {
            client: Client::with_config(config),
            model: model.to_string(),
            timeout,
        }
    }

    async fn send(&self, body: Value) -> Result<Value, AgentError> {
        tracing::debug!(model = %self.model, "sending chat completion request");
        let chat = self.client.chat();
        let call = chat.create_byot::<Value, Value>(body);
        tokio::time::timeout(self.timeout, call)
            .await
            .map_err(|_| {
                AgentError::ModelCallFailure(format!("no response within {:?}", self.timeout))
            })?
            .map_err(|e| AgentError::ModelCallFailure(e.to_string()))
    }
}

#[async_trait]
impl LlmClient for OpenAiClient {
    fn backend(&self) -> BackendKind {
        BackendKind::OpenAi
    }

    fn model_id(&self) -> &str {
        &self.model
    }

    async fn step(
        &self,
        messages: &[Message],
        tools: &[MethodSpec],
    ) -> Result<Message, AgentError> {
        let response = self.send(to_api_request(&self.model, messages, tools)).await?;
        from_api_response(&response)
    }

    /// 发送一条 "." 的最小请求，取 prompt_tokens 减去消息本身约 2 个 token
    async fn count_catalog_tokens(
        &self,
        system_prompt: Option<&str>,
        tools: &[MethodSpec],
    ) -> Result<u64, AgentError> {
        let mut probe = Vec::new();
        if let Some(system) = system_prompt {
            probe.push(Message::system(system));
        }
        probe.push(Message::user("."));
        let mut body = to_api_request(&self.model, &probe, tools);
        body["max_tokens"] = json!(1);

        let response = self.send(body).await?;
        let prompt = response["usage"]["prompt_tokens"]
            .as_u64()
            .ok_or_else(|| AgentError::ModelCallFailure("response has no usage".into()))?;
        Ok(prompt.saturating_sub(2))
    }
}

pub(crate) fn to_api_request(model: &str, messages: &[Message], tools: &[MethodSpec]) -> Value {
    let mut body = json!({
        "model": model,
        "messages": messages.iter().map(map_message).collect::<Vec<_>>(),
    });
    if !tools.is_empty() {
        body["tools"] = Value::Array(
            tools
                .iter()
                .map(|t| {
                    json!({
                        "type": "function",
                        "function": {
                            "name": t.name,
                            "description": t.description,
                            "parameters": t.input_schema,
                        }
                    })
                })
                .collect(),
        );
    }
    body
}

fn map_message(msg: &Message) -> Value {
    match msg {
        Message::System { content } => json!({"role": "system", "content": content}),
        Message::User { content } => json!({"role": "user", "content": content}),
        Message::Text { content, .. } => json!({"role": "assistant", "content": content}),
        Message::ToolCallBatch { content, calls, .. } => json!({
            "role": "assistant",
            "content": content,
            "tool_calls": calls.iter().map(|c| json!({
                "id": c.id,
                "type": "function",
                "function": {
                    "name": c.method,
                    "arguments": Value::Object(c.args.clone()).to_string(),
                }
            })).collect::<Vec<_>>(),
        }),
        Message::ToolResult { call_id, payload, .. } => json!({
            "role": "tool",
            "tool_call_id": call_id,
            "content": payload.to_text(),
        }),
    }
}

pub(crate) fn from_api_response(body: &Value) -> Result<Message, AgentError> {
    let message = body["choices"]
        .get(0)
        .map(|c| &c["message"])
        .ok_or_else(|| AgentError::ModelCallFailure("response has no choices".into()))?;

    let content = message["content"].as_str().map(String::from);
    let calls: Vec<ToolCallRequest> = message["tool_calls"]
        .as_array()
        .map(|calls| calls.iter().map(parse_tool_call).collect())
        .unwrap_or_default();

    let usage = body.get("usage").filter(|u| u.is_object()).cloned();
    let msg = if calls.is_empty() {
        Message::Text {
            content: content.unwrap_or_default(),
            usage,
        }
    } else {
        Message::ToolCallBatch {
            content: content.filter(|c| !c.is_empty()),
            calls,
            usage,
        }
    };
    Ok(msg)
}

fn parse_tool_call(raw: &Value) -> ToolCallRequest {
    let id = raw["id"].as_str().unwrap_or_default();
    let name = raw["function"]["name"].as_str().unwrap_or_default();
    let arguments = raw["function"]["arguments"].as_str().unwrap_or("{}");
    let args = match serde_json::from_str::<Value>(arguments) {
        Ok(Value::Object(map)) => map,
        _ => {
            tracing::warn!(
                call_id = %id,
                method = %name,
                "tool call arguments are not a JSON object"
            );
            Map::new()
        }
    };
    ToolCallRequest::new(id, name, args)
}
