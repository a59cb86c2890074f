//! Anthropic Messages API 客户端
//!
//! 直接以 reqwest 调用 /v1/messages；工具调用以 tool_use 块返回，工具结果以 tool_result 块
//! 回传（连续的多个结果合并进同一条 user 消息）。

use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Map, Value};

use crate::core::AgentError;
use crate::llm::{BackendKind, LlmClient};
use crate::memory::{Message, ToolCallRequest};
use crate::provider::MethodSpec;

pub const ANTHROPIC_BASE_URL: &str = "https://api.anthropic.com";
pub const ANTHROPIC_VERSION: &str = "2023-06-01";
const MAX_TOKENS: u32 = 4096;

/// Anthropic 客户端
pub struct AnthropicClient {
    api_key: String,
    model: String,
    base_url: String,
    http: reqwest::Client,
}

impl AnthropicClient {
    pub fn new(
        api_key: impl Into<String>,
        model: &str,
        timeout: Duration,
    ) -> Result<Self, AgentError> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| AgentError::Config(format!("http client: {e}")))?;
        Ok(Self {
            api_key: api_key.into(),
            model: model.to_string(),
            base_url: ANTHROPIC_BASE_URL.to_string(),
            http,
        })
    }

    /// 覆盖 API 地址（代理或本地测试服务）；None 保持默认
    pub fn with_base_url(mut self, url: Option<&str>) -> Self {
        if let Some(url) = url {
            self.base_url = url.trim_end_matches('/').to_string();
        }
        self
    }

    fn messages_url(&self) -> String {
        format!("{}/v1/messages", self.base_url)
    }

    fn count_tokens_url(&self) -> String {
        format!("{}/v1/messages/count_tokens", self.base_url)
    }

    async fn post(&self, url: &str, body: &Value) -> Result<Value, AgentError> {
        tracing::debug!(url = %url, model = %self.model, "sending anthropic request");
        let response = self
            .http
            .post(url)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .header("content-type", "application/json")
            .json(body)
            .send()
            .await
            .map_err(|e| AgentError::ModelCallFailure(e.to_string()))?;

        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| AgentError::ModelCallFailure(e.to_string()))?;
        if !status.is_success() {
            return Err(AgentError::ModelCallFailure(format!(
                "HTTP {}: {}",
                status.as_u16(),
                error_message(&text)
            )));
        }
        serde_json::from_str(&text)
            .map_err(|e| AgentError::ModelCallFailure(format!("invalid JSON response: {e}")))
    }
}

#[async_trait]
impl LlmClient for AnthropicClient {
    fn backend(&self) -> BackendKind {
        BackendKind::Anthropic
    }

    fn model_id(&self) -> &str {
        &self.model
    }

    async fn step(
        &self,
        messages: &[Message],
        tools: &[MethodSpec],
    ) -> Result<Message, AgentError> {
        let body = to_api_request(&self.model, messages, tools);
        let response = self.post(&self.messages_url(), &body).await?;
        from_api_response(&response)
    }

    /// count_tokens 端点，附一条单字符 user 消息，减去其 1 个 token
    async fn count_catalog_tokens(
        &self,
        system_prompt: Option<&str>,
        tools: &[MethodSpec],
    ) -> Result<u64, AgentError> {
        let mut body = json!({
            "model": self.model,
            "messages": [{"role": "user", "content": "."}],
        });
        if let Some(system) = system_prompt {
            body["system"] = Value::String(system.to_string());
        }
        if !tools.is_empty() {
            body["tools"] = map_tools(tools);
        }
        let response = self.post(&self.count_tokens_url(), &body).await?;
        let input = response
            .get("input_tokens")
            .and_then(Value::as_u64)
            .ok_or_else(|| {
                AgentError::ModelCallFailure("count_tokens: missing input_tokens".into())
            })?;
        Ok(input.saturating_sub(1))
    }
}

/// 历史 -> 请求体；System 消息合并进顶层 system 字段
pub(crate) fn to_api_request(model: &str, messages: &[Message], tools: &[MethodSpec]) -> Value {
    let system: Vec<&str> = messages
        .iter()
        .filter_map(|m| match m {
            Message::System { content } => Some(content.as_str()),
            _ => None,
        })
        .collect();

    let mut body = json!({
        "model": model,
        "max_tokens": MAX_TOKENS,
        "messages": map_messages(messages),
    });
    if !system.is_empty() {
        body["system"] = Value::String(system.join("\n\n"));
    }
    if !tools.is_empty() {
        body["tools"] = map_tools(tools);
    }
    body
}

fn map_tools(tools: &[MethodSpec]) -> Value {
    Value::Array(
        tools
            .iter()
            .map(|t| {
                json!({
                    "name": t.name,
                    "description": t.description,
                    "input_schema": t.input_schema,
                })
            })
            .collect(),
    )
}

fn map_messages(messages: &[Message]) -> Value {
    let mut out: Vec<Value> = Vec::new();
    for msg in messages {
        match msg {
            Message::System { .. } => {}
            Message::User { content } => out.push(json!({"role": "user", "content": content})),
            // 空文本会被 API 拒绝
            Message::Text { content, .. } if content.is_empty() => {}
            Message::Text { content, .. } => {
                out.push(json!({"role": "assistant", "content": content}))
            }
            Message::ToolCallBatch { content, calls, .. } => {
                let mut blocks: Vec<Value> = Vec::new();
                if let Some(text) = content.as_deref().filter(|t| !t.is_empty()) {
                    blocks.push(json!({"type": "text", "text": text}));
                }
                blocks.extend(calls.iter().map(|c| {
                    json!({
                        "type": "tool_use",
                        "id": c.id,
                        "name": c.method,
                        "input": Value::Object(c.args.clone()),
                    })
                }));
                out.push(json!({"role": "assistant", "content": blocks}));
            }
            Message::ToolResult {
                call_id,
                payload,
                is_error,
            } => {
                let block = json!({
                    "type": "tool_result",
                    "tool_use_id": call_id,
                    "content": payload.to_text(),
                    "is_error": is_error,
                });
                match out.last_mut() {
                    Some(prev) if is_tool_result_turn(prev) => {
                        if let Some(blocks) = prev["content"].as_array_mut() {
                            blocks.push(block);
                        }
                    }
                    _ => out.push(json!({"role": "user", "content": [block]})),
                }
            }
        }
    }
    Value::Array(out)
}

fn is_tool_result_turn(msg: &Value) -> bool {
    msg["role"] == "user"
        && msg["content"]
            .as_array()
            .is_some_and(|blocks| blocks.iter().all(|b| b["type"] == "tool_result"))
}

/// 响应体 -> 助手消息；含 tool_use 块时为 ToolCallBatch
pub(crate) fn from_api_response(body: &Value) -> Result<Message, AgentError> {
    let blocks = body
        .get("content")
        .and_then(Value::as_array)
        .ok_or_else(|| AgentError::ModelCallFailure("response has no content array".into()))?;

    let mut text = String::new();
    let mut calls = Vec::new();
    for block in blocks {
        match block.get("type").and_then(Value::as_str) {
            Some("text") => {
                text.push_str(block.get("text").and_then(Value::as_str).unwrap_or_default())
            }
            Some("tool_use") => {
                let args = match block.get("input") {
                    Some(Value::Object(map)) => map.clone(),
                    _ => Map::new(),
                };
                calls.push(ToolCallRequest::new(
                    block.get("id").and_then(Value::as_str).unwrap_or_default(),
                    block.get("name").and_then(Value::as_str).unwrap_or_default(),
                    args,
                ));
            }
            other => tracing::debug!(block_type = ?other, "ignoring content block"),
        }
    }

    let usage = body.get("usage").filter(|u| u.is_object()).cloned();
    let msg = if calls.is_empty() {
        Message::Text { content: text, usage }
    } else {
        Message::ToolCallBatch {
            content: (!text.is_empty()).then_some(text),
            calls,
            usage,
        }
    };
    Ok(msg)
}

/// 错误响应体中的 error.message，取不到时原样返回
fn error_message(body: &str) -> String {
    serde_json::from_str::<Value>(body)
        .ok()
        .and_then(|v| v["error"]["message"].as_str().map(String::from))
        .unwrap_or_else(|| body.to_string())
}
