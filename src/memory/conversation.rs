//! 对话历史
//!
//! 消息是一个带标签的和类型：System / User / Text（助手纯文本）/ ToolCallBatch（助手发起的工具调用）/ ToolResult。
//! 会话内只追加；整段消息序列即会话状态。

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// 助手消息中的一次工具调用请求；id 在轮次内唯一
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ToolCallRequest {
    pub id: String,
    pub method: String,
    #[serde(default)]
    pub args: Map<String, Value>,
}

impl ToolCallRequest {
    pub fn new(id: impl Into<String>, method: impl Into<String>, args: Map<String, Value>) -> Self {
        Self {
            id: id.into(),
            method: method.into(),
            args,
        }
    }
}

/// 结构化工具结果中的单个内容项
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContentItem {
    Text(String),
    /// 非文本内容（图片、资源引用等），保留原始 JSON
    Structured(Value),
}

impl ContentItem {
    /// 该项的文本；无文本的项返回空串
    pub fn text(&self) -> &str {
        match self {
            ContentItem::Text(t) => t,
            ContentItem::Structured(v) => v.get("text").and_then(Value::as_str).unwrap_or(""),
        }
    }
}

/// 工具返回的原始载荷：纯文本或内容项列表
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolPayload {
    Text(String),
    Items(Vec<ContentItem>),
}

impl ToolPayload {
    /// 拍平为文本：内容项逐个取 text 并以换行连接
    pub fn to_text(&self) -> String {
        match self {
            ToolPayload::Text(t) => t.clone(),
            ToolPayload::Items(items) => items
                .iter()
                .map(ContentItem::text)
                .collect::<Vec<_>>()
                .join("\n"),
        }
    }
}

impl From<String> for ToolPayload {
    fn from(text: String) -> Self {
        ToolPayload::Text(text)
    }
}

impl From<&str> for ToolPayload {
    fn from(text: &str) -> Self {
        ToolPayload::Text(text.to_string())
    }
}

/// 单条消息
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Message {
    /// 固定指令，会话开始时设置一次
    System { content: String },
    User { content: String },
    /// 助手纯文本回复；usage 为后端原样返回的用量对象
    Text {
        content: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        usage: Option<Value>,
    },
    /// 助手在一步内发起的一组工具调用（可附带前置说明文字）
    ToolCallBatch {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        content: Option<String>,
        calls: Vec<ToolCallRequest>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        usage: Option<Value>,
    },
    /// 与某个调用请求按 id 关联的结果；方法名不随结果回传
    ToolResult {
        call_id: String,
        payload: ToolPayload,
        #[serde(default)]
        is_error: bool,
    },
}

impl Message {
    pub fn system(content: impl Into<String>) -> Self {
        Message::System {
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Message::User {
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Message::Text {
            content: content.into(),
            usage: None,
        }
    }

    pub fn assistant_with_usage(content: impl Into<String>, usage: Value) -> Self {
        Message::Text {
            content: content.into(),
            usage: Some(usage),
        }
    }

    pub fn tool_calls(calls: Vec<ToolCallRequest>) -> Self {
        Message::ToolCallBatch {
            content: None,
            calls,
            usage: None,
        }
    }

    pub fn tool_result(call_id: impl Into<String>, payload: impl Into<ToolPayload>) -> Self {
        Message::ToolResult {
            call_id: call_id.into(),
            payload: payload.into(),
            is_error: false,
        }
    }

    pub fn tool_error(call_id: impl Into<String>, reason: impl Into<String>) -> Self {
        Message::ToolResult {
            call_id: call_id.into(),
            payload: ToolPayload::Text(reason.into()),
            is_error: true,
        }
    }

    /// 是否由助手产生（Text 或 ToolCallBatch）
    pub fn is_assistant(&self) -> bool {
        matches!(self, Message::Text { .. } | Message::ToolCallBatch { .. })
    }

    /// 助手消息携带的原始用量对象
    pub fn usage(&self) -> Option<&Value> {
        match self {
            Message::Text { usage, .. } | Message::ToolCallBatch { usage, .. } => usage.as_ref(),
            _ => None,
        }
    }

    /// 附加用量（后端解析响应时使用）
    pub fn with_usage(mut self, value: Value) -> Self {
        if let Message::Text { usage, .. } | Message::ToolCallBatch { usage, .. } = &mut self {
            *usage = Some(value);
        }
        self
    }
}

/// 会话历史：可选的固定 system 消息 + 按序追加的对话
#[derive(Clone, Debug, Default)]
pub struct Conversation {
    messages: Vec<Message>,
}

impl Conversation {
    pub fn new(system_prompt: Option<String>) -> Self {
        Self {
            messages: system_prompt.map(Message::system).into_iter().collect(),
        }
    }

    pub fn push(&mut self, msg: Message) {
        self.messages.push(msg);
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn system_prompt(&self) -> Option<&str> {
        match self.messages.first() {
            Some(Message::System { content }) => Some(content),
            _ => None,
        }
    }

    /// 丢弃全部内容并换上新的 system 消息（代码模式下重新生成提示词）
    pub fn reset(&mut self, system_prompt: Option<String>) {
        *self = Self::new(system_prompt);
    }

    /// 当前位置，配合 rollback 使用
    pub fn checkpoint(&self) -> usize {
        self.messages.len()
    }

    /// 回滚到 checkpoint 时的状态（模型调用失败时使用）
    pub fn rollback(&mut self, checkpoint: usize) {
        self.messages.truncate(checkpoint);
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }
}
