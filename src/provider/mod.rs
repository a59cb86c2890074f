//! 工具进程通道
//!
//! 每个工具进程（ToolProvider）公布一组可调用的方法；ProviderChannel 在其外层施加
//! 「每通道同一时刻至多一个调用」的串行化、单次调用超时，以及带宽限期的关闭。

pub mod mcp;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tokio::sync::Mutex;

use crate::core::AgentError;
use crate::memory::ToolPayload;

pub use mcp::McpProvider;

/// 方法目录中的一项：名称、描述、输入/输出 JSON Schema
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MethodSpec {
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub input_schema: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_schema: Option<Value>,
}

/// 从输入 schema 推导出的单个参数
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParamSpec {
    pub name: String,
    pub kind: String,
    pub required: bool,
}

impl MethodSpec {
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        input_schema: Value,
    ) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            input_schema,
            output_schema: None,
        }
    }

    /// 参数列表：必填在前，各组内按 schema 中的属性顺序
    pub fn params(&self) -> Vec<ParamSpec> {
        let required: Vec<&str> = self
            .input_schema
            .get("required")
            .and_then(Value::as_array)
            .map(|r| r.iter().filter_map(Value::as_str).collect())
            .unwrap_or_default();
        let Some(props) = self.input_schema.get("properties").and_then(Value::as_object) else {
            return Vec::new();
        };
        let mut params: Vec<ParamSpec> = props
            .iter()
            .map(|(name, schema)| ParamSpec {
                name: name.clone(),
                kind: schema_type(schema),
                required: required.contains(&name.as_str()),
            })
            .collect();
        params.sort_by_key(|p| !p.required);
        params
    }

    /// 紧凑签名，如 `search_movies(query*: string, limit: integer)`，`*` 表示必填
    pub fn signature(&self) -> String {
        let params = self
            .params()
            .iter()
            .map(|p| {
                let marker = if p.required { "*" } else { "" };
                format!("{}{}: {}", p.name, marker, p.kind)
            })
            .collect::<Vec<_>>()
            .join(", ");
        format!("{}({})", self.name, params)
    }
}

fn schema_type(schema: &Value) -> String {
    match schema.get("type") {
        Some(Value::String(t)) if t == "array" => {
            let item = schema.get("items").map(schema_type).unwrap_or_else(|| "any".into());
            format!("{item}[]")
        }
        Some(Value::String(t)) => t.clone(),
        Some(Value::Array(ts)) => ts
            .iter()
            .filter_map(Value::as_str)
            .collect::<Vec<_>>()
            .join("|"),
        _ => match schema.get("anyOf").and_then(Value::as_array) {
            Some(variants) => variants.iter().map(schema_type).collect::<Vec<_>>().join("|"),
            None => "any".to_string(),
        },
    }
}

/// 工具进程：启动后公布方法目录并接受单个方法调用
///
/// 启动由具体类型的构造函数负责（见 [`McpProvider::start`]）。
/// `shutdown` 请求优雅退出；若调用方在宽限期后丢弃该 future，实现必须确保进程被强制终止。
#[async_trait]
pub trait ToolProvider: Send + Sync {
    fn name(&self) -> &str;

    /// 启动时获取到的方法目录
    fn methods(&self) -> Vec<MethodSpec>;

    async fn call(&self, method: &str, args: Map<String, Value>) -> Result<ToolPayload, AgentError>;

    async fn shutdown(&self) -> Result<(), AgentError>;
}

/// 单个工具进程的通道：串行化调用、施加超时、带宽限期关闭
pub struct ProviderChannel {
    provider: Arc<dyn ToolProvider>,
    gate: Mutex<()>,
    call_timeout: Duration,
}

impl ProviderChannel {
    pub fn new(provider: Arc<dyn ToolProvider>, call_timeout: Duration) -> Self {
        Self {
            provider,
            gate: Mutex::new(()),
            call_timeout,
        }
    }

    pub fn name(&self) -> &str {
        self.provider.name()
    }

    pub fn call_timeout(&self) -> Duration {
        self.call_timeout
    }

    pub fn list_methods(&self) -> Vec<MethodSpec> {
        self.provider.methods()
    }

    /// 发送一次调用；超时或失败返回错误，不自动重试
    pub async fn invoke(
        &self,
        method: &str,
        args: Map<String, Value>,
        timeout: Duration,
    ) -> Result<ToolPayload, AgentError> {
        // 排队等待通道的时间也计入超时
        let call = async {
            let _turn = self.gate.lock().await;
            self.provider.call(method, args).await
        };
        match tokio::time::timeout(timeout, call).await {
            Ok(result) => result,
            Err(_) => Err(AgentError::InvocationTimeout {
                method: method.to_string(),
                timeout,
            }),
        }
    }

    /// 请求优雅关闭；超过宽限期则丢弃关闭过程（实现据此强制终止进程）
    pub async fn stop(&self, grace: Duration) -> Result<(), AgentError> {
        match tokio::time::timeout(grace, self.provider.shutdown()).await {
            Ok(result) => result,
            Err(_) => Err(AgentError::ProviderStop {
                provider: self.name().to_string(),
                reason: format!("no exit within {grace:?}, terminated"),
            }),
        }
    }
}
