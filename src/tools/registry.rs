//! 工具注册表
//!
//! 把多个工具进程通道合并为一个扁平的方法命名空间：按方法名找到所属通道并调用。
//! 会话启动完成后只读，运行期不再注册。

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use serde_json::{Map, Value};

use crate::core::AgentError;
use crate::memory::ToolPayload;
use crate::provider::{MethodSpec, ProviderChannel};

/// 工具注册表：方法名 -> 通道下标；catalog 保持注册顺序
#[derive(Default)]
pub struct ToolRegistry {
    channels: Vec<Arc<ProviderChannel>>,
    owners: HashMap<String, usize>,
    catalog: Vec<MethodSpec>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// 合并一个通道的方法；同名冲突时先注册者保留，冲突记日志并返回（非致命）
    pub fn register(&mut self, channel: ProviderChannel) -> Vec<AgentError> {
        let index = self.channels.len();
        let mut collisions = Vec::new();
        for method in channel.list_methods() {
            if let Some(&owner) = self.owners.get(&method.name) {
                let err = AgentError::NameCollision {
                    method: method.name.clone(),
                    kept: self.channels[owner].name().to_string(),
                    rejected: channel.name().to_string(),
                };
                tracing::warn!(error = %err, "method name collision");
                collisions.push(err);
                continue;
            }
            self.owners.insert(method.name.clone(), index);
            self.catalog.push(method);
        }
        self.channels.push(Arc::new(channel));
        collisions
    }

    /// 完整扁平目录（用于向模型公布能力与计算 system token）
    pub fn describe_all(&self) -> &[MethodSpec] {
        &self.catalog
    }

    pub fn method_names(&self) -> Vec<String> {
        self.catalog.iter().map(|m| m.name.clone()).collect()
    }

    pub fn channel_names(&self) -> Vec<String> {
        self.channels.iter().map(|c| c.name().to_string()).collect()
    }

    /// 解析所属通道并以该通道的超时调用
    pub async fn dispatch(
        &self,
        method: &str,
        args: Map<String, Value>,
    ) -> Result<ToolPayload, AgentError> {
        let channel = self
            .owners
            .get(method)
            .map(|&i| Arc::clone(&self.channels[i]))
            .ok_or_else(|| AgentError::UnknownMethod(method.to_string()))?;
        let timeout = channel.call_timeout();
        channel.invoke(method, args, timeout).await
    }

    /// 并发关闭全部通道，单个通道失败不阻塞其它通道；返回未能干净关闭的通道名
    pub async fn shutdown_all(&self, grace: Duration) -> Vec<String> {
        let stops = self.channels.iter().map(|channel| async move {
            match channel.stop(grace).await {
                Ok(()) => None,
                Err(e) => {
                    tracing::warn!(
                        provider = %channel.name(),
                        error = %e,
                        "provider did not stop cleanly"
                    );
                    Some(channel.name().to_string())
                }
            }
        });
        futures_util::future::join_all(stops)
            .await
            .into_iter()
            .flatten()
            .collect()
    }
}
