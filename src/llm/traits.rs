//! LLM 客户端抽象
//!
//! 所有后端（Anthropic / OpenAI 兼容 / Mock）实现 LlmClient：给定历史与方法目录执行一步，
//! 返回一条助手消息（纯文本或一批工具调用），原始用量对象附在消息上。

use async_trait::async_trait;

use crate::core::AgentError;
use crate::llm::BackendKind;
use crate::memory::Message;
use crate::provider::MethodSpec;

/// LLM 客户端 trait
#[async_trait]
pub trait LlmClient: Send + Sync {
    fn backend(&self) -> BackendKind;

    fn model_id(&self) -> &str;

    /// 执行一步；tools 为空时不向后端公布任何方法
    async fn step(&self, messages: &[Message], tools: &[MethodSpec]) -> Result<Message, AgentError>;

    /// 方法目录（连同 system prompt）每次请求的固定 token 开销。
    /// 默认按字符估算，后端可覆盖为精确计数
    async fn count_catalog_tokens(
        &self,
        system_prompt: Option<&str>,
        tools: &[MethodSpec],
    ) -> Result<u64, AgentError> {
        Ok(estimate_catalog_tokens(system_prompt, tools))
    }
}

/// Token 估算器（简单的字符计数近似）
pub struct TokenEstimator;

impl TokenEstimator {
    /// 英文约 4 字符/token，中文约 1.5 字符/token；非空文本至少 1
    pub fn estimate(text: &str) -> u64 {
        if text.is_empty() {
            return 0;
        }
        let (ascii, non_ascii) = text.chars().fold((0u64, 0u64), |(a, n), c| {
            if c.is_ascii() {
                (a + 1, n)
            } else {
                (a, n + 1)
            }
        });
        let tokens = ascii / 4 + (non_ascii as f64 / 1.5).ceil() as u64;
        tokens.max(1)
    }
}

/// 目录开销估算：system prompt 与序列化后的方法目录
pub fn estimate_catalog_tokens(system_prompt: Option<&str>, tools: &[MethodSpec]) -> u64 {
    let catalog = if tools.is_empty() {
        String::new()
    } else {
        serde_json::to_string(tools).unwrap_or_default()
    };
    TokenEstimator::estimate(system_prompt.unwrap_or_default()) + TokenEstimator::estimate(&catalog)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_estimate() {
        assert_eq!(TokenEstimator::estimate(""), 0);
        assert_eq!(TokenEstimator::estimate("ab"), 1);
        assert_eq!(TokenEstimator::estimate("abcdefgh"), 2);
        assert_eq!(TokenEstimator::estimate("你好吗"), 2);
    }

    #[test]
    fn test_catalog_estimate_grows_with_tools() {
        let empty = estimate_catalog_tokens(Some("be brief"), &[]);
        let tools = vec![MethodSpec::new(
            "exec",
            "Execute a bash command",
            json!({"type": "object", "properties": {"command": {"type": "string"}}}),
        )];
        assert!(estimate_catalog_tokens(Some("be brief"), &tools) > empty);
        assert_eq!(estimate_catalog_tokens(None, &[]), 0);
    }
}
