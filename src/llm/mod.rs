//! LLM 层：客户端抽象、后端实现（Anthropic / OpenAI 兼容 / Mock）、后端选择与用量抽取

pub mod anthropic;
pub mod backend;
pub mod mock;
pub mod openai;
pub mod traits;
pub mod usage;

pub use anthropic::AnthropicClient;
pub use backend::{create_client, resolve_backend, BackendKind};
pub use mock::{MockLlmClient, ScriptedLlmClient};
pub use openai::OpenAiClient;
pub use traits::{estimate_catalog_tokens, LlmClient, TokenEstimator};
pub use usage::{CacheField, UsageExtractor, UsageShape};
