//! 用量字段抽取
//!
//! 各后端返回的用量对象字段名不同：OpenAI 为 prompt_tokens/completion_tokens，缓存命中在
//! prompt_tokens_details.cached_tokens；Anthropic 为 input_tokens/output_tokens，缓存读写
//! (cache_read_input_tokens / cache_creation_input_tokens) 不含在 input_tokens 中，需要加回。
//! 形状表按后端登记，启动时选定一次。

use serde_json::Value;

use crate::ledger::TokenCounts;
use crate::llm::BackendKind;

/// 缓存命中计数所在位置
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheField {
    /// 顶层字段
    Flat(&'static str),
    /// 嵌套对象中的字段
    Nested {
        parent: &'static str,
        field: &'static str,
    },
}

impl CacheField {
    fn read(&self, usage: &Value) -> Option<u64> {
        match self {
            CacheField::Flat(key) => usage.get(key)?.as_u64(),
            CacheField::Nested { parent, field } => usage.get(parent)?.get(field)?.as_u64(),
        }
    }
}

/// 一种用量对象的字段布局
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UsageShape {
    pub input: &'static str,
    /// 单独上报、但应计入输入的字段
    pub extra_input: &'static [&'static str],
    pub output: &'static str,
    /// 所有存在的位置求和
    pub cache: &'static [CacheField],
}

const OPENAI_SHAPE: UsageShape = UsageShape {
    input: "prompt_tokens",
    extra_input: &[],
    output: "completion_tokens",
    cache: &[CacheField::Nested {
        parent: "prompt_tokens_details",
        field: "cached_tokens",
    }],
};

const ANTHROPIC_SHAPE: UsageShape = UsageShape {
    input: "input_tokens",
    extra_input: &["cache_read_input_tokens", "cache_creation_input_tokens"],
    output: "output_tokens",
    cache: &[CacheField::Flat("cache_read_input_tokens")],
};

/// 归一化布局：两种缓存位置都检查
const NORMALIZED_SHAPE: UsageShape = UsageShape {
    input: "input_tokens",
    extra_input: &[],
    output: "output_tokens",
    cache: &[
        CacheField::Nested {
            parent: "input_token_details",
            field: "cache_read",
        },
        CacheField::Flat("cache_read_input_tokens"),
    ],
};

static USAGE_SHAPES: &[(BackendKind, UsageShape)] = &[
    (BackendKind::OpenAi, OPENAI_SHAPE),
    (BackendKind::Anthropic, ANTHROPIC_SHAPE),
    (BackendKind::Mock, NORMALIZED_SHAPE),
];

/// 按后端选定的抽取器
#[derive(Debug, Clone, Copy)]
pub struct UsageExtractor {
    shape: UsageShape,
}

impl UsageExtractor {
    pub fn for_backend(backend: BackendKind) -> Self {
        let shape = USAGE_SHAPES
            .iter()
            .find(|(kind, _)| *kind == backend)
            .map(|(_, shape)| *shape)
            .unwrap_or(NORMALIZED_SHAPE);
        Self { shape }
    }

    /// 抽取一条用量对象；缺失字段计 0
    pub fn extract(&self, usage: &Value) -> TokenCounts {
        let read = |key: &str| usage.get(key).and_then(Value::as_u64).unwrap_or(0);
        TokenCounts {
            input: read(self.shape.input)
                + self.shape.extra_input.iter().map(|key| read(key)).sum::<u64>(),
            output: read(self.shape.output),
            cached: self
                .shape
                .cache
                .iter()
                .filter_map(|field| field.read(usage))
                .sum(),
        }
    }
}
