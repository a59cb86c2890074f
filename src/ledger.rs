//! Token 用量账本
//!
//! 会话级累加器：system_tokens 为工具目录的固定开销（启动时计算一次），
//! 另有输入/输出/缓存命中的累计值与轮次计数。只接受调用方已经抽取并求和好的计数，
//! 各后端用量字段格式的差异由 llm::usage 处理。

use serde::Serialize;

/// 单轮（或单条消息）的三项计数
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct TokenCounts {
    pub input: u64,
    pub output: u64,
    pub cached: u64,
}

impl std::ops::AddAssign for TokenCounts {
    fn add_assign(&mut self, rhs: Self) {
        self.input += rhs.input;
        self.output += rhs.output;
        self.cached += rhs.cached;
    }
}

/// 用量账本
#[derive(Debug, Clone, Default)]
pub struct UsageLedger {
    system_tokens: u64,
    total_input: u64,
    total_output: u64,
    total_cached: u64,
    turn_count: u64,
}

/// 账本快照
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct UsageSummary {
    pub system_tokens: u64,
    pub turns: u64,
    pub input: u64,
    pub output: u64,
    pub cached: u64,
    /// input + output
    pub total: u64,
    /// 整数截断的每轮平均值；零轮时为 None
    pub average_per_turn: Option<u64>,
}

impl UsageLedger {
    pub fn new(system_tokens: u64) -> Self {
        Self {
            system_tokens,
            ..Self::default()
        }
    }

    pub fn record_turn(&mut self, input: u64, output: u64, cached: u64) {
        self.total_input += input;
        self.total_output += output;
        self.total_cached += cached;
        self.turn_count += 1;
    }

    pub fn record(&mut self, counts: TokenCounts) {
        self.record_turn(counts.input, counts.output, counts.cached);
    }

    pub fn total(&self) -> u64 {
        self.total_input + self.total_output
    }

    pub fn system_tokens(&self) -> u64 {
        self.system_tokens
    }

    pub fn summary(&self) -> UsageSummary {
        let total = self.total();
        UsageSummary {
            system_tokens: self.system_tokens,
            turns: self.turn_count,
            input: self.total_input,
            output: self.total_output,
            cached: self.total_cached,
            total,
            average_per_turn: (self.turn_count > 0).then(|| total / self.turn_count),
        }
    }

    /// 清零累计值与轮次；system_tokens 属于工具目录而非对话历史，保持不变
    pub fn reset(&mut self) {
        *self = Self::new(self.system_tokens);
    }
}
