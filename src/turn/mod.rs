//! 轮次层：调用批次重建与轮次编排

pub mod batch;
pub mod orchestrator;

pub use batch::{
    truncate_for_display, BatchTracker, CallBatch, CompletedCall, Resolution, UnclosedBatch,
    DISPLAY_LIMIT,
};
pub use orchestrator::{reconstruct, TurnOrchestrator, TurnOutput, TurnSegment};
