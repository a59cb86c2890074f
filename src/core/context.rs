//! 会话上下文
//!
//! 会话开始时创建、结束时随会话一起销毁；携带渲染器与会话级 tracing span，
//! 显式传给会话循环与轮次编排器。

use std::sync::Arc;

use chrono::{DateTime, Local};
use uuid::Uuid;

use crate::ui::{RecordingRenderer, Renderer};

pub struct SessionContext {
    session_id: Uuid,
    started_at: DateTime<Local>,
    span: tracing::Span,
    renderer: Arc<dyn Renderer>,
}

impl SessionContext {
    pub fn new(renderer: Arc<dyn Renderer>) -> Self {
        let session_id = Uuid::new_v4();
        Self {
            session_id,
            started_at: Local::now(),
            span: tracing::info_span!("session", id = %session_id),
            renderer,
        }
    }

    /// 不输出到终端的上下文
    pub fn headless() -> Self {
        Self::new(Arc::new(RecordingRenderer::new()))
    }

    pub fn session_id(&self) -> Uuid {
        self.session_id
    }

    pub fn started_at(&self) -> DateTime<Local> {
        self.started_at
    }

    pub fn span(&self) -> &tracing::Span {
        &self.span
    }

    pub fn renderer(&self) -> &dyn Renderer {
        self.renderer.as_ref()
    }
}
