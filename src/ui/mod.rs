//! 输出层：Renderer 抽象、crossterm 彩色终端实现与记录实现

pub mod render;

pub use render::{
    call_title, format_thousands, turn_tokens_line, usage_rows, BannerInfo, ConsoleRenderer,
    RecordingRenderer, RenderEvent, Renderer,
};
