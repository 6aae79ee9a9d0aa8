//! Command Handlers 实现

mod cache_handlers;
mod tts_handlers;

pub use cache_handlers::*;
pub use tts_handlers::*;
