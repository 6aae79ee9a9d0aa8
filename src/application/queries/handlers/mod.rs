//! Query Handlers 实现

mod cache_handlers;
mod playback_handlers;

pub use cache_handlers::*;
pub use playback_handlers::*;
