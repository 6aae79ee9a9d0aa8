//! 应用层 - 查询（读操作）
//!
//! CQRS 查询侧：播放状态与缓存信息

mod cache_queries;
mod playback_queries;

pub mod handlers;

pub use cache_queries::*;
pub use playback_queries::*;
