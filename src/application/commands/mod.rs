//! 应用层 - 命令（写操作）
//!
//! CQRS 命令侧：朗读、流控制与缓存维护

mod cache_commands;
mod tts_commands;

pub mod handlers;

pub use cache_commands::*;
pub use tts_commands::*;
