//! Persistence Layer - 数据持久化
//!
//! 磁盘音频缓存实现

pub mod file_cache;

pub use self::file_cache::{FileAudioCache, FileCacheConfig};
