//! Cache Queries - 缓存查询

use std::path::PathBuf;

/// 缓存统计查询
#[derive(Debug, Clone, Default)]
pub struct GetCacheStatsQuery;

/// 获取缓存音频查询
#[derive(Debug, Clone)]
pub struct GetCachedAudioQuery {
    pub key: String,
}

/// 获取缓存音频响应
#[derive(Debug, Clone)]
pub struct GetCachedAudioResponse {
    pub path: PathBuf,
    pub size_bytes: u64,
    pub content_type: &'static str,
}
