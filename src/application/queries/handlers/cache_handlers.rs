//! Cache Query Handlers

use std::path::Path;
use std::sync::Arc;

use crate::application::error::PipelineError;
use crate::application::ports::{AudioCachePort, CacheStats};
use crate::application::queries::cache_queries::*;
use crate::domain::ContentKey;

/// GetCacheStats Handler
pub struct GetCacheStatsHandler {
    cache: Arc<dyn AudioCachePort>,
}

impl GetCacheStatsHandler {
    pub fn new(cache: Arc<dyn AudioCachePort>) -> Self {
        Self { cache }
    }

    pub async fn handle(&self, _query: GetCacheStatsQuery) -> Result<CacheStats, PipelineError> {
        Ok(self.cache.stats().await?)
    }
}

/// GetCachedAudio Handler - 按 ContentKey 定位缓存文件
pub struct GetCachedAudioHandler {
    cache: Arc<dyn AudioCachePort>,
}

impl GetCachedAudioHandler {
    pub fn new(cache: Arc<dyn AudioCachePort>) -> Self {
        Self { cache }
    }

    pub async fn handle(&self, query: GetCachedAudioQuery) -> Result<GetCachedAudioResponse, PipelineError> {
        let key = ContentKey::parse(query.key.trim()).ok_or_else(|| {
            PipelineError::validation(format!("Invalid content key: {}", query.key))
        })?;

        let path = self
            .cache
            .lookup(&key)
            .await
            .ok_or_else(|| PipelineError::not_found("Cached audio", key.as_str()))?;

        let size_bytes = tokio::fs::metadata(&path)
            .await
            .map(|metadata| metadata.len())
            .map_err(|_| PipelineError::not_found("Cached audio", key.as_str()))?;

        Ok(GetCachedAudioResponse {
            content_type: content_type_for(&path),
            size_bytes,
            path,
        })
    }
}

/// 根据扩展名推断 MIME 类型
pub fn content_type_for(path: &Path) -> &'static str {
    let extension = path
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.to_ascii_lowercase());

    match extension.as_deref() {
        Some("mp3") => "audio/mpeg",
        Some("wav") => "audio/wav",
        Some("ogg") | Some("opus") => "audio/ogg",
        Some("aac") | Some("m4a") => "audio/aac",
        Some("flac") => "audio/flac",
        _ => "application/octet-stream",
    }
}
