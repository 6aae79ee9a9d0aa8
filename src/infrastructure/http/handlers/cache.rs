//! Cache Handlers - 统计、清理、淘汰与音频下载

use axum::{
    body::Body,
    extract::{Path, State},
    http::{header, StatusCode},
    response::Response,
    Json,
};
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::io::ReaderStream;

use crate::application::{
    CacheStats, ClearCacheCommand, EvictCacheCommand, EvictionReport, GetCacheStatsQuery,
    GetCachedAudioQuery,
};
use crate::infrastructure::http::dto::ApiResponse;
use crate::infrastructure::http::error::ApiError;
use crate::infrastructure::http::state::AppState;

pub async fn get_cache_stats(
    State(state): State<Arc<AppState>>,
) -> Result<Json<ApiResponse<CacheStats>>, ApiError> {
    let stats = state
        .get_cache_stats_handler
        .handle(GetCacheStatsQuery)
        .await?;
    Ok(Json(ApiResponse::success(stats)))
}

pub async fn clear_cache(
    State(state): State<Arc<AppState>>,
) -> Result<Json<ApiResponse<EvictionReport>>, ApiError> {
    let report = state.clear_cache_handler.handle(ClearCacheCommand).await?;
    Ok(Json(ApiResponse::success(report)))
}

// ============================================================================
// Evict
// ============================================================================

/// 未给出的限制使用配置中的策略
#[derive(Debug, Default, Deserialize)]
pub struct EvictRequest {
    #[serde(default)]
    pub max_entries: Option<usize>,
    #[serde(default)]
    pub max_age_secs: Option<u64>,
    #[serde(default)]
    pub max_size_bytes: Option<u64>,
}

pub async fn evict_cache(
    State(state): State<Arc<AppState>>,
    body: Option<Json<EvictRequest>>,
) -> Result<Json<ApiResponse<EvictionReport>>, ApiError> {
    let req = body.map(|Json(req)| req).unwrap_or_default();
    let cmd = EvictCacheCommand {
        max_entries: req.max_entries,
        max_age: req.max_age_secs.map(Duration::from_secs),
        max_size_bytes: req.max_size_bytes,
    };

    let report = state.evict_cache_handler.handle(cmd).await?;
    Ok(Json(ApiResponse::success(report)))
}

// ============================================================================
// Audio Download
// ============================================================================

/// 流式返回缓存的音频文件
pub async fn download_cached_audio(
    State(state): State<Arc<AppState>>,
    Path(key): Path<String>,
) -> Result<Response, ApiError> {
    let audio = state
        .get_cached_audio_handler
        .handle(GetCachedAudioQuery { key: key.clone() })
        .await?;

    let file = tokio::fs::File::open(&audio.path)
        .await
        .map_err(|e| ApiError::Internal(format!("Failed to open cached audio: {}", e)))?;

    let extension = audio
        .path
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or("audio");

    let stream = ReaderStream::new(file);
    let body = Body::from_stream(stream);

    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, audio.content_type)
        .header(header::CONTENT_LENGTH, audio.size_bytes)
        .header(
            header::CONTENT_DISPOSITION,
            format!("attachment; filename=\"{}.{}\"", key, extension),
        )
        .body(body)
        .map_err(|e| ApiError::Internal(format!("Failed to build response: {}", e)))
}
