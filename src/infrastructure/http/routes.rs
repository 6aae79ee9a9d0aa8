//! HTTP Routes
//!
//! API Endpoints:
//! - /api/ping               GET   健康检查
//! - /api/tts/speak          POST  朗读文本（命中缓存直接播放）
//! - /api/tts/events         POST  推送传输层音频事件
//! - /api/tts/bind           POST  绑定传输层 ID 到消息
//! - /api/tts/stop           POST  停止播放
//! - /api/tts/cancel         POST  取消消息
//! - /api/playback/state     GET   当前播放状态
//! - /api/cache/stats        GET   缓存统计
//! - /api/cache/clear        POST  清空缓存
//! - /api/cache/evict        POST  按策略淘汰
//! - /api/cache/audio/:key   GET   下载缓存音频
//! - /ws/playback            WS    播放事件推送

use axum::{
    routing::{get, post},
    Router,
};
use std::sync::Arc;

use super::handlers;
use super::state::AppState;

/// 创建所有路由
pub fn create_routes() -> Router<Arc<AppState>> {
    Router::new()
        .nest("/api", api_routes())
        .route("/ws/playback", get(handlers::playback_websocket_handler))
}

/// API 路由
fn api_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/ping", get(handlers::ping))
        .nest("/tts", tts_routes())
        .route("/playback/state", get(handlers::get_playback_state))
        .nest("/cache", cache_routes())
}

/// TTS 路由
fn tts_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/speak", post(handlers::speak))
        .route("/events", post(handlers::push_events))
        .route("/bind", post(handlers::bind_message))
        .route("/stop", post(handlers::stop_playback))
        .route("/cancel", post(handlers::cancel_message))
}

/// Cache 路由
fn cache_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/stats", get(handlers::get_cache_stats))
        .route("/clear", post(handlers::clear_cache))
        .route("/evict", post(handlers::evict_cache))
        .route("/audio/:key", get(handlers::download_cached_audio))
}
