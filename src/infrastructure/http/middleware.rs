//! HTTP Middleware
//!
//! 按接口分组记录失败和过慢的请求

use axum::{extract::Request, middleware::Next, response::Response};
use std::time::Instant;

/// 控制接口只登记状态，超过该耗时说明调度器或缓存锁被阻塞
const SLOW_REQUEST_MS: u64 = 1_000;

/// 请求所属的接口分组，作为日志字段
pub fn route_area(path: &str) -> &'static str {
    if path.starts_with("/api/tts/") {
        "tts"
    } else if path.starts_with("/api/cache/audio/") {
        "download"
    } else if path.starts_with("/api/cache/") {
        "cache"
    } else if path.starts_with("/api/playback/") {
        "playback"
    } else if path.starts_with("/ws/") {
        "ws"
    } else {
        "other"
    }
}

/// 请求日志中间件
///
/// 4xx/5xx 和慢请求记录日志；业务错误（errno != 0）在 ApiError::into_response() 中记录。
/// 缓存音频下载按文件大小耗时，不计入慢请求
pub async fn error_logging_middleware(request: Request, next: Next) -> Response {
    let method = request.method().clone();
    let path = request.uri().path().to_string();
    let area = route_area(&path);
    let started = Instant::now();

    let response = next.run(request).await;
    let status = response.status().as_u16();
    let elapsed_ms = started.elapsed().as_millis() as u64;

    if response.status().is_server_error() {
        tracing::error!(area, method = %method, path = %path, status, elapsed_ms, "Request failed");
    } else if response.status().is_client_error() {
        // 请求体 JSON 解析失败（422）、超出大小限制（413）也在这里
        tracing::warn!(area, method = %method, path = %path, status, elapsed_ms, "Request rejected");
    } else if elapsed_ms >= SLOW_REQUEST_MS && area != "download" && area != "ws" {
        tracing::warn!(area, method = %method, path = %path, elapsed_ms, "Slow control request");
    }

    response
}
