//! HTTP Server
//!
//! 控制面（/api）和播放事件推送（/ws/playback）共用一个 Router

use std::sync::Arc;
use std::time::Duration;

use axum::extract::DefaultBodyLimit;
use axum::middleware;
use axum::Router;
use http::header::CONTENT_TYPE;
use http::Method;
use tokio::net::TcpListener;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use super::middleware::error_logging_middleware;
use super::routes::create_routes;
use super::state::AppState;
use crate::config::ServerConfig;

/// HTTP 服务器
pub struct HttpServer {
    config: ServerConfig,
    state: Arc<AppState>,
}

impl HttpServer {
    pub fn new(config: ServerConfig, state: AppState) -> Self {
        Self {
            config,
            state: Arc::new(state),
        }
    }

    /// 构建 Router
    ///
    /// 前端页面跨域调用控制接口，只开放 GET/POST
    pub fn build_router(&self) -> Router {
        let cors = CorsLayer::new()
            .allow_origin(Any)
            .allow_methods([Method::GET, Method::POST])
            .allow_headers([CONTENT_TYPE])
            .max_age(Duration::from_secs(3600));

        create_routes()
            .layer(DefaultBodyLimit::max(self.config.max_body_bytes))
            .layer(middleware::from_fn(error_logging_middleware))
            .layer(TraceLayer::new_for_http())
            .layer(cors)
            .with_state(self.state.clone())
    }

    /// 启动服务器，shutdown_signal 完成后停止接受连接
    pub async fn run_with_shutdown<F>(self, shutdown_signal: F) -> Result<(), std::io::Error>
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        let router = self.build_router();
        let addr = self.config.addr();

        let listener = TcpListener::bind(&addr).await?;
        tracing::info!(
            addr = %addr,
            max_body_bytes = self.config.max_body_bytes,
            "Control API listening (ws: /ws/playback)"
        );

        axum::serve(listener, router)
            .with_graceful_shutdown(shutdown_signal)
            .await?;

        tracing::info!(addr = %addr, "Control API stopped");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::ports::EvictionPolicy;
    use crate::infrastructure::adapters::FakeAudioDevice;
    use crate::infrastructure::persistence::FileCacheConfig;
    use crate::infrastructure::pipeline::{Pipeline, PipelineConfig};
    use crate::infrastructure::worker::SegmentAssemblerConfig;
    use axum::body::Body;
    use http::{Request, StatusCode};
    use tempfile::tempdir;
    use tower::util::ServiceExt;

    async fn server_with_limit(dir: &std::path::Path, max_body_bytes: usize) -> (Pipeline, HttpServer) {
        let config = PipelineConfig {
            cache: FileCacheConfig {
                dir: dir.join("cache"),
                evict_on_store: None,
            },
            assembler: SegmentAssemblerConfig {
                work_dir: dir.join("segments"),
                ..Default::default()
            },
            eviction: EvictionPolicy::default(),
            evict_interval: None,
            watchdog_interval: Duration::from_millis(100),
        };
        let pipeline = Pipeline::build(config, FakeAudioDevice::new(Duration::ZERO).arc())
            .await
            .unwrap();
        let server = HttpServer::new(
            ServerConfig {
                max_body_bytes,
                ..Default::default()
            },
            AppState::new(&pipeline),
        );
        (pipeline, server)
    }

    #[tokio::test]
    async fn test_oversized_event_batch_rejected() {
        let dir = tempdir().unwrap();
        let (_pipeline, server) = server_with_limit(dir.path(), 1024).await;

        let audio = "A".repeat(4096);
        let body = format!(
            r#"{{"events":[{{"message_id":"m1","type":"audio_chunk","audio":"{}"}}]}}"#,
            audio
        );
        let request = Request::builder()
            .method("POST")
            .uri("/api/tts/events")
            .header(CONTENT_TYPE, "application/json")
            .body(Body::from(body))
            .unwrap();

        let response = server.build_router().oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
    }

    #[tokio::test]
    async fn test_cors_preflight_allows_post() {
        let dir = tempdir().unwrap();
        let (_pipeline, server) = server_with_limit(dir.path(), 1024).await;

        let request = Request::builder()
            .method("OPTIONS")
            .uri("/api/tts/speak")
            .header("origin", "http://localhost:3000")
            .header("access-control-request-method", "POST")
            .body(Body::empty())
            .unwrap();

        let response = server.build_router().oneshot(request).await.unwrap();
        assert!(response.status().is_success());
        assert!(response
            .headers()
            .contains_key("access-control-allow-methods"));
    }
}
