//! ChatVoice - 聊天消息流式 TTS 音频流水线
//!
//! 组合根：加载配置，装配流水线，启动后台任务与 HTTP 服务

use std::sync::Arc;

use chatvoice::application::ports::AudioDevicePort;
use chatvoice::config::{load_config, print_config, DeviceKind};
use chatvoice::infrastructure::adapters::{
    ClockedAudioDevice, ClockedDeviceConfig, FakeAudioDevice,
};
use chatvoice::infrastructure::http::{AppState, HttpServer};
use chatvoice::infrastructure::pipeline::{Pipeline, PipelineConfig};
use tokio_util::sync::CancellationToken;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // 加载配置（优先级：环境变量 > 配置文件 > 默认值）
    let config = load_config().map_err(|e| anyhow::anyhow!("Failed to load config: {}", e))?;

    // 初始化日志
    let log_filter = format!(
        "{},chatvoice={},tower_http=debug",
        config.log.level, config.log.level
    );
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&log_filter)),
        )
        .init();

    tracing::info!("ChatVoice - 流式 TTS 音频流水线");
    print_config(&config);

    // 创建播放设备
    let device: Arc<dyn AudioDevicePort> = match config.playback.device {
        DeviceKind::Clocked => ClockedAudioDevice::new(ClockedDeviceConfig {
            fallback_bytes_per_sec: config.playback.fallback_bytes_per_sec,
        })
        .arc() as Arc<dyn AudioDevicePort>,
        DeviceKind::Fake => FakeAudioDevice::new(std::time::Duration::ZERO).arc(),
    };

    // 装配流水线（打开缓存、清理片段目录）
    let pipeline = Pipeline::build(PipelineConfig::from(&config), device).await?;

    // 启动后台任务
    let shutdown = CancellationToken::new();
    let background = pipeline.spawn_background(shutdown.clone());

    // 创建 HTTP 服务器
    let state = AppState::new(&pipeline);
    let server = HttpServer::new(config.server.clone(), state);

    tracing::info!("Starting HTTP server...");

    // 启动服务器（带优雅关闭）
    server
        .run_with_shutdown(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!(error = %e, "Failed to listen for ctrl-c");
                std::future::pending::<()>().await;
            }
            tracing::info!("Received shutdown signal");
        })
        .await?;

    shutdown.cancel();
    for handle in background {
        if let Err(e) = handle.await {
            tracing::warn!(error = %e, "Background task ended abnormally");
        }
    }
    pipeline.shutdown().await;

    tracing::info!("Server shutdown complete");

    Ok(())
}
