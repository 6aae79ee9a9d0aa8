//! Audio Device Port - 播放设备抽象
//!
//! 播放设备只由 PlaybackScheduler 持有，其它组件不直接访问

use async_trait::async_trait;
use std::path::Path;
use thiserror::Error;

/// 播放设备错误
#[derive(Debug, Error)]
pub enum DeviceError {
    #[error("Failed to open audio file: {0}")]
    OpenFailed(String),

    #[error("Playback failed: {0}")]
    PlaybackFailed(String),

    /// 播放被 stop() 打断
    #[error("Playback interrupted")]
    Interrupted,

    #[error("Device unavailable: {0}")]
    Unavailable(String),
}

/// Audio Device Port
#[async_trait]
pub trait AudioDevicePort: Send + Sync {
    /// 播放一个音频文件，整个文件播放完毕后返回
    async fn play(&self, path: &Path) -> Result<(), DeviceError>;

    /// 停止当前播放，正在进行的 play() 返回 Interrupted
    async fn stop(&self);

    /// 播放失败后重新初始化底层设备句柄
    async fn reset(&self) -> Result<(), DeviceError>;

    /// 设备名称（用于日志）
    fn name(&self) -> &'static str;
}
