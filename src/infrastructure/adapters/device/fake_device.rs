//! Fake Audio Device - 用于测试的播放设备
//!
//! 不输出声音，只记录播放过的文件内容

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use super::PlaybackInterrupt;
use crate::application::ports::{AudioDevicePort, DeviceError};

/// 一次播放记录
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlayedFile {
    pub path: PathBuf,
    /// 播放时的文件内容（片段文件随后会被删除）
    pub bytes: Vec<u8>,
}

/// Fake Audio Device
pub struct FakeAudioDevice {
    /// 每个文件的模拟播放时长
    play_delay: Duration,
    played: Mutex<Vec<PlayedFile>>,
    fail_next: AtomicBool,
    reset_count: AtomicUsize,
    interrupt: PlaybackInterrupt,
}

impl FakeAudioDevice {
    pub fn new(play_delay: Duration) -> Self {
        tracing::info!(play_delay_ms = play_delay.as_millis() as u64, "FakeAudioDevice initialized");
        Self {
            play_delay,
            played: Mutex::new(Vec::new()),
            fail_next: AtomicBool::new(false),
            reset_count: AtomicUsize::new(0),
            interrupt: PlaybackInterrupt::default(),
        }
    }

    pub fn arc(self) -> Arc<Self> {
        Arc::new(self)
    }

    /// 下一次 play() 返回 PlaybackFailed
    pub fn fail_next(&self) {
        self.fail_next.store(true, Ordering::SeqCst);
    }

    pub fn played(&self) -> Vec<PlayedFile> {
        self.played
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    /// 所有播放过的字节按顺序拼接
    pub fn played_bytes(&self) -> Vec<u8> {
        self.played().into_iter().flat_map(|file| file.bytes).collect()
    }

    pub fn reset_count(&self) -> usize {
        self.reset_count.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl AudioDevicePort for FakeAudioDevice {
    async fn play(&self, path: &Path) -> Result<(), DeviceError> {
        let bytes = tokio::fs::read(path)
            .await
            .map_err(|e| DeviceError::OpenFailed(format!("{}: {}", path.display(), e)))?;

        if self.fail_next.swap(false, Ordering::SeqCst) {
            return Err(DeviceError::PlaybackFailed("injected failure".to_string()));
        }

        tracing::debug!(path = %path.display(), size = bytes.len(), "FakeAudioDevice: playing file");
        self.played
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(PlayedFile {
                path: path.to_path_buf(),
                bytes,
            });

        self.interrupt.hold(self.play_delay).await
    }

    async fn stop(&self) {
        self.interrupt.interrupt();
    }

    async fn reset(&self) -> Result<(), DeviceError> {
        self.reset_count.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn name(&self) -> &'static str {
        "fake"
    }
}
