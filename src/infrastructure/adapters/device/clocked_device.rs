//! Clocked Audio Device - 无声卡环境下的播放设备
//!
//! 用 symphonia 探测音频时长并按时长计时，用于服务端部署和集成测试。
//! 无法探测时按字节率估算。

use async_trait::async_trait;
use std::fs::File;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use symphonia::core::formats::FormatOptions;
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;

use super::PlaybackInterrupt;
use crate::application::ports::{AudioDevicePort, DeviceError};

/// Clocked Device 配置
#[derive(Debug, Clone)]
pub struct ClockedDeviceConfig {
    /// 无法解析音频时使用的估算字节率
    pub fallback_bytes_per_sec: u64,
}

impl Default for ClockedDeviceConfig {
    fn default() -> Self {
        Self {
            // 128kbps mp3
            fallback_bytes_per_sec: 16_000,
        }
    }
}

/// Clocked Audio Device
pub struct ClockedAudioDevice {
    config: ClockedDeviceConfig,
    interrupt: PlaybackInterrupt,
}

impl ClockedAudioDevice {
    pub fn new(config: ClockedDeviceConfig) -> Self {
        tracing::info!(
            fallback_bytes_per_sec = config.fallback_bytes_per_sec,
            "ClockedAudioDevice initialized"
        );
        Self {
            config,
            interrupt: PlaybackInterrupt::default(),
        }
    }

    pub fn arc(self) -> Arc<Self> {
        Arc::new(self)
    }

    /// 计算文件的播放时长
    pub async fn duration_of(&self, path: &Path) -> Result<Duration, DeviceError> {
        let metadata = tokio::fs::metadata(path)
            .await
            .map_err(|e| DeviceError::OpenFailed(format!("{}: {}", path.display(), e)))?;

        let probe_path = path.to_path_buf();
        let probed = tokio::task::spawn_blocking(move || probe_duration(&probe_path))
            .await
            .map_err(|e| DeviceError::Unavailable(e.to_string()))?;

        Ok(probed.unwrap_or_else(|| {
            estimate_duration(metadata.len(), self.config.fallback_bytes_per_sec)
        }))
    }
}

#[async_trait]
impl AudioDevicePort for ClockedAudioDevice {
    async fn play(&self, path: &Path) -> Result<(), DeviceError> {
        let duration = self.duration_of(path).await?;
        tracing::debug!(
            path = %path.display(),
            duration_ms = duration.as_millis() as u64,
            "ClockedAudioDevice: playing file"
        );
        self.interrupt.hold(duration).await
    }

    async fn stop(&self) {
        self.interrupt.interrupt();
    }

    async fn reset(&self) -> Result<(), DeviceError> {
        Ok(())
    }

    fn name(&self) -> &'static str {
        "clocked"
    }
}

/// 读取容器头中的帧数和采样率
fn probe_duration(path: &Path) -> Option<Duration> {
    let file = File::open(path).ok()?;
    let mss = MediaSourceStream::new(Box::new(file), Default::default());

    let mut hint = Hint::new();
    if let Some(extension) = path.extension().and_then(|ext| ext.to_str()) {
        hint.with_extension(extension);
    }

    let probed = symphonia::default::get_probe()
        .format(
            &hint,
            mss,
            &FormatOptions::default(),
            &MetadataOptions::default(),
        )
        .ok()?;

    let track = probed.format.default_track()?;
    let frames = track.codec_params.n_frames?;
    let sample_rate = track.codec_params.sample_rate?;
    if sample_rate == 0 {
        return None;
    }

    Some(Duration::from_secs_f64(frames as f64 / sample_rate as f64))
}

fn estimate_duration(size_bytes: u64, bytes_per_sec: u64) -> Duration {
    if bytes_per_sec == 0 {
        return Duration::ZERO;
    }
    Duration::from_secs_f64(size_bytes as f64 / bytes_per_sec as f64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    /// 生成 PCM16 单声道 WAV
    fn wav_bytes(sample_rate: u32, samples: u32) -> Vec<u8> {
        let data_len = samples * 2;
        let mut out = Vec::new();
        out.extend_from_slice(b"RIFF");
        out.extend_from_slice(&(36 + data_len).to_le_bytes());
        out.extend_from_slice(b"WAVE");
        out.extend_from_slice(b"fmt ");
        out.extend_from_slice(&16u32.to_le_bytes());
        out.extend_from_slice(&1u16.to_le_bytes());
        out.extend_from_slice(&1u16.to_le_bytes());
        out.extend_from_slice(&sample_rate.to_le_bytes());
        out.extend_from_slice(&(sample_rate * 2).to_le_bytes());
        out.extend_from_slice(&2u16.to_le_bytes());
        out.extend_from_slice(&16u16.to_le_bytes());
        out.extend_from_slice(b"data");
        out.extend_from_slice(&data_len.to_le_bytes());
        out.resize(out.len() + data_len as usize, 0);
        out
    }

    #[tokio::test]
    async fn test_duration_probed_from_wav_header() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("half_second.wav");
        std::fs::write(&path, wav_bytes(8000, 4000)).unwrap();

        let device = ClockedAudioDevice::new(ClockedDeviceConfig::default());
        let duration = device.duration_of(&path).await.unwrap();
        assert_eq!(duration.as_millis(), 500);
    }

    #[tokio::test]
    async fn test_unparseable_audio_uses_byte_rate() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("noise.bin");
        std::fs::write(&path, vec![7u8; 1000]).unwrap();

        let device = ClockedAudioDevice::new(ClockedDeviceConfig {
            fallback_bytes_per_sec: 10_000,
        });
        let duration = device.duration_of(&path).await.unwrap();
        assert_eq!(duration.as_millis(), 100);
    }

    #[tokio::test]
    async fn test_stop_interrupts_clocked_play() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("long.bin");
        std::fs::write(&path, vec![0u8; 1000]).unwrap();

        let device = ClockedAudioDevice::new(ClockedDeviceConfig {
            fallback_bytes_per_sec: 1,
        })
        .arc();
        let player = {
            let device = device.clone();
            tokio::spawn(async move { device.play(&path).await })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;
        device.stop().await;

        assert!(matches!(player.await.unwrap(), Err(DeviceError::Interrupted)));
    }
}
