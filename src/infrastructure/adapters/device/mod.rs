//! Playback Devices - 播放设备适配器
//!
//! - FakeAudioDevice: 测试用，记录播放过的文件
//! - ClockedAudioDevice: 无声卡环境，按音频实际时长计时

mod clocked_device;
mod fake_device;

pub use clocked_device::{ClockedAudioDevice, ClockedDeviceConfig};
pub use fake_device::{FakeAudioDevice, PlayedFile};

use std::sync::Mutex;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use crate::application::ports::DeviceError;

/// 可被 stop() 打断的播放计时
#[derive(Debug, Default)]
struct PlaybackInterrupt {
    current: Mutex<CancellationToken>,
}

impl PlaybackInterrupt {
    fn arm(&self) -> CancellationToken {
        self.current
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    fn interrupt(&self) {
        let mut current = self
            .current
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        current.cancel();
        *current = CancellationToken::new();
    }

    /// 等待 duration，期间被打断返回 Interrupted
    async fn hold(&self, duration: Duration) -> Result<(), DeviceError> {
        let token = self.arm();
        tokio::select! {
            _ = token.cancelled() => Err(DeviceError::Interrupted),
            _ = tokio::time::sleep(duration) => Ok(()),
        }
    }
}
