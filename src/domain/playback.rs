//! Playback - 播放状态机

use serde::{Deserialize, Serialize};

/// 播放状态
///
/// Idle → Loading → Playing → {Completed | Stopped}
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum PlaybackState {
    /// 没有活动会话
    #[default]
    Idle,
    /// 会话已创建，等待首个片段或缓存文件
    Loading,
    /// 正在播放
    Playing,
    /// 最后一个片段播放完毕
    Completed,
    /// 被取消或失败
    Stopped,
}

impl PlaybackState {
    pub fn as_str(&self) -> &'static str {
        match self {
            PlaybackState::Idle => "idle",
            PlaybackState::Loading => "loading",
            PlaybackState::Playing => "playing",
            PlaybackState::Completed => "completed",
            PlaybackState::Stopped => "stopped",
        }
    }

    /// 会话内不再发生任何迁移
    pub fn is_terminal(&self) -> bool {
        matches!(self, PlaybackState::Completed | PlaybackState::Stopped)
    }

    pub fn can_transition_to(&self, next: PlaybackState) -> bool {
        use PlaybackState::*;
        matches!(
            (self, next),
            (Idle, Loading)
                | (Loading, Playing)
                | (Loading, Stopped)
                | (Playing, Completed)
                | (Playing, Stopped)
        )
    }
}

impl std::fmt::Display for PlaybackState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_transitions() {
        assert!(PlaybackState::Idle.can_transition_to(PlaybackState::Loading));
        assert!(PlaybackState::Loading.can_transition_to(PlaybackState::Playing));
        assert!(PlaybackState::Playing.can_transition_to(PlaybackState::Completed));
        assert!(PlaybackState::Playing.can_transition_to(PlaybackState::Stopped));
        assert!(PlaybackState::Loading.can_transition_to(PlaybackState::Stopped));
    }

    #[test]
    fn test_terminal_states_are_final() {
        for next in [
            PlaybackState::Idle,
            PlaybackState::Loading,
            PlaybackState::Playing,
            PlaybackState::Completed,
            PlaybackState::Stopped,
        ] {
            assert!(!PlaybackState::Completed.can_transition_to(next));
            assert!(!PlaybackState::Stopped.can_transition_to(next));
        }
        assert!(!PlaybackState::Idle.can_transition_to(PlaybackState::Playing));
    }

    #[test]
    fn test_serialize_snake_case() {
        let json = serde_json::to_string(&PlaybackState::Completed).unwrap();
        assert_eq!(json, "\"completed\"");
    }
}
