//! Event Publisher Implementation
//!
//! 播放事件的广播通道 + 当前状态快照

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::{broadcast, watch};

use crate::domain::{MessageKey, PlaybackState};

/// 播放事件类型
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data")]
pub enum PlaybackEvent {
    /// 播放状态变更
    StateChanged {
        generation: u64,
        message_id: MessageKey,
        state: PlaybackState,
    },
    /// 片段追加到播放列表
    SegmentAppended {
        generation: u64,
        message_id: MessageKey,
        index: usize,
        size_bytes: u64,
    },
    /// 播放失败
    PlaybackFailed {
        generation: u64,
        message_id: MessageKey,
        reason: String,
    },
    /// 消息的音频组装完成
    AssemblyFinished {
        message_id: MessageKey,
        segment_count: usize,
        total_bytes: u64,
        cached: bool,
    },
}

/// 当前播放状态快照
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PlaybackSnapshot {
    pub generation: u64,
    pub message_id: Option<MessageKey>,
    pub state: PlaybackState,
}

/// 事件发布器
pub struct EventPublisher {
    channel: broadcast::Sender<PlaybackEvent>,
    snapshot: watch::Sender<PlaybackSnapshot>,
}

impl EventPublisher {
    pub fn new() -> Self {
        let (channel, _) = broadcast::channel(100);
        let (snapshot, _) = watch::channel(PlaybackSnapshot::default());
        Self { channel, snapshot }
    }

    pub fn arc(self) -> Arc<Self> {
        Arc::new(self)
    }

    /// 订阅事件
    pub fn subscribe(&self) -> broadcast::Receiver<PlaybackEvent> {
        self.channel.subscribe()
    }

    /// 订阅状态快照
    pub fn watch(&self) -> watch::Receiver<PlaybackSnapshot> {
        self.snapshot.subscribe()
    }

    /// 当前状态快照
    pub fn current(&self) -> PlaybackSnapshot {
        self.snapshot.borrow().clone()
    }

    /// 发布状态变更事件，同时更新快照
    pub fn publish_state(&self, generation: u64, message_id: &MessageKey, state: PlaybackState) {
        self.snapshot.send_replace(PlaybackSnapshot {
            generation,
            message_id: Some(message_id.clone()),
            state,
        });
        self.publish(PlaybackEvent::StateChanged {
            generation,
            message_id: message_id.clone(),
            state,
        });
    }

    /// 发布片段追加事件
    pub fn publish_segment_appended(
        &self,
        generation: u64,
        message_id: &MessageKey,
        index: usize,
        size_bytes: u64,
    ) {
        self.publish(PlaybackEvent::SegmentAppended {
            generation,
            message_id: message_id.clone(),
            index,
            size_bytes,
        });
    }

    /// 发布播放失败事件
    pub fn publish_failed(&self, generation: u64, message_id: &MessageKey, reason: &str) {
        self.publish(PlaybackEvent::PlaybackFailed {
            generation,
            message_id: message_id.clone(),
            reason: reason.to_string(),
        });
    }

    /// 发布组装完成事件
    pub fn publish_assembly_finished(
        &self,
        message_id: &MessageKey,
        segment_count: usize,
        total_bytes: u64,
        cached: bool,
    ) {
        self.publish(PlaybackEvent::AssemblyFinished {
            message_id: message_id.clone(),
            segment_count,
            total_bytes,
            cached,
        });
    }

    fn publish(&self, event: PlaybackEvent) {
        if let Err(e) = self.channel.send(event) {
            tracing::trace!(error = %e, "Failed to publish playback event (no receivers)");
        }
    }
}

impl Default for EventPublisher {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_event_updates_snapshot() {
        let publisher = EventPublisher::new();
        let mut rx = publisher.subscribe();
        let message_id = MessageKey::new("m1");

        publisher.publish_state(3, &message_id, PlaybackState::Playing);

        assert_eq!(
            rx.try_recv().unwrap(),
            PlaybackEvent::StateChanged {
                generation: 3,
                message_id: message_id.clone(),
                state: PlaybackState::Playing,
            }
        );
        let snapshot = publisher.current();
        assert_eq!(snapshot.generation, 3);
        assert_eq!(snapshot.state, PlaybackState::Playing);
    }

    #[test]
    fn test_event_json_shape() {
        let event = PlaybackEvent::PlaybackFailed {
            generation: 1,
            message_id: MessageKey::new("m1"),
            reason: "no audio".to_string(),
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["event"], "PlaybackFailed");
        assert_eq!(json["data"]["message_id"], "m1");
    }
}
