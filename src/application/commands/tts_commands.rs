//! TTS Commands - 朗读与流控制命令

use serde::Serialize;

use crate::domain::{ContentKey, MessageKey};
use crate::infrastructure::adapters::{IngestStats, TransportEvent};

/// 朗读命令 - 命中缓存直接播放，否则打开流式会话等待分片
#[derive(Debug, Clone)]
pub struct SpeakCommand {
    pub message_id: String,
    pub text: String,
    /// 缓存作用域（如 voice id），参与 ContentKey 计算
    pub scope: Option<String>,
}

/// 音频来源
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SpeakSource {
    /// 缓存命中
    Cache,
    /// 等待网络分片
    Stream,
}

/// 朗读响应
#[derive(Debug, Clone, Serialize)]
pub struct SpeakResponse {
    pub message_id: MessageKey,
    pub content_key: ContentKey,
    pub generation: u64,
    pub source: SpeakSource,
}

/// 推送传输层事件命令
#[derive(Debug, Clone)]
pub struct PushEventsCommand {
    pub events: Vec<TransportEvent>,
}

/// 推送结果
pub type PushEventsResponse = IngestStats;

/// 绑定传输层 ID 到逻辑消息
#[derive(Debug, Clone)]
pub struct BindMessageCommand {
    pub transport_id: String,
    pub message_id: String,
}

/// 绑定响应
#[derive(Debug, Clone, Serialize)]
pub struct BindMessageResponse {
    pub transport_id: MessageKey,
    pub message_id: MessageKey,
    /// 从旧 key 迁移过来的待处理事件数
    pub moved_items: usize,
    /// 组装状态是否一并迁移
    pub assembly_moved: bool,
}

/// 停止播放命令
#[derive(Debug, Clone, Default)]
pub struct StopPlaybackCommand;

/// 停止播放响应
#[derive(Debug, Clone, Serialize)]
pub struct StopPlaybackResponse {
    /// 被停止的消息，没有活动会话时为 None
    pub message_id: Option<MessageKey>,
    pub generation: Option<u64>,
}

/// 取消消息命令 - 丢弃待处理分片与组装状态，并停止该消息的播放
#[derive(Debug, Clone)]
pub struct CancelMessageCommand {
    pub message_id: String,
}

/// 取消响应
#[derive(Debug, Clone, Serialize)]
pub struct CancelMessageResponse {
    pub message_id: MessageKey,
    pub discarded_items: usize,
    pub assembly_cancelled: bool,
    pub playback_stopped: bool,
}
