//! 领域层
//!
//! - content_key: 内容寻址缓存 key
//! - message: 消息标识
//! - audio: 分片、片段与流事件
//! - playback: 播放状态机

mod audio;
mod content_key;
mod message;
mod playback;

pub use audio::{AudioChunk, Segment, SegmentFile, StreamEvent, StreamItem};
pub use content_key::{ContentKey, CONTENT_KEY_LEN};
pub use message::MessageKey;
pub use playback::PlaybackState;
