//! Audio Stream - 分片、片段与流事件

use std::path::{Path, PathBuf};
use std::sync::Arc;

use super::MessageKey;

/// 传输层送达的流事件（音频已完成 base64 解码）
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamEvent {
    /// 一个音频分片，顺序有意义
    Chunk(Vec<u8>),
    /// 流结束
    End,
    /// 上游错误
    Error(String),
}

/// 音频分片
///
/// ordinal 为到达顺序（由 ChunkQueue 分配），不是上游的序号
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioChunk {
    pub message_id: MessageKey,
    pub ordinal: u64,
    pub data: Vec<u8>,
}

impl AudioChunk {
    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

/// 队列中的条目
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamItem {
    Chunk(AudioChunk),
    End,
    Error(String),
}

impl StreamItem {
    /// 是否为流的最后一个条目
    pub fn is_terminal(&self) -> bool {
        !matches!(self, StreamItem::Chunk(_))
    }
}

/// 片段文件
///
/// 写入完成后不可变。最后一个持有者释放时删除磁盘文件，
/// 播放列表和组装状态可以同时持有同一个片段。
#[derive(Debug)]
pub struct SegmentFile {
    path: PathBuf,
}

impl SegmentFile {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for SegmentFile {
    fn drop(&mut self) {
        match std::fs::remove_file(&self.path) {
            Ok(()) => tracing::trace!(path = %self.path.display(), "Segment file removed"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => tracing::debug!(
                path = %self.path.display(),
                error = %e,
                "Failed to remove segment file"
            ),
        }
    }
}

/// 可播放的音频片段
#[derive(Debug, Clone)]
pub struct Segment {
    pub message_id: MessageKey,
    /// 在本条消息中的序号（从 0 开始）
    pub index: usize,
    pub chunk_count: usize,
    pub size_bytes: u64,
    pub file: Arc<SegmentFile>,
}

impl Segment {
    pub fn path(&self) -> &Path {
        self.file.path()
    }
}
