//! Stream Ingestor - 传输层事件接入
//!
//! 把传输层送来的 JSON 事件解码后放入 ChunkQueue。
//! base64 无法解码的分片直接丢弃并记录警告。

use base64::{engine::general_purpose, Engine};
use futures_util::{Stream, StreamExt};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::domain::{MessageKey, StreamEvent};
use crate::infrastructure::memory::{InMemoryChunkQueue, MessageAudioBinding};

/// 传输层事件
///
/// ```json
/// {"message_id": "chatcmpl-1", "type": "audio_chunk", "audio": "<base64>"}
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransportEvent {
    pub message_id: String,
    #[serde(flatten)]
    pub payload: TransportPayload,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TransportPayload {
    /// 流式模式的一个分片
    AudioChunk { audio: String },
    /// 整段模式：一次给出全部音频
    AudioBlob { audio: String },
    End,
    Error { message: String },
}

/// 单个事件的处理结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IngestOutcome {
    Enqueued,
    Dropped,
}

/// 一批事件的处理统计
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct IngestStats {
    pub enqueued: usize,
    pub dropped: usize,
}

impl IngestStats {
    fn record(&mut self, outcome: IngestOutcome) {
        match outcome {
            IngestOutcome::Enqueued => self.enqueued += 1,
            IngestOutcome::Dropped => self.dropped += 1,
        }
    }
}

/// 传输层事件接入器
pub struct StreamIngestor {
    queue: Arc<InMemoryChunkQueue>,
    binding: Arc<MessageAudioBinding>,
}

impl StreamIngestor {
    pub fn new(queue: Arc<InMemoryChunkQueue>, binding: Arc<MessageAudioBinding>) -> Self {
        Self { queue, binding }
    }

    pub fn arc(self) -> Arc<Self> {
        Arc::new(self)
    }

    /// 处理单个事件，不会挂起
    pub fn ingest(&self, event: TransportEvent) -> IngestOutcome {
        let raw_id = MessageKey::new(&event.message_id);
        if raw_id.is_empty() {
            tracing::warn!("Transport event without message id, dropped");
            return IngestOutcome::Dropped;
        }
        let message_id = self.binding.resolve(&raw_id);

        match event.payload {
            TransportPayload::AudioChunk { audio } => match decode_audio(&audio) {
                Some(data) => self.queue.enqueue(&message_id, StreamEvent::Chunk(data)),
                None => {
                    tracing::warn!(message_id = %message_id, encoded_len = audio.len(), "Malformed audio chunk, dropped");
                    return IngestOutcome::Dropped;
                }
            },
            TransportPayload::AudioBlob { audio } => match decode_audio(&audio) {
                Some(data) => {
                    self.queue.enqueue(&message_id, StreamEvent::Chunk(data));
                    self.queue.enqueue(&message_id, StreamEvent::End);
                }
                None => {
                    tracing::warn!(message_id = %message_id, encoded_len = audio.len(), "Malformed audio blob, ending stream");
                    self.queue.enqueue(
                        &message_id,
                        StreamEvent::Error("malformed audio blob".to_string()),
                    );
                    return IngestOutcome::Dropped;
                }
            },
            TransportPayload::End => self.queue.enqueue(&message_id, StreamEvent::End),
            TransportPayload::Error { message } => {
                self.queue.enqueue(&message_id, StreamEvent::Error(message))
            }
        }

        IngestOutcome::Enqueued
    }

    /// 消费一个事件流直到结束
    pub async fn consume<S>(&self, stream: S) -> IngestStats
    where
        S: Stream<Item = TransportEvent> + Send,
    {
        let mut stats = IngestStats::default();
        let mut stream = std::pin::pin!(stream);
        while let Some(event) = stream.next().await {
            stats.record(self.ingest(event));
        }

        tracing::debug!(enqueued = stats.enqueued, dropped = stats.dropped, "Transport stream consumed");
        stats
    }

    /// 处理一批事件
    pub fn ingest_batch(&self, events: Vec<TransportEvent>) -> IngestStats {
        let mut stats = IngestStats::default();
        for event in events {
            stats.record(self.ingest(event));
        }
        stats
    }
}

fn decode_audio(encoded: &str) -> Option<Vec<u8>> {
    general_purpose::STANDARD.decode(encoded.trim()).ok()
}
