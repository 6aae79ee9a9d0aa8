//! Chunk Consumer Port - 分片队列的消费端

use async_trait::async_trait;

use crate::domain::{MessageKey, StreamItem};

/// Chunk Consumer Port
///
/// ChunkQueue 的 drain 循环按入队顺序逐条调用 accept，
/// 同一消息同一时刻只有一个调用方
#[async_trait]
pub trait ChunkConsumerPort: Send + Sync {
    async fn accept(&self, message_id: &MessageKey, item: StreamItem);
}
