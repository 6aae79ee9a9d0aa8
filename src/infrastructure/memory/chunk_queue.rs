//! In-Memory Chunk Queue
//!
//! 每条消息一个 FIFO，每条消息同一时刻最多一个 drain 循环

use dashmap::DashMap;
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::sync::Mutex;

use crate::application::ports::ChunkConsumerPort;
use crate::domain::{AudioChunk, MessageKey, StreamEvent, StreamItem};

/// drain 循环状态
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DrainState {
    Idle,
    Draining,
}

/// 单条消息的队列
struct QueueSlot {
    pending: VecDeque<StreamItem>,
    drain: DrainState,
    next_ordinal: u64,
    /// 交付锁，rekey 后新旧两个 key 共享，保证交付顺序
    gate: Arc<Mutex<()>>,
}

impl QueueSlot {
    fn new() -> Self {
        Self {
            pending: VecDeque::new(),
            drain: DrainState::Idle,
            next_ordinal: 0,
            gate: Arc::new(Mutex::new(())),
        }
    }

    /// Idle -> Draining，成功返回 true
    fn try_begin_drain(&mut self) -> bool {
        if self.drain == DrainState::Draining {
            return false;
        }
        self.drain = DrainState::Draining;
        true
    }
}

/// 内存分片队列
pub struct InMemoryChunkQueue {
    /// message_id -> QueueSlot
    slots: DashMap<MessageKey, QueueSlot>,
    consumer: Arc<dyn ChunkConsumerPort>,
}

impl InMemoryChunkQueue {
    pub fn new(consumer: Arc<dyn ChunkConsumerPort>) -> Self {
        Self {
            slots: DashMap::new(),
            consumer,
        }
    }

    pub fn arc(self) -> Arc<Self> {
        Arc::new(self)
    }

    /// 入队，不会挂起
    ///
    /// 该消息没有运行中的 drain 循环时启动一个
    pub fn enqueue(self: &Arc<Self>, message_id: &MessageKey, event: StreamEvent) {
        let start = {
            let mut slot = self
                .slots
                .entry(message_id.clone())
                .or_insert_with(QueueSlot::new);

            let item = match event {
                StreamEvent::Chunk(data) => {
                    let ordinal = slot.next_ordinal;
                    slot.next_ordinal += 1;
                    StreamItem::Chunk(AudioChunk {
                        message_id: message_id.clone(),
                        ordinal,
                        data,
                    })
                }
                StreamEvent::End => StreamItem::End,
                StreamEvent::Error(reason) => StreamItem::Error(reason),
            };
            slot.pending.push_back(item);
            slot.try_begin_drain()
        };

        tracing::trace!(message_id = %message_id, started_drain = start, "Stream item enqueued");

        if start {
            self.spawn_drain(message_id.clone());
        }
    }

    /// 在当前任务中运行 drain 循环
    ///
    /// 已有 drain 循环在运行（或消息没有队列）时直接返回 false
    pub async fn drain(&self, message_id: &MessageKey) -> bool {
        let started = match self.slots.get_mut(message_id) {
            Some(mut slot) => slot.try_begin_drain(),
            None => false,
        };
        if !started {
            return false;
        }

        self.run_drain(message_id.clone()).await;
        true
    }

    /// 把 from 的待处理条目移到 to 的队首
    ///
    /// 绑定在首个分片到达之后才注册时使用，返回移动的条目数
    pub fn rekey(self: &Arc<Self>, from: &MessageKey, to: &MessageKey) -> usize {
        if from == to {
            return 0;
        }

        let (moved, next_ordinal, gate) = match self.slots.get_mut(from) {
            Some(mut slot) => {
                let moved: Vec<StreamItem> = slot.pending.drain(..).collect();
                (moved, slot.next_ordinal, slot.gate.clone())
            }
            None => return 0,
        };
        self.slots
            .remove_if(from, |_, slot| slot.pending.is_empty() && slot.drain == DrainState::Idle);

        let count = moved.len();
        let start = {
            let mut slot = self.slots.entry(to.clone()).or_insert_with(|| QueueSlot {
                gate,
                ..QueueSlot::new()
            });
            for item in moved.into_iter().rev() {
                slot.pending.push_front(retag(item, to));
            }
            slot.next_ordinal = slot.next_ordinal.max(next_ordinal);
            !slot.pending.is_empty() && slot.try_begin_drain()
        };

        tracing::debug!(from = %from, to = %to, moved = count, "Chunk queue rekeyed");

        if start {
            self.spawn_drain(to.clone());
        }
        count
    }

    /// 丢弃消息的待处理条目，返回丢弃数量
    pub fn discard(&self, message_id: &MessageKey) -> usize {
        let dropped = match self.slots.get_mut(message_id) {
            Some(mut slot) => {
                let dropped = slot.pending.len();
                slot.pending.clear();
                dropped
            }
            None => return 0,
        };
        self.slots
            .remove_if(message_id, |_, slot| slot.drain == DrainState::Idle);

        if dropped > 0 {
            tracing::debug!(message_id = %message_id, dropped = dropped, "Pending stream items discarded");
        }
        dropped
    }

    pub fn pending_len(&self, message_id: &MessageKey) -> usize {
        self.slots
            .get(message_id)
            .map(|slot| slot.pending.len())
            .unwrap_or(0)
    }

    pub fn drain_state(&self, message_id: &MessageKey) -> Option<DrainState> {
        self.slots.get(message_id).map(|slot| slot.drain)
    }

    fn spawn_drain(self: &Arc<Self>, message_id: MessageKey) {
        let queue = Arc::clone(self);
        tokio::spawn(async move {
            queue.run_drain(message_id).await;
        });
    }

    /// drain 循环
    ///
    /// 取条目和切回 Idle 在同一次加锁内完成，期间入队的条目不会滞留
    async fn run_drain(&self, message_id: MessageKey) {
        let mut delivered = 0usize;

        loop {
            let next = match self.slots.get_mut(&message_id) {
                Some(mut slot) => match slot.pending.pop_front() {
                    Some(item) => Some((item, slot.gate.clone())),
                    None => {
                        slot.drain = DrainState::Idle;
                        None
                    }
                },
                None => None,
            };
            let Some((item, gate)) = next else {
                break;
            };

            let terminal = item.is_terminal();
            {
                let _delivery = gate.lock().await;
                self.consumer.accept(&message_id, item).await;
            }
            delivered += 1;

            if terminal {
                // 终止条目之后没有新条目时移除整个队列
                let removed = self
                    .slots
                    .remove_if(&message_id, |_, slot| slot.pending.is_empty())
                    .is_some();
                if removed {
                    break;
                }
            }
        }

        tracing::trace!(message_id = %message_id, delivered = delivered, "Drain loop finished");
    }
}

fn retag(item: StreamItem, message_id: &MessageKey) -> StreamItem {
    match item {
        StreamItem::Chunk(chunk) => StreamItem::Chunk(AudioChunk {
            message_id: message_id.clone(),
            ..chunk
        }),
        other => other,
    }
}
