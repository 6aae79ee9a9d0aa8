//! TTS Command Handlers

use std::sync::Arc;

use crate::application::commands::tts_commands::*;
use crate::application::error::PipelineError;
use crate::application::ports::AudioCachePort;
use crate::domain::{ContentKey, MessageKey};
use crate::infrastructure::adapters::StreamIngestor;
use crate::infrastructure::memory::{InMemoryChunkQueue, MessageAudioBinding};
use crate::infrastructure::worker::{PlaybackScheduler, SegmentAssembler};

fn parse_message_id(raw: &str, field: &str) -> Result<MessageKey, PipelineError> {
    let key = MessageKey::new(raw);
    if key.is_empty() {
        return Err(PipelineError::validation(format!("{} cannot be empty", field)));
    }
    Ok(key)
}

/// Speak Handler - 缓存查找，命中直接播放，未命中打开流式会话
pub struct SpeakHandler {
    cache: Arc<dyn AudioCachePort>,
    binding: Arc<MessageAudioBinding>,
    scheduler: Arc<PlaybackScheduler>,
    assembler: Arc<SegmentAssembler>,
}

impl SpeakHandler {
    pub fn new(
        cache: Arc<dyn AudioCachePort>,
        binding: Arc<MessageAudioBinding>,
        scheduler: Arc<PlaybackScheduler>,
        assembler: Arc<SegmentAssembler>,
    ) -> Self {
        Self {
            cache,
            binding,
            scheduler,
            assembler,
        }
    }

    pub async fn handle(&self, cmd: SpeakCommand) -> Result<SpeakResponse, PipelineError> {
        let raw_id = parse_message_id(&cmd.message_id, "message_id")?;
        if cmd.text.trim().is_empty() {
            return Err(PipelineError::validation("text cannot be empty"));
        }

        let message_id = self.binding.resolve(&raw_id);
        let content_key = ContentKey::compute(&cmd.text, cmd.scope.as_deref());

        if let Some((path, pin)) = self.cache.lookup_pinned(&content_key).await {
            let generation = self.scheduler.play_cached(&message_id, path, pin).await;
            self.assembler.close(&message_id);
            self.binding.unbind_message(&message_id);

            tracing::info!(
                message_id = %message_id,
                key = %content_key,
                generation = generation,
                "Speak served from cache"
            );
            return Ok(SpeakResponse {
                message_id,
                content_key,
                generation,
                source: SpeakSource::Cache,
            });
        }

        self.binding.set_content_key(&message_id, content_key.clone());
        let generation = self.scheduler.open_stream(&message_id).await;
        self.assembler.prepare(&message_id, generation);

        tracing::info!(
            message_id = %message_id,
            key = %content_key,
            generation = generation,
            "Speak waiting for audio stream"
        );
        Ok(SpeakResponse {
            message_id,
            content_key,
            generation,
            source: SpeakSource::Stream,
        })
    }
}

/// Push Events Handler - 传输层事件入队
pub struct PushEventsHandler {
    ingestor: Arc<StreamIngestor>,
}

impl PushEventsHandler {
    pub fn new(ingestor: Arc<StreamIngestor>) -> Self {
        Self { ingestor }
    }

    pub async fn handle(&self, cmd: PushEventsCommand) -> Result<PushEventsResponse, PipelineError> {
        if cmd.events.is_empty() {
            return Err(PipelineError::validation("events cannot be empty"));
        }

        let total = cmd.events.len();
        let stats = self.ingestor.ingest_batch(cmd.events);
        tracing::debug!(
            total = total,
            enqueued = stats.enqueued,
            dropped = stats.dropped,
            "Transport events pushed"
        );
        Ok(stats)
    }
}

/// Bind Message Handler - 注册绑定并迁移已到达的分片与组装状态
pub struct BindMessageHandler {
    binding: Arc<MessageAudioBinding>,
    queue: Arc<InMemoryChunkQueue>,
    assembler: Arc<SegmentAssembler>,
}

impl BindMessageHandler {
    pub fn new(
        binding: Arc<MessageAudioBinding>,
        queue: Arc<InMemoryChunkQueue>,
        assembler: Arc<SegmentAssembler>,
    ) -> Self {
        Self {
            binding,
            queue,
            assembler,
        }
    }

    pub async fn handle(&self, cmd: BindMessageCommand) -> Result<BindMessageResponse, PipelineError> {
        let transport_id = parse_message_id(&cmd.transport_id, "transport_id")?;
        let message_id = parse_message_id(&cmd.message_id, "message_id")?;

        if let Some(previous) = self.binding.bind(&transport_id, &message_id) {
            tracing::warn!(
                transport_id = %transport_id,
                previous = %previous,
                message_id = %message_id,
                "Transport id rebound to a different message"
            );
        }

        let moved_items = self.queue.rekey(&transport_id, &message_id);
        let assembly_moved = self.assembler.rebind(&transport_id, &message_id);

        tracing::info!(
            transport_id = %transport_id,
            message_id = %message_id,
            moved_items = moved_items,
            assembly_moved = assembly_moved,
            "Message bound"
        );

        Ok(BindMessageResponse {
            transport_id,
            message_id,
            moved_items,
            assembly_moved,
        })
    }
}

/// Stop Playback Handler
pub struct StopPlaybackHandler {
    scheduler: Arc<PlaybackScheduler>,
}

impl StopPlaybackHandler {
    pub fn new(scheduler: Arc<PlaybackScheduler>) -> Self {
        Self { scheduler }
    }

    pub async fn handle(&self, _cmd: StopPlaybackCommand) -> Result<StopPlaybackResponse, PipelineError> {
        let active = self.scheduler.active_message().await;
        self.scheduler.stop().await;

        tracing::info!(
            message_id = ?active.as_ref().map(|(id, _)| id.as_str()),
            "Playback stop requested"
        );

        let (message_id, generation) = match active {
            Some((message_id, generation)) => (Some(message_id), Some(generation)),
            None => (None, None),
        };
        Ok(StopPlaybackResponse {
            message_id,
            generation,
        })
    }
}

/// Cancel Message Handler - 放弃一条消息的全部在途工作
pub struct CancelMessageHandler {
    binding: Arc<MessageAudioBinding>,
    queue: Arc<InMemoryChunkQueue>,
    assembler: Arc<SegmentAssembler>,
    scheduler: Arc<PlaybackScheduler>,
}

impl CancelMessageHandler {
    pub fn new(
        binding: Arc<MessageAudioBinding>,
        queue: Arc<InMemoryChunkQueue>,
        assembler: Arc<SegmentAssembler>,
        scheduler: Arc<PlaybackScheduler>,
    ) -> Self {
        Self {
            binding,
            queue,
            assembler,
            scheduler,
        }
    }

    pub async fn handle(&self, cmd: CancelMessageCommand) -> Result<CancelMessageResponse, PipelineError> {
        let raw_id = parse_message_id(&cmd.message_id, "message_id")?;
        let message_id = self.binding.resolve(&raw_id);

        let discarded_items = self.queue.discard(&message_id);
        let assembly_cancelled = self.assembler.cancel(&message_id);

        let playback_stopped = match self.scheduler.active_message().await {
            Some((active, _)) if active == message_id => {
                self.scheduler.stop().await;
                true
            }
            _ => false,
        };
        self.binding.unbind_message(&message_id);

        tracing::info!(
            message_id = %message_id,
            discarded_items = discarded_items,
            assembly_cancelled = assembly_cancelled,
            playback_stopped = playback_stopped,
            "Message cancelled"
        );

        Ok(CancelMessageResponse {
            message_id,
            discarded_items,
            assembly_cancelled,
            playback_stopped,
        })
    }
}
