//! Application State
//!
//! 包含所有 Command/Query Handlers 的应用状态

use std::sync::Arc;

use crate::application::{
    // Command handlers
    BindMessageHandler, CancelMessageHandler, ClearCacheHandler, EvictCacheHandler,
    PushEventsHandler, SpeakHandler, StopPlaybackHandler,
    // Query handlers
    GetCacheStatsHandler, GetCachedAudioHandler, GetPlaybackStateHandler,
    // Ports
    AudioCachePort,
};
use crate::infrastructure::events::EventPublisher;
use crate::infrastructure::pipeline::Pipeline;

/// 应用状态
pub struct AppState {
    // ========== Ports ==========
    pub audio_cache: Arc<dyn AudioCachePort>,
    pub event_publisher: Arc<EventPublisher>,

    // ========== Command Handlers ==========
    pub speak_handler: SpeakHandler,
    pub push_events_handler: PushEventsHandler,
    pub bind_message_handler: BindMessageHandler,
    pub stop_playback_handler: StopPlaybackHandler,
    pub cancel_message_handler: CancelMessageHandler,
    pub clear_cache_handler: ClearCacheHandler,
    pub evict_cache_handler: EvictCacheHandler,

    // ========== Query Handlers ==========
    pub get_playback_state_handler: GetPlaybackStateHandler,
    pub get_cache_stats_handler: GetCacheStatsHandler,
    pub get_cached_audio_handler: GetCachedAudioHandler,
}

impl AppState {
    /// 从装配好的流水线创建应用状态
    pub fn new(pipeline: &Pipeline) -> Self {
        let audio_cache: Arc<dyn AudioCachePort> = pipeline.cache.clone();
        let event_publisher = pipeline.events.clone();

        Self {
            // Ports
            audio_cache: audio_cache.clone(),
            event_publisher: event_publisher.clone(),

            // Command handlers
            speak_handler: SpeakHandler::new(
                audio_cache.clone(),
                pipeline.binding.clone(),
                pipeline.scheduler.clone(),
                pipeline.assembler.clone(),
            ),
            push_events_handler: PushEventsHandler::new(pipeline.ingestor.clone()),
            bind_message_handler: BindMessageHandler::new(
                pipeline.binding.clone(),
                pipeline.queue.clone(),
                pipeline.assembler.clone(),
            ),
            stop_playback_handler: StopPlaybackHandler::new(pipeline.scheduler.clone()),
            cancel_message_handler: CancelMessageHandler::new(
                pipeline.binding.clone(),
                pipeline.queue.clone(),
                pipeline.assembler.clone(),
                pipeline.scheduler.clone(),
            ),
            clear_cache_handler: ClearCacheHandler::new(audio_cache.clone()),
            evict_cache_handler: EvictCacheHandler::new(
                audio_cache.clone(),
                pipeline.eviction.clone(),
            ),

            // Query handlers
            get_playback_state_handler: GetPlaybackStateHandler::new(event_publisher.clone()),
            get_cache_stats_handler: GetCacheStatsHandler::new(audio_cache.clone()),
            get_cached_audio_handler: GetCachedAudioHandler::new(audio_cache.clone()),
        }
    }
}
