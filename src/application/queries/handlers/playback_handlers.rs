//! Playback Query Handlers

use std::sync::Arc;

use crate::application::error::PipelineError;
use crate::application::queries::playback_queries::GetPlaybackStateQuery;
use crate::infrastructure::events::{EventPublisher, PlaybackSnapshot};

/// GetPlaybackState Handler - 读取最近一次状态快照
pub struct GetPlaybackStateHandler {
    events: Arc<EventPublisher>,
}

impl GetPlaybackStateHandler {
    pub fn new(events: Arc<EventPublisher>) -> Self {
        Self { events }
    }

    pub async fn handle(&self, _query: GetPlaybackStateQuery) -> Result<PlaybackSnapshot, PipelineError> {
        Ok(self.events.current())
    }
}
