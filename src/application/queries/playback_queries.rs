//! Playback Queries - 播放状态查询

/// 当前播放状态查询
#[derive(Debug, Clone, Default)]
pub struct GetPlaybackStateQuery;
