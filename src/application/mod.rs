//! 应用层 - 用例编排
//!
//! 包含：
//! - ports: 六边形架构端口定义（AudioCache、AudioDevice、ChunkConsumer）
//! - commands: CQRS 命令及处理器
//! - queries: CQRS 查询及处理器
//! - error: 应用层错误定义

pub mod commands;
pub mod error;
pub mod ports;
pub mod queries;

// Re-exports
pub use commands::{
    // TTS commands
    BindMessageCommand,
    BindMessageResponse,
    CancelMessageCommand,
    CancelMessageResponse,
    PushEventsCommand,
    PushEventsResponse,
    SpeakCommand,
    SpeakResponse,
    SpeakSource,
    StopPlaybackCommand,
    StopPlaybackResponse,
    // Cache commands
    ClearCacheCommand,
    EvictCacheCommand,
    // Handlers
    handlers::{
        BindMessageHandler, CancelMessageHandler, ClearCacheHandler, EvictCacheHandler,
        PushEventsHandler, SpeakHandler, StopPlaybackHandler,
    },
};

pub use error::PipelineError;

pub use ports::{
    // Audio cache
    AudioCachePort,
    CacheError,
    CachePin,
    CacheStats,
    EvictionPolicy,
    EvictionReport,
    PinTable,
    // Audio device
    AudioDevicePort,
    DeviceError,
    // Chunk consumer
    ChunkConsumerPort,
};

pub use queries::{
    // Cache queries
    GetCacheStatsQuery,
    GetCachedAudioQuery,
    GetCachedAudioResponse,
    // Playback queries
    GetPlaybackStateQuery,
    // Handlers
    handlers::{GetCacheStatsHandler, GetCachedAudioHandler, GetPlaybackStateHandler},
};
