//! ChatVoice - 聊天消息流式 TTS 音频流水线
//!
//! 架构设计: DDD + CQRS + Hexagonal Architecture
//!
//! 领域层 (domain/):
//! - ContentKey: 内容寻址缓存 key
//! - 分片、片段、播放状态
//!
//! 应用层 (application/):
//! - Ports: 端口定义（AudioCache, AudioDevice, ChunkConsumer）
//! - Commands: 朗读、事件推送、绑定、停止、取消、缓存维护
//! - Queries: 播放状态、缓存统计、缓存音频
//!
//! 基础设施层 (infrastructure/):
//! - Persistence: 磁盘音频缓存 + JSON 索引
//! - Memory: ChunkQueue, MessageAudioBinding
//! - Worker: SegmentAssembler, PlaybackScheduler
//! - Adapters: 播放设备、传输层事件接入
//! - Events: 播放事件广播
//! - HTTP: RESTful API + WebSocket
//! - Pipeline: 组件装配

pub mod application;
pub mod config;
pub mod domain;
pub mod infrastructure;

pub use config::{load_config, AppConfig};
