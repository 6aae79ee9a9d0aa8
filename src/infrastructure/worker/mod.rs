//! Worker Layer - Background Stream Processing
//!
//! - SegmentAssembler: 分片 → 片段文件 → 缓存
//! - PlaybackScheduler: 片段 → 播放设备

mod playback_scheduler;
mod segment_assembler;

pub use playback_scheduler::PlaybackScheduler;
pub use segment_assembler::{BuildOutcome, BuildState, SegmentAssembler, SegmentAssemblerConfig};
