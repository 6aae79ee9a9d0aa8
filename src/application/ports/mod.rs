//! Application Ports - 出站端口定义
//!
//! 定义应用层与基础设施层的抽象接口

mod audio_cache;
mod audio_device;
mod chunk_consumer;

pub use audio_cache::{
    AudioCachePort, CacheError, CachePin, CacheStats, EvictionPolicy, EvictionReport, PinTable,
};
pub use audio_device::{AudioDevicePort, DeviceError};
pub use chunk_consumer::ChunkConsumerPort;
