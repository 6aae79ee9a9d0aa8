//! Memory Layer - In-Memory State Management
//!
//! 分片队列和消息绑定表的内存实现

mod chunk_queue;
mod message_binding;

pub use chunk_queue::{DrainState, InMemoryChunkQueue};
pub use message_binding::MessageAudioBinding;
