//! File Cache - 目录 + JSON 索引的内容寻址音频缓存

mod audio_cache;
mod index;

pub use audio_cache::{FileAudioCache, FileCacheConfig};
pub use index::{CacheIndex, IndexEntry, INDEX_FILE_NAME};
