//! Cache Commands - 缓存维护命令

use std::time::Duration;

/// 清空缓存命令
#[derive(Debug, Clone, Default)]
pub struct ClearCacheCommand;

/// 淘汰命令
///
/// 各项为 None 时使用配置中的策略
#[derive(Debug, Clone, Default)]
pub struct EvictCacheCommand {
    pub max_entries: Option<usize>,
    pub max_age: Option<Duration>,
    pub max_size_bytes: Option<u64>,
}

impl EvictCacheCommand {
    pub fn has_overrides(&self) -> bool {
        self.max_entries.is_some() || self.max_age.is_some() || self.max_size_bytes.is_some()
    }
}
