//! Cache Command Handlers

use std::sync::Arc;

use crate::application::commands::cache_commands::*;
use crate::application::error::PipelineError;
use crate::application::ports::{AudioCachePort, EvictionPolicy, EvictionReport};

/// Clear Cache Handler
pub struct ClearCacheHandler {
    cache: Arc<dyn AudioCachePort>,
}

impl ClearCacheHandler {
    pub fn new(cache: Arc<dyn AudioCachePort>) -> Self {
        Self { cache }
    }

    pub async fn handle(&self, _cmd: ClearCacheCommand) -> Result<EvictionReport, PipelineError> {
        let report = self.cache.clear().await?;
        tracing::info!(
            removed_entries = report.removed_entries,
            freed_bytes = report.freed_bytes,
            skipped_pinned = report.skipped_pinned,
            "Cache cleared"
        );
        Ok(report)
    }
}

/// Evict Cache Handler - 按请求或配置中的策略淘汰
pub struct EvictCacheHandler {
    cache: Arc<dyn AudioCachePort>,
    default_policy: EvictionPolicy,
}

impl EvictCacheHandler {
    pub fn new(cache: Arc<dyn AudioCachePort>, default_policy: EvictionPolicy) -> Self {
        Self {
            cache,
            default_policy,
        }
    }

    pub async fn handle(&self, cmd: EvictCacheCommand) -> Result<EvictionReport, PipelineError> {
        let policy = if cmd.has_overrides() {
            EvictionPolicy {
                max_entries: cmd.max_entries,
                max_age: cmd.max_age,
                max_size_bytes: cmd.max_size_bytes,
            }
        } else {
            self.default_policy.clone()
        };

        let report = self.cache.evict(&policy).await?;
        tracing::info!(
            removed_entries = report.removed_entries,
            freed_bytes = report.freed_bytes,
            skipped_pinned = report.skipped_pinned,
            "Cache evicted"
        );
        Ok(report)
    }
}
