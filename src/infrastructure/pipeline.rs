//! Pipeline - 组件装配
//!
//! 缓存 → 播放调度 → 片段组装 → 分片队列 → 传输接入，
//! 以及空闲检测和定期淘汰两个后台任务

use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::application::error::PipelineError;
use crate::application::ports::{AudioCachePort, AudioDevicePort, EvictionPolicy};
use crate::config::AppConfig;
use crate::infrastructure::adapters::StreamIngestor;
use crate::infrastructure::events::EventPublisher;
use crate::infrastructure::memory::{InMemoryChunkQueue, MessageAudioBinding};
use crate::infrastructure::persistence::{FileAudioCache, FileCacheConfig};
use crate::infrastructure::worker::{PlaybackScheduler, SegmentAssembler, SegmentAssemblerConfig};

/// Pipeline 配置
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub cache: FileCacheConfig,
    pub assembler: SegmentAssemblerConfig,
    /// 定期淘汰和手动淘汰使用的策略
    pub eviction: EvictionPolicy,
    /// None 表示不做定期淘汰
    pub evict_interval: Option<Duration>,
    pub watchdog_interval: Duration,
}

impl From<&AppConfig> for PipelineConfig {
    fn from(config: &AppConfig) -> Self {
        let eviction = EvictionPolicy {
            max_entries: (config.cache.max_entries > 0).then_some(config.cache.max_entries),
            max_age: (config.cache.max_age_secs > 0)
                .then(|| Duration::from_secs(config.cache.max_age_secs)),
            max_size_bytes: (config.cache.max_size_bytes > 0)
                .then_some(config.cache.max_size_bytes),
        };

        Self {
            cache: FileCacheConfig {
                dir: config.cache.dir.clone(),
                evict_on_store: config.cache.evict_on_store.then(|| eviction.clone()),
            },
            assembler: SegmentAssemblerConfig {
                segment_threshold: config.assembler.segment_threshold,
                idle_timeout: Duration::from_millis(config.assembler.idle_timeout_ms),
                work_dir: config.assembler.work_dir.clone(),
                audio_extension: config.assembler.audio_extension.trim().to_string(),
            },
            evict_interval: (config.cache.evict_interval_secs > 0)
                .then(|| Duration::from_secs(config.cache.evict_interval_secs)),
            eviction,
            watchdog_interval: Duration::from_millis(config.assembler.watchdog_interval_ms),
        }
    }
}

/// 装配好的流水线
pub struct Pipeline {
    pub cache: Arc<FileAudioCache>,
    pub device: Arc<dyn AudioDevicePort>,
    pub events: Arc<EventPublisher>,
    pub binding: Arc<MessageAudioBinding>,
    pub scheduler: Arc<PlaybackScheduler>,
    pub assembler: Arc<SegmentAssembler>,
    pub queue: Arc<InMemoryChunkQueue>,
    pub ingestor: Arc<StreamIngestor>,
    pub eviction: EvictionPolicy,
    evict_interval: Option<Duration>,
    watchdog_interval: Duration,
}

impl Pipeline {
    /// 打开缓存、清理片段目录并装配所有组件
    pub async fn build(
        config: PipelineConfig,
        device: Arc<dyn AudioDevicePort>,
    ) -> Result<Self, PipelineError> {
        let cache = FileAudioCache::open(config.cache).await?.arc();
        let events = EventPublisher::new().arc();
        let binding = MessageAudioBinding::new().arc();

        let scheduler = PlaybackScheduler::new(device.clone(), events.clone()).arc();

        let assembler = SegmentAssembler::new(
            config.assembler,
            scheduler.clone(),
            cache.clone(),
            binding.clone(),
            events.clone(),
        );
        assembler
            .sweep_work_dir()
            .await
            .map_err(|e| PipelineError::internal(format!("Failed to prepare segment directory: {}", e)))?;

        let queue = InMemoryChunkQueue::new(assembler.clone()).arc();
        let ingestor = StreamIngestor::new(queue.clone(), binding.clone()).arc();

        tracing::info!(device = device.name(), "Pipeline assembled");

        Ok(Self {
            cache,
            device,
            events,
            binding,
            scheduler,
            assembler,
            queue,
            ingestor,
            eviction: config.eviction,
            evict_interval: config.evict_interval,
            watchdog_interval: config.watchdog_interval,
        })
    }

    /// 启动后台任务，token 取消后全部退出
    pub fn spawn_background(&self, shutdown: CancellationToken) -> Vec<JoinHandle<()>> {
        let mut handles = Vec::new();

        let assembler = self.assembler.clone();
        let interval = self.watchdog_interval;
        let token = shutdown.clone();
        handles.push(tokio::spawn(async move {
            assembler.run_idle_watchdog(interval, token).await;
        }));

        if let Some(interval) = self.evict_interval {
            let cache = self.cache.clone();
            let policy = self.eviction.clone();
            handles.push(tokio::spawn(async move {
                run_periodic_eviction(cache, policy, interval, shutdown).await;
            }));
        }

        handles
    }

    /// 停止播放（进程退出前调用）
    pub async fn shutdown(&self) {
        self.scheduler.stop().await;
        tracing::info!("Pipeline shut down");
    }
}

async fn run_periodic_eviction(
    cache: Arc<FileAudioCache>,
    policy: EvictionPolicy,
    interval: Duration,
    shutdown: CancellationToken,
) {
    tracing::info!(interval_secs = interval.as_secs(), "Periodic cache eviction started");
    let mut ticker = tokio::time::interval(interval);
    // 第一次 tick 立即触发，跳过
    ticker.tick().await;

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = ticker.tick() => {
                if let Err(e) = cache.evict(&policy).await {
                    tracing::warn!(error = %e, "Periodic cache eviction failed");
                }
            }
        }
    }
    tracing::info!("Periodic cache eviction stopped");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_zero_limits_mean_unbounded() {
        let mut config = AppConfig::default();
        config.cache.max_entries = 0;
        config.cache.max_age_secs = 0;
        config.cache.max_size_bytes = 0;
        config.cache.evict_interval_secs = 0;

        let pipeline_config = PipelineConfig::from(&config);
        assert!(pipeline_config.eviction.is_unbounded());
        assert!(pipeline_config.evict_interval.is_none());
    }

    #[test]
    fn test_default_config_conversion() {
        let pipeline_config = PipelineConfig::from(&AppConfig::default());
        assert_eq!(pipeline_config.assembler.segment_threshold, 10);
        assert_eq!(pipeline_config.eviction.max_entries, Some(500));
        assert!(pipeline_config.cache.evict_on_store.is_some());
    }
}
