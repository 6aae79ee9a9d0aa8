//! File-based Content-Addressed Audio Cache
//!
//! 目录布局:
//! - `<key>.<ext>`  每个条目一个文件
//! - `index.json`   条目索引，每次变更后原子重写
//! - `.tmp-*`       store 过程中的临时文件，启动时清理

use async_trait::async_trait;
use chrono::Utc;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;
use uuid::Uuid;

use super::index::{entry_path, CacheIndex, IndexEntry, INDEX_FILE_NAME};
use crate::application::ports::{
    AudioCachePort, CacheError, CachePin, CacheStats, EvictionPolicy, EvictionReport, PinTable,
};
use crate::domain::ContentKey;

/// 没有扩展名的源文件使用的默认扩展名
const DEFAULT_EXTENSION: &str = "audio";

/// 临时文件前缀
const TMP_PREFIX: &str = ".tmp-";

/// 文件缓存配置
#[derive(Debug, Clone)]
pub struct FileCacheConfig {
    /// 缓存目录
    pub dir: PathBuf,
    /// 每次 store 后按此策略淘汰，None 表示不自动淘汰
    pub evict_on_store: Option<EvictionPolicy>,
}

impl Default for FileCacheConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("data/audio_cache"),
            evict_on_store: None,
        }
    }
}

/// 文件音频缓存
pub struct FileAudioCache {
    dir: PathBuf,
    /// 索引变更锁，所有修改 index 的操作都在锁内完成
    index: Mutex<CacheIndex>,
    pins: Arc<PinTable>,
    evict_on_store: Option<EvictionPolicy>,
    hit_count: AtomicU64,
    miss_count: AtomicU64,
}

impl FileAudioCache {
    /// 打开缓存目录
    ///
    /// 索引缺失或损坏时从目录扫描重建，同时清理残留的临时文件
    pub async fn open(config: FileCacheConfig) -> Result<Self, CacheError> {
        tokio::fs::create_dir_all(&config.dir).await?;

        let swept = sweep_tmp_files(&config.dir).await;

        let index = match CacheIndex::load(&config.dir).await {
            Ok(Some(index)) => index,
            Ok(None) => {
                tracing::info!(dir = %config.dir.display(), "Cache index missing, rebuilding from directory");
                let index = CacheIndex::rebuild(&config.dir).await?;
                index.persist(&config.dir).await?;
                index
            }
            Err(CacheError::CorruptIndex(reason)) => {
                tracing::warn!(
                    dir = %config.dir.display(),
                    reason = %reason,
                    "Cache index corrupt, rebuilding from directory"
                );
                let index = CacheIndex::rebuild(&config.dir).await?;
                index.persist(&config.dir).await?;
                index
            }
            Err(e) => return Err(e),
        };

        tracing::info!(
            dir = %config.dir.display(),
            entries = index.entries.len(),
            total_bytes = index.total_bytes(),
            swept_tmp_files = swept,
            "FileAudioCache opened"
        );

        Ok(Self {
            dir: config.dir,
            index: Mutex::new(index),
            pins: PinTable::new(),
            evict_on_store: config.evict_on_store,
            hit_count: AtomicU64::new(0),
            miss_count: AtomicU64::new(0),
        })
    }

    pub fn arc(self) -> Arc<Self> {
        Arc::new(self)
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// 持久化索引；失败只记录日志（用于 lookup 这类不能失败的路径）
    async fn persist_quietly(&self, index: &CacheIndex) {
        if let Err(e) = index.persist(&self.dir).await {
            tracing::warn!(dir = %self.dir.display(), error = %e, "Failed to persist cache index");
        }
    }

    /// 在索引锁内执行淘汰
    ///
    /// 先按年龄淘汰，再按 LRU 顺序淘汰直到满足条目数和总大小限制
    async fn evict_locked(
        &self,
        index: &mut CacheIndex,
        policy: &EvictionPolicy,
    ) -> Result<EvictionReport, CacheError> {
        let mut report = EvictionReport::default();
        if policy.is_unbounded() {
            return Ok(report);
        }

        let mut victims: Vec<ContentKey> = Vec::new();

        if let Some(max_age) = policy.max_age {
            let now = Utc::now();
            for (key, entry) in index.entries.iter() {
                let expired = now
                    .signed_duration_since(entry.last_accessed)
                    .to_std()
                    .map(|age| age > max_age)
                    .unwrap_or(false);
                if expired {
                    if self.pins.is_pinned(key) {
                        report.skipped_pinned += 1;
                    } else {
                        victims.push(key.clone());
                    }
                }
            }
        }

        // 剩余条目按最后访问时间从旧到新排列
        let mut remaining: Vec<(&ContentKey, &IndexEntry)> = index
            .entries
            .iter()
            .filter(|(key, _)| !victims.contains(key))
            .collect();
        remaining.sort_by_key(|(_, entry)| entry.last_accessed);

        let mut count = remaining.len();
        let mut total: u64 = remaining.iter().map(|(_, e)| e.size_bytes).sum();
        let over = |count: usize, total: u64| {
            policy.max_entries.map(|max| count > max).unwrap_or(false)
                || policy.max_size_bytes.map(|max| total > max).unwrap_or(false)
        };

        let mut lru_victims = Vec::new();
        for (key, entry) in remaining {
            if !over(count, total) {
                break;
            }
            if self.pins.is_pinned(key) {
                report.skipped_pinned += 1;
                continue;
            }
            count -= 1;
            total -= entry.size_bytes;
            lru_victims.push(key.clone());
        }
        victims.extend(lru_victims);

        for key in victims {
            if let Some(entry) = index.entries.remove(&key) {
                remove_entry_file(&entry_path(&self.dir, &entry)).await;
                report.removed_entries += 1;
                report.freed_bytes += entry.size_bytes;
                tracing::debug!(key = %key, size_bytes = entry.size_bytes, "Evicted cache entry");
            }
        }

        if report.removed_entries > 0 {
            index.persist(&self.dir).await?;
        }

        Ok(report)
    }
}

#[async_trait]
impl AudioCachePort for FileAudioCache {
    async fn lookup(&self, key: &ContentKey) -> Option<PathBuf> {
        let mut index = self.index.lock().await;

        let path = match index.entries.get(key) {
            Some(entry) => entry_path(&self.dir, entry),
            None => {
                self.miss_count.fetch_add(1, Ordering::Relaxed);
                return None;
            }
        };

        let exists = tokio::fs::try_exists(&path).await.unwrap_or(false);
        if !exists {
            index.entries.remove(key);
            tracing::warn!(key = %key, path = %path.display(), "Cache file missing, pruning stale entry");
            self.persist_quietly(&index).await;
            self.miss_count.fetch_add(1, Ordering::Relaxed);
            return None;
        }

        if let Some(entry) = index.entries.get_mut(key) {
            entry.last_accessed = Utc::now();
        }
        self.persist_quietly(&index).await;
        self.hit_count.fetch_add(1, Ordering::Relaxed);

        tracing::debug!(key = %key, "Cache hit");
        Some(path)
    }

    async fn store(&self, key: &ContentKey, source: &Path) -> Result<PathBuf, CacheError> {
        if !tokio::fs::try_exists(source).await.unwrap_or(false) {
            return Err(CacheError::SourceNotFound(source.display().to_string()));
        }

        // 拷贝在锁外进行，多个 store 可以并行
        tokio::fs::create_dir_all(&self.dir).await?;
        let tmp_path = self.dir.join(format!("{}{}", TMP_PREFIX, Uuid::new_v4()));
        let size_bytes = match tokio::fs::copy(source, &tmp_path).await {
            Ok(size) => size,
            Err(e) => {
                let _ = tokio::fs::remove_file(&tmp_path).await;
                return Err(e.into());
            }
        };

        let extension = source
            .extension()
            .and_then(|ext| ext.to_str())
            .filter(|ext| !ext.is_empty())
            .unwrap_or(DEFAULT_EXTENSION);
        let file_name = format!("{}.{}", key, extension);
        let final_path = self.dir.join(&file_name);

        let mut index = self.index.lock().await;

        // 目录可能在拷贝期间被外部删除
        tokio::fs::create_dir_all(&self.dir).await?;
        if let Err(e) = tokio::fs::rename(&tmp_path, &final_path).await {
            let _ = tokio::fs::remove_file(&tmp_path).await;
            return Err(e.into());
        }

        let previous = index
            .entries
            .insert(key.clone(), IndexEntry::new(file_name.clone(), size_bytes));
        if let Some(previous) = previous {
            if previous.path != file_name {
                remove_entry_file(&entry_path(&self.dir, &previous)).await;
            }
        }

        index.persist(&self.dir).await?;

        tracing::info!(key = %key, size_bytes = size_bytes, path = %final_path.display(), "Stored audio in cache");

        if let Some(policy) = &self.evict_on_store {
            // 刚写入的条目不参与本次淘汰
            let _guard = self.pins.pin(key);
            match self.evict_locked(&mut index, policy).await {
                Ok(report) if report.removed_entries > 0 => {
                    tracing::info!(
                        removed_entries = report.removed_entries,
                        freed_bytes = report.freed_bytes,
                        "Evicted cache entries after store"
                    );
                }
                Ok(_) => {}
                Err(e) => tracing::warn!(error = %e, "Eviction after store failed"),
            }
        }

        Ok(final_path)
    }

    async fn evict(&self, policy: &EvictionPolicy) -> Result<EvictionReport, CacheError> {
        let mut index = self.index.lock().await;
        let report = self.evict_locked(&mut index, policy).await?;

        tracing::info!(
            removed_entries = report.removed_entries,
            freed_bytes = report.freed_bytes,
            skipped_pinned = report.skipped_pinned,
            "Cache eviction finished"
        );
        Ok(report)
    }

    async fn stats(&self) -> Result<CacheStats, CacheError> {
        let indexed_entries = self.index.lock().await.entries.len();

        let mut file_count = 0u64;
        let mut total_bytes = 0u64;
        match tokio::fs::read_dir(&self.dir).await {
            Ok(mut read_dir) => {
                while let Some(dir_entry) = read_dir.next_entry().await? {
                    let name = dir_entry.file_name().to_string_lossy().to_string();
                    if name == INDEX_FILE_NAME || name.starts_with('.') {
                        continue;
                    }
                    let metadata = dir_entry.metadata().await?;
                    if metadata.is_file() {
                        file_count += 1;
                        total_bytes += metadata.len();
                    }
                }
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }

        Ok(CacheStats {
            file_count,
            total_bytes,
            indexed_entries,
            hit_count: self.hit_count.load(Ordering::Relaxed),
            miss_count: self.miss_count.load(Ordering::Relaxed),
        })
    }

    async fn clear(&self) -> Result<EvictionReport, CacheError> {
        let mut index = self.index.lock().await;
        let mut report = EvictionReport::default();

        let keys: Vec<ContentKey> = index.entries.keys().cloned().collect();
        for key in keys {
            if self.pins.is_pinned(&key) {
                report.skipped_pinned += 1;
                continue;
            }
            if let Some(entry) = index.entries.remove(&key) {
                remove_entry_file(&entry_path(&self.dir, &entry)).await;
                report.removed_entries += 1;
                report.freed_bytes += entry.size_bytes;
            }
        }

        index.persist(&self.dir).await?;

        tracing::info!(
            removed_entries = report.removed_entries,
            freed_bytes = report.freed_bytes,
            skipped_pinned = report.skipped_pinned,
            "Cache cleared"
        );
        Ok(report)
    }

    fn pin(&self, key: &ContentKey) -> CachePin {
        self.pins.pin(key)
    }
}

async fn remove_entry_file(path: &Path) {
    match tokio::fs::remove_file(path).await {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => tracing::warn!(path = %path.display(), error = %e, "Failed to remove cache file"),
    }
}

/// 清理上次运行残留的临时文件，返回清理数量
async fn sweep_tmp_files(dir: &Path) -> usize {
    let Ok(mut read_dir) = tokio::fs::read_dir(dir).await else {
        return 0;
    };

    let mut swept = 0;
    while let Ok(Some(dir_entry)) = read_dir.next_entry().await {
        let name = dir_entry.file_name().to_string_lossy().to_string();
        let is_tmp = name.starts_with(TMP_PREFIX) || name == format!("{}.tmp", INDEX_FILE_NAME);
        if is_tmp && tokio::fs::remove_file(dir_entry.path()).await.is_ok() {
            swept += 1;
        }
    }
    swept
}
