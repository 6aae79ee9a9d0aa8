//! Audio Cache Port - 音频缓存管理
//!
//! 定义内容寻址音频缓存的抽象接口，具体实现为磁盘目录 + JSON 索引

use async_trait::async_trait;
use dashmap::DashMap;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

use crate::domain::ContentKey;

/// Audio Cache 错误
#[derive(Debug, Error)]
pub enum CacheError {
    #[error("Source file not found: {0}")]
    SourceNotFound(String),

    #[error("Serialization error: {0}")]
    SerializationError(String),

    #[error("IO error: {0}")]
    IoError(String),

    #[error("Corrupt cache index: {0}")]
    CorruptIndex(String),
}

impl From<std::io::Error> for CacheError {
    fn from(err: std::io::Error) -> Self {
        CacheError::IoError(err.to_string())
    }
}

/// 淘汰策略
///
/// 每项为 None 表示不限制
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EvictionPolicy {
    /// 最大条目数
    pub max_entries: Option<usize>,
    /// 最长未访问时间
    pub max_age: Option<Duration>,
    /// 最大总字节数
    pub max_size_bytes: Option<u64>,
}

impl EvictionPolicy {
    pub fn is_unbounded(&self) -> bool {
        self.max_entries.is_none() && self.max_age.is_none() && self.max_size_bytes.is_none()
    }
}

/// 淘汰结果
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct EvictionReport {
    /// 删除的条目数
    pub removed_entries: usize,
    /// 释放的空间（字节）
    pub freed_bytes: u64,
    /// 因正在播放而跳过的条目数
    pub skipped_pinned: usize,
}

/// 缓存统计信息
#[derive(Debug, Clone, Default, Serialize)]
pub struct CacheStats {
    /// 缓存目录中的音频文件数
    pub file_count: u64,
    /// 音频文件总字节数
    pub total_bytes: u64,
    /// 索引中的条目数
    pub indexed_entries: usize,
    pub hit_count: u64,
    pub miss_count: u64,
}

/// 播放中的缓存条目引用计数
#[derive(Debug, Default)]
pub struct PinTable {
    pins: DashMap<ContentKey, usize>,
}

impl PinTable {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// 固定一个条目，返回的 guard 释放时解除
    pub fn pin(self: &Arc<Self>, key: &ContentKey) -> CachePin {
        *self.pins.entry(key.clone()).or_insert(0) += 1;
        CachePin {
            table: Arc::clone(self),
            key: key.clone(),
        }
    }

    pub fn is_pinned(&self, key: &ContentKey) -> bool {
        self.pins.get(key).map(|count| *count > 0).unwrap_or(false)
    }
}

/// 缓存条目固定 guard
#[derive(Debug)]
pub struct CachePin {
    table: Arc<PinTable>,
    key: ContentKey,
}

impl CachePin {
    pub fn key(&self) -> &ContentKey {
        &self.key
    }
}

impl Drop for CachePin {
    fn drop(&mut self) {
        if let Some(mut count) = self.table.pins.get_mut(&self.key) {
            *count = count.saturating_sub(1);
        }
        self.table.pins.remove_if(&self.key, |_, count| *count == 0);
    }
}

/// Audio Cache Port
///
/// 以 ContentKey 为唯一身份的磁盘缓存
/// - 每个条目一个文件，文件名由 key 派生
/// - 索引在每次变更后原子重写（写临时文件再 rename）
#[async_trait]
pub trait AudioCachePort: Send + Sync {
    /// 查找缓存文件
    ///
    /// 仅当索引有条目且文件仍在磁盘上时返回路径；否则删除过期条目并返回 None
    async fn lookup(&self, key: &ContentKey) -> Option<PathBuf>;

    /// 把源文件存入缓存，返回缓存中的规范路径
    ///
    /// 源文件保持不变，由调用方负责清理
    async fn store(&self, key: &ContentKey, source: &Path) -> Result<PathBuf, CacheError>;

    /// 按策略淘汰条目，跳过被固定的条目
    async fn evict(&self, policy: &EvictionPolicy) -> Result<EvictionReport, CacheError>;

    /// 获取缓存统计信息
    async fn stats(&self) -> Result<CacheStats, CacheError>;

    /// 清空缓存（被固定的条目保留）
    async fn clear(&self) -> Result<EvictionReport, CacheError>;

    /// 在播放会话期间固定条目
    fn pin(&self, key: &ContentKey) -> CachePin;

    /// 先固定再查找
    ///
    /// 返回的路径在 pin 释放前不会被 evict/clear 删除
    async fn lookup_pinned(&self, key: &ContentKey) -> Option<(PathBuf, CachePin)> {
        let pin = self.pin(key);
        let path = self.lookup(key).await?;
        Some((path, pin))
    }
}
