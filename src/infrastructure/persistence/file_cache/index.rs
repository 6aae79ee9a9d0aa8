//! Cache Index - 缓存索引（index.json）
//!
//! 未知字段通过 `#[serde(flatten)]` 原样保留，新版本写入的索引旧版本也能读

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::application::ports::CacheError;
use crate::domain::ContentKey;

/// 索引文件名
pub const INDEX_FILE_NAME: &str = "index.json";

/// 当前索引格式版本
pub const INDEX_VERSION: u32 = 1;

/// 单个缓存条目
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexEntry {
    /// 相对缓存目录的文件名
    pub path: String,
    pub size_bytes: u64,
    pub created_at: DateTime<Utc>,
    pub last_accessed: DateTime<Utc>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl IndexEntry {
    pub fn new(file_name: String, size_bytes: u64) -> Self {
        let now = Utc::now();
        Self {
            path: file_name,
            size_bytes,
            created_at: now,
            last_accessed: now,
            extra: Map::new(),
        }
    }
}

/// 持久化的缓存索引
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheIndex {
    #[serde(default = "default_version")]
    pub version: u32,
    #[serde(default)]
    pub entries: BTreeMap<ContentKey, IndexEntry>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

fn default_version() -> u32 {
    INDEX_VERSION
}

impl Default for CacheIndex {
    fn default() -> Self {
        Self {
            version: INDEX_VERSION,
            entries: BTreeMap::new(),
            extra: Map::new(),
        }
    }
}

impl CacheIndex {
    /// 读取索引文件
    ///
    /// 文件不存在返回 Ok(None)，内容无法解析返回 CorruptIndex
    pub async fn load(dir: &Path) -> Result<Option<Self>, CacheError> {
        let path = dir.join(INDEX_FILE_NAME);
        let bytes = match tokio::fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(CacheError::IoError(e.to_string())),
        };

        serde_json::from_slice(&bytes)
            .map(Some)
            .map_err(|e| CacheError::CorruptIndex(e.to_string()))
    }

    /// 原子写入索引：先写临时文件再 rename
    pub async fn persist(&self, dir: &Path) -> Result<(), CacheError> {
        tokio::fs::create_dir_all(dir).await?;

        let json = serde_json::to_vec_pretty(self)
            .map_err(|e| CacheError::SerializationError(e.to_string()))?;

        let tmp_path = dir.join(format!("{}.tmp", INDEX_FILE_NAME));
        tokio::fs::write(&tmp_path, json).await?;
        tokio::fs::rename(&tmp_path, dir.join(INDEX_FILE_NAME)).await?;
        Ok(())
    }

    /// 从目录扫描重建索引
    ///
    /// 只收录文件名形如 `<key>.<ext>` 的文件
    pub async fn rebuild(dir: &Path) -> Result<Self, CacheError> {
        let mut index = Self::default();

        let mut read_dir = match tokio::fs::read_dir(dir).await {
            Ok(read_dir) => read_dir,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(index),
            Err(e) => return Err(CacheError::IoError(e.to_string())),
        };

        while let Some(dir_entry) = read_dir.next_entry().await? {
            let path = dir_entry.path();
            let Some(key) = key_from_file_name(&path) else {
                continue;
            };
            let metadata = dir_entry.metadata().await?;
            if !metadata.is_file() {
                continue;
            }

            let file_name = dir_entry.file_name().to_string_lossy().to_string();
            let mut entry = IndexEntry::new(file_name, metadata.len());
            if let Ok(modified) = metadata.modified() {
                let modified: DateTime<Utc> = modified.into();
                entry.created_at = modified;
                entry.last_accessed = modified;
            }
            index.entries.insert(key, entry);
        }

        Ok(index)
    }

    pub fn total_bytes(&self) -> u64 {
        self.entries.values().map(|e| e.size_bytes).sum()
    }
}

/// 缓存文件的完整路径
pub fn entry_path(dir: &Path, entry: &IndexEntry) -> PathBuf {
    dir.join(&entry.path)
}

/// 解析 `<key>.<ext>` 形式的文件名
fn key_from_file_name(path: &Path) -> Option<ContentKey> {
    path.extension()?;
    let stem = path.file_stem()?.to_str()?;
    ContentKey::parse(stem)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn test_unknown_fields_survive_rewrite() {
        let dir = tempdir().unwrap();
        let key = ContentKey::compute("hello", None);
        let raw = serde_json::json!({
            "version": 1,
            "writer": "newer-build",
            "entries": {
                key.as_str(): {
                    "path": format!("{}.mp3", key),
                    "size_bytes": 3,
                    "created_at": "2024-01-01T00:00:00Z",
                    "last_accessed": "2024-01-01T00:00:00Z",
                    "duration_ms": 1200
                }
            }
        });
        std::fs::write(dir.path().join(INDEX_FILE_NAME), raw.to_string()).unwrap();

        let index = CacheIndex::load(dir.path()).await.unwrap().unwrap();
        index.persist(dir.path()).await.unwrap();

        let written: Value =
            serde_json::from_slice(&std::fs::read(dir.path().join(INDEX_FILE_NAME)).unwrap())
                .unwrap();
        assert_eq!(written["writer"], "newer-build");
        assert_eq!(written["entries"][key.as_str()]["duration_ms"], 1200);
    }

    #[tokio::test]
    async fn test_missing_index_loads_as_none() {
        let dir = tempdir().unwrap();
        assert!(CacheIndex::load(dir.path()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_corrupt_index_is_reported() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join(INDEX_FILE_NAME), b"{not json").unwrap();
        let result = CacheIndex::load(dir.path()).await;
        assert!(matches!(result, Err(CacheError::CorruptIndex(_))));
    }

    #[tokio::test]
    async fn test_rebuild_adopts_key_named_files() {
        let dir = tempdir().unwrap();
        let key = ContentKey::compute("adopt me", None);
        std::fs::write(dir.path().join(format!("{}.mp3", key)), b"abcd").unwrap();
        std::fs::write(dir.path().join("notes.txt"), b"ignored").unwrap();
        std::fs::write(dir.path().join(key.as_str()), b"no extension").unwrap();

        let index = CacheIndex::rebuild(dir.path()).await.unwrap();
        assert_eq!(index.entries.len(), 1);
        assert_eq!(index.entries[&key].size_bytes, 4);
    }
}
