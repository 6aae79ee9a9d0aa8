//! Configuration Types
//!
//! 定义所有配置结构体

use serde::Deserialize;
use std::path::PathBuf;

/// 应用主配置
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AppConfig {
    /// 服务器配置
    #[serde(default)]
    pub server: ServerConfig,

    /// 音频缓存配置
    #[serde(default)]
    pub cache: CacheConfig,

    /// 片段组装配置
    #[serde(default)]
    pub assembler: AssemblerConfig,

    /// 播放配置
    #[serde(default)]
    pub playback: PlaybackConfig,

    /// 日志配置
    #[serde(default)]
    pub log: LogConfig,
}

/// 服务器配置
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// 监听地址
    #[serde(default = "default_host")]
    pub host: String,

    /// 监听端口
    #[serde(default = "default_port")]
    pub port: u16,

    /// 请求体上限（字节），整段模式的 base64 音频在请求体中
    #[serde(default = "default_max_body_bytes")]
    pub max_body_bytes: usize,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    5070
}

fn default_max_body_bytes() -> usize {
    32 * 1024 * 1024
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            max_body_bytes: default_max_body_bytes(),
        }
    }
}

impl ServerConfig {
    /// 获取服务器地址
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// 音频缓存配置
///
/// 淘汰限制为 0 表示不限制
#[derive(Debug, Clone, Deserialize)]
pub struct CacheConfig {
    /// 缓存目录
    #[serde(default = "default_cache_dir")]
    pub dir: PathBuf,

    /// 最大条目数
    #[serde(default = "default_max_entries")]
    pub max_entries: usize,

    /// 条目最长未访问时间（秒）
    #[serde(default = "default_max_age_secs")]
    pub max_age_secs: u64,

    /// 最大总大小（字节）
    #[serde(default = "default_max_size_bytes")]
    pub max_size_bytes: u64,

    /// 每次写入后执行淘汰
    #[serde(default = "default_evict_on_store")]
    pub evict_on_store: bool,

    /// 定期淘汰间隔（秒），0 表示关闭
    #[serde(default = "default_evict_interval_secs")]
    pub evict_interval_secs: u64,
}

fn default_cache_dir() -> PathBuf {
    PathBuf::from("data/audio_cache")
}

fn default_max_entries() -> usize {
    500
}

fn default_max_age_secs() -> u64 {
    7 * 24 * 3600 // 7 天
}

fn default_max_size_bytes() -> u64 {
    512 * 1024 * 1024 // 512 MB
}

fn default_evict_on_store() -> bool {
    true
}

fn default_evict_interval_secs() -> u64 {
    3600 // 1 小时
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            dir: default_cache_dir(),
            max_entries: default_max_entries(),
            max_age_secs: default_max_age_secs(),
            max_size_bytes: default_max_size_bytes(),
            evict_on_store: default_evict_on_store(),
            evict_interval_secs: default_evict_interval_secs(),
        }
    }
}

/// 片段组装配置
#[derive(Debug, Clone, Deserialize)]
pub struct AssemblerConfig {
    /// 多少个分片组成一个片段
    #[serde(default = "default_segment_threshold")]
    pub segment_threshold: usize,

    /// 流空闲超时（毫秒）
    #[serde(default = "default_idle_timeout_ms")]
    pub idle_timeout_ms: u64,

    /// 空闲检测间隔（毫秒）
    #[serde(default = "default_watchdog_interval_ms")]
    pub watchdog_interval_ms: u64,

    /// 片段文件目录
    #[serde(default = "default_work_dir")]
    pub work_dir: PathBuf,

    /// 片段文件扩展名
    #[serde(default = "default_audio_extension")]
    pub audio_extension: String,
}

fn default_segment_threshold() -> usize {
    10
}

fn default_idle_timeout_ms() -> u64 {
    30_000
}

fn default_watchdog_interval_ms() -> u64 {
    1_000
}

fn default_work_dir() -> PathBuf {
    PathBuf::from("data/segments")
}

fn default_audio_extension() -> String {
    "mp3".to_string()
}

impl Default for AssemblerConfig {
    fn default() -> Self {
        Self {
            segment_threshold: default_segment_threshold(),
            idle_timeout_ms: default_idle_timeout_ms(),
            watchdog_interval_ms: default_watchdog_interval_ms(),
            work_dir: default_work_dir(),
            audio_extension: default_audio_extension(),
        }
    }
}

/// 播放设备类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceKind {
    /// 按音频时长计时
    #[default]
    Clocked,
    /// 测试用，立即完成
    Fake,
}

impl DeviceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeviceKind::Clocked => "clocked",
            DeviceKind::Fake => "fake",
        }
    }
}

/// 播放配置
#[derive(Debug, Clone, Deserialize)]
pub struct PlaybackConfig {
    /// 播放设备
    #[serde(default)]
    pub device: DeviceKind,

    /// 无法解析音频时长时的估算字节率
    #[serde(default = "default_fallback_bytes_per_sec")]
    pub fallback_bytes_per_sec: u64,
}

fn default_fallback_bytes_per_sec() -> u64 {
    16_000 // 128kbps
}

impl Default for PlaybackConfig {
    fn default() -> Self {
        Self {
            device: DeviceKind::default(),
            fallback_bytes_per_sec: default_fallback_bytes_per_sec(),
        }
    }
}

/// 日志配置
#[derive(Debug, Clone, Deserialize)]
pub struct LogConfig {
    /// 日志级别
    #[serde(default = "default_log_level")]
    pub level: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}
