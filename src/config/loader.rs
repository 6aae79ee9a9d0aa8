//! Configuration Loader
//!
//! 实现多源配置加载与合并逻辑
//!
//! 优先级（从高到低）：
//! 1. 环境变量
//! 2. 配置文件（config.toml）
//! 3. 默认值

use config::{Config, ConfigError as ConfigCrateError, Environment, File};
use std::path::Path;
use thiserror::Error;

use super::types::AppConfig;

/// 配置加载错误
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to load configuration: {0}")]
    LoadError(String),

    #[error("Failed to parse configuration: {0}")]
    ParseError(String),

    #[error("Configuration validation failed: {0}")]
    ValidationError(String),
}

impl From<ConfigCrateError> for ConfigError {
    fn from(err: ConfigCrateError) -> Self {
        ConfigError::LoadError(err.to_string())
    }
}

/// 配置文件搜索路径
const CONFIG_FILE_NAMES: &[&str] = &["config", "config.local"];

/// 加载应用配置
///
/// 按优先级从高到低合并配置：
/// 1. 环境变量（前缀 `CHATVOICE_`，层级分隔符 `__`）
/// 2. 配置文件（config.toml 或 config.local.toml）
/// 3. 默认值
///
/// # 环境变量示例
/// - `CHATVOICE_SERVER__PORT=8080`
/// - `CHATVOICE_CACHE__DIR=/data/audio_cache`
/// - `CHATVOICE_ASSEMBLER__SEGMENT_THRESHOLD=5`
/// - `CHATVOICE_PLAYBACK__DEVICE=fake`
pub fn load_config() -> Result<AppConfig, ConfigError> {
    load_config_from_path(None)
}

/// 从指定路径加载配置
///
/// # 参数
/// - `config_path` - 可选的配置文件路径，如果为 None 则使用默认搜索路径
pub fn load_config_from_path(config_path: Option<&Path>) -> Result<AppConfig, ConfigError> {
    let mut builder = Config::builder();

    // 1. 默认值（最低优先级）
    builder = builder
        .set_default("server.host", "0.0.0.0")?
        .set_default("server.port", 5070)?
        .set_default("server.max_body_bytes", 32_u64 * 1024 * 1024)?
        .set_default("cache.dir", "data/audio_cache")?
        .set_default("cache.max_entries", 500)?
        .set_default("cache.max_age_secs", 7 * 24 * 3600)?
        .set_default("cache.max_size_bytes", 512_u64 * 1024 * 1024)?
        .set_default("cache.evict_on_store", true)?
        .set_default("cache.evict_interval_secs", 3600)?
        .set_default("assembler.segment_threshold", 10)?
        .set_default("assembler.idle_timeout_ms", 30_000)?
        .set_default("assembler.watchdog_interval_ms", 1_000)?
        .set_default("assembler.work_dir", "data/segments")?
        .set_default("assembler.audio_extension", "mp3")?
        .set_default("playback.device", "clocked")?
        .set_default("playback.fallback_bytes_per_sec", 16_000)?
        .set_default("log.level", "info")?;

    // 2. 配置文件（如果存在）
    if let Some(path) = config_path {
        builder = builder.add_source(File::from(path).required(true));
    } else {
        for name in CONFIG_FILE_NAMES {
            builder = builder.add_source(File::with_name(name).required(false));
        }
    }

    // 3. 环境变量（最高优先级）
    // 例如: CHATVOICE_CACHE__MAX_ENTRIES=100
    builder = builder.add_source(
        Environment::with_prefix("CHATVOICE")
            .prefix_separator("_")
            .separator("__")
            .try_parsing(true),
    );

    let config = builder.build()?;

    let app_config: AppConfig = config.try_deserialize().map_err(|e| {
        ConfigError::ParseError(format!("Failed to deserialize config: {}", e))
    })?;

    validate_config(&app_config)?;

    Ok(app_config)
}

/// 验证配置有效性
fn validate_config(config: &AppConfig) -> Result<(), ConfigError> {
    if config.server.port == 0 {
        return Err(ConfigError::ValidationError(
            "Server port cannot be 0".to_string(),
        ));
    }

    if config.server.max_body_bytes == 0 {
        return Err(ConfigError::ValidationError(
            "Request body limit cannot be 0".to_string(),
        ));
    }

    if config.cache.dir.as_os_str().is_empty() {
        return Err(ConfigError::ValidationError(
            "Cache directory cannot be empty".to_string(),
        ));
    }

    if config.assembler.segment_threshold == 0 {
        return Err(ConfigError::ValidationError(
            "Segment threshold must be at least 1".to_string(),
        ));
    }

    if config.assembler.idle_timeout_ms == 0 {
        return Err(ConfigError::ValidationError(
            "Idle timeout cannot be 0".to_string(),
        ));
    }

    if config.assembler.watchdog_interval_ms == 0 {
        return Err(ConfigError::ValidationError(
            "Watchdog interval cannot be 0".to_string(),
        ));
    }

    if config.assembler.audio_extension.trim().is_empty() {
        return Err(ConfigError::ValidationError(
            "Audio extension cannot be empty".to_string(),
        ));
    }

    Ok(())
}

/// 打印配置信息（用于启动时日志）
pub fn print_config(config: &AppConfig) {
    tracing::info!("=== Application Configuration ===");
    tracing::info!("Server: {}:{}", config.server.host, config.server.port);
    tracing::info!("Max Request Body: {} bytes", config.server.max_body_bytes);
    tracing::info!("Cache Directory: {:?}", config.cache.dir);
    tracing::info!(
        "Cache Limits: entries={}, age={}s, size={} bytes",
        config.cache.max_entries,
        config.cache.max_age_secs,
        config.cache.max_size_bytes
    );
    tracing::info!("Evict On Store: {}", config.cache.evict_on_store);
    tracing::info!("Evict Interval: {}s", config.cache.evict_interval_secs);
    tracing::info!("Segment Threshold: {}", config.assembler.segment_threshold);
    tracing::info!("Idle Timeout: {}ms", config.assembler.idle_timeout_ms);
    tracing::info!("Segment Directory: {:?}", config.assembler.work_dir);
    tracing::info!("Playback Device: {}", config.playback.device.as_str());
    tracing::info!("Log Level: {}", config.log.level);
    tracing::info!("=================================");
}
