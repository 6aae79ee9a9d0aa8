//! 应用层错误定义
//!
//! 流水线对外操作的统一错误类型

use thiserror::Error;

use crate::application::ports::{CacheError, DeviceError};

/// 应用层错误
#[derive(Debug, Error)]
pub enum PipelineError {
    /// 资源未找到
    #[error("{resource_type} not found: {id}")]
    NotFound {
        resource_type: &'static str,
        id: String,
    },

    /// 验证错误
    #[error("Validation error: {0}")]
    ValidationError(String),

    /// 缓存错误
    #[error("Cache error: {0}")]
    CacheError(String),

    /// 播放设备错误
    #[error("Device error: {0}")]
    DeviceError(String),

    /// 内部错误
    #[error("Internal error: {0}")]
    InternalError(String),
}

impl PipelineError {
    /// 创建 NotFound 错误
    pub fn not_found(resource_type: &'static str, id: impl Into<String>) -> Self {
        Self::NotFound {
            resource_type,
            id: id.into(),
        }
    }

    /// 创建验证错误
    pub fn validation(message: impl Into<String>) -> Self {
        Self::ValidationError(message.into())
    }

    /// 创建内部错误
    pub fn internal(message: impl Into<String>) -> Self {
        Self::InternalError(message.into())
    }
}

impl From<CacheError> for PipelineError {
    fn from(err: CacheError) -> Self {
        Self::CacheError(err.to_string())
    }
}

impl From<DeviceError> for PipelineError {
    fn from(err: DeviceError) -> Self {
        Self::DeviceError(err.to_string())
    }
}
