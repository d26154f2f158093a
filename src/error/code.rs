//! 错误代码和错误类别定义

use serde::{Deserialize, Serialize};
use std::fmt;

/// 错误代码枚举
///
/// 错误代码按类别分组，每个类别占用1000个代码范围：
/// - 1000-1999: 参数相关错误
/// - 2000-2999: 可用性相关错误
/// - 3000-3999: 上下文（取消/超时）相关错误
/// - 4000-4999: 注册中心后端相关错误
/// - 9000-9999: 通用错误
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[repr(u32)]
pub enum ErrorCode {
    // ============================================================
    // 参数相关错误 (1000-1999)
    // ============================================================
    InvalidArgument = 1000,
    InvalidEndpoint = 1001,
    ConfigurationError = 1002,

    // ============================================================
    // 可用性相关错误 (2000-2999)
    // ============================================================
    NoAvailable = 2000,
    WatchStopped = 2001,

    // ============================================================
    // 上下文相关错误 (3000-3999)
    // ============================================================
    Cancelled = 3000,
    DeadlineExceeded = 3001,

    // ============================================================
    // 后端相关错误 (4000-4999)
    // ============================================================
    BackendError = 4000,

    // ============================================================
    // 通用错误 (9000-9999)
    // ============================================================
    UnknownError = 9999,
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl ErrorCode {
    /// 获取错误代码的数字值
    #[inline]
    pub fn as_u32(&self) -> u32 {
        *self as u32
    }

    /// 从数字值创建错误代码
    pub fn from_u32(code: u32) -> Option<Self> {
        match code {
            1000 => Some(ErrorCode::InvalidArgument),
            1001 => Some(ErrorCode::InvalidEndpoint),
            1002 => Some(ErrorCode::ConfigurationError),
            2000 => Some(ErrorCode::NoAvailable),
            2001 => Some(ErrorCode::WatchStopped),
            3000 => Some(ErrorCode::Cancelled),
            3001 => Some(ErrorCode::DeadlineExceeded),
            4000 => Some(ErrorCode::BackendError),
            9999 => Some(ErrorCode::UnknownError),
            _ => None,
        }
    }

    /// 获取错误代码的英文标识符
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::InvalidArgument => "INVALID_ARGUMENT",
            ErrorCode::InvalidEndpoint => "INVALID_ENDPOINT",
            ErrorCode::ConfigurationError => "CONFIGURATION_ERROR",
            ErrorCode::NoAvailable => "NO_AVAILABLE",
            ErrorCode::WatchStopped => "WATCH_STOPPED",
            ErrorCode::Cancelled => "CANCELLED",
            ErrorCode::DeadlineExceeded => "DEADLINE_EXCEEDED",
            ErrorCode::BackendError => "BACKEND_ERROR",
            ErrorCode::UnknownError => "UNKNOWN_ERROR",
        }
    }

    /// 获取错误代码的类别（用于错误分类）
    pub fn category(&self) -> ErrorCategory {
        match self.as_u32() {
            1000..=1999 => ErrorCategory::InvalidArgument,
            2000..=2999 => ErrorCategory::Unavailable,
            3000..=3999 => ErrorCategory::Context,
            4000..=4999 => ErrorCategory::Backend,
            _ => ErrorCategory::General,
        }
    }

    /// 判断是否为可重试的错误
    ///
    /// 本层不做重试，该判断只供调用方的重试策略参考
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ErrorCode::NoAvailable | ErrorCode::DeadlineExceeded | ErrorCode::BackendError
        )
    }
}

/// 错误类别
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCategory {
    InvalidArgument,
    Unavailable,
    Context,
    Backend,
    General,
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorCategory::InvalidArgument => write!(f, "INVALID_ARGUMENT"),
            ErrorCategory::Unavailable => write!(f, "UNAVAILABLE"),
            ErrorCategory::Context => write!(f, "CONTEXT"),
            ErrorCategory::Backend => write!(f, "BACKEND"),
            ErrorCategory::General => write!(f, "GENERAL"),
        }
    }
}
