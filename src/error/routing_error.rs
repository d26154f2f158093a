//! 路由层统一错误类型

use super::code::ErrorCode;
use crate::context::ContextError;
use thiserror::Error;

/// 路由层统一错误类型
///
/// `Watcher::next` 与 `Selector::select` 均把错误原样交给直接调用方，
/// 本层不做内部重试
#[derive(Error, Debug)]
pub enum RoutingError {
    /// 参数错误（例如注册时服务名为空）
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// 过滤后没有可用节点
    #[error("no instances available")]
    NoAvailable,

    /// 上下文被取消
    #[error("context canceled")]
    Cancelled,

    /// 上下文超时
    #[error("context deadline exceeded")]
    DeadlineExceeded,

    /// watcher 已停止
    #[error("watcher stopped")]
    WatchStopped,

    /// 非法的 endpoint
    #[error("invalid endpoint {endpoint}: {reason}")]
    InvalidEndpoint { endpoint: String, reason: String },

    /// 配置错误
    #[error("configuration error: {0}")]
    Config(String),

    /// 注册中心后端错误（原样透出）
    #[error(transparent)]
    Backend(#[from] anyhow::Error),
}

impl RoutingError {
    /// 创建参数错误
    pub fn invalid_argument(msg: impl Into<String>) -> Self {
        RoutingError::InvalidArgument(msg.into())
    }

    /// 创建非法 endpoint 错误
    pub fn invalid_endpoint(endpoint: impl Into<String>, reason: impl Into<String>) -> Self {
        RoutingError::InvalidEndpoint {
            endpoint: endpoint.into(),
            reason: reason.into(),
        }
    }

    /// 包装后端错误
    pub fn backend<E>(error: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        RoutingError::Backend(anyhow::Error::new(error))
    }

    /// 获取错误代码
    pub fn code(&self) -> ErrorCode {
        match self {
            RoutingError::InvalidArgument(_) => ErrorCode::InvalidArgument,
            RoutingError::NoAvailable => ErrorCode::NoAvailable,
            RoutingError::Cancelled => ErrorCode::Cancelled,
            RoutingError::DeadlineExceeded => ErrorCode::DeadlineExceeded,
            RoutingError::WatchStopped => ErrorCode::WatchStopped,
            RoutingError::InvalidEndpoint { .. } => ErrorCode::InvalidEndpoint,
            RoutingError::Config(_) => ErrorCode::ConfigurationError,
            RoutingError::Backend(_) => ErrorCode::BackendError,
        }
    }

    /// 是否由上下文取消或超时引起
    pub fn is_context_error(&self) -> bool {
        matches!(self, RoutingError::Cancelled | RoutingError::DeadlineExceeded)
    }

    /// 判断是否为可重试的错误
    pub fn is_retryable(&self) -> bool {
        self.code().is_retryable()
    }
}

impl From<ContextError> for RoutingError {
    fn from(err: ContextError) -> Self {
        match err {
            ContextError::Cancelled => RoutingError::Cancelled,
            ContextError::DeadlineExceeded => RoutingError::DeadlineExceeded,
        }
    }
}

/// 结果类型别名
pub type Result<T> = std::result::Result<T, RoutingError>;
