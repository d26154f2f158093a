//! Flare Routing Core 错误处理模块
//!
//! 提供错误代码分类与统一的错误类型

pub mod code;
pub mod routing_error;

pub use code::{ErrorCategory, ErrorCode};
pub use routing_error::{Result, RoutingError};

/// 基础设施层（注册中心后端）默认使用的结果类型
pub type InfraResult<T> = anyhow::Result<T>;

/// `InfraResult` 的辅助扩展，用于快速转换为统一的路由错误类型
pub trait InfraResultExt<T> {
    fn into_routing(self) -> Result<T>;
}

impl<T> InfraResultExt<T> for InfraResult<T> {
    fn into_routing(self) -> Result<T> {
        self.map_err(RoutingError::Backend)
    }
}
