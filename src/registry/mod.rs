//! 服务注册与发现契约
//!
//! 任何注册中心后端（etcd、consul、nacos ……）都需要实现 [`Registrar`] 与
//! [`Discovery`]；本 crate 只提供进程内的 [`MemoryRegistry`] 实现。

pub mod memory;

use async_trait::async_trait;

use crate::context::Context;
use crate::error::Result;
use crate::instance::{ServiceInstance, ServiceInstanceList};

pub use memory::MemoryRegistry;

/// 服务注册 trait
///
/// 写入对发现端的可见性是最终一致的，延迟取决于后端自身的传播速度。
/// 注意：由于需要动态分发（dyn），使用 async-trait
#[async_trait]
pub trait Registrar: Send + Sync {
    /// 注册服务实例
    ///
    /// 服务名为空时返回 `InvalidArgument`
    async fn register(&self, ctx: &Context, instance: &ServiceInstance) -> Result<()>;

    /// 更新服务实例
    ///
    /// 以 `id` 为键整体替换快照，不支持部分字段更新
    async fn update(&self, ctx: &Context, instance: &ServiceInstance) -> Result<()>;

    /// 注销服务实例
    async fn deregister(&self, ctx: &Context, instance: &ServiceInstance) -> Result<()>;
}

/// 服务发现 trait
#[async_trait]
pub trait Discovery: Send + Sync {
    /// 读取服务当前的实例快照
    async fn get_service(&self, ctx: &Context, name: &str) -> Result<ServiceInstanceList>;

    /// 订阅服务实例集合的变化
    ///
    /// `ctx` 结束后 watcher 的 `next` 返回对应的上下文错误
    async fn watch(&self, ctx: &Context, name: &str) -> Result<Box<dyn Watcher>>;
}

/// 服务变化订阅
///
/// 每次变化都返回完整的实例列表而不是增量，调用方无需合并部分更新
#[async_trait]
pub trait Watcher: Send + Sync {
    /// 等待下一次变化
    ///
    /// - 第一次调用时，若初始集合非空则立即返回
    /// - 之后的调用阻塞到后端观察到变化为止
    /// - 上下文结束、后端报错或已调用 `stop` 时返回错误
    async fn next(&self) -> Result<ServiceInstanceList>;

    /// 停止订阅并释放后端资源
    ///
    /// 会唤醒正在等待的 `next`，之后的 `next` 调用总是失败
    async fn stop(&self) -> Result<()>;
}
