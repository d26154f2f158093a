//! 进程内注册中心
//!
//! 同时实现 [`Registrar`] 与 [`Discovery`]，适用于测试和单进程内嵌场景。
//! 每个服务名对应一个 `tokio::sync::watch` 广播通道，每次写入都广播完整快照。

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use tokio::sync::{Mutex, RwLock, watch};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::{Discovery, Registrar, Watcher};
use crate::context::Context;
use crate::error::{InfraResult, InfraResultExt, Result, RoutingError};
use crate::instance::{ServiceInstance, ServiceInstanceList};

/// 广播给 watcher 的快照；`Err` 表示后端报告的错误
type Snapshot = std::result::Result<ServiceInstanceList, String>;

struct ServiceEntry {
    instances: Vec<ServiceInstance>,
    tx: watch::Sender<Arc<Snapshot>>,
}

impl ServiceEntry {
    fn new() -> Self {
        let (tx, _rx) = watch::channel(Arc::new(Ok(ServiceInstanceList::default())));
        Self {
            instances: Vec::new(),
            tx,
        }
    }

    fn publish(&self) {
        let list = ServiceInstanceList::new(self.instances.clone());
        self.tx.send_replace(Arc::new(Ok(list)));
    }

    // 没有实例也没有订阅者的条目可以回收
    fn is_idle(&self) -> bool {
        self.instances.is_empty() && self.tx.receiver_count() == 0
    }

    fn upsert(&mut self, instance: &ServiceInstance) {
        match self.instances.iter_mut().find(|inst| inst.id == instance.id) {
            Some(existing) => *existing = instance.clone(),
            None => self.instances.push(instance.clone()),
        }
        self.publish();
    }
}

type Services = Arc<RwLock<HashMap<String, ServiceEntry>>>;

/// 进程内注册中心
#[derive(Clone, Default)]
pub struct MemoryRegistry {
    services: Services,
}

impl MemoryRegistry {
    /// 创建新的进程内注册中心
    pub fn new() -> Self {
        Self::default()
    }

    /// 向该服务的所有 watcher 广播一个后端错误
    ///
    /// 实例集合保持不变，下一次写入会恢复正常广播
    pub async fn report_error(&self, name: &str, error: impl Into<String>) {
        let mut services = self.services.write().await;
        let entry = services
            .entry(name.to_string())
            .or_insert_with(ServiceEntry::new);
        entry.tx.send_replace(Arc::new(Err(error.into())));
    }

    /// 丢弃服务条目（模拟后端的重命名/压缩事件）
    ///
    /// 已有的订阅随之失效，watcher 会透明地重新订阅
    pub async fn purge(&self, name: &str) {
        let mut services = self.services.write().await;
        if services.remove(name).is_some() {
            debug!(service = %name, "Service entry purged");
        }
    }

    /// 当前订阅该服务的 watcher 数量
    pub async fn watcher_count(&self, name: &str) -> usize {
        let services = self.services.read().await;
        services.get(name).map_or(0, |entry| entry.tx.receiver_count())
    }

    async fn remove_idle(services: &Services, name: &str) {
        let mut services = services.write().await;
        if services.get(name).is_some_and(ServiceEntry::is_idle) {
            services.remove(name);
            debug!(service = %name, "Idle service entry removed");
        }
    }

    async fn subscribe(services: &Services, name: &str) -> watch::Receiver<Arc<Snapshot>> {
        let mut services = services.write().await;
        services
            .entry(name.to_string())
            .or_insert_with(ServiceEntry::new)
            .tx
            .subscribe()
    }
}

fn check_context(ctx: &Context) -> Result<()> {
    match ctx.err() {
        Some(err) => Err(err.into()),
        None => Ok(()),
    }
}

#[async_trait]
impl Registrar for MemoryRegistry {
    async fn register(&self, ctx: &Context, instance: &ServiceInstance) -> Result<()> {
        check_context(ctx)?;
        instance.validate()?;

        let mut services = self.services.write().await;
        services
            .entry(instance.name.clone())
            .or_insert_with(ServiceEntry::new)
            .upsert(instance);
        debug!(
            service = %instance.name,
            instance_id = %instance.id,
            "Service instance registered"
        );
        Ok(())
    }

    async fn update(&self, ctx: &Context, instance: &ServiceInstance) -> Result<()> {
        check_context(ctx)?;
        instance.validate()?;

        // 与 etcd 的 put 语义一致：未知 ID 直接写入
        let mut services = self.services.write().await;
        services
            .entry(instance.name.clone())
            .or_insert_with(ServiceEntry::new)
            .upsert(instance);
        debug!(
            service = %instance.name,
            instance_id = %instance.id,
            "Service instance updated"
        );
        Ok(())
    }

    async fn deregister(&self, ctx: &Context, instance: &ServiceInstance) -> Result<()> {
        check_context(ctx)?;
        if instance.name.is_empty() {
            return Err(RoutingError::invalid_argument("instance name is empty"));
        }

        let mut services = self.services.write().await;
        let mut idle = false;
        if let Some(entry) = services.get_mut(&instance.name) {
            let before = entry.instances.len();
            entry.instances.retain(|inst| inst.id != instance.id);
            if entry.instances.len() != before {
                entry.publish();
                debug!(
                    service = %instance.name,
                    instance_id = %instance.id,
                    "Service instance deregistered"
                );
            }
            idle = entry.is_idle();
        }
        if idle {
            services.remove(&instance.name);
        }
        Ok(())
    }
}

#[async_trait]
impl Discovery for MemoryRegistry {
    async fn get_service(&self, ctx: &Context, name: &str) -> Result<ServiceInstanceList> {
        check_context(ctx)?;
        let services = self.services.read().await;
        Ok(services
            .get(name)
            .map(|entry| ServiceInstanceList::new(entry.instances.clone()))
            .unwrap_or_default())
    }

    async fn watch(&self, ctx: &Context, name: &str) -> Result<Box<dyn Watcher>> {
        check_context(ctx)?;
        if name.is_empty() {
            return Err(RoutingError::invalid_argument("service name is empty"));
        }

        let rx = Self::subscribe(&self.services, name).await;
        Ok(Box::new(MemoryWatcher {
            name: name.to_string(),
            ctx: ctx.clone(),
            services: self.services.clone(),
            rx: Mutex::new(Some(rx)),
            first: AtomicBool::new(true),
            stop: CancellationToken::new(),
        }))
    }
}

/// 进程内注册中心的 watcher
pub struct MemoryWatcher {
    name: String,
    ctx: Context,
    services: Services,
    rx: Mutex<Option<watch::Receiver<Arc<Snapshot>>>>,
    first: AtomicBool,
    stop: CancellationToken,
}

impl MemoryWatcher {
    fn context_error(&self) -> RoutingError {
        self.ctx
            .err()
            .map(RoutingError::from)
            .unwrap_or(RoutingError::Cancelled)
    }

    async fn recv(&self, rx: &mut watch::Receiver<Arc<Snapshot>>) -> Result<ServiceInstanceList> {
        if self.first.swap(false, Ordering::AcqRel) {
            let snapshot = rx.borrow_and_update().clone();
            match snapshot.as_ref() {
                Ok(list) if list.is_empty() => {}
                other => return Self::snapshot_result(other),
            }
        }

        let alive = tokio::select! {
            biased;
            _ = self.stop.cancelled() => return Err(RoutingError::WatchStopped),
            _ = self.ctx.done() => return Err(self.context_error()),
            changed = rx.changed() => changed.is_ok(),
        };

        if !alive {
            // 服务条目被替换，重新订阅并把当前集合当作一次变化返回
            *rx = MemoryRegistry::subscribe(&self.services, &self.name).await;
            debug!(service = %self.name, "Stale watch subscription resubscribed");
        }

        let snapshot = rx.borrow_and_update().clone();
        Self::snapshot_result(&snapshot)
    }

    async fn release(&self, rx: &mut Option<watch::Receiver<Arc<Snapshot>>>) {
        if rx.take().is_some() {
            MemoryRegistry::remove_idle(&self.services, &self.name).await;
        }
    }

    fn snapshot_result(snapshot: &Snapshot) -> Result<ServiceInstanceList> {
        let result: InfraResult<ServiceInstanceList> = match snapshot {
            Ok(list) => Ok(list.clone()),
            Err(msg) => Err(anyhow::anyhow!("{}", msg)),
        };
        result.into_routing()
    }
}

#[async_trait]
impl Watcher for MemoryWatcher {
    async fn next(&self) -> Result<ServiceInstanceList> {
        if self.stop.is_cancelled() {
            return Err(RoutingError::WatchStopped);
        }
        if self.ctx.is_done() {
            return Err(self.context_error());
        }

        let mut guard = tokio::select! {
            biased;
            _ = self.stop.cancelled() => return Err(RoutingError::WatchStopped),
            guard = self.rx.lock() => guard,
        };
        let Some(rx) = guard.as_mut() else {
            return Err(RoutingError::WatchStopped);
        };

        let result = self.recv(rx).await;
        // stop 期间持有订阅的一方负责释放
        if self.stop.is_cancelled() {
            self.release(&mut guard).await;
        }
        result
    }

    /// 停止 watch 并释放订阅，重复调用无副作用
    ///
    /// 有 `next` 正在等待时由它在返回前释放订阅
    async fn stop(&self) -> Result<()> {
        self.stop.cancel();
        if let Ok(mut guard) = self.rx.try_lock() {
            self.release(&mut guard).await;
        }
        Ok(())
    }
}
