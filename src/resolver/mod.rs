//! 服务发现到选择器的适配
//!
//! [`Resolver`] 打开一个 watch，在后台循环拉取实例变化，
//! 把每次得到的完整实例列表转换成节点后整体写入选择器。

pub mod subset;

pub use subset::subset;

use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::config::ResolverConfig;
use crate::context::{CancelFunc, Context};
use crate::endpoint;
use crate::error::{Result, RoutingError};
use crate::instance::{ServiceInstance, ServiceInstanceList};
use crate::registry::{Discovery, Watcher};
use crate::selector::{Node, Selector};

/// 把实例列表写入选择器
pub struct Updater {
    service_name: String,
    scheme: String,
    secure: bool,
    subset_size: usize,
    select_key: String,
    selector: Arc<dyn Selector>,
}

impl Updater {
    pub fn new(selector: Arc<dyn Selector>, config: &ResolverConfig) -> Self {
        Self {
            service_name: config.service_name.clone(),
            scheme: config.scheme.clone(),
            secure: !config.insecure,
            subset_size: config.subset_size,
            select_key: uuid::Uuid::new_v4().to_string(),
            selector,
        }
    }

    /// 子集划分使用的 key，每个 resolver 随机生成一次
    pub fn select_key(&self) -> &str {
        &self.select_key
    }

    /// 应用一次完整的实例列表
    ///
    /// 过滤后没有可用节点时拒绝写入并返回 false，选择器保留上一代节点池
    pub fn update(&self, instances: ServiceInstanceList) -> bool {
        let mut seen = HashSet::new();
        let mut filtered: Vec<(ServiceInstance, String)> = Vec::new();

        for instance in instances {
            if !instance.is_up() {
                continue;
            }
            let address = match endpoint::parse_endpoint(
                &instance.endpoints,
                &self.scheme,
                self.secure,
            ) {
                Ok(Some(address)) => address,
                Ok(None) => continue,
                Err(e) => {
                    warn!(
                        service = %self.service_name,
                        instance_id = %instance.id,
                        error = %e,
                        "Failed to parse instance endpoint"
                    );
                    continue;
                }
            };
            if !seen.insert(address.clone()) {
                continue;
            }
            filtered.push((instance, address));
        }

        let filtered = subset(&self.select_key, filtered, self.subset_size, |(instance, _)| {
            instance.id.as_str()
        });

        if filtered.is_empty() {
            warn!(service = %self.service_name, "Zero endpoint found, refused to write");
            return false;
        }

        let nodes = filtered
            .iter()
            .map(|(instance, address)| {
                Arc::new(Node::from_instance(self.scheme.as_str(), address.as_str(), instance))
            })
            .collect();
        self.selector.store(nodes);

        let applied: Vec<&ServiceInstance> = filtered.iter().map(|(instance, _)| instance).collect();
        let instances = serde_json::to_string(&applied).unwrap_or_default();
        info!(
            service = %self.service_name,
            count = applied.len(),
            instances = %instances,
            "Service instances updated"
        );
        true
    }
}

/// 监听服务实例并持续更新选择器
pub struct Resolver {
    service_name: String,
    watcher: Arc<dyn Watcher>,
    cancel: CancelFunc,
    task: Mutex<Option<JoinHandle<()>>>,
    closed: AtomicBool,
}

impl Resolver {
    /// 打开 watch 并启动后台更新
    ///
    /// `config.block` 为 true 时等待第一次成功更新，
    /// 受上下文和 `block_timeout_ms` 约束
    pub async fn new(
        ctx: &Context,
        discovery: Arc<dyn Discovery>,
        selector: Arc<dyn Selector>,
        config: ResolverConfig,
    ) -> Result<Self> {
        if config.service_name.is_empty() {
            return Err(RoutingError::invalid_argument("service name is empty"));
        }

        let (ctx, cancel) = Context::with_cancel(ctx);
        let watcher: Arc<dyn Watcher> = match discovery.watch(&ctx, &config.service_name).await {
            Ok(watcher) => Arc::from(watcher),
            Err(e) => {
                cancel.cancel();
                return Err(e);
            }
        };

        let updater = Updater::new(selector, &config);
        let (first_tx, first_rx) = oneshot::channel();
        let task = tokio::spawn(watch_loop(
            ctx.clone(),
            watcher.clone(),
            updater,
            config.retry_interval(),
            first_tx,
        ));

        let resolver = Self {
            service_name: config.service_name.clone(),
            watcher,
            cancel,
            task: Mutex::new(Some(task)),
            closed: AtomicBool::new(false),
        };

        if config.block {
            let outcome = tokio::select! {
                first = first_rx => first.unwrap_or_else(|_| {
                    Err(ctx.err().map(RoutingError::from).unwrap_or(RoutingError::WatchStopped))
                }),
                _ = ctx.done() => Err(ctx.err().map(RoutingError::from).unwrap_or(RoutingError::Cancelled)),
                _ = tokio::time::sleep(config.block_timeout()) => Err(RoutingError::DeadlineExceeded),
            };
            if let Err(e) = outcome {
                warn!(service = %config.service_name, error = %e, "Failed to resolve service instances");
                if let Err(close_err) = resolver.close().await {
                    warn!(service = %config.service_name, error = %close_err, "Failed to stop watcher");
                }
                return Err(e);
            }
        }

        Ok(resolver)
    }

    pub fn service_name(&self) -> &str {
        &self.service_name
    }

    /// 停止后台更新并释放 watcher，重复调用无副作用
    pub async fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        self.cancel.cancel();
        let stopped = self.watcher.stop().await;

        let task = self.task.lock().take();
        if let Some(task) = task {
            if let Err(e) = task.await {
                warn!(service = %self.service_name, error = %e, "Watch loop terminated abnormally");
            }
        }
        debug!(service = %self.service_name, "Resolver closed");
        stopped
    }
}

impl Drop for Resolver {
    fn drop(&mut self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.cancel.cancel();
        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            let watcher = self.watcher.clone();
            handle.spawn(async move {
                let _ = watcher.stop().await;
            });
        }
    }
}

async fn watch_loop(
    ctx: Context,
    watcher: Arc<dyn Watcher>,
    updater: Updater,
    retry_interval: Duration,
    first_tx: oneshot::Sender<Result<()>>,
) {
    let mut first = Some(first_tx);

    loop {
        if ctx.is_done() {
            return;
        }

        match watcher.next().await {
            Ok(instances) => {
                if updater.update(instances) {
                    if let Some(tx) = first.take() {
                        let _ = tx.send(Ok(()));
                    }
                }
            }
            Err(e) if ctx.is_done() || e.is_context_error() || matches!(e, RoutingError::WatchStopped) => {
                debug!(service = %updater.service_name, error = %e, "Watch loop exited");
                if let Some(tx) = first.take() {
                    let _ = tx.send(Err(e));
                }
                return;
            }
            Err(e) => {
                error!(service = %updater.service_name, error = %e, "Failed to watch service instances");
                tokio::select! {
                    _ = ctx.done() => return,
                    _ = tokio::time::sleep(retry_interval) => {}
                }
            }
        }
    }
}
