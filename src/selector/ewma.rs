//! EWMA 权重节点
//!
//! 用指数加权移动平均跟踪节点的延迟和成功率：
//!
//! - 延迟 `lag`：完成回调时以 `w = exp(-Δt / TAU)` 衰减旧值并混入本次耗时
//! - 成功率 `success`：取值 0..=1000，成功记 1000，失败记 0；
//!   未发出任何数据就失败（节点可能根本没被访问到）只记 500
//! - 负载 `load = sqrt(max(lag, predict) + 5ms) * inflight`，
//!   尚无延迟数据时为 `PENALTY * inflight`
//! - 权重 `weight = success * 10µs / load`

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::time::Duration;

use parking_lot::Mutex;

use super::{DoneFunc, DoneInfo, Node, NodeClock, WeightedNode, WeightedNodeBuilder};
use crate::context::Context;
use crate::error::RoutingError;

/// 延迟的平均生命周期，经过 TAU*ln(2) 衰减一半
const TAU: f64 = Duration::from_millis(600).as_nanos() as f64;

/// 尚无统计数据时的延迟惩罚
const PENALTY: f64 = Duration::from_micros(100).as_nanos() as f64;

/// 抹平不同可用区之间的延迟差距
const ZONE_GAP: f64 = Duration::from_millis(5).as_nanos() as f64;

const SUCCESS_WEIGHT: f64 = Duration::from_micros(10).as_nanos() as f64;

const INIT_SUCCESS: f64 = 1000.0;
const UNREACHED_SUCCESS: f64 = 500.0;

/// 判断一次调用错误是否应计为节点失败
pub type ErrHandler = Arc<dyn Fn(&anyhow::Error) -> bool + Send + Sync>;

#[derive(Debug, Default)]
struct Stats {
    // 纳秒
    lag: f64,
    success: f64,
    stamp: u64,
}

#[derive(Default)]
struct InFlight {
    next_ticket: u64,
    started: HashMap<u64, u64>,
}

struct Shared {
    raw: Arc<Node>,
    clock: NodeClock,
    stats: Mutex<Stats>,
    inflight: AtomicI64,
    inflights: Mutex<InFlight>,
    reqs: AtomicU64,
    last_pick: AtomicU64,
    err_handler: Option<ErrHandler>,
}

/// EWMA 权重节点
pub struct EwmaNode {
    shared: Arc<Shared>,
}

impl EwmaNode {
    pub fn new(raw: Arc<Node>, err_handler: Option<ErrHandler>) -> Self {
        Self {
            shared: Arc::new(Shared {
                raw,
                clock: NodeClock::new(),
                stats: Mutex::new(Stats {
                    lag: 0.0,
                    success: INIT_SUCCESS,
                    stamp: 0,
                }),
                inflight: AtomicI64::new(1),
                inflights: Mutex::new(InFlight::default()),
                reqs: AtomicU64::new(0),
                last_pick: AtomicU64::new(0),
                err_handler,
            }),
        }
    }

    /// 平滑后的成功率（0..=1000）
    pub fn health(&self) -> f64 {
        self.shared.stats.lock().success
    }

    /// 平滑后的延迟
    pub fn lag(&self) -> Duration {
        Duration::from_nanos(self.shared.stats.lock().lag as u64)
    }

    /// 累计被选中的次数
    pub fn requests(&self) -> u64 {
        self.shared.reqs.load(Ordering::Relaxed)
    }

    /// 当前在途请求数（不含初始的 1）
    pub fn inflight(&self) -> i64 {
        self.shared.inflight.load(Ordering::Acquire) - 1
    }
}

impl Shared {
    // 超过半数的在途请求都比平均延迟慢时，用它们的平均耗时作为预测延迟
    fn predict(&self, avg_lag: f64, now: u64) -> f64 {
        let inflights = self.inflights.lock();
        let total_num = inflights.started.len();
        let (slow_num, total) = inflights
            .started
            .values()
            .map(|start| now.saturating_sub(*start) as f64)
            .filter(|lag| *lag > avg_lag)
            .fold((0usize, 0f64), |(n, sum), lag| (n + 1, sum + lag));

        if slow_num > 0 && slow_num >= total_num / 2 + 1 {
            total / slow_num as f64
        } else {
            0.0
        }
    }

    fn load(&self) -> f64 {
        let now = self.clock.now();
        let avg_lag = self.stats.lock().lag;
        let inflight = self.inflight.load(Ordering::Acquire).max(1) as f64;

        if avg_lag == 0.0 {
            return PENALTY * inflight;
        }

        let lag = avg_lag.max(self.predict(avg_lag, now)) + ZONE_GAP;
        lag.sqrt() * inflight
    }

    fn is_failure(&self, err: &anyhow::Error) -> bool {
        if let Some(e) = err.downcast_ref::<RoutingError>() {
            if e.is_context_error() {
                return true;
            }
        }
        match &self.err_handler {
            Some(handler) => handler(err),
            None => true,
        }
    }

    fn observe(&self, start: u64, info: &DoneInfo) {
        let now = self.clock.now();
        let mut stats = self.stats.lock();

        let td = now.saturating_sub(stats.stamp) as f64;
        stats.stamp = now;
        let mut w = (-td / TAU).exp();

        let lag = now.saturating_sub(start) as f64;
        if stats.lag == 0.0 {
            w = 0.0;
        }
        stats.lag = stats.lag * w + lag * (1.0 - w);

        let success = match &info.err {
            None => INIT_SUCCESS,
            Some(err) if !self.is_failure(err) => INIT_SUCCESS,
            Some(_) if !info.bytes_sent => UNREACHED_SUCCESS,
            Some(_) => 0.0,
        };
        stats.success = stats.success * w + success * (1.0 - w);
    }
}

impl WeightedNode for EwmaNode {
    fn raw(&self) -> &Arc<Node> {
        &self.shared.raw
    }

    fn weight(&self) -> f64 {
        let health = self.shared.stats.lock().success;
        health * SUCCESS_WEIGHT / self.shared.load().max(f64::MIN_POSITIVE)
    }

    fn pick(&self) -> DoneFunc {
        let start = self.shared.clock.now();
        self.shared.last_pick.fetch_max(start, Ordering::AcqRel);
        self.shared.inflight.fetch_add(1, Ordering::AcqRel);
        self.shared.reqs.fetch_add(1, Ordering::Relaxed);

        let ticket = {
            let mut inflights = self.shared.inflights.lock();
            let ticket = inflights.next_ticket;
            inflights.next_ticket = inflights.next_ticket.wrapping_add(1);
            inflights.started.insert(ticket, start);
            ticket
        };

        let shared = self.shared.clone();
        Box::new(move |_ctx: &Context, info: DoneInfo| {
            shared.inflights.lock().started.remove(&ticket);
            shared.inflight.fetch_sub(1, Ordering::AcqRel);
            shared.observe(start, &info);
        })
    }

    fn pick_elapsed(&self) -> Duration {
        self.shared
            .clock
            .elapsed_since(self.shared.last_pick.load(Ordering::Acquire))
    }
}

/// EWMA 权重节点构建器
#[derive(Clone, Default)]
pub struct Builder {
    err_handler: Option<ErrHandler>,
}

impl Builder {
    pub fn new() -> Self {
        Self::default()
    }

    /// 自定义错误判定
    ///
    /// 默认所有错误都计为节点失败；设置后只有 handler 返回 true、
    /// 或上下文取消/超时的错误才计为失败
    pub fn with_err_handler<F>(mut self, handler: F) -> Self
    where
        F: Fn(&anyhow::Error) -> bool + Send + Sync + 'static,
    {
        self.err_handler = Some(Arc::new(handler));
        self
    }
}

impl WeightedNodeBuilder for Builder {
    fn build(&self, node: Arc<Node>) -> Arc<dyn WeightedNode> {
        Arc::new(EwmaNode::new(node, self.err_handler.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node(addr: &str) -> EwmaNode {
        EwmaNode::new(Arc::new(Node::new("grpc", addr)), None)
    }

    #[tokio::test(start_paused = true)]
    async fn success_outweighs_failure() {
        let ctx = Context::background();
        let good = node("127.0.0.1:9000");
        let bad = node("127.0.0.1:9001");

        let done = good.pick();
        tokio::time::advance(Duration::from_millis(20)).await;
        done(&ctx, DoneInfo::success());

        let done = bad.pick();
        tokio::time::advance(Duration::from_millis(20)).await;
        done(&ctx, DoneInfo::failure(anyhow::anyhow!("connection reset"), true));

        assert!(good.weight() > bad.weight());
        assert_eq!(bad.health(), 0.0);
        assert_eq!(good.inflight(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn unreached_failures_are_penalized_less() {
        let ctx = Context::background();
        let unreached = node("127.0.0.1:9000");
        let failed = node("127.0.0.1:9001");

        for (n, sent) in [(&unreached, false), (&failed, true)] {
            let done = n.pick();
            tokio::time::advance(Duration::from_millis(10)).await;
            done(&ctx, DoneInfo::failure(RoutingError::DeadlineExceeded, sent));
        }

        assert!(unreached.health() > failed.health());
        assert!(unreached.weight() > failed.weight());
    }

    #[tokio::test(start_paused = true)]
    async fn latency_is_smoothed() {
        let ctx = Context::background();
        let n = node("127.0.0.1:9000");

        let done = n.pick();
        tokio::time::advance(Duration::from_millis(100)).await;
        done(&ctx, DoneInfo::success());
        assert_eq!(n.lag(), Duration::from_millis(100));

        let done = n.pick();
        tokio::time::advance(Duration::from_millis(10)).await;
        done(&ctx, DoneInfo::success());
        let lag = n.lag();
        assert!(lag > Duration::from_millis(10) && lag < Duration::from_millis(100));
    }

    #[tokio::test(start_paused = true)]
    async fn slower_node_has_lower_weight() {
        let ctx = Context::background();
        let fast = node("127.0.0.1:9000");
        let slow = node("127.0.0.1:9001");

        let done = fast.pick();
        tokio::time::advance(Duration::from_millis(5)).await;
        done(&ctx, DoneInfo::success());

        let done = slow.pick();
        tokio::time::advance(Duration::from_millis(500)).await;
        done(&ctx, DoneInfo::success());

        assert!(fast.weight() > slow.weight());
    }

    #[tokio::test(start_paused = true)]
    async fn err_handler_can_ignore_application_errors() {
        let ctx = Context::background();
        let builder = Builder::new().with_err_handler(|err| err.to_string().contains("unavailable"));
        let n = builder.build(Arc::new(Node::new("grpc", "127.0.0.1:9000")));

        let done = n.pick();
        tokio::time::advance(Duration::from_millis(10)).await;
        done(&ctx, DoneInfo::failure(anyhow::anyhow!("user not found"), true));

        let plain = node("127.0.0.1:9001");
        let done = plain.pick();
        tokio::time::advance(Duration::from_millis(10)).await;
        done(&ctx, DoneInfo::failure(anyhow::anyhow!("user not found"), true));

        assert!(n.weight() > plain.weight());
    }

    #[test]
    fn inflight_requests_raise_load() {
        let n = node("127.0.0.1:9000");
        let idle = n.weight();
        let _done = n.pick();
        assert!(n.weight() < idle);
        assert_eq!(n.requests(), 1);
    }
}
