//! 直接权重节点
//!
//! 权重固定为节点的初始权重（缺省 100），完成回调不做任何调整。

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use super::{DoneFunc, Node, NodeClock, WeightedNode, WeightedNodeBuilder};

/// 未设置初始权重时的默认权重
pub const DEFAULT_WEIGHT: f64 = 100.0;

/// 直接权重节点
pub struct DirectNode {
    raw: Arc<Node>,
    clock: NodeClock,
    last_pick: AtomicU64,
}

impl DirectNode {
    pub fn new(raw: Arc<Node>) -> Self {
        Self {
            raw,
            clock: NodeClock::new(),
            last_pick: AtomicU64::new(0),
        }
    }
}

impl WeightedNode for DirectNode {
    fn raw(&self) -> &Arc<Node> {
        &self.raw
    }

    fn weight(&self) -> f64 {
        self.raw
            .initial_weight()
            .map(|w| w as f64)
            .unwrap_or(DEFAULT_WEIGHT)
    }

    fn pick(&self) -> DoneFunc {
        self.last_pick.fetch_max(self.clock.now(), Ordering::AcqRel);
        Box::new(|_, _| {})
    }

    fn pick_elapsed(&self) -> Duration {
        self.clock
            .elapsed_since(self.last_pick.load(Ordering::Acquire))
    }
}

/// 直接权重节点构建器
#[derive(Debug, Clone, Copy, Default)]
pub struct Builder;

impl WeightedNodeBuilder for Builder {
    fn build(&self, node: Arc<Node>) -> Arc<dyn WeightedNode> {
        Arc::new(DirectNode::new(node))
    }
}
