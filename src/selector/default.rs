//! 默认选择器
//!
//! 节点池是一个不可变快照，通过 `ArcSwapOption` 整体替换：
//! `select` 只读取一次快照指针，因此永远看到某一代完整的节点池。

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use arc_swap::ArcSwapOption;
use tracing::debug;

use super::{
    Balancer, BalancerBuilder, Builder, DoneFunc, Node, Peer, SelectOptions, Selector,
    WeightedNode, WeightedNodeBuilder,
};
use crate::context::Context;
use crate::error::{Result, RoutingError};

/// 一代节点池
struct Generation {
    seq: u64,
    nodes: Vec<Arc<dyn WeightedNode>>,
}

/// 默认选择器：加权节点构建器 + 选择策略
pub struct DefaultSelector {
    node_builder: Arc<dyn WeightedNodeBuilder>,
    balancer: Box<dyn Balancer>,
    pool: ArcSwapOption<Generation>,
}

impl DefaultSelector {
    pub fn new(node_builder: Arc<dyn WeightedNodeBuilder>, balancer: Box<dyn Balancer>) -> Self {
        Self {
            node_builder,
            balancer,
            pool: ArcSwapOption::empty(),
        }
    }

    /// 当前节点池的代数，尚未 `store` 过时为 0
    pub fn generation(&self) -> u64 {
        self.pool.load().as_ref().map_or(0, |g| g.seq)
    }

    /// 当前节点池中的节点数
    pub fn len(&self) -> usize {
        self.pool.load().as_ref().map_or(0, |g| g.nodes.len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn next_generation(&self, prev: Option<&Generation>, nodes: &[Arc<Node>]) -> Generation {
        // 与上一代完全相同的节点沿用原有的加权节点，保留其统计状态
        let reusable: HashMap<&str, &Arc<dyn WeightedNode>> = prev
            .map(|g| {
                g.nodes
                    .iter()
                    .map(|wn| (wn.raw().address(), wn))
                    .collect()
            })
            .unwrap_or_default();

        let weighted = nodes
            .iter()
            .map(|node| match reusable.get(node.address()) {
                Some(wn) if wn.raw() == node => (*wn).clone(),
                _ => self.node_builder.build(node.clone()),
            })
            .collect();

        Generation {
            seq: prev.map_or(0, |g| g.seq) + 1,
            nodes: weighted,
        }
    }
}

impl Selector for DefaultSelector {
    fn store(&self, nodes: Vec<Arc<Node>>) {
        let prev = self
            .pool
            .rcu(|prev| Some(Arc::new(self.next_generation(prev.as_deref(), &nodes))));
        debug!(
            generation = prev.as_ref().map_or(0, |g| g.seq) + 1,
            nodes = nodes.len(),
            "Selector pool replaced"
        );
    }

    fn select(&self, ctx: &Context, opts: &SelectOptions) -> Result<(Arc<Node>, DoneFunc)> {
        let pool = self.pool.load_full().ok_or(RoutingError::NoAvailable)?;

        let mut candidates = pool.nodes.clone();
        for filter in &opts.filters {
            candidates = filter(ctx, candidates);
        }
        if candidates.is_empty() {
            return Err(RoutingError::NoAvailable);
        }

        let (chosen, done) = self.balancer.pick(ctx, &candidates)?;
        if let Some(peer) = Peer::from_context(ctx) {
            peer.set_node(chosen.raw().clone());
        }
        Ok((chosen.raw().clone(), done))
    }
}

impl fmt::Debug for DefaultSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DefaultSelector")
            .field("generation", &self.generation())
            .field("nodes", &self.len())
            .finish()
    }
}

/// 默认选择器构建器
#[derive(Clone)]
pub struct DefaultBuilder {
    name: String,
    node: Arc<dyn WeightedNodeBuilder>,
    balancer: Arc<dyn BalancerBuilder>,
}

impl DefaultBuilder {
    pub fn new(
        name: impl Into<String>,
        node: Arc<dyn WeightedNodeBuilder>,
        balancer: Arc<dyn BalancerBuilder>,
    ) -> Self {
        Self {
            name: name.into(),
            node,
            balancer,
        }
    }

    /// 构建具体类型的选择器
    pub fn build_default(&self) -> DefaultSelector {
        DefaultSelector::new(self.node.clone(), self.balancer.build())
    }
}

impl Builder for DefaultBuilder {
    fn name(&self) -> &str {
        &self.name
    }

    fn build(&self) -> Arc<dyn Selector> {
        Arc::new(self.build_default())
    }
}

impl fmt::Debug for DefaultBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DefaultBuilder")
            .field("name", &self.name)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::selector::{DoneInfo, filter, p2c, random, wrr};

    fn nodes(addrs: &[&str]) -> Vec<Arc<Node>> {
        addrs
            .iter()
            .map(|addr| Arc::new(Node::new("grpc", *addr)))
            .collect()
    }

    #[test]
    fn empty_selector_is_unavailable() {
        let selector = random::builder().build_default();
        let err = selector.select(&Context::background(), &SelectOptions::new()).err().unwrap();
        assert!(matches!(err, RoutingError::NoAvailable));

        selector.store(Vec::new());
        let err = selector.select(&Context::background(), &SelectOptions::new()).err().unwrap();
        assert!(matches!(err, RoutingError::NoAvailable));
    }

    #[test]
    fn store_replaces_the_whole_pool() {
        let ctx = Context::background();
        for builder in [p2c::builder(), random::builder(), wrr::builder()] {
            let selector = builder.build_default();
            selector.store(nodes(&["127.0.0.1:9000", "127.0.0.1:9001"]));
            selector.store(nodes(&["127.0.0.1:9002"]));
            assert_eq!(selector.generation(), 2);

            for _ in 0..50 {
                let (node, done) = selector.select(&ctx, &SelectOptions::new()).unwrap();
                assert_eq!(node.address(), "127.0.0.1:9002");
                done(&ctx, DoneInfo::success());
            }
        }
    }

    #[test]
    fn fully_filtered_pool_is_unavailable() {
        let ctx = Context::background();
        let selector = p2c::builder().build_default();
        selector.store(vec![Arc::new(
            Node::new("grpc", "127.0.0.1:9000").with_version("v1"),
        )]);

        let opts = SelectOptions::new().filter(filter::version("v2"));
        let err = selector.select(&ctx, &opts).err().unwrap();
        assert!(matches!(err, RoutingError::NoAvailable));

        let opts = SelectOptions::new().filter(filter::version("v1"));
        assert!(selector.select(&ctx, &opts).is_ok());
    }

    #[test]
    fn unchanged_nodes_keep_their_weight_state() {
        let ctx = Context::background();
        let selector = p2c::builder().build_default();
        selector.store(nodes(&["127.0.0.1:9000"]));

        let (_, done) = selector.select(&ctx, &SelectOptions::new()).unwrap();
        done(&ctx, DoneInfo::failure(anyhow::anyhow!("reset"), true));
        let before = selector.pool.load_full().unwrap().nodes[0].clone();

        selector.store(nodes(&["127.0.0.1:9000", "127.0.0.1:9001"]));
        let after = selector.pool.load_full().unwrap().nodes[0].clone();
        assert!(Arc::ptr_eq(&before, &after));

        // 元数据变化视为新节点
        selector.store(vec![Arc::new(
            Node::new("grpc", "127.0.0.1:9000").with_metadata("zone", "b"),
        )]);
        let changed = selector.pool.load_full().unwrap().nodes[0].clone();
        assert!(!Arc::ptr_eq(&before, &changed));
    }

    #[test]
    fn select_records_peer() {
        let selector = random::builder().build_default();
        selector.store(nodes(&["127.0.0.1:9000"]));

        let ctx = Peer::with_peer(&Context::background());
        let (node, done) = selector.select(&ctx, &SelectOptions::new()).unwrap();
        done(&ctx, DoneInfo::success());

        let peer = Peer::from_context(&ctx).and_then(|p| p.node()).unwrap();
        assert_eq!(peer.address(), node.address());
    }
}
