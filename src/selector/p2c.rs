//! Power of two choices
//!
//! 每次随机取两个不同的节点，选权重较高者；权重相同时选更久未被选中的节点。
//! 落选节点超过 [`FORCE_PICK`] 未被选中时强制选它一次，
//! 同一时刻最多只有一次强制选择在进行。

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use rand::{Rng, thread_rng};

use super::{Balancer, BalancerBuilder, DefaultBuilder, DoneFunc, WeightedNode, ewma};
use crate::context::Context;
use crate::error::{Result, RoutingError};

/// 选择器名字
pub const NAME: &str = "p2c";

/// 节点超过该时长未被选中时强制选中一次
pub const FORCE_PICK: Duration = Duration::from_secs(3);

/// P2C 选择策略
#[derive(Debug, Default)]
pub struct P2cBalancer {
    picked: AtomicBool,
}

impl P2cBalancer {
    pub fn new() -> Self {
        Self::default()
    }

    fn pre_pick(len: usize) -> (usize, usize) {
        let mut rng = thread_rng();
        let a = rng.gen_range(0..len);
        let mut b = rng.gen_range(0..len - 1);
        if b >= a {
            b += 1;
        }
        (a, b)
    }
}

impl Balancer for P2cBalancer {
    fn pick(
        &self,
        _ctx: &Context,
        nodes: &[Arc<dyn WeightedNode>],
    ) -> Result<(Arc<dyn WeightedNode>, DoneFunc)> {
        let chosen = match nodes.len() {
            0 => return Err(RoutingError::NoAvailable),
            1 => nodes[0].clone(),
            len => {
                let (a, b) = Self::pre_pick(len);
                let (a, b) = (&nodes[a], &nodes[b]);
                let (wa, wb) = (a.weight(), b.weight());

                let (mut pc, upc) = if wb > wa || (wb == wa && b.pick_elapsed() > a.pick_elapsed())
                {
                    (b, a)
                } else {
                    (a, b)
                };

                if upc.pick_elapsed() > FORCE_PICK
                    && self
                        .picked
                        .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
                        .is_ok()
                {
                    pc = upc;
                    self.picked.store(false, Ordering::Release);
                }
                pc.clone()
            }
        };

        let done = chosen.pick();
        Ok((chosen, done))
    }
}

/// P2C 选择策略构建器
#[derive(Debug, Clone, Copy, Default)]
pub struct P2cBuilder;

impl BalancerBuilder for P2cBuilder {
    fn build(&self) -> Box<dyn Balancer> {
        Box::new(P2cBalancer::new())
    }
}

/// EWMA 节点 + P2C 的选择器构建器
pub fn builder() -> DefaultBuilder {
    DefaultBuilder::new(NAME, Arc::new(ewma::Builder::new()), Arc::new(P2cBuilder))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::selector::direct;
    use crate::selector::{DoneInfo, Node, WeightedNodeBuilder};

    fn direct_node(addr: &str, weight: i64) -> Arc<dyn WeightedNode> {
        direct::Builder.build(Arc::new(
            Node::new("grpc", addr).with_initial_weight(weight),
        ))
    }

    #[test]
    fn empty_pool_is_unavailable() {
        let err = P2cBalancer::new().pick(&Context::background(), &[]).err().unwrap();
        assert!(matches!(err, RoutingError::NoAvailable));
    }

    #[test]
    fn single_node_is_always_picked() {
        let ctx = Context::background();
        let nodes = vec![direct_node("127.0.0.1:9000", 10)];
        let balancer = P2cBalancer::new();
        for _ in 0..10 {
            let (node, done) = balancer.pick(&ctx, &nodes).unwrap();
            assert_eq!(node.raw().address(), "127.0.0.1:9000");
            done(&ctx, DoneInfo::success());
        }
    }

    #[test]
    fn heavier_node_wins() {
        let ctx = Context::background();
        let nodes = vec![
            direct_node("127.0.0.1:9000", 10),
            direct_node("127.0.0.1:9001", 0),
        ];
        let balancer = P2cBalancer::new();

        let mut heavy = 0;
        for _ in 0..100 {
            let (node, done) = balancer.pick(&ctx, &nodes).unwrap();
            if node.raw().address() == "127.0.0.1:9000" {
                heavy += 1;
            }
            done(&ctx, DoneInfo::success());
        }
        // 从未被选中的轻节点只会被强制选中一次
        assert!(heavy >= 99, "heavy picked {} times", heavy);
    }

    #[tokio::test(start_paused = true)]
    async fn ties_prefer_the_longer_idle_node() {
        let ctx = Context::background();
        let nodes = vec![
            direct_node("127.0.0.1:9000", 10),
            direct_node("127.0.0.1:9001", 10),
        ];
        let balancer = P2cBalancer::new();

        let _ = nodes[1].pick();
        tokio::time::advance(Duration::from_secs(1)).await;
        let _ = nodes[0].pick();

        let (node, _) = balancer.pick(&ctx, &nodes).unwrap();
        assert_eq!(node.raw().address(), "127.0.0.1:9001");
    }

    #[tokio::test(start_paused = true)]
    async fn idle_node_is_force_picked() {
        let ctx = Context::background();
        let nodes = vec![
            direct_node("127.0.0.1:9000", 10),
            direct_node("127.0.0.1:9001", 1),
        ];
        let balancer = P2cBalancer::new();

        let _ = nodes[0].pick();
        let _ = nodes[1].pick();
        tokio::time::advance(FORCE_PICK + Duration::from_secs(1)).await;

        let (node, _) = balancer.pick(&ctx, &nodes).unwrap();
        assert_eq!(node.raw().address(), "127.0.0.1:9001");

        let (node, _) = balancer.pick(&ctx, &nodes).unwrap();
        assert_eq!(node.raw().address(), "127.0.0.1:9000");
    }

    #[test]
    fn builder_uses_p2c_name() {
        use crate::selector::Builder;
        assert_eq!(builder().name(), NAME);
    }
}
