//! 加权随机
//!
//! 按权重比例随机选择；所有节点权重都不为正时退化为均匀随机。

use std::sync::Arc;

use rand::{Rng, thread_rng};

use super::{Balancer, BalancerBuilder, DefaultBuilder, DoneFunc, WeightedNode, direct};
use crate::context::Context;
use crate::error::{Result, RoutingError};

/// 选择器名字
pub const NAME: &str = "random";

/// 加权随机选择策略
#[derive(Debug, Clone, Copy, Default)]
pub struct RandomBalancer;

impl Balancer for RandomBalancer {
    fn pick(
        &self,
        _ctx: &Context,
        nodes: &[Arc<dyn WeightedNode>],
    ) -> Result<(Arc<dyn WeightedNode>, DoneFunc)> {
        if nodes.is_empty() {
            return Err(RoutingError::NoAvailable);
        }

        let weights: Vec<f64> = nodes.iter().map(|n| n.weight().max(0.0)).collect();
        let total: f64 = weights.iter().sum();
        let mut rng = thread_rng();

        let index = if total > 0.0 {
            let mut target = rng.gen_range(0.0..total);
            weights
                .iter()
                .position(|w| {
                    if target < *w {
                        return true;
                    }
                    target -= w;
                    false
                })
                .unwrap_or(nodes.len() - 1)
        } else {
            rng.gen_range(0..nodes.len())
        };

        let chosen = nodes[index].clone();
        let done = chosen.pick();
        Ok((chosen, done))
    }
}

/// 加权随机选择策略构建器
#[derive(Debug, Clone, Copy, Default)]
pub struct RandomBuilder;

impl BalancerBuilder for RandomBuilder {
    fn build(&self) -> Box<dyn Balancer> {
        Box::new(RandomBalancer)
    }
}

/// 直接权重节点 + 加权随机的选择器构建器
pub fn builder() -> DefaultBuilder {
    DefaultBuilder::new(NAME, Arc::new(direct::Builder), Arc::new(RandomBuilder))
}
