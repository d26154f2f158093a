//! 平滑加权轮询
//!
//! nginx 的 smooth weighted round robin：每轮每个节点的当前权重加上自身权重，
//! 选当前权重最大者，再把它的当前权重减去总权重。当前权重按地址保存，
//! 节点下线后对应的记录会被清理。

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use parking_lot::Mutex;

use super::{Balancer, BalancerBuilder, DefaultBuilder, DoneFunc, WeightedNode, direct};
use crate::context::Context;
use crate::error::{Result, RoutingError};

/// 选择器名字
pub const NAME: &str = "wrr";

/// 平滑加权轮询选择策略
#[derive(Debug, Default)]
pub struct WrrBalancer {
    current: Mutex<HashMap<String, f64>>,
}

impl WrrBalancer {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Balancer for WrrBalancer {
    fn pick(
        &self,
        _ctx: &Context,
        nodes: &[Arc<dyn WeightedNode>],
    ) -> Result<(Arc<dyn WeightedNode>, DoneFunc)> {
        let mut current = self.current.lock();

        let mut total = 0.0;
        let mut selected: Option<(usize, f64)> = None;
        for (index, node) in nodes.iter().enumerate() {
            let weight = node.weight();
            total += weight;

            let cw = current.entry(node.raw().address().to_string()).or_insert(0.0);
            *cw += weight;
            if selected.is_none_or(|(_, best)| *cw > best) {
                selected = Some((index, *cw));
            }
        }

        let (index, _) = selected.ok_or(RoutingError::NoAvailable)?;
        let chosen = nodes[index].clone();
        if let Some(cw) = current.get_mut(chosen.raw().address()) {
            *cw -= total;
        }

        if current.len() > nodes.len() {
            let alive: HashSet<&str> = nodes.iter().map(|n| n.raw().address()).collect();
            current.retain(|addr, _| alive.contains(addr.as_str()));
        }
        drop(current);

        let done = chosen.pick();
        Ok((chosen, done))
    }
}

/// 平滑加权轮询选择策略构建器
#[derive(Debug, Clone, Copy, Default)]
pub struct WrrBuilder;

impl BalancerBuilder for WrrBuilder {
    fn build(&self) -> Box<dyn Balancer> {
        Box::new(WrrBalancer::new())
    }
}

/// 直接权重节点 + 平滑加权轮询的选择器构建器
pub fn builder() -> DefaultBuilder {
    DefaultBuilder::new(NAME, Arc::new(direct::Builder), Arc::new(WrrBuilder))
}
