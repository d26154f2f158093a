//! 节点过滤器

use std::sync::Arc;

use super::WeightedNode;
use crate::context::Context;

/// 节点过滤器：输入候选节点，返回保留下来的节点
pub type NodeFilter = Arc<
    dyn Fn(&Context, Vec<Arc<dyn WeightedNode>>) -> Vec<Arc<dyn WeightedNode>> + Send + Sync,
>;

/// 只保留指定版本的节点
pub fn version(version: impl Into<String>) -> NodeFilter {
    let version = version.into();
    Arc::new(move |_ctx, nodes| {
        nodes
            .into_iter()
            .filter(|n| n.raw().version() == version)
            .collect()
    })
}

/// 只保留元数据 `key` 等于 `value` 的节点
pub fn metadata(key: impl Into<String>, value: impl Into<String>) -> NodeFilter {
    let key = key.into();
    let value = value.into();
    Arc::new(move |_ctx, nodes| {
        nodes
            .into_iter()
            .filter(|n| n.raw().metadata().get(&key) == Some(&value))
            .collect()
    })
}
