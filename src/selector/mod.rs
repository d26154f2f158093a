//! 加权节点选择
//!
//! 把发现得到的节点包装成带实时权重的节点池，并为每次调用选出一个节点。
//!
//! - [`Selector::store`] 整体替换节点池（一次原子切换，不存在部分可见）
//! - [`Selector::select`] 在当前节点池上执行过滤链与选择策略，返回节点和完成回调
//! - 完成回调 [`DoneFunc`] 必须在调用结束后恰好执行一次，用于更新节点权重

pub mod default;
pub mod direct;
pub mod ewma;
pub mod filter;
pub mod node;
pub mod p2c;
pub mod peer;
pub mod random;
pub mod registry;
pub mod wrr;

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;

use crate::context::Context;
use crate::error::Result;

pub use default::{DefaultBuilder, DefaultSelector};
pub use filter::NodeFilter;
pub use node::Node;
pub use peer::Peer;
pub use registry::BuilderRegistry;

/// 调用结束后的回调，消费一次调用结果
pub type DoneFunc = Box<dyn FnOnce(&Context, DoneInfo) + Send>;

/// 响应元数据
pub type ReplyMetadata = HashMap<String, String>;

/// 一次调用的结果
#[derive(Debug, Default)]
pub struct DoneInfo {
    /// 调用错误，成功时为 `None`
    pub err: Option<anyhow::Error>,

    /// 响应元数据
    pub reply_md: ReplyMetadata,

    /// 是否已经发出过数据（为 false 说明节点根本没有被访问到）
    pub bytes_sent: bool,

    /// 是否收到过数据
    pub bytes_received: bool,
}

impl DoneInfo {
    /// 成功的调用
    pub fn success() -> Self {
        Self {
            bytes_sent: true,
            bytes_received: true,
            ..Default::default()
        }
    }

    /// 失败的调用
    pub fn failure(err: impl Into<anyhow::Error>, bytes_sent: bool) -> Self {
        Self {
            err: Some(err.into()),
            bytes_sent,
            ..Default::default()
        }
    }

    /// 附加响应元数据
    pub fn with_reply_md(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.reply_md.insert(key.into(), value.into());
        self
    }
}

/// 带实时调度状态的节点
pub trait WeightedNode: Send + Sync {
    /// 被包装的原始节点
    fn raw(&self) -> &Arc<Node>;

    /// 当前权重，由具体策略定义
    fn weight(&self) -> f64;

    /// 记录一次选中，返回完成回调
    fn pick(&self) -> DoneFunc;

    /// 距离上次被选中经过的时间；从未被选中时为 `Duration::MAX`
    fn pick_elapsed(&self) -> Duration;
}

impl fmt::Debug for dyn WeightedNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WeightedNode")
            .field("address", &self.raw().address())
            .field("weight", &self.weight())
            .finish()
    }
}

/// 把原始节点包装为加权节点
pub trait WeightedNodeBuilder: Send + Sync {
    fn build(&self, node: Arc<Node>) -> Arc<dyn WeightedNode>;
}

/// 选择策略
pub trait Balancer: Send + Sync {
    /// 在候选节点中选出一个，并记录本次选中
    fn pick(
        &self,
        ctx: &Context,
        nodes: &[Arc<dyn WeightedNode>],
    ) -> Result<(Arc<dyn WeightedNode>, DoneFunc)>;
}

/// 选择策略构建器
pub trait BalancerBuilder: Send + Sync {
    fn build(&self) -> Box<dyn Balancer>;
}

/// 节点选择器
pub trait Selector: Send + Sync {
    /// 整体替换节点池
    fn store(&self, nodes: Vec<Arc<Node>>);

    /// 选出一个节点
    ///
    /// 过滤后没有候选节点时返回 `RoutingError::NoAvailable`，不会退化为随机选择
    fn select(&self, ctx: &Context, opts: &SelectOptions) -> Result<(Arc<Node>, DoneFunc)>;
}

/// 选择器构建器，按名字注册到 [`BuilderRegistry`]
pub trait Builder: Send + Sync {
    /// 构建器名字（大小写不敏感）
    fn name(&self) -> &str;

    /// 构建一个新的选择器
    fn build(&self) -> Arc<dyn Selector>;
}

/// 单次选择的选项
#[derive(Clone, Default)]
pub struct SelectOptions {
    pub(crate) filters: Vec<NodeFilter>,
}

impl SelectOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// 追加一个节点过滤器，按添加顺序执行
    pub fn filter(mut self, filter: NodeFilter) -> Self {
        self.filters.push(filter);
        self
    }
}

impl fmt::Debug for SelectOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SelectOptions")
            .field("filters", &self.filters.len())
            .finish()
    }
}

/// 节点内部的单调时钟
///
/// 时间以相对创建时刻的纳秒数保存，便于放进原子变量；0 保留给"从未发生"
#[derive(Debug, Clone, Copy)]
pub(crate) struct NodeClock {
    base: Instant,
}

impl NodeClock {
    pub(crate) fn new() -> Self {
        Self {
            base: Instant::now(),
        }
    }

    pub(crate) fn now(&self) -> u64 {
        Instant::now()
            .saturating_duration_since(self.base)
            .as_nanos()
            .saturating_add(1) as u64
    }

    pub(crate) fn elapsed_since(&self, nanos: u64) -> Duration {
        if nanos == 0 {
            return Duration::MAX;
        }
        Duration::from_nanos(self.now().saturating_sub(nanos))
    }
}
