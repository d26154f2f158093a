//! 调用对端
//!
//! 调用方把 [`Peer`] 放进上下文，`Selector::select` 会把选中的节点记录进去，
//! 调用结束后可以从同一个上下文中得知是哪个节点处理了请求。

use std::sync::Arc;

use parking_lot::Mutex;

use super::Node;
use crate::context::Context;

#[derive(Debug, Default)]
pub struct Peer {
    node: Mutex<Option<Arc<Node>>>,
}

impl Peer {
    /// 派生一个携带空 `Peer` 的上下文
    pub fn with_peer(ctx: &Context) -> Context {
        Context::with_value(ctx, Peer::default())
    }

    /// 从上下文中取出 `Peer`
    pub fn from_context(ctx: &Context) -> Option<Arc<Peer>> {
        ctx.value::<Peer>()
    }

    /// 最近一次选中的节点
    pub fn node(&self) -> Option<Arc<Node>> {
        self.node.lock().clone()
    }

    pub(crate) fn set_node(&self, node: Arc<Node>) {
        *self.node.lock() = Some(node);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn peer_travels_with_context() {
        let ctx = Peer::with_peer(&Context::background());
        let (child, _cancel) = Context::with_cancel(&ctx);

        let peer = Peer::from_context(&child).unwrap();
        assert!(peer.node().is_none());

        peer.set_node(Arc::new(Node::new("grpc", "127.0.0.1:9000")));
        let seen = Peer::from_context(&ctx).and_then(|p| p.node()).unwrap();
        assert_eq!(seen.address(), "127.0.0.1:9000");
    }

    #[test]
    fn background_has_no_peer() {
        assert!(Peer::from_context(&Context::background()).is_none());
    }
}
