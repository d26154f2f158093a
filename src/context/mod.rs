//! 调用上下文
//!
//! 提供取消信号、截止时间和值传递，用于约束一次"选节点 + 调用"的生命周期。
//!
//! 上下文是一棵只读的树：每个节点可以持有一个显式取消令牌、一个截止时间和一个值，
//! 并引用零到两个父节点（两个父节点即 [`merge`] 的结果）。完成状态按需计算，
//! 不会为等待父节点而派生后台任务。

mod merge;

pub use merge::merge;

use std::any::{Any, TypeId};
use std::fmt;
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use futures::FutureExt;
use futures::future::{BoxFuture, select_all};
use thiserror::Error;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// 上下文结束原因
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContextError {
    #[error("context canceled")]
    Cancelled,
    #[error("context deadline exceeded")]
    DeadlineExceeded,
}

/// 调用上下文（克隆开销很小）
#[derive(Clone)]
pub struct Context {
    inner: Arc<Inner>,
}

struct Inner {
    token: Option<CancellationToken>,
    deadline: Option<Instant>,
    parents: Vec<Context>,
    value: Option<(TypeId, Arc<dyn Any + Send + Sync>)>,
    // 第一次观察到的结束原因及其发生时间，写入后不再变化
    cause: OnceLock<(ContextError, Instant)>,
}

impl Inner {
    fn new(
        token: Option<CancellationToken>,
        deadline: Option<Instant>,
        parents: Vec<Context>,
        value: Option<(TypeId, Arc<dyn Any + Send + Sync>)>,
    ) -> Self {
        Self {
            token,
            deadline,
            parents,
            value,
            cause: OnceLock::new(),
        }
    }
}

impl Context {
    /// 永不结束、没有截止时间、不携带值的根上下文
    pub fn background() -> Self {
        Self {
            inner: Arc::new(Inner::new(None, None, Vec::new(), None)),
        }
    }

    /// 派生一个可显式取消的子上下文
    pub fn with_cancel(parent: &Context) -> (Context, CancelFunc) {
        Self::derive(vec![parent.clone()], None)
    }

    /// 派生一个带截止时间的子上下文
    ///
    /// 实际截止时间取父上下文与 `deadline` 中较早者
    pub fn with_deadline(parent: &Context, deadline: Instant) -> (Context, CancelFunc) {
        Self::derive(vec![parent.clone()], Some(deadline))
    }

    /// 派生一个在 `timeout` 之后超时的子上下文
    pub fn with_timeout(parent: &Context, timeout: Duration) -> (Context, CancelFunc) {
        Self::with_deadline(parent, Instant::now() + timeout)
    }

    /// 派生一个携带值的子上下文，按类型查找
    pub fn with_value<T>(parent: &Context, value: T) -> Context
    where
        T: Any + Send + Sync,
    {
        let value: Arc<dyn Any + Send + Sync> = Arc::new(value);
        Context {
            inner: Arc::new(Inner::new(
                None,
                None,
                vec![parent.clone()],
                Some((TypeId::of::<T>(), value)),
            )),
        }
    }

    pub(crate) fn derive(parents: Vec<Context>, deadline: Option<Instant>) -> (Context, CancelFunc) {
        let token = CancellationToken::new();
        let ctx = Context {
            inner: Arc::new(Inner::new(Some(token.clone()), deadline, parents, None)),
        };
        let cancel = CancelFunc {
            ctx: ctx.clone(),
            token,
        };
        (ctx, cancel)
    }

    /// 截止时间：自身与所有祖先中最早的一个
    pub fn deadline(&self) -> Option<Instant> {
        let inherited = self
            .inner
            .parents
            .iter()
            .filter_map(Context::deadline)
            .min();
        match (self.inner.deadline, inherited) {
            (Some(own), Some(parent)) => Some(own.min(parent)),
            (own, parent) => own.or(parent),
        }
    }

    /// 按类型查找值：先自身，再按顺序查找父上下文
    pub fn value<T>(&self) -> Option<Arc<T>>
    where
        T: Any + Send + Sync,
    {
        if let Some((type_id, value)) = &self.inner.value {
            if *type_id == TypeId::of::<T>() {
                if let Ok(value) = value.clone().downcast::<T>() {
                    return Some(value);
                }
            }
        }
        self.inner.parents.iter().find_map(|p| p.value::<T>())
    }

    /// 结束原因；未结束时返回 `None`
    pub fn err(&self) -> Option<ContextError> {
        self.state().map(|(err, _)| err)
    }

    /// 是否已结束
    pub fn is_done(&self) -> bool {
        self.err().is_some()
    }

    /// 等待上下文结束
    pub fn done(&self) -> BoxFuture<'static, ()> {
        let ctx = self.clone();
        async move {
            if ctx.is_done() {
                return;
            }

            let mut waits: Vec<BoxFuture<'static, ()>> = Vec::new();
            if let Some(token) = &ctx.inner.token {
                waits.push(token.clone().cancelled_owned().boxed());
            }
            if let Some(deadline) = ctx.inner.deadline {
                waits.push(tokio::time::sleep_until(deadline).boxed());
            }
            for parent in &ctx.inner.parents {
                waits.push(parent.done());
            }

            if waits.is_empty() {
                futures::future::pending::<()>().await;
            }
            select_all(waits).await;
            // 固化结束原因
            let _ = ctx.state();
        }
        .boxed()
    }

    /// 计算结束原因与发生时间，取所有已发生原因中最早的一个
    fn state(&self) -> Option<(ContextError, Instant)> {
        if let Some(state) = self.inner.cause.get() {
            return Some(*state);
        }

        let now = Instant::now();
        let mut earliest = self
            .inner
            .parents
            .iter()
            .filter_map(Context::state)
            .min_by_key(|(_, at)| *at);

        if let Some(deadline) = self.inner.deadline {
            if now >= deadline && earliest.is_none_or(|(_, at)| deadline < at) {
                earliest = Some((ContextError::DeadlineExceeded, deadline));
            }
        }

        let state = earliest?;
        Some(*self.inner.cause.get_or_init(|| state))
    }

    fn cancel_now(&self) {
        // 父上下文已经结束时保留父上下文的原因
        let state = self
            .state()
            .unwrap_or((ContextError::Cancelled, Instant::now()));
        let _ = self.inner.cause.set(state);
    }
}

impl Default for Context {
    fn default() -> Self {
        Context::background()
    }
}

impl fmt::Debug for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Context")
            .field("deadline", &self.deadline())
            .field("err", &self.err())
            .field("parents", &self.inner.parents.len())
            .finish()
    }
}

/// 显式取消函数，重复调用无副作用
#[derive(Clone)]
pub struct CancelFunc {
    ctx: Context,
    token: CancellationToken,
}

impl CancelFunc {
    /// 取消对应的上下文
    pub fn cancel(&self) {
        if self.token.is_cancelled() {
            return;
        }
        self.ctx.cancel_now();
        self.token.cancel();
    }
}

impl fmt::Debug for CancelFunc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CancelFunc")
            .field("cancelled", &self.token.is_cancelled())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, PartialEq)]
    struct RequestId(&'static str);

    #[test]
    fn background_is_never_done() {
        let ctx = Context::background();
        assert!(ctx.err().is_none());
        assert!(ctx.deadline().is_none());
        assert!(ctx.value::<RequestId>().is_none());
    }

    #[test]
    fn cancel_propagates_to_children() {
        let (parent, cancel) = Context::with_cancel(&Context::background());
        let (child, _child_cancel) = Context::with_cancel(&parent);
        assert!(!child.is_done());

        cancel.cancel();
        assert_eq!(parent.err(), Some(ContextError::Cancelled));
        assert_eq!(child.err(), Some(ContextError::Cancelled));
    }

    #[test]
    fn child_cancel_does_not_touch_parent() {
        let (parent, _cancel) = Context::with_cancel(&Context::background());
        let (child, child_cancel) = Context::with_cancel(&parent);
        child_cancel.cancel();
        assert!(child.is_done());
        assert!(!parent.is_done());
    }

    #[test]
    fn values_are_found_through_ancestors() {
        let ctx = Context::with_value(&Context::background(), RequestId("r-1"));
        let (child, _cancel) = Context::with_cancel(&ctx);
        assert_eq!(child.value::<RequestId>().as_deref(), Some(&RequestId("r-1")));
        assert!(child.value::<String>().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn deadline_fires_and_wakes_waiters() {
        let (ctx, _cancel) = Context::with_timeout(&Context::background(), Duration::from_millis(50));
        assert!(!ctx.is_done());

        ctx.done().await;
        assert_eq!(ctx.err(), Some(ContextError::DeadlineExceeded));
    }

    #[tokio::test(start_paused = true)]
    async fn child_deadline_never_extends_parent() {
        let (parent, _c1) = Context::with_timeout(&Context::background(), Duration::from_secs(1));
        let (child, _c2) = Context::with_timeout(&parent, Duration::from_secs(10));
        assert_eq!(child.deadline(), parent.deadline());
    }

    #[tokio::test]
    async fn done_resolves_after_cancel() {
        let (ctx, cancel) = Context::with_cancel(&Context::background());
        let waiter = tokio::spawn({
            let ctx = ctx.clone();
            async move { ctx.done().await }
        });
        cancel.cancel();
        waiter.await.unwrap();
        assert_eq!(ctx.err(), Some(ContextError::Cancelled));
    }
}
