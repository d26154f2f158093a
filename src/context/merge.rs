use super::{CancelFunc, Context};

/// 合并两个相互独立的上下文
///
/// 合并后的上下文在以下任一情况最先发生时结束：`a` 结束、`b` 结束、调用返回的
/// [`CancelFunc`]。结束原因取最先发生的那一个；截止时间取两者中较早者；
/// 值查找先查 `a` 再查 `b`。
///
/// 典型用法是把调用方的截止时间与进程的关闭信号合并为一个信号。
/// 若合并时某个父上下文已经结束，返回的上下文立即处于结束状态。
pub fn merge(a: &Context, b: &Context) -> (Context, CancelFunc) {
    let (merged, cancel) = Context::derive(vec![a.clone(), b.clone()], None);
    // 父上下文已结束时立即固化结束原因
    let _ = merged.err();
    (merged, cancel)
}
