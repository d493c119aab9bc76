use crate::fault::entity::{CorruptionKind, SimulatedException};
use async_trait::async_trait;
use serde_json::Value;
use std::time::Duration;

/// # Summary
/// 故障事件处理器，模拟器在故障触发与恢复时逐个 await 调用。
#[async_trait]
pub trait FaultHandler: Send + Sync {
    async fn on_fault(&self, exception: &SimulatedException);

    async fn on_recover(&self, _exception: &SimulatedException) {}
}

/// # Summary
/// 供推送器/客户端在发送路径上同步查询的故障注入器。
///
/// # Invariants
/// - 所有方法均为同步调用，不得阻塞。
pub trait FaultInjector: Send + Sync {
    /// 当前生效的网络延迟
    fn network_delay(&self) -> Option<Duration>;

    /// 是否处于断线故障中
    fn is_disconnected(&self) -> bool;

    /// 下一条记录是否应被损坏
    fn should_corrupt_data(&self) -> bool;

    /// 原地损坏载荷，返回所施加的损坏方式；载荷不是对象时返回 None
    fn corrupt_data(&self, payload: &mut Value) -> Option<CorruptionKind>;
}

/// 以同步闭包实现的故障处理器，只响应触发事件
pub struct FnFaultHandler<F>(pub F);

#[async_trait]
impl<F> FaultHandler for FnFaultHandler<F>
where
    F: Fn(&SimulatedException) + Send + Sync,
{
    async fn on_fault(&self, exception: &SimulatedException) {
        (self.0)(exception)
    }
}
