use crate::report::entity::ProbeReading;

/// # Summary
/// 监控快照的数据来源，由编排层实现并注入监控器。
///
/// # Invariants
/// - 只做读取，不得修改被观测组件的状态。
pub trait SnapshotSource: Send + Sync {
    fn probe(&self) -> ProbeReading;
}
