//! 故障注入：四类故障循环与供发送路径同步查询的注入器。

pub mod corruption;
pub mod simulator;

pub use simulator::ExceptionSimulator;
