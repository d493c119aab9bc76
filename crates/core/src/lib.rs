//! 实盘模拟测试框架的领域核心。
//!
//! 所有实体、错误枚举与端口 Trait 均定义于此，具体实现位于各自的 crate 中，
//! 通过 `Arc<dyn Trait>` 在编排层注入。

pub mod client;
pub mod common;
pub mod config;
pub mod fault;
pub mod market;
pub mod replay;
pub mod report;
pub mod strategy;

#[cfg(feature = "test-utils")]
pub mod test_utils;
