//! 运行监控：指标采集、纸面撮合与报告生成。

pub mod collector;
pub mod ledger;
pub mod report;

pub use collector::{Monitor, RunTotals};
pub use ledger::{Fill, PaperLedger};
pub use report::{ReportFiles, ReportGenerator};
