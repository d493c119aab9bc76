//! 模拟运行编排：装配推送器、Worker、故障模拟、引擎客户端与监控，并驱动一次运行。

pub mod error;
pub mod orchestrator;
pub mod wiring;

pub use error::SimulationError;
pub use orchestrator::{Orchestrator, RunOutcome, SimulationState};
