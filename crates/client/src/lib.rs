//! 被测交易引擎的 WebSocket 客户端。

pub mod auth;
pub mod client;
pub mod router;

pub use client::EngineClient;
pub use router::MessageRouter;
