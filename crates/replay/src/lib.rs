//! 历史行情回放：按倍速把有序序列推送给注册的消费者。

pub mod pusher;

pub use pusher::DataPusher;
