use harness_core::client::entity::{MessageType, WireMessage};
use harness_core::client::port::MessageHandler;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

/// # Summary
/// 入站消息路由：按消息类型分发，再交给通配处理器。
#[derive(Default)]
pub struct MessageRouter {
    by_type: RwLock<HashMap<MessageType, Vec<Arc<dyn MessageHandler>>>>,
    wildcard: RwLock<Vec<Arc<dyn MessageHandler>>>,
}

impl MessageRouter {
    pub fn new() -> Self {
        Self::default()
    }

    /// 注册某一消息类型的处理器
    pub fn on(&self, kind: MessageType, handler: Arc<dyn MessageHandler>) {
        self.by_type
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .entry(kind)
            .or_default()
            .push(handler);
    }

    /// 注册接收所有消息的处理器
    pub fn on_any(&self, handler: Arc<dyn MessageHandler>) {
        self.wildcard
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .push(handler);
    }

    /// # Summary
    /// 把消息交给匹配类型的处理器与全部通配处理器，按注册顺序 await。
    ///
    /// # Returns
    /// 被调用的处理器数量。
    pub async fn route(&self, message: &WireMessage) -> usize {
        let mut targets: Vec<Arc<dyn MessageHandler>> = self
            .by_type
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(&message.message_type())
            .cloned()
            .unwrap_or_default();
        targets.extend(
            self.wildcard
                .read()
                .unwrap_or_else(|e| e.into_inner())
                .iter()
                .cloned(),
        );

        for handler in &targets {
            handler.handle(message).await;
        }
        targets.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use harness_core::client::port::FnMessageHandler;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn test_typed_and_wildcard_handlers() {
        let router = MessageRouter::new();
        let pongs = Arc::new(AtomicUsize::new(0));
        let all = Arc::new(AtomicUsize::new(0));
        let (p, a) = (pongs.clone(), all.clone());
        router.on(
            MessageType::Pong,
            Arc::new(FnMessageHandler(move |_: &WireMessage| {
                p.fetch_add(1, Ordering::SeqCst);
            })),
        );
        router.on_any(Arc::new(FnMessageHandler(move |_: &WireMessage| {
            a.fetch_add(1, Ordering::SeqCst);
        })));

        assert_eq!(router.route(&WireMessage::new(MessageType::Pong, json!({}))).await, 2);
        let other = WireMessage::new(MessageType::Other("order_ack".into()), json!({}));
        assert_eq!(router.route(&other).await, 1);

        assert_eq!(pongs.load(Ordering::SeqCst), 1);
        assert_eq!(all.load(Ordering::SeqCst), 2);
    }
}
