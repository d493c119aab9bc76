use crate::client::entity::WireMessage;
use async_trait::async_trait;

/// # Summary
/// 入站消息处理器，按消息类型或通配注册到客户端。
#[async_trait]
pub trait MessageHandler: Send + Sync {
    async fn handle(&self, message: &WireMessage);
}

/// 以同步闭包实现的入站消息处理器
pub struct FnMessageHandler<F>(pub F);

#[async_trait]
impl<F> MessageHandler for FnMessageHandler<F>
where
    F: Fn(&WireMessage) + Send + Sync,
{
    async fn handle(&self, message: &WireMessage) {
        (self.0)(message)
    }
}
