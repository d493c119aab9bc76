use futures::stream::SplitStream;
use futures::{SinkExt, StreamExt};
use harness_core::client::entity::{
    AuthOutcome, ClientStats, ConnectionState, MessageType, WireMessage,
};
use harness_core::client::error::{ClientError, ConnectFailure};
use harness_core::client::port::MessageHandler;
use harness_core::common::shutdown::StopSignal;
use harness_core::config::ClientConfig;
use harness_core::market::entity::MarketDataMessage;
use serde_json::{Value, json};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::protocol::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async, tungstenite};
use tracing::{debug, error, info, warn};

use crate::auth;
use crate::router::MessageRouter;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// 已安装出站队列、写协程已启动的会话，读半边交给监督协程驱动
struct Session {
    stream: SplitStream<WsStream>,
    tx: mpsc::UnboundedSender<Message>,
    writer: JoinHandle<()>,
}

// 断开时等待后台任务退出的上限
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(3);

struct ClientInner {
    config: ClientConfig,
    state_tx: watch::Sender<ConnectionState>,
    // 当前会话的出站队列，未连接时为 None
    outbound: Mutex<Option<mpsc::UnboundedSender<Message>>>,
    router: MessageRouter,
    topics: Mutex<Vec<String>>,
    stats: Mutex<ClientStats>,
    attempts: AtomicU32,
    // 调用过 authenticate 后，重连时需要重新鉴权
    auth_requested: AtomicBool,
    last_ping: Mutex<Option<Instant>>,
    stop: StopSignal,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

/// # Summary
/// 被测引擎的 WebSocket 客户端。
///
/// # Invariants
/// - 所有发送都经由出站队列交给独立的写协程，调用方不会被网络阻塞。
/// - 入站畸形帧只计数，不会中断读循环。
/// - 传输关闭后按固定间隔有限次重连；成功后重置计数并重新鉴权、重新订阅。
/// - `Failed` 与 `Closed` 为终止态。
pub struct EngineClient {
    inner: Arc<ClientInner>,
}

impl EngineClient {
    pub fn new(config: ClientConfig) -> Self {
        let (state_tx, _) = watch::channel(ConnectionState::Disconnected);
        Self {
            inner: Arc::new(ClientInner {
                config,
                state_tx,
                outbound: Mutex::new(None),
                router: MessageRouter::new(),
                topics: Mutex::new(Vec::new()),
                stats: Mutex::new(ClientStats::default()),
                attempts: AtomicU32::new(0),
                auth_requested: AtomicBool::new(false),
                last_ping: Mutex::new(None),
                stop: StopSignal::new(),
                tasks: Mutex::new(Vec::new()),
            }),
        }
    }

    /// # Summary
    /// 在限定时间内建立 WebSocket 连接，成功后启动读写与心跳协程。
    ///
    /// # Invariants
    /// - 返回 `Ok` 时出站队列已就绪，随后的 `authenticate`/`subscribe` 不会被丢弃。
    ///
    /// # Returns
    /// 失败时返回分类后的 `ConnectFailure`，状态回到 `Disconnected`。
    pub async fn connect(&self) -> Result<(), ClientError> {
        if self.state().is_open() {
            return Ok(());
        }
        self.inner.stop.reset();
        // 显式 connect 可以离开终止态
        self.inner.state_tx.send_replace(ConnectionState::Connecting);
        info!("Connecting to engine at {}", self.inner.config.url);

        let ws = match self.inner.open_socket().await {
            Ok(ws) => ws,
            Err(e) => {
                warn!("Engine connection failed: {e}");
                self.inner.set_state(ConnectionState::Disconnected);
                return Err(e.into());
            }
        };
        let session = self.inner.open_session(ws);
        self.inner.attempts.store(0, Ordering::SeqCst);
        self.inner.set_state(ConnectionState::Connected);
        info!("Connected to engine at {}", self.inner.config.url);

        let supervisor = tokio::spawn(supervise(self.inner.clone(), session));
        let heartbeat = tokio::spawn(heartbeat_loop(self.inner.clone()));
        let mut tasks = self.inner.tasks.lock().unwrap_or_else(|e| e.into_inner());
        tasks.push(supervisor);
        tasks.push(heartbeat);
        Ok(())
    }

    /// # Summary
    /// 发送 HMAC 签名的 auth 消息。
    ///
    /// # Logic
    /// 1. 缺少 api_key/api_secret 时，按配置返回 `Unauthenticated` 或 `MissingCredentials`。
    /// 2. 签名载荷为 `{timestamp}{method}{path}`，结果为小写十六进制。
    /// 3. 状态在收到 `auth_success` 后才变为 `Authenticated`。
    pub async fn authenticate(&self) -> Result<AuthOutcome, ClientError> {
        let outcome = self.inner.send_auth()?;
        if outcome == AuthOutcome::Sent {
            self.inner.auth_requested.store(true, Ordering::SeqCst);
        }
        Ok(outcome)
    }

    /// 订阅主题，主题会被记住并在重连后重新发送
    pub async fn subscribe(&self, topics: &[String]) -> Result<(), ClientError> {
        {
            let mut known = self.inner.topics.lock().unwrap_or_else(|e| e.into_inner());
            for topic in topics {
                if !known.contains(topic) {
                    known.push(topic.clone());
                }
            }
        }
        self.inner
            .send(WireMessage::new(MessageType::Subscribe, json!({ "topics": topics })))
    }

    pub async fn unsubscribe(&self, topics: &[String]) -> Result<(), ClientError> {
        self.inner
            .topics
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .retain(|t| !topics.contains(t));
        self.inner
            .send(WireMessage::new(MessageType::Unsubscribe, json!({ "topics": topics })))
    }

    /// 以 `market_data` 消息转发一条行情
    pub async fn send_market_data(&self, data: &MarketDataMessage) -> Result<(), ClientError> {
        let payload =
            serde_json::to_value(data).map_err(|e| ClientError::Serialization(e.to_string()))?;
        self.inner
            .send(WireMessage::new(MessageType::MarketData, payload))
    }

    /// 发送 `control` 命令，例如 `submit_signal`、`submit_order`
    pub async fn send_control_command(&self, command: &str, params: Value) -> Result<(), ClientError> {
        self.inner.send(WireMessage::new(
            MessageType::Control,
            json!({ "command": command, "params": params }),
        ))
    }

    pub async fn send_ping(&self) -> Result<(), ClientError> {
        self.inner.send_ping()
    }

    /// 注册某一消息类型的入站处理器
    pub fn on_message(&self, kind: MessageType, handler: Arc<dyn MessageHandler>) {
        self.inner.router.on(kind, handler);
    }

    /// 注册接收全部入站消息的处理器
    pub fn on_any_message(&self, handler: Arc<dyn MessageHandler>) {
        self.inner.router.on_any(handler);
    }

    /// # Summary
    /// 主动断开：通知后台协程退出、发送关闭帧并进入 `Closed`。幂等。
    pub async fn disconnect(&self) {
        if self.state() == ConnectionState::Closed {
            return;
        }
        self.inner.stop.trigger();
        self.inner.set_state(ConnectionState::Closed);

        let tasks: Vec<JoinHandle<()>> = self
            .inner
            .tasks
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .drain(..)
            .collect();
        for task in tasks {
            let abort = task.abort_handle();
            if tokio::time::timeout(SHUTDOWN_TIMEOUT, task).await.is_err() {
                warn!("Client task did not exit within {SHUTDOWN_TIMEOUT:?}, aborting");
                abort.abort();
            }
        }
        self.inner.outbound.lock().unwrap_or_else(|e| e.into_inner()).take();
        info!("Engine client closed");
    }

    pub fn state(&self) -> ConnectionState {
        *self.inner.state_tx.borrow()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<ConnectionState> {
        self.inner.state_tx.subscribe()
    }

    /// # Summary
    /// 等待状态满足条件。
    ///
    /// # Returns
    /// 超时返回 `None`。
    pub async fn wait_for_state(
        &self,
        predicate: impl Fn(ConnectionState) -> bool,
        timeout: Duration,
    ) -> Option<ConnectionState> {
        let mut rx = self.inner.state_tx.subscribe();
        match tokio::time::timeout(timeout, rx.wait_for(|s| predicate(*s))).await {
            Ok(Ok(state)) => Some(*state),
            _ => None,
        }
    }

    pub fn stats(&self) -> ClientStats {
        self.inner
            .stats
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// 当前连续重连失败次数
    pub fn reconnect_attempts(&self) -> u32 {
        self.inner.attempts.load(Ordering::SeqCst)
    }

    pub fn topics(&self) -> Vec<String> {
        self.inner
            .topics
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }
}

impl ClientInner {
    fn set_state(&self, next: ConnectionState) {
        self.state_tx.send_if_modified(|state| {
            // 终止态不会被后台协程覆盖
            if *state == next || *state == ConnectionState::Closed {
                return false;
            }
            if *state == ConnectionState::Failed {
                return false;
            }
            debug!("Client state {:?} -> {:?}", state, next);
            *state = next;
            true
        });
    }

    fn state(&self) -> ConnectionState {
        *self.state_tx.borrow()
    }

    async fn open_socket(&self) -> Result<WsStream, ConnectFailure> {
        let timeout_ms = self.config.connect_timeout_ms;
        let attempt = connect_async(self.config.url.as_str());
        match tokio::time::timeout(Duration::from_millis(timeout_ms), attempt).await {
            Err(_) => Err(ConnectFailure::Timeout(timeout_ms)),
            Ok(Err(e)) => Err(classify(e)),
            Ok(Ok((ws, response))) => {
                debug!("Handshake completed with status {}", response.status());
                Ok(ws)
            }
        }
    }

    /// # Summary
    /// 序列化并放入出站队列。
    ///
    /// # Returns
    /// 未连接时丢弃并返回 `NotConnected`。
    fn send(&self, message: WireMessage) -> Result<(), ClientError> {
        let text =
            serde_json::to_string(&message).map_err(|e| ClientError::Serialization(e.to_string()))?;

        let queued = match self.outbound.lock().unwrap_or_else(|e| e.into_inner()).as_ref() {
            Some(tx) if self.state().is_open() => tx.send(Message::Text(text.into())).is_ok(),
            _ => false,
        };

        let mut stats = self.stats.lock().unwrap_or_else(|e| e.into_inner());
        if queued {
            stats.sent += 1;
            Ok(())
        } else {
            stats.dropped += 1;
            Err(ClientError::NotConnected)
        }
    }

    fn send_ping(&self) -> Result<(), ClientError> {
        *self.last_ping.lock().unwrap_or_else(|e| e.into_inner()) = Some(Instant::now());
        self.send(WireMessage::new(MessageType::Ping, json!({})))
    }

    fn send_auth(&self) -> Result<AuthOutcome, ClientError> {
        let (Some(key), Some(secret)) = (&self.config.api_key, &self.config.api_secret) else {
            if self.config.allow_unauthenticated {
                warn!("No API credentials configured, continuing unauthenticated");
                return Ok(AuthOutcome::Unauthenticated);
            }
            return Err(ClientError::MissingCredentials);
        };

        let timestamp = chrono::Utc::now().timestamp_millis().to_string();
        let signature = auth::sign(
            secret,
            &timestamp,
            &self.config.auth_method,
            &self.config.auth_path,
        )?;
        self.send(WireMessage::new(
            MessageType::Auth,
            json!({ "api_key": key, "signature": signature, "timestamp": timestamp }),
        ))?;
        debug!("Auth request sent for key {key}");
        Ok(AuthOutcome::Sent)
    }

    /// 重连成功后恢复会话：重新鉴权并重新订阅
    fn restore_session(&self) {
        if self.auth_requested.load(Ordering::SeqCst)
            && let Err(e) = self.send_auth()
        {
            warn!("Re-authentication after reconnect failed: {e}");
        }
        let topics = self.topics.lock().unwrap_or_else(|e| e.into_inner()).clone();
        if !topics.is_empty()
            && let Err(e) = self.send(WireMessage::new(
                MessageType::Subscribe,
                json!({ "topics": topics }),
            ))
        {
            warn!("Re-subscribe after reconnect failed: {e}");
        }
    }

    async fn on_frame(&self, text: &str) {
        self.stats
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .received += 1;

        let message: WireMessage = match serde_json::from_str(text) {
            Ok(m) => m,
            Err(e) => {
                warn!("Malformed frame skipped: {e}");
                self.stats
                    .lock()
                    .unwrap_or_else(|e| e.into_inner())
                    .malformed += 1;
                return;
            }
        };

        match message.message_type() {
            MessageType::AuthSuccess => {
                info!("Engine accepted authentication");
                self.set_state(ConnectionState::Authenticated);
            }
            MessageType::Pong => {
                let sent = self.last_ping.lock().unwrap_or_else(|e| e.into_inner()).take();
                if let Some(sent) = sent {
                    let rtt = sent.elapsed().as_secs_f64() * 1000.0;
                    self.stats
                        .lock()
                        .unwrap_or_else(|e| e.into_inner())
                        .last_rtt_ms = Some(rtt);
                }
            }
            _ => {}
        }
        if let Some(error) = &message.error {
            warn!("Engine reported error on {}: {error}", message.kind);
        }
        self.router.route(&message).await;
    }

    /// # Summary
    /// 拆分连接、安装出站队列并启动写协程，同步完成。
    fn open_session(&self, ws: WsStream) -> Session {
        let (mut sink, stream) = ws.split();
        let (tx, mut rx) = mpsc::unbounded_channel::<Message>();
        *self.outbound.lock().unwrap_or_else(|e| e.into_inner()) = Some(tx.clone());

        let writer = tokio::spawn(async move {
            while let Some(message) = rx.recv().await {
                let closing = matches!(message, Message::Close(_));
                if let Err(e) = sink.send(message).await {
                    debug!("Writer stopped: {e}");
                    break;
                }
                if closing {
                    break;
                }
            }
            if let Err(e) = sink.close().await {
                debug!("Sink close: {e}");
            }
        });
        Session { stream, tx, writer }
    }

    /// # Summary
    /// 驱动一次会话的读循环，直到传输关闭或收到停止信号。
    async fn run_session(&self, session: Session) {
        let Session {
            mut stream,
            tx,
            writer,
        } = session;

        loop {
            tokio::select! {
                _ = self.stop.wait() => {
                    if tx.send(Message::Close(None)).is_err() {
                        debug!("Writer already gone before close frame");
                    }
                    break;
                }
                frame = stream.next() => match frame {
                    Some(Ok(Message::Text(text))) => self.on_frame(text.as_str()).await,
                    Some(Ok(Message::Binary(bytes))) => match std::str::from_utf8(&bytes) {
                        Ok(text) => self.on_frame(text).await,
                        Err(_) => {
                            let mut stats = self.stats.lock().unwrap_or_else(|e| e.into_inner());
                            stats.received += 1;
                            stats.malformed += 1;
                        }
                    },
                    Some(Ok(Message::Close(frame))) => {
                        info!("Engine closed the connection: {frame:?}");
                        break;
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        warn!("WebSocket read error: {e}");
                        break;
                    }
                    None => {
                        info!("Engine stream ended");
                        break;
                    }
                },
            }
        }

        self.outbound.lock().unwrap_or_else(|e| e.into_inner()).take();
        drop(tx);
        let abort = writer.abort_handle();
        if tokio::time::timeout(SHUTDOWN_TIMEOUT, writer).await.is_err() {
            abort.abort();
        }
    }
}

fn classify(e: tungstenite::Error) -> ConnectFailure {
    match e {
        tungstenite::Error::Io(io) if io.kind() == std::io::ErrorKind::ConnectionRefused => {
            ConnectFailure::Refused(io.to_string())
        }
        tungstenite::Error::Http(response) => ConnectFailure::InvalidStatus(response.status().as_u16()),
        other => ConnectFailure::Other(other.to_string()),
    }
}

/// # Summary
/// 会话监督：会话结束后按固定间隔重连，直到成功、次数耗尽或收到停止信号。
async fn supervise(inner: Arc<ClientInner>, first: Session) {
    let mut session = first;
    loop {
        inner.run_session(session).await;
        if inner.stop.is_triggered() {
            break;
        }

        inner.set_state(ConnectionState::Reconnecting);
        let max = inner.config.max_reconnect_attempts;
        let delay = Duration::from_millis(inner.config.reconnect_delay_ms);
        let next = loop {
            let attempt = inner.attempts.fetch_add(1, Ordering::SeqCst) + 1;
            if attempt > max {
                inner.attempts.store(max, Ordering::SeqCst);
                error!("Engine unreachable after {max} reconnect attempts, giving up");
                inner.set_state(ConnectionState::Failed);
                inner.stop.trigger();
                return;
            }
            if !inner.stop.sleep(delay).await {
                return;
            }
            info!("Reconnect attempt {attempt}/{max}");
            match inner.open_socket().await {
                Ok(ws) => break ws,
                Err(e) => warn!("Reconnect attempt {attempt} failed: {e}"),
            }
        };

        session = inner.open_session(next);
        inner.attempts.store(0, Ordering::SeqCst);
        inner
            .stats
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .reconnects += 1;
        inner.set_state(ConnectionState::Connected);
        info!("Reconnected to engine");
        inner.restore_session();
    }
    debug!("Client supervisor exited");
}

async fn heartbeat_loop(inner: Arc<ClientInner>) {
    let interval = Duration::from_millis(inner.config.heartbeat_interval_ms);
    while inner.stop.sleep(interval).await {
        if !inner.state().is_open() {
            continue;
        }
        if let Err(e) = inner.send_ping() {
            debug!("Heartbeat ping not sent: {e}");
        }
    }
    debug!("Heartbeat loop exited");
}
