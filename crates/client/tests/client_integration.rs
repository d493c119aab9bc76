use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use harness_client::EngineClient;
use harness_client::auth;
use harness_core::client::entity::{AuthOutcome, ConnectionState, MessageType, WireMessage};
use harness_core::client::error::{ClientError, ConnectFailure};
use harness_core::client::port::MessageHandler;
use harness_core::config::ClientConfig;
use serde_json::{Value, json};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::tungstenite::protocol::Message;
use tokio_tungstenite::{WebSocketStream, accept_async};

const WAIT: Duration = Duration::from_secs(3);

fn config(url: String) -> ClientConfig {
    ClientConfig {
        url,
        connect_timeout_ms: 1_000,
        reconnect_delay_ms: 50,
        max_reconnect_attempts: 3,
        heartbeat_interval_ms: 60_000,
        ..ClientConfig::default()
    }
}

async fn listen() -> (TcpListener, String) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let url = format!("ws://{}/ws", listener.local_addr().unwrap());
    (listener, url)
}

async fn accept(listener: &TcpListener) -> WebSocketStream<TcpStream> {
    let (stream, _) = listener.accept().await.unwrap();
    accept_async(stream).await.unwrap()
}

/// 读取下一条文本帧并解析为 JSON
async fn next_json(ws: &mut WebSocketStream<TcpStream>) -> Value {
    loop {
        let frame = tokio::time::timeout(WAIT, ws.next())
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        if let Message::Text(text) = frame {
            return serde_json::from_str(text.as_str()).unwrap();
        }
    }
}

async fn reply(ws: &mut WebSocketStream<TcpStream>, kind: &str, data: Value) {
    let message = json!({"type": kind, "id": "srv", "timestamp": 1.0, "data": data});
    ws.send(Message::Text(message.to_string().into())).await.unwrap();
}

#[derive(Default)]
struct Collector {
    messages: Mutex<Vec<WireMessage>>,
}

impl Collector {
    fn kinds(&self) -> Vec<String> {
        self.messages
            .lock()
            .unwrap()
            .iter()
            .map(|m| m.kind.clone())
            .collect()
    }
}

#[async_trait]
impl MessageHandler for Collector {
    async fn handle(&self, message: &WireMessage) {
        self.messages.lock().unwrap().push(message.clone());
    }
}

async fn eventually(mut check: impl FnMut() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + WAIT;
    while tokio::time::Instant::now() < deadline {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    check()
}

#[tokio::test]
async fn test_connect_refused_is_classified() {
    let (listener, url) = listen().await;
    drop(listener);

    let client = EngineClient::new(config(url));
    let err = client.connect().await.unwrap_err();
    assert!(matches!(err, ClientError::Connect(ConnectFailure::Refused(_))));
    assert_eq!(client.state(), ConnectionState::Disconnected);
}

#[tokio::test]
async fn test_connect_timeout_when_handshake_never_completes() {
    // 监听但从不 accept，TCP 连接进入 backlog，握手永远等不到响应
    let (_listener, url) = listen().await;
    let mut cfg = config(url);
    cfg.connect_timeout_ms = 200;

    let client = EngineClient::new(cfg);
    let err = client.connect().await.unwrap_err();
    assert_eq!(err, ClientError::Connect(ConnectFailure::Timeout(200)));
}

#[tokio::test]
async fn test_non_upgrade_status_is_reported() {
    let (listener, url) = listen().await;
    tokio::spawn(async move {
        let (mut stream, _) = listener.accept().await.unwrap();
        let mut buf = vec![0u8; 4096];
        let _read = stream.read(&mut buf).await.unwrap();
        stream
            .write_all(b"HTTP/1.1 404 Not Found\r\nContent-Length: 0\r\n\r\n")
            .await
            .unwrap();
    });

    let client = EngineClient::new(config(url));
    let err = client.connect().await.unwrap_err();
    assert_eq!(err, ClientError::Connect(ConnectFailure::InvalidStatus(404)));
}

#[tokio::test]
async fn test_authentication_round_trip() -> anyhow::Result<()> {
    let (listener, url) = listen().await;
    let server = tokio::spawn(async move {
        let mut ws = accept(&listener).await;
        let auth_frame = next_json(&mut ws).await;
        let data = &auth_frame["data"];
        let expected = auth::sign(
            "s3cret",
            data["timestamp"].as_str().unwrap(),
            "GET",
            "/ws",
        )
        .unwrap();
        let valid = auth_frame["type"] == "auth"
            && data["api_key"] == "key-1"
            && data["signature"] == expected.as_str();
        reply(&mut ws, "auth_success", json!({})).await;
        // 保持连接直到客户端关闭
        while let Some(Ok(frame)) = ws.next().await {
            if matches!(frame, Message::Close(_)) {
                break;
            }
        }
        valid
    });

    let mut cfg = config(url);
    cfg.api_key = Some("key-1".to_string());
    cfg.api_secret = Some("s3cret".to_string());
    let client = EngineClient::new(cfg);
    client.connect().await?;
    assert_eq!(client.state(), ConnectionState::Connected);

    assert_eq!(client.authenticate().await?, AuthOutcome::Sent);
    let state = client
        .wait_for_state(|s| s == ConnectionState::Authenticated, WAIT)
        .await;
    assert_eq!(state, Some(ConnectionState::Authenticated));

    client.disconnect().await;
    assert_eq!(client.state(), ConnectionState::Closed);
    assert!(server.await?);
    Ok(())
}

#[tokio::test]
async fn test_missing_credentials() {
    let mut cfg = config("ws://127.0.0.1:1/ws".to_string());
    cfg.allow_unauthenticated = true;
    let lenient = EngineClient::new(cfg.clone());
    assert_eq!(lenient.authenticate().await, Ok(AuthOutcome::Unauthenticated));

    cfg.allow_unauthenticated = false;
    let strict = EngineClient::new(cfg);
    assert_eq!(strict.authenticate().await, Err(ClientError::MissingCredentials));
}

#[tokio::test]
async fn test_malformed_frame_is_skipped() -> anyhow::Result<()> {
    let (listener, url) = listen().await;
    tokio::spawn(async move {
        let mut ws = accept(&listener).await;
        ws.send(Message::Text("not json".into())).await.unwrap();
        reply(&mut ws, "order_ack", json!({"order_id": "o-1"})).await;
        while let Some(Ok(_)) = ws.next().await {}
    });

    let client = EngineClient::new(config(url));
    let collector = Arc::new(Collector::default());
    client.on_any_message(collector.clone());
    client.connect().await?;

    assert!(eventually(|| collector.kinds() == vec!["order_ack".to_string()]).await);
    let stats = client.stats();
    assert_eq!(stats.received, 2);
    assert_eq!(stats.malformed, 1);
    assert_eq!(client.state(), ConnectionState::Connected);

    client.disconnect().await;
    Ok(())
}

#[tokio::test]
async fn test_reconnect_restores_subscriptions() -> anyhow::Result<()> {
    let (listener, url) = listen().await;
    let server = tokio::spawn(async move {
        let mut first = accept(&listener).await;
        let subscribe = next_json(&mut first).await;
        first.close(None).await.unwrap();
        drop(first);

        let mut second = accept(&listener).await;
        let resubscribe = next_json(&mut second).await;
        (subscribe, resubscribe)
    });

    let client = EngineClient::new(config(url));
    client.connect().await?;
    client.subscribe(&["BTCUSDT".to_string()]).await?;

    let (subscribe, resubscribe) = tokio::time::timeout(WAIT, server).await??;
    assert_eq!(subscribe["type"], "subscribe");
    assert_eq!(resubscribe["type"], "subscribe");
    assert_eq!(resubscribe["data"]["topics"], json!(["BTCUSDT"]));

    assert!(eventually(|| client.stats().reconnects == 1).await);
    assert_eq!(client.reconnect_attempts(), 0);
    client.disconnect().await;
    Ok(())
}

#[tokio::test]
async fn test_reconnect_exhaustion_fails_permanently() -> anyhow::Result<()> {
    let (listener, url) = listen().await;
    tokio::spawn(async move {
        let mut ws = accept(&listener).await;
        // 先关闭监听，后续重连全部被拒绝
        drop(listener);
        ws.close(None).await.unwrap();
    });

    let mut cfg = config(url);
    cfg.max_reconnect_attempts = 2;
    cfg.reconnect_delay_ms = 30;
    let client = EngineClient::new(cfg);
    client.connect().await?;

    let state = client
        .wait_for_state(|s| s == ConnectionState::Failed, WAIT)
        .await;
    assert_eq!(state, Some(ConnectionState::Failed));
    assert_eq!(client.reconnect_attempts(), 2);
    assert_eq!(client.send_ping().await, Err(ClientError::NotConnected));
    Ok(())
}

#[tokio::test]
async fn test_send_without_connection_is_dropped() {
    let client = EngineClient::new(config("ws://127.0.0.1:1/ws".to_string()));
    assert_eq!(client.send_ping().await, Err(ClientError::NotConnected));
    assert_eq!(
        client
            .send_control_command("submit_order", json!({"symbol": "BTCUSDT"}))
            .await,
        Err(ClientError::NotConnected)
    );
    let stats = client.stats();
    assert_eq!(stats.dropped, 2);
    assert_eq!(stats.sent, 0);
}

#[tokio::test]
async fn test_ping_pong_records_round_trip() -> anyhow::Result<()> {
    let (listener, url) = listen().await;
    tokio::spawn(async move {
        let mut ws = accept(&listener).await;
        loop {
            let frame = next_json(&mut ws).await;
            if frame["type"] == "ping" {
                reply(&mut ws, "pong", json!({})).await;
            }
        }
    });

    let client = EngineClient::new(config(url));
    let pongs = Arc::new(Collector::default());
    client.on_message(MessageType::Pong, pongs.clone());
    client.connect().await?;
    client.send_ping().await?;

    assert!(eventually(|| client.stats().last_rtt_ms.is_some()).await);
    assert_eq!(pongs.kinds(), vec!["pong".to_string()]);
    assert_eq!(client.stats().sent, 1);
    client.disconnect().await;
    Ok(())
}

#[tokio::test]
async fn test_sends_right_after_connect_are_delivered() -> anyhow::Result<()> {
    let (listener, url) = listen().await;
    let server = tokio::spawn(async move {
        let mut ws = accept(&listener).await;
        let mut kinds = Vec::new();
        for _ in 0..3 {
            kinds.push(next_json(&mut ws).await["type"].as_str().unwrap_or_default().to_string());
        }
        kinds
    });

    let mut cfg = config(url);
    cfg.api_key = Some("key-1".to_string());
    cfg.api_secret = Some("s3cret".to_string());
    let client = EngineClient::new(cfg);
    client.connect().await?;
    assert_eq!(client.authenticate().await?, AuthOutcome::Sent);
    client.subscribe(&["BTCUSDT".to_string()]).await?;
    client.send_ping().await?;

    assert_eq!(client.stats().dropped, 0);
    assert_eq!(client.stats().sent, 3);
    assert_eq!(server.await?, vec!["auth", "subscribe", "ping"]);
    client.disconnect().await;
    Ok(())
}
