//! Shared helpers: in-memory membership, a real server on 127.0.0.1:0, token minting and WS clients.

#![allow(dead_code)]

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chathub::auth::{JwtSecret, TokenType};
use chathub::config::ConnectionSettings;
use chathub::error::{AppError, AppResult};
use chathub::models::{ChatId, UserId};
use chathub::services::ChatMembership;
use chathub::{create_app, AppState, Hub};
use futures::StreamExt;
use tokio::net::TcpStream;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

pub const SECRET: &str = "test-secret";

pub type Client = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Fixed user -> chats table.
pub struct StaticMembership {
    chats: HashMap<UserId, Vec<ChatId>>,
}

impl StaticMembership {
    pub fn new(entries: &[(UserId, &[ChatId])]) -> Arc<Self> {
        let chats = entries
            .iter()
            .map(|(user, chats)| (*user, chats.to_vec()))
            .collect();
        Arc::new(Self { chats })
    }
}

#[async_trait]
impl ChatMembership for StaticMembership {
    async fn user_chat_ids(&self, user_id: UserId) -> AppResult<Vec<ChatId>> {
        Ok(self.chats.get(&user_id).cloned().unwrap_or_default())
    }
}

/// Membership store that is always down.
pub struct FailingMembership;

#[async_trait]
impl ChatMembership for FailingMembership {
    async fn user_chat_ids(&self, _user_id: UserId) -> AppResult<Vec<ChatId>> {
        Err(AppError::Internal(anyhow::anyhow!("membership store unavailable")))
    }
}

pub fn jwt() -> JwtSecret {
    JwtSecret::new(SECRET.to_string())
}

pub fn access_token(user_id: UserId) -> String {
    jwt()
        .issue(user_id, "user", TokenType::Access, chrono::Duration::minutes(15))
        .unwrap()
}

pub fn refresh_token(user_id: UserId) -> String {
    jwt()
        .issue(user_id, "user", TokenType::Refresh, chrono::Duration::days(7))
        .unwrap()
}

pub fn test_state(
    hub: Hub,
    membership: Arc<dyn ChatMembership>,
    settings: ConnectionSettings,
) -> AppState {
    AppState::new(hub, Arc::new(jwt()), membership, settings)
}

pub struct TestServer {
    pub addr: SocketAddr,
    pub state: AppState,
    stop_hub: Option<oneshot::Sender<()>>,
    hub_task: Option<JoinHandle<()>>,
}

impl TestServer {
    pub fn hub(&self) -> &Hub {
        self.state.hub()
    }

    pub fn ws_url(&self, token: &str) -> String {
        format!("ws://{}/chat/ws?token={}", self.addr, token)
    }

    /// Stop the hub control loop and wait for it to finish.
    pub async fn stop_hub(&mut self) {
        if let Some(stop) = self.stop_hub.take() {
            let _ = stop.send(());
        }
        if let Some(task) = self.hub_task.take() {
            task.await.unwrap();
        }
    }
}

/// Start hub + HTTP server on an ephemeral port.
pub async fn start_server(
    membership: Arc<dyn ChatMembership>,
    settings: ConnectionSettings,
) -> TestServer {
    let (hub, runner) = Hub::new();
    let (stop_hub, stopped) = oneshot::channel::<()>();
    let hub_task = tokio::spawn(runner.run(async move {
        let _ = stopped.await;
    }));

    let state = test_state(hub, membership, settings);
    let app = create_app(state.clone());
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind");
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    TestServer {
        addr,
        state,
        stop_hub: Some(stop_hub),
        hub_task: Some(hub_task),
    }
}

pub async fn connect(server: &TestServer, user_id: UserId) -> Client {
    let (client, _) = tokio_tungstenite::connect_async(server.ws_url(&access_token(user_id)))
        .await
        .expect("ws connect");
    client
}

/// Next text frame as JSON. Panics on close, error or a 2s timeout.
pub async fn next_event(client: &mut Client) -> serde_json::Value {
    loop {
        let msg = time::timeout(Duration::from_secs(2), client.next())
            .await
            .expect("timeout waiting for event")
            .expect("stream ended")
            .expect("ws read error");
        match msg {
            Message::Text(text) => return serde_json::from_str(&text).expect("event is JSON"),
            Message::Ping(_) | Message::Pong(_) => continue,
            other => panic!("unexpected frame: {other:?}"),
        }
    }
}

/// Assert that no text frame arrives within `wait`.
pub async fn expect_no_event(client: &mut Client, wait: Duration) {
    let deadline = time::Instant::now() + wait;
    loop {
        match time::timeout_at(deadline, client.next()).await {
            Err(_) => return,
            Ok(Some(Ok(Message::Ping(_) | Message::Pong(_)))) => continue,
            Ok(other) => panic!("expected silence, got {other:?}"),
        }
    }
}

/// Wait until the server end closes: a Close frame, end of stream or a read error.
pub async fn expect_closed(client: &mut Client, wait: Duration) {
    let deadline = time::Instant::now() + wait;
    loop {
        match time::timeout_at(deadline, client.next()).await {
            Err(_) => panic!("connection still open after {wait:?}"),
            Ok(None) | Ok(Some(Err(_))) | Ok(Some(Ok(Message::Close(_)))) => return,
            Ok(Some(Ok(_))) => continue,
        }
    }
}

/// Poll hub stats until `connections` open connections are registered.
pub async fn wait_for_connections(hub: &Hub, connections: usize) {
    for _ in 0..200 {
        if hub.stats().await.connections == connections {
            return;
        }
        time::sleep(Duration::from_millis(10)).await;
    }
    panic!(
        "expected {connections} connections, hub has {}",
        hub.stats().await.connections
    );
}
