//! Shared test harness: spins up a real relay on an ephemeral localhost
//! port and connects to it with a plain `tokio-tungstenite` client.

use std::sync::atomic::{AtomicU16, Ordering};
use std::time::Duration;

use codehive_relay::config::RelayConfig;
use codehive_relay::protocol::{decode_server, encode_client, ClientMessage, ServerMessage};

use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

static NEXT_PORT: AtomicU16 = AtomicU16::new(18100);

/// Starts a relay on a fresh port with its own scratch persistence file.
/// Returns the `host:port` string and the background task handle (left
/// running; the process exit or test binary teardown reclaims it).
pub async fn start_relay() -> (String, JoinHandle<()>) {
    let port = NEXT_PORT.fetch_add(1, Ordering::SeqCst);
    let persistence_path = std::env::temp_dir()
        .join(format!("codehive-test-{port}.json"))
        .to_string_lossy()
        .into_owned();
    let _ = std::fs::remove_file(&persistence_path);

    let config = RelayConfig {
        host: "127.0.0.1".to_string(),
        port,
        persistence_path,
    };
    let handle = tokio::spawn(async move {
        let _ = codehive_relay::relay::server::run(config).await;
    });
    // Give the accept loop a moment to bind before the first connection
    // attempt; the relay has no separate "ready" signal to await on.
    tokio::time::sleep(Duration::from_millis(150)).await;
    (format!("127.0.0.1:{port}"), handle)
}

pub struct TestClient {
    ws: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

impl TestClient {
    pub async fn connect(addr: &str) -> Self {
        let (ws, _) = tokio_tungstenite::connect_async(format!("ws://{addr}"))
            .await
            .expect("client should connect to test relay");
        Self { ws }
    }

    pub async fn send(&mut self, msg: &ClientMessage) {
        self.ws
            .send(Message::Text(encode_client(msg).into()))
            .await
            .expect("send should succeed on a live socket");
    }

    pub async fn recv(&mut self) -> ServerMessage {
        loop {
            match self.ws.next().await {
                Some(Ok(Message::Text(text))) => {
                    if let Some(msg) = decode_server(&text) {
                        return msg;
                    }
                }
                Some(Ok(_)) => continue,
                other => panic!("connection ended unexpectedly: {other:?}"),
            }
        }
    }

    pub async fn recv_timeout(&mut self, ms: u64) -> Option<ServerMessage> {
        tokio::time::timeout(Duration::from_millis(ms), self.recv())
            .await
            .ok()
    }

    /// Waits up to `ms` for a frame matching `pred`, discarding non-matches.
    pub async fn recv_matching(
        &mut self,
        pred: impl Fn(&ServerMessage) -> bool,
        ms: u64,
    ) -> Option<ServerMessage> {
        let deadline = tokio::time::Instant::now() + Duration::from_millis(ms);
        loop {
            let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
            if remaining.is_zero() {
                return None;
            }
            match tokio::time::timeout(remaining, self.recv()).await {
                Ok(msg) if pred(&msg) => return Some(msg),
                Ok(_) => continue,
                Err(_) => return None,
            }
        }
    }
}
