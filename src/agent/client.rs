//! The agent-side connection/session state machine.
//!
//! A connect/split/writer-task pattern generalized to the typed envelope
//! protocol, with reconnect/rejoin/offline-queue machinery layered on
//! top. State lives behind one `tokio::sync::Mutex` — the agent is
//! logically single-threaded, so this is a straightforward serialization
//! point rather than a real contention hazard.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::protocol::{frame::coding::CloseCode, CloseFrame};
use tokio_tungstenite::tungstenite::Message;

use crate::config::{AgentConfig, HEARTBEAT_INTERVAL_MS, MAX_QUEUED_CHANGES};
use crate::error::AgentError;
use crate::ids::now_ms;
use crate::protocol::{decode_server, encode_client, ClientMessage, FileChange, MemberStatus, ServerMessage};

const MAX_RECONNECT_ATTEMPTS: u32 = 10;

type Predicate = Box<dyn Fn(&ServerMessage) -> bool + Send>;

struct PendingListener {
    predicate: Predicate,
    responder: oneshot::Sender<ServerMessage>,
}

struct ClientState {
    current_room: Option<String>,
    current_password: Option<String>,
    current_branch: Option<String>,
    current_status: MemberStatus,
    should_reconnect: bool,
    awaiting_rejoin: bool,
    outbound: Option<mpsc::UnboundedSender<Message>>,
    file_change_queue: VecDeque<FileChange>,
    pending_listeners: Vec<PendingListener>,
}

/// A connected (or reconnecting) agent session.
pub struct AgentClient {
    config: AgentConfig,
    device_id: String,
    state: Mutex<ClientState>,
}

impl AgentClient {
    pub fn new(config: AgentConfig) -> Arc<Self> {
        let device_id = crate::ids::generate_device_id();
        Arc::new(Self {
            config,
            device_id,
            state: Mutex::new(ClientState {
                current_room: None,
                current_password: None,
                current_branch: None,
                current_status: MemberStatus::Active,
                should_reconnect: true,
                awaiting_rejoin: false,
                outbound: None,
                file_change_queue: VecDeque::new(),
                pending_listeners: Vec::new(),
            }),
        })
    }

    pub fn device_id(&self) -> &str {
        &self.device_id
    }

    /// Connects and reconnects with exponential backoff until
    /// `disconnect()` is called or the retry budget is exhausted.
    pub async fn run(self: &Arc<Self>) {
        let mut attempts: u32 = 0;
        loop {
            match self.connect_once().await {
                Ok(()) => attempts = 0,
                Err(err) => eprintln!("⚠️  relay connection error: {err}"),
            }

            if !self.state.lock().await.should_reconnect {
                return;
            }
            attempts += 1;
            if attempts > MAX_RECONNECT_ATTEMPTS {
                eprintln!("⚠️  reconnect attempts exhausted, giving up");
                return;
            }
            let delay_ms = (1000u64.saturating_mul(1u64 << (attempts - 1).min(20))).min(30_000);
            println!("🔗 reconnecting in {delay_ms}ms (attempt {attempts})");
            tokio::time::sleep(Duration::from_millis(delay_ms)).await;
        }
    }

    /// Opens one connection and runs until it closes. Returns once the
    /// socket is gone; `run()` decides whether to retry.
    async fn connect_once(self: &Arc<Self>) -> Result<(), AgentError> {
        let url = format!("ws://{}:{}", self.config.relay_host, self.config.relay_port);
        let (ws, _) = connect_async(&url)
            .await
            .map_err(|e| AgentError::Transport(e.to_string()))?;
        let (mut sink, mut stream) = ws.split();

        let (tx, mut rx) = mpsc::unbounded_channel::<Message>();
        {
            let mut state = self.state.lock().await;
            state.outbound = Some(tx);
        }

        let writer = tokio::spawn(async move {
            while let Some(frame) = rx.recv().await {
                let should_stop = matches!(frame, Message::Close(_));
                if sink.send(frame).await.is_err() || should_stop {
                    break;
                }
            }
        });

        self.on_connected().await;

        let heartbeat = {
            let this = Arc::clone(self);
            tokio::spawn(async move { this.heartbeat_loop().await })
        };

        while let Some(next) = stream.next().await {
            match next {
                Ok(Message::Text(text)) => {
                    if let Some(msg) = decode_server(&text) {
                        self.handle_inbound(msg).await;
                    }
                }
                Ok(Message::Close(_)) | Err(_) => break,
                Ok(_) => {}
            }
        }

        heartbeat.abort();
        self.state.lock().await.outbound = None;
        writer.abort();
        Ok(())
    }

    /// Re-joins the remembered room when a (re)connection opens while
    /// `current_room` is still set.
    async fn on_connected(self: &Arc<Self>) {
        let (code, password, branch) = {
            let mut state = self.state.lock().await;
            if state.current_room.is_none() {
                return;
            }
            state.awaiting_rejoin = true;
            (
                state.current_room.clone().unwrap(),
                state.current_password.clone(),
                state.current_branch.clone(),
            )
        };
        self.send(ClientMessage::JoinRoom {
            timestamp: now_ms(),
            device_id: self.device_id.clone(),
            code,
            name: self.config.dev_name.clone(),
            password,
            branch,
        })
        .await;
    }

    async fn heartbeat_loop(self: Arc<Self>) {
        loop {
            tokio::time::sleep(Duration::from_millis(HEARTBEAT_INTERVAL_MS)).await;
            let (room, status, branch) = {
                let state = self.state.lock().await;
                (
                    state.current_room.clone(),
                    state.current_status,
                    state.current_branch.clone(),
                )
            };
            let Some(code) = room else { continue };
            self.send(ClientMessage::Heartbeat {
                timestamp: now_ms(),
                device_id: self.device_id.clone(),
                code,
                status,
                branch,
            })
            .await;
        }
    }

    async fn handle_inbound(self: &Arc<Self>, msg: ServerMessage) {
        let matched = {
            let mut state = self.state.lock().await;
            let mut remaining = Vec::with_capacity(state.pending_listeners.len());
            let mut matched = None;
            for listener in state.pending_listeners.drain(..) {
                if matched.is_none() && (listener.predicate)(&msg) {
                    matched = Some(listener);
                } else {
                    remaining.push(listener);
                }
            }
            state.pending_listeners = remaining;
            matched
        };
        if let Some(listener) = matched {
            let _ = listener.responder.send(msg.clone());
        }

        match &msg {
            ServerMessage::RoomJoined { .. } => self.flush_queue().await,
            ServerMessage::Error { message } => {
                let mut state = self.state.lock().await;
                if state.awaiting_rejoin {
                    state.awaiting_rejoin = false;
                    state.file_change_queue.clear();
                    eprintln!("⚠️  rejoin failed, discarding queued changes: {message}");
                }
            }
            _ => {}
        }
    }

    async fn flush_queue(self: &Arc<Self>) {
        let queued: Vec<FileChange> = {
            let mut state = self.state.lock().await;
            state.awaiting_rejoin = false;
            state.file_change_queue.drain(..).collect()
        };
        for change in queued {
            self.report_file_change(change).await;
        }
    }

    async fn send(&self, msg: ClientMessage) {
        let state = self.state.lock().await;
        if let Some(tx) = &state.outbound {
            let _ = tx.send(Message::Text(encode_client(&msg).into()));
        }
    }

    async fn wait_for(
        &self,
        predicate: impl Fn(&ServerMessage) -> bool + Send + 'static,
        timeout_ms: u64,
    ) -> Result<ServerMessage, AgentError> {
        let (tx, rx) = oneshot::channel();
        {
            let mut state = self.state.lock().await;
            state.pending_listeners.push(PendingListener {
                predicate: Box::new(predicate),
                responder: tx,
            });
        }
        match tokio::time::timeout(Duration::from_millis(timeout_ms), rx).await {
            Ok(Ok(msg)) => Ok(msg),
            _ => Err(AgentError::Timeout),
        }
    }

    // ---- public operations -----------------------------------------------

    pub async fn create_room(
        &self,
        name: impl Into<String>,
        password: Option<String>,
        is_public: Option<bool>,
        expires_in_hours: Option<u32>,
    ) -> Result<ServerMessage, AgentError> {
        self.send(ClientMessage::CreateRoom {
            timestamp: now_ms(),
            device_id: self.device_id.clone(),
            name: name.into(),
            password,
            is_public,
            expires_in_hours,
            branch: self.state.lock().await.current_branch.clone(),
        })
        .await;
        self.wait_for(
            |m| matches!(m, ServerMessage::RoomCreated { .. } | ServerMessage::Error { .. }),
            10_000,
        )
        .await
    }

    pub async fn join_room(
        &self,
        code: impl Into<String>,
        name: impl Into<String>,
        password: Option<String>,
        branch: Option<String>,
    ) -> Result<ServerMessage, AgentError> {
        let code = code.into();
        {
            let mut state = self.state.lock().await;
            state.current_room = Some(code.clone());
            state.current_password = password.clone();
            state.current_branch = branch.clone();
        }
        self.send(ClientMessage::JoinRoom {
            timestamp: now_ms(),
            device_id: self.device_id.clone(),
            code,
            name: name.into(),
            password,
            branch,
        })
        .await;
        self.wait_for(
            |m| matches!(m, ServerMessage::RoomJoined { .. } | ServerMessage::Error { .. }),
            10_000,
        )
        .await
    }

    pub async fn leave_room(&self) {
        let code = {
            let mut state = self.state.lock().await;
            state.current_room.take()
        };
        if let Some(code) = code {
            self.send(ClientMessage::LeaveRoom {
                timestamp: now_ms(),
                device_id: self.device_id.clone(),
                code,
            })
            .await;
        }
    }

    /// Sends immediately if connected and in a room; otherwise queues
    /// (bounded, oldest-dropped) while still "in" a room, or silently
    /// drops when not in a room at all.
    pub async fn report_file_change(&self, change: FileChange) {
        let (code, connected) = {
            let state = self.state.lock().await;
            (state.current_room.clone(), state.outbound.is_some())
        };
        let Some(code) = code else { return };

        if connected {
            self.send(ClientMessage::FileChange {
                timestamp: now_ms(),
                device_id: self.device_id.clone(),
                code,
                change,
            })
            .await;
        } else {
            let mut state = self.state.lock().await;
            if state.file_change_queue.len() >= MAX_QUEUED_CHANGES {
                state.file_change_queue.pop_front();
            }
            state.file_change_queue.push_back(change);
        }
    }

    pub async fn declare_working(&self, files: Vec<String>) {
        let Some(code) = self.state.lock().await.current_room.clone() else { return };
        self.send(ClientMessage::DeclareWorking {
            timestamp: now_ms(),
            device_id: self.device_id.clone(),
            code,
            files,
        })
        .await;
    }

    pub async fn chat(&self, content: impl Into<String>) {
        let Some(code) = self.state.lock().await.current_room.clone() else { return };
        self.send(ClientMessage::ChatMessage {
            timestamp: now_ms(),
            device_id: self.device_id.clone(),
            code,
            content: content.into(),
        })
        .await;
    }

    pub async fn declare_typing(&self, file: Option<String>) {
        let Some(code) = self.state.lock().await.current_room.clone() else { return };
        self.send(ClientMessage::DeclareTyping {
            timestamp: now_ms(),
            device_id: self.device_id.clone(),
            code,
            file,
        })
        .await;
    }

    pub async fn lock_file(&self, file: impl Into<String>) -> Result<ServerMessage, AgentError> {
        let Some(code) = self.state.lock().await.current_room.clone() else {
            return Err(AgentError::NoRoom);
        };
        self.send(ClientMessage::LockFile {
            timestamp: now_ms(),
            device_id: self.device_id.clone(),
            code,
            file: file.into(),
        })
        .await;
        self.wait_for(
            |m| matches!(m, ServerMessage::FileLocked { .. } | ServerMessage::LockError { .. }),
            5_000,
        )
        .await
    }

    pub async fn unlock_file(&self, file: impl Into<String>) {
        let Some(code) = self.state.lock().await.current_room.clone() else { return };
        self.send(ClientMessage::UnlockFile {
            timestamp: now_ms(),
            device_id: self.device_id.clone(),
            code,
            file: file.into(),
        })
        .await;
    }

    pub async fn update_cursor(&self, cursor: Option<crate::protocol::Cursor>) {
        let Some(code) = self.state.lock().await.current_room.clone() else { return };
        self.send(ClientMessage::UpdateCursor {
            timestamp: now_ms(),
            device_id: self.device_id.clone(),
            code,
            cursor,
        })
        .await;
    }

    pub async fn share_terminal(&self, output: impl Into<String>) {
        let Some(code) = self.state.lock().await.current_room.clone() else { return };
        self.send(ClientMessage::ShareTerminal {
            timestamp: now_ms(),
            device_id: self.device_id.clone(),
            code,
            output: output.into(),
        })
        .await;
    }

    pub async fn list_rooms(&self) -> Result<ServerMessage, AgentError> {
        self.send(ClientMessage::ListRooms {
            timestamp: now_ms(),
            device_id: self.device_id.clone(),
        })
        .await;
        self.wait_for(|m| matches!(m, ServerMessage::RoomList { .. }), 5_000)
            .await
    }

    pub async fn request_status(&self) -> Result<ServerMessage, AgentError> {
        let Some(code) = self.state.lock().await.current_room.clone() else {
            return Err(AgentError::NoRoom);
        };
        self.send(ClientMessage::RequestStatus {
            timestamp: now_ms(),
            device_id: self.device_id.clone(),
            code,
        })
        .await;
        self.wait_for(
            |m| matches!(m, ServerMessage::RoomStatus { .. } | ServerMessage::Error { .. }),
            5_000,
        )
        .await
    }

    pub async fn get_timeline(&self, limit: Option<usize>) -> Result<ServerMessage, AgentError> {
        let Some(code) = self.state.lock().await.current_room.clone() else {
            return Err(AgentError::NoRoom);
        };
        self.send(ClientMessage::GetTimeline {
            timestamp: now_ms(),
            device_id: self.device_id.clone(),
            code,
            limit,
        })
        .await;
        self.wait_for(|m| matches!(m, ServerMessage::Timeline { .. }), 5_000)
            .await
    }

    pub async fn set_webhook(&self, url: Option<String>, events: Option<Vec<String>>) {
        let Some(code) = self.state.lock().await.current_room.clone() else { return };
        self.send(ClientMessage::SetWebhook {
            timestamp: now_ms(),
            device_id: self.device_id.clone(),
            code,
            url,
            events,
        })
        .await;
    }

    pub async fn set_room_visibility(&self, is_public: bool) {
        let Some(code) = self.state.lock().await.current_room.clone() else { return };
        self.send(ClientMessage::SetRoomVisibility {
            timestamp: now_ms(),
            device_id: self.device_id.clone(),
            code,
            is_public,
        })
        .await;
    }

    /// Stops reconnecting, leaves the current room, and closes the
    /// transport with the normal close code.
    pub async fn disconnect(&self) {
        self.leave_room().await;
        let mut state = self.state.lock().await;
        state.should_reconnect = false;
        if let Some(tx) = state.outbound.take() {
            let _ = tx.send(Message::Close(Some(CloseFrame {
                code: CloseCode::Normal,
                reason: "Client disconnect".into(),
            })));
        }
    }
}
