//! The typed envelope protocol.
//!
//! Every frame is one JSON object with a required string `type` and a
//! required integer `timestamp` (milliseconds since the epoch).
//! Client→server frames additionally carry `device_id`. The two closed
//! type sets (`ClientMessage`, `ServerMessage`) are defined below; decoding
//! any other shape yields [`DecodeError`] and the caller replies with an
//! `error` frame instead of closing the connection.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

pub const DEFAULT_HOST: &str = "127.0.0.1";
pub const DEFAULT_PORT: u16 = 4819;

/// Transport-level close codes. Defined for completeness; the present
/// implementation prefers in-band `error` frames and rarely closes with
/// these explicitly.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseCode {
    Normal = 1000,
    GoingAway = 1001,
    RoomClosed = 4000,
    InvalidMessage = 4001,
    RoomNotFound = 4002,
    DuplicateDevice = 4003,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MemberStatus {
    Active,
    Idle,
    Away,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeType {
    Add,
    Change,
    Unlink,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimelineEventType {
    Join,
    Leave,
    Chat,
    FileChange,
    Lock,
    Unlock,
    Conflict,
    BranchChange,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Cursor {
    pub file: String,
    pub line: u32,
    pub column: u32,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub end_line: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub end_column: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemberInfo {
    pub device_id: String,
    pub name: String,
    pub status: MemberStatus,
    #[serde(default)]
    pub working_on: Vec<String>,
    pub joined_at: i64,
    pub last_seen: i64,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub branch: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub typing_in: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub cursor: Option<Cursor>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileChange {
    pub path: String,
    #[serde(rename = "type")]
    pub change_type: ChangeType,
    pub author: String,
    pub device_id: String,
    pub timestamp: i64,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub diff: Option<String>,
    pub lines_added: u32,
    pub lines_removed: u32,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub size_before: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub size_after: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LockRecord {
    pub file: String,
    pub locked_by: String,
    pub device_id: String,
    pub locked_at: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimelineEvent {
    pub id: u64,
    pub ts: i64,
    #[serde(rename = "type")]
    pub event_type: TimelineEventType,
    pub actor: String,
    pub detail: serde_json::Value,
}

/// Full room snapshot, returned by `room_joined`/`room_status`. Truncates
/// `recent_changes`/`timeline` to the last 20 entries.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoomSnapshot {
    pub code: String,
    pub created_at: i64,
    pub created_by: String,
    pub has_password: bool,
    pub is_public: bool,
    pub expires_in_hours: u32,
    pub last_activity: i64,
    pub members: Vec<MemberInfo>,
    pub locks: Vec<LockRecord>,
    pub recent_changes: Vec<FileChange>,
    pub timeline: Vec<TimelineEvent>,
}

/// Compact listing entry for `room_list` / registry persistence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoomSummary {
    pub code: String,
    pub created_at: i64,
    pub created_by: String,
    pub has_password: bool,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub password_hash: Option<String>,
    pub is_public: bool,
    pub expires_in_hours: u32,
    pub last_activity: i64,
    #[serde(default)]
    pub member_count: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    CreateRoom {
        timestamp: i64,
        device_id: String,
        name: String,
        #[serde(default)]
        password: Option<String>,
        #[serde(default)]
        is_public: Option<bool>,
        #[serde(default)]
        expires_in_hours: Option<u32>,
        #[serde(default)]
        branch: Option<String>,
    },
    JoinRoom {
        timestamp: i64,
        device_id: String,
        code: String,
        name: String,
        #[serde(default)]
        password: Option<String>,
        #[serde(default)]
        branch: Option<String>,
    },
    LeaveRoom {
        timestamp: i64,
        device_id: String,
        code: String,
    },
    Heartbeat {
        timestamp: i64,
        device_id: String,
        code: String,
        #[serde(default = "default_status")]
        status: MemberStatus,
        #[serde(default)]
        branch: Option<String>,
    },
    FileChange {
        timestamp: i64,
        device_id: String,
        code: String,
        change: FileChange,
    },
    DeclareWorking {
        timestamp: i64,
        device_id: String,
        code: String,
        files: Vec<String>,
    },
    ChatMessage {
        timestamp: i64,
        device_id: String,
        code: String,
        content: String,
    },
    RequestStatus {
        timestamp: i64,
        device_id: String,
        code: String,
    },
    SyncRequest {
        timestamp: i64,
        device_id: String,
        code: String,
    },
    DeclareTyping {
        timestamp: i64,
        device_id: String,
        code: String,
        #[serde(default)]
        file: Option<String>,
    },
    LockFile {
        timestamp: i64,
        device_id: String,
        code: String,
        file: String,
    },
    UnlockFile {
        timestamp: i64,
        device_id: String,
        code: String,
        file: String,
    },
    UpdateCursor {
        timestamp: i64,
        device_id: String,
        code: String,
        #[serde(default)]
        cursor: Option<Cursor>,
    },
    ShareTerminal {
        timestamp: i64,
        device_id: String,
        code: String,
        output: String,
    },
    ListRooms {
        timestamp: i64,
        device_id: String,
    },
    GetTimeline {
        timestamp: i64,
        device_id: String,
        code: String,
        #[serde(default)]
        limit: Option<usize>,
    },
    SetWebhook {
        timestamp: i64,
        device_id: String,
        code: String,
        #[serde(default)]
        url: Option<String>,
        #[serde(default)]
        events: Option<Vec<String>>,
    },
    SetRoomVisibility {
        timestamp: i64,
        device_id: String,
        code: String,
        is_public: bool,
    },
}

fn default_status() -> MemberStatus {
    MemberStatus::Active
}

impl ClientMessage {
    /// The room code this frame targets, if any (`create_room` and
    /// `list_rooms` address no particular room).
    pub fn room_code(&self) -> Option<&str> {
        match self {
            ClientMessage::CreateRoom { .. } | ClientMessage::ListRooms { .. } => None,
            ClientMessage::JoinRoom { code, .. }
            | ClientMessage::LeaveRoom { code, .. }
            | ClientMessage::Heartbeat { code, .. }
            | ClientMessage::FileChange { code, .. }
            | ClientMessage::DeclareWorking { code, .. }
            | ClientMessage::ChatMessage { code, .. }
            | ClientMessage::RequestStatus { code, .. }
            | ClientMessage::SyncRequest { code, .. }
            | ClientMessage::DeclareTyping { code, .. }
            | ClientMessage::LockFile { code, .. }
            | ClientMessage::UnlockFile { code, .. }
            | ClientMessage::UpdateCursor { code, .. }
            | ClientMessage::ShareTerminal { code, .. }
            | ClientMessage::GetTimeline { code, .. }
            | ClientMessage::SetWebhook { code, .. }
            | ClientMessage::SetRoomVisibility { code, .. } => Some(code),
        }
    }

    pub fn device_id(&self) -> &str {
        match self {
            ClientMessage::CreateRoom { device_id, .. }
            | ClientMessage::JoinRoom { device_id, .. }
            | ClientMessage::LeaveRoom { device_id, .. }
            | ClientMessage::Heartbeat { device_id, .. }
            | ClientMessage::FileChange { device_id, .. }
            | ClientMessage::DeclareWorking { device_id, .. }
            | ClientMessage::ChatMessage { device_id, .. }
            | ClientMessage::RequestStatus { device_id, .. }
            | ClientMessage::SyncRequest { device_id, .. }
            | ClientMessage::DeclareTyping { device_id, .. }
            | ClientMessage::LockFile { device_id, .. }
            | ClientMessage::UnlockFile { device_id, .. }
            | ClientMessage::UpdateCursor { device_id, .. }
            | ClientMessage::ShareTerminal { device_id, .. }
            | ClientMessage::ListRooms { device_id, .. }
            | ClientMessage::GetTimeline { device_id, .. }
            | ClientMessage::SetWebhook { device_id, .. }
            | ClientMessage::SetRoomVisibility { device_id, .. } => device_id,
        }
    }

    /// Handlers that owe the client an `error` frame even when the room
    /// doesn't exist.
    pub fn replies_on_missing_room(&self) -> bool {
        matches!(
            self,
            ClientMessage::JoinRoom { .. }
                | ClientMessage::RequestStatus { .. }
                | ClientMessage::SyncRequest { .. }
                | ClientMessage::GetTimeline { .. }
                | ClientMessage::SetWebhook { .. }
                | ClientMessage::SetRoomVisibility { .. }
        )
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    RoomCreated {
        timestamp: i64,
        code: String,
        invite_uri: String,
        room: RoomSummary,
    },
    RoomJoined {
        timestamp: i64,
        code: String,
        room: RoomSnapshot,
    },
    RoomLeft {
        timestamp: i64,
        code: String,
    },
    MemberJoined {
        timestamp: i64,
        code: String,
        member: MemberInfo,
    },
    MemberLeft {
        timestamp: i64,
        code: String,
        device_id: String,
        #[serde(skip_serializing_if = "Option::is_none", default)]
        name: Option<String>,
    },
    MemberUpdated {
        timestamp: i64,
        code: String,
        member: MemberInfo,
    },
    FileChanged {
        timestamp: i64,
        code: String,
        change: FileChange,
    },
    ChatReceived {
        timestamp: i64,
        code: String,
        device_id: String,
        sender: String,
        content: String,
    },
    RoomStatus {
        timestamp: i64,
        code: String,
        room: RoomSnapshot,
    },
    ConflictWarning {
        timestamp: i64,
        code: String,
        file: String,
        authors: Vec<String>,
    },
    Error {
        timestamp: i64,
        message: String,
    },
    HeartbeatAck {
        timestamp: i64,
    },
    TypingIndicator {
        timestamp: i64,
        code: String,
        device_id: String,
        name: String,
        #[serde(skip_serializing_if = "Option::is_none", default)]
        file: Option<String>,
    },
    FileLocked {
        timestamp: i64,
        code: String,
        file: String,
        locked_by: String,
        device_id: String,
    },
    FileUnlocked {
        timestamp: i64,
        code: String,
        file: String,
    },
    LockError {
        timestamp: i64,
        code: String,
        file: String,
        #[serde(skip_serializing_if = "Option::is_none", default)]
        locked_by: Option<String>,
    },
    CursorUpdated {
        timestamp: i64,
        code: String,
        device_id: String,
        name: String,
        #[serde(skip_serializing_if = "Option::is_none", default)]
        cursor: Option<Cursor>,
    },
    TerminalShared {
        timestamp: i64,
        code: String,
        device_id: String,
        name: String,
        output: String,
    },
    RoomList {
        timestamp: i64,
        rooms: Vec<RoomSummary>,
    },
    Timeline {
        timestamp: i64,
        code: String,
        events: Vec<TimelineEvent>,
    },
    BranchWarning {
        timestamp: i64,
        code: String,
        message: String,
        branches: HashMap<String, String>,
    },
}

impl ServerMessage {
    pub fn error(message: impl Into<String>) -> Self {
        ServerMessage::Error {
            timestamp: crate::ids::now_ms(),
            message: message.into(),
        }
    }

    /// `type` discriminator, mostly useful for pending-listener predicates
    /// on the agent side.
    pub fn kind(&self) -> &'static str {
        match self {
            ServerMessage::RoomCreated { .. } => "room_created",
            ServerMessage::RoomJoined { .. } => "room_joined",
            ServerMessage::RoomLeft { .. } => "room_left",
            ServerMessage::MemberJoined { .. } => "member_joined",
            ServerMessage::MemberLeft { .. } => "member_left",
            ServerMessage::MemberUpdated { .. } => "member_updated",
            ServerMessage::FileChanged { .. } => "file_changed",
            ServerMessage::ChatReceived { .. } => "chat_received",
            ServerMessage::RoomStatus { .. } => "room_status",
            ServerMessage::ConflictWarning { .. } => "conflict_warning",
            ServerMessage::Error { .. } => "error",
            ServerMessage::HeartbeatAck { .. } => "heartbeat_ack",
            ServerMessage::TypingIndicator { .. } => "typing_indicator",
            ServerMessage::FileLocked { .. } => "file_locked",
            ServerMessage::FileUnlocked { .. } => "file_unlocked",
            ServerMessage::LockError { .. } => "lock_error",
            ServerMessage::CursorUpdated { .. } => "cursor_updated",
            ServerMessage::TerminalShared { .. } => "terminal_shared",
            ServerMessage::RoomList { .. } => "room_list",
            ServerMessage::Timeline { .. } => "timeline",
            ServerMessage::BranchWarning { .. } => "branch_warning",
        }
    }
}

/// Encodes a server message as a single JSON text frame.
pub fn encode(msg: &ServerMessage) -> String {
    serde_json::to_string(msg).expect("ServerMessage always serializes")
}

/// Encodes a client message as a single JSON text frame (agent side).
pub fn encode_client(msg: &ClientMessage) -> String {
    serde_json::to_string(msg).expect("ClientMessage always serializes")
}

/// Decodes a raw inbound frame into a [`ClientMessage`].
///
/// Any shape that isn't a JSON object with a string `type` field yields
/// `None` — the caller should reply with
/// `"Invalid message format"` and keep the connection open.
pub fn decode(raw: &str) -> Option<ClientMessage> {
    let value: serde_json::Value = serde_json::from_str(raw).ok()?;
    if !value.is_object() || !value.get("type").is_some_and(|t| t.is_string()) {
        return None;
    }
    serde_json::from_value(value).ok()
}

/// Decodes a raw inbound frame into a [`ServerMessage`] (agent side).
pub fn decode_server(raw: &str) -> Option<ServerMessage> {
    let value: serde_json::Value = serde_json::from_str(raw).ok()?;
    if !value.is_object() || !value.get("type").is_some_and(|t| t.is_string()) {
        return None;
    }
    serde_json::from_value(value).ok()
}
