use thiserror::Error;

/// Errors surfaced by room/registry operations.
///
/// These never cross the wire directly — handlers translate them into
/// `error`/`lock_error` envelopes (see [`crate::protocol`]).
#[derive(Debug, Error)]
pub enum RelayError {
    #[error("room not found")]
    RoomNotFound,
    #[error("room is full")]
    RoomFull,
    #[error("device already connected to this room")]
    DuplicateDevice,
    #[error("wrong password")]
    WrongPassword,
    #[error("{0}")]
    Validation(String),
    #[error("room code generation exhausted its retry budget")]
    CodeSpaceExhausted,
}

/// Errors from the agent-side connection/session state machine.
#[derive(Debug, Error)]
pub enum AgentError {
    #[error("not connected to the relay")]
    NotConnected,
    #[error("not currently in a room")]
    NoRoom,
    #[error("reconnection attempts exhausted")]
    ReconnectExhausted,
    #[error("transport error: {0}")]
    Transport(String),
    #[error("relay returned an error: {0}")]
    Relay(String),
    #[error("timed out waiting for a response")]
    Timeout,
}

/// Errors from the file-watcher pipeline. Watcher errors are logged and
/// the offending event skipped — the watcher itself never propagates
/// these outward as a hard failure.
#[derive(Debug, Error)]
pub enum WatcherError {
    #[error("io error for {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("notify backend error: {0}")]
    Notify(#[from] notify::Error),
}
