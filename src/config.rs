//! Environment-driven configuration: sensible defaults, overridden by
//! env vars when present and parseable.

use std::env;

pub const HEARTBEAT_INTERVAL_MS: u64 = 15_000;
pub const HEARTBEAT_TIMEOUT_MS: i64 = 45_000;
pub const ROOM_EXPIRY_CHECK_MS: u64 = 300_000;
pub const PERSISTENCE_INTERVAL_MS: u64 = 60_000;
pub const MAX_ROOM_MEMBERS: usize = 20;
pub const MAX_LOCKS_PER_ROOM: usize = 50;
pub const MAX_RECENT_CHANGES: usize = 100;
pub const MAX_TIMELINE_EVENTS: usize = 200;
pub const TYPING_TIMEOUT_MS: u64 = 10_000;
pub const MAX_QUEUED_CHANGES: usize = 50;
pub const MAX_INBOUND_FRAME_BYTES: usize = 1024 * 1024;
pub const WEBHOOK_TIMEOUT_SECS: u64 = 5;
pub const ROOM_CODE_RETRY_BUDGET: u32 = 50;

/// Relay server configuration.
#[derive(Debug, Clone)]
pub struct RelayConfig {
    pub host: String,
    pub port: u16,
    pub persistence_path: String,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 4819,
            persistence_path: "./.codehive-rooms.json".to_string(),
        }
    }
}

impl RelayConfig {
    /// Build configuration from `HOST`/`PORT` env vars, falling back to
    /// defaults when unset or unparseable.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(val) = env::var("HOST") {
            config.host = val;
        }
        if let Ok(val) = env::var("PORT")
            && let Ok(port) = val.parse::<u16>()
        {
            config.port = port;
        }
        if let Ok(val) = env::var("CODEHIVE_PERSISTENCE_PATH") {
            config.persistence_path = val;
        }

        config
    }
}

/// Agent (per-developer) client configuration.
#[derive(Debug, Clone)]
pub struct AgentConfig {
    pub relay_host: String,
    pub relay_port: u16,
    pub dev_name: String,
    pub project_dir: String,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            relay_host: "127.0.0.1".to_string(),
            relay_port: 4819,
            dev_name: "anonymous".to_string(),
            project_dir: ".".to_string(),
        }
    }
}

impl AgentConfig {
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(val) = env::var("RELAY_HOST") {
            config.relay_host = val;
        }
        if let Ok(val) = env::var("RELAY_PORT")
            && let Ok(port) = val.parse::<u16>()
        {
            config.relay_port = port;
        }
        if let Ok(val) = env::var("DEV_NAME") {
            config.dev_name = val;
        }
        if let Ok(val) = env::var("PROJECT") {
            config.project_dir = val;
        }

        config
    }
}
