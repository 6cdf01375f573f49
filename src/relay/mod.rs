//! The relay server and its webhook fan-out, driven directly from the
//! dispatcher.

pub mod dispatch;
pub mod server;
pub mod webhook;

use std::sync::Arc;

use crate::config::WEBHOOK_TIMEOUT_SECS;
use crate::registry::RoomRegistry;

/// Shared state handed to every connection task.
pub struct RelayState {
    pub registry: Arc<RoomRegistry>,
    pub host: String,
    pub port: u16,
    http: reqwest::Client,
}

impl RelayState {
    pub fn new(registry: Arc<RoomRegistry>, host: String, port: u16) -> Self {
        let http = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(WEBHOOK_TIMEOUT_SECS))
            .build()
            .expect("failed to build webhook HTTP client");
        Self {
            registry,
            host,
            port,
            http,
        }
    }
}
