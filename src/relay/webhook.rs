//! Event-filtered webhook fan-out.
//!
//! One delivery per event, fire-and-forget, errors swallowed and logged
//! once. Rather than fanning out from a shared event bus, each room
//! carries its own single webhook target, so delivery is triggered
//! directly from the dispatch handler instead of a subscribed background
//! loop.

use serde_json::{Map, Value};

use crate::ids::now_ms;
use crate::room::WebhookConfig;

/// Posts `{event, room, timestamp, ...payload}` to `webhook.url` if it
/// subscribes to `event`. Runs on its own task; the caller never awaits
/// delivery.
pub fn fire(http: reqwest::Client, webhook: WebhookConfig, event: &'static str, room: String, payload: Value) {
    if !webhook.wants(event) {
        return;
    }

    let mut body = Map::new();
    body.insert("event".to_string(), Value::String(event.to_string()));
    body.insert("room".to_string(), Value::String(room));
    body.insert("timestamp".to_string(), Value::from(now_ms()));
    if let Value::Object(fields) = payload {
        body.extend(fields);
    }

    let url = webhook.url;
    tokio::spawn(async move {
        if let Err(err) = http.post(&url).json(&Value::Object(body)).send().await {
            eprintln!("⚠️  webhook delivery to {url} failed: {err}");
        }
    });
}
