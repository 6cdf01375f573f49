//! Accept loop, per-connection reader/writer tasks, and the three
//! periodic sweeps. An accept-loop/writer-task split, adapted to dispatch
//! through typed `ClientMessage`/`ServerMessage` frames instead of
//! forwarding opaque blobs.

use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_tungstenite::accept_async;
use tokio_tungstenite::tungstenite::Message;

use crate::config::{
    RelayConfig, HEARTBEAT_INTERVAL_MS, HEARTBEAT_TIMEOUT_MS, MAX_INBOUND_FRAME_BYTES,
    PERSISTENCE_INTERVAL_MS, ROOM_EXPIRY_CHECK_MS,
};
use crate::ids::now_ms;
use crate::protocol::{decode, ServerMessage};
use crate::registry::RoomRegistry;

use super::dispatch::{self, Session};
use super::{webhook, RelayState};

/// Runs the relay until `ctrl_c`, then persists one last time and returns.
pub async fn run(config: RelayConfig) -> anyhow::Result<()> {
    let registry = Arc::new(RoomRegistry::new(config.persistence_path.clone()));
    let recovered = registry.load().await.unwrap_or_else(|err| {
        eprintln!("⚠️  failed to load persisted rooms: {err}");
        0
    });
    if recovered > 0 {
        println!("🔗 recovered {recovered} room(s) from {}", config.persistence_path);
    }

    let state = Arc::new(RelayState::new(registry, config.host.clone(), config.port));

    spawn_heartbeat_sweep(Arc::clone(&state));
    spawn_expiry_sweep(Arc::clone(&state));
    spawn_persistence_writer(Arc::clone(&state));

    let addr = format!("{}:{}", config.host, config.port);
    let listener = TcpListener::bind(&addr).await?;
    println!("🔗 CodeHive relay listening on ws://{addr}");

    loop {
        tokio::select! {
            accepted = listener.accept() => {
                let (stream, peer) = accepted?;
                let state = Arc::clone(&state);
                tokio::spawn(async move {
                    if let Err(err) = handle_connection(stream, state).await {
                        eprintln!("⚠️  connection from {peer} ended: {err}");
                    }
                });
            }
            _ = tokio::signal::ctrl_c() => {
                println!("🔗 shutting down, persisting rooms…");
                state.registry.persist().await.ok();
                return Ok(());
            }
        }
    }
}

fn spawn_heartbeat_sweep(state: Arc<RelayState>) {
    tokio::spawn(async move {
        loop {
            tokio::time::sleep(Duration::from_millis(HEARTBEAT_INTERVAL_MS)).await;
            sweep_dead_members(&state).await;
            state.registry.prune_empty_rooms().await;
        }
    });
}

async fn sweep_dead_members(state: &Arc<RelayState>) {
    for code in state.registry.all_room_codes().await {
        let Some(room) = state.registry.get_room(&code).await else {
            continue;
        };
        for device_id in room.find_dead_clients(HEARTBEAT_TIMEOUT_MS).await {
            if let Some(info) = room.remove_member(&device_id).await {
                println!("🧹 evicted dead member {} ({device_id}) from {code}", info.name);
                room.broadcast(
                    &ServerMessage::MemberLeft {
                        timestamp: now_ms(),
                        code: code.clone(),
                        device_id: device_id.clone(),
                        name: Some(info.name.clone()),
                    },
                    None,
                )
                .await;
                if let Some(hook) = room.webhook().await {
                    webhook::fire(
                        state.http_client(),
                        hook,
                        "leave",
                        code.clone(),
                        serde_json::json!({ "device_id": device_id, "name": info.name, "reason": "timeout" }),
                    );
                }
            }
        }
    }
}

fn spawn_expiry_sweep(state: Arc<RelayState>) {
    tokio::spawn(async move {
        loop {
            tokio::time::sleep(Duration::from_millis(ROOM_EXPIRY_CHECK_MS)).await;
            let dropped = state.registry.prune_expired_rooms().await;
            if !dropped.is_empty() {
                println!("🧹 pruned {} expired room(s)", dropped.len());
            }
        }
    });
}

fn spawn_persistence_writer(state: Arc<RelayState>) {
    tokio::spawn(async move {
        loop {
            tokio::time::sleep(Duration::from_millis(PERSISTENCE_INTERVAL_MS)).await;
            if let Err(err) = state.registry.persist().await {
                eprintln!("⚠️  persistence write failed: {err}");
            }
        }
    });
}

async fn handle_connection(stream: TcpStream, state: Arc<RelayState>) -> anyhow::Result<()> {
    let ws = accept_async(stream).await?;
    let (mut outbound, mut inbound) = ws.split();

    let (tx, mut rx) = mpsc::unbounded_channel::<String>();
    let writer = tokio::spawn(async move {
        while let Some(frame) = rx.recv().await {
            if outbound.send(Message::Text(frame.into())).await.is_err() {
                break;
            }
        }
    });

    let mut session = Session::new(tx);

    while let Some(next) = inbound.next().await {
        let raw = match next {
            Ok(Message::Text(text)) => text.to_string(),
            Ok(Message::Binary(bytes)) => String::from_utf8_lossy(&bytes).into_owned(),
            Ok(Message::Ping(_)) | Ok(Message::Pong(_)) => continue,
            Ok(Message::Close(_)) | Err(_) => break,
            Ok(Message::Frame(_)) => continue,
        };
        if raw.len() > MAX_INBOUND_FRAME_BYTES {
            continue;
        }

        match decode(&raw) {
            Some(msg) => dispatch::handle(&state, &mut session, msg).await,
            None => session.send_error("Invalid message format"),
        }
    }

    on_disconnect(&state, &session).await;
    writer.abort();
    Ok(())
}

async fn on_disconnect(state: &RelayState, session: &Session) {
    let (Some(device_id), Some(code)) = (&session.device_id, &session.room_code) else {
        return;
    };
    let Some(room) = state.registry.get_room(code).await else {
        return;
    };
    let Some(info) = room.remove_member(device_id).await else {
        return;
    };
    room.broadcast(
        &ServerMessage::MemberLeft {
            timestamp: now_ms(),
            code: code.clone(),
            device_id: device_id.clone(),
            name: Some(info.name.clone()),
        },
        None,
    )
    .await;
    if let Some(hook) = room.webhook().await {
        webhook::fire(
            state.http_client(),
            hook,
            "leave",
            code.clone(),
            serde_json::json!({ "device_id": device_id, "name": info.name }),
        );
    }
    if room.is_empty().await {
        state.registry.delete_room(code).await;
    }
}
