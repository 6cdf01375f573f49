//! The per-connection dispatcher: one handler per `ClientMessage` variant,
//! matching the client-message dispatch table.

use tokio::sync::mpsc;

use crate::error::RelayError;
use crate::ids::now_ms;
use crate::protocol::{encode, ClientMessage, ServerMessage};
use crate::room::{LockOutcome, UnlockOutcome, WebhookConfig};
use crate::transport::ChannelTransport;

use super::{webhook, RelayState};

/// Per-connection session, updated to the most recent frame's
/// `device_id`/`code`.
pub struct Session {
    pub device_id: Option<String>,
    pub room_code: Option<String>,
    reply_tx: mpsc::UnboundedSender<String>,
}

impl Session {
    pub fn new(reply_tx: mpsc::UnboundedSender<String>) -> Self {
        Self {
            device_id: None,
            room_code: None,
            reply_tx,
        }
    }

    fn reply(&self, msg: &ServerMessage) {
        let _ = self.reply_tx.send(encode(msg));
    }

    pub fn transport(&self) -> std::sync::Arc<ChannelTransport> {
        std::sync::Arc::new(ChannelTransport::new(self.reply_tx.clone()))
    }

    /// Sends a bare `error` frame — used outside the dispatcher for
    /// transport-level failures (decode errors, unexpected closes).
    pub(crate) fn send_error(&self, message: impl Into<String>) {
        self.reply(&ServerMessage::error(message));
    }
}

fn validate_len(label: &str, len: usize, min: usize, max: usize) -> Result<(), RelayError> {
    if len < min || len > max {
        Err(RelayError::Validation(format!(
            "{label} must be between {min} and {max} characters"
        )))
    } else {
        Ok(())
    }
}

pub async fn handle(state: &RelayState, session: &mut Session, msg: ClientMessage) {
    session.device_id = Some(msg.device_id().to_string());
    let code = msg.room_code().map(str::to_string);

    let room = match &code {
        Some(code) => state.registry.get_room(code).await,
        None => None,
    };
    if code.is_some() && room.is_none() {
        if msg.replies_on_missing_room() {
            session.reply(&ServerMessage::error(RelayError::RoomNotFound.to_string()));
        }
        return;
    }

    match msg {
        ClientMessage::CreateRoom {
            device_id,
            name,
            password,
            is_public,
            expires_in_hours,
            branch,
            ..
        } => {
            if let Err(err) = validate_len("name", name.len(), 1, 50) {
                session.reply(&ServerMessage::error(err.to_string()));
                return;
            }
            let room = match state
                .registry
                .create_room(name.clone(), password.clone(), is_public.unwrap_or(false), expires_in_hours.unwrap_or(0))
                .await
            {
                Ok(room) => room,
                Err(err) => {
                    session.reply(&ServerMessage::error(err.to_string()));
                    return;
                }
            };
            room.add_member(&device_id, &name, session.transport(), branch)
                .await
                .ok();
            session.room_code = Some(room.code.clone());

            let summary = room.to_room_summary().await;
            let invite_uri = crate::ids::invite_uri(&state.host, state.port, &room.code, password.as_deref());
            session.reply(&ServerMessage::RoomCreated {
                timestamp: now_ms(),
                code: room.code.clone(),
                invite_uri,
                room: summary,
            });
        }

        ClientMessage::JoinRoom {
            device_id,
            code,
            name,
            password,
            branch,
            ..
        } => {
            if let Err(err) = validate_len("name", name.len(), 1, 50) {
                session.reply(&ServerMessage::error(err.to_string()));
                return;
            }
            let room = room.expect("guarded above");

            if let Err(err) = room.check_password(password.as_deref()).await {
                session.reply(&ServerMessage::error(err.to_string()));
                return;
            }
            if let Err(reason) = room
                .add_member(&device_id, &name, session.transport(), branch)
                .await
            {
                session.reply(&ServerMessage::error(reason.to_string()));
                return;
            }
            session.room_code = Some(code.clone());

            let snapshot = room.to_room_snapshot().await;
            session.reply(&ServerMessage::RoomJoined {
                timestamp: now_ms(),
                code: code.clone(),
                room: snapshot,
            });

            if let Some(member) = room.member_info(&device_id).await {
                room.broadcast(
                    &ServerMessage::MemberJoined {
                        timestamp: now_ms(),
                        code: code.clone(),
                        member: member.clone(),
                    },
                    Some(&device_id),
                )
                .await;

                if let Some((message, branches)) = room.check_branch_divergence().await {
                    room.broadcast(
                        &ServerMessage::BranchWarning {
                            timestamp: now_ms(),
                            code: code.clone(),
                            message,
                            branches,
                        },
                        None,
                    )
                    .await;
                }

                if let Some(webhook) = room.webhook().await {
                    webhook::fire(
                        state.http_client(),
                        webhook,
                        "join",
                        code.clone(),
                        serde_json::json!({ "member": member }),
                    );
                }
            }
        }

        ClientMessage::LeaveRoom { device_id, code, .. } => {
            let room = room.expect("guarded above");
            if let Some(info) = room.remove_member(&device_id).await {
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
                session.reply(&ServerMessage::RoomLeft {
                    timestamp: now_ms(),
                    code: code.clone(),
                });
                if let Some(webhook) = room.webhook().await {
                    webhook::fire(
                        state.http_client(),
                        webhook,
                        "leave",
                        code.clone(),
                        serde_json::json!({ "device_id": device_id, "name": info.name }),
                    );
                }
                if room.is_empty().await {
                    state.registry.delete_room(&code).await;
                }
            }
            session.room_code = None;
        }

        ClientMessage::Heartbeat {
            device_id,
            code,
            status,
            branch,
            ..
        } => {
            let room = room.expect("guarded above");
            let branch_changed = room.update_heartbeat(&device_id, status, branch).await;
            if branch_changed && let Some((message, branches)) = room.check_branch_divergence().await {
                room.broadcast(
                    &ServerMessage::BranchWarning {
                        timestamp: now_ms(),
                        code: code.clone(),
                        message,
                        branches,
                    },
                    None,
                )
                .await;
            }
            session.reply(&ServerMessage::HeartbeatAck { timestamp: now_ms() });
        }

        ClientMessage::FileChange {
            device_id,
            code,
            change,
            ..
        } => {
            let room = room.expect("guarded above");
            if let Some(locked_by) = room.locked_by_other(&device_id, &change.path).await {
                session.reply(&ServerMessage::error(format!(
                    "File '{}' is locked by {locked_by}",
                    change.path
                )));
                return;
            }

            let path = change.path.clone();
            let conflicts = room.record_file_change(change.clone()).await;
            room.broadcast(
                &ServerMessage::FileChanged {
                    timestamp: now_ms(),
                    code: code.clone(),
                    change: change.clone(),
                },
                Some(&device_id),
            )
            .await;

            let has_conflict = !conflicts.is_empty();
            if has_conflict {
                let authors = conflicts.into_iter().map(|m| m.name).collect();
                room.broadcast(
                    &ServerMessage::ConflictWarning {
                        timestamp: now_ms(),
                        code: code.clone(),
                        file: path.clone(),
                        authors,
                    },
                    None,
                )
                .await;
            }

            if let Some(webhook) = room.webhook().await {
                webhook::fire(
                    state.http_client(),
                    webhook.clone(),
                    "file_change",
                    code.clone(),
                    serde_json::json!({ "change": change }),
                );
                if has_conflict {
                    webhook::fire(
                        state.http_client(),
                        webhook,
                        "conflict",
                        code.clone(),
                        serde_json::json!({ "file": path }),
                    );
                }
            }
        }

        ClientMessage::DeclareWorking {
            device_id,
            code,
            files,
            ..
        } => {
            if let Err(err) = validate_len("files", files.len(), 0, 100) {
                session.reply(&ServerMessage::error(err.to_string()));
                return;
            }
            if let Some(path) = files.iter().find(|f| f.len() > 500) {
                session.reply(&ServerMessage::error(format!(
                    "path '{path}' exceeds 500 characters"
                )));
                return;
            }
            let room = room.expect("guarded above");
            let conflicts = room.update_working_files(&device_id, files).await;
            if let Some(member) = room.member_info(&device_id).await {
                room.broadcast(
                    &ServerMessage::MemberUpdated {
                        timestamp: now_ms(),
                        code: code.clone(),
                        member,
                    },
                    None,
                )
                .await;
            }
            for (file, authors) in conflicts {
                room.broadcast(
                    &ServerMessage::ConflictWarning {
                        timestamp: now_ms(),
                        code: code.clone(),
                        file,
                        authors,
                    },
                    None,
                )
                .await;
            }
        }

        ClientMessage::ChatMessage {
            device_id,
            code,
            content,
            ..
        } => {
            if let Err(err) = validate_len("content", content.len(), 1, 10_000) {
                session.reply(&ServerMessage::error(err.to_string()));
                return;
            }
            let room = room.expect("guarded above");
            let Some(sender) = room.member_info(&device_id).await else {
                return;
            };
            room.append_chat(&sender.name, &content).await;
            room.broadcast(
                &ServerMessage::ChatReceived {
                    timestamp: now_ms(),
                    code: code.clone(),
                    device_id: device_id.clone(),
                    sender: sender.name.clone(),
                    content: content.clone(),
                },
                Some(&device_id),
            )
            .await;
            if let Some(webhook) = room.webhook().await {
                webhook::fire(
                    state.http_client(),
                    webhook,
                    "chat",
                    code.clone(),
                    serde_json::json!({ "sender": sender.name, "content": content }),
                );
            }
        }

        ClientMessage::RequestStatus { code, .. } | ClientMessage::SyncRequest { code, .. } => {
            let room = room.expect("guarded above");
            let snapshot = room.to_room_snapshot().await;
            session.reply(&ServerMessage::RoomStatus {
                timestamp: now_ms(),
                code,
                room: snapshot,
            });
        }

        ClientMessage::DeclareTyping {
            device_id,
            code,
            file,
            ..
        } => {
            let room = room.expect("guarded above");
            crate::room::Room::set_typing(&room, &device_id, file.clone()).await;
            if let Some(member) = room.member_info(&device_id).await {
                room.broadcast(
                    &ServerMessage::TypingIndicator {
                        timestamp: now_ms(),
                        code: code.clone(),
                        device_id: device_id.clone(),
                        name: member.name,
                        file,
                    },
                    Some(&device_id),
                )
                .await;
            }
        }

        ClientMessage::LockFile {
            device_id,
            code,
            file,
            ..
        } => {
            let room = room.expect("guarded above");
            let Some(member) = room.member_info(&device_id).await else {
                return;
            };
            match room.lock_file(&device_id, &member.name, &file).await {
                LockOutcome::Acquired => {
                    room.broadcast(
                        &ServerMessage::FileLocked {
                            timestamp: now_ms(),
                            code: code.clone(),
                            file,
                            locked_by: member.name,
                            device_id,
                        },
                        None,
                    )
                    .await;
                }
                LockOutcome::HeldByOther { locked_by } => {
                    session.reply(&ServerMessage::LockError {
                        timestamp: now_ms(),
                        code,
                        file,
                        locked_by: Some(locked_by),
                    });
                }
                LockOutcome::CapExceeded => {
                    session.reply(&ServerMessage::LockError {
                        timestamp: now_ms(),
                        code,
                        file,
                        locked_by: None,
                    });
                }
            }
        }

        ClientMessage::UnlockFile {
            device_id,
            code,
            file,
            ..
        } => {
            let room = room.expect("guarded above");
            let Some(member) = room.member_info(&device_id).await else {
                return;
            };
            match room.unlock_file(&device_id, &member.name, &file).await {
                UnlockOutcome::Released => {
                    room.broadcast(
                        &ServerMessage::FileUnlocked {
                            timestamp: now_ms(),
                            code: code.clone(),
                            file,
                        },
                        None,
                    )
                    .await;
                }
                UnlockOutcome::HeldByOther { locked_by } => {
                    session.reply(&ServerMessage::error(format!(
                        "File '{file}' is locked by {locked_by}"
                    )));
                }
            }
        }

        ClientMessage::UpdateCursor {
            device_id,
            code,
            cursor,
            ..
        } => {
            let room = room.expect("guarded above");
            room.update_cursor(&device_id, cursor.clone()).await;
            if let Some(member) = room.member_info(&device_id).await {
                room.broadcast(
                    &ServerMessage::CursorUpdated {
                        timestamp: now_ms(),
                        code: code.clone(),
                        device_id: device_id.clone(),
                        name: member.name,
                        cursor,
                    },
                    Some(&device_id),
                )
                .await;
            }
        }

        ClientMessage::ShareTerminal {
            device_id,
            code,
            output,
            ..
        } => {
            if let Err(err) = validate_len("output", output.len(), 0, 50_000) {
                session.reply(&ServerMessage::error(err.to_string()));
                return;
            }
            let room = room.expect("guarded above");
            let Some(member) = room.member_info(&device_id).await else {
                return;
            };
            room.broadcast(
                &ServerMessage::TerminalShared {
                    timestamp: now_ms(),
                    code: code.clone(),
                    device_id: device_id.clone(),
                    name: member.name,
                    output,
                },
                Some(&device_id),
            )
            .await;
        }

        ClientMessage::ListRooms { .. } => {
            session.reply(&ServerMessage::RoomList {
                timestamp: now_ms(),
                rooms: state.registry.public_rooms().await,
            });
        }

        ClientMessage::GetTimeline { code, limit, .. } => {
            let room = room.expect("guarded above");
            let events = room.get_timeline(limit.unwrap_or(50)).await;
            session.reply(&ServerMessage::Timeline {
                timestamp: now_ms(),
                code,
                events,
            });
        }

        ClientMessage::SetWebhook { code: _, url, events, .. } => {
            let room = room.expect("guarded above");
            match url {
                Some(url) => {
                    room.set_webhook(Some(WebhookConfig {
                        url,
                        events: events.unwrap_or_else(|| vec!["all".to_string()]),
                    }))
                    .await;
                }
                None => room.set_webhook(None).await,
            }
        }

        ClientMessage::SetRoomVisibility { is_public, .. } => {
            let room = room.expect("guarded above");
            room.set_public(is_public).await;
        }
    }
}

impl RelayState {
    pub(crate) fn http_client(&self) -> reqwest::Client {
        self.http.clone()
    }
}
