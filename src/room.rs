//! Room state.
//!
//! A `Room` is the single unit of exclusive access in the system — every
//! mutating operation takes the room's async mutex once, mutates, and
//! releases it before any I/O happens. Concurrent operations
//! on different rooms never contend with each other.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use sha2::{Digest, Sha256};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;

use crate::config::{
    MAX_LOCKS_PER_ROOM, MAX_RECENT_CHANGES, MAX_ROOM_MEMBERS, MAX_TIMELINE_EVENTS,
    TYPING_TIMEOUT_MS,
};
use crate::error::RelayError;
use crate::ids::now_ms;
use crate::protocol::{
    Cursor, FileChange, LockRecord, MemberInfo, MemberStatus, RoomSnapshot, RoomSummary,
    ServerMessage, TimelineEvent, TimelineEventType,
};
use crate::transport::Transport;

/// Outcome of a `lock_file` attempt.
pub enum LockOutcome {
    /// Newly acquired, or the caller already held it (idempotent).
    Acquired,
    /// Held by someone else.
    HeldByOther { locked_by: String },
    /// Would exceed `MAX_LOCKS_PER_ROOM`.
    CapExceeded,
}

/// Outcome of an `unlock_file` attempt.
pub enum UnlockOutcome {
    /// Released, or was already unlocked (idempotent).
    Released,
    HeldByOther { locked_by: String },
}

pub fn hash_password(password: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(password.as_bytes());
    hex::encode(hasher.finalize())
}

struct MemberEntry {
    info: MemberInfo,
    transport: Arc<dyn Transport>,
    typing_timer: Option<JoinHandle<()>>,
}

/// Optional webhook sink for a room.
#[derive(Debug, Clone)]
pub struct WebhookConfig {
    pub url: String,
    pub events: Vec<String>,
}

impl WebhookConfig {
    pub fn wants(&self, event: &str) -> bool {
        self.events.iter().any(|e| e == "all" || e == event)
    }
}

struct RoomState {
    /// Plaintext password, known only for rooms created this process
    /// lifetime. `None` for rooms recovered from the persistence snapshot
    /// even when `password_hash` is set.
    password: Option<String>,
    password_hash: Option<String>,
    is_public: bool,
    expires_in_hours: u32,
    last_activity: i64,
    members: HashMap<String, MemberEntry>,
    locks: HashMap<String, LockRecord>,
    recent_changes: VecDeque<FileChange>,
    timeline: VecDeque<TimelineEvent>,
    next_timeline_id: u64,
    webhook: Option<WebhookConfig>,
}

pub struct Room {
    pub code: String,
    pub created_at: i64,
    pub created_by: String,
    state: Mutex<RoomState>,
    /// Monotonic activity stamp readable without taking the room lock, for
    /// cheap `is_expired` probing from the expiry sweep.
    last_activity_hint: AtomicU64,
}

impl Room {
    pub fn new(
        code: String,
        created_by: String,
        password: Option<String>,
        is_public: bool,
        expires_in_hours: u32,
    ) -> Arc<Room> {
        let now = now_ms();
        let password_hash = password.as_deref().map(hash_password);
        Arc::new(Room {
            code,
            created_at: now,
            created_by,
            last_activity_hint: AtomicU64::new(now as u64),
            state: Mutex::new(RoomState {
                password,
                password_hash,
                is_public,
                expires_in_hours,
                last_activity: now,
                members: HashMap::new(),
                locks: HashMap::new(),
                recent_changes: VecDeque::new(),
                timeline: VecDeque::new(),
                next_timeline_id: 1,
                webhook: None,
            }),
        })
    }

    /// Reconstructs room *metadata only* from a persisted summary.
    /// Membership is never restored on recovery, only room metadata.
    pub fn from_summary(summary: &RoomSummary) -> Arc<Room> {
        Arc::new(Room {
            code: summary.code.clone(),
            created_at: summary.created_at,
            created_by: summary.created_by.clone(),
            last_activity_hint: AtomicU64::new(summary.last_activity as u64),
            state: Mutex::new(RoomState {
                password: None,
                password_hash: summary.password_hash.clone(),
                is_public: summary.is_public,
                expires_in_hours: summary.expires_in_hours,
                last_activity: summary.last_activity,
                members: HashMap::new(),
                locks: HashMap::new(),
                recent_changes: VecDeque::new(),
                timeline: VecDeque::new(),
                next_timeline_id: 1,
                webhook: None,
            }),
        })
    }

    fn touch(state: &mut RoomState) {
        state.last_activity = now_ms();
    }

    fn append_timeline(
        state: &mut RoomState,
        event_type: TimelineEventType,
        actor: &str,
        detail: serde_json::Value,
    ) {
        let event = TimelineEvent {
            id: state.next_timeline_id,
            ts: now_ms(),
            event_type,
            actor: actor.to_string(),
            detail,
        };
        state.next_timeline_id += 1;
        state.timeline.push_back(event);
        while state.timeline.len() > MAX_TIMELINE_EVENTS {
            state.timeline.pop_front();
        }
    }

    // ---- membership -----------------------------------------------------

    pub async fn add_member(
        &self,
        device_id: &str,
        name: &str,
        transport: Arc<dyn Transport>,
        branch: Option<String>,
    ) -> Result<(), RelayError> {
        let mut state = self.state.lock().await;
        if state.members.len() >= MAX_ROOM_MEMBERS && !state.members.contains_key(device_id) {
            return Err(RelayError::RoomFull);
        }
        if state.members.contains_key(device_id) {
            return Err(RelayError::DuplicateDevice);
        }

        let now = now_ms();
        let info = MemberInfo {
            device_id: device_id.to_string(),
            name: name.to_string(),
            status: MemberStatus::Active,
            working_on: Vec::new(),
            joined_at: now,
            last_seen: now,
            branch: branch.clone(),
            typing_in: None,
            cursor: None,
        };
        state.members.insert(
            device_id.to_string(),
            MemberEntry {
                info,
                transport,
                typing_timer: None,
            },
        );

        Self::append_timeline(
            &mut state,
            TimelineEventType::Join,
            name,
            serde_json::json!({ "device_id": device_id, "branch": branch }),
        );
        Self::touch(&mut state);
        self.last_activity_hint
            .store(state.last_activity as u64, Ordering::Relaxed);
        Ok(())
    }

    pub async fn remove_member(&self, device_id: &str) -> Option<MemberInfo> {
        let mut state = self.state.lock().await;
        let entry = state.members.remove(device_id)?;
        if let Some(timer) = entry.typing_timer {
            timer.abort();
        }
        state.locks.retain(|_, lock| lock.device_id != device_id);

        Self::append_timeline(
            &mut state,
            TimelineEventType::Leave,
            &entry.info.name,
            serde_json::json!({ "device_id": device_id }),
        );
        Self::touch(&mut state);
        self.last_activity_hint
            .store(state.last_activity as u64, Ordering::Relaxed);
        Some(entry.info)
    }

    pub async fn member_count(&self) -> usize {
        self.state.lock().await.members.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.state.lock().await.members.is_empty()
    }

    pub async fn is_expired(&self) -> bool {
        let state = self.state.lock().await;
        state.expires_in_hours > 0
            && now_ms() - state.last_activity > state.expires_in_hours as i64 * 3_600_000
    }

    // ---- heartbeat / presence --------------------------------------------

    /// Updates liveness and returns whether `branch` changed.
    pub async fn update_heartbeat(
        &self,
        device_id: &str,
        status: MemberStatus,
        branch: Option<String>,
    ) -> bool {
        let mut state = self.state.lock().await;
        let Some(entry) = state.members.get_mut(device_id) else {
            return false;
        };
        entry.info.last_seen = now_ms();
        entry.info.status = status;

        let branch_changed = branch.is_some() && branch != entry.info.branch;
        if branch_changed {
            entry.info.branch = branch;
            let actor = entry.info.name.clone();
            let new_branch = entry.info.branch.clone();
            Self::append_timeline(
                &mut state,
                TimelineEventType::BranchChange,
                &actor,
                serde_json::json!({ "device_id": device_id, "branch": new_branch }),
            );
        }
        branch_changed
    }

    pub async fn find_dead_clients(&self, timeout_ms: i64) -> Vec<String> {
        let state = self.state.lock().await;
        let now = now_ms();
        state
            .members
            .values()
            .filter(|e| now - e.info.last_seen > timeout_ms)
            .map(|e| e.info.device_id.clone())
            .collect()
    }

    // ---- typing / cursor --------------------------------------------------

    /// Sets (or clears) a member's typing indicator, replacing any
    /// outstanding auto-clear timer with a fresh one. Needs `Arc<Room>`
    /// because the timer re-locks the room when it fires.
    pub async fn set_typing(room: &Arc<Room>, device_id: &str, file: Option<String>) {
        let mut state = room.state.lock().await;
        let Some(entry) = state.members.get_mut(device_id) else {
            return;
        };
        if let Some(old_timer) = entry.typing_timer.take() {
            old_timer.abort();
        }
        entry.info.typing_in = file.clone();

        let Some(file) = file else {
            return;
        };

        let room = Arc::clone(room);
        let device_id = device_id.to_string();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(std::time::Duration::from_millis(TYPING_TIMEOUT_MS)).await;
            let mut state = room.state.lock().await;
            if let Some(entry) = state.members.get_mut(&device_id)
                && entry.info.typing_in.as_deref() == Some(file.as_str())
            {
                entry.info.typing_in = None;
            }
        });
        entry.typing_timer = Some(handle);
    }

    pub async fn update_cursor(&self, device_id: &str, cursor: Option<Cursor>) {
        let mut state = self.state.lock().await;
        if let Some(entry) = state.members.get_mut(device_id) {
            entry.info.cursor = cursor;
        }
    }

    pub async fn member_info(&self, device_id: &str) -> Option<MemberInfo> {
        self.state
            .lock()
            .await
            .members
            .get(device_id)
            .map(|e| e.info.clone())
    }

    /// Appends a `chat` timeline entry. Chat content is not stored beyond
    /// the timeline's `detail` blob — there is no separate message log.
    pub async fn append_chat(&self, actor: &str, content: &str) {
        let mut state = self.state.lock().await;
        Self::append_timeline(
            &mut state,
            TimelineEventType::Chat,
            actor,
            serde_json::json!({ "content": content }),
        );
        Self::touch(&mut state);
    }

    // ---- locks --------------------------------------------------------------

    pub async fn lock_file(&self, device_id: &str, name: &str, file: &str) -> LockOutcome {
        let mut state = self.state.lock().await;
        if let Some(existing) = state.locks.get(file) {
            if existing.device_id == device_id {
                return LockOutcome::Acquired;
            }
            return LockOutcome::HeldByOther {
                locked_by: existing.locked_by.clone(),
            };
        }
        if state.locks.len() >= MAX_LOCKS_PER_ROOM {
            return LockOutcome::CapExceeded;
        }

        state.locks.insert(
            file.to_string(),
            LockRecord {
                file: file.to_string(),
                locked_by: name.to_string(),
                device_id: device_id.to_string(),
                locked_at: now_ms(),
            },
        );
        Self::append_timeline(
            &mut state,
            TimelineEventType::Lock,
            name,
            serde_json::json!({ "file": file }),
        );
        Self::touch(&mut state);
        LockOutcome::Acquired
    }

    pub async fn unlock_file(&self, device_id: &str, name: &str, file: &str) -> UnlockOutcome {
        let mut state = self.state.lock().await;
        let Some(existing) = state.locks.get(file) else {
            return UnlockOutcome::Released;
        };
        if existing.device_id != device_id {
            return UnlockOutcome::HeldByOther {
                locked_by: existing.locked_by.clone(),
            };
        }
        state.locks.remove(file);
        Self::append_timeline(
            &mut state,
            TimelineEventType::Unlock,
            name,
            serde_json::json!({ "file": file }),
        );
        Self::touch(&mut state);
        UnlockOutcome::Released
    }

    pub async fn locked_by_other(&self, device_id: &str, file: &str) -> Option<String> {
        let state = self.state.lock().await;
        state
            .locks
            .get(file)
            .filter(|l| l.device_id != device_id)
            .map(|l| l.locked_by.clone())
    }

    // ---- file changes / working sets ---------------------------------------

    /// Records a change and returns the other members whose declared
    /// working set includes `change.path` (the conflict set).
    pub async fn record_file_change(&self, change: FileChange) -> Vec<MemberInfo> {
        let mut state = self.state.lock().await;
        let path = change.path.clone();
        let author_device = change.device_id.clone();
        let author = change.author.clone();

        state.recent_changes.push_back(change);
        while state.recent_changes.len() > MAX_RECENT_CHANGES {
            state.recent_changes.pop_front();
        }

        Self::append_timeline(
            &mut state,
            TimelineEventType::FileChange,
            &author,
            serde_json::json!({ "path": path }),
        );
        Self::touch(&mut state);

        state
            .members
            .values()
            .filter(|e| e.info.device_id != author_device && e.info.working_on.contains(&path))
            .map(|e| e.info.clone())
            .collect()
    }

    /// Replaces a member's working set and returns, per declared file, the
    /// other members who also declared it.
    pub async fn update_working_files(
        &self,
        device_id: &str,
        files: Vec<String>,
    ) -> Vec<(String, Vec<String>)> {
        let mut state = self.state.lock().await;
        if let Some(entry) = state.members.get_mut(device_id) {
            entry.info.working_on = files.clone();
            entry.info.last_seen = now_ms();
        } else {
            return Vec::new();
        }

        files
            .into_iter()
            .map(|file| {
                let authors: Vec<String> = state
                    .members
                    .values()
                    .filter(|e| e.info.device_id != device_id && e.info.working_on.contains(&file))
                    .map(|e| e.info.name.clone())
                    .collect();
                (file, authors)
            })
            .filter(|(_, authors)| !authors.is_empty())
            .collect()
    }

    pub async fn check_branch_divergence(&self) -> Option<(String, HashMap<String, String>)> {
        let state = self.state.lock().await;
        let mut branches: HashMap<String, String> = HashMap::new();
        let mut distinct = std::collections::HashSet::new();
        for entry in state.members.values() {
            if let Some(branch) = &entry.info.branch {
                branches.insert(entry.info.name.clone(), branch.clone());
                distinct.insert(branch.clone());
            }
        }
        if distinct.len() > 1 {
            Some((
                format!("{} branches in use: diverged", distinct.len()),
                branches,
            ))
        } else {
            None
        }
    }

    // ---- webhook ------------------------------------------------------------

    pub async fn set_webhook(&self, webhook: Option<WebhookConfig>) {
        self.state.lock().await.webhook = webhook;
    }

    pub async fn webhook(&self) -> Option<WebhookConfig> {
        self.state.lock().await.webhook.clone()
    }

    pub async fn set_public(&self, is_public: bool) {
        self.state.lock().await.is_public = is_public;
    }

    // ---- password -------------------------------------------------------

    pub async fn check_password(&self, supplied: Option<&str>) -> Result<(), RelayError> {
        let state = self.state.lock().await;
        if let Some(expected) = &state.password {
            if supplied == Some(expected.as_str()) {
                Ok(())
            } else {
                Err(RelayError::WrongPassword)
            }
        } else if let Some(expected_hash) = &state.password_hash {
            let matches = supplied
                .map(hash_password)
                .is_some_and(|h| &h == expected_hash);
            if matches {
                Ok(())
            } else {
                Err(RelayError::WrongPassword)
            }
        } else {
            Ok(())
        }
    }

    // ---- snapshots ------------------------------------------------------

    pub async fn to_room_snapshot(&self) -> RoomSnapshot {
        let state = self.state.lock().await;
        let recent_changes: Vec<FileChange> = state
            .recent_changes
            .iter()
            .rev()
            .take(20)
            .rev()
            .cloned()
            .collect();
        let timeline: Vec<TimelineEvent> = state
            .timeline
            .iter()
            .rev()
            .take(20)
            .rev()
            .cloned()
            .collect();
        RoomSnapshot {
            code: self.code.clone(),
            created_at: self.created_at,
            created_by: self.created_by.clone(),
            has_password: state.password.is_some() || state.password_hash.is_some(),
            is_public: state.is_public,
            expires_in_hours: state.expires_in_hours,
            last_activity: state.last_activity,
            members: state.members.values().map(|e| e.info.clone()).collect(),
            locks: state.locks.values().cloned().collect(),
            recent_changes,
            timeline,
        }
    }

    pub async fn to_room_summary(&self) -> RoomSummary {
        let state = self.state.lock().await;
        RoomSummary {
            code: self.code.clone(),
            created_at: self.created_at,
            created_by: self.created_by.clone(),
            has_password: state.password.is_some() || state.password_hash.is_some(),
            password_hash: state
                .password_hash
                .clone()
                .or_else(|| state.password.as_deref().map(hash_password)),
            is_public: state.is_public,
            expires_in_hours: state.expires_in_hours,
            last_activity: state.last_activity,
            member_count: state.members.len(),
        }
    }

    pub async fn get_timeline(&self, limit: usize) -> Vec<TimelineEvent> {
        let state = self.state.lock().await;
        let len = state.timeline.len();
        let skip = len.saturating_sub(limit);
        state.timeline.iter().skip(skip).cloned().collect()
    }

    // ---- broadcast ------------------------------------------------------

    pub async fn send_to(&self, device_id: &str, msg: &ServerMessage) -> bool {
        let state = self.state.lock().await;
        match state.members.get(device_id) {
            Some(entry) => entry.transport.send(crate::protocol::encode(msg)),
            None => false,
        }
    }

    pub async fn broadcast(&self, msg: &ServerMessage, exclude_device_id: Option<&str>) {
        let state = self.state.lock().await;
        let frame = crate::protocol::encode(msg);
        for entry in state.members.values() {
            if Some(entry.info.device_id.as_str()) == exclude_device_id {
                continue;
            }
            if entry.transport.is_open() {
                entry.transport.send(frame.clone());
            }
        }
    }
}
