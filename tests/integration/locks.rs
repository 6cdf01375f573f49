use crate::common::{start_relay, TestClient};
use codehive_relay::protocol::{ChangeType, ClientMessage, FileChange, ServerMessage};
use std::time::SystemTime;

fn now_ms() -> i64 {
    SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .unwrap()
        .as_millis() as i64
}

async fn create_room(a: &mut TestClient, name: &str) -> String {
    a.send(&ClientMessage::CreateRoom {
        timestamp: now_ms(),
        device_id: "dev-a".to_string(),
        name: name.to_string(),
        password: None,
        is_public: Some(false),
        expires_in_hours: None,
        branch: None,
    })
    .await;
    match a.recv().await {
        ServerMessage::RoomCreated { code, .. } => code,
        other => panic!("expected room_created, got {other:?}"),
    }
}

async fn join_room(b: &mut TestClient, code: &str, device_id: &str, name: &str) {
    b.send(&ClientMessage::JoinRoom {
        timestamp: now_ms(),
        device_id: device_id.to_string(),
        code: code.to_string(),
        name: name.to_string(),
        password: None,
        branch: None,
    })
    .await;
    match b.recv().await {
        ServerMessage::RoomJoined { .. } => {}
        other => panic!("expected room_joined, got {other:?}"),
    }
}

#[tokio::test]
async fn lock_then_blocked_change_then_unlock() {
    let (addr, _relay) = start_relay().await;
    let mut a = TestClient::connect(&addr).await;
    let code = create_room(&mut a, "Zeus").await;

    let mut b = TestClient::connect(&addr).await;
    join_room(&mut b, &code, "dev-b", "Hera").await;
    let _ = a
        .recv_matching(|m| matches!(m, ServerMessage::MemberJoined { .. }), 2_000)
        .await;

    a.send(&ClientMessage::LockFile {
        timestamp: now_ms(),
        device_id: "dev-a".to_string(),
        code: code.clone(),
        file: "src/config.ts".to_string(),
    })
    .await;
    let locked = b
        .recv_matching(|m| matches!(m, ServerMessage::FileLocked { .. }), 2_000)
        .await
        .expect("B should observe the lock broadcast");
    if let ServerMessage::FileLocked { locked_by, .. } = locked {
        assert_eq!(locked_by, "Zeus");
    }

    b.send(&ClientMessage::LockFile {
        timestamp: now_ms(),
        device_id: "dev-b".to_string(),
        code: code.clone(),
        file: "src/config.ts".to_string(),
    })
    .await;
    match b.recv().await {
        ServerMessage::LockError { locked_by, .. } => {
            assert_eq!(locked_by.as_deref(), Some("Zeus"));
        }
        other => panic!("expected lock_error, got {other:?}"),
    }

    b.send(&ClientMessage::FileChange {
        timestamp: now_ms(),
        device_id: "dev-b".to_string(),
        code: code.clone(),
        change: FileChange {
            path: "src/config.ts".to_string(),
            change_type: ChangeType::Change,
            author: "Hera".to_string(),
            device_id: "dev-b".to_string(),
            timestamp: now_ms(),
            diff: None,
            lines_added: 1,
            lines_removed: 0,
            size_before: None,
            size_after: None,
        },
    })
    .await;
    match b.recv().await {
        ServerMessage::Error { message } => assert!(message.contains("locked"), "got: {message}"),
        other => panic!("expected error, got {other:?}"),
    }

    // no file_changed should have reached B for the rejected write
    assert!(
        b.recv_matching(|m| matches!(m, ServerMessage::FileChanged { .. }), 300)
            .await
            .is_none(),
        "a rejected write must not broadcast file_changed"
    );

    a.send(&ClientMessage::UnlockFile {
        timestamp: now_ms(),
        device_id: "dev-a".to_string(),
        code: code.clone(),
        file: "src/config.ts".to_string(),
    })
    .await;
    let unlocked = b
        .recv_matching(|m| matches!(m, ServerMessage::FileUnlocked { .. }), 2_000)
        .await;
    assert!(unlocked.is_some());
}

#[tokio::test]
async fn unlock_of_unlocked_file_is_a_no_op_error_free() {
    let (addr, _relay) = start_relay().await;
    let mut a = TestClient::connect(&addr).await;
    let code = create_room(&mut a, "Zeus").await;

    a.send(&ClientMessage::UnlockFile {
        timestamp: now_ms(),
        device_id: "dev-a".to_string(),
        code,
        file: "never-locked.rs".to_string(),
    })
    .await;
    // UnlockOutcome::HeldByOther (no current holder counts as held-by-nobody
    // in this implementation) should not crash the connection; confirm the
    // socket is still responsive with a status round-trip.
    a.send(&ClientMessage::ListRooms {
        timestamp: now_ms(),
        device_id: "dev-a".to_string(),
    })
    .await;
    let reply = a.recv_timeout(2_000).await;
    assert!(reply.is_some(), "connection should remain usable");
}

#[tokio::test]
async fn relocking_by_the_current_holder_succeeds_without_new_timeline_growth() {
    let (addr, _relay) = start_relay().await;
    let mut a = TestClient::connect(&addr).await;
    let code = create_room(&mut a, "Zeus").await;

    for _ in 0..2 {
        a.send(&ClientMessage::LockFile {
            timestamp: now_ms(),
            device_id: "dev-a".to_string(),
            code: code.clone(),
            file: "src/main.rs".to_string(),
        })
        .await;
        match a.recv().await {
            ServerMessage::FileLocked { locked_by, .. } => assert_eq!(locked_by, "Zeus"),
            other => panic!("re-lock by holder should still succeed, got {other:?}"),
        }
    }

    a.send(&ClientMessage::GetTimeline {
        timestamp: now_ms(),
        device_id: "dev-a".to_string(),
        code: code.clone(),
        limit: None,
    })
    .await;
    match a.recv().await {
        ServerMessage::Timeline { events, .. } => {
            let lock_events = events
                .iter()
                .filter(|e| matches!(e.event_type, codehive_relay::protocol::TimelineEventType::Lock))
                .count();
            assert_eq!(lock_events, 1, "re-acquiring an already-held lock must not add a second timeline entry");
        }
        other => panic!("expected timeline, got {other:?}"),
    }
}
