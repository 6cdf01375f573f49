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

#[tokio::test]
async fn empty_name_is_rejected() {
    let (addr, _relay) = start_relay().await;
    let mut a = TestClient::connect(&addr).await;
    a.send(&ClientMessage::CreateRoom {
        timestamp: now_ms(),
        device_id: "dev-a".to_string(),
        name: String::new(),
        password: None,
        is_public: Some(false),
        expires_in_hours: None,
        branch: None,
    })
    .await;
    assert!(matches!(a.recv().await, ServerMessage::Error { .. }));
}

#[tokio::test]
async fn overlong_name_is_rejected() {
    let (addr, _relay) = start_relay().await;
    let mut a = TestClient::connect(&addr).await;
    a.send(&ClientMessage::CreateRoom {
        timestamp: now_ms(),
        device_id: "dev-a".to_string(),
        name: "x".repeat(51),
        password: None,
        is_public: Some(false),
        expires_in_hours: None,
        branch: None,
    })
    .await;
    assert!(matches!(a.recv().await, ServerMessage::Error { .. }));
}

#[tokio::test]
async fn overlong_chat_message_is_rejected() {
    let (addr, _relay) = start_relay().await;
    let mut a = TestClient::connect(&addr).await;
    let code = create_room(&mut a, "Zeus").await;

    a.send(&ClientMessage::ChatMessage {
        timestamp: now_ms(),
        device_id: "dev-a".to_string(),
        code,
        content: "x".repeat(10_001),
    })
    .await;
    assert!(matches!(a.recv().await, ServerMessage::Error { .. }));
}

#[tokio::test]
async fn too_many_declared_files_is_rejected() {
    let (addr, _relay) = start_relay().await;
    let mut a = TestClient::connect(&addr).await;
    let code = create_room(&mut a, "Zeus").await;

    let files: Vec<String> = (0..101).map(|i| format!("f{i}.rs")).collect();
    a.send(&ClientMessage::DeclareWorking {
        timestamp: now_ms(),
        device_id: "dev-a".to_string(),
        code,
        files,
    })
    .await;
    assert!(matches!(a.recv().await, ServerMessage::Error { .. }));
}

#[tokio::test]
async fn overlong_declared_path_is_rejected() {
    let (addr, _relay) = start_relay().await;
    let mut a = TestClient::connect(&addr).await;
    let code = create_room(&mut a, "Zeus").await;

    a.send(&ClientMessage::DeclareWorking {
        timestamp: now_ms(),
        device_id: "dev-a".to_string(),
        code,
        files: vec!["p".repeat(501)],
    })
    .await;
    assert!(matches!(a.recv().await, ServerMessage::Error { .. }));
}

#[tokio::test]
async fn overlong_terminal_output_is_rejected() {
    let (addr, _relay) = start_relay().await;
    let mut a = TestClient::connect(&addr).await;
    let code = create_room(&mut a, "Zeus").await;

    a.send(&ClientMessage::ShareTerminal {
        timestamp: now_ms(),
        device_id: "dev-a".to_string(),
        code,
        output: "x".repeat(50_001),
    })
    .await;
    assert!(matches!(a.recv().await, ServerMessage::Error { .. }));
}

#[tokio::test]
async fn twenty_first_member_is_rejected() {
    let (addr, _relay) = start_relay().await;
    let mut a = TestClient::connect(&addr).await;
    let code = create_room(&mut a, "Member0").await;

    for i in 1..20 {
        let mut m = TestClient::connect(&addr).await;
        m.send(&ClientMessage::JoinRoom {
            timestamp: now_ms(),
            device_id: format!("dev-{i}"),
            code: code.clone(),
            name: format!("Member{i}"),
            password: None,
            branch: None,
        })
        .await;
        assert!(
            matches!(m.recv().await, ServerMessage::RoomJoined { .. }),
            "member {i} (of 20 allowed) should be accepted"
        );
    }

    let mut overflow = TestClient::connect(&addr).await;
    overflow
        .send(&ClientMessage::JoinRoom {
            timestamp: now_ms(),
            device_id: "dev-overflow".to_string(),
            code,
            name: "Member20".to_string(),
            password: None,
            branch: None,
        })
        .await;
    match overflow.recv().await {
        ServerMessage::Error { message } => assert!(message.contains("full"), "got: {message}"),
        other => panic!("expected error, got {other:?}"),
    }
}

#[tokio::test]
async fn fifty_first_lock_is_rejected() {
    let (addr, _relay) = start_relay().await;
    let mut a = TestClient::connect(&addr).await;
    let code = create_room(&mut a, "Zeus").await;

    for i in 0..50 {
        a.send(&ClientMessage::LockFile {
            timestamp: now_ms(),
            device_id: "dev-a".to_string(),
            code: code.clone(),
            file: format!("file-{i}.rs"),
        })
        .await;
        assert!(
            matches!(a.recv().await, ServerMessage::FileLocked { .. }),
            "lock {i} (of 50 allowed) should succeed"
        );
    }

    a.send(&ClientMessage::LockFile {
        timestamp: now_ms(),
        device_id: "dev-a".to_string(),
        code,
        file: "file-50.rs".to_string(),
    })
    .await;
    match a.recv().await {
        ServerMessage::LockError { locked_by, .. } => assert!(locked_by.is_none()),
        other => panic!("expected lock_error, got {other:?}"),
    }
}

/// The in-room change history keeps growing internally but the snapshot
/// handed to clients is capped: past the cap, only the most recent
/// entries remain and they stay in arrival order.
#[tokio::test]
async fn recent_changes_snapshot_keeps_only_the_newest_entries_in_order() {
    let (addr, _relay) = start_relay().await;
    let mut a = TestClient::connect(&addr).await;
    let code = create_room(&mut a, "Zeus").await;

    for i in 0..25 {
        a.send(&ClientMessage::FileChange {
            timestamp: now_ms(),
            device_id: "dev-a".to_string(),
            code: code.clone(),
            change: FileChange {
                path: format!("file-{i}.rs"),
                change_type: ChangeType::Change,
                author: "Zeus".to_string(),
                device_id: "dev-a".to_string(),
                timestamp: now_ms(),
                diff: None,
                lines_added: 1,
                lines_removed: 0,
                size_before: None,
                size_after: None,
            },
        })
        .await;
    }

    a.send(&ClientMessage::RequestStatus {
        timestamp: now_ms(),
        device_id: "dev-a".to_string(),
        code,
    })
    .await;
    match a.recv().await {
        ServerMessage::RoomStatus { room, .. } => {
            assert_eq!(room.recent_changes.len(), 20);
            assert_eq!(room.recent_changes.first().unwrap().path, "file-5.rs");
            assert_eq!(room.recent_changes.last().unwrap().path, "file-24.rs");
        }
        other => panic!("expected room_status, got {other:?}"),
    }
}
