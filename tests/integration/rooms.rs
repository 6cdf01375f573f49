use crate::common::{start_relay, TestClient};
use codehive_relay::ids::is_valid_room_code;
use codehive_relay::protocol::ClientMessage;
use std::time::SystemTime;

fn now_ms() -> i64 {
    SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .unwrap()
        .as_millis() as i64
}

#[tokio::test]
async fn create_then_join_with_password_and_branch_divergence() {
    let (addr, _relay) = start_relay().await;
    let mut a = TestClient::connect(&addr).await;

    a.send(&ClientMessage::CreateRoom {
        timestamp: now_ms(),
        device_id: "dev-a".to_string(),
        name: "Zeus".to_string(),
        password: Some("secret123".to_string()),
        is_public: Some(true),
        expires_in_hours: Some(24),
        branch: Some("main".to_string()),
    })
    .await;
    let created = a.recv().await;
    let (code, summary) = match created {
        codehive_relay::protocol::ServerMessage::RoomCreated { code, room, .. } => (code, room),
        other => panic!("expected room_created, got {other:?}"),
    };
    assert!(is_valid_room_code(&code), "code {code} should match the room-code pattern");
    assert!(summary.has_password);
    assert!(summary.is_public);

    let mut b = TestClient::connect(&addr).await;
    b.send(&ClientMessage::JoinRoom {
        timestamp: now_ms(),
        device_id: "dev-b".to_string(),
        code: code.clone(),
        name: "Alice".to_string(),
        password: Some("wrong".to_string()),
        branch: None,
    })
    .await;
    let rejected = b.recv().await;
    match rejected {
        codehive_relay::protocol::ServerMessage::Error { message } => {
            assert!(message.contains("Wrong password"), "got: {message}");
        }
        other => panic!("expected error, got {other:?}"),
    }

    b.send(&ClientMessage::JoinRoom {
        timestamp: now_ms(),
        device_id: "dev-b".to_string(),
        code: code.clone(),
        name: "Alice".to_string(),
        password: Some("secret123".to_string()),
        branch: Some("feature".to_string()),
    })
    .await;
    let joined = b.recv().await;
    assert!(matches!(
        joined,
        codehive_relay::protocol::ServerMessage::RoomJoined { .. }
    ));

    let member_joined = a
        .recv_matching(
            |m| matches!(m, codehive_relay::protocol::ServerMessage::MemberJoined { .. }),
            2_000,
        )
        .await
        .expect("A should see member_joined");
    assert!(matches!(
        member_joined,
        codehive_relay::protocol::ServerMessage::MemberJoined { .. }
    ));

    let warning = a
        .recv_matching(
            |m| matches!(m, codehive_relay::protocol::ServerMessage::BranchWarning { .. }),
            2_000,
        )
        .await
        .expect("A should see a branch_warning after the divergent join");
    if let codehive_relay::protocol::ServerMessage::BranchWarning { branches, .. } = warning {
        assert_eq!(branches.get("Zeus").map(String::as_str), Some("main"));
        assert_eq!(branches.get("Alice").map(String::as_str), Some("feature"));
    }
}

#[tokio::test]
async fn leave_room_broadcasts_member_left_and_prunes_empty_room() {
    let (addr, _relay) = start_relay().await;
    let mut a = TestClient::connect(&addr).await;
    a.send(&ClientMessage::CreateRoom {
        timestamp: now_ms(),
        device_id: "dev-a".to_string(),
        name: "Solo".to_string(),
        password: None,
        is_public: Some(true),
        expires_in_hours: None,
        branch: None,
    })
    .await;
    let code = match a.recv().await {
        codehive_relay::protocol::ServerMessage::RoomCreated { code, .. } => code,
        other => panic!("expected room_created, got {other:?}"),
    };

    a.send(&ClientMessage::LeaveRoom {
        timestamp: now_ms(),
        device_id: "dev-a".to_string(),
        code: code.clone(),
    })
    .await;
    let left = a.recv().await;
    assert!(matches!(
        left,
        codehive_relay::protocol::ServerMessage::RoomLeft { .. }
    ));

    let mut c = TestClient::connect(&addr).await;
    c.send(&ClientMessage::JoinRoom {
        timestamp: now_ms(),
        device_id: "dev-c".to_string(),
        code,
        name: "Carol".to_string(),
        password: None,
        branch: None,
    })
    .await;
    let reply = c.recv().await;
    assert!(
        matches!(reply, codehive_relay::protocol::ServerMessage::Error { .. }),
        "room should have been pruned once empty"
    );
}
