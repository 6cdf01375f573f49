use crate::common::{start_relay, TestClient};
use codehive_relay::protocol::{ClientMessage, ServerMessage};
use std::time::SystemTime;

fn now_ms() -> i64 {
    SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .unwrap()
        .as_millis() as i64
}

#[tokio::test]
async fn simultaneous_declare_working_raises_a_conflict_warning() {
    let (addr, _relay) = start_relay().await;
    let mut a = TestClient::connect(&addr).await;
    a.send(&ClientMessage::CreateRoom {
        timestamp: now_ms(),
        device_id: "dev-a".to_string(),
        name: "Zeus".to_string(),
        password: None,
        is_public: Some(false),
        expires_in_hours: None,
        branch: None,
    })
    .await;
    let code = match a.recv().await {
        ServerMessage::RoomCreated { code, .. } => code,
        other => panic!("expected room_created, got {other:?}"),
    };

    let mut b = TestClient::connect(&addr).await;
    b.send(&ClientMessage::JoinRoom {
        timestamp: now_ms(),
        device_id: "dev-b".to_string(),
        code: code.clone(),
        name: "Hera".to_string(),
        password: None,
        branch: None,
    })
    .await;
    assert!(matches!(b.recv().await, ServerMessage::RoomJoined { .. }));
    let _ = a
        .recv_matching(|m| matches!(m, ServerMessage::MemberJoined { .. }), 2_000)
        .await;

    a.send(&ClientMessage::DeclareWorking {
        timestamp: now_ms(),
        device_id: "dev-a".to_string(),
        code: code.clone(),
        files: vec!["same.ts".to_string()],
    })
    .await;
    b.send(&ClientMessage::DeclareWorking {
        timestamp: now_ms(),
        device_id: "dev-b".to_string(),
        code: code.clone(),
        files: vec!["same.ts".to_string()],
    })
    .await;

    let warning_a = a
        .recv_matching(|m| matches!(m, ServerMessage::ConflictWarning { .. }), 2_000)
        .await;
    let warning_b = b
        .recv_matching(|m| matches!(m, ServerMessage::ConflictWarning { .. }), 2_000)
        .await;

    let warning = warning_a.or(warning_b).expect("at least one side must see a conflict_warning");
    match warning {
        ServerMessage::ConflictWarning { file, authors, .. } => {
            assert_eq!(file, "same.ts");
            assert!(authors.contains(&"Zeus".to_string()));
            assert!(authors.contains(&"Hera".to_string()));
        }
        other => panic!("expected conflict_warning, got {other:?}"),
    }
}
