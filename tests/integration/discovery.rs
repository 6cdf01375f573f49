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
async fn public_room_is_listed_then_hidden_after_visibility_toggle() {
    let (addr, _relay) = start_relay().await;
    let mut a = TestClient::connect(&addr).await;
    a.send(&ClientMessage::CreateRoom {
        timestamp: now_ms(),
        device_id: "dev-a".to_string(),
        name: "Zeus".to_string(),
        password: None,
        is_public: Some(true),
        expires_in_hours: None,
        branch: None,
    })
    .await;
    let code = match a.recv().await {
        ServerMessage::RoomCreated { code, .. } => code,
        other => panic!("expected room_created, got {other:?}"),
    };

    let mut c = TestClient::connect(&addr).await;
    c.send(&ClientMessage::ListRooms {
        timestamp: now_ms(),
        device_id: "dev-c".to_string(),
    })
    .await;
    match c.recv().await {
        ServerMessage::RoomList { rooms, .. } => {
            assert!(rooms.iter().any(|r| r.code == code), "public room should be discoverable");
        }
        other => panic!("expected room_list, got {other:?}"),
    }

    a.send(&ClientMessage::SetRoomVisibility {
        timestamp: now_ms(),
        device_id: "dev-a".to_string(),
        code: code.clone(),
        is_public: false,
    })
    .await;
    // set_room_visibility has no direct reply; give it a beat to apply.
    tokio::time::sleep(std::time::Duration::from_millis(100)).await;

    c.send(&ClientMessage::ListRooms {
        timestamp: now_ms(),
        device_id: "dev-c".to_string(),
    })
    .await;
    match c.recv().await {
        ServerMessage::RoomList { rooms, .. } => {
            assert!(
                !rooms.iter().any(|r| r.code == code),
                "room should no longer be listed once made private"
            );
        }
        other => panic!("expected room_list, got {other:?}"),
    }
}
