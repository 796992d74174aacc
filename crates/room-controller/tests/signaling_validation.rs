//! Envelope and schema handling at the dispatch boundary, seen from a
//! client channel.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::indexing_slicing)]

use room_controller::dispatch::frames::ClientFrame;
use room_controller::session::RoomId;
use room_test_utils::*;
use serde_json::json;
use std::time::Duration;

#[tokio::test]
async fn test_schema_rejection_names_the_field_and_changes_nothing() {
    let rig = TestRig::new();
    let mut alice = rig.connect_as("alice");

    let err = alice
        .request_err("createRoom", json!({"name": "", "visibility": "public"}))
        .await;
    assert_eq!(err.code.as_str(), "VALIDATION_ERROR");
    assert_eq!(err.path.as_deref(), Some("payload.name"));

    let err = alice
        .request_err("createRoom", json!({"visibility": "public"}))
        .await;
    assert_eq!(err.path.as_deref(), Some("payload.name"));

    // The handler never ran: no room, no lobby notice
    let mut observer = rig.connect(None);
    observer
        .expect_no_event("roomCreated", Duration::from_millis(30))
        .await;
    let rooms = observer.request_ok("getAllRooms", json!({})).await;
    assert_eq!(rooms, json!([]));
    assert_eq!(rig.metrics.room_count(), 0);
}

#[tokio::test]
async fn test_nested_field_paths() {
    let rig = TestRig::new();
    let mut alice = rig.connect_as("alice");
    alice
        .request_ok("createRoom", create_room_payload("paths", "private"))
        .await;

    let err = alice
        .request_err(
            "produce",
            json!({"kind": "audio", "rtpParameters": {"codecs": []}, "appKind": "audio"}),
        )
        .await;
    assert_eq!(err.path.as_deref(), Some("payload.rtpParameters.codecs"));

    let err = alice
        .request_err(
            "connectTransport",
            json!({"direction": "send", "dtlsParameters": {"fingerprints": []}}),
        )
        .await;
    assert_eq!(err.path.as_deref(), Some("payload.dtlsParameters.fingerprints"));

    let err = alice
        .request_err("produce", json!({"kind": "audio", "rtpParameters": {"codecs": [{}]}, "appKind": "webcam"}))
        .await;
    assert_eq!(err.path.as_deref(), Some("payload.appKind"));
}

#[tokio::test]
async fn test_unknown_event_is_not_found() {
    let rig = TestRig::new();
    let mut alice = rig.connect_as("alice");

    let err = alice.request_err("teleport", json!({})).await;
    assert_eq!(err.code.as_str(), "NOT_FOUND");
}

#[tokio::test]
async fn test_missing_ack_on_acked_event_is_a_protocol_violation() {
    let rig = TestRig::new();
    let mut alice = rig.connect_as("alice");

    alice
        .send(ClientFrame {
            event: "getAllRooms".to_string(),
            payload: None,
            ack: None,
        })
        .await;

    let error = alice.expect_event("error").await;
    assert_eq!(error["event"], "getAllRooms");
    assert_eq!(error["errors"][0]["code"], "PROTOCOL_VIOLATION");
}

#[tokio::test]
async fn test_fire_and_forget_failure_becomes_error_event() {
    let rig = TestRig::new();
    let mut alice = rig.connect_as("alice");

    // Not in a room
    alice.emit("muteToggle", json!({})).await;

    let error = alice.expect_event("error").await;
    assert_eq!(error["event"], "muteToggle");
    assert_eq!(error["errors"][0]["code"], "NOT_FOUND");
}

#[tokio::test]
async fn test_anonymous_channel_can_only_list_rooms() {
    let rig = TestRig::new();
    let mut anonymous = rig.connect(None);

    let rooms = anonymous.request_ok("getAllRooms", json!({})).await;
    assert_eq!(rooms, json!([]));

    // Identity is checked before the payload is looked at
    let err = anonymous.request_err("createRoom", json!({})).await;
    assert_eq!(err.code.as_str(), "UNAUTHORIZED");

    let err = anonymous
        .request_err("joinRoom", json!({"roomId": "anything"}))
        .await;
    assert_eq!(err.code.as_str(), "UNAUTHORIZED");
}

#[tokio::test]
async fn test_room_names_are_normalised() {
    let rig = TestRig::new();
    let mut alice = rig.connect_as("alice");
    let mut bob = rig.connect_as("bob");

    let created = alice
        .request_ok("createRoom", create_room_payload("  Team Sync ", "private"))
        .await;
    let room_id = created["roomId"].as_str().unwrap().to_string();
    assert_eq!(Some(room_id.as_str()), RoomId::normalize("team sync").as_ref().map(RoomId::as_str));

    let joined = bob
        .request_ok("joinRoom", json!({"roomId": "TEAM SYNC"}))
        .await;
    assert_eq!(joined["roomId"], room_id.as_str());

    let err = alice
        .request_err("createRoom", create_room_payload("team sync", "public"))
        .await;
    assert_eq!(err.code.as_str(), "CONFLICT");
}
