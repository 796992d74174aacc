//! Room lifecycle: creation, lobby notices, capacity and teardown.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::indexing_slicing)]

use room_controller::actors::RegistrySettings;
use room_controller::session::{RoomId, Visibility};
use room_test_utils::*;
use serde_json::json;
use std::time::Duration;

const SETTLE: Duration = Duration::from_millis(50);

fn names(events: &[ReceivedEvent]) -> Vec<&str> {
    events.iter().map(|e| e.name.as_str()).collect()
}

#[tokio::test]
async fn test_public_room_lobby_notices_in_order() {
    let rig = TestRig::new();
    let mut watcher = rig.connect(None);
    let mut alice = rig.connect_as("alice");

    alice
        .request_ok("createRoom", create_room_payload("Open Floor", "public"))
        .await;
    tokio::time::sleep(SETTLE).await;

    // The creator's join reaches the lobby before the room itself
    let events = watcher.drain_events();
    assert_eq!(names(&events), vec!["peerJoinedRoom", "roomCreated"]);
    assert_eq!(events[0]["roomId"], "open-floor");
    assert_eq!(events[0]["peer"]["id"], "alice");
    assert_eq!(events[1]["id"], "open-floor");
    assert_eq!(events[1]["name"], "Open Floor");
    assert_eq!(events[1]["visibility"], "public");

    let mut bob = rig.connect_as("bob");
    bob.request_ok("joinRoom", json!({"roomId": "open-floor"}))
        .await;
    let joined = watcher.expect_event("peerJoinedRoom").await;
    assert_eq!(joined["peer"]["id"], "bob");

    bob.emit("leave", json!({})).await;
    alice.emit("leave", json!({})).await;

    let deleted = watcher.expect_event("roomDeleted").await;
    assert_eq!(deleted["roomId"], "open-floor");

    let rooms = watcher.request_ok("getAllRooms", json!({})).await;
    assert_eq!(rooms, json!([]));
}

#[tokio::test]
async fn test_private_rooms_stay_out_of_the_lobby() {
    let rig = TestRig::new();
    let mut watcher = rig.connect(None);
    let mut alice = rig.connect_as("alice");
    let mut bob = rig.connect_as("bob");

    alice
        .request_ok("createRoom", create_room_payload("Back Office", "private"))
        .await;
    bob.request_ok("joinRoom", json!({"roomId": "back-office"}))
        .await;
    bob.emit("leave", json!({})).await;
    alice.emit("leave", json!({})).await;
    tokio::time::sleep(SETTLE).await;

    assert!(watcher.drain_events().is_empty());
    let rooms = watcher.request_ok("getAllRooms", json!({})).await;
    assert_eq!(rooms, json!([]));

    let room = rig
        .registry
        .list_rooms(Visibility::Private)
        .await
        .unwrap();
    assert!(room.is_empty());
}

#[tokio::test]
async fn test_listing_shows_public_rooms_with_peer_counts() {
    let rig = TestRig::new();
    let mut alice = rig.connect_as("alice");
    let mut bob = rig.connect_as("bob");
    let mut carol = rig.connect_as("carol");

    alice
        .request_ok("createRoom", create_room_payload("Lounge", "public"))
        .await;
    bob.request_ok("joinRoom", json!({"roomId": "lounge"})).await;
    carol
        .request_ok("createRoom", create_room_payload("Vault", "private"))
        .await;

    let rooms = carol.request_ok("getAllRooms", json!({})).await;
    let rooms = rooms.as_array().unwrap();
    assert_eq!(rooms.len(), 1);
    assert_eq!(rooms[0]["id"], "lounge");
    assert_eq!(rooms[0]["peerCount"], 2);
    assert!(rooms[0]["createdAt"].is_string());
}

#[tokio::test]
async fn test_last_peer_leaving_removes_the_room() {
    let rig = TestRig::new();
    let mut alice = rig.connect_as("alice");
    alice
        .request_ok("createRoom", create_room_payload("brief", "private"))
        .await;
    assert_eq!(rig.metrics.room_count(), 1);

    alice.disconnect().await;
    tokio::time::sleep(SETTLE).await;

    let err = rig
        .registry
        .get_room(RoomId::normalize("brief").unwrap())
        .await
        .unwrap_err();
    assert_eq!(err.error_code().as_str(), "NOT_FOUND");
    assert_eq!(rig.metrics.room_count(), 0);

    // The name is free again
    let mut bob = rig.connect_as("bob");
    bob.request_ok("createRoom", create_room_payload("brief", "private"))
        .await;
}

#[tokio::test(start_paused = true)]
async fn test_occupied_room_never_expires() {
    let rig = TestRig::new();
    let mut alice = rig.connect_as("alice");
    alice
        .request_ok("createRoom", create_room_payload("overnight", "private"))
        .await;

    tokio::time::sleep(Duration::from_secs(12 * 60 * 60)).await;

    let room = rig
        .registry
        .get_room(RoomId::normalize("overnight").unwrap())
        .await
        .unwrap();
    let state = room.get_state().await.unwrap();
    assert!(state.peer("alice").is_some());
    assert!(!state.closing);

    let peers = alice.request_ok("getRoomPeers", json!({})).await;
    assert_eq!(peers, json!([]));
}

#[tokio::test]
async fn test_joining_a_missing_room_is_not_found() {
    let rig = TestRig::new();
    let mut alice = rig.connect_as("alice");

    let err = alice
        .request_err("joinRoom", json!({"roomId": "nowhere"}))
        .await;
    assert_eq!(err.code.as_str(), "NOT_FOUND");
}

#[tokio::test]
async fn test_room_and_peer_limits_are_conflicts() {
    let mut settings = test_settings();
    settings.max_rooms = 1;
    settings.room.max_peers = 2;
    let rig = TestRig::with_settings(settings);

    let mut alice = rig.connect_as("alice");
    alice
        .request_ok("createRoom", create_room_payload("only", "private"))
        .await;

    let mut bob = rig.connect_as("bob");
    let err = bob
        .request_err("createRoom", create_room_payload("another", "private"))
        .await;
    assert_eq!(err.code.as_str(), "CONFLICT");

    bob.request_ok("joinRoom", json!({"roomId": "only"})).await;

    let mut carol = rig.connect_as("carol");
    let err = carol
        .request_err("joinRoom", json!({"roomId": "only"}))
        .await;
    assert_eq!(err.code.as_str(), "CONFLICT");

    // A reconnect is not a new peer
    let mut bob_again = rig.connect_as("bob");
    let joined = bob_again
        .request_ok("joinRoom", json!({"roomId": "only"}))
        .await;
    assert_eq!(joined["reconnected"], true);
}

#[tokio::test]
async fn test_registry_shutdown_tears_everything_down() {
    let rig = TestRig::with_settings(RegistrySettings {
        max_rooms: 4,
        ..test_settings()
    });
    let mut alice = rig.connect_as("alice");
    let mut bob = rig.connect_as("bob");
    alice
        .request_ok("createRoom", create_room_payload("one", "public"))
        .await;
    bob.request_ok("createRoom", create_room_payload("two", "private"))
        .await;
    assert_eq!(rig.metrics.room_count(), 2);

    rig.registry.shutdown().await.unwrap();
    assert!(rig.registry.is_cancelled());
    assert_eq!(rig.metrics.room_count(), 0);

    // Channels are children of the registry and stop with it
    let deadline = tokio::time::Instant::now() + EXPECT_TIMEOUT;
    while !(alice.is_closed() && bob.is_closed()) {
        assert!(tokio::time::Instant::now() < deadline, "channels kept running");
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    assert_eq!(rig.metrics.peer_count(), 0);
}
