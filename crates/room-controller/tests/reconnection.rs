//! Reconnection: one identity opening several channels into the same room.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::indexing_slicing)]

use room_controller::session::RoomId;
use room_test_utils::*;
use serde_json::json;
use std::time::Duration;

#[tokio::test]
async fn test_repeated_reconnects_keep_one_peer_and_one_live_channel() {
    const RECONNECTS: usize = 5;

    let rig = TestRig::new();
    let mut host = rig.connect_as("host");
    host.request_ok("createRoom", create_room_payload("standup", "private"))
        .await;

    let mut channels = Vec::new();
    for attempt in 0..RECONNECTS {
        let mut channel = rig.connect_as("dana");
        let joined = channel
            .request_ok("joinRoom", json!({"roomId": "standup"}))
            .await;
        assert_eq!(joined["reconnected"], attempt > 0);
        channels.push(channel);
    }

    // Every channel but the last was told to leave, exactly once
    let (live, evicted) = channels.split_last_mut().unwrap();
    for channel in evicted.iter_mut() {
        let leave = channel.expect_event("leave").await;
        assert_eq!(leave["roomId"], "standup");
        assert_eq!(leave["reason"], "replaced");
        channel
            .expect_no_event("leave", Duration::from_millis(20))
            .await;
    }
    live.expect_no_event("leave", Duration::from_millis(20)).await;

    let room = rig
        .registry
        .get_room(RoomId::normalize("standup").unwrap())
        .await
        .unwrap();
    let state = room.get_state().await.unwrap();
    assert_eq!(state.peers.len(), 2);
    let dana = state.peer("dana").unwrap();
    assert_eq!(dana.channel_count, 1);
    assert_eq!(dana.live_channel, Some(live.channel_id()));
    assert_eq!(dana.evictions, RECONNECTS - 1);

    // The host saw dana join once
    host.expect_event("peerJoined").await;
    host.expect_no_event("peerJoined", Duration::from_millis(20))
        .await;
}

#[tokio::test]
async fn test_evicted_channel_cannot_act_in_the_room() {
    let rig = TestRig::new();
    let mut first = rig.connect_as("erin");
    first
        .request_ok("createRoom", create_room_payload("handoff", "private"))
        .await;

    let mut second = rig.connect_as("erin");
    let joined = second
        .request_ok("joinRoom", json!({"roomId": "handoff"}))
        .await;
    assert_eq!(joined["reconnected"], true);

    first.expect_event("leave").await;
    let err = first.request_err("getRoomPeers", json!({})).await;
    assert_eq!(err.code.as_str(), "NOT_FOUND");

    // The live channel is unaffected
    let peers = second.request_ok("getRoomPeers", json!({})).await;
    assert_eq!(peers, json!([]));
}

#[tokio::test]
async fn test_stale_channel_disconnect_does_not_remove_peer() {
    let rig = TestRig::new();
    let mut host = rig.connect_as("host");
    host.request_ok("createRoom", create_room_payload("stale", "private"))
        .await;

    let mut old = rig.connect_as("finn");
    old.request_ok("joinRoom", json!({"roomId": "stale"})).await;
    let mut new = rig.connect_as("finn");
    new.request_ok("joinRoom", json!({"roomId": "stale"})).await;
    old.expect_event("leave").await;

    old.disconnect().await;

    host.expect_event("peerJoined").await;
    host.expect_no_event("peerLeft", Duration::from_millis(50))
        .await;
    let peers = host.request_ok("getRoomPeers", json!({})).await;
    assert_eq!(peers[0]["id"], "finn");

    // Dropping the live channel does remove the peer
    new.disconnect().await;
    let left = host.expect_event("peerLeft").await;
    assert_eq!(left["peerId"], "finn");
}

#[tokio::test]
async fn test_reconnect_keeps_published_media() {
    let rig = TestRig::new();
    let mut host = rig.connect_as("host");
    host.request_ok("createRoom", create_room_payload("media", "private"))
        .await;

    let mut old = rig.connect_as("gil");
    old.request_ok("joinRoom", json!({"roomId": "media"})).await;
    old.request_ok("createTransport", json!({"direction": "send"}))
        .await;
    let produced = old.request_ok("produce", produce_audio_payload()).await;

    let mut new = rig.connect_as("gil");
    let joined = new.request_ok("joinRoom", json!({"roomId": "media"})).await;
    assert_eq!(joined["reconnected"], true);

    // The producer survives the channel swap and is still consumable
    let peers = host.request_ok("getRoomPeers", json!({})).await;
    assert_eq!(peers[0]["producers"][0]["producerId"], produced["producerId"]);

    // The new channel owns the slot now
    let err = new.request_err("produce", produce_audio_payload()).await;
    assert_eq!(err.code.as_str(), "CONFLICT");
}
