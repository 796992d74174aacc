//! Producer and consumer lifecycle across peers: cascade close, slot rules,
//! codec compatibility.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::indexing_slicing)]

use room_controller::actors::RoomActorHandle;
use room_controller::session::RoomId;
use room_test_utils::*;
use serde_json::{json, Value};
use std::time::Duration;

struct Room {
    rig: TestRig,
    handle: RoomActorHandle,
    presenter: TestChannel,
    viewers: Vec<TestChannel>,
}

/// A room with a presenter holding a send transport and `viewers` peers
/// holding recv transports.
async fn room_with_viewers(viewers: usize) -> Room {
    let rig = TestRig::new();
    let mut presenter = rig.connect_as("presenter");
    presenter
        .request_ok("createRoom", create_room_payload("stage", "private"))
        .await;
    presenter
        .request_ok("createTransport", json!({"direction": "send"}))
        .await;

    let mut channels = Vec::new();
    for i in 0..viewers {
        let mut viewer = rig.connect_as(&format!("viewer-{i}"));
        viewer
            .request_ok("joinRoom", json!({"roomId": "stage"}))
            .await;
        viewer
            .request_ok("createTransport", json!({"direction": "recv"}))
            .await;
        channels.push(viewer);
    }

    let handle = rig
        .registry
        .get_room(RoomId::normalize("stage").unwrap())
        .await
        .unwrap();

    Room {
        rig,
        handle,
        presenter,
        viewers: channels,
    }
}

fn producer_id(reply: &Value) -> String {
    reply["producerId"].as_str().unwrap().to_string()
}

#[tokio::test]
async fn test_closing_screen_share_cascades_to_every_viewer_once() {
    let Room {
        rig: _rig,
        handle,
        mut presenter,
        mut viewers,
    } = room_with_viewers(3).await;

    let video = producer_id(
        &presenter
            .request_ok("produce", produce_screen_video_payload())
            .await,
    );
    let audio = producer_id(
        &presenter
            .request_ok("produce", produce_screen_audio_payload())
            .await,
    );

    for viewer in &mut viewers {
        for producer in [&video, &audio] {
            viewer
                .request_ok("consume", consume_payload(producer, &full_capabilities()))
                .await;
        }
    }
    let state = handle.get_state().await.unwrap();
    assert_eq!(state.peer("viewer-0").unwrap().consumers.len(), 2);

    let closed = presenter
        .request_ok("closeProducer", json!({"kind": "screenShare"}))
        .await;
    assert_eq!(closed["closed"].as_array().unwrap().len(), 2);

    for viewer in &mut viewers {
        let mut closed_producers = vec![
            viewer.expect_event("consumerClosed").await["producerId"].clone(),
            viewer.expect_event("consumerClosed").await["producerId"].clone(),
        ];
        closed_producers.sort_by_key(ToString::to_string);
        let mut expected = vec![json!(video), json!(audio)];
        expected.sort_by_key(ToString::to_string);
        assert_eq!(closed_producers, expected);

        viewer
            .expect_no_event("consumerClosed", Duration::from_millis(20))
            .await;
    }

    let state = handle.get_state().await.unwrap();
    for peer in &state.peers {
        assert!(peer.consumers.is_empty(), "{} kept consumers", peer.identity_id);
    }
    assert!(state.peer("presenter").unwrap().producers.is_empty());

    // Closing again is a no-op
    let closed = presenter
        .request_ok("closeProducer", json!({"kind": "screenShare"}))
        .await;
    assert_eq!(closed["closed"], json!([]));
    for viewer in &mut viewers {
        viewer
            .expect_no_event("consumerClosed", Duration::from_millis(20))
            .await;
    }
}

#[tokio::test]
async fn test_viewer_closing_own_consumer_leaves_others_intact() {
    let Room {
        rig: _rig,
        handle,
        mut presenter,
        mut viewers,
    } = room_with_viewers(2).await;

    let audio = producer_id(&presenter.request_ok("produce", produce_audio_payload()).await);
    let mut consumers = Vec::new();
    for viewer in &mut viewers {
        let reply = viewer
            .request_ok("consume", consume_payload(&audio, &full_capabilities()))
            .await;
        consumers.push(reply["consumerId"].as_str().unwrap().to_string());
    }

    let reply = viewers[0]
        .request_ok("closeConsumer", json!({"consumerId": consumers[0]}))
        .await;
    assert_eq!(reply, json!({"closed": true}));

    // Someone else's consumer id is not found for this caller
    let err = viewers[0]
        .request_err("closeConsumer", json!({"consumerId": consumers[1]}))
        .await;
    assert_eq!(err.code.as_str(), "NOT_FOUND");

    let state = handle.get_state().await.unwrap();
    assert!(state.peer("viewer-0").unwrap().consumers.is_empty());
    assert_eq!(state.peer("viewer-1").unwrap().consumers.len(), 1);
}

#[tokio::test]
async fn test_incompatible_receiver_cannot_consume() {
    let Room {
        rig: _rig,
        handle,
        mut presenter,
        mut viewers,
    } = room_with_viewers(1).await;

    let video = producer_id(
        &presenter
            .request_ok("produce", produce_screen_video_payload())
            .await,
    );

    let err = viewers[0]
        .request_err("consume", consume_payload(&video, &audio_only_capabilities()))
        .await;
    assert_eq!(err.code.as_str(), "ENGINE_ERROR");

    let state = handle.get_state().await.unwrap();
    assert!(state.peer("viewer-0").unwrap().consumers.is_empty());
}

#[tokio::test]
async fn test_consume_unknown_producer_is_not_found() {
    let Room {
        rig: _rig,
        mut viewers,
        ..
    } = room_with_viewers(1).await;

    let err = viewers[0]
        .request_err("consume", consume_payload("no-such-producer", &full_capabilities()))
        .await;
    assert_eq!(err.code.as_str(), "NOT_FOUND");
}

#[tokio::test]
async fn test_occupied_slot_is_a_conflict() {
    let Room {
        rig: _rig,
        mut presenter,
        ..
    } = room_with_viewers(0).await;

    presenter.request_ok("produce", produce_audio_payload()).await;
    let err = presenter
        .request_err("produce", produce_audio_payload())
        .await;
    assert_eq!(err.code.as_str(), "CONFLICT");

    // A different slot is fine
    presenter
        .request_ok("produce", produce_screen_video_payload())
        .await;
}

#[tokio::test]
async fn test_produce_without_send_transport_is_not_found() {
    let Room {
        rig: _rig,
        mut viewers,
        ..
    } = room_with_viewers(1).await;

    let err = viewers[0]
        .request_err("produce", produce_audio_payload())
        .await;
    assert_eq!(err.code.as_str(), "NOT_FOUND");
}

#[tokio::test]
async fn test_replacing_send_transport_closes_its_producers() {
    let Room {
        rig: _rig,
        handle,
        mut presenter,
        mut viewers,
    } = room_with_viewers(1).await;

    let audio = producer_id(&presenter.request_ok("produce", produce_audio_payload()).await);
    viewers[0]
        .request_ok("consume", consume_payload(&audio, &full_capabilities()))
        .await;

    presenter
        .request_ok("createTransport", json!({"direction": "send"}))
        .await;

    let closed = viewers[0].expect_event("producerClosed").await;
    assert_eq!(closed["producerId"], audio.as_str());
    viewers[0].expect_event("consumerClosed").await;

    let state = handle.get_state().await.unwrap();
    assert!(state.peer("presenter").unwrap().producers.is_empty());

    // The slot is free again on the new transport
    presenter.request_ok("produce", produce_audio_payload()).await;
}

#[tokio::test]
async fn test_video_slot_cannot_be_paused() {
    let Room {
        rig: _rig,
        mut presenter,
        ..
    } = room_with_viewers(0).await;

    let err = presenter
        .request_err("pauseProducer", json!({"kind": "screenShare"}))
        .await;
    assert_eq!(err.code.as_str(), "VALIDATION_ERROR");
    assert_eq!(err.path.as_deref(), Some("payload.kind"));

    let err = presenter
        .request_err("pauseProducer", json!({"kind": "audio"}))
        .await;
    assert_eq!(err.code.as_str(), "NOT_FOUND");
}
