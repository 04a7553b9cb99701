mod common;

use std::time::Duration;

use common::{MockNode, RecordingBridge, init_tracing, wait_for_event, wait_until};
use lavabridge::{ManagerEvent, ManagerOptions, PlayerManager};

const USER_ID: u64 = 180906220956270592;

fn manager_options() -> ManagerOptions {
    let mut options = ManagerOptions::new(USER_ID);
    options.shards = 3;
    options
}

#[tokio::test]
async fn handshake_presents_identity_and_configures_resuming() {
    init_tracing();
    let mock = MockNode::spawn().await;
    let manager = PlayerManager::new(RecordingBridge::new(), manager_options());
    let events = manager.subscribe();

    manager.create_node(mock.options(150));
    wait_for_event(&events, "node ready", |e| {
        matches!(e, ManagerEvent::NodeReady(_))
    })
    .await;

    let headers = mock.headers();
    let first = &headers[0];
    assert_eq!(
        first.get("authorization").map(String::as_str),
        Some("youshallnotpass")
    );
    assert_eq!(
        first.get("user-id").map(String::as_str),
        Some("180906220956270592")
    );
    assert_eq!(first.get("num-shards").map(String::as_str), Some("3"));
    assert!(!first.contains_key("resume-key"));

    wait_until("configureResuming command", || {
        !mock.frames_with_op("configureResuming").is_empty()
    })
    .await;
    let frame = &mock.frames_with_op("configureResuming")[0];
    assert_eq!(frame["key"], "180906220956270592");
    assert_eq!(frame["timeout"], 120);
}

#[tokio::test]
async fn reconnects_after_abnormal_drop_until_destroyed() {
    init_tracing();
    let mock = MockNode::spawn().await;
    let manager = PlayerManager::new(RecordingBridge::new(), manager_options());
    let events = manager.subscribe();

    let node = manager.create_node(mock.options(100));
    wait_for_event(&events, "first ready", |e| {
        matches!(e, ManagerEvent::NodeReady(_))
    })
    .await;
    assert_eq!(mock.connections(), 1);

    mock.drop_connection();
    wait_for_event(&events, "reconnecting notice", |e| {
        matches!(e, ManagerEvent::NodeReconnecting(_))
    })
    .await;
    wait_for_event(&events, "second ready", |e| {
        matches!(e, ManagerEvent::NodeReady(_))
    })
    .await;
    assert_eq!(mock.connections(), 2);
    assert!(node.connected());

    assert!(node.destroy().await);
    wait_until("destroy close frame", || {
        mock.closes()
            .iter()
            .any(|(code, reason)| *code == 1000 && reason == "destroy")
    })
    .await;

    // Several retry intervals later the destroyed link has not resurrected.
    tokio::time::sleep(Duration::from_millis(500)).await;
    assert_eq!(mock.connections(), 2);
    assert!(!node.connected());
}

#[tokio::test]
async fn destroy_cancels_a_pending_reconnect_timer() {
    init_tracing();
    let mock = MockNode::spawn().await;
    let manager = PlayerManager::new(RecordingBridge::new(), manager_options());
    let events = manager.subscribe();

    let node = manager.create_node(mock.options(200));
    wait_for_event(&events, "ready", |e| matches!(e, ManagerEvent::NodeReady(_))).await;

    mock.drop_connection();
    // The link notices the drop and arms its retry timer.
    wait_for_event(&events, "disconnect notice", |e| {
        matches!(
            e,
            ManagerEvent::NodeDisconnect { .. } | ManagerEvent::NodeError { .. }
        )
    })
    .await;

    // Already disconnected, so destroy reports false, but the pending timer
    // must still be cancelled.
    assert!(!node.destroy().await);
    tokio::time::sleep(Duration::from_millis(700)).await;
    assert_eq!(mock.connections(), 1);
}

#[tokio::test]
async fn reconnect_presents_the_stored_resume_key() {
    init_tracing();
    let mock = MockNode::spawn().await;
    let manager = PlayerManager::new(RecordingBridge::new(), manager_options());
    let events = manager.subscribe();

    let node = manager.create_node(mock.options(100));
    wait_for_event(&events, "first ready", |e| {
        matches!(e, ManagerEvent::NodeReady(_))
    })
    .await;

    assert!(node.configure_resuming("fleet-resume", 60).await.unwrap());
    wait_until("explicit configureResuming", || {
        mock.frames_with_op("configureResuming")
            .iter()
            .any(|f| f["key"] == "fleet-resume" && f["timeout"] == 60)
    })
    .await;

    mock.drop_connection();
    wait_for_event(&events, "second ready", |e| {
        matches!(e, ManagerEvent::NodeReady(_))
    })
    .await;

    let headers = mock.headers();
    let second = &headers[1];
    assert_eq!(
        second.get("resume-key").map(String::as_str),
        Some("fleet-resume")
    );
}

#[tokio::test]
async fn stats_frames_replace_the_snapshot_without_the_op_field() {
    init_tracing();
    let mock = MockNode::spawn().await;
    let manager = PlayerManager::new(RecordingBridge::new(), manager_options());
    let events = manager.subscribe();

    let node = manager.create_node(mock.options(150));
    wait_for_event(&events, "ready", |e| matches!(e, ManagerEvent::NodeReady(_))).await;

    mock.send_json(serde_json::json!({
        "op": "stats",
        "players": 2,
        "playingPlayers": 1,
        "uptime": 64_000,
        "memory": {"free": 100, "used": 200, "allocated": 300, "reservable": 400},
        "cpu": {"cores": 4, "systemLoad": 0.8, "lavalinkLoad": 0.2},
    }));

    wait_until("stats snapshot", || node.stats().is_some()).await;
    let stats = node.stats().unwrap();
    assert_eq!(stats.players, 2);
    assert_eq!(stats.playing_players, 1);
    assert_eq!(node.normalized_load(), 0.2);

    let stored = serde_json::to_value(&stats).unwrap();
    assert!(stored.get("op").is_none());
}

#[tokio::test]
async fn every_frame_is_mirrored_as_a_raw_event() {
    init_tracing();
    let mock = MockNode::spawn().await;
    let manager = PlayerManager::new(RecordingBridge::new(), manager_options());
    let events = manager.subscribe();

    manager.create_node(mock.options(150));
    wait_for_event(&events, "ready", |e| matches!(e, ManagerEvent::NodeReady(_))).await;

    mock.send_json(serde_json::json!({
        "op": "playerUpdate",
        "guildId": "42",
        "state": {"time": 1, "position": 2},
    }));

    let raw = wait_for_event(&events, "raw event", |e| {
        matches!(e, ManagerEvent::Raw { payload, .. } if payload["op"] == "playerUpdate")
    })
    .await;
    let ManagerEvent::Raw { payload, .. } = raw else {
        unreachable!();
    };
    assert_eq!(payload["guildId"], "42");
}
