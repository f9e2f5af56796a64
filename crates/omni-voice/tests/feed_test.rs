//! Live feed tests against a local WebSocket server.

use futures_util::SinkExt;
use omni_voice::{FeedMessage, FeedState, FeedUpdate, LiveFeed};
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_tungstenite::accept_async;
use tokio_tungstenite::tungstenite::protocol::Message;
use tokio_util::sync::CancellationToken;

const INITIAL_STATE: &str = r#"{"type": "initial_state", "incidents": [], "responders": [
    {"id": "ENG-7", "type": "fire", "unit": "Engine 7", "status": "available", "lat": 17.39, "lng": 78.49},
    {"id": "POL-42", "type": "police", "unit": "Unit 42", "status": "available", "lat": 17.38, "lng": 78.48}
]}"#;

const NEW_INCIDENT: &str = r#"{"type": "new_incident", "incident": {"id": "INC-1", "type": "fire",
    "priority": "critical", "description": "Kitchen fire", "status": "active",
    "location": {"lat": 17.385, "lng": 78.4867, "address": "Unknown Location"}}}"#;

const RESPONDER_UPDATE: &str = r#"{"type": "responder_update", "responders": [
    {"id": "ENG-7", "type": "fire", "unit": "Engine 7", "status": "responding", "lat": 17.39, "lng": 78.49},
    {"id": "POL-42", "type": "police", "unit": "Unit 42", "status": "available", "lat": 17.38, "lng": 78.48}
]}"#;

fn apply(update: FeedUpdate, state: &mut FeedState) -> FeedUpdate {
    state.apply(&update);
    update
}

async fn next(rx: &mut mpsc::UnboundedReceiver<FeedUpdate>) -> FeedUpdate {
    timeout(Duration::from_secs(5), rx.recv())
        .await
        .expect("feed update timed out")
        .expect("feed stopped")
}

#[tokio::test]
async fn feed_folds_messages_and_reconnects() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let url = format!("ws://{}/ws", listener.local_addr().unwrap());

    tokio::spawn(async move {
        // First connection: a burst of updates, junk, then a close.
        let (tcp, _) = listener.accept().await.unwrap();
        let mut ws = accept_async(tcp).await.unwrap();
        for text in [INITIAL_STATE, "not json", NEW_INCIDENT, RESPONDER_UPDATE] {
            ws.send(Message::Text(text.into())).await.unwrap();
        }
        ws.close(None).await.unwrap();

        // Second connection after the reconnect delay.
        let (tcp, _) = listener.accept().await.unwrap();
        let mut ws = accept_async(tcp).await.unwrap();
        ws.send(Message::Text(r#"{"type": "incidents_cleared"}"#.into()))
            .await
            .unwrap();
        // Hold the socket open until the client goes away.
        let _ = futures_util::StreamExt::next(&mut ws).await;
    });

    let cancel = CancellationToken::new();
    let mut rx = LiveFeed::new(url, Duration::from_millis(50)).spawn(cancel.clone());
    let mut state = FeedState::default();

    assert_eq!(apply(next(&mut rx).await, &mut state), FeedUpdate::Connected);
    for _ in 0..3 {
        let update = next(&mut rx).await;
        apply(update, &mut state);
    }
    assert_eq!(state.incidents.len(), 1);
    assert_eq!(state.incidents[0].priority, "critical");
    assert_eq!(state.ready_count(), 1);
    assert_eq!(state.active_count(), 1);

    assert_eq!(apply(next(&mut rx).await, &mut state), FeedUpdate::Disconnected);
    assert!(!state.connected);

    assert_eq!(apply(next(&mut rx).await, &mut state), FeedUpdate::Connected);
    let cleared = apply(next(&mut rx).await, &mut state);
    assert_eq!(cleared, FeedUpdate::Message(FeedMessage::IncidentsCleared));
    assert!(state.incidents.is_empty());
    assert!(state.connected);

    cancel.cancel();
    timeout(Duration::from_secs(5), async {
        while rx.recv().await.is_some() {}
    })
    .await
    .expect("feed did not stop on cancel");
}
