mod common;

use common::*;
use serde_json::json;
use tidepool_server::errors::MatchmakeError;
use tidepool_server::presence::Presence;
use tidepool_server::protocol::WS_CLOSE_CONSENTED;
use tidepool_server::stats::ROOM_COUNT_KEY;
use tidepool_server::transport::TransportEvent;

#[tokio::test(start_paused = true)]
async fn graceful_shutdown_drains_every_room() {
    let (presence, matchmaker) = single().await;
    matchmaker.define("chat", ChatRoom::default);

    // three rooms, two clients each
    let mut receivers = Vec::new();
    for _ in 0..3 {
        let first = matchmaker.create("chat", json!({}), json!(null)).await.unwrap();
        let second = matchmaker
            .join_by_id(&first.room.room_id, json!({}), json!(null))
            .await
            .unwrap();
        for seat in [first, second] {
            let (_client, mut receiver, _handle) = connect(&matchmaker, &seat).await;
            expect_join_envelope(&mut receiver).await;
            receivers.push(receiver);
        }
    }
    settle().await;
    assert_eq!(matchmaker.local_room_count(), 3);
    assert_eq!(matchmaker.stats().ccu(), 6);

    matchmaker.gracefully_shutdown().await;

    // every client was disconnected with the configured close code
    for receiver in &mut receivers {
        let closed = receiver
            .drain()
            .into_iter()
            .any(|event| event == TransportEvent::Close(WS_CLOSE_CONSENTED));
        assert!(closed, "client missed the shutdown close");
    }

    assert_eq!(matchmaker.local_room_count(), 0);
    assert_eq!(matchmaker.stats().room_count(), 0);
    assert_eq!(presence.hlen("roomcaches").await.unwrap(), 0);
    assert!(presence
        .hget(ROOM_COUNT_KEY, matchmaker.process_id())
        .await
        .unwrap()
        .is_none());
    assert!(presence
        .channels(&format!("p:{}", matchmaker.process_id()))
        .await
        .unwrap()
        .is_empty());

    // no new work is accepted afterwards
    let refused = matchmaker.join_or_create("chat", json!({}), json!(null)).await;
    assert!(matches!(refused, Err(MatchmakeError::ShuttingDown)));
}

#[tokio::test(start_paused = true)]
async fn shutdown_with_no_rooms_completes_immediately() {
    let (_presence, matchmaker) = single().await;
    matchmaker.define("chat", ChatRoom::default);
    matchmaker.gracefully_shutdown().await;
    assert!(matchmaker.is_shutting_down());
}

#[tokio::test(start_paused = true)]
async fn excluded_peer_does_not_receive_new_rooms() {
    let (_presence, matchmakers) = fleet(2).await;
    let (p1, p2) = (&matchmakers[0], &matchmakers[1]);
    p1.define("chat", ChatRoom::default);
    p2.define("chat", ChatRoom::default);

    // p2 shuts down; its registry entry disappears
    p2.gracefully_shutdown().await;

    // p1 must now always place rooms on itself
    for _ in 0..3 {
        let seat = p1.create("chat", json!({}), json!(null)).await.unwrap();
        assert_eq!(seat.room.process_id, p1.process_id());
    }
}
