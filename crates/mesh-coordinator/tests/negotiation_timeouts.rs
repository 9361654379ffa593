//! Negotiation timeout tests.
//!
//! Uses paused tokio time so the room's sweep can be driven deterministically.
//! `test_settings()` bounds negotiation at 10s and sweeps every second.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

use std::sync::Arc;
use std::time::Duration;

use common::types::{ParticipantId, SourceToken};
use mesh_coordinator::coordinator::Coordinator;
use mesh_coordinator::events::{EventSink, RoomEvent};
use mesh_coordinator::link::{LinkFailure, LinkState, SignalKind};
use mesh_test_utils::*;

fn coordinator() -> (Coordinator, Arc<MockSink>) {
    let sink = MockSink::new();
    let coordinator = Coordinator::new(test_settings(), Arc::clone(&sink) as Arc<dyn EventSink>);
    (coordinator, sink)
}

async fn pair_room(coordinator: &Coordinator) {
    let created = coordinator
        .create_room(pid(1), "P1", "demo")
        .await
        .unwrap();
    coordinator
        .join_room(pid(2), "P2", created.room_id)
        .await
        .unwrap();
}

fn timed_out_with(peer: ParticipantId) -> impl Fn(&RoomEvent) -> bool {
    move |e| {
        matches!(e, RoomEvent::LinkStateChanged {
            peer_id,
            state: LinkState::Failed,
            failure: Some(LinkFailure::Timeout),
            ..
        } if *peer_id == peer)
    }
}

fn has_failed(sink: &MockSink, participant: ParticipantId, peer: ParticipantId) -> bool {
    sink.count_for(participant, timed_out_with(peer)) > 0
}

#[tokio::test(start_paused = true)]
async fn test_stalled_negotiation_fails_both_ends() {
    let (coordinator, sink) = coordinator();
    pair_room(&coordinator).await;

    tokio::time::sleep(Duration::from_secs(5)).await;
    assert!(!has_failed(&sink, pid(1), pid(2)));

    tokio::time::sleep(Duration::from_secs(7)).await;
    sink.wait_for(pid(1), timed_out_with(pid(2))).await;
    sink.wait_for(pid(2), timed_out_with(pid(1))).await;

    // Failed links are dropped from the room and stay dropped.
    let snapshot = coordinator.room_state(pid(1)).await.unwrap();
    assert!(snapshot.links.is_empty());
    assert_eq!(snapshot.members.len(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_connected_link_never_times_out() {
    let (coordinator, sink) = coordinator();
    pair_room(&coordinator).await;

    coordinator
        .signal(pid(2), pid(1), SignalKind::Offer, offer_payload())
        .await
        .unwrap();
    coordinator
        .signal(pid(1), pid(2), SignalKind::Answer, answer_payload())
        .await
        .unwrap();
    coordinator
        .signal(pid(2), pid(1), SignalKind::Candidate, candidate_payload())
        .await
        .unwrap();
    coordinator
        .signal(pid(1), pid(2), SignalKind::Candidate, candidate_payload())
        .await
        .unwrap();

    tokio::time::sleep(Duration::from_secs(30)).await;

    let snapshot = coordinator.room_state(pid(1)).await.unwrap();
    let states: Vec<_> = snapshot.links.iter().map(|l| l.state).collect();
    assert_eq!(states, vec![LinkState::Connected]);
    assert!(!has_failed(&sink, pid(1), pid(2)));
}

#[tokio::test(start_paused = true)]
async fn test_renegotiation_restarts_the_clock() {
    let (coordinator, sink) = coordinator();
    pair_room(&coordinator).await;

    tokio::time::sleep(Duration::from_secs(8)).await;
    coordinator
        .replace_source(pid(1), SourceToken(3))
        .await
        .unwrap();

    // 14s since the join but only 6s into the new round.
    tokio::time::sleep(Duration::from_secs(6)).await;
    assert!(!has_failed(&sink, pid(2), pid(1)));

    tokio::time::sleep(Duration::from_secs(6)).await;
    sink.wait_for(pid(2), timed_out_with(pid(1))).await;
}

#[tokio::test(start_paused = true)]
async fn test_timeout_spares_other_links() {
    let (coordinator, sink) = coordinator();
    pair_room(&coordinator).await;

    // P3 joins late, so its links start their clocks later.
    tokio::time::sleep(Duration::from_secs(6)).await;
    let room_id = coordinator.room_state(pid(1)).await.unwrap().room_id;
    coordinator.join_room(pid(3), "P3", room_id).await.unwrap();

    tokio::time::sleep(Duration::from_secs(6)).await;
    sink.wait_for(pid(1), timed_out_with(pid(2))).await;

    let snapshot = coordinator.room_state(pid(3)).await.unwrap();
    let states: Vec<_> = snapshot.links.iter().map(|l| (l.key, l.state)).collect();
    assert_eq!(states.len(), 2);
    assert!(states.iter().all(|(_, s)| *s == LinkState::Negotiating));
    assert!(!has_failed(&sink, pid(3), pid(1)));
}
