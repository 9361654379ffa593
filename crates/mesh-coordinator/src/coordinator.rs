//! Participant-facing entry points.
//!
//! The [`Coordinator`] resolves which room a participant is in through the
//! registry, then forwards the request to that room's actor. Every method
//! answers with the outcome the participant should see.

use crate::actors::{
    ActorMetrics, JoinResult, RegistryStatus, RoomCreated, RoomInfo, RoomRegistryHandle,
};
use crate::admin::AdminAction;
use crate::config::{DEFAULT_MAX_ROOMS, DEFAULT_SHUTDOWN_TIMEOUT_SECONDS};
use crate::errors::MeshError;
use crate::events::{EventSink, LeaveReason};
use crate::link::SignalKind;
use crate::relay::SignalEnvelope;
use crate::room_state::{RoomSettings, RoomSnapshot};
use crate::roster::ParticipantProfile;
use crate::substitution::SubstitutionReport;

use common::types::{MediaKind, ParticipantId, RoomId, SourceToken};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument};

/// Coordinator-wide limits.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CoordinatorSettings {
    pub coordinator_id: String,
    pub max_rooms: usize,
    /// Bound on waiting for rooms to close at shutdown.
    pub shutdown_timeout: Duration,
    pub room: RoomSettings,
}

impl Default for CoordinatorSettings {
    fn default() -> Self {
        Self {
            coordinator_id: "mesh-local".to_string(),
            max_rooms: DEFAULT_MAX_ROOMS,
            shutdown_timeout: Duration::from_secs(DEFAULT_SHUTDOWN_TIMEOUT_SECONDS),
            room: RoomSettings::default(),
        }
    }
}

/// Session coordinator for any number of independent rooms.
#[derive(Debug)]
pub struct Coordinator {
    coordinator_id: String,
    shutdown_timeout: Duration,
    registry: RoomRegistryHandle,
    metrics: Arc<ActorMetrics>,
}

impl Coordinator {
    /// Start the actor system. Must be called inside a Tokio runtime.
    #[must_use]
    pub fn new(settings: CoordinatorSettings, sink: Arc<dyn EventSink>) -> Self {
        let coordinator_id = settings.coordinator_id.clone();
        let shutdown_timeout = settings.shutdown_timeout;
        let metrics = ActorMetrics::new();
        let registry = RoomRegistryHandle::new(settings, sink, Arc::clone(&metrics));

        Self {
            coordinator_id,
            shutdown_timeout,
            registry,
            metrics,
        }
    }

    #[must_use]
    pub fn coordinator_id(&self) -> &str {
        &self.coordinator_id
    }

    #[must_use]
    pub fn metrics(&self) -> &Arc<ActorMetrics> {
        &self.metrics
    }

    /// Open a room with the caller as its admin and only member.
    #[instrument(skip_all, fields(participant_id = %participant_id))]
    pub async fn create_room(
        &self,
        participant_id: ParticipantId,
        display_name: impl Into<String>,
        room_name: &str,
    ) -> Result<RoomCreated, MeshError> {
        let creator = ParticipantProfile::new(participant_id, display_name);
        self.registry
            .create_room(room_name.to_string(), creator)
            .await
    }

    /// Join an existing room. Links to every current member start negotiating.
    #[instrument(skip_all, fields(participant_id = %participant_id, room_id = %room_id))]
    pub async fn join_room(
        &self,
        participant_id: ParticipantId,
        display_name: impl Into<String>,
        room_id: RoomId,
    ) -> Result<JoinResult, MeshError> {
        let room = self.registry.reserve_join(room_id, participant_id).await?;

        match room
            .join(ParticipantProfile::new(participant_id, display_name))
            .await
        {
            Ok(joined) => Ok(joined),
            Err(e) => {
                debug!(
                    target: "mesh.coordinator",
                    participant_id = %participant_id,
                    room_id = %room_id,
                    error = %e,
                    "Join failed, releasing reservation"
                );
                self.registry.release(room_id, participant_id).await;
                Err(e)
            }
        }
    }

    /// Leave the current room voluntarily.
    pub async fn leave_room(&self, participant_id: ParticipantId) -> Result<(), MeshError> {
        self.depart(participant_id, LeaveReason::Left).await
    }

    /// The participant's session is gone without a leave.
    pub async fn disconnect(&self, participant_id: ParticipantId) -> Result<(), MeshError> {
        self.depart(participant_id, LeaveReason::Disconnected).await
    }

    async fn depart(
        &self,
        participant_id: ParticipantId,
        reason: LeaveReason,
    ) -> Result<(), MeshError> {
        let room = self.registry.lookup(participant_id).await?;
        room.leave(participant_id, reason).await
    }

    /// Relay a negotiation payload to another member of the sender's room.
    pub async fn signal(
        &self,
        sender: ParticipantId,
        target: ParticipantId,
        kind: SignalKind,
        payload: serde_json::Value,
    ) -> Result<(), MeshError> {
        let room = self.registry.lookup(sender).await?;
        room.relay(SignalEnvelope {
            sender,
            target,
            room: room.room_id(),
            kind,
            payload,
        })
        .await
    }

    /// Substitute the caller's outgoing source on all of their links.
    pub async fn replace_source(
        &self,
        participant_id: ParticipantId,
        token: SourceToken,
    ) -> Result<SubstitutionReport, MeshError> {
        let room = self.registry.lookup(participant_id).await?;
        room.replace_source(participant_id, token).await
    }

    /// Go back to the primary source.
    pub async fn restore_source(
        &self,
        participant_id: ParticipantId,
    ) -> Result<SubstitutionReport, MeshError> {
        let room = self.registry.lookup(participant_id).await?;
        room.restore_source(participant_id).await
    }

    /// Replace the caller's primary source.
    pub async fn set_primary_source(
        &self,
        participant_id: ParticipantId,
        token: SourceToken,
    ) -> Result<SubstitutionReport, MeshError> {
        let room = self.registry.lookup(participant_id).await?;
        room.set_primary_source(participant_id, token).await
    }

    /// Mute or remove another member. Admin only.
    pub async fn admin_action(
        &self,
        requester: ParticipantId,
        target: ParticipantId,
        action: AdminAction,
    ) -> Result<(), MeshError> {
        let room = self.registry.lookup(requester).await?;
        room.admin_action(requester, target, action).await
    }

    /// Ask the room admin for the mic.
    pub async fn request_mic(&self, participant_id: ParticipantId) -> Result<(), MeshError> {
        let room = self.registry.lookup(participant_id).await?;
        room.request_mic(participant_id).await
    }

    pub async fn self_mute(
        &self,
        participant_id: ParticipantId,
        kind: MediaKind,
        muted: bool,
    ) -> Result<(), MeshError> {
        let room = self.registry.lookup(participant_id).await?;
        room.self_mute(participant_id, kind, muted).await
    }

    /// The media transport to `peer` failed irrecoverably.
    pub async fn report_link_failure(
        &self,
        reporter: ParticipantId,
        peer: ParticipantId,
    ) -> Result<(), MeshError> {
        let room = self.registry.lookup(reporter).await?;
        room.report_link_failure(reporter, peer).await
    }

    /// Close the room for everyone. Admin only.
    pub async fn end_room(&self, requester: ParticipantId) -> Result<(), MeshError> {
        let room = self.registry.lookup(requester).await?;
        room.end_room(requester).await
    }

    /// Snapshot of the caller's room.
    pub async fn room_state(&self, participant_id: ParticipantId) -> Result<RoomSnapshot, MeshError> {
        let room = self.registry.lookup(participant_id).await?;
        room.get_state().await
    }

    pub async fn room_info(&self, room_id: RoomId) -> Result<RoomInfo, MeshError> {
        self.registry.get_room(room_id).await
    }

    pub async fn status(&self) -> Result<RegistryStatus, MeshError> {
        self.registry.get_status().await
    }

    /// Token cancelled when the coordinator shuts down.
    #[must_use]
    pub fn child_token(&self) -> CancellationToken {
        self.registry.child_token()
    }

    /// Stop accepting rooms and close every open one.
    pub async fn shutdown(&self) -> Result<(), MeshError> {
        info!(
            target: "mesh.coordinator",
            coordinator_id = %self.coordinator_id,
            "Shutting down coordinator"
        );
        match self.registry.shutdown(self.shutdown_timeout).await {
            // Already stopped
            Err(MeshError::Draining) => Ok(()),
            other => other,
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::events::testing::CollectingSink;
    use crate::events::RoomEvent;
    use crate::link::LinkState;

    fn pid(n: u128) -> ParticipantId {
        ParticipantId::from_u128(n)
    }

    fn coordinator() -> (Coordinator, Arc<CollectingSink>) {
        let sink = Arc::new(CollectingSink::default());
        let coordinator = Coordinator::new(
            CoordinatorSettings::default(),
            Arc::clone(&sink) as Arc<dyn EventSink>,
        );
        (coordinator, sink)
    }

    #[tokio::test]
    async fn test_create_join_and_signal() {
        let (coordinator, sink) = coordinator();
        let created = coordinator.create_room(pid(1), "Alice", "demo").await.unwrap();

        let joined = coordinator
            .join_room(pid(2), "Bob", created.room_id)
            .await
            .unwrap();
        assert_eq!(joined.admin_id, pid(1));

        coordinator
            .signal(pid(2), pid(1), SignalKind::Offer, serde_json::json!({"sdp": "o"}))
            .await
            .unwrap();
        sink.wait_for(pid(1), |e| matches!(e, RoomEvent::Signal { .. }))
            .await;

        let snapshot = coordinator.room_state(pid(1)).await.unwrap();
        assert_eq!(snapshot.members.len(), 2);
        assert_eq!(
            snapshot.links.first().map(|l| l.state),
            Some(LinkState::Negotiating)
        );

        coordinator.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_failed_join_releases_reservation() {
        let sink = Arc::new(CollectingSink::default());
        let coordinator = Coordinator::new(
            CoordinatorSettings {
                room: RoomSettings {
                    max_participants: 1,
                    ..RoomSettings::default()
                },
                ..CoordinatorSettings::default()
            },
            sink as Arc<dyn EventSink>,
        );
        let created = coordinator.create_room(pid(1), "Alice", "demo").await.unwrap();

        let result = coordinator.join_room(pid(2), "Bob", created.room_id).await;
        assert!(matches!(result, Err(MeshError::RoomFull(_))));

        // Not bound anywhere, so free to open a room
        coordinator.create_room(pid(2), "Bob", "other").await.unwrap();

        coordinator.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_unbound_participant_is_not_found() {
        let (coordinator, _sink) = coordinator();

        assert!(matches!(
            coordinator.leave_room(pid(9)).await,
            Err(MeshError::ParticipantNotFound(_))
        ));
        assert!(matches!(
            coordinator
                .signal(pid(9), pid(1), SignalKind::Offer, serde_json::Value::Null)
                .await,
            Err(MeshError::ParticipantNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_leave_then_rejoin() {
        let (coordinator, _sink) = coordinator();
        let created = coordinator.create_room(pid(1), "Alice", "demo").await.unwrap();
        coordinator
            .join_room(pid(2), "Bob", created.room_id)
            .await
            .unwrap();

        coordinator.leave_room(pid(2)).await.unwrap();
        coordinator
            .join_room(pid(2), "Bob", created.room_id)
            .await
            .unwrap();
        assert_eq!(
            coordinator.room_info(created.room_id).await.unwrap().participant_count,
            2
        );

        coordinator.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_shutdown_twice_is_ok() {
        let (coordinator, _sink) = coordinator();
        coordinator.shutdown().await.unwrap();
        coordinator.shutdown().await.unwrap();
        assert!(matches!(
            coordinator.create_room(pid(1), "Alice", "demo").await,
            Err(MeshError::Draining)
        ));
    }
}
