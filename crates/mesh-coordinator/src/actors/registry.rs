//! `RoomRegistryActor` - singleton supervisor for room actors.
//!
//! The `RoomRegistryActor` is the top-level actor of the coordinator:
//!
//! - Singleton per coordinator instance
//! - Supervises N `RoomActor` instances
//! - Maps every participant to the single room it is in
//! - Owns the root `CancellationToken` for graceful shutdown
//! - Monitors child actor health (panic detection via `JoinHandle`)
//!
//! # Graceful Shutdown
//!
//! On SIGTERM, the registry:
//! 1. Sets `accepting_new = false`
//! 2. Cancels the root `CancellationToken` (propagates to all children)
//! 3. Waits for rooms to close, bounded by the shutdown deadline

use crate::coordinator::CoordinatorSettings;
use crate::errors::MeshError;
use crate::events::EventSink;
use crate::roster::ParticipantProfile;

use super::messages::{RegistryMessage, RegistryStatus, RoomCreated, RoomInfo, RoomNotice};
use super::metrics::{ActorMetrics, ActorType, MailboxMonitor};
use super::room::{RoomActor, RoomActorHandle};

use chrono::{DateTime, Utc};
use common::types::{ParticipantId, RoomId};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

/// Default channel buffer size for the registry mailbox.
const REGISTRY_CHANNEL_BUFFER: usize = 1000;

/// Handle to the `RoomRegistryActor`.
///
/// Once the registry has stopped, every request fails with `Draining`.
#[derive(Clone, Debug)]
pub struct RoomRegistryHandle {
    sender: mpsc::Sender<RegistryMessage>,
    cancel_token: CancellationToken,
}

impl RoomRegistryHandle {
    /// Create a new `RoomRegistryActor` and return a handle to it.
    ///
    /// This spawns the actor task and returns immediately.
    #[must_use]
    pub fn new(
        settings: CoordinatorSettings,
        sink: Arc<dyn EventSink>,
        metrics: Arc<ActorMetrics>,
    ) -> Self {
        let (sender, receiver) = mpsc::channel(REGISTRY_CHANNEL_BUFFER);
        let cancel_token = CancellationToken::new();

        let actor = RoomRegistryActor::new(settings, receiver, cancel_token.clone(), sink, metrics);

        tokio::spawn(actor.run());

        Self {
            sender,
            cancel_token,
        }
    }

    async fn request<T>(
        &self,
        build: impl FnOnce(oneshot::Sender<T>) -> RegistryMessage,
    ) -> Result<T, MeshError> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(build(tx))
            .await
            .map_err(|_| MeshError::Draining)?;

        rx.await.map_err(|_| MeshError::Draining)
    }

    /// Open a room with `creator` as its admin.
    pub async fn create_room(
        &self,
        name: String,
        creator: ParticipantProfile,
    ) -> Result<RoomCreated, MeshError> {
        self.request(|respond_to| RegistryMessage::CreateRoom {
            name,
            creator,
            respond_to,
        })
        .await?
    }

    /// Bind `participant` to `room_id` ahead of the room-level join.
    pub async fn reserve_join(
        &self,
        room_id: RoomId,
        participant: ParticipantId,
    ) -> Result<RoomActorHandle, MeshError> {
        self.request(|respond_to| RegistryMessage::ReserveJoin {
            room_id,
            participant,
            respond_to,
        })
        .await?
    }

    /// Drop a reservation whose join failed.
    pub async fn release(&self, room_id: RoomId, participant: ParticipantId) {
        let _ = self
            .sender
            .send(RegistryMessage::Release {
                room_id,
                participant,
            })
            .await;
    }

    /// Handle of the room `participant` is in.
    pub async fn lookup(&self, participant: ParticipantId) -> Result<RoomActorHandle, MeshError> {
        self.request(|respond_to| RegistryMessage::Lookup {
            participant,
            respond_to,
        })
        .await?
    }

    pub async fn get_room(&self, room_id: RoomId) -> Result<RoomInfo, MeshError> {
        self.request(|respond_to| RegistryMessage::GetRoom {
            room_id,
            respond_to,
        })
        .await?
    }

    pub async fn get_status(&self) -> Result<RegistryStatus, MeshError> {
        self.request(|respond_to| RegistryMessage::GetStatus { respond_to })
            .await
    }

    /// Stop accepting rooms and close every open one.
    ///
    /// Returns once the rooms have stopped or `deadline` has passed.
    pub async fn shutdown(&self, deadline: Duration) -> Result<(), MeshError> {
        self.request(|respond_to| RegistryMessage::Shutdown {
            deadline,
            respond_to,
        })
        .await?
    }

    /// Cancel the actor (for immediate shutdown).
    pub fn cancel(&self) {
        self.cancel_token.cancel();
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancel_token.is_cancelled()
    }

    /// Get a child token for tasks that should stop with the registry.
    #[must_use]
    pub fn child_token(&self) -> CancellationToken {
        self.cancel_token.child_token()
    }
}

/// Internal state for a managed room.
struct ManagedRoom {
    handle: RoomActorHandle,
    task_handle: JoinHandle<()>,
    name: String,
    created_at: DateTime<Utc>,
}

/// The `RoomRegistryActor` implementation.
pub struct RoomRegistryActor {
    coordinator_id: String,
    receiver: mpsc::Receiver<RegistryMessage>,
    notices: mpsc::UnboundedReceiver<RoomNotice>,
    /// Cloned into every room actor.
    notice_sender: mpsc::UnboundedSender<RoomNotice>,
    /// Root token.
    cancel_token: CancellationToken,
    rooms: HashMap<RoomId, ManagedRoom>,
    /// Each participant is in at most one room.
    members: HashMap<ParticipantId, RoomId>,
    accepting_new: bool,
    settings: CoordinatorSettings,
    sink: Arc<dyn EventSink>,
    metrics: Arc<ActorMetrics>,
    mailbox: MailboxMonitor,
}

impl RoomRegistryActor {
    fn new(
        settings: CoordinatorSettings,
        receiver: mpsc::Receiver<RegistryMessage>,
        cancel_token: CancellationToken,
        sink: Arc<dyn EventSink>,
        metrics: Arc<ActorMetrics>,
    ) -> Self {
        let (notice_sender, notices) = mpsc::unbounded_channel();
        let mailbox = MailboxMonitor::new(ActorType::Registry, settings.coordinator_id.as_str());

        Self {
            coordinator_id: settings.coordinator_id.clone(),
            receiver,
            notices,
            notice_sender,
            cancel_token,
            rooms: HashMap::new(),
            members: HashMap::new(),
            accepting_new: true,
            settings,
            sink,
            metrics,
            mailbox,
        }
    }

    #[instrument(skip_all, name = "mesh.actor.registry", fields(coordinator_id = %self.coordinator_id))]
    async fn run(mut self) {
        info!(
            target: "mesh.actor.registry",
            coordinator_id = %self.coordinator_id,
            "RoomRegistryActor started"
        );

        loop {
            self.check_room_health().await;

            tokio::select! {
                biased;

                () = self.cancel_token.cancelled() => {
                    info!(
                        target: "mesh.actor.registry",
                        coordinator_id = %self.coordinator_id,
                        "RoomRegistryActor received cancellation signal"
                    );
                    self.graceful_shutdown(self.settings.shutdown_timeout).await;
                    break;
                }

                // Notices first so a departed member can rejoin right away
                Some(notice) = self.notices.recv() => {
                    self.handle_notice(notice);
                }

                msg = self.receiver.recv() => {
                    match msg {
                        Some(message) => {
                            self.mailbox.record_enqueue();
                            self.handle_message(message).await;
                            self.mailbox.record_dequeue();
                            self.metrics.record_message_processed();
                        }
                        None => {
                            info!(
                                target: "mesh.actor.registry",
                                coordinator_id = %self.coordinator_id,
                                "RoomRegistryActor channel closed, exiting"
                            );
                            break;
                        }
                    }
                }
            }
        }

        info!(
            target: "mesh.actor.registry",
            coordinator_id = %self.coordinator_id,
            rooms_remaining = self.rooms.len(),
            messages_processed = self.mailbox.messages_processed(),
            "RoomRegistryActor stopped"
        );
    }

    async fn handle_message(&mut self, message: RegistryMessage) {
        match message {
            RegistryMessage::CreateRoom {
                name,
                creator,
                respond_to,
            } => {
                let result = self.create_room(&name, creator);
                let _ = respond_to.send(result);
            }

            RegistryMessage::ReserveJoin {
                room_id,
                participant,
                respond_to,
            } => {
                let result = self.reserve_join(room_id, participant);
                let _ = respond_to.send(result);
            }

            RegistryMessage::Release {
                room_id,
                participant,
            } => {
                self.unbind(room_id, participant);
            }

            RegistryMessage::Lookup {
                participant,
                respond_to,
            } => {
                let result = self.lookup(participant);
                let _ = respond_to.send(result);
            }

            RegistryMessage::GetRoom {
                room_id,
                respond_to,
            } => {
                let result = self.get_room(room_id);
                let _ = respond_to.send(result);
            }

            RegistryMessage::GetStatus { respond_to } => {
                let _ = respond_to.send(self.get_status());
            }

            RegistryMessage::Shutdown {
                deadline,
                respond_to,
            } => {
                self.initiate_shutdown(deadline).await;
                let _ = respond_to.send(Ok(()));
            }
        }
    }

    fn handle_notice(&mut self, notice: RoomNotice) {
        match notice {
            RoomNotice::ParticipantDeparted {
                room_id,
                participant_id,
            } => self.unbind(room_id, participant_id),
            RoomNotice::RoomClosed { room_id } => {
                if self.remove_room(room_id).is_some() {
                    debug!(
                        target: "mesh.actor.registry",
                        room_id = %room_id,
                        "Room closed and removed"
                    );
                }
            }
        }
    }

    fn create_room(
        &mut self,
        name: &str,
        creator: ParticipantProfile,
    ) -> Result<RoomCreated, MeshError> {
        if !self.accepting_new {
            return Err(MeshError::Draining);
        }
        if self.members.contains_key(&creator.id) {
            return Err(MeshError::Conflict(format!(
                "Participant {} is already in a room",
                creator.id
            )));
        }
        if self.rooms.len() >= self.settings.max_rooms {
            warn!(
                target: "mesh.actor.registry",
                rooms = self.rooms.len(),
                max_rooms = self.settings.max_rooms,
                "Room limit reached"
            );
            return Err(MeshError::CapacityExceeded);
        }

        let room_id = RoomId::new();
        let admin_id = creator.id;
        let (handle, task_handle) = RoomActor::spawn(
            room_id,
            name,
            creator,
            self.settings.room,
            self.cancel_token.child_token(),
            Arc::clone(&self.sink),
            Arc::clone(&self.metrics),
            self.notice_sender.clone(),
        )?;

        self.rooms.insert(
            room_id,
            ManagedRoom {
                handle,
                task_handle,
                name: name.trim().to_string(),
                created_at: Utc::now(),
            },
        );
        self.members.insert(admin_id, room_id);
        self.metrics.room_opened();

        info!(
            target: "mesh.actor.registry",
            room_id = %room_id,
            admin_id = %admin_id,
            total_rooms = self.rooms.len(),
            "Room created"
        );

        Ok(RoomCreated { room_id, admin_id })
    }

    fn reserve_join(
        &mut self,
        room_id: RoomId,
        participant: ParticipantId,
    ) -> Result<RoomActorHandle, MeshError> {
        if !self.accepting_new {
            return Err(MeshError::Draining);
        }
        if let Some(current) = self.members.get(&participant) {
            return Err(MeshError::Conflict(format!(
                "Participant {participant} is already in room {current}"
            )));
        }
        let managed = self
            .rooms
            .get(&room_id)
            .ok_or_else(|| MeshError::RoomNotFound(room_id.to_string()))?;

        self.members.insert(participant, room_id);
        Ok(managed.handle.clone())
    }

    fn lookup(&self, participant: ParticipantId) -> Result<RoomActorHandle, MeshError> {
        self.members
            .get(&participant)
            .and_then(|room_id| self.rooms.get(room_id))
            .map(|managed| managed.handle.clone())
            .ok_or_else(|| MeshError::ParticipantNotFound(participant.to_string()))
    }

    fn get_room(&self, room_id: RoomId) -> Result<RoomInfo, MeshError> {
        let managed = self
            .rooms
            .get(&room_id)
            .ok_or_else(|| MeshError::RoomNotFound(room_id.to_string()))?;

        Ok(RoomInfo {
            room_id,
            name: managed.name.clone(),
            participant_count: self.members.values().filter(|r| **r == room_id).count(),
            created_at: managed.created_at,
        })
    }

    fn get_status(&self) -> RegistryStatus {
        RegistryStatus {
            room_count: self.rooms.len(),
            participant_count: self.members.len(),
            is_draining: !self.accepting_new,
            mailbox_depth: self.mailbox.current_depth(),
        }
    }

    /// Unbind `participant` if it is still bound to `room_id`.
    fn unbind(&mut self, room_id: RoomId, participant: ParticipantId) {
        if self.members.get(&participant) == Some(&room_id) {
            self.members.remove(&participant);
        }
    }

    /// Forget a room and unbind its members. Returns how many were unbound.
    fn remove_room(&mut self, room_id: RoomId) -> Option<(ManagedRoom, usize)> {
        let managed = self.rooms.remove(&room_id)?;
        let before = self.members.len();
        self.members.retain(|_, r| *r != room_id);
        self.metrics.room_closed();
        Some((managed, before - self.members.len()))
    }

    async fn initiate_shutdown(&mut self, deadline: Duration) {
        info!(
            target: "mesh.actor.registry",
            coordinator_id = %self.coordinator_id,
            room_count = self.rooms.len(),
            "Initiating graceful shutdown"
        );

        self.accepting_new = false;
        self.cancel_token.cancel();
        self.graceful_shutdown(deadline).await;
    }

    /// Cancel every room and wait for it to stop, within `deadline` overall.
    async fn graceful_shutdown(&mut self, deadline: Duration) {
        self.accepting_new = false;
        if self.rooms.is_empty() {
            return;
        }

        info!(
            target: "mesh.actor.registry",
            coordinator_id = %self.coordinator_id,
            room_count = self.rooms.len(),
            "Performing graceful shutdown"
        );

        for managed in self.rooms.values() {
            managed.handle.cancel();
        }

        let give_up_at = tokio::time::Instant::now() + deadline;
        let room_ids: Vec<RoomId> = self.rooms.keys().copied().collect();
        for room_id in room_ids {
            let Some((managed, _)) = self.remove_room(room_id) else {
                continue;
            };
            match tokio::time::timeout_at(give_up_at, managed.task_handle).await {
                Ok(Ok(())) => {
                    debug!(
                        target: "mesh.actor.registry",
                        room_id = %room_id,
                        "Room actor completed cleanly"
                    );
                }
                Ok(Err(e)) => {
                    warn!(
                        target: "mesh.actor.registry",
                        room_id = %room_id,
                        error = ?e,
                        "Room actor task panicked during shutdown"
                    );
                }
                Err(_) => {
                    warn!(
                        target: "mesh.actor.registry",
                        room_id = %room_id,
                        "Room actor shutdown timed out"
                    );
                }
            }
        }

        // Rooms are gone, drop their trailing notices
        while self.notices.try_recv().is_ok() {}

        info!(
            target: "mesh.actor.registry",
            coordinator_id = %self.coordinator_id,
            "Graceful shutdown complete"
        );
    }

    /// Check health of managed room actors.
    async fn check_room_health(&mut self) {
        let finished: Vec<RoomId> = self
            .rooms
            .iter()
            .filter(|(_, managed)| managed.task_handle.is_finished())
            .map(|(room_id, _)| *room_id)
            .collect();

        for room_id in finished {
            let Some((managed, unbound)) = self.remove_room(room_id) else {
                continue;
            };
            match managed.task_handle.await {
                Ok(()) => {
                    debug!(
                        target: "mesh.actor.registry",
                        room_id = %room_id,
                        "Room actor exited cleanly"
                    );
                }
                Err(join_error) => {
                    if join_error.is_panic() {
                        error!(
                            target: "mesh.actor.registry",
                            room_id = %room_id,
                            participants_unbound = unbound,
                            error = ?join_error,
                            "Room actor panicked"
                        );
                        self.metrics.record_panic(ActorType::Room);
                        // The room never got to account for its members
                        self.metrics.participants_left(unbound);
                    }
                }
            }
        }
    }
}
