//! `RoomActor` - per-room actor that owns the room state.
//!
//! Each `RoomActor`:
//! - Owns the roster, the peer links and the source bookkeeping of one room
//! - Serializes every mutation of that state through its mailbox
//! - Supervises one `ConnectionActor` per member for event delivery
//! - Sweeps negotiations that overrun the configured timeout
//!
//! # Lifecycle
//!
//! 1. Spawned by `RoomRegistryActor` when a room is created
//! 2. Runs until the admin ends the room, the last member leaves, or it is cancelled
//! 3. Tells the registry it closed so members are unbound

use crate::admin::{AdminAction, AdminOutcome};
use crate::errors::{DeliveryError, MeshError};
use crate::events::{EventSink, LeaveReason, Outbox, RoomCloseReason, RoomEvent};
use crate::observability::metrics;
use crate::relay::SignalEnvelope;
use crate::room_state::{RoomSettings, RoomSnapshot, RoomState};
use crate::roster::ParticipantProfile;
use crate::substitution::SubstitutionReport;

use super::connection::{ConnectionActor, ConnectionActorHandle};
use super::messages::{JoinResult, RoomMessage, RoomNotice};
use super::metrics::{ActorMetrics, ActorType, MailboxMonitor};

use common::types::{MediaKind, ParticipantId, RoomId, SourceToken};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

/// Default channel buffer size for room actor mailbox.
const ROOM_CHANNEL_BUFFER: usize = 500;

/// How long shutdown waits for each connection actor to flush.
const CONNECTION_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

/// Handle to a `RoomActor`.
///
/// A room that has stopped answers every request with `RoomNotFound`.
#[derive(Clone, Debug)]
pub struct RoomActorHandle {
    sender: mpsc::Sender<RoomMessage>,
    cancel_token: CancellationToken,
    room_id: RoomId,
}

impl RoomActorHandle {
    #[must_use]
    pub fn room_id(&self) -> RoomId {
        self.room_id
    }

    /// Send a request and wait for its answer.
    async fn request<T>(
        &self,
        build: impl FnOnce(oneshot::Sender<T>) -> RoomMessage,
    ) -> Result<T, MeshError> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(build(tx))
            .await
            .map_err(|_| MeshError::RoomNotFound(self.room_id.to_string()))?;

        rx.await
            .map_err(|_| MeshError::RoomNotFound(self.room_id.to_string()))
    }

    pub async fn join(&self, participant: ParticipantProfile) -> Result<JoinResult, MeshError> {
        self.request(|respond_to| RoomMessage::Join {
            participant,
            respond_to,
        })
        .await?
    }

    pub async fn leave(
        &self,
        participant_id: ParticipantId,
        reason: LeaveReason,
    ) -> Result<(), MeshError> {
        self.request(|respond_to| RoomMessage::Leave {
            participant_id,
            reason,
            respond_to,
        })
        .await?
    }

    pub async fn relay(&self, envelope: SignalEnvelope) -> Result<(), MeshError> {
        self.request(|respond_to| RoomMessage::Relay {
            envelope,
            respond_to,
        })
        .await?
    }

    pub async fn replace_source(
        &self,
        participant_id: ParticipantId,
        token: SourceToken,
    ) -> Result<SubstitutionReport, MeshError> {
        self.request(|respond_to| RoomMessage::ReplaceSource {
            participant_id,
            token,
            respond_to,
        })
        .await?
    }

    pub async fn restore_source(
        &self,
        participant_id: ParticipantId,
    ) -> Result<SubstitutionReport, MeshError> {
        self.request(|respond_to| RoomMessage::RestoreSource {
            participant_id,
            respond_to,
        })
        .await?
    }

    pub async fn set_primary_source(
        &self,
        participant_id: ParticipantId,
        token: SourceToken,
    ) -> Result<SubstitutionReport, MeshError> {
        self.request(|respond_to| RoomMessage::SetPrimarySource {
            participant_id,
            token,
            respond_to,
        })
        .await?
    }

    pub async fn admin_action(
        &self,
        requester: ParticipantId,
        target: ParticipantId,
        action: AdminAction,
    ) -> Result<(), MeshError> {
        self.request(|respond_to| RoomMessage::AdminAction {
            requester,
            target,
            action,
            respond_to,
        })
        .await?
    }

    pub async fn request_mic(&self, participant_id: ParticipantId) -> Result<(), MeshError> {
        self.request(|respond_to| RoomMessage::RequestMic {
            participant_id,
            respond_to,
        })
        .await?
    }

    pub async fn self_mute(
        &self,
        participant_id: ParticipantId,
        kind: MediaKind,
        muted: bool,
    ) -> Result<(), MeshError> {
        self.request(|respond_to| RoomMessage::SelfMute {
            participant_id,
            kind,
            muted,
            respond_to,
        })
        .await?
    }

    pub async fn report_link_failure(
        &self,
        reporter: ParticipantId,
        peer: ParticipantId,
    ) -> Result<(), MeshError> {
        self.request(|respond_to| RoomMessage::ReportLinkFailure {
            reporter,
            peer,
            respond_to,
        })
        .await?
    }

    pub async fn end_room(&self, requester: ParticipantId) -> Result<(), MeshError> {
        self.request(|respond_to| RoomMessage::EndRoom {
            requester,
            respond_to,
        })
        .await?
    }

    pub async fn get_state(&self) -> Result<RoomSnapshot, MeshError> {
        self.request(|respond_to| RoomMessage::GetState { respond_to })
            .await
    }

    pub fn cancel(&self) {
        self.cancel_token.cancel();
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancel_token.is_cancelled()
    }
}

/// Managed connection actor.
struct ManagedConnection {
    handle: ConnectionActorHandle,
    task_handle: JoinHandle<()>,
}

/// Outbox over the room's connection actors.
///
/// Queueing never waits; a member without a live connection is `NoChannel`.
struct RoomOutbox {
    room_id: RoomId,
    connections: HashMap<ParticipantId, ManagedConnection>,
    /// Released connections still flushing.
    retiring: Vec<JoinHandle<()>>,
    cancel_token: CancellationToken,
    sink: Arc<dyn EventSink>,
    metrics: Arc<ActorMetrics>,
    buffer: usize,
}

impl RoomOutbox {
    fn attach(&mut self, participant_id: ParticipantId) {
        let (handle, task_handle) = ConnectionActor::spawn(
            participant_id,
            self.room_id,
            self.buffer,
            self.cancel_token.child_token(),
            Arc::clone(&self.sink),
            Arc::clone(&self.metrics),
        );
        self.connections.insert(
            participant_id,
            ManagedConnection {
                handle,
                task_handle,
            },
        );
    }
}

impl Outbox for RoomOutbox {
    fn push(&mut self, to: ParticipantId, event: RoomEvent) -> Result<(), DeliveryError> {
        match self.connections.get(&to) {
            Some(managed) => managed.handle.try_deliver(event),
            None => Err(DeliveryError::NoChannel),
        }
    }

    fn release(&mut self, participant: ParticipantId) {
        if let Some(managed) = self.connections.remove(&participant) {
            managed.handle.close();
            self.retiring.push(managed.task_handle);
        }
    }
}

/// The `RoomActor` implementation.
pub struct RoomActor {
    room_id: RoomId,
    receiver: mpsc::Receiver<RoomMessage>,
    cancel_token: CancellationToken,
    state: RoomState,
    outbox: RoomOutbox,
    notices: mpsc::UnboundedSender<RoomNotice>,
    metrics: Arc<ActorMetrics>,
    mailbox: MailboxMonitor,
}

impl RoomActor {
    /// Spawn a room with `creator` as its first member and admin.
    ///
    /// Returns a handle and the task join handle. Fails without spawning
    /// anything if the room cannot be opened.
    #[allow(clippy::too_many_arguments)]
    pub fn spawn(
        room_id: RoomId,
        name: &str,
        creator: ParticipantProfile,
        settings: RoomSettings,
        cancel_token: CancellationToken,
        sink: Arc<dyn EventSink>,
        metrics: Arc<ActorMetrics>,
        notices: mpsc::UnboundedSender<RoomNotice>,
    ) -> Result<(RoomActorHandle, JoinHandle<()>), MeshError> {
        let mut outbox = RoomOutbox {
            room_id,
            connections: HashMap::new(),
            retiring: Vec::new(),
            cancel_token: cancel_token.clone(),
            sink,
            metrics: Arc::clone(&metrics),
            buffer: settings.delivery_buffer,
        };
        outbox.attach(creator.id);

        let state = match RoomState::open(room_id, name, creator, settings, &mut outbox) {
            Ok(state) => state,
            Err(e) => {
                cancel_token.cancel();
                return Err(e);
            }
        };
        metrics.participant_joined();

        let (sender, receiver) = mpsc::channel(ROOM_CHANNEL_BUFFER);

        let actor = Self {
            room_id,
            receiver,
            cancel_token: cancel_token.clone(),
            state,
            outbox,
            notices,
            metrics,
            mailbox: MailboxMonitor::new(ActorType::Room, room_id.to_string()),
        };

        let task_handle = tokio::spawn(actor.run());

        let handle = RoomActorHandle {
            sender,
            cancel_token,
            room_id,
        };

        Ok((handle, task_handle))
    }

    #[instrument(skip_all, name = "mesh.actor.room", fields(room_id = %self.room_id))]
    async fn run(mut self) {
        info!(
            target: "mesh.actor.room",
            room_id = %self.room_id,
            name = %self.state.name(),
            "RoomActor started"
        );

        let mut sweep = tokio::time::interval(self.state.settings().sweep_interval);
        sweep.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            self.check_connection_health().await;
            if self.state.is_closed() {
                break;
            }

            tokio::select! {
                () = self.cancel_token.cancelled() => {
                    info!(
                        target: "mesh.actor.room",
                        room_id = %self.room_id,
                        "RoomActor received cancellation signal"
                    );
                    self.tracked(|state, outbox| {
                        state.close_room(RoomCloseReason::Shutdown, outbox);
                    });
                    break;
                }

                _ = sweep.tick() => {
                    self.tracked(|state, outbox| {
                        state.expire_negotiations(Instant::now(), outbox);
                    });
                }

                msg = self.receiver.recv() => {
                    match msg {
                        Some(message) => {
                            self.mailbox.record_enqueue();
                            self.handle_message(message);
                            self.mailbox.record_dequeue();
                            self.metrics.record_message_processed();
                        }
                        None => {
                            info!(
                                target: "mesh.actor.room",
                                room_id = %self.room_id,
                                "RoomActor channel closed, exiting"
                            );
                            self.tracked(|state, outbox| {
                                state.close_room(RoomCloseReason::Shutdown, outbox);
                            });
                            break;
                        }
                    }
                }
            }
        }

        // Everyone still on the roster goes with the room
        self.metrics.participants_left(self.state.roster().len());
        self.graceful_shutdown().await;

        let _ = self.notices.send(RoomNotice::RoomClosed {
            room_id: self.room_id,
        });

        info!(
            target: "mesh.actor.room",
            room_id = %self.room_id,
            "RoomActor stopped"
        );
    }

    /// Run a state mutation and keep the link gauge in step with it.
    fn tracked<T>(&mut self, f: impl FnOnce(&mut RoomState, &mut RoomOutbox) -> T) -> T {
        let before = self.state.link_count();
        let result = f(&mut self.state, &mut self.outbox);
        self.metrics.links_changed(before, self.state.link_count());
        result
    }

    fn handle_message(&mut self, message: RoomMessage) {
        match message {
            RoomMessage::Join {
                participant,
                respond_to,
            } => {
                let result = self.handle_join(participant);
                let _ = respond_to.send(result);
            }

            RoomMessage::Leave {
                participant_id,
                reason,
                respond_to,
            } => {
                let result = self.handle_leave(participant_id, reason);
                let _ = respond_to.send(result);
            }

            RoomMessage::Relay {
                envelope,
                respond_to,
            } => {
                let result = self
                    .tracked(|state, outbox| state.relay(envelope, Instant::now(), outbox))
                    .map(|_| ());
                if let Err(e) = &result {
                    metrics::record_signal_rejected(e.metric_label());
                    debug!(
                        target: "mesh.actor.room",
                        room_id = %self.room_id,
                        error = %e,
                        "Signal rejected"
                    );
                }
                let _ = respond_to.send(result);
            }

            RoomMessage::ReplaceSource {
                participant_id,
                token,
                respond_to,
            } => {
                let result = self.tracked(|state, outbox| {
                    state.replace_outgoing_source(participant_id, token, Instant::now(), outbox)
                });
                let _ = respond_to.send(result);
            }

            RoomMessage::RestoreSource {
                participant_id,
                respond_to,
            } => {
                let result = self.tracked(|state, outbox| {
                    state.restore_primary_source(participant_id, Instant::now(), outbox)
                });
                let _ = respond_to.send(result);
            }

            RoomMessage::SetPrimarySource {
                participant_id,
                token,
                respond_to,
            } => {
                let result = self.tracked(|state, outbox| {
                    state.set_primary_source(participant_id, token, Instant::now(), outbox)
                });
                let _ = respond_to.send(result);
            }

            RoomMessage::AdminAction {
                requester,
                target,
                action,
                respond_to,
            } => {
                let result = self
                    .tracked(|state, outbox| state.admin_action(requester, target, action, outbox))
                    .map(|outcome| {
                        if let AdminOutcome::Kicked(left) = outcome {
                            self.departed(left.removed.id);
                        }
                    });
                let _ = respond_to.send(result);
            }

            RoomMessage::RequestMic {
                participant_id,
                respond_to,
            } => {
                let result = self.state.request_mic(participant_id, &mut self.outbox);
                let _ = respond_to.send(result);
            }

            RoomMessage::SelfMute {
                participant_id,
                kind,
                muted,
                respond_to,
            } => {
                let result = self
                    .state
                    .set_self_muted(participant_id, kind, muted, &mut self.outbox)
                    .map(|_| ());
                let _ = respond_to.send(result);
            }

            RoomMessage::ReportLinkFailure {
                reporter,
                peer,
                respond_to,
            } => {
                let result = self
                    .tracked(|state, outbox| state.report_link_failure(reporter, peer, outbox))
                    .map(|_| ());
                let _ = respond_to.send(result);
            }

            RoomMessage::EndRoom {
                requester,
                respond_to,
            } => {
                let result = self
                    .tracked(|state, outbox| state.end_room(requester, outbox))
                    .map(|_| ());
                if result.is_ok() {
                    // Unbind members before the admin hears back
                    let _ = self.notices.send(RoomNotice::RoomClosed {
                        room_id: self.room_id,
                    });
                }
                let _ = respond_to.send(result);
            }

            RoomMessage::GetState { respond_to } => {
                let _ = respond_to.send(self.state.snapshot());
            }
        }
    }

    fn handle_join(&mut self, profile: ParticipantProfile) -> Result<JoinResult, MeshError> {
        let participant_id = profile.id;
        if self.state.roster().contains(participant_id) {
            return Err(MeshError::Conflict(format!(
                "Participant {participant_id} is already in this room"
            )));
        }

        self.outbox.attach(participant_id);
        match self.tracked(|state, outbox| state.join(profile, Instant::now(), outbox)) {
            Ok(outcome) => {
                self.metrics.participant_joined();
                Ok(JoinResult {
                    room_id: self.room_id,
                    admin_id: outcome.admin_id,
                    members: outcome.members,
                })
            }
            Err(e) => {
                self.outbox.release(participant_id);
                Err(e)
            }
        }
    }

    fn handle_leave(
        &mut self,
        participant_id: ParticipantId,
        reason: LeaveReason,
    ) -> Result<(), MeshError> {
        let outcome = self.tracked(|state, outbox| state.leave(participant_id, reason, outbox))?;
        self.outbox.release(participant_id);
        self.departed(outcome.removed.id);

        info!(
            target: "mesh.actor.room",
            room_id = %self.room_id,
            participant_id = %participant_id,
            reason = reason.as_str(),
            links_closed = outcome.closed_links.len(),
            "Participant left"
        );
        Ok(())
    }

    fn departed(&self, participant_id: ParticipantId) {
        self.metrics.participants_left(1);
        let _ = self.notices.send(RoomNotice::ParticipantDeparted {
            room_id: self.room_id,
            participant_id,
        });
    }

    /// Check connection actors for unexpected exits.
    ///
    /// A member whose connection actor died can no longer be reached, so it
    /// is treated as disconnected.
    async fn check_connection_health(&mut self) {
        self.outbox.retiring.retain(|task| !task.is_finished());

        let finished: Vec<ParticipantId> = self
            .outbox
            .connections
            .iter()
            .filter(|(_, managed)| managed.task_handle.is_finished())
            .map(|(participant_id, _)| *participant_id)
            .collect();

        for participant_id in finished {
            let Some(managed) = self.outbox.connections.remove(&participant_id) else {
                continue;
            };
            match managed.task_handle.await {
                Ok(()) => {
                    debug!(
                        target: "mesh.actor.room",
                        room_id = %self.room_id,
                        participant_id = %participant_id,
                        "Connection actor exited"
                    );
                }
                Err(join_error) => {
                    if join_error.is_panic() {
                        error!(
                            target: "mesh.actor.room",
                            room_id = %self.room_id,
                            participant_id = %participant_id,
                            error = ?join_error,
                            "Connection actor panicked"
                        );
                        self.metrics.record_panic(ActorType::Connection);
                    }
                }
            }

            if self.state.roster().contains(participant_id) {
                if let Err(e) = self.handle_leave(participant_id, LeaveReason::Disconnected) {
                    warn!(
                        target: "mesh.actor.room",
                        room_id = %self.room_id,
                        participant_id = %participant_id,
                        error = %e,
                        "Failed to remove unreachable participant"
                    );
                }
            }
        }
    }

    /// Wait for every connection actor to flush what it was sent.
    async fn graceful_shutdown(&mut self) {
        let remaining: Vec<ParticipantId> = self.outbox.connections.keys().copied().collect();
        for participant_id in remaining {
            self.outbox.release(participant_id);
        }

        for task in self.outbox.retiring.drain(..) {
            match tokio::time::timeout(CONNECTION_SHUTDOWN_TIMEOUT, task).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    warn!(
                        target: "mesh.actor.room",
                        room_id = %self.room_id,
                        error = ?e,
                        "Connection task panicked during shutdown"
                    );
                }
                Err(_) => {
                    warn!(
                        target: "mesh.actor.room",
                        room_id = %self.room_id,
                        "Connection shutdown timed out"
                    );
                }
            }
        }
    }
}
