//! `ConnectionActor` - per-participant delivery actor.
//!
//! Each `ConnectionActor`:
//! - Serves exactly one participant in one room
//! - Receives events from its `RoomActor` without making it wait
//! - Forwards them to the `EventSink` in the order they were queued
//!
//! # Lifecycle
//!
//! 1. Spawned by the `RoomActor` when the participant joins
//! 2. Runs until it is released (leave, kick, room end) or cancelled
//! 3. On release or cancellation it flushes its mailbox before stopping

use crate::errors::DeliveryError;
use crate::events::{EventSink, RoomEvent};

use super::messages::ConnectionMessage;
use super::metrics::{ActorMetrics, ActorType, MailboxMonitor};

use common::types::{ParticipantId, RoomId};
use std::sync::Arc;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument};

/// Handle to a `ConnectionActor`.
#[derive(Clone, Debug)]
pub struct ConnectionActorHandle {
    sender: mpsc::Sender<ConnectionMessage>,
    cancel_token: CancellationToken,
    /// Shared with the actor: the handle records enqueues, the actor dequeues.
    mailbox: Arc<MailboxMonitor>,
}

impl ConnectionActorHandle {
    /// Queue an event without waiting.
    ///
    /// A full mailbox drops the event and counts the drop.
    pub fn try_deliver(&self, event: RoomEvent) -> Result<(), DeliveryError> {
        match self.sender.try_send(ConnectionMessage::Deliver { event }) {
            Ok(()) => {
                self.mailbox.record_enqueue();
                Ok(())
            }
            Err(TrySendError::Full(_)) => {
                self.mailbox.record_drop();
                Err(DeliveryError::MailboxFull)
            }
            Err(TrySendError::Closed(_)) => Err(DeliveryError::Closed),
        }
    }

    /// Ask the actor to flush and stop. Falls back to cancellation if the
    /// mailbox cannot take the request.
    pub fn close(&self) {
        if self.sender.try_send(ConnectionMessage::Close).is_err() {
            self.cancel_token.cancel();
        }
    }
}

/// The `ConnectionActor` implementation.
pub struct ConnectionActor {
    participant_id: ParticipantId,
    room_id: RoomId,
    receiver: mpsc::Receiver<ConnectionMessage>,
    /// Child of the room's token.
    cancel_token: CancellationToken,
    sink: Arc<dyn EventSink>,
    metrics: Arc<ActorMetrics>,
    mailbox: Arc<MailboxMonitor>,
    delivered: u64,
}

impl ConnectionActor {
    /// Spawn a new connection actor.
    ///
    /// Returns a handle and the task join handle.
    pub fn spawn(
        participant_id: ParticipantId,
        room_id: RoomId,
        buffer: usize,
        cancel_token: CancellationToken,
        sink: Arc<dyn EventSink>,
        metrics: Arc<ActorMetrics>,
    ) -> (ConnectionActorHandle, JoinHandle<()>) {
        let (sender, receiver) = mpsc::channel(buffer.max(1));
        let mailbox = Arc::new(MailboxMonitor::new(
            ActorType::Connection,
            participant_id.to_string(),
        ));

        let actor = Self {
            participant_id,
            room_id,
            receiver,
            cancel_token: cancel_token.clone(),
            sink,
            metrics,
            mailbox: Arc::clone(&mailbox),
            delivered: 0,
        };

        let task_handle = tokio::spawn(actor.run());

        let handle = ConnectionActorHandle {
            sender,
            cancel_token,
            mailbox,
        };

        (handle, task_handle)
    }

    #[instrument(
        skip_all,
        name = "mesh.actor.connection",
        fields(participant_id = %self.participant_id, room_id = %self.room_id)
    )]
    async fn run(mut self) {
        debug!(
            target: "mesh.actor.connection",
            participant_id = %self.participant_id,
            room_id = %self.room_id,
            "ConnectionActor started"
        );

        loop {
            tokio::select! {
                () = self.cancel_token.cancelled() => {
                    debug!(
                        target: "mesh.actor.connection",
                        participant_id = %self.participant_id,
                        "ConnectionActor received cancellation signal"
                    );
                    self.flush().await;
                    break;
                }

                msg = self.receiver.recv() => {
                    match msg {
                        Some(message) => {
                            let should_exit = self.handle_message(message).await;
                            self.metrics.record_message_processed();
                            if should_exit {
                                break;
                            }
                        }
                        None => {
                            debug!(
                                target: "mesh.actor.connection",
                                participant_id = %self.participant_id,
                                "ConnectionActor channel closed, exiting"
                            );
                            break;
                        }
                    }
                }
            }
        }

        info!(
            target: "mesh.actor.connection",
            participant_id = %self.participant_id,
            room_id = %self.room_id,
            delivered = self.delivered,
            dropped = self.mailbox.messages_dropped(),
            "ConnectionActor stopped"
        );
    }

    /// Handle a single message. Returns true if the actor should exit.
    async fn handle_message(&mut self, message: ConnectionMessage) -> bool {
        match message {
            ConnectionMessage::Deliver { event } => {
                self.mailbox.record_dequeue();
                self.forward(event).await;
                false
            }
            ConnectionMessage::Close => {
                self.flush().await;
                true
            }
        }
    }

    async fn forward(&mut self, event: RoomEvent) {
        let name = event.name();
        match self.sink.deliver(self.participant_id, event).await {
            Ok(()) => self.delivered += 1,
            Err(e) => {
                debug!(
                    target: "mesh.actor.connection",
                    participant_id = %self.participant_id,
                    event = name,
                    error = %e,
                    "Event sink rejected event"
                );
                self.mailbox.record_drop();
            }
        }
    }

    /// Forward whatever is already queued, then stop accepting more.
    async fn flush(&mut self) {
        self.receiver.close();
        while let Ok(message) = self.receiver.try_recv() {
            if let ConnectionMessage::Deliver { event } = message {
                self.mailbox.record_dequeue();
                self.forward(event).await;
            }
        }
    }
}
