//! Mock event sink for coordinator tests.
//!
//! Records every event per recipient in delivery order and wakes waiters.
//! Chosen participants can be made unreachable to exercise delivery failure.
//!
//! # Example
//!
//! ```rust,ignore
//! use mesh_test_utils::MockSink;
//!
//! let sink = MockSink::new();
//! sink.refuse(pid(2));
//!
//! // ... drive the coordinator ...
//!
//! let joined = sink.wait_for(pid(1), |e| matches!(e, RoomEvent::Joined { .. })).await;
//! ```

use async_trait::async_trait;
use common::types::ParticipantId;
use mesh_coordinator::errors::DeliveryError;
use mesh_coordinator::events::{EventSink, RoomEvent};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Notify;

/// How long `wait_for` waits before failing the test.
pub const DEFAULT_WAIT: Duration = Duration::from_secs(5);

/// Recording `EventSink`.
#[derive(Debug, Default)]
pub struct MockSink {
    events: Mutex<HashMap<ParticipantId, Vec<RoomEvent>>>,
    refused: Mutex<HashSet<ParticipantId>>,
    notify: Notify,
}

impl MockSink {
    /// Create a new mock sink that accepts every delivery.
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Make deliveries to `participant` fail from now on.
    pub fn refuse(&self, participant: ParticipantId) {
        self.refused.lock().unwrap().insert(participant);
    }

    /// Accept deliveries to `participant` again.
    pub fn accept(&self, participant: ParticipantId) {
        self.refused.lock().unwrap().remove(&participant);
    }

    #[must_use]
    pub fn is_refused(&self, participant: ParticipantId) -> bool {
        self.refused.lock().unwrap().contains(&participant)
    }

    /// Events delivered to `participant`, oldest first.
    #[must_use]
    pub fn events_for(&self, participant: ParticipantId) -> Vec<RoomEvent> {
        self.events
            .lock()
            .unwrap()
            .get(&participant)
            .cloned()
            .unwrap_or_default()
    }

    /// Number of events delivered to `participant` that match `pred`.
    #[must_use]
    pub fn count_for<F>(&self, participant: ParticipantId, pred: F) -> usize
    where
        F: Fn(&RoomEvent) -> bool,
    {
        self.events_for(participant)
            .iter()
            .filter(|e| pred(e))
            .count()
    }

    /// Forget everything recorded so far.
    pub fn clear(&self) {
        self.events.lock().unwrap().clear();
    }

    /// Wait until `participant` has received an event matching `pred`.
    ///
    /// # Panics
    ///
    /// Panics if no such event arrives within [`DEFAULT_WAIT`].
    pub async fn wait_for<F>(&self, participant: ParticipantId, pred: F) -> RoomEvent
    where
        F: Fn(&RoomEvent) -> bool,
    {
        let search = async {
            loop {
                let notified = self.notify.notified();
                tokio::pin!(notified);
                notified.as_mut().enable();
                if let Some(event) = self.events_for(participant).into_iter().find(|e| pred(e)) {
                    return event;
                }
                notified.await;
            }
        };
        tokio::time::timeout(DEFAULT_WAIT, search)
            .await
            .unwrap_or_else(|_| {
                panic!(
                    "participant {participant} did not receive the expected event; got {:?}",
                    self.events_for(participant)
                )
            })
    }
}

#[async_trait]
impl EventSink for MockSink {
    async fn deliver(&self, to: ParticipantId, event: RoomEvent) -> Result<(), DeliveryError> {
        if self.refused.lock().unwrap().contains(&to) {
            return Err(DeliveryError::Closed);
        }
        self.events
            .lock()
            .unwrap()
            .entry(to)
            .or_default()
            .push(event);
        self.notify.notify_waiters();
        Ok(())
    }
}
