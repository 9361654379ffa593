//! Pre-configured test data fixtures for coordinator testing.
//!
//! Provides:
//! - Deterministic participant ids (`pid(1) < pid(2) < ...`)
//! - Participants with display names
//! - Coordinator settings with short timings
//! - Opaque negotiation payloads

use common::types::ParticipantId;
use mesh_coordinator::coordinator::CoordinatorSettings;
use mesh_coordinator::room_state::RoomSettings;
use serde_json::{json, Value};
use std::time::Duration;

/// Participant id with numeric value `n`. Larger `n` means larger id.
#[must_use]
pub const fn pid(n: u128) -> ParticipantId {
    ParticipantId::from_u128(n)
}

/// Test participant fixture.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TestParticipant {
    /// Participant ID.
    pub id: ParticipantId,
    /// Display name.
    pub name: String,
}

impl TestParticipant {
    /// Create a participant with id `pid(n)`.
    #[must_use]
    pub fn new(n: u128, name: impl Into<String>) -> Self {
        Self {
            id: pid(n),
            name: name.into(),
        }
    }

    /// P1, P2, ... in id order.
    #[must_use]
    pub fn numbered(count: u128) -> Vec<Self> {
        (1..=count).map(|n| Self::new(n, format!("P{n}"))).collect()
    }
}

/// Coordinator settings with a short negotiation timeout and fast sweep.
#[must_use]
pub fn test_settings() -> CoordinatorSettings {
    CoordinatorSettings {
        coordinator_id: "mesh-test".to_string(),
        max_rooms: 16,
        shutdown_timeout: Duration::from_secs(5),
        room: RoomSettings {
            max_participants: 8,
            negotiation_timeout: Duration::from_secs(10),
            sweep_interval: Duration::from_secs(1),
            delivery_buffer: 64,
        },
    }
}

/// Session description offer payload.
#[must_use]
pub fn offer_payload() -> Value {
    json!({"type": "offer", "sdp": "v=0\r\no=- 1 1 IN IP4 127.0.0.1\r\n"})
}

/// Session description answer payload.
#[must_use]
pub fn answer_payload() -> Value {
    json!({"type": "answer", "sdp": "v=0\r\no=- 2 1 IN IP4 127.0.0.1\r\n"})
}

/// Connectivity candidate payload.
#[must_use]
pub fn candidate_payload() -> Value {
    json!({"candidate": "candidate:1 1 udp 2122260223 192.0.2.1 54321 typ host", "sdpMid": "0"})
}

/// End-of-candidates marker.
#[must_use]
pub fn end_of_candidates() -> Value {
    json!({"candidate": ""})
}
