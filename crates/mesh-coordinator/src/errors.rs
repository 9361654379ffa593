//! Mesh Coordinator error types.
//!
//! Error types map to signaling `ErrorCode` values for client responses.
//! Identifiers and internal details are logged server-side but not exposed to clients.

use serde::Serialize;
use thiserror::Error;

/// Mesh Coordinator error type.
///
/// Maps to signaling `ErrorCode` values:
/// - `NameInvalid`, `InvalidTarget`: `INVALID_REQUEST` (1)
/// - `NotAuthorized`: `FORBIDDEN` (3)
/// - `RoomNotFound`, `ParticipantNotFound`, `TargetNotInRoom`: `NOT_FOUND` (4)
/// - `Conflict`, `LinkClosed`, `NegotiationViolation`: `CONFLICT` (5)
/// - `Internal`, `DeliveryFailed`: `INTERNAL_ERROR` (6)
/// - `RoomFull`, `CapacityExceeded`, `Draining`: `CAPACITY_EXCEEDED` (7)
/// - `LinkTimeout`, `TransportFailure`: `LINK_FAILED` (8)
#[derive(Debug, Error)]
pub enum MeshError {
    /// Room does not exist (or closed while the request was in flight).
    #[error("Room not found: {0}")]
    RoomNotFound(String),

    /// Room name is empty or whitespace.
    #[error("Room name is invalid")]
    NameInvalid,

    /// Signal target is not a current member of the sender's room.
    #[error("Target not in room: {0}")]
    TargetNotInRoom(String),

    /// Requester lacks the admin role.
    #[error("Not authorized: {0}")]
    NotAuthorized(String),

    /// A peer link stayed in negotiation past the configured bound.
    #[error("Link negotiation timed out: {0}")]
    LinkTimeout(String),

    /// The media transport reported an irrecoverable error for a link.
    #[error("Transport failure on link: {0}")]
    TransportFailure(String),

    /// Participant is not a member of any room.
    #[error("Participant not found: {0}")]
    ParticipantNotFound(String),

    /// Conflict error (e.g., participant already in a room).
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Room has reached its participant limit.
    #[error("Room at capacity: {0}")]
    RoomFull(String),

    /// Coordinator has reached its room limit.
    #[error("Coordinator at capacity")]
    CapacityExceeded,

    /// Coordinator is draining (graceful shutdown).
    #[error("Coordinator is draining")]
    Draining,

    /// No live link exists between the two participants.
    #[error("Link closed: {0}")]
    LinkClosed(String),

    /// Signal arrived out of negotiation order (e.g., glare).
    #[error("Negotiation violation: {0}")]
    NegotiationViolation(String),

    /// Request names a target it cannot apply to (e.g., self-kick).
    #[error("Invalid target: {0}")]
    InvalidTarget(String),

    /// An outbound event could not be queued for its recipient.
    #[error("Delivery failed: {0}")]
    DeliveryFailed(#[from] DeliveryError),

    /// Internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Failure to queue an outbound event for one participant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryError {
    /// Recipient has no delivery channel in this room.
    #[error("no delivery channel for recipient")]
    NoChannel,

    /// Recipient's delivery mailbox is full (backpressure).
    #[error("delivery mailbox full")]
    MailboxFull,

    /// Recipient's delivery channel has closed.
    #[error("delivery channel closed")]
    Closed,
}

impl MeshError {
    /// Returns the signaling `ErrorCode` value for this error.
    #[must_use]
    pub fn error_code(&self) -> i32 {
        match self {
            MeshError::NameInvalid | MeshError::InvalidTarget(_) => 1, // INVALID_REQUEST
            MeshError::NotAuthorized(_) => 3,                          // FORBIDDEN
            MeshError::RoomNotFound(_)
            | MeshError::ParticipantNotFound(_)
            | MeshError::TargetNotInRoom(_) => 4, // NOT_FOUND
            MeshError::Conflict(_)
            | MeshError::LinkClosed(_)
            | MeshError::NegotiationViolation(_) => 5, // CONFLICT
            MeshError::Internal(_) | MeshError::DeliveryFailed(_) => 6, // INTERNAL_ERROR
            MeshError::RoomFull(_) | MeshError::CapacityExceeded | MeshError::Draining => 7, // CAPACITY_EXCEEDED
            MeshError::LinkTimeout(_) | MeshError::TransportFailure(_) => 8, // LINK_FAILED
        }
    }

    /// Returns a client-safe error message (no internal details).
    #[must_use]
    pub fn client_message(&self) -> String {
        match self {
            MeshError::RoomNotFound(_) => "Room not found".to_string(),
            MeshError::NameInvalid => "Room name must not be empty".to_string(),
            MeshError::TargetNotInRoom(_) => "Target is not in the room".to_string(),
            MeshError::ParticipantNotFound(_) => "Participant not found".to_string(),
            MeshError::LinkTimeout(_) => "Peer connection timed out".to_string(),
            MeshError::TransportFailure(_) => "Peer connection failed".to_string(),
            MeshError::RoomFull(_) => "Room is at capacity".to_string(),
            MeshError::CapacityExceeded => "Server is at capacity, please try again".to_string(),
            MeshError::Draining => "Server is shutting down, please reconnect".to_string(),
            MeshError::LinkClosed(_) => "Peer connection is closed".to_string(),
            MeshError::Internal(_) | MeshError::DeliveryFailed(_) => {
                "An internal error occurred".to_string()
            }
            MeshError::Conflict(msg)
            | MeshError::NotAuthorized(msg)
            | MeshError::NegotiationViolation(msg)
            | MeshError::InvalidTarget(msg) => msg.clone(),
        }
    }

    /// Bounded label for rejection metrics.
    #[must_use]
    pub const fn metric_label(&self) -> &'static str {
        match self {
            MeshError::RoomNotFound(_) => "room_not_found",
            MeshError::NameInvalid => "name_invalid",
            MeshError::TargetNotInRoom(_) => "target_not_in_room",
            MeshError::NotAuthorized(_) => "not_authorized",
            MeshError::LinkTimeout(_) => "link_timeout",
            MeshError::TransportFailure(_) => "transport_failure",
            MeshError::ParticipantNotFound(_) => "participant_not_found",
            MeshError::Conflict(_) => "conflict",
            MeshError::RoomFull(_) => "room_full",
            MeshError::CapacityExceeded => "capacity_exceeded",
            MeshError::Draining => "draining",
            MeshError::LinkClosed(_) => "link_closed",
            MeshError::NegotiationViolation(_) => "negotiation_violation",
            MeshError::InvalidTarget(_) => "invalid_target",
            MeshError::DeliveryFailed(_) => "delivery_failed",
            MeshError::Internal(_) => "internal",
        }
    }
}
