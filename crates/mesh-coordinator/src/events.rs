//! Outbound room events and the delivery seams they travel through.
//!
//! Room logic writes events into an [`Outbox`] synchronously while it holds
//! the room state. The room actor's outbox queues them into per-participant
//! connection actors, which forward them to the [`EventSink`] collaborator.

use crate::arbiter::LinkRole;
use crate::errors::DeliveryError;
use crate::link::{LinkFailure, LinkState, SignalKind};
use crate::roster::MemberInfo;

use async_trait::async_trait;
use common::types::{MediaKind, ParticipantId, RoomId};
use serde::Serialize;

/// Why a member left the roster.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LeaveReason {
    Left,
    Kicked,
    Disconnected,
}

impl LeaveReason {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            LeaveReason::Left => "left",
            LeaveReason::Kicked => "kicked",
            LeaveReason::Disconnected => "disconnected",
        }
    }
}

/// Why a room closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RoomCloseReason {
    EndedByAdmin,
    Shutdown,
}

impl RoomCloseReason {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            RoomCloseReason::EndedByAdmin => "ended_by_admin",
            RoomCloseReason::Shutdown => "shutdown",
        }
    }
}

/// Event delivered to one participant.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum RoomEvent {
    RoomCreated {
        room_id: RoomId,
        admin_id: ParticipantId,
    },
    Joined {
        room_id: RoomId,
        admin_id: ParticipantId,
        members: Vec<MemberInfo>,
    },
    MemberListChanged {
        members: Vec<MemberInfo>,
    },
    MemberLeft {
        participant_id: ParticipantId,
        reason: LeaveReason,
    },
    /// Relayed negotiation payload, passed through unmodified.
    Signal {
        sender_id: ParticipantId,
        kind: SignalKind,
        payload: serde_json::Value,
    },
    LinkStateChanged {
        peer_id: ParticipantId,
        state: LinkState,
        /// Recipient's role on the link.
        role: LinkRole,
        #[serde(skip_serializing_if = "Option::is_none")]
        failure: Option<LinkFailure>,
    },
    Kicked {
        participant_id: ParticipantId,
    },
    Muted {
        kind: MediaKind,
        by: ParticipantId,
    },
    AdminChanged {
        admin_id: ParticipantId,
    },
    /// A member asks the admin to be allowed to speak.
    MicRequested {
        participant_id: ParticipantId,
        display_name: String,
    },
    /// The admin let `participant_id` speak. Sent to the whole room.
    MicGranted {
        participant_id: ParticipantId,
        by: ParticipantId,
    },
    RoomClosed {
        reason: RoomCloseReason,
    },
}

impl RoomEvent {
    /// Event name for logs.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            RoomEvent::RoomCreated { .. } => "room_created",
            RoomEvent::Joined { .. } => "joined",
            RoomEvent::MemberListChanged { .. } => "member_list_changed",
            RoomEvent::MemberLeft { .. } => "member_left",
            RoomEvent::Signal { .. } => "signal",
            RoomEvent::LinkStateChanged { .. } => "link_state_changed",
            RoomEvent::Kicked { .. } => "kicked",
            RoomEvent::Muted { .. } => "muted",
            RoomEvent::AdminChanged { .. } => "admin_changed",
            RoomEvent::MicRequested { .. } => "mic_requested",
            RoomEvent::MicGranted { .. } => "mic_granted",
            RoomEvent::RoomClosed { .. } => "room_closed",
        }
    }
}

/// Synchronous, non-blocking event queue used while room state is mutated.
pub trait Outbox {
    /// Queue `event` for `to`. Never waits.
    fn push(&mut self, to: ParticipantId, event: RoomEvent) -> Result<(), DeliveryError>;

    /// Close the delivery channel of a participant removed from the room.
    fn release(&mut self, participant: ParticipantId);
}

/// Transport that carries events to clients (WebSocket sessions in the binary).
#[async_trait]
pub trait EventSink: Send + Sync {
    async fn deliver(&self, to: ParticipantId, event: RoomEvent) -> Result<(), DeliveryError>;
}


#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_event_wire_shape() {
        let event = RoomEvent::LinkStateChanged {
            peer_id: ParticipantId::from_u128(2),
            state: LinkState::Negotiating,
            role: LinkRole::Answerer,
            failure: None,
        };
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(
            value,
            json!({
                "event": "link_state_changed",
                "peerId": "00000000-0000-0000-0000-000000000002",
                "state": "negotiating",
                "role": "answerer",
            })
        );
        assert_eq!(event.name(), "link_state_changed");
    }

    #[test]
    fn test_signal_payload_is_untouched() {
        let payload = json!({"type": "offer", "sdp": "v=0\r\n", "nested": [1, 2, 3]});
        let event = RoomEvent::Signal {
            sender_id: ParticipantId::from_u128(1),
            kind: SignalKind::Offer,
            payload: payload.clone(),
        };
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["payload"], payload);
        assert_eq!(value["senderId"], json!("00000000-0000-0000-0000-000000000001"));
    }

    #[test]
    fn test_failure_serialized_when_present() {
        let event = RoomEvent::LinkStateChanged {
            peer_id: ParticipantId::from_u128(1),
            state: LinkState::Failed,
            role: LinkRole::Initiator,
            failure: Some(LinkFailure::Timeout),
        };
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["failure"], json!("timeout"));
    }

    #[test]
    fn test_reason_wire_names() {
        let event = RoomEvent::MemberLeft {
            participant_id: ParticipantId::from_u128(1),
            reason: LeaveReason::Kicked,
        };
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["reason"], json!("kicked"));

        let event = RoomEvent::RoomClosed {
            reason: RoomCloseReason::EndedByAdmin,
        };
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value, json!({"event": "room_closed", "reason": "ended_by_admin"}));
    }
}
