//! Signal relay between the two ends of a peer link.
//!
//! Payloads are opaque: they are routed by the envelope's sender, target and
//! kind, and delivered byte-for-byte. Rejections go back to the sender only.

use crate::errors::MeshError;
use crate::events::{Outbox, RoomEvent};
use crate::link::{LinkKey, LinkState, SignalKind, Transition};
use crate::observability::metrics;
use crate::room_state::{notify_link_ends, RoomState};

use common::types::{ParticipantId, RoomId};
use tokio::time::Instant;
use tracing::debug;

/// One relayed negotiation message.
#[derive(Debug, Clone, PartialEq)]
pub struct SignalEnvelope {
    pub sender: ParticipantId,
    pub target: ParticipantId,
    pub room: RoomId,
    pub kind: SignalKind,
    pub payload: serde_json::Value,
}

impl SignalEnvelope {
    /// A candidate without content marks the end of that side's candidates.
    #[must_use]
    pub fn is_end_of_candidates(&self) -> bool {
        self.kind == SignalKind::Candidate
            && match &self.payload {
                serde_json::Value::Null => true,
                serde_json::Value::String(s) => s.is_empty(),
                serde_json::Value::Object(map) => map
                    .get("candidate")
                    .map_or(map.is_empty(), |c| c.as_str().is_some_and(str::is_empty)),
                _ => false,
            }
    }
}

/// What a successful relay did to the link.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RelayOutcome {
    pub link: LinkKey,
    pub transition: Option<Transition>,
}

impl RoomState {
    /// Validate and deliver `envelope` to its target.
    ///
    /// The link only advances once the payload is queued for the target, so a
    /// failed delivery leaves negotiation where it was.
    pub fn relay(
        &mut self,
        envelope: SignalEnvelope,
        now: Instant,
        outbox: &mut impl Outbox,
    ) -> Result<RelayOutcome, MeshError> {
        if envelope.room != self.room_id || self.closed {
            return Err(MeshError::RoomNotFound(envelope.room.to_string()));
        }
        if !self.roster.contains(envelope.sender) {
            return Err(MeshError::ParticipantNotFound(envelope.sender.to_string()));
        }
        if !self.roster.contains(envelope.target) {
            return Err(MeshError::TargetNotInRoom(envelope.target.to_string()));
        }
        let key = LinkKey::between(envelope.sender, envelope.target).ok_or_else(|| {
            MeshError::InvalidTarget("Cannot send a signal to yourself".to_string())
        })?;

        let mut link = self
            .links
            .get(&key)
            .cloned()
            .ok_or_else(|| MeshError::LinkClosed(key.to_string()))?;

        let end_of_candidates = envelope.is_end_of_candidates();
        let transition = link
            .on_signal(envelope.sender, envelope.kind, now)
            .map_err(|e| e.into_mesh_error(key))?;

        outbox.push(
            envelope.target,
            RoomEvent::Signal {
                sender_id: envelope.sender,
                kind: envelope.kind,
                payload: envelope.payload,
            },
        )?;

        metrics::record_signal_relayed(envelope.kind);
        if let Some(t) = transition {
            metrics::record_link_transition(t.to);
            if let Some(elapsed) = t.negotiated_in {
                metrics::record_negotiation_duration(elapsed);
            }
            notify_link_ends(&link, None, outbox);
        }

        debug!(
            target: "mesh.room",
            room_id = %self.room_id,
            link = %key,
            kind = envelope.kind.as_str(),
            end_of_candidates,
            state = link.state().as_str(),
            "Signal relayed"
        );

        self.links.insert(key, link);

        Ok(RelayOutcome {
            link: key,
            transition,
        })
    }

    /// Current state of the link between two members, if one exists.
    #[must_use]
    pub fn link_state(&self, a: ParticipantId, b: ParticipantId) -> Option<LinkState> {
        self.link(a, b).map(crate::link::PeerLink::state)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::arbiter::LinkRole;
    use crate::events::testing::RecordingOutbox;
    use crate::events::LeaveReason;
    use crate::room_state::RoomSettings;
    use crate::roster::ParticipantProfile;
    use serde_json::json;

    fn pid(n: u128) -> ParticipantId {
        ParticipantId::from_u128(n)
    }

    fn room_with(members: &[u128], outbox: &mut RecordingOutbox) -> RoomState {
        let (first, rest) = members.split_first().unwrap();
        let mut room = RoomState::open(
            RoomId::new(),
            "demo",
            ParticipantProfile::new(pid(*first), "first"),
            RoomSettings::default(),
            outbox,
        )
        .unwrap();
        for n in rest {
            room.join(
                ParticipantProfile::new(pid(*n), "member"),
                Instant::now(),
                outbox,
            )
            .unwrap();
        }
        outbox.clear();
        room
    }

    fn envelope(room: &RoomState, from: u128, to: u128, kind: SignalKind) -> SignalEnvelope {
        SignalEnvelope {
            sender: pid(from),
            target: pid(to),
            room: room.room_id(),
            kind,
            payload: json!({"sdp": format!("{from}->{to}")}),
        }
    }

    #[test]
    fn test_relay_delivers_payload_unmodified() {
        let mut outbox = RecordingOutbox::default();
        let mut room = room_with(&[1, 2], &mut outbox);

        let payload = json!({"type": "offer", "sdp": "v=0\r\no=- 46117 2 IN IP4 127.0.0.1\r\n"});
        let env = SignalEnvelope {
            payload: payload.clone(),
            ..envelope(&room, 2, 1, SignalKind::Offer)
        };
        room.relay(env, Instant::now(), &mut outbox).unwrap();

        assert_eq!(
            outbox.events_for(pid(1)),
            vec![&RoomEvent::Signal {
                sender_id: pid(2),
                kind: SignalKind::Offer,
                payload,
            }]
        );
        assert!(outbox.events_for(pid(2)).is_empty());
    }

    #[test]
    fn test_full_negotiation_reaches_connected() {
        let mut outbox = RecordingOutbox::default();
        let mut room = room_with(&[1, 2], &mut outbox);
        let now = Instant::now();

        room.relay(envelope(&room, 2, 1, SignalKind::Offer), now, &mut outbox)
            .unwrap();
        room.relay(envelope(&room, 1, 2, SignalKind::Answer), now, &mut outbox)
            .unwrap();
        room.relay(envelope(&room, 2, 1, SignalKind::Candidate), now, &mut outbox)
            .unwrap();
        let outcome = room
            .relay(envelope(&room, 1, 2, SignalKind::Candidate), now, &mut outbox)
            .unwrap();

        assert_eq!(outcome.transition.map(|t| t.to), Some(LinkState::Connected));
        assert_eq!(room.link_state(pid(1), pid(2)), Some(LinkState::Connected));

        // Both ends hear about it, each with their own role
        assert!(outbox.events_for(pid(1)).iter().any(|e| matches!(
            e,
            RoomEvent::LinkStateChanged { state: LinkState::Connected, role: LinkRole::Answerer, .. }
        )));
        assert!(outbox.events_for(pid(2)).iter().any(|e| matches!(
            e,
            RoomEvent::LinkStateChanged { state: LinkState::Connected, role: LinkRole::Initiator, .. }
        )));
    }

    #[test]
    fn test_glare_rejected_without_delivery() {
        let mut outbox = RecordingOutbox::default();
        let mut room = room_with(&[1, 2], &mut outbox);

        let result = room.relay(envelope(&room, 1, 2, SignalKind::Offer), Instant::now(), &mut outbox);
        assert!(matches!(result, Err(MeshError::NegotiationViolation(_))));
        assert!(outbox.sent.is_empty());
    }

    #[test]
    fn test_validation_order() {
        let mut outbox = RecordingOutbox::default();
        let mut room = room_with(&[1, 2], &mut outbox);
        let now = Instant::now();

        let wrong_room = SignalEnvelope {
            room: RoomId::new(),
            ..envelope(&room, 2, 1, SignalKind::Offer)
        };
        assert!(matches!(
            room.relay(wrong_room, now, &mut outbox),
            Err(MeshError::RoomNotFound(_))
        ));
        assert!(matches!(
            room.relay(envelope(&room, 9, 1, SignalKind::Offer), now, &mut outbox),
            Err(MeshError::ParticipantNotFound(_))
        ));
        assert!(matches!(
            room.relay(envelope(&room, 2, 9, SignalKind::Offer), now, &mut outbox),
            Err(MeshError::TargetNotInRoom(_))
        ));
        assert!(matches!(
            room.relay(envelope(&room, 2, 2, SignalKind::Other), now, &mut outbox),
            Err(MeshError::InvalidTarget(_))
        ));
        assert!(outbox.sent.is_empty());
    }

    #[test]
    fn test_signal_to_departed_member_is_rejected() {
        let mut outbox = RecordingOutbox::default();
        let mut room = room_with(&[1, 2, 3], &mut outbox);
        room.leave(pid(2), LeaveReason::Left, &mut outbox).unwrap();
        outbox.clear();

        let result = room.relay(envelope(&room, 3, 2, SignalKind::Offer), Instant::now(), &mut outbox);
        assert!(matches!(result, Err(MeshError::TargetNotInRoom(_))));
        assert!(outbox.sent.is_empty());
    }

    #[test]
    fn test_signal_on_failed_link_is_dropped() {
        let mut outbox = RecordingOutbox::default();
        let mut room = room_with(&[1, 2], &mut outbox);
        room.report_link_failure(pid(1), pid(2), &mut outbox).unwrap();
        outbox.clear();

        let result = room.relay(envelope(&room, 2, 1, SignalKind::Offer), Instant::now(), &mut outbox);
        assert!(matches!(result, Err(MeshError::LinkClosed(_))));
        assert!(outbox.sent.is_empty());
    }

    #[test]
    fn test_delivery_failure_leaves_link_unchanged() {
        let mut outbox = RecordingOutbox::failing_for(pid(1));
        let mut room = room_with(&[1, 2], &mut outbox);

        let result = room.relay(envelope(&room, 2, 1, SignalKind::Offer), Instant::now(), &mut outbox);
        assert!(matches!(result, Err(MeshError::DeliveryFailed(_))));

        // Offer was never applied, so an answer is still out of order
        outbox.failing.clear();
        let result = room.relay(envelope(&room, 1, 2, SignalKind::Answer), Instant::now(), &mut outbox);
        assert!(matches!(result, Err(MeshError::NegotiationViolation(_))));
    }

    #[test]
    fn test_end_of_candidates_marker() {
        let room_id = RoomId::new();
        let base = SignalEnvelope {
            sender: pid(1),
            target: pid(2),
            room: room_id,
            kind: SignalKind::Candidate,
            payload: json!(null),
        };
        assert!(base.is_end_of_candidates());
        assert!(SignalEnvelope { payload: json!(""), ..base.clone() }.is_end_of_candidates());
        assert!(SignalEnvelope { payload: json!({"candidate": ""}), ..base.clone() }.is_end_of_candidates());
        assert!(!SignalEnvelope {
            payload: json!({"candidate": "candidate:1 1 udp 2122260223 10.0.0.1 54321 typ host"}),
            ..base.clone()
        }
        .is_end_of_candidates());
        assert!(!SignalEnvelope { kind: SignalKind::Offer, ..base }.is_end_of_candidates());
    }
}
