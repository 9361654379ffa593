//! Admin-only room operations.
//!
//! Every operation passes through [`RoomState::authorize`] first; a rejected
//! request changes nothing.

use crate::errors::MeshError;
use crate::events::{LeaveReason, Outbox, RoomCloseReason, RoomEvent};
use crate::link::LinkKey;
use crate::room_state::{notify, LeaveOutcome, RoomState};

use common::types::{MediaKind, ParticipantId};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

/// Action an admin can take on another member.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AdminAction {
    MuteAudio,
    MuteVideo,
    Kick,
    /// Let a member speak: unmutes their audio.
    GrantMic,
}

impl AdminAction {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            AdminAction::MuteAudio => "mute_audio",
            AdminAction::MuteVideo => "mute_video",
            AdminAction::Kick => "kick",
            AdminAction::GrantMic => "grant_mic",
        }
    }
}

/// Result of an applied admin action.
#[derive(Debug, Clone)]
pub enum AdminOutcome {
    Muted { kind: MediaKind, changed: bool },
    Kicked(LeaveOutcome),
    MicGranted { changed: bool },
}

impl RoomState {
    /// Fail with `NotAuthorized` unless `requester` is the current admin.
    pub fn authorize(&self, requester: ParticipantId, action: &str) -> Result<(), MeshError> {
        if self.roster.is_admin(requester) {
            Ok(())
        } else {
            Err(MeshError::NotAuthorized(format!(
                "Only the room admin can {action}"
            )))
        }
    }

    /// Apply `action` from `requester` to `target`.
    pub fn admin_action(
        &mut self,
        requester: ParticipantId,
        target: ParticipantId,
        action: AdminAction,
        outbox: &mut impl Outbox,
    ) -> Result<AdminOutcome, MeshError> {
        match action {
            AdminAction::MuteAudio => self
                .mute(requester, target, MediaKind::Audio, outbox)
                .map(|changed| AdminOutcome::Muted {
                    kind: MediaKind::Audio,
                    changed,
                }),
            AdminAction::MuteVideo => self
                .mute(requester, target, MediaKind::Video, outbox)
                .map(|changed| AdminOutcome::Muted {
                    kind: MediaKind::Video,
                    changed,
                }),
            AdminAction::Kick => self.kick(requester, target, outbox).map(AdminOutcome::Kicked),
            AdminAction::GrantMic => self
                .grant_mic(requester, target, outbox)
                .map(|changed| AdminOutcome::MicGranted { changed }),
        }
    }

    /// Ask the admin for the floor on behalf of `requester`.
    pub fn request_mic(
        &self,
        requester: ParticipantId,
        outbox: &mut impl Outbox,
    ) -> Result<(), MeshError> {
        let member = self
            .roster
            .get(requester)
            .ok_or_else(|| MeshError::ParticipantNotFound(requester.to_string()))?;
        let admin = self
            .roster
            .admin()
            .ok_or_else(|| MeshError::Internal("room has no admin".to_string()))?;
        if admin == requester {
            return Err(MeshError::InvalidTarget(
                "The admin does not need to request the mic".to_string(),
            ));
        }

        notify(
            outbox,
            admin,
            RoomEvent::MicRequested {
                participant_id: requester,
                display_name: member.display_name.clone(),
            },
        );
        debug!(
            target: "mesh.room",
            room_id = %self.room_id,
            participant_id = %requester,
            "Mic requested"
        );
        Ok(())
    }

    /// Unmute `target`'s audio on behalf of the admin and tell the room.
    pub fn grant_mic(
        &mut self,
        requester: ParticipantId,
        target: ParticipantId,
        outbox: &mut impl Outbox,
    ) -> Result<bool, MeshError> {
        self.authorize(requester, "grant the mic")?;
        if !self.roster.contains(target) {
            return Err(MeshError::ParticipantNotFound(target.to_string()));
        }

        let changed = self.roster.set_muted(target, MediaKind::Audio, false)?;
        self.broadcast(
            &RoomEvent::MicGranted {
                participant_id: target,
                by: requester,
            },
            outbox,
        );
        if changed {
            self.broadcast(
                &RoomEvent::MemberListChanged {
                    members: self.roster.snapshot(),
                },
                outbox,
            );
        }
        Ok(changed)
    }

    /// Mute `target`'s `kind` on behalf of the admin.
    pub fn mute(
        &mut self,
        requester: ParticipantId,
        target: ParticipantId,
        kind: MediaKind,
        outbox: &mut impl Outbox,
    ) -> Result<bool, MeshError> {
        self.authorize(requester, "mute members")?;
        if !self.roster.contains(target) {
            return Err(MeshError::ParticipantNotFound(target.to_string()));
        }

        let changed = self.roster.set_muted(target, kind, true)?;
        notify(
            outbox,
            target,
            RoomEvent::Muted {
                kind,
                by: requester,
            },
        );
        if changed {
            self.broadcast(
                &RoomEvent::MemberListChanged {
                    members: self.roster.snapshot(),
                },
                outbox,
            );
        }
        Ok(changed)
    }

    /// Remove `target` from the room, closing all of its links.
    ///
    /// The target is told once, then its delivery channel is released.
    pub fn kick(
        &mut self,
        requester: ParticipantId,
        target: ParticipantId,
        outbox: &mut impl Outbox,
    ) -> Result<LeaveOutcome, MeshError> {
        self.authorize(requester, "remove members")?;
        if requester == target {
            return Err(MeshError::InvalidTarget(
                "Admins cannot remove themselves".to_string(),
            ));
        }
        if !self.roster.contains(target) {
            return Err(MeshError::ParticipantNotFound(target.to_string()));
        }

        notify(
            outbox,
            target,
            RoomEvent::Kicked {
                participant_id: target,
            },
        );
        let outcome = self.leave(target, LeaveReason::Kicked, outbox)?;
        outbox.release(target);

        info!(
            target: "mesh.room",
            room_id = %self.room_id,
            participant_id = %target,
            links_closed = outcome.closed_links.len(),
            "Participant removed by admin"
        );

        Ok(outcome)
    }

    /// End the room for everyone.
    pub fn end_room(
        &mut self,
        requester: ParticipantId,
        outbox: &mut impl Outbox,
    ) -> Result<Vec<LinkKey>, MeshError> {
        self.authorize(requester, "end the room")?;
        Ok(self.close_room(RoomCloseReason::EndedByAdmin, outbox))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::events::testing::RecordingOutbox;
    use crate::link::LinkState;
    use crate::room_state::RoomSettings;
    use crate::roster::ParticipantProfile;
    use common::types::RoomId;
    use tokio::time::Instant;

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

    #[test]
    fn test_kick_by_non_admin_changes_nothing() {
        let mut outbox = RecordingOutbox::default();
        let mut room = room_with(&[1, 2, 3], &mut outbox);

        let result = room.kick(pid(2), pid(3), &mut outbox);
        assert!(matches!(result, Err(MeshError::NotAuthorized(_))));
        assert_eq!(room.roster().len(), 3);
        assert_eq!(room.link_count(), 3);
        assert!(outbox.sent.is_empty());
    }

    #[test]
    fn test_kick_closes_target_links_only() {
        let mut outbox = RecordingOutbox::default();
        let mut room = room_with(&[1, 2, 3], &mut outbox);

        let outcome = room.kick(pid(1), pid(2), &mut outbox).unwrap();

        assert_eq!(outcome.closed_links.len(), 2);
        assert!(room.link(pid(1), pid(2)).is_none());
        assert!(room.link(pid(2), pid(3)).is_none());
        assert_eq!(
            room.link(pid(1), pid(3)).map(crate::link::PeerLink::state),
            Some(LinkState::Negotiating)
        );

        assert_eq!(
            outbox.events_for(pid(2)),
            vec![&RoomEvent::Kicked {
                participant_id: pid(2)
            }]
        );
        assert_eq!(outbox.released, vec![pid(2)]);
        assert!(outbox.events_for(pid(3)).iter().any(|e| matches!(
            e,
            RoomEvent::MemberLeft { reason: LeaveReason::Kicked, .. }
        )));
    }

    #[test]
    fn test_admin_cannot_kick_self() {
        let mut outbox = RecordingOutbox::default();
        let mut room = room_with(&[1, 2], &mut outbox);

        assert!(matches!(
            room.kick(pid(1), pid(1), &mut outbox),
            Err(MeshError::InvalidTarget(_))
        ));
        assert!(matches!(
            room.kick(pid(1), pid(7), &mut outbox),
            Err(MeshError::ParticipantNotFound(_))
        ));
    }

    #[test]
    fn test_mute_notifies_target_and_room() {
        let mut outbox = RecordingOutbox::default();
        let mut room = room_with(&[1, 2], &mut outbox);

        let outcome = room
            .admin_action(pid(1), pid(2), AdminAction::MuteAudio, &mut outbox)
            .unwrap();
        assert!(matches!(
            outcome,
            AdminOutcome::Muted { kind: MediaKind::Audio, changed: true }
        ));
        assert!(room.roster().get(pid(2)).unwrap().audio_muted);

        let to_target = outbox.events_for(pid(2));
        assert!(matches!(
            to_target.first(),
            Some(RoomEvent::Muted { kind: MediaKind::Audio, by }) if *by == pid(1)
        ));
        assert!(outbox
            .events_for(pid(1))
            .iter()
            .any(|e| matches!(e, RoomEvent::MemberListChanged { .. })));
    }

    #[test]
    fn test_mute_by_non_admin_rejected() {
        let mut outbox = RecordingOutbox::default();
        let mut room = room_with(&[1, 2], &mut outbox);

        let result = room.admin_action(pid(2), pid(1), AdminAction::MuteVideo, &mut outbox);
        assert!(matches!(result, Err(MeshError::NotAuthorized(_))));
        assert!(!room.roster().get(pid(1)).unwrap().video_muted);
    }

    #[test]
    fn test_grant_mic_by_non_admin_changes_nothing() {
        let mut outbox = RecordingOutbox::default();
        let mut room = room_with(&[1, 2, 3], &mut outbox);
        room.admin_action(pid(1), pid(3), AdminAction::MuteAudio, &mut outbox)
            .unwrap();
        outbox.clear();

        let result = room.admin_action(pid(2), pid(3), AdminAction::GrantMic, &mut outbox);
        assert!(matches!(result, Err(MeshError::NotAuthorized(_))));
        assert!(room.roster().get(pid(3)).unwrap().audio_muted);
        assert!(outbox.sent.is_empty());
    }

    #[test]
    fn test_grant_mic_unmutes_and_tells_room() {
        let mut outbox = RecordingOutbox::default();
        let mut room = room_with(&[1, 2, 3], &mut outbox);
        room.admin_action(pid(1), pid(2), AdminAction::MuteAudio, &mut outbox)
            .unwrap();
        outbox.clear();

        let outcome = room
            .admin_action(pid(1), pid(2), AdminAction::GrantMic, &mut outbox)
            .unwrap();
        assert!(matches!(outcome, AdminOutcome::MicGranted { changed: true }));
        assert!(!room.roster().get(pid(2)).unwrap().audio_muted);

        for member in [pid(1), pid(2), pid(3)] {
            assert!(matches!(
                outbox.events_for(member).first(),
                Some(RoomEvent::MicGranted { participant_id, by })
                    if *participant_id == pid(2) && *by == pid(1)
            ));
        }

        // Granting again is announced but changes nothing
        outbox.clear();
        let outcome = room
            .admin_action(pid(1), pid(2), AdminAction::GrantMic, &mut outbox)
            .unwrap();
        assert!(matches!(outcome, AdminOutcome::MicGranted { changed: false }));
        assert!(!outbox
            .events_for(pid(3))
            .iter()
            .any(|e| matches!(e, RoomEvent::MemberListChanged { .. })));
    }

    #[test]
    fn test_request_mic_reaches_admin_only() {
        let mut outbox = RecordingOutbox::default();
        let mut room = room_with(&[1, 2, 3], &mut outbox);

        room.request_mic(pid(3), &mut outbox).unwrap();
        assert_eq!(outbox.sent.len(), 1);
        assert!(matches!(
            outbox.events_for(pid(1)).first(),
            Some(RoomEvent::MicRequested { participant_id, display_name })
                if *participant_id == pid(3) && display_name == "member"
        ));

        assert!(matches!(
            room.request_mic(pid(1), &mut outbox),
            Err(MeshError::InvalidTarget(_))
        ));
        assert!(matches!(
            room.request_mic(pid(9), &mut outbox),
            Err(MeshError::ParticipantNotFound(_))
        ));

        // Requests follow the admin role when it moves
        outbox.clear();
        room.leave(pid(1), LeaveReason::Left, &mut outbox).unwrap();
        outbox.clear();
        room.request_mic(pid(3), &mut outbox).unwrap();
        assert_eq!(outbox.events_for(pid(2)).len(), 1);
    }

    #[test]
    fn test_end_room_requires_admin() {
        let mut outbox = RecordingOutbox::default();
        let mut room = room_with(&[1, 2], &mut outbox);

        assert!(matches!(
            room.end_room(pid(2), &mut outbox),
            Err(MeshError::NotAuthorized(_))
        ));
        assert!(!room.is_closed());

        let closed = room.end_room(pid(1), &mut outbox).unwrap();
        assert_eq!(closed.len(), 1);
        assert!(room.is_closed());
    }

    #[test]
    fn test_reassigned_admin_gains_rights() {
        let mut outbox = RecordingOutbox::default();
        let mut room = room_with(&[1, 2, 3], &mut outbox);
        room.leave(pid(1), LeaveReason::Left, &mut outbox).unwrap();

        room.kick(pid(2), pid(3), &mut outbox).unwrap();
        assert_eq!(room.roster().len(), 1);
    }
}
