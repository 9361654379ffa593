//! Participant roster for one room.
//!
//! Members are kept in join order. The admin is always a current member
//! while the roster is non-empty.

use crate::errors::MeshError;

use chrono::{DateTime, Utc};
use common::types::{MediaKind, ParticipantId, SourceToken};
use serde::Serialize;

/// Identity a participant brings to a room.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParticipantProfile {
    pub id: ParticipantId,
    pub display_name: String,
}

impl ParticipantProfile {
    #[must_use]
    pub fn new(id: ParticipantId, display_name: impl Into<String>) -> Self {
        Self {
            id,
            display_name: display_name.into(),
        }
    }
}

/// A room member.
#[derive(Debug, Clone)]
pub struct Participant {
    pub id: ParticipantId,
    pub display_name: String,
    pub is_admin: bool,
    pub audio_muted: bool,
    pub video_muted: bool,
    /// Camera/microphone source.
    pub primary_source: SourceToken,
    /// Temporary replacement (e.g. screen share), if active.
    pub substitute_source: Option<SourceToken>,
    /// Position in join order; lower joined earlier.
    pub join_seq: u64,
    pub joined_at: DateTime<Utc>,
}

impl Participant {
    /// Source currently sent on this participant's links.
    #[must_use]
    pub fn outgoing_source(&self) -> SourceToken {
        self.substitute_source.unwrap_or(self.primary_source)
    }

    #[must_use]
    pub fn to_info(&self) -> MemberInfo {
        MemberInfo {
            participant_id: self.id,
            display_name: self.display_name.clone(),
            is_admin: self.is_admin,
            audio_muted: self.audio_muted,
            video_muted: self.video_muted,
        }
    }
}

/// Roster entry as sent to clients.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MemberInfo {
    pub participant_id: ParticipantId,
    pub display_name: String,
    pub is_admin: bool,
    pub audio_muted: bool,
    pub video_muted: bool,
}

/// Result of removing a member.
#[derive(Debug, Clone)]
pub struct RemovedMember {
    pub participant: Participant,
    /// Set when the removed member held the admin role and someone remains.
    pub new_admin: Option<ParticipantId>,
}

/// Ordered member list of a room.
#[derive(Debug, Default)]
pub struct Roster {
    members: Vec<Participant>,
    next_seq: u64,
    admin: Option<ParticipantId>,
}

impl Roster {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a member. The first member becomes admin.
    ///
    /// Returns the join-ordered snapshot after the add.
    pub fn add(&mut self, profile: ParticipantProfile) -> Result<Vec<MemberInfo>, MeshError> {
        if self.contains(profile.id) {
            return Err(MeshError::Conflict(
                "Participant is already in this room".to_string(),
            ));
        }

        let is_admin = self.admin.is_none();
        if is_admin {
            self.admin = Some(profile.id);
        }

        self.members.push(Participant {
            id: profile.id,
            display_name: profile.display_name,
            is_admin,
            audio_muted: false,
            video_muted: false,
            primary_source: SourceToken::INITIAL,
            substitute_source: None,
            join_seq: self.next_seq,
            joined_at: Utc::now(),
        });
        self.next_seq += 1;

        Ok(self.snapshot())
    }

    /// Remove a member, handing the admin role to the earliest-joined
    /// remaining member if needed.
    pub fn remove(&mut self, id: ParticipantId) -> Result<RemovedMember, MeshError> {
        let index = self
            .members
            .iter()
            .position(|p| p.id == id)
            .ok_or_else(|| MeshError::ParticipantNotFound(id.to_string()))?;

        let mut participant = self.members.remove(index);
        let mut new_admin = None;

        if self.admin == Some(id) {
            participant.is_admin = false;
            self.admin = None;
            // Members stay in join order, so the first one joined earliest.
            if let Some(next) = self.members.first().map(|p| p.id) {
                self.set_admin(next)?;
                new_admin = Some(next);
            }
        }

        Ok(RemovedMember {
            participant,
            new_admin,
        })
    }

    /// Move the admin role to `id`.
    pub fn set_admin(&mut self, id: ParticipantId) -> Result<(), MeshError> {
        if !self.contains(id) {
            return Err(MeshError::ParticipantNotFound(id.to_string()));
        }
        for member in &mut self.members {
            member.is_admin = member.id == id;
        }
        self.admin = Some(id);
        Ok(())
    }

    /// Set a mute flag. Returns whether it changed.
    pub fn set_muted(
        &mut self,
        id: ParticipantId,
        kind: MediaKind,
        muted: bool,
    ) -> Result<bool, MeshError> {
        let member = self
            .get_mut(id)
            .ok_or_else(|| MeshError::ParticipantNotFound(id.to_string()))?;
        let flag = match kind {
            MediaKind::Audio => &mut member.audio_muted,
            MediaKind::Video => &mut member.video_muted,
        };
        let changed = *flag != muted;
        *flag = muted;
        Ok(changed)
    }

    #[must_use]
    pub fn get(&self, id: ParticipantId) -> Option<&Participant> {
        self.members.iter().find(|p| p.id == id)
    }

    pub fn get_mut(&mut self, id: ParticipantId) -> Option<&mut Participant> {
        self.members.iter_mut().find(|p| p.id == id)
    }

    #[must_use]
    pub fn contains(&self, id: ParticipantId) -> bool {
        self.members.iter().any(|p| p.id == id)
    }

    #[must_use]
    pub fn admin(&self) -> Option<ParticipantId> {
        self.admin
    }

    #[must_use]
    pub fn is_admin(&self, id: ParticipantId) -> bool {
        self.admin == Some(id)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.members.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    /// Member ids in join order.
    pub fn ids(&self) -> impl Iterator<Item = ParticipantId> + '_ {
        self.members.iter().map(|p| p.id)
    }

    #[must_use]
    pub fn snapshot(&self) -> Vec<MemberInfo> {
        self.members.iter().map(Participant::to_info).collect()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    fn profile(n: u128) -> ParticipantProfile {
        ParticipantProfile::new(ParticipantId::from_u128(n), format!("P{n}"))
    }

    #[test]
    fn test_first_member_becomes_admin() {
        let mut roster = Roster::new();
        let snapshot = roster.add(profile(1)).unwrap();

        assert_eq!(snapshot.len(), 1);
        assert!(snapshot.first().unwrap().is_admin);
        assert_eq!(roster.admin(), Some(ParticipantId::from_u128(1)));

        let snapshot = roster.add(profile(2)).unwrap();
        assert_eq!(snapshot.len(), 2);
        assert!(!snapshot.get(1).unwrap().is_admin);
    }

    #[test]
    fn test_snapshot_keeps_join_order() {
        let mut roster = Roster::new();
        // Join order deliberately differs from id order
        roster.add(profile(9)).unwrap();
        roster.add(profile(3)).unwrap();
        let snapshot = roster.add(profile(5)).unwrap();

        let ids: Vec<_> = snapshot.iter().map(|m| m.participant_id).collect();
        assert_eq!(
            ids,
            vec![
                ParticipantId::from_u128(9),
                ParticipantId::from_u128(3),
                ParticipantId::from_u128(5)
            ]
        );
    }

    #[test]
    fn test_duplicate_add_conflicts() {
        let mut roster = Roster::new();
        roster.add(profile(1)).unwrap();
        assert!(matches!(roster.add(profile(1)), Err(MeshError::Conflict(_))));
        assert_eq!(roster.len(), 1);
    }

    #[test]
    fn test_admin_removal_promotes_earliest_joined() {
        let mut roster = Roster::new();
        roster.add(profile(1)).unwrap();
        roster.add(profile(7)).unwrap();
        roster.add(profile(4)).unwrap();

        let removed = roster.remove(ParticipantId::from_u128(1)).unwrap();
        assert_eq!(removed.new_admin, Some(ParticipantId::from_u128(7)));
        assert!(roster.get(ParticipantId::from_u128(7)).unwrap().is_admin);
        assert!(!roster.get(ParticipantId::from_u128(4)).unwrap().is_admin);
    }

    #[test]
    fn test_non_admin_removal_keeps_admin() {
        let mut roster = Roster::new();
        roster.add(profile(1)).unwrap();
        roster.add(profile(2)).unwrap();

        let removed = roster.remove(ParticipantId::from_u128(2)).unwrap();
        assert_eq!(removed.new_admin, None);
        assert_eq!(roster.admin(), Some(ParticipantId::from_u128(1)));
    }

    #[test]
    fn test_last_removal_clears_admin() {
        let mut roster = Roster::new();
        roster.add(profile(1)).unwrap();
        let removed = roster.remove(ParticipantId::from_u128(1)).unwrap();

        assert_eq!(removed.new_admin, None);
        assert!(roster.is_empty());
        assert_eq!(roster.admin(), None);
    }

    #[test]
    fn test_remove_unknown() {
        let mut roster = Roster::new();
        assert!(matches!(
            roster.remove(ParticipantId::from_u128(1)),
            Err(MeshError::ParticipantNotFound(_))
        ));
    }

    #[test]
    fn test_set_muted_reports_change() {
        let mut roster = Roster::new();
        roster.add(profile(1)).unwrap();
        let id = ParticipantId::from_u128(1);

        assert!(roster.set_muted(id, MediaKind::Audio, true).unwrap());
        assert!(!roster.set_muted(id, MediaKind::Audio, true).unwrap());
        assert!(roster.get(id).unwrap().audio_muted);
        assert!(!roster.get(id).unwrap().video_muted);
    }

    #[test]
    fn test_outgoing_source_prefers_substitute() {
        let mut roster = Roster::new();
        roster.add(profile(1)).unwrap();
        let member = roster.get_mut(ParticipantId::from_u128(1)).unwrap();

        assert_eq!(member.outgoing_source(), SourceToken::INITIAL);
        member.substitute_source = Some(SourceToken(3));
        assert_eq!(member.outgoing_source(), SourceToken(3));
    }
}
