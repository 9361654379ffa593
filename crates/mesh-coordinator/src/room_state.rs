//! Room state owned by a single room actor.
//!
//! `RoomState` is synchronous: every operation mutates the roster and link
//! table in one step and writes its notifications into an [`Outbox`]. The
//! actor around it provides serialization; nothing here awaits.
//!
//! Relay, track substitution and admin operations extend this type from
//! their own modules.

use crate::arbiter::LinkRole;
use crate::config::{
    DEFAULT_DELIVERY_BUFFER, DEFAULT_LINK_SWEEP_INTERVAL_MS, DEFAULT_MAX_PARTICIPANTS_PER_ROOM,
    DEFAULT_NEGOTIATION_TIMEOUT_SECONDS,
};
use crate::errors::MeshError;
use crate::events::{LeaveReason, Outbox, RoomCloseReason, RoomEvent};
use crate::link::{LinkFailure, LinkKey, LinkSnapshot, LinkState, PeerLink};
use crate::observability::metrics;
use crate::roster::{MemberInfo, Participant, ParticipantProfile, Roster};

use chrono::{DateTime, Utc};
use common::types::{MediaKind, ParticipantId, RoomId};
use serde::Serialize;
use std::collections::BTreeMap;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Per-room limits and timings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RoomSettings {
    pub max_participants: usize,
    pub negotiation_timeout: Duration,
    pub sweep_interval: Duration,
    pub delivery_buffer: usize,
}

impl Default for RoomSettings {
    fn default() -> Self {
        Self {
            max_participants: DEFAULT_MAX_PARTICIPANTS_PER_ROOM,
            negotiation_timeout: Duration::from_secs(DEFAULT_NEGOTIATION_TIMEOUT_SECONDS),
            sweep_interval: Duration::from_millis(DEFAULT_LINK_SWEEP_INTERVAL_MS),
            delivery_buffer: DEFAULT_DELIVERY_BUFFER,
        }
    }
}

/// Trim a room name, rejecting blank ones.
pub fn validate_room_name(name: &str) -> Result<String, MeshError> {
    let trimmed = name.trim();
    if trimmed.is_empty() {
        return Err(MeshError::NameInvalid);
    }
    Ok(trimmed.to_string())
}

/// Result of a successful join.
#[derive(Debug, Clone)]
pub struct JoinOutcome {
    pub admin_id: ParticipantId,
    pub members: Vec<MemberInfo>,
    /// One new link per pre-existing member, in their join order.
    pub links_created: Vec<LinkKey>,
}

/// Result of removing a member.
#[derive(Debug, Clone)]
pub struct LeaveOutcome {
    pub removed: Participant,
    pub closed_links: Vec<LinkKey>,
    pub new_admin: Option<ParticipantId>,
    pub room_empty: bool,
}

/// Point-in-time view of a room.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomSnapshot {
    pub room_id: RoomId,
    pub name: String,
    pub admin_id: Option<ParticipantId>,
    pub created_at: DateTime<Utc>,
    pub members: Vec<MemberInfo>,
    pub links: Vec<LinkSnapshot>,
}

/// Roster and link table of one room.
#[derive(Debug)]
pub struct RoomState {
    pub(crate) room_id: RoomId,
    pub(crate) name: String,
    pub(crate) created_at: DateTime<Utc>,
    pub(crate) roster: Roster,
    /// At most one link per unordered pair.
    pub(crate) links: BTreeMap<LinkKey, PeerLink>,
    pub(crate) settings: RoomSettings,
    pub(crate) closed: bool,
}

impl RoomState {
    /// Create a room with `creator` as its only member and admin.
    pub fn open(
        room_id: RoomId,
        name: &str,
        creator: ParticipantProfile,
        settings: RoomSettings,
        outbox: &mut impl Outbox,
    ) -> Result<Self, MeshError> {
        let name = validate_room_name(name)?;
        let creator_id = creator.id;

        let mut roster = Roster::new();
        let members = roster.add(creator)?;

        let room = Self {
            room_id,
            name,
            created_at: Utc::now(),
            roster,
            links: BTreeMap::new(),
            settings,
            closed: false,
        };

        notify(
            outbox,
            creator_id,
            RoomEvent::RoomCreated {
                room_id,
                admin_id: creator_id,
            },
        );
        notify(
            outbox,
            creator_id,
            RoomEvent::Joined {
                room_id,
                admin_id: creator_id,
                members,
            },
        );

        Ok(room)
    }

    /// Add a member and start negotiating a link to every existing member.
    ///
    /// Links between existing members are not touched.
    pub fn join(
        &mut self,
        profile: ParticipantProfile,
        now: Instant,
        outbox: &mut impl Outbox,
    ) -> Result<JoinOutcome, MeshError> {
        if self.closed {
            return Err(MeshError::RoomNotFound(self.room_id.to_string()));
        }
        if self.roster.len() >= self.settings.max_participants {
            return Err(MeshError::RoomFull(format!(
                "{} participants",
                self.settings.max_participants
            )));
        }

        let joiner = profile.id;
        let existing: Vec<ParticipantId> = self.roster.ids().collect();
        let members = self.roster.add(profile)?;
        let admin_id = self
            .roster
            .admin()
            .ok_or_else(|| MeshError::Internal("room has no admin".to_string()))?;

        notify(
            outbox,
            joiner,
            RoomEvent::Joined {
                room_id: self.room_id,
                admin_id,
                members: members.clone(),
            },
        );
        self.broadcast_except(
            joiner,
            &RoomEvent::MemberListChanged {
                members: members.clone(),
            },
            outbox,
        );

        let mut links_created = Vec::with_capacity(existing.len());
        for peer in existing {
            let Some(key) = LinkKey::between(joiner, peer) else {
                continue;
            };
            let mut link = PeerLink::new(key);
            // Each end starts from whatever it is currently sending, which
            // may already be a substitute.
            for end in [joiner, peer] {
                if let Some(member) = self.roster.get(end) {
                    let _ = link.record_source(end, member.outgoing_source());
                }
            }
            if link.begin_negotiation(now).is_ok() {
                metrics::record_link_transition(LinkState::Negotiating);
                notify_link_ends(&link, None, outbox);
            }
            self.links.insert(key, link);
            links_created.push(key);
        }

        debug!(
            target: "mesh.room",
            room_id = %self.room_id,
            participant_id = %joiner,
            links = links_created.len(),
            "Participant joined"
        );

        Ok(JoinOutcome {
            admin_id,
            members,
            links_created,
        })
    }

    /// Remove a member and close exactly that member's links.
    pub fn leave(
        &mut self,
        participant: ParticipantId,
        reason: LeaveReason,
        outbox: &mut impl Outbox,
    ) -> Result<LeaveOutcome, MeshError> {
        let removed = self.roster.remove(participant)?;
        let closed_links = self.close_links_of(participant, outbox);

        if !self.roster.is_empty() {
            self.broadcast(
                &RoomEvent::MemberLeft {
                    participant_id: participant,
                    reason,
                },
                outbox,
            );
            self.broadcast(
                &RoomEvent::MemberListChanged {
                    members: self.roster.snapshot(),
                },
                outbox,
            );
        }

        if let Some(admin_id) = removed.new_admin {
            info!(
                target: "mesh.room",
                room_id = %self.room_id,
                admin_id = %admin_id,
                "Admin role reassigned"
            );
            self.broadcast(&RoomEvent::AdminChanged { admin_id }, outbox);
        }

        let room_empty = self.roster.is_empty();
        if room_empty {
            self.closed = true;
        }

        Ok(LeaveOutcome {
            removed: removed.participant,
            closed_links,
            new_admin: removed.new_admin,
            room_empty,
        })
    }

    /// Change the caller's own mute flag and broadcast the roster if it changed.
    pub fn set_self_muted(
        &mut self,
        participant: ParticipantId,
        kind: MediaKind,
        muted: bool,
        outbox: &mut impl Outbox,
    ) -> Result<bool, MeshError> {
        let changed = self.roster.set_muted(participant, kind, muted)?;
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

    /// Mark the link between `reporter` and `peer` as failed by the transport.
    ///
    /// Other links are unaffected.
    pub fn report_link_failure(
        &mut self,
        reporter: ParticipantId,
        peer: ParticipantId,
        outbox: &mut impl Outbox,
    ) -> Result<LinkKey, MeshError> {
        if !self.roster.contains(reporter) {
            return Err(MeshError::ParticipantNotFound(reporter.to_string()));
        }
        if !self.roster.contains(peer) {
            return Err(MeshError::TargetNotInRoom(peer.to_string()));
        }
        let key = LinkKey::between(reporter, peer)
            .ok_or_else(|| MeshError::InvalidTarget("Cannot report a link to yourself".to_string()))?;
        let link = self
            .links
            .remove(&key)
            .ok_or_else(|| MeshError::LinkClosed(key.to_string()))?;

        fail_link(link, LinkFailure::TransportFailure, outbox);
        Ok(key)
    }

    /// Fail every link negotiating longer than the configured timeout.
    pub fn expire_negotiations(&mut self, now: Instant, outbox: &mut impl Outbox) -> Vec<LinkKey> {
        let timeout = self.settings.negotiation_timeout;
        let expired: Vec<LinkKey> = self
            .links
            .values()
            .filter(|link| link.is_negotiation_expired(now, timeout))
            .map(PeerLink::key)
            .collect();

        for key in &expired {
            if let Some(link) = self.links.remove(key) {
                warn!(
                    target: "mesh.room",
                    room_id = %self.room_id,
                    link = %key,
                    timeout_secs = timeout.as_secs(),
                    "Link negotiation timed out"
                );
                fail_link(link, LinkFailure::Timeout, outbox);
            }
        }

        expired
    }

    /// Close every link and tell every member the room is gone.
    ///
    /// Returns the closed link keys. The roster is kept for the final snapshot.
    pub fn close_room(&mut self, reason: RoomCloseReason, outbox: &mut impl Outbox) -> Vec<LinkKey> {
        if self.closed {
            return Vec::new();
        }

        self.broadcast(&RoomEvent::RoomClosed { reason }, outbox);

        let links = std::mem::take(&mut self.links);
        let mut closed = Vec::with_capacity(links.len());
        for (key, mut link) in links {
            if link.close().is_ok() {
                metrics::record_link_transition(LinkState::Closed);
            }
            closed.push(key);
        }

        let members: Vec<ParticipantId> = self.roster.ids().collect();
        for member in members {
            outbox.release(member);
        }
        self.closed = true;

        info!(
            target: "mesh.room",
            room_id = %self.room_id,
            reason = reason.as_str(),
            links_closed = closed.len(),
            "Room closed"
        );

        closed
    }

    #[must_use]
    pub fn room_id(&self) -> RoomId {
        self.room_id
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn roster(&self) -> &Roster {
        &self.roster
    }

    #[must_use]
    pub fn admin(&self) -> Option<ParticipantId> {
        self.roster.admin()
    }

    #[must_use]
    pub fn settings(&self) -> &RoomSettings {
        &self.settings
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed
    }

    #[must_use]
    pub fn link(&self, a: ParticipantId, b: ParticipantId) -> Option<&PeerLink> {
        LinkKey::between(a, b).and_then(|key| self.links.get(&key))
    }

    #[must_use]
    pub fn link_count(&self) -> usize {
        self.links.len()
    }

    #[must_use]
    pub fn snapshot(&self) -> RoomSnapshot {
        RoomSnapshot {
            room_id: self.room_id,
            name: self.name.clone(),
            admin_id: self.roster.admin(),
            created_at: self.created_at,
            members: self.roster.snapshot(),
            links: self.links.values().map(PeerLink::snapshot).collect(),
        }
    }

    /// Remove and close every link of `participant`, telling each remaining end.
    pub(crate) fn close_links_of(
        &mut self,
        participant: ParticipantId,
        outbox: &mut impl Outbox,
    ) -> Vec<LinkKey> {
        let keys: Vec<LinkKey> = self
            .links
            .keys()
            .filter(|key| key.contains(participant))
            .copied()
            .collect();

        for key in &keys {
            let Some(mut link) = self.links.remove(key) else {
                continue;
            };
            if link.close().is_err() {
                continue;
            }
            metrics::record_link_transition(LinkState::Closed);

            let Some(peer) = key.other(participant) else {
                continue;
            };
            let Some(role) = link.role_of(peer) else {
                continue;
            };
            notify(
                outbox,
                peer,
                RoomEvent::LinkStateChanged {
                    peer_id: participant,
                    state: LinkState::Closed,
                    role,
                    failure: None,
                },
            );
        }

        keys
    }

    pub(crate) fn broadcast(&self, event: &RoomEvent, outbox: &mut impl Outbox) {
        for member in self.roster.ids() {
            notify(outbox, member, event.clone());
        }
    }

    pub(crate) fn broadcast_except(
        &self,
        excluded: ParticipantId,
        event: &RoomEvent,
        outbox: &mut impl Outbox,
    ) {
        for member in self.roster.ids().filter(|id| *id != excluded) {
            notify(outbox, member, event.clone());
        }
    }
}

/// Queue a best-effort notification. Drops are recorded by the outbox.
pub(crate) fn notify(outbox: &mut impl Outbox, to: ParticipantId, event: RoomEvent) -> bool {
    let name = event.name();
    match outbox.push(to, event) {
        Ok(()) => true,
        Err(e) => {
            debug!(
                target: "mesh.room",
                participant_id = %to,
                event = name,
                error = %e,
                "Notification not queued"
            );
            false
        }
    }
}

/// Tell both ends of `link` its current state, each with their own role.
pub(crate) fn notify_link_ends(
    link: &PeerLink,
    failure: Option<LinkFailure>,
    outbox: &mut impl Outbox,
) {
    let key = link.key();
    for (end, peer) in [(key.low(), key.high()), (key.high(), key.low())] {
        let role = if link.initiator() == end {
            LinkRole::Initiator
        } else {
            LinkRole::Answerer
        };
        notify(
            outbox,
            end,
            RoomEvent::LinkStateChanged {
                peer_id: peer,
                state: link.state(),
                role,
                failure,
            },
        );
    }
}

fn fail_link(mut link: PeerLink, failure: LinkFailure, outbox: &mut impl Outbox) {
    if link.fail(failure).is_err() {
        return;
    }
    metrics::record_link_transition(LinkState::Failed);
    metrics::record_link_failure(failure);
    debug!(
        target: "mesh.room",
        link = %link.key(),
        error = %failure.into_error(link.key()),
        "Link failed"
    );
    notify_link_ends(&link, Some(failure), outbox);
}
