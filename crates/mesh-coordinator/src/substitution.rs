//! Outgoing media source substitution.
//!
//! Swapping a participant's outgoing source (camera to screen share and back)
//! renegotiates every live link of that participant, not just one. Each link
//! keeps its identity and initiator. A link that cannot take the new source,
//! either because its notice cannot be queued or because the link itself
//! refuses to renegotiate, is reported and left as it was without affecting
//! the others.

use crate::arbiter::{self, LinkRole};
use crate::errors::{DeliveryError, MeshError};
use crate::events::{Outbox, RoomEvent};
use crate::link::{LinkKey, LinkState};
use crate::observability::metrics;
use crate::room_state::{notify, RoomState};

use common::types::{ParticipantId, SourceToken};
use serde::Serialize;
use thiserror::Error;
use tokio::time::Instant;
use tracing::{debug, info};

/// Why a link did not take the new source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum SubstitutionError {
    /// The initiator's renegotiation notice could not be queued.
    #[error("renegotiation notice not queued: {error}")]
    Undeliverable { error: DeliveryError },

    /// The link is in a state that cannot renegotiate.
    #[error("link is {} and cannot renegotiate", state.as_str())]
    LinkRefused { state: LinkState },
}

/// A link the new source could not be applied to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubstitutionFailure {
    pub peer_id: ParticipantId,
    pub error: SubstitutionError,
}

/// Per-link result of a source change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubstitutionReport {
    pub participant_id: ParticipantId,
    pub token: SourceToken,
    /// Peers whose link is now renegotiating with `token`.
    pub applied: Vec<ParticipantId>,
    pub failed: Vec<SubstitutionFailure>,
}

impl SubstitutionReport {
    fn unchanged(participant_id: ParticipantId, token: SourceToken) -> Self {
        Self {
            participant_id,
            token,
            applied: Vec::new(),
            failed: Vec::new(),
        }
    }
}

impl RoomState {
    /// Substitute `participant`'s outgoing source on all of their active links.
    pub fn replace_outgoing_source(
        &mut self,
        participant: ParticipantId,
        token: SourceToken,
        now: Instant,
        outbox: &mut impl Outbox,
    ) -> Result<SubstitutionReport, MeshError> {
        let member = self
            .roster
            .get_mut(participant)
            .ok_or_else(|| MeshError::ParticipantNotFound(participant.to_string()))?;
        member.substitute_source = Some(token);

        Ok(self.fan_out(participant, token, now, outbox))
    }

    /// Drop the substitute and return to the primary source as it is now.
    ///
    /// Without an active substitute nothing changes.
    pub fn restore_primary_source(
        &mut self,
        participant: ParticipantId,
        now: Instant,
        outbox: &mut impl Outbox,
    ) -> Result<SubstitutionReport, MeshError> {
        let member = self
            .roster
            .get_mut(participant)
            .ok_or_else(|| MeshError::ParticipantNotFound(participant.to_string()))?;
        let primary = member.primary_source;

        if member.substitute_source.take().is_none() {
            return Ok(SubstitutionReport::unchanged(participant, primary));
        }

        Ok(self.fan_out(participant, primary, now, outbox))
    }

    /// Replace the primary source (e.g. a different camera).
    ///
    /// Links only renegotiate when no substitute is being sent; otherwise the
    /// new primary takes effect on restore.
    pub fn set_primary_source(
        &mut self,
        participant: ParticipantId,
        token: SourceToken,
        now: Instant,
        outbox: &mut impl Outbox,
    ) -> Result<SubstitutionReport, MeshError> {
        let member = self
            .roster
            .get_mut(participant)
            .ok_or_else(|| MeshError::ParticipantNotFound(participant.to_string()))?;
        member.primary_source = token;

        if member.substitute_source.is_some() {
            return Ok(SubstitutionReport::unchanged(participant, token));
        }

        Ok(self.fan_out(participant, token, now, outbox))
    }

    fn fan_out(
        &mut self,
        owner: ParticipantId,
        token: SourceToken,
        now: Instant,
        outbox: &mut impl Outbox,
    ) -> SubstitutionReport {
        // Idle links have not started negotiating and pick the source up
        // when they do. Anything else is attempted, so a link that refuses
        // shows up in the report.
        let keys: Vec<LinkKey> = self
            .links
            .iter()
            .filter(|(key, link)| key.contains(owner) && link.state() != LinkState::Idle)
            .map(|(key, _)| *key)
            .collect();

        let mut report = SubstitutionReport::unchanged(owner, token);

        for key in keys {
            let Some(link) = self.links.get_mut(&key) else {
                continue;
            };
            let Some(peer) = key.other(owner) else {
                continue;
            };
            let initiator = link.initiator();
            let answerer = arbiter::answerer(key.low(), key.high());

            // Work on a copy so a link that cannot be told stays as it was.
            let mut renegotiated = link.clone();
            let transition = match renegotiated.renegotiate(owner, token, now) {
                Ok(transition) => transition,
                Err(e) => {
                    debug!(
                        target: "mesh.room",
                        room_id = %self.room_id,
                        link = %key,
                        error = %e,
                        "Link could not renegotiate"
                    );
                    report.failed.push(SubstitutionFailure {
                        peer_id: peer,
                        error: SubstitutionError::LinkRefused {
                            state: link.state(),
                        },
                    });
                    continue;
                }
            };

            // The initiator drives the new round, so its notice must land.
            let notice = RoomEvent::LinkStateChanged {
                peer_id: answerer,
                state: LinkState::Negotiating,
                role: LinkRole::Initiator,
                failure: None,
            };
            if let Err(error) = outbox.push(initiator, notice) {
                debug!(
                    target: "mesh.room",
                    room_id = %self.room_id,
                    link = %key,
                    error = %error,
                    "Renegotiation notice not queued"
                );
                report.failed.push(SubstitutionFailure {
                    peer_id: peer,
                    error: SubstitutionError::Undeliverable { error },
                });
                continue;
            }

            *link = renegotiated;
            metrics::record_link_transition(transition.to);
            report.applied.push(peer);
            notify(
                outbox,
                answerer,
                RoomEvent::LinkStateChanged {
                    peer_id: initiator,
                    state: LinkState::Negotiating,
                    role: LinkRole::Answerer,
                    failure: None,
                },
            );
        }

        metrics::record_source_substitution("applied", report.applied.len());
        metrics::record_source_substitution("failed", report.failed.len());

        info!(
            target: "mesh.room",
            room_id = %self.room_id,
            participant_id = %owner,
            token = %token,
            applied = report.applied.len(),
            failed = report.failed.len(),
            "Outgoing source changed"
        );

        report
    }
}
