//! Peer-link state machine.
//!
//! One `PeerLink` exists per unordered participant pair in a room. It holds
//! identifiers only, so removing a participant never leaves a dangling
//! reference behind.
//!
//! ```text
//!            begin                 offer+answer+candidates
//!   Idle ───────────▶ Negotiating ─────────────────────────▶ Connected
//!                       │    ▲                                  │
//!                       │    └──────── offer (renegotiate) ─────┘
//!                       ▼                                       ▼
//!               Closed / Failed ◀───────────────────── Closed / Failed
//! ```
//!
//! The initiator is fixed at creation and never changes. Once a link has
//! connected, its transport is established and later renegotiation rounds
//! complete on offer and answer alone.

use crate::arbiter::{self, LinkRole};
use crate::errors::MeshError;

use common::types::{ParticipantId, SourceToken};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use thiserror::Error;
use tokio::time::Instant;

/// Normalized key for an unordered participant pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct LinkKey {
    low: ParticipantId,
    high: ParticipantId,
}

impl LinkKey {
    /// Key for the pair, or `None` when both sides are the same participant.
    #[must_use]
    pub fn between(a: ParticipantId, b: ParticipantId) -> Option<Self> {
        if a == b {
            return None;
        }
        Some(Self {
            low: a.min(b),
            high: a.max(b),
        })
    }

    /// The numerically smaller end.
    #[must_use]
    pub const fn low(&self) -> ParticipantId {
        self.low
    }

    /// The numerically larger end.
    #[must_use]
    pub const fn high(&self) -> ParticipantId {
        self.high
    }

    /// Whether `participant` is one of the two ends.
    #[must_use]
    pub fn contains(&self, participant: ParticipantId) -> bool {
        self.low == participant || self.high == participant
    }

    /// The opposite end from `participant`.
    #[must_use]
    pub fn other(&self, participant: ParticipantId) -> Option<ParticipantId> {
        if participant == self.low {
            Some(self.high)
        } else if participant == self.high {
            Some(self.low)
        } else {
            None
        }
    }
}

impl fmt::Display for LinkKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}~{}", self.low, self.high)
    }
}

/// Negotiation state of a peer link.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LinkState {
    Idle,
    Negotiating,
    Connected,
    /// Torn down by departure, kick or room end.
    Closed,
    /// Irrecoverable negotiation or transport error.
    Failed,
}

impl LinkState {
    /// Returns the state as a string for logs and metric labels.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            LinkState::Idle => "idle",
            LinkState::Negotiating => "negotiating",
            LinkState::Connected => "connected",
            LinkState::Closed => "closed",
            LinkState::Failed => "failed",
        }
    }

    /// `Closed` and `Failed` accept no further transitions.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(self, LinkState::Closed | LinkState::Failed)
    }

    /// Links that carry (or are about to carry) media.
    #[must_use]
    pub const fn is_active(&self) -> bool {
        matches!(self, LinkState::Negotiating | LinkState::Connected)
    }
}

/// Routing kind of a relayed signal. The payload itself stays opaque.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SignalKind {
    /// Session description offer.
    Offer,
    /// Session description answer.
    Answer,
    /// Connectivity candidate. An empty payload marks end-of-candidates.
    Candidate,
    /// Anything else; relayed without affecting link state.
    Other,
}

impl SignalKind {
    /// Returns the kind as a string for logs and metric labels.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            SignalKind::Offer => "offer",
            SignalKind::Answer => "answer",
            SignalKind::Candidate => "candidate",
            SignalKind::Other => "other",
        }
    }
}

/// Why a link moved to `Failed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LinkFailure {
    /// Stayed in `Negotiating` past the configured bound.
    Timeout,
    /// The media transport reported an error.
    TransportFailure,
}

impl LinkFailure {
    /// Returns the failure as a string for logs and metric labels.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            LinkFailure::Timeout => "timeout",
            LinkFailure::TransportFailure => "transport_failure",
        }
    }

    /// The link-scoped error this failure corresponds to.
    #[must_use]
    pub fn into_error(self, key: LinkKey) -> MeshError {
        match self {
            LinkFailure::Timeout => MeshError::LinkTimeout(key.to_string()),
            LinkFailure::TransportFailure => MeshError::TransportFailure(key.to_string()),
        }
    }
}

/// Rejected link operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum LinkError {
    /// The link is closed or failed.
    #[error("link is {}", .0.as_str())]
    Terminal(LinkState),

    /// The participant is not an end of this link.
    #[error("participant is not an end of this link")]
    NotAnEnd,

    /// The answerer sent an offer (both sides offering at once).
    #[error("offer from the answering side")]
    Glare,

    /// A message arrived that the current negotiation round cannot accept.
    #[error("{0}")]
    OutOfOrder(&'static str),
}

impl LinkError {
    /// Convert to the coordinator error reported to the sender.
    #[must_use]
    pub fn into_mesh_error(self, key: LinkKey) -> MeshError {
        match self {
            LinkError::Terminal(_) => MeshError::LinkClosed(key.to_string()),
            LinkError::NotAnEnd => MeshError::InvalidTarget(self.to_string()),
            LinkError::Glare | LinkError::OutOfOrder(_) => {
                MeshError::NegotiationViolation(self.to_string())
            }
        }
    }
}

/// A state change produced by a link operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition {
    pub from: LinkState,
    pub to: LinkState,
    /// Time spent negotiating, set when the link reaches `Connected`.
    pub negotiated_in: Option<Duration>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
struct NegotiationProgress {
    offer_applied: bool,
    answer_applied: bool,
    initiator_candidates: bool,
    answerer_candidates: bool,
}

/// Point-in-time view of a link.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LinkSnapshot {
    pub key: LinkKey,
    pub initiator: ParticipantId,
    pub state: LinkState,
    /// Outgoing source last applied by the low end.
    pub low_source: Option<SourceToken>,
    /// Outgoing source last applied by the high end.
    pub high_source: Option<SourceToken>,
}

/// Negotiation session for one participant pair.
#[derive(Debug, Clone)]
pub struct PeerLink {
    key: LinkKey,
    initiator: ParticipantId,
    state: LinkState,
    progress: NegotiationProgress,
    /// Set once the first round connects; persists across renegotiation.
    transport_ready: bool,
    negotiation_started: Option<Instant>,
    low_source: Option<SourceToken>,
    high_source: Option<SourceToken>,
    failure: Option<LinkFailure>,
}

impl PeerLink {
    /// Create an idle link. The initiator is decided here, once.
    #[must_use]
    pub fn new(key: LinkKey) -> Self {
        Self {
            key,
            initiator: arbiter::initiator(key.low(), key.high()),
            state: LinkState::Idle,
            progress: NegotiationProgress::default(),
            transport_ready: false,
            negotiation_started: None,
            low_source: None,
            high_source: None,
            failure: None,
        }
    }

    #[must_use]
    pub const fn key(&self) -> LinkKey {
        self.key
    }

    #[must_use]
    pub const fn initiator(&self) -> ParticipantId {
        self.initiator
    }

    #[must_use]
    pub const fn state(&self) -> LinkState {
        self.state
    }

    #[must_use]
    pub const fn failure(&self) -> Option<LinkFailure> {
        self.failure
    }

    /// Role of `participant` on this link, if it is an end.
    #[must_use]
    pub fn role_of(&self, participant: ParticipantId) -> Option<LinkRole> {
        self.key
            .other(participant)
            .map(|peer| arbiter::role_of(participant, peer))
    }

    /// Outgoing source last applied on this link by `owner`.
    #[must_use]
    pub fn applied_source(&self, owner: ParticipantId) -> Option<SourceToken> {
        if owner == self.key.low() {
            self.low_source
        } else if owner == self.key.high() {
            self.high_source
        } else {
            None
        }
    }

    /// Record the outgoing source `owner` sends on this link.
    pub fn record_source(&mut self, owner: ParticipantId, token: SourceToken) -> Result<(), LinkError> {
        if owner == self.key.low() {
            self.low_source = Some(token);
        } else if owner == self.key.high() {
            self.high_source = Some(token);
        } else {
            return Err(LinkError::NotAnEnd);
        }
        Ok(())
    }

    /// Enter `Negotiating`, starting a fresh round.
    pub fn begin_negotiation(&mut self, now: Instant) -> Result<Transition, LinkError> {
        if self.state.is_terminal() {
            return Err(LinkError::Terminal(self.state));
        }

        let from = self.state;
        self.state = LinkState::Negotiating;
        self.progress = NegotiationProgress::default();
        self.negotiation_started = Some(now);

        Ok(Transition {
            from,
            to: LinkState::Negotiating,
            negotiated_in: None,
        })
    }

    /// Swap `owner`'s outgoing source and start a renegotiation round.
    ///
    /// Link identity and initiator are preserved.
    pub fn renegotiate(
        &mut self,
        owner: ParticipantId,
        token: SourceToken,
        now: Instant,
    ) -> Result<Transition, LinkError> {
        if self.state.is_terminal() {
            return Err(LinkError::Terminal(self.state));
        }
        self.record_source(owner, token)?;
        self.begin_negotiation(now)
    }

    /// Apply a relayed signal from `sender`.
    ///
    /// Returns the transition it caused, if any.
    pub fn on_signal(
        &mut self,
        sender: ParticipantId,
        kind: SignalKind,
        now: Instant,
    ) -> Result<Option<Transition>, LinkError> {
        if self.state.is_terminal() {
            return Err(LinkError::Terminal(self.state));
        }
        let role = self.role_of(sender).ok_or(LinkError::NotAnEnd)?;

        match kind {
            SignalKind::Offer => {
                if role != LinkRole::Initiator {
                    return Err(LinkError::Glare);
                }
                if self.state == LinkState::Negotiating {
                    // A fresh offer supersedes the previous one in this round.
                    self.progress.offer_applied = true;
                    self.progress.answer_applied = false;
                    return Ok(None);
                }
                let transition = self.begin_negotiation(now)?;
                self.progress.offer_applied = true;
                Ok(Some(transition))
            }

            SignalKind::Answer => {
                if role != LinkRole::Answerer {
                    return Err(LinkError::OutOfOrder("answer from the initiating side"));
                }
                if self.state != LinkState::Negotiating || !self.progress.offer_applied {
                    return Err(LinkError::OutOfOrder("answer without a pending offer"));
                }
                if self.progress.answer_applied {
                    return Err(LinkError::OutOfOrder("duplicate answer"));
                }
                self.progress.answer_applied = true;
                Ok(self.try_connect(now))
            }

            SignalKind::Candidate => {
                match role {
                    LinkRole::Initiator => self.progress.initiator_candidates = true,
                    LinkRole::Answerer => self.progress.answerer_candidates = true,
                }
                Ok(self.try_connect(now))
            }

            SignalKind::Other => Ok(None),
        }
    }

    /// Move to `Failed`.
    pub fn fail(&mut self, failure: LinkFailure) -> Result<Transition, LinkError> {
        if self.state.is_terminal() {
            return Err(LinkError::Terminal(self.state));
        }
        let from = self.state;
        self.state = LinkState::Failed;
        self.failure = Some(failure);
        self.negotiation_started = None;
        Ok(Transition {
            from,
            to: LinkState::Failed,
            negotiated_in: None,
        })
    }

    /// Move to `Closed`.
    pub fn close(&mut self) -> Result<Transition, LinkError> {
        if self.state.is_terminal() {
            return Err(LinkError::Terminal(self.state));
        }
        let from = self.state;
        self.state = LinkState::Closed;
        self.negotiation_started = None;
        Ok(Transition {
            from,
            to: LinkState::Closed,
            negotiated_in: None,
        })
    }

    /// Whether the current round has been negotiating for at least `timeout`.
    #[must_use]
    pub fn is_negotiation_expired(&self, now: Instant, timeout: Duration) -> bool {
        self.state == LinkState::Negotiating
            && self
                .negotiation_started
                .is_some_and(|started| now.saturating_duration_since(started) >= timeout)
    }

    #[must_use]
    pub fn snapshot(&self) -> LinkSnapshot {
        LinkSnapshot {
            key: self.key,
            initiator: self.initiator,
            state: self.state,
            low_source: self.low_source,
            high_source: self.high_source,
        }
    }

    fn try_connect(&mut self, now: Instant) -> Option<Transition> {
        let progress = self.progress;
        let candidates_exchanged = self.transport_ready
            || (progress.initiator_candidates && progress.answerer_candidates);

        if self.state != LinkState::Negotiating
            || !progress.offer_applied
            || !progress.answer_applied
            || !candidates_exchanged
        {
            return None;
        }

        self.state = LinkState::Connected;
        self.transport_ready = true;
        let negotiated_in = self
            .negotiation_started
            .take()
            .map(|started| now.saturating_duration_since(started));

        Some(Transition {
            from: LinkState::Negotiating,
            to: LinkState::Connected,
            negotiated_in,
        })
    }
}
