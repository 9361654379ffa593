//! Message types for actor communication.
//!
//! Requests travel over bounded `tokio::sync::mpsc` mailboxes and answer over
//! `tokio::sync::oneshot`. Room actors report back to the registry on a
//! separate unbounded notice channel so they never wait on it.

use crate::admin::AdminAction;
use crate::errors::MeshError;
use crate::events::{LeaveReason, RoomEvent};
use crate::relay::SignalEnvelope;
use crate::room_state::RoomSnapshot;
use crate::roster::{MemberInfo, ParticipantProfile};
use crate::substitution::SubstitutionReport;

use super::room::RoomActorHandle;

use chrono::{DateTime, Utc};
use common::types::{MediaKind, ParticipantId, RoomId, SourceToken};
use serde::Serialize;
use std::time::Duration;
use tokio::sync::oneshot;

/// Messages sent to `RoomRegistryActor`.
#[derive(Debug)]
pub enum RegistryMessage {
    /// Open a room with `creator` as its admin.
    CreateRoom {
        name: String,
        creator: ParticipantProfile,
        respond_to: oneshot::Sender<Result<RoomCreated, MeshError>>,
    },

    /// Bind `participant` to `room_id` and hand back the room's handle.
    ///
    /// The caller completes the join with the room actor and releases the
    /// reservation if that fails.
    ReserveJoin {
        room_id: RoomId,
        participant: ParticipantId,
        respond_to: oneshot::Sender<Result<RoomActorHandle, MeshError>>,
    },

    /// Drop a reservation that did not turn into a join.
    Release {
        room_id: RoomId,
        participant: ParticipantId,
    },

    /// Find the room a participant is in.
    Lookup {
        participant: ParticipantId,
        respond_to: oneshot::Sender<Result<RoomActorHandle, MeshError>>,
    },

    /// Summary of one room.
    GetRoom {
        room_id: RoomId,
        respond_to: oneshot::Sender<Result<RoomInfo, MeshError>>,
    },

    /// Registry status (for health checks).
    GetStatus {
        respond_to: oneshot::Sender<RegistryStatus>,
    },

    /// Stop accepting rooms and close every open one.
    Shutdown {
        deadline: Duration,
        respond_to: oneshot::Sender<Result<(), MeshError>>,
    },
}

/// Notices from room actors to the registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoomNotice {
    /// A member left or was removed.
    ParticipantDeparted {
        room_id: RoomId,
        participant_id: ParticipantId,
    },
    /// The room is gone; every member is unbound.
    RoomClosed { room_id: RoomId },
}

/// Messages sent to `RoomActor`.
#[derive(Debug)]
pub enum RoomMessage {
    Join {
        participant: ParticipantProfile,
        respond_to: oneshot::Sender<Result<JoinResult, MeshError>>,
    },

    Leave {
        participant_id: ParticipantId,
        reason: LeaveReason,
        respond_to: oneshot::Sender<Result<(), MeshError>>,
    },

    /// Relay a negotiation payload to another member.
    Relay {
        envelope: SignalEnvelope,
        respond_to: oneshot::Sender<Result<(), MeshError>>,
    },

    ReplaceSource {
        participant_id: ParticipantId,
        token: SourceToken,
        respond_to: oneshot::Sender<Result<SubstitutionReport, MeshError>>,
    },

    RestoreSource {
        participant_id: ParticipantId,
        respond_to: oneshot::Sender<Result<SubstitutionReport, MeshError>>,
    },

    SetPrimarySource {
        participant_id: ParticipantId,
        token: SourceToken,
        respond_to: oneshot::Sender<Result<SubstitutionReport, MeshError>>,
    },

    AdminAction {
        requester: ParticipantId,
        target: ParticipantId,
        action: AdminAction,
        respond_to: oneshot::Sender<Result<(), MeshError>>,
    },

    /// Ask the admin for the mic.
    RequestMic {
        participant_id: ParticipantId,
        respond_to: oneshot::Sender<Result<(), MeshError>>,
    },

    SelfMute {
        participant_id: ParticipantId,
        kind: MediaKind,
        muted: bool,
        respond_to: oneshot::Sender<Result<(), MeshError>>,
    },

    /// The media transport of `reporter`'s link to `peer` failed.
    ReportLinkFailure {
        reporter: ParticipantId,
        peer: ParticipantId,
        respond_to: oneshot::Sender<Result<(), MeshError>>,
    },

    EndRoom {
        requester: ParticipantId,
        respond_to: oneshot::Sender<Result<(), MeshError>>,
    },

    GetState {
        respond_to: oneshot::Sender<RoomSnapshot>,
    },
}

/// Messages sent to `ConnectionActor`.
#[derive(Debug)]
pub enum ConnectionMessage {
    /// Forward an event to the participant.
    Deliver { event: RoomEvent },

    /// Flush what is queued, then stop.
    Close,
}

/// Result of a successful room creation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomCreated {
    pub room_id: RoomId,
    pub admin_id: ParticipantId,
}

/// Result of a successful join.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JoinResult {
    pub room_id: RoomId,
    pub admin_id: ParticipantId,
    /// Roster in join order, including the joiner.
    pub members: Vec<MemberInfo>,
}

/// Registry view of one room.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomInfo {
    pub room_id: RoomId,
    pub name: String,
    pub participant_count: usize,
    pub created_at: DateTime<Utc>,
}

/// Registry status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegistryStatus {
    pub room_count: usize,
    pub participant_count: usize,
    pub is_draining: bool,
    pub mailbox_depth: usize,
}
