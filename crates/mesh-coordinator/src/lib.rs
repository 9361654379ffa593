//! Mesh Coordinator Service Library
//!
//! This library provides the core of the Meshroom Peer-Mesh Session
//! Coordinator - a signaling server for rooms in which every participant
//! holds a direct media link to every other participant:
//!
//! - Room membership with a single admin per room
//! - Coordination-free choice of the initiating side of each pair (no glare)
//! - Relay of opaque negotiation payloads between exactly two parties
//! - A negotiation state machine per participant pair
//! - Renegotiation of all of a participant's links when its outgoing media
//!   source is swapped (camera to screen share and back)
//!
//! # Architecture
//!
//! ```text
//! RoomRegistryActor (singleton per coordinator)
//! └── supervises N RoomActors
//!     └── RoomActor (one per room)
//!         ├── owns RoomState (roster, links, sources)
//!         └── supervises N ConnectionActors
//!             └── ConnectionActor (one per member)
//! ```
//!
//! # Key Design Decisions
//!
//! - **Single writer per room**: all room logic is synchronous and runs inside
//!   the room's actor; outbound events are queued without waiting
//! - **Larger id initiates**: both ends agree on the initiator without talking
//! - **Payloads are opaque**: routing uses the envelope, never the payload
//! - **Failures stay local**: a failed link or delivery never affects another
//!
//! # Modules
//!
//! - [`actors`] - Registry, room and connection actors
//! - [`coordinator`] - Participant-facing entry points
//! - [`room_state`] - Room logic; extended by [`relay`], [`substitution`] and [`admin`]
//! - [`link`] / [`arbiter`] / [`roster`] - Building blocks of a room
//! - [`events`] - Outbound events and delivery seams
//! - [`ws`] - WebSocket signaling surface
//! - [`config`] - Service configuration from environment
//! - [`errors`] - Error types with client error codes
//! - [`observability`] - Metrics and health endpoints

pub mod actors;
pub mod admin;
pub mod arbiter;
pub mod config;
pub mod coordinator;
pub mod errors;
pub mod events;
pub mod link;
pub mod observability;
pub mod relay;
pub mod room_state;
pub mod roster;
pub mod substitution;
pub mod ws;
