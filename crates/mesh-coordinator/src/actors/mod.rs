//! Actor model implementation for the Mesh Coordinator.
//!
//! ```text
//! RoomRegistryActor (singleton per coordinator)
//! └── supervises N RoomActors
//!     └── RoomActor (one per open room)
//!         ├── owns RoomState (roster, peer links, sources)
//!         └── supervises N ConnectionActors
//!             └── ConnectionActor (one per member, forwards to the EventSink)
//! ```
//!
//! Room state is only ever touched inside its `RoomActor`, so operations on
//! one room are serialized while different rooms proceed in parallel.
//! Cancellation flows down the tree through child `CancellationToken`s;
//! panics are detected by the parent through the child's `JoinHandle`.

pub mod connection;
pub mod messages;
pub mod metrics;
pub mod registry;
pub mod room;

pub use connection::{ConnectionActor, ConnectionActorHandle};
pub use messages::{JoinResult, RegistryStatus, RoomCreated, RoomInfo};
pub use metrics::{ActorMetrics, ActorMetricsSnapshot, ActorType, MailboxMonitor};
pub use registry::{RoomRegistryActor, RoomRegistryHandle};
pub use room::{RoomActor, RoomActorHandle};
