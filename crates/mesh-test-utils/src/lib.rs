//! # Mesh Test Utilities
//!
//! Shared test utilities for the Mesh Coordinator.
//!
//! This crate provides a mock event sink and test fixtures for driving a
//! [`Coordinator`](mesh_coordinator::coordinator::Coordinator) end to end
//! without any sockets.
//!
//! ## Modules
//!
//! - `mock_sink` - Recording `EventSink` that can refuse chosen participants
//! - `fixtures` - Participant ids, profiles, settings and payloads
//!
//! ## Usage
//!
//! ```rust,ignore
//! use mesh_test_utils::*;
//!
//! #[tokio::test]
//! async fn test_example() {
//!     let sink = MockSink::new();
//!     let coordinator = Coordinator::new(test_settings(), sink.clone());
//!
//!     let alice = TestParticipant::new(1, "Alice");
//!     let room = coordinator.create_room(alice.id, &alice.name, "demo").await?;
//!
//!     sink.wait_for(alice.id, |e| matches!(e, RoomEvent::Joined { .. })).await;
//! }
//! ```

pub mod fixtures;
pub mod mock_sink;

// Re-export commonly used items
pub use fixtures::*;
pub use mock_sink::*;
