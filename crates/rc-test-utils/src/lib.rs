//! # RC Test Utilities
//!
//! Fixtures and a harness for Room Coordinator tests. Everything runs in
//! memory against the mock collaborators shipped with `room-coordinator`.
//!
//! ## Modules
//!
//! - `fixtures` - Room specs and participants
//! - `harness` - `RoomHarness`, mock collaborators wired to spawned actors
//!
//! ## Usage
//!
//! ```rust,ignore
//! use rc_test_utils::*;
//!
//! #[tokio::test(start_paused = true)]
//! async fn test_example() {
//!     let harness = RoomHarness::new();
//!     let alice = TestParticipant::new("conn-a", "0xa11ce");
//!     harness.fund(&alice, 1800);
//!
//!     let (room, _task) = harness.spawn_room("room-1");
//!     room.init(TestRoomSpec::ephemeral().build()).await.unwrap();
//!     room.join(alice.join_request()).await.unwrap();
//!
//!     harness.advance_secs(30).await;
//! }
//! ```

pub mod fixtures;
pub mod harness;

pub use fixtures::*;
pub use harness::*;
