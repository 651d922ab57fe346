//! Actor model for the Room Coordinator.
//!
//! ```text
//! RoomDirectoryActor (singleton per RC instance)
//! └── supervises N RoomActors (one per room id)
//! ```
//!
//! - **Single writer**: a room's state is only touched from its own task
//! - **CancellationToken propagation**: the directory hands each room a child
//!   token, so cancelling the directory stops every room
//! - **Timers live in the actor**: the metering tick is a deadline polled in
//!   the same `select!` as the mailbox, never a detached task
//!
//! # Modules
//!
//! - [`alarm`] - The room's single re-armable metering deadline
//! - [`directory`] - `RoomDirectoryActor`, get-or-spawn registry of rooms
//! - [`messages`] - Message and reply types
//! - [`metering`] - Debit and threshold logic shared by every metering path
//! - [`metrics`] - Mailbox monitoring and actor counters
//! - [`room`] - `RoomActor`, the per-room state machine

pub mod alarm;
pub mod directory;
pub mod messages;
pub mod metering;
pub mod metrics;
pub mod room;

pub use alarm::TickAlarm;
pub use directory::{RoomDirectoryActor, RoomDirectoryHandle};
pub use messages::*;
pub use metrics::{ActorMetrics, ActorType, MailboxMonitor};
pub use room::{RoomActor, RoomActorHandle, RoomServices};
