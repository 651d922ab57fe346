//! Room Coordinator (RC) Library
//!
//! The Room Coordinator owns the lifecycle of metered audio rooms. Each room
//! is a single-writer actor that admits participants, meters their talk time
//! against a shared credit ledger, issues short-lived media credentials and
//! reaps participants whose clients stopped heartbeating.
//!
//! # Architecture
//!
//! ```text
//! RoomDirectoryActor (singleton per RC instance)
//! └── supervises N RoomActors
//!     └── RoomActor (one per room id)
//!         ├── owns room + participant state (persisted to Redis, fenced)
//!         ├── meters participants against the CreditLedger
//!         ├── issues credentials through the CredentialIssuer
//!         └── appends audit records to the RoomRegistry (Postgres)
//! ```
//!
//! # Key Design Decisions
//!
//! - **One mailbox per room**: every operation on a room is serialized, so
//!   metering and membership changes never interleave
//! - **Lazy rehydration**: a room actor loads its snapshot on first use and
//!   re-arms its metering tick from the persisted deadline
//! - **Fencing tokens**: each actor incarnation claims a generation; writes
//!   from an older incarnation are rejected
//! - **Audit outbox**: registry writes are queued in the snapshot and retried
//!   until they land, so a registry outage never fails a client call
//!
//! # Modules
//!
//! - [`actors`] - Room and directory actors
//! - [`clock`] - Epoch clock used for metering
//! - [`config`] - Service configuration from environment
//! - [`errors`] - Error types with client-safe codes
//! - [`observability`] - Metrics and health endpoints
//! - [`registry`] - Durable room registry (audit trail)
//! - [`services`] - Credit ledger and credential issuer clients
//! - [`store`] - Fenced room state persistence

pub mod actors;
pub mod clock;
pub mod config;
pub mod errors;
pub mod observability;
pub mod registry;
pub mod services;
pub mod store;
