//! Durable room registry.
//!
//! The registry is an append-mostly audit trail of rooms and their
//! participants, kept in Postgres for billing reconciliation and support.
//! Room actors never read it back.
//!
//! Every write is idempotent: replaying a record that already landed leaves
//! the rows unchanged. Actors rely on that to retry queued records after a
//! registry outage.

pub mod postgres;

use crate::actors::{LeaveReason, RoomType};
use crate::errors::RoomError;
use common::types::Wallet;
use serde::{Deserialize, Serialize};

pub use postgres::PgRoomRegistry;

/// One participant's exit from a room.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParticipantDeparture {
    pub connection_id: String,
    pub left_at: i64,
    pub debited_seconds: u64,
    pub reason: LeaveReason,
}

/// A registry write, queued in the room snapshot until acknowledged.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AuditRecord {
    RoomOpened {
        room_type: RoomType,
        host_wallet: Wallet,
        capacity: u32,
        channel_name: String,
        chain_id: u64,
        booking_id: Option<String>,
        opened_at: i64,
    },
    RoomClosed {
        closed_at: i64,
    },
    ParticipantJoined {
        connection_id: String,
        wallet: Wallet,
        external_uid: u32,
        joined_at: i64,
    },
    ParticipantLeft {
        departure: ParticipantDeparture,
    },
    /// Departures written in one transaction.
    ParticipantsLeft {
        departures: Vec<ParticipantDeparture>,
    },
}

impl AuditRecord {
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            AuditRecord::RoomOpened { .. } => "room_opened",
            AuditRecord::RoomClosed { .. } => "room_closed",
            AuditRecord::ParticipantJoined { .. } => "participant_joined",
            AuditRecord::ParticipantLeft { .. } => "participant_left",
            AuditRecord::ParticipantsLeft { .. } => "participants_left",
        }
    }
}

#[async_trait::async_trait]
pub trait RoomRegistry: Send + Sync {
    /// Apply one record. Must be idempotent.
    async fn record(&self, room_id: &str, record: &AuditRecord) -> Result<(), RoomError>;

    /// Delete every row for `room_id`.
    async fn purge(&self, room_id: &str) -> Result<(), RoomError>;
}

/// In-memory registry for tests.
pub mod mock {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::{Mutex, PoisonError};

    #[derive(Debug, Default)]
    pub struct MockRoomRegistry {
        records: Mutex<Vec<(String, AuditRecord)>>,
        purged: Mutex<Vec<String>>,
        rejected_kinds: Mutex<Vec<&'static str>>,
        failing: AtomicBool,
    }

    impl MockRoomRegistry {
        #[must_use]
        pub fn new() -> Self {
            Self::default()
        }

        /// Make every call fail with `RoomError::Registry` until reset.
        pub fn set_failing(&self, failing: bool) {
            self.failing.store(failing, Ordering::SeqCst);
        }

        /// Refuse every record of `kind` with `RoomError::AuditRejected`.
        pub fn reject_kind(&self, kind: &'static str) {
            self.rejected_kinds
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .push(kind);
        }

        /// Records accepted for `room_id`, in arrival order.
        #[must_use]
        pub fn records_for(&self, room_id: &str) -> Vec<AuditRecord> {
            self.records
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .iter()
                .filter(|(id, _)| id == room_id)
                .map(|(_, record)| record.clone())
                .collect()
        }

        /// Kinds accepted for `room_id`, in arrival order.
        #[must_use]
        pub fn kinds_for(&self, room_id: &str) -> Vec<&'static str> {
            self.records_for(room_id)
                .iter()
                .map(AuditRecord::kind)
                .collect()
        }

        #[must_use]
        pub fn purged(&self) -> Vec<String> {
            self.purged
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .clone()
        }
    }

    #[async_trait::async_trait]
    impl RoomRegistry for MockRoomRegistry {
        async fn record(&self, room_id: &str, record: &AuditRecord) -> Result<(), RoomError> {
            if self.failing.load(Ordering::SeqCst) {
                return Err(RoomError::Registry("mock registry unavailable".to_string()));
            }
            if self
                .rejected_kinds
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .contains(&record.kind())
            {
                return Err(RoomError::AuditRejected(format!(
                    "{} refused",
                    record.kind()
                )));
            }
            self.records
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .push((room_id.to_string(), record.clone()));
            Ok(())
        }

        async fn purge(&self, room_id: &str) -> Result<(), RoomError> {
            if self.failing.load(Ordering::SeqCst) {
                return Err(RoomError::Registry("mock registry unavailable".to_string()));
            }
            self.records
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .retain(|(id, _)| id != room_id);
            self.purged
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .push(room_id.to_string());
            Ok(())
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_audit_record_is_tagged_by_kind() {
        let record = AuditRecord::ParticipantLeft {
            departure: ParticipantDeparture {
                connection_id: "c1".to_string(),
                left_at: 500,
                debited_seconds: 60,
                reason: LeaveReason::Stale,
            },
        };
        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["kind"], "participant_left");
        assert_eq!(json["departure"]["reason"], "stale");

        let decoded: AuditRecord = serde_json::from_value(json).unwrap();
        assert_eq!(decoded, record);
    }

    #[tokio::test]
    async fn test_mock_purge_drops_room_records() {
        let registry = mock::MockRoomRegistry::new();
        registry
            .record("r1", &AuditRecord::RoomClosed { closed_at: 1 })
            .await
            .unwrap();
        registry
            .record("r2", &AuditRecord::RoomClosed { closed_at: 2 })
            .await
            .unwrap();

        registry.purge("r1").await.unwrap();
        assert!(registry.records_for("r1").is_empty());
        assert_eq!(registry.kinds_for("r2"), vec!["room_closed"]);
        assert_eq!(registry.purged(), vec!["r1".to_string()]);
    }
}
