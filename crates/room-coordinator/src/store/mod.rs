//! Room state persistence.
//!
//! A room is stored as one JSON snapshot. Writes are fenced by a generation
//! number: each actor incarnation claims a fresh generation on start, and a
//! save or delete carrying an older generation is rejected with
//! `RoomError::FencedOut`.

pub mod lua_scripts;
pub mod redis;

use crate::actors::{CreditEvent, RoomStatus, RoomType};
use crate::errors::RoomError;
use crate::registry::AuditRecord;
use common::types::Wallet;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, VecDeque};

pub use self::redis::RedisRoomStore;

/// Durable description of an initialized room.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoomRecord {
    pub room_id: String,
    pub room_type: RoomType,
    pub host_wallet: Wallet,
    pub capacity: u32,
    pub channel_name: String,
    pub chain_id: u64,
    pub booking_id: Option<String>,
    pub status: RoomStatus,
    pub created_at: i64,
    pub closed_at: Option<i64>,
}

/// A participant as the room actor tracks it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParticipantRecord {
    pub connection_id: String,
    pub wallet: Wallet,
    pub external_uid: u32,
    pub joined_at: i64,
    /// Epoch second up to which this participant has been billed.
    pub last_metered_at: i64,
    /// Last client-initiated contact (join, heartbeat, renew).
    pub last_seen_at: i64,
    pub warned_low: bool,
    pub exhausted: bool,
    pub debited_seconds: u64,
    /// Events raised by the tick and not yet returned to the client.
    #[serde(default)]
    pub pending_events: Vec<CreditEvent>,
}

/// Everything a room actor persists.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct RoomSnapshot {
    pub room: Option<RoomRecord>,
    #[serde(default)]
    pub participants: BTreeMap<String, ParticipantRecord>,
    /// Epoch second of the armed tick, if any.
    pub next_tick_at: Option<i64>,
    /// Registry writes not yet acknowledged, oldest first.
    #[serde(default)]
    pub pending_audit: VecDeque<AuditRecord>,
    /// Most recent records the registry refused for good, oldest first.
    #[serde(default)]
    pub rejected_audit: VecDeque<AuditRecord>,
}

impl RoomSnapshot {
    #[must_use]
    pub fn status(&self) -> RoomStatus {
        self.room
            .as_ref()
            .map_or(RoomStatus::Uninitialized, |room| room.status)
    }
}

/// Fenced snapshot storage.
#[async_trait::async_trait]
pub trait RoomStateStore: Send + Sync {
    async fn load(&self, room_id: &str) -> Result<Option<RoomSnapshot>, RoomError>;

    /// Take ownership of `room_id`, returning a generation newer than any
    /// previously claimed.
    async fn claim(&self, room_id: &str) -> Result<u64, RoomError>;

    async fn save(
        &self,
        room_id: &str,
        generation: u64,
        snapshot: &RoomSnapshot,
    ) -> Result<(), RoomError>;

    /// Remove the snapshot. Deleting a missing snapshot succeeds.
    async fn delete(&self, room_id: &str, generation: u64) -> Result<(), RoomError>;
}

/// In-memory fenced store for tests.
pub mod mock {
    use super::*;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::{Mutex, PoisonError};

    #[derive(Debug, Default)]
    struct Entry {
        generation: u64,
        /// Serialized so tests exercise the real encoding.
        json: Option<String>,
    }

    #[derive(Debug, Default)]
    pub struct MockRoomStore {
        entries: Mutex<HashMap<String, Entry>>,
        saves: AtomicUsize,
        failing: AtomicBool,
    }

    impl MockRoomStore {
        #[must_use]
        pub fn new() -> Self {
            Self::default()
        }

        /// Make every call fail with `RoomError::Storage` until reset.
        pub fn set_failing(&self, failing: bool) {
            self.failing.store(failing, Ordering::SeqCst);
        }

        #[must_use]
        pub fn save_count(&self) -> usize {
            self.saves.load(Ordering::SeqCst)
        }

        /// The stored snapshot, bypassing fencing.
        #[must_use]
        pub fn snapshot(&self, room_id: &str) -> Option<RoomSnapshot> {
            let entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
            entries
                .get(room_id)
                .and_then(|entry| entry.json.as_deref())
                .and_then(|json| serde_json::from_str(json).ok())
        }

        #[must_use]
        pub fn generation(&self, room_id: &str) -> u64 {
            let entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
            entries.get(room_id).map_or(0, |entry| entry.generation)
        }

        fn check_failing(&self) -> Result<(), RoomError> {
            if self.failing.load(Ordering::SeqCst) {
                return Err(RoomError::Storage("mock store unavailable".to_string()));
            }
            Ok(())
        }
    }

    #[async_trait::async_trait]
    impl RoomStateStore for MockRoomStore {
        async fn load(&self, room_id: &str) -> Result<Option<RoomSnapshot>, RoomError> {
            self.check_failing()?;
            let entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
            match entries.get(room_id).and_then(|entry| entry.json.as_deref()) {
                Some(json) => serde_json::from_str(json)
                    .map(Some)
                    .map_err(|e| RoomError::Storage(format!("corrupt snapshot: {e}"))),
                None => Ok(None),
            }
        }

        async fn claim(&self, room_id: &str) -> Result<u64, RoomError> {
            self.check_failing()?;
            let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
            let entry = entries.entry(room_id.to_string()).or_default();
            entry.generation += 1;
            Ok(entry.generation)
        }

        async fn save(
            &self,
            room_id: &str,
            generation: u64,
            snapshot: &RoomSnapshot,
        ) -> Result<(), RoomError> {
            self.check_failing()?;
            let json = serde_json::to_string(snapshot)
                .map_err(|e| RoomError::Internal(format!("snapshot encode: {e}")))?;

            let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
            let entry = entries.entry(room_id.to_string()).or_default();
            if generation < entry.generation {
                return Err(RoomError::FencedOut(format!(
                    "generation {generation} is older than {}",
                    entry.generation
                )));
            }
            entry.generation = generation;
            entry.json = Some(json);
            self.saves.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        async fn delete(&self, room_id: &str, generation: u64) -> Result<(), RoomError> {
            self.check_failing()?;
            let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
            if let Some(entry) = entries.get_mut(room_id) {
                if generation < entry.generation {
                    return Err(RoomError::FencedOut(format!(
                        "generation {generation} is older than {}",
                        entry.generation
                    )));
                }
                entry.json = None;
            }
            Ok(())
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::mock::MockRoomStore;
    use super::*;

    fn snapshot() -> RoomSnapshot {
        let mut participants = BTreeMap::new();
        participants.insert(
            "conn-a".to_string(),
            ParticipantRecord {
                connection_id: "conn-a".to_string(),
                wallet: Wallet::new("0xa1"),
                external_uid: 11,
                joined_at: 100,
                last_metered_at: 130,
                last_seen_at: 130,
                warned_low: true,
                exhausted: false,
                debited_seconds: 30,
                pending_events: vec![CreditEvent::CreditsLow {
                    remaining_seconds: 200,
                }],
            },
        );
        RoomSnapshot {
            room: Some(RoomRecord {
                room_id: "r1".to_string(),
                room_type: RoomType::Ephemeral,
                host_wallet: Wallet::new("0xa1"),
                capacity: 6,
                channel_name: "r1".to_string(),
                chain_id: 8453,
                booking_id: None,
                status: RoomStatus::Active,
                created_at: 100,
                closed_at: None,
            }),
            participants,
            next_tick_at: Some(160),
            pending_audit: VecDeque::new(),
            rejected_audit: VecDeque::new(),
        }
    }

    #[test]
    fn test_status_of_empty_snapshot() {
        assert_eq!(RoomSnapshot::default().status(), RoomStatus::Uninitialized);
        assert_eq!(snapshot().status(), RoomStatus::Active);
    }

    #[test]
    fn test_snapshot_tolerates_missing_optional_sections() {
        let json = r#"{"room":null,"next_tick_at":null}"#;
        let decoded: RoomSnapshot = serde_json::from_str(json).unwrap();
        assert!(decoded.participants.is_empty());
        assert!(decoded.pending_audit.is_empty());
    }

    #[tokio::test]
    async fn test_stale_generation_is_fenced_out() {
        let store = MockRoomStore::new();
        let old = store.claim("r1").await.unwrap();
        let new = store.claim("r1").await.unwrap();
        assert!(new > old);

        store.save("r1", new, &snapshot()).await.unwrap();
        let err = store.save("r1", old, &snapshot()).await.unwrap_err();
        assert!(matches!(err, RoomError::FencedOut(_)));

        let err = store.delete("r1", old).await.unwrap_err();
        assert!(matches!(err, RoomError::FencedOut(_)));
        assert_eq!(store.load("r1").await.unwrap(), Some(snapshot()));
    }

    #[tokio::test]
    async fn test_delete_missing_snapshot_succeeds() {
        let store = MockRoomStore::new();
        let generation = store.claim("r1").await.unwrap();
        store.delete("r1", generation).await.unwrap();
        assert_eq!(store.load("r1").await.unwrap(), None);
    }
}
