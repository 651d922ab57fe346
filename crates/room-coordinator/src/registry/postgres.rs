//! Postgres room registry.
//!
//! Tables (see `migrations/`):
//! - `rooms` - one row per room, updated on close
//! - `room_participants` - one row per (room, connection), updated on leave
//!
//! All statements are parameterized. Replays are absorbed with
//! `ON CONFLICT DO NOTHING` on inserts and `COALESCE` on updates, so the
//! first recorded close or departure wins.

use super::{AuditRecord, ParticipantDeparture, RoomRegistry};
use crate::errors::RoomError;
use crate::observability::metrics;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Postgres, Transaction};
use std::time::Instant;
use tracing::{debug, instrument, warn};

#[derive(Clone)]
pub struct PgRoomRegistry {
    pool: PgPool,
}

impl PgRoomRegistry {
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Round-trip `SELECT 1`, for readiness checks.
    ///
    /// # Errors
    ///
    /// Returns `RoomError::Registry` if the database does not answer.
    pub async fn ping(&self) -> Result<(), RoomError> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map(|_| ())
            .map_err(db_error)
    }

    async fn apply(&self, room_id: &str, record: &AuditRecord) -> Result<(), RoomError> {
        match record {
            AuditRecord::RoomOpened {
                room_type,
                host_wallet,
                capacity,
                channel_name,
                chain_id,
                booking_id,
                opened_at,
            } => {
                sqlx::query(
                    r#"
                    INSERT INTO rooms (
                        room_id, room_type, host_wallet, capacity, channel_name,
                        chain_id, booking_id, status, opened_at
                    )
                    VALUES ($1, $2, $3, $4, $5, $6, $7, 'active', $8)
                    ON CONFLICT (room_id) DO NOTHING
                    "#,
                )
                .bind(room_id) // $1
                .bind(room_type.as_str()) // $2
                .bind(host_wallet.as_str()) // $3
                .bind(i32::try_from(*capacity).map_err(|_| out_of_range("capacity"))?) // $4
                .bind(channel_name) // $5
                .bind(i64::try_from(*chain_id).map_err(|_| out_of_range("chain_id"))?) // $6
                .bind(booking_id.as_deref()) // $7
                .bind(to_timestamp(*opened_at)?) // $8
                .execute(&self.pool)
                .await
                .map_err(db_error)?;
            }
            AuditRecord::RoomClosed { closed_at } => {
                sqlx::query(
                    r#"
                    UPDATE rooms
                    SET status = 'closed',
                        closed_at = COALESCE(closed_at, $2),
                        updated_at = NOW()
                    WHERE room_id = $1
                    "#,
                )
                .bind(room_id)
                .bind(to_timestamp(*closed_at)?)
                .execute(&self.pool)
                .await
                .map_err(db_error)?;
            }
            AuditRecord::ParticipantJoined {
                connection_id,
                wallet,
                external_uid,
                joined_at,
            } => {
                sqlx::query(
                    r#"
                    INSERT INTO room_participants (
                        room_id, connection_id, wallet, external_uid, joined_at
                    )
                    VALUES ($1, $2, $3, $4, $5)
                    ON CONFLICT (room_id, connection_id) DO NOTHING
                    "#,
                )
                .bind(room_id)
                .bind(connection_id)
                .bind(wallet.as_str())
                .bind(i64::from(*external_uid))
                .bind(to_timestamp(*joined_at)?)
                .execute(&self.pool)
                .await
                .map_err(db_error)?;
            }
            AuditRecord::ParticipantLeft { departure } => {
                let mut tx = self.pool.begin().await.map_err(db_error)?;
                record_departure(&mut tx, room_id, departure).await?;
                tx.commit().await.map_err(db_error)?;
            }
            AuditRecord::ParticipantsLeft { departures } => {
                let mut tx = self.pool.begin().await.map_err(db_error)?;
                for departure in departures {
                    record_departure(&mut tx, room_id, departure).await?;
                }
                tx.commit().await.map_err(db_error)?;
            }
        }
        Ok(())
    }
}

async fn record_departure(
    tx: &mut Transaction<'_, Postgres>,
    room_id: &str,
    departure: &ParticipantDeparture,
) -> Result<(), RoomError> {
    sqlx::query(
        r#"
        UPDATE room_participants
        SET left_at = COALESCE(left_at, $3),
            leave_reason = COALESCE(leave_reason, $4),
            debited_seconds = GREATEST(debited_seconds, $5)
        WHERE room_id = $1 AND connection_id = $2
        "#,
    )
    .bind(room_id)
    .bind(&departure.connection_id)
    .bind(to_timestamp(departure.left_at)?)
    .bind(departure.reason.as_str())
    .bind(i64::try_from(departure.debited_seconds).map_err(|_| out_of_range("debited_seconds"))?)
    .execute(&mut **tx)
    .await
    .map_err(db_error)?;
    Ok(())
}

fn to_timestamp(epoch: i64) -> Result<DateTime<Utc>, RoomError> {
    DateTime::from_timestamp(epoch, 0).ok_or_else(|| out_of_range("timestamp"))
}

fn out_of_range(field: &str) -> RoomError {
    RoomError::AuditRejected(format!("{field} out of range"))
}

/// Data exceptions (SQLSTATE class 22) and constraint violations (23) fail
/// the same way on every replay; everything else is treated as transient.
fn db_error(e: sqlx::Error) -> RoomError {
    let permanent = e
        .as_database_error()
        .and_then(|db| db.code())
        .is_some_and(|code| code.starts_with("22") || code.starts_with("23"));
    if permanent {
        RoomError::AuditRejected(e.to_string())
    } else {
        RoomError::Registry(e.to_string())
    }
}

#[async_trait::async_trait]
impl RoomRegistry for PgRoomRegistry {
    #[instrument(skip_all, name = "rc.registry.record", fields(room_id = %room_id, kind = record.kind()))]
    async fn record(&self, room_id: &str, record: &AuditRecord) -> Result<(), RoomError> {
        let started = Instant::now();
        let result = self.apply(room_id, record).await;
        metrics::record_registry_latency("record", started.elapsed());

        match &result {
            Ok(()) => {
                debug!(target: "rc.registry.pg", room_id = %room_id, kind = record.kind(), "Recorded audit entry");
            }
            Err(e) => {
                warn!(target: "rc.registry.pg", room_id = %room_id, kind = record.kind(), error = %e, "Audit write failed");
            }
        }
        result
    }

    #[instrument(skip_all, name = "rc.registry.purge", fields(room_id = %room_id))]
    async fn purge(&self, room_id: &str) -> Result<(), RoomError> {
        let started = Instant::now();

        // room_participants rows go with the room via ON DELETE CASCADE
        let result = sqlx::query("DELETE FROM rooms WHERE room_id = $1")
            .bind(room_id)
            .execute(&self.pool)
            .await
            .map_err(db_error);
        metrics::record_registry_latency("purge", started.elapsed());

        let deleted = result?.rows_affected();
        debug!(target: "rc.registry.pg", room_id = %room_id, deleted, "Purged room");
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::actors::{LeaveReason, RoomType};
    use common::types::Wallet;

    const ROOM: &str = "room-pg";

    fn opened(opened_at: i64) -> AuditRecord {
        AuditRecord::RoomOpened {
            room_type: RoomType::Ephemeral,
            host_wallet: Wallet::new("0xa11ce"),
            capacity: 6,
            channel_name: "chan-pg".to_string(),
            chain_id: 8453,
            booking_id: None,
            opened_at,
        }
    }

    fn joined(connection_id: &str, joined_at: i64) -> AuditRecord {
        AuditRecord::ParticipantJoined {
            connection_id: connection_id.to_string(),
            wallet: Wallet::new("0xa11ce"),
            external_uid: 42,
            joined_at,
        }
    }

    fn departure(connection_id: &str, left_at: i64, debited_seconds: u64) -> ParticipantDeparture {
        ParticipantDeparture {
            connection_id: connection_id.to_string(),
            left_at,
            debited_seconds,
            reason: LeaveReason::Voluntary,
        }
    }

    async fn count(pool: &PgPool, table: &str) -> i64 {
        let (n,): (i64,) = sqlx::query_as(&format!(
            "SELECT COUNT(*) FROM {table} WHERE room_id = $1"
        ))
        .bind(ROOM)
        .fetch_one(pool)
        .await
        .unwrap();
        n
    }

    #[sqlx::test(migrations = "./migrations")]
    async fn test_replayed_sequence_keeps_first_writes(pool: PgPool) {
        let registry = PgRoomRegistry::new(pool.clone());

        // Every record delivered twice, as after a crash before the snapshot save.
        for record in [
            opened(1_000),
            opened(1_000),
            joined("c1", 1_010),
            joined("c1", 1_010),
            AuditRecord::ParticipantLeft {
                departure: departure("c1", 1_100, 90),
            },
            AuditRecord::ParticipantLeft {
                departure: departure("c1", 1_100, 90),
            },
            AuditRecord::RoomClosed { closed_at: 1_100 },
            AuditRecord::RoomClosed { closed_at: 1_200 },
        ] {
            registry.record(ROOM, &record).await.unwrap();
        }

        assert_eq!(count(&pool, "rooms").await, 1);
        assert_eq!(count(&pool, "room_participants").await, 1);

        let (status, closed_at): (String, Option<DateTime<Utc>>) =
            sqlx::query_as("SELECT status, closed_at FROM rooms WHERE room_id = $1")
                .bind(ROOM)
                .fetch_one(&pool)
                .await
                .unwrap();
        assert_eq!(status, "closed");
        assert_eq!(closed_at.map(|t| t.timestamp()), Some(1_100), "first close wins");

        let (left_at, reason, debited): (Option<DateTime<Utc>>, Option<String>, i64) =
            sqlx::query_as(
                "SELECT left_at, leave_reason, debited_seconds FROM room_participants \
                 WHERE room_id = $1 AND connection_id = $2",
            )
            .bind(ROOM)
            .bind("c1")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(left_at.map(|t| t.timestamp()), Some(1_100));
        assert_eq!(reason.as_deref(), Some("voluntary"));
        assert_eq!(debited, 90);
    }

    #[sqlx::test(migrations = "./migrations")]
    async fn test_batch_departure_never_lowers_debit(pool: PgPool) {
        let registry = PgRoomRegistry::new(pool.clone());
        registry.record(ROOM, &opened(1_000)).await.unwrap();
        registry.record(ROOM, &joined("c1", 1_000)).await.unwrap();
        registry.record(ROOM, &joined("c2", 1_000)).await.unwrap();

        registry
            .record(
                ROOM,
                &AuditRecord::ParticipantLeft {
                    departure: departure("c1", 1_050, 50),
                },
            )
            .await
            .unwrap();
        registry
            .record(
                ROOM,
                &AuditRecord::ParticipantsLeft {
                    departures: vec![departure("c1", 1_080, 30), departure("c2", 1_080, 80)],
                },
            )
            .await
            .unwrap();

        let rows: Vec<(String, i64, Option<DateTime<Utc>>)> = sqlx::query_as(
            "SELECT connection_id, debited_seconds, left_at FROM room_participants \
             WHERE room_id = $1 ORDER BY connection_id",
        )
        .bind(ROOM)
        .fetch_all(&pool)
        .await
        .unwrap();
        let summary: Vec<(String, i64, Option<i64>)> = rows
            .into_iter()
            .map(|(id, debited, left)| (id, debited, left.map(|t| t.timestamp())))
            .collect();
        assert_eq!(
            summary,
            vec![
                ("c1".to_string(), 50, Some(1_050)),
                ("c2".to_string(), 80, Some(1_080)),
            ]
        );
    }

    #[sqlx::test(migrations = "./migrations")]
    async fn test_purge_removes_room_and_participants(pool: PgPool) {
        let registry = PgRoomRegistry::new(pool.clone());
        registry.record(ROOM, &opened(1_000)).await.unwrap();
        registry.record(ROOM, &joined("c1", 1_000)).await.unwrap();

        registry.purge(ROOM).await.unwrap();
        assert_eq!(count(&pool, "rooms").await, 0);
        assert_eq!(count(&pool, "room_participants").await, 0);

        // Idempotent.
        registry.purge(ROOM).await.unwrap();
    }

    #[sqlx::test(migrations = "./migrations")]
    async fn test_constraint_violation_is_rejected_for_good(pool: PgPool) {
        let registry = PgRoomRegistry::new(pool);

        // No rooms row: the participant foreign key fails on every replay.
        let err = registry.record(ROOM, &joined("c1", 1_000)).await.unwrap_err();
        assert!(matches!(err, RoomError::AuditRejected(_)), "got {err:?}");
        assert!(!err.is_retryable());

        let mut record = opened(1_000);
        if let AuditRecord::RoomOpened { chain_id, .. } = &mut record {
            *chain_id = u64::MAX;
        }
        let err = registry.record(ROOM, &record).await.unwrap_err();
        assert!(matches!(err, RoomError::AuditRejected(_)));
    }

    #[test]
    fn test_to_timestamp() {
        let ts = to_timestamp(1_700_000_000).unwrap();
        assert_eq!(ts.timestamp(), 1_700_000_000);
        assert!(to_timestamp(i64::MAX).is_err());
    }

    #[test]
    fn test_out_of_range_is_rejected_for_good() {
        let err = out_of_range("chain_id");
        assert!(matches!(err, RoomError::AuditRejected(ref msg) if msg == "chain_id out of range"));
        assert_eq!(err.error_code(), "storage_error");
        assert!(!err.is_retryable());
    }
}
