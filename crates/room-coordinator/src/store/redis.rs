//! Redis-backed room snapshot store.
//!
//! # Key Patterns
//!
//! - `room:{id}:generation` - fencing generation (INCR on claim)
//! - `room:{id}:state` - room snapshot (JSON)
//!
//! `MultiplexedConnection` is cheap to clone and safe to use concurrently,
//! so every call clones it instead of sharing a lock.

use super::lua_scripts;
use super::{RoomSnapshot, RoomStateStore};
use crate::errors::RoomError;
use crate::observability::metrics;
use redis::aio::MultiplexedConnection;
use redis::{AsyncCommands, Client, Script};
use std::time::Instant;
use tracing::{debug, error, instrument, warn};

fn generation_key(room_id: &str) -> String {
    format!("room:{room_id}:generation")
}

fn state_key(room_id: &str) -> String {
    format!("room:{room_id}:state")
}

#[derive(Clone)]
pub struct RedisRoomStore {
    connection: MultiplexedConnection,
    save_script: Script,
    delete_script: Script,
}

impl RedisRoomStore {
    /// Connect to Redis.
    ///
    /// # Errors
    ///
    /// Returns `RoomError::Storage` if the URL is invalid or the connection
    /// cannot be established.
    pub async fn connect(redis_url: &str) -> Result<Self, RoomError> {
        // Do not log the URL: it may carry a password.
        let client = Client::open(redis_url).map_err(|e| {
            error!(target: "rc.store.redis", error = %e, "Failed to open Redis client");
            RoomError::Storage(format!("Failed to open Redis client: {e}"))
        })?;

        let connection = client
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| {
                error!(target: "rc.store.redis", error = %e, "Failed to connect to Redis");
                RoomError::Storage(format!("Failed to connect to Redis: {e}"))
            })?;

        Ok(Self {
            connection,
            save_script: Script::new(lua_scripts::FENCED_SAVE),
            delete_script: Script::new(lua_scripts::FENCED_DELETE),
        })
    }

    /// Round-trip a PING, for readiness checks.
    ///
    /// # Errors
    ///
    /// Returns `RoomError::Storage` if Redis does not answer.
    pub async fn ping(&self) -> Result<(), RoomError> {
        let mut conn = self.connection.clone();
        let _: String = redis::cmd("PING")
            .query_async(&mut conn)
            .await
            .map_err(|e| RoomError::Storage(format!("PING failed: {e}")))?;
        Ok(())
    }

    fn fenced_result(room_id: &str, generation: u64, code: i64, op: &str) -> Result<(), RoomError> {
        match code {
            1 => Ok(()),
            0 => {
                warn!(
                    target: "rc.store.redis",
                    room_id = %room_id,
                    generation,
                    op,
                    "Fenced out by a newer room actor"
                );
                metrics::record_fenced_out();
                Err(RoomError::FencedOut(format!(
                    "generation {generation} is stale"
                )))
            }
            _ => {
                error!(
                    target: "rc.store.redis",
                    room_id = %room_id,
                    result = code,
                    "Invalid generation format in Redis"
                );
                Err(RoomError::Storage("invalid generation format".to_string()))
            }
        }
    }
}

#[async_trait::async_trait]
impl RoomStateStore for RedisRoomStore {
    #[instrument(skip_all, name = "rc.store.load", fields(room_id = %room_id))]
    async fn load(&self, room_id: &str) -> Result<Option<RoomSnapshot>, RoomError> {
        let mut conn = self.connection.clone();
        let started = Instant::now();

        let raw: Option<String> = conn.get(state_key(room_id)).await.map_err(|e| {
            warn!(target: "rc.store.redis", error = %e, room_id = %room_id, "Failed to load snapshot");
            RoomError::Storage(format!("Failed to load snapshot: {e}"))
        })?;
        metrics::record_store_latency("load", started.elapsed());

        raw.map(|json| {
            serde_json::from_str(&json).map_err(|e| {
                error!(target: "rc.store.redis", error = %e, room_id = %room_id, "Corrupt room snapshot");
                RoomError::Storage(format!("corrupt snapshot: {e}"))
            })
        })
        .transpose()
    }

    #[instrument(skip_all, name = "rc.store.claim", fields(room_id = %room_id))]
    async fn claim(&self, room_id: &str) -> Result<u64, RoomError> {
        let mut conn = self.connection.clone();
        let started = Instant::now();

        let generation: u64 = conn.incr(generation_key(room_id), 1).await.map_err(|e| {
            warn!(target: "rc.store.redis", error = %e, room_id = %room_id, "Failed to claim room");
            RoomError::Storage(format!("Failed to claim room: {e}"))
        })?;
        metrics::record_store_latency("claim", started.elapsed());

        debug!(target: "rc.store.redis", room_id = %room_id, generation, "Claimed room");
        Ok(generation)
    }

    #[instrument(skip_all, name = "rc.store.save", fields(room_id = %room_id, generation = generation))]
    async fn save(
        &self,
        room_id: &str,
        generation: u64,
        snapshot: &RoomSnapshot,
    ) -> Result<(), RoomError> {
        let json = serde_json::to_string(snapshot)
            .map_err(|e| RoomError::Internal(format!("snapshot encode failed: {e}")))?;

        let mut conn = self.connection.clone();
        let started = Instant::now();
        let code: i64 = self
            .save_script
            .key(generation_key(room_id))
            .key(state_key(room_id))
            .arg(generation)
            .arg(json)
            .invoke_async(&mut conn)
            .await
            .map_err(|e| {
                warn!(target: "rc.store.redis", error = %e, room_id = %room_id, "Failed to save snapshot");
                RoomError::Storage(format!("Failed to save snapshot: {e}"))
            })?;
        metrics::record_store_latency("save", started.elapsed());

        Self::fenced_result(room_id, generation, code, "save")
    }

    #[instrument(skip_all, name = "rc.store.delete", fields(room_id = %room_id, generation = generation))]
    async fn delete(&self, room_id: &str, generation: u64) -> Result<(), RoomError> {
        let mut conn = self.connection.clone();
        let started = Instant::now();
        let code: i64 = self
            .delete_script
            .key(generation_key(room_id))
            .key(state_key(room_id))
            .arg(generation)
            .invoke_async(&mut conn)
            .await
            .map_err(|e| {
                warn!(target: "rc.store.redis", error = %e, room_id = %room_id, "Failed to delete snapshot");
                RoomError::Storage(format!("Failed to delete snapshot: {e}"))
            })?;
        metrics::record_store_latency("delete", started.elapsed());

        Self::fenced_result(room_id, generation, code, "delete")
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_key_layout() {
        assert_eq!(generation_key("abc"), "room:abc:generation");
        assert_eq!(state_key("abc"), "room:abc:state");
    }

    #[test]
    fn test_fenced_result_codes() {
        assert!(RedisRoomStore::fenced_result("r", 2, 1, "save").is_ok());
        assert!(matches!(
            RedisRoomStore::fenced_result("r", 2, 0, "save"),
            Err(RoomError::FencedOut(_))
        ));
        assert!(matches!(
            RedisRoomStore::fenced_result("r", 2, -1, "delete"),
            Err(RoomError::Storage(_))
        ));
    }

    #[tokio::test]
    async fn test_connect_rejects_malformed_url() {
        let result = RedisRoomStore::connect("not-a-url").await;
        assert!(matches!(result, Err(RoomError::Storage(_))));
    }
}
