//! `RoomDirectoryActor` - get-or-spawn registry of room actors.
//!
//! One directory runs per RC instance. It guarantees at most one live
//! `RoomActor` per room id on this instance:
//!
//! - `room()` returns the live actor or spawns one, which rehydrates from the
//!   snapshot store before serving messages
//! - `evict()` stops an actor without touching its persisted state
//! - A periodic sweep hibernates rooms that are closed or were never
//!   initialized; rooms are queried off the loop so a slow room never
//!   stalls lookups
//! - Finished actor tasks are reaped on every loop iteration; panics are
//!   logged and counted
//!
//! Across instances, the store's fencing generation ensures a stale actor
//! cannot overwrite a newer one.

use super::messages::{DirectoryMessage, DirectoryStatus, RoomStatus};
use super::metrics::{ActorType, MailboxMonitor};
use super::room::{RoomActor, RoomActorHandle, RoomServices};
use crate::errors::RoomError;
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

const DIRECTORY_CHANNEL_BUFFER: usize = 1000;

/// Upper bound on a room's answer during a sweep.
const SWEEP_STATE_TIMEOUT: Duration = Duration::from_secs(1);

/// Upper bound on each room actor's exit during shutdown.
const ROOM_STOP_TIMEOUT: Duration = Duration::from_secs(5);

/// Handle to the `RoomDirectoryActor`.
#[derive(Clone)]
pub struct RoomDirectoryHandle {
    sender: mpsc::Sender<DirectoryMessage>,
    cancel_token: CancellationToken,
}

impl RoomDirectoryHandle {
    /// Spawn the directory actor and return a handle to it.
    ///
    /// # Arguments
    ///
    /// * `instance_id` - RC instance ID, used in logs
    /// * `services` - Collaborators handed to every room actor
    /// * `sweep_interval` - How often idle rooms are hibernated
    #[must_use]
    pub fn new(instance_id: String, services: RoomServices, sweep_interval: Duration) -> Self {
        let (sender, receiver) = mpsc::channel(DIRECTORY_CHANNEL_BUFFER);
        let cancel_token = CancellationToken::new();

        let actor = RoomDirectoryActor::new(
            instance_id,
            receiver,
            cancel_token.clone(),
            services,
            sweep_interval,
        );
        tokio::spawn(actor.run());

        Self {
            sender,
            cancel_token,
        }
    }

    /// Get the live actor for `room_id`, spawning it if needed.
    ///
    /// # Errors
    ///
    /// Returns `RoomError::Draining` once shutdown has begun.
    pub async fn room(&self, room_id: impl Into<String>) -> Result<RoomActorHandle, RoomError> {
        let (tx, rx) = tokio::sync::oneshot::channel();
        self.sender
            .send(DirectoryMessage::GetRoom {
                room_id: room_id.into(),
                respond_to: tx,
            })
            .await
            .map_err(|e| RoomError::Internal(format!("channel send failed: {e}")))?;

        rx.await
            .map_err(|e| RoomError::Internal(format!("response receive failed: {e}")))?
    }

    /// Stop the actor for `room_id`. Returns whether one was running.
    pub async fn evict(&self, room_id: impl Into<String>) -> Result<bool, RoomError> {
        let (tx, rx) = tokio::sync::oneshot::channel();
        self.sender
            .send(DirectoryMessage::Evict {
                room_id: room_id.into(),
                respond_to: tx,
            })
            .await
            .map_err(|e| RoomError::Internal(format!("channel send failed: {e}")))?;

        rx.await
            .map_err(|e| RoomError::Internal(format!("response receive failed: {e}")))
    }

    pub async fn status(&self) -> Result<DirectoryStatus, RoomError> {
        let (tx, rx) = tokio::sync::oneshot::channel();
        self.sender
            .send(DirectoryMessage::GetStatus { respond_to: tx })
            .await
            .map_err(|e| RoomError::Internal(format!("channel send failed: {e}")))?;

        rx.await
            .map_err(|e| RoomError::Internal(format!("response receive failed: {e}")))
    }

    /// Stop accepting rooms and wait for every room actor to exit.
    pub async fn shutdown(&self) -> Result<(), RoomError> {
        let (tx, rx) = tokio::sync::oneshot::channel();
        self.sender
            .send(DirectoryMessage::Shutdown { respond_to: tx })
            .await
            .map_err(|e| RoomError::Internal(format!("channel send failed: {e}")))?;

        rx.await
            .map_err(|e| RoomError::Internal(format!("response receive failed: {e}")))
    }

    pub fn cancel(&self) {
        self.cancel_token.cancel();
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancel_token.is_cancelled()
    }
}

struct ManagedRoom {
    handle: RoomActorHandle,
    task_handle: JoinHandle<()>,
    spawned_at: Instant,
    /// Distinguishes this actor from a later one spawned for the same id.
    incarnation: u64,
}

/// A room found idle by a sweep, tagged with the incarnation that was asked.
struct IdleRoom {
    room_id: String,
    incarnation: u64,
}

impl ManagedRoom {
    fn is_live(&self) -> bool {
        !self.task_handle.is_finished() && !self.handle.is_closed()
    }
}

pub struct RoomDirectoryActor {
    instance_id: String,
    receiver: mpsc::Receiver<DirectoryMessage>,
    cancel_token: CancellationToken,
    services: RoomServices,
    rooms: HashMap<String, ManagedRoom>,
    accepting_new: bool,
    sweep_interval: Duration,
    mailbox: MailboxMonitor,
    next_incarnation: u64,
    sweep_in_flight: bool,
    sweep_tx: mpsc::Sender<Vec<IdleRoom>>,
    sweep_rx: mpsc::Receiver<Vec<IdleRoom>>,
}

impl RoomDirectoryActor {
    fn new(
        instance_id: String,
        receiver: mpsc::Receiver<DirectoryMessage>,
        cancel_token: CancellationToken,
        services: RoomServices,
        sweep_interval: Duration,
    ) -> Self {
        let mailbox = MailboxMonitor::new(ActorType::Directory, &instance_id);
        let (sweep_tx, sweep_rx) = mpsc::channel(1);
        Self {
            instance_id,
            receiver,
            cancel_token,
            services,
            rooms: HashMap::new(),
            accepting_new: true,
            sweep_interval,
            mailbox,
            next_incarnation: 0,
            sweep_in_flight: false,
            sweep_tx,
            sweep_rx,
        }
    }

    #[instrument(skip_all, name = "rc.actor.directory", fields(instance_id = %self.instance_id))]
    async fn run(mut self) {
        info!(
            target: "rc.actor.directory",
            instance_id = %self.instance_id,
            sweep_interval_seconds = self.sweep_interval.as_secs(),
            "RoomDirectoryActor started"
        );

        let mut sweep = tokio::time::interval_at(
            Instant::now() + self.sweep_interval,
            self.sweep_interval,
        );
        sweep.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            self.check_room_health().await;

            tokio::select! {
                () = self.cancel_token.cancelled() => {
                    info!(
                        target: "rc.actor.directory",
                        instance_id = %self.instance_id,
                        "RoomDirectoryActor received cancellation signal"
                    );
                    self.graceful_shutdown().await;
                    break;
                }

                _ = sweep.tick() => {
                    self.start_sweep();
                }

                Some(idle) = self.sweep_rx.recv() => {
                    self.hibernate(idle);
                }

                msg = self.receiver.recv() => {
                    match msg {
                        Some(message) => {
                            self.handle_message(message).await;
                            self.mailbox.record_processed(self.receiver.len());
                        }
                        None => {
                            info!(
                                target: "rc.actor.directory",
                                instance_id = %self.instance_id,
                                "RoomDirectoryActor channel closed, exiting"
                            );
                            self.graceful_shutdown().await;
                            break;
                        }
                    }
                }
            }
        }

        info!(
            target: "rc.actor.directory",
            instance_id = %self.instance_id,
            rooms_remaining = self.rooms.len(),
            messages_processed = self.mailbox.messages_processed(),
            "RoomDirectoryActor stopped"
        );
    }

    async fn handle_message(&mut self, message: DirectoryMessage) {
        match message {
            DirectoryMessage::GetRoom {
                room_id,
                respond_to,
            } => {
                let result = self.get_or_spawn(room_id);
                let _ = respond_to.send(result);
            }
            DirectoryMessage::Evict {
                room_id,
                respond_to,
            } => {
                let evicted = self.evict(&room_id, "requested");
                let _ = respond_to.send(evicted);
            }
            DirectoryMessage::GetStatus { respond_to } => {
                let _ = respond_to.send(self.status());
            }
            DirectoryMessage::Shutdown { respond_to } => {
                self.graceful_shutdown().await;
                let _ = respond_to.send(());
                self.cancel_token.cancel();
            }
        }
    }

    fn get_or_spawn(&mut self, room_id: String) -> Result<RoomActorHandle, RoomError> {
        if !self.accepting_new {
            return Err(RoomError::Draining);
        }

        if let Some(managed) = self.rooms.get(&room_id) {
            if managed.is_live() {
                return Ok(managed.handle.clone());
            }
            // Exited since the last health check; replace it below.
            if let Some(stale) = self.rooms.remove(&room_id) {
                stale.task_handle.abort();
                self.services.metrics.room_stopped();
            }
        }

        let (handle, task_handle) = RoomActor::spawn(
            room_id.clone(),
            self.services.clone(),
            self.cancel_token.child_token(),
        );
        self.services.metrics.room_spawned();
        self.next_incarnation += 1;
        self.rooms.insert(
            room_id.clone(),
            ManagedRoom {
                handle: handle.clone(),
                task_handle,
                spawned_at: Instant::now(),
                incarnation: self.next_incarnation,
            },
        );

        debug!(
            target: "rc.actor.directory",
            instance_id = %self.instance_id,
            room_id = %room_id,
            total_rooms = self.rooms.len(),
            "Spawned room actor"
        );
        Ok(handle)
    }

    /// Cancel and forget one actor; its exit is awaited off the loop.
    fn evict(&mut self, room_id: &str, reason: &'static str) -> bool {
        let Some(managed) = self.rooms.remove(room_id) else {
            return false;
        };
        managed.handle.cancel();
        self.services.metrics.room_stopped();

        let instance_id = self.instance_id.clone();
        let room_id_owned = room_id.to_string();
        tokio::spawn(async move {
            match tokio::time::timeout(ROOM_STOP_TIMEOUT, managed.task_handle).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    warn!(
                        target: "rc.actor.directory",
                        instance_id = %instance_id,
                        room_id = %room_id_owned,
                        error = ?e,
                        "Room actor task failed during eviction"
                    );
                }
                Err(_) => {
                    warn!(
                        target: "rc.actor.directory",
                        instance_id = %instance_id,
                        room_id = %room_id_owned,
                        "Room actor eviction timed out"
                    );
                }
            }
        });

        info!(
            target: "rc.actor.directory",
            instance_id = %self.instance_id,
            room_id = %room_id,
            reason,
            total_rooms = self.rooms.len(),
            "Room actor evicted"
        );
        true
    }

    fn status(&self) -> DirectoryStatus {
        DirectoryStatus {
            room_count: self.rooms.len(),
            participant_count: self.services.metrics.participant_count(),
            is_draining: !self.accepting_new,
        }
    }

    /// Ask every room for its state on a separate task; idle ones come back
    /// through `sweep_rx`. Rooms that are closed, or that were spawned a full
    /// sweep interval ago and never initialized, count as idle.
    fn start_sweep(&mut self) {
        if self.sweep_in_flight || self.rooms.is_empty() {
            return;
        }
        self.sweep_in_flight = true;

        let mut queries = JoinSet::new();
        for (room_id, managed) in &self.rooms {
            let room_id = room_id.clone();
            let handle = managed.handle.clone();
            let incarnation = managed.incarnation;
            let old_enough = managed.spawned_at.elapsed() >= self.sweep_interval;
            let instance_id = self.instance_id.clone();

            queries.spawn(async move {
                let view = match tokio::time::timeout(SWEEP_STATE_TIMEOUT, handle.state()).await {
                    Ok(Ok(view)) => view,
                    Ok(Err(_)) => return None,
                    Err(_) => {
                        warn!(
                            target: "rc.actor.directory",
                            instance_id = %instance_id,
                            room_id = %room_id,
                            "Room actor did not answer sweep in time"
                        );
                        return None;
                    }
                };
                let hibernate = match view.status {
                    RoomStatus::Closed => true,
                    RoomStatus::Uninitialized => view.participants.is_empty() && old_enough,
                    RoomStatus::Active => false,
                };
                hibernate.then_some(IdleRoom {
                    room_id,
                    incarnation,
                })
            });
        }

        let sweep_tx = self.sweep_tx.clone();
        tokio::spawn(async move {
            let mut idle = Vec::new();
            while let Some(joined) = queries.join_next().await {
                if let Ok(Some(room)) = joined {
                    idle.push(room);
                }
            }
            let _ = sweep_tx.send(idle).await;
        });
    }

    /// Evict the rooms a sweep found idle, unless they were replaced since.
    fn hibernate(&mut self, idle: Vec<IdleRoom>) {
        self.sweep_in_flight = false;

        let mut hibernated = 0;
        for room in idle {
            let unchanged = self
                .rooms
                .get(&room.room_id)
                .is_some_and(|managed| managed.incarnation == room.incarnation);
            if unchanged && self.evict(&room.room_id, "idle") {
                hibernated += 1;
            }
        }

        if hibernated > 0 {
            debug!(
                target: "rc.actor.directory",
                instance_id = %self.instance_id,
                hibernated,
                total_rooms = self.rooms.len(),
                "Sweep complete"
            );
        }
    }

    async fn graceful_shutdown(&mut self) {
        self.accepting_new = false;
        if self.rooms.is_empty() {
            return;
        }

        info!(
            target: "rc.actor.directory",
            instance_id = %self.instance_id,
            room_count = self.rooms.len(),
            "Stopping room actors"
        );

        for managed in self.rooms.values() {
            managed.handle.cancel();
        }

        for (room_id, managed) in self.rooms.drain() {
            match tokio::time::timeout(ROOM_STOP_TIMEOUT, managed.task_handle).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    warn!(
                        target: "rc.actor.directory",
                        instance_id = %self.instance_id,
                        room_id = %room_id,
                        error = ?e,
                        "Room actor task failed during shutdown"
                    );
                }
                Err(_) => {
                    warn!(
                        target: "rc.actor.directory",
                        instance_id = %self.instance_id,
                        room_id = %room_id,
                        "Room actor shutdown timed out"
                    );
                }
            }
            self.services.metrics.room_stopped();
        }

        info!(
            target: "rc.actor.directory",
            instance_id = %self.instance_id,
            "Graceful shutdown complete"
        );
    }

    async fn check_room_health(&mut self) {
        let finished: Vec<String> = self
            .rooms
            .iter()
            .filter(|(_, managed)| managed.task_handle.is_finished())
            .map(|(room_id, _)| room_id.clone())
            .collect();

        for room_id in finished {
            let Some(managed) = self.rooms.remove(&room_id) else {
                continue;
            };
            match managed.task_handle.await {
                Ok(()) => {
                    info!(
                        target: "rc.actor.directory",
                        instance_id = %self.instance_id,
                        room_id = %room_id,
                        "Room actor exited"
                    );
                }
                Err(join_error) if join_error.is_panic() => {
                    error!(
                        target: "rc.actor.directory",
                        instance_id = %self.instance_id,
                        room_id = %room_id,
                        error = ?join_error,
                        "Room actor panicked"
                    );
                    self.services.metrics.record_panic(ActorType::Room);
                }
                Err(_) => {}
            }
            self.services.metrics.room_stopped();
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::actors::messages::{JoinRequest, RoomSpec, RoomType};
    use crate::actors::ActorMetrics;
    use crate::clock::mock::TokioClock;
    use crate::config::RoomPolicy;
    use crate::registry::mock::MockRoomRegistry;
    use crate::services::issuer::mock::MockCredentialIssuer;
    use crate::services::ledger::mock::MockCreditLedger;
    use crate::store::mock::MockRoomStore;
    use crate::store::{RoomSnapshot, RoomStateStore};
    use common::types::Wallet;
    use std::sync::Arc;

    const SWEEP: Duration = Duration::from_secs(60);

    fn services(store: Arc<dyn RoomStateStore>) -> RoomServices {
        let wallet = Wallet::new("0xa1");
        RoomServices {
            ledger: Arc::new(MockCreditLedger::new().with_balance(&wallet, 3600)),
            issuer: Arc::new(MockCredentialIssuer::new()),
            registry: Arc::new(MockRoomRegistry::new()),
            store,
            clock: Arc::new(TokioClock::starting_at(1_000_000)),
            policy: RoomPolicy::default(),
            metrics: ActorMetrics::new(),
        }
    }

    fn directory(store: Arc<MockRoomStore>) -> RoomDirectoryHandle {
        RoomDirectoryHandle::new("rc-test".to_string(), services(store), SWEEP)
    }

    fn spec() -> RoomSpec {
        RoomSpec {
            room_type: RoomType::Ephemeral,
            host_wallet: Wallet::new("0xa1"),
            capacity: None,
            channel_name: "room-chan".to_string(),
            chain_id: 8453,
            booking_id: None,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_room_returns_the_same_actor() {
        let directory = directory(Arc::new(MockRoomStore::new()));

        let first = directory.room("r1").await.unwrap();
        first.init(spec()).await.unwrap();

        let second = directory.room("r1").await.unwrap();
        let view = second.state().await.unwrap();
        assert_eq!(view.status, RoomStatus::Active);
        assert_eq!(view.generation, 1);

        let status = directory.status().await.unwrap();
        assert_eq!(status.room_count, 1);
        assert!(!status.is_draining);
    }

    #[tokio::test(start_paused = true)]
    async fn test_evicted_room_rehydrates_with_new_generation() {
        let store = Arc::new(MockRoomStore::new());
        let directory = directory(Arc::clone(&store));

        let room = directory.room("r1").await.unwrap();
        room.init(spec()).await.unwrap();
        let granted = room
            .join(JoinRequest::for_wallet("c1", Wallet::new("0xa1")))
            .await
            .unwrap();
        assert!(granted.is_granted());

        assert!(directory.evict("r1").await.unwrap());
        assert!(!directory.evict("r1").await.unwrap());

        let room = directory.room("r1").await.unwrap();
        let view = room.state().await.unwrap();
        assert_eq!(view.generation, 2);
        assert_eq!(view.participants.len(), 1);
        assert!(view.tick_armed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_sweep_hibernates_closed_and_uninitialized_rooms() {
        let directory = directory(Arc::new(MockRoomStore::new()));

        let closed = directory.room("closed").await.unwrap();
        closed.init(spec()).await.unwrap();
        closed.close(None).await.unwrap();

        directory.room("never-initialized").await.unwrap();

        let active = directory.room("active").await.unwrap();
        active.init(spec()).await.unwrap();
        active
            .join(JoinRequest::for_wallet("c1", Wallet::new("0xa1")))
            .await
            .unwrap();

        tokio::time::sleep(SWEEP + Duration::from_secs(1)).await;

        let status = directory.status().await.unwrap();
        assert_eq!(status.room_count, 1);
        assert!(!active.is_cancelled());
        assert!(closed.is_cancelled());
    }

    /// Never finishes loading `stuck`, so that room's actor never answers.
    struct StallingStore(MockRoomStore);

    #[async_trait::async_trait]
    impl RoomStateStore for StallingStore {
        async fn load(&self, room_id: &str) -> Result<Option<RoomSnapshot>, RoomError> {
            if room_id == "stuck" {
                std::future::pending::<()>().await;
            }
            self.0.load(room_id).await
        }

        async fn claim(&self, room_id: &str) -> Result<u64, RoomError> {
            self.0.claim(room_id).await
        }

        async fn save(
            &self,
            room_id: &str,
            generation: u64,
            snapshot: &RoomSnapshot,
        ) -> Result<(), RoomError> {
            self.0.save(room_id, generation, snapshot).await
        }

        async fn delete(&self, room_id: &str, generation: u64) -> Result<(), RoomError> {
            self.0.delete(room_id, generation).await
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_unresponsive_room_does_not_stall_lookups_during_sweep() {
        let services = services(Arc::new(StallingStore(MockRoomStore::new())));
        let directory = RoomDirectoryHandle::new("rc-test".to_string(), services, SWEEP);

        let closed = directory.room("closed").await.unwrap();
        closed.init(spec()).await.unwrap();
        closed.close(None).await.unwrap();
        directory.room("stuck").await.unwrap();

        // Just past the sweep tick: the stuck room's query is still pending.
        tokio::time::sleep(SWEEP + Duration::from_millis(1)).await;
        let started = Instant::now();
        let status = directory.status().await.unwrap();
        assert!(started.elapsed() < SWEEP_STATE_TIMEOUT / 2);
        assert_eq!(status.room_count, 2);
        assert!(directory.room("fresh").await.is_ok());

        // Once the stuck query times out the closed room is hibernated.
        tokio::time::sleep(SWEEP_STATE_TIMEOUT * 2).await;
        assert!(closed.is_cancelled());
        let status = directory.status().await.unwrap();
        assert_eq!(status.room_count, 2, "stuck and fresh remain");
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_stops_rooms_and_rejects_new_ones() {
        let directory = directory(Arc::new(MockRoomStore::new()));

        let room = directory.room("r1").await.unwrap();
        room.init(spec()).await.unwrap();

        directory.shutdown().await.unwrap();
        assert!(room.is_cancelled());
        assert!(room.state().await.is_err());
        assert!(directory.is_cancelled());

        // The actor may already have exited; either way no room is handed out.
        assert!(directory.room("r2").await.is_err());
    }
}
