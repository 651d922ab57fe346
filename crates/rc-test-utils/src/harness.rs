//! Mock collaborators wired to room actors.
//!
//! Tests drive time with `#[tokio::test(start_paused = true)]`. The harness
//! clock is anchored to tokio's clock, so `advance_secs` moves both the
//! actor's tick deadline and the epoch seconds used for metering.

use crate::fixtures::{TestParticipant, START_EPOCH};
use room_coordinator::actors::{
    ActorMetrics, RoomActor, RoomActorHandle, RoomDirectoryHandle, RoomServices,
};
use room_coordinator::clock::mock::TokioClock;
use room_coordinator::clock::Clock;
use room_coordinator::config::RoomPolicy;
use room_coordinator::registry::mock::MockRoomRegistry;
use room_coordinator::services::issuer::mock::MockCredentialIssuer;
use room_coordinator::services::ledger::mock::MockCreditLedger;
use room_coordinator::store::mock::MockRoomStore;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Lets woken actors run after a time jump.
///
/// Under paused time the runtime only auto-advances once every task is
/// idle, so a short sleep returns after pending ticks have completed.
const SETTLE: Duration = Duration::from_millis(1);

/// Shared mocks plus the policy and clock every spawned actor uses.
pub struct RoomHarness {
    pub ledger: Arc<MockCreditLedger>,
    pub issuer: Arc<MockCredentialIssuer>,
    pub registry: Arc<MockRoomRegistry>,
    pub store: Arc<MockRoomStore>,
    pub clock: Arc<TokioClock>,
    pub metrics: Arc<ActorMetrics>,
    pub policy: RoomPolicy,
}

impl Default for RoomHarness {
    fn default() -> Self {
        Self::new()
    }
}

impl RoomHarness {
    /// Harness with the default policy, starting at [`START_EPOCH`].
    ///
    /// Must be called inside a tokio runtime.
    #[must_use]
    pub fn new() -> Self {
        Self::with_policy(RoomPolicy::default())
    }

    #[must_use]
    pub fn with_policy(policy: RoomPolicy) -> Self {
        Self {
            ledger: Arc::new(MockCreditLedger::new()),
            issuer: Arc::new(MockCredentialIssuer::new()),
            registry: Arc::new(MockRoomRegistry::new()),
            store: Arc::new(MockRoomStore::new()),
            clock: Arc::new(TokioClock::starting_at(START_EPOCH)),
            metrics: ActorMetrics::new(),
            policy,
        }
    }

    #[must_use]
    pub fn services(&self) -> RoomServices {
        RoomServices {
            ledger: self.ledger.clone(),
            issuer: self.issuer.clone(),
            registry: self.registry.clone(),
            store: self.store.clone(),
            clock: self.clock.clone(),
            policy: self.policy.clone(),
            metrics: Arc::clone(&self.metrics),
        }
    }

    /// Spawn a room actor with its own cancellation token.
    #[must_use]
    pub fn spawn_room(&self, room_id: &str) -> (RoomActorHandle, JoinHandle<()>) {
        RoomActor::spawn(
            room_id.to_string(),
            self.services(),
            CancellationToken::new(),
        )
    }

    /// Stop `handle` and wait for its task, as an eviction would.
    pub async fn stop_room(&self, handle: &RoomActorHandle, task: JoinHandle<()>) {
        handle.cancel();
        task.await.expect("room actor task panicked");
    }

    #[must_use]
    pub fn directory(&self, sweep_interval: Duration) -> RoomDirectoryHandle {
        RoomDirectoryHandle::new("rc-test".to_string(), self.services(), sweep_interval)
    }

    /// Set the ledger balance of `participant`'s wallet.
    pub fn fund(&self, participant: &TestParticipant, seconds: i64) {
        self.ledger.set_balance(&participant.wallet, seconds);
    }

    #[must_use]
    pub fn balance(&self, participant: &TestParticipant) -> i64 {
        self.ledger.balance_of(&participant.wallet)
    }

    #[must_use]
    pub fn now(&self) -> i64 {
        self.clock.now_epoch()
    }

    /// Move time forward and let any due ticks finish.
    pub async fn advance_secs(&self, seconds: u64) {
        tokio::time::advance(Duration::from_secs(seconds)).await;
        settle().await;
    }
}

/// Let woken tasks run without moving the epoch clock by a whole second.
pub async fn settle() {
    tokio::time::sleep(SETTLE).await;
}
