//! Hibernation, fencing and audit outbox recovery.
//!
//! A room actor can be stopped at any point and a new one started for the
//! same room id. These tests check that the new actor resumes from the stored
//! snapshot, that the old one can no longer write, and that audit records
//! survive registry outages and restarts.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use rc_test_utils::{RoomHarness, TestParticipant, TestRoomSpec, START_EPOCH};
use room_coordinator::actors::RoomStatus;
use room_coordinator::errors::RoomError;

fn alice() -> TestParticipant {
    TestParticipant::new("conn-alice", "0xa11ce")
}

#[tokio::test(start_paused = true)]
async fn test_rehydrated_room_resumes_tick() {
    let harness = RoomHarness::new();
    harness.fund(&alice(), 600);

    let (room, task) = harness.spawn_room("room-hibernate");
    room.init(TestRoomSpec::ephemeral().build()).await.unwrap();
    room.join(alice().join_request()).await.unwrap();
    harness.advance_secs(10).await;
    room.heartbeat("conn-alice").await.unwrap();
    let before = room.state().await.unwrap();
    assert_eq!(before.generation, 1);

    harness.stop_room(&room, task).await;
    assert!(room.is_closed());

    let (room, _task) = harness.spawn_room("room-hibernate");
    let after = room.state().await.unwrap();
    assert_eq!(after.generation, 2);
    assert_eq!(after.status, RoomStatus::Active);
    assert_eq!(after.room, before.room);
    assert_eq!(after.participants, before.participants);
    assert!(after.tick_armed);
    assert_eq!(after.next_tick_at, Some(START_EPOCH + 30));

    // The deadline stored before hibernation still fires on time.
    harness.advance_secs(20).await;
    assert_eq!(harness.ledger.debited_for("conn-alice"), 30);
    let view = room.state().await.unwrap();
    assert_eq!(view.participants[0].last_metered_at, START_EPOCH + 30);
    assert_eq!(view.next_tick_at, Some(START_EPOCH + 60));
}

#[tokio::test(start_paused = true)]
async fn test_rehydrated_closed_room_stays_closed() {
    let harness = RoomHarness::new();
    let (room, task) = harness.spawn_room("room-closed-rehydrate");
    room.init(TestRoomSpec::scheduled().build()).await.unwrap();
    room.close(None).await.unwrap();
    harness.stop_room(&room, task).await;

    let (room, _task) = harness.spawn_room("room-closed-rehydrate");
    let view = room.state().await.unwrap();
    assert_eq!(view.status, RoomStatus::Closed);
    assert!(!view.tick_armed);

    let init = room.init(TestRoomSpec::scheduled().build()).await.unwrap();
    assert!(init.already_initialized);
    assert_eq!(init.status, RoomStatus::Closed);
}

#[tokio::test(start_paused = true)]
async fn test_older_incarnation_is_fenced_out() {
    let harness = RoomHarness::new();

    let (stale, stale_task) = harness.spawn_room("room-fenced");
    assert_eq!(stale.state().await.unwrap().generation, 1);

    let (current, _task) = harness.spawn_room("room-fenced");
    assert_eq!(current.state().await.unwrap().generation, 2);

    let result = stale.init(TestRoomSpec::ephemeral().build()).await;
    assert!(matches!(result, Err(RoomError::FencedOut(_))));

    // The fenced actor stops instead of serving further requests.
    stale_task.await.unwrap();
    assert!(stale.state().await.is_err());

    assert_eq!(
        current.state().await.unwrap().status,
        RoomStatus::Uninitialized
    );
    assert!(harness.store.snapshot("room-fenced").is_none());

    let init = current.init(TestRoomSpec::ephemeral().build()).await.unwrap();
    assert!(!init.already_initialized);
    assert_eq!(harness.store.generation("room-fenced"), 2);
}

#[tokio::test(start_paused = true)]
async fn test_audit_outbox_survives_registry_outage() {
    let harness = RoomHarness::new();
    harness.fund(&alice(), 600);
    let (room, _task) = harness.spawn_room("room-outbox");

    harness.registry.set_failing(true);
    room.init(TestRoomSpec::ephemeral().build()).await.unwrap();
    assert!(room.join(alice().join_request()).await.unwrap().is_granted());

    let view = room.state().await.unwrap();
    assert_eq!(view.pending_audit, 2);
    assert!(harness.registry.records_for("room-outbox").is_empty());
    assert_eq!(harness.metrics.pending_audit_count(), 2);
    assert_eq!(
        harness
            .store
            .snapshot("room-outbox")
            .unwrap()
            .pending_audit
            .len(),
        2
    );

    harness.registry.set_failing(false);
    room.heartbeat("conn-alice").await.unwrap();

    assert_eq!(room.state().await.unwrap().pending_audit, 0);
    assert_eq!(
        harness.registry.kinds_for("room-outbox"),
        vec!["room_opened", "participant_joined"]
    );
    assert_eq!(harness.metrics.pending_audit_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_audit_outbox_replays_after_restart() {
    let harness = RoomHarness::new();
    harness.fund(&alice(), 600);

    harness.registry.set_failing(true);
    let (room, task) = harness.spawn_room("room-outbox-restart");
    room.init(TestRoomSpec::ephemeral().build()).await.unwrap();
    room.join(alice().join_request()).await.unwrap();
    room.leave("conn-alice").await.unwrap();
    assert_eq!(room.state().await.unwrap().pending_audit, 4);
    harness.stop_room(&room, task).await;

    harness.registry.set_failing(false);
    let (room, _task) = harness.spawn_room("room-outbox-restart");
    let view = room.state().await.unwrap();
    assert_eq!(view.pending_audit, 0);
    assert_eq!(view.status, RoomStatus::Closed);
    assert_eq!(
        harness.registry.kinds_for("room-outbox-restart"),
        vec![
            "room_opened",
            "participant_joined",
            "participant_left",
            "room_closed"
        ]
    );
    assert!(harness
        .store
        .snapshot("room-outbox-restart")
        .unwrap()
        .pending_audit
        .is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_directory_eviction_rehydrates_through_directory() {
    let harness = RoomHarness::new();
    harness.fund(&alice(), 600);
    let directory = harness.directory(std::time::Duration::from_secs(3600));

    let room = directory.room("room-dir").await.unwrap();
    room.init(TestRoomSpec::ephemeral().build()).await.unwrap();
    room.join(alice().join_request()).await.unwrap();

    assert!(directory.evict("room-dir").await.unwrap());
    harness.advance_secs(1).await;

    let room = directory.room("room-dir").await.unwrap();
    let view = room.state().await.unwrap();
    assert_eq!(view.generation, 2);
    assert_eq!(view.participants.len(), 1);

    let status = directory.status().await.unwrap();
    assert_eq!(status.room_count, 1);
    assert_eq!(status.participant_count, 1);
}

#[tokio::test(start_paused = true)]
async fn test_rejected_audit_record_does_not_block_the_outbox() {
    let harness = RoomHarness::new();
    harness.fund(&alice(), 600);
    harness.registry.reject_kind("room_opened");
    let (room, task) = harness.spawn_room("room-rejected");

    room.init(TestRoomSpec::ephemeral().build()).await.unwrap();
    room.join(alice().join_request()).await.unwrap();
    room.leave("conn-alice").await.unwrap();

    let view = room.state().await.unwrap();
    assert_eq!(view.pending_audit, 0, "later records were delivered");
    assert_eq!(view.rejected_audit, 1);
    assert_eq!(
        harness.registry.kinds_for("room-rejected"),
        vec!["participant_joined", "participant_left", "room_closed"]
    );
    assert_eq!(harness.metrics.pending_audit_count(), 0);

    // The rejected record stays aside across a restart and is not replayed.
    harness.stop_room(&room, task).await;
    let (room, _task) = harness.spawn_room("room-rejected");
    let view = room.state().await.unwrap();
    assert_eq!(view.pending_audit, 0);
    assert_eq!(view.rejected_audit, 1);
    assert_eq!(harness.registry.kinds_for("room-rejected").len(), 3);
}
