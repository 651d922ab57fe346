//! End-to-end metering scenario for a two-seat ephemeral room.
//!
//! One participant drains their balance over thirty minutes while the other
//! stays funded; the room closes when the second one leaves.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use rc_test_utils::{RoomHarness, TestParticipant, TestRoomSpec, START_EPOCH};
use room_coordinator::actors::{CreditEvent, DenialReason, RenewResult, RoomStatus};

#[tokio::test(start_paused = true)]
async fn test_two_seat_room_meters_until_exhaustion() {
    let harness = RoomHarness::new();
    let a = TestParticipant::new("conn-a", "0xaaaa");
    let b = TestParticipant::new("conn-b", "0xbbbb");
    let c = TestParticipant::new("conn-c", "0xcccc");
    harness.fund(&a, 1800);
    harness.fund(&b, 3600);
    harness.fund(&c, 3600);

    let (room, _task) = harness.spawn_room("room-scenario");
    room.init(
        TestRoomSpec::ephemeral()
            .with_capacity(2)
            .with_host(&a)
            .build(),
    )
    .await
    .unwrap();

    // A alone for the first interval.
    let grant = room.join(a.join_request()).await.unwrap().granted().unwrap();
    assert_eq!(grant.remaining_seconds, Some(1800));
    harness.advance_secs(30).await;
    assert_eq!(harness.ledger.debited_for("conn-a"), 30);
    assert_eq!(harness.balance(&a), 1770);

    assert!(room.join(b.join_request()).await.unwrap().is_granted());
    let third = room.join(c.join_request()).await.unwrap();
    assert_eq!(third.denial(), Some(DenialReason::RoomFull));

    let mut a_events = Vec::new();
    for _ in 0..59 {
        harness.advance_secs(30).await;
        let report = room.heartbeat("conn-a").await.unwrap().granted().unwrap();
        a_events.extend(report.events);
        let report = room.heartbeat("conn-b").await.unwrap().granted().unwrap();
        assert!(report.events.is_empty(), "B never drops below the threshold");
    }

    assert_eq!(harness.now(), START_EPOCH + 1800);
    assert_eq!(
        a_events,
        vec![
            CreditEvent::CreditsLow {
                remaining_seconds: 300
            },
            CreditEvent::CreditsExhausted
        ]
    );

    let issued = harness.issuer.call_count();
    let renewal = room.renew("conn-a").await.unwrap().granted().unwrap();
    assert!(matches!(
        renewal,
        RenewResult::Denied {
            reason: DenialReason::CreditsExhausted,
            ..
        }
    ));
    assert_eq!(harness.issuer.call_count(), issued);

    let left = room.leave("conn-a").await.unwrap().granted().unwrap();
    assert_eq!(left.total_debited_seconds, 1800);
    assert_eq!(left.remaining_seconds, Some(0));
    assert!(!left.room_closed);

    let view = room.state().await.unwrap();
    assert_eq!(view.status, RoomStatus::Active);
    assert!(view.tick_armed);

    let left = room.leave("conn-b").await.unwrap().granted().unwrap();
    assert!(left.room_closed);

    let view = room.state().await.unwrap();
    assert_eq!(view.status, RoomStatus::Closed);
    assert!(!view.tick_armed);
    assert_eq!(view.next_tick_at, None);
    assert_eq!(harness.ledger.debited_for("conn-b"), 1770);
    assert_eq!(harness.balance(&b), 1830);

    assert_eq!(
        harness.registry.kinds_for("room-scenario"),
        vec![
            "room_opened",
            "participant_joined",
            "participant_joined",
            "participant_left",
            "participant_left",
            "room_closed"
        ]
    );
}
