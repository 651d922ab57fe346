//! Per-participant metering.
//!
//! Every path that bills a participant (heartbeat, renew, leave, close, the
//! tick, stale reaping) goes through [`meter`], so the debit, threshold and
//! bookkeeping rules live in one place.

use super::messages::{CreditEvent, MeteringReport, RoomType};
use crate::config::RoomPolicy;
use crate::errors::RoomError;
use crate::observability::metrics;
use crate::services::CreditLedger;
use crate::store::ParticipantRecord;

/// Bill `participant` for time elapsed since its last metering.
///
/// - Unmetered rooms: no ledger call, `remaining_seconds` is `None`.
/// - No elapsed time: reads the balance, debits nothing, raises no events.
/// - Otherwise: debits the elapsed seconds, advances `last_metered_at` to
///   `now` and evaluates balance thresholds.
///
/// On error the participant is left untouched.
///
/// # Errors
///
/// Propagates ledger failures.
pub async fn meter(
    participant: &mut ParticipantRecord,
    room_type: RoomType,
    now: i64,
    ledger: &dyn CreditLedger,
    policy: &RoomPolicy,
) -> Result<MeteringReport, RoomError> {
    if !room_type.is_metered() {
        return Ok(MeteringReport {
            total_debited_seconds: participant.debited_seconds,
            ..MeteringReport::default()
        });
    }

    let elapsed = now.saturating_sub(participant.last_metered_at);
    let Ok(seconds) = u64::try_from(elapsed) else {
        return balance_only(participant, ledger).await;
    };
    if seconds == 0 {
        return balance_only(participant, ledger).await;
    }

    let receipt = ledger
        .debit(&participant.wallet, seconds, &participant.connection_id)
        .await?;

    participant.last_metered_at = now;
    participant.debited_seconds = participant
        .debited_seconds
        .saturating_add(receipt.debited_seconds);
    metrics::record_debit(receipt.debited_seconds);

    let events = evaluate_thresholds(participant, receipt.remaining_seconds, policy);

    Ok(MeteringReport {
        debited_seconds: receipt.debited_seconds,
        remaining_seconds: Some(receipt.remaining_seconds),
        total_debited_seconds: participant.debited_seconds,
        clamped: receipt.clamped,
        events,
    })
}

async fn balance_only(
    participant: &ParticipantRecord,
    ledger: &dyn CreditLedger,
) -> Result<MeteringReport, RoomError> {
    let balance = ledger.get_balance(&participant.wallet).await?;
    Ok(MeteringReport {
        debited_seconds: 0,
        remaining_seconds: Some(balance.remaining_seconds),
        total_debited_seconds: participant.debited_seconds,
        clamped: false,
        events: Vec::new(),
    })
}

/// Raise the events `remaining` crosses, each at most once per participant.
///
/// A single call can raise both, low first.
pub fn evaluate_thresholds(
    participant: &mut ParticipantRecord,
    remaining: i64,
    policy: &RoomPolicy,
) -> Vec<CreditEvent> {
    let mut events = Vec::new();

    if remaining <= policy.low_balance_threshold_seconds && !participant.warned_low {
        participant.warned_low = true;
        events.push(CreditEvent::CreditsLow {
            remaining_seconds: remaining,
        });
    }
    if remaining <= 0 && !participant.exhausted {
        participant.exhausted = true;
        events.push(CreditEvent::CreditsExhausted);
    }

    for event in &events {
        metrics::record_credit_event(event.as_str());
    }
    events
}
