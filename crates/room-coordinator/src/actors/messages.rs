//! Message and reply types for room actors.
//!
//! Every request carries a `oneshot` reply channel. Replies to client
//! operations are `Result<Outcome<T>, RoomError>`: the outer `Result` is a
//! fault (collaborator down, storage error), the inner [`Outcome`] is the
//! room's decision.

use crate::errors::RoomError;
use crate::services::{CredentialProfile, IssuedCredential};
use crate::store::{ParticipantRecord, RoomRecord};
use common::types::Wallet;
use serde::{Deserialize, Serialize};
use std::num::NonZeroU32;
use tokio::sync::oneshot;

/// Billing model of a room.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoomType {
    /// Pay-as-you-go: every participant is metered against the ledger.
    Ephemeral,
    /// Prepaid booking: no metering, long-lived credentials.
    Scheduled,
}

impl RoomType {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            RoomType::Ephemeral => "ephemeral",
            RoomType::Scheduled => "scheduled",
        }
    }

    /// Whether participants in this room are billed per second.
    #[must_use]
    pub fn is_metered(self) -> bool {
        matches!(self, RoomType::Ephemeral)
    }

    /// Credential lifetime handed to participants of this room type.
    #[must_use]
    pub fn credential_profile(self) -> CredentialProfile {
        match self {
            RoomType::Ephemeral => CredentialProfile::Short,
            RoomType::Scheduled => CredentialProfile::Long,
        }
    }
}

/// Lifecycle status of a room.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoomStatus {
    Uninitialized,
    Active,
    Closed,
}

impl RoomStatus {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            RoomStatus::Uninitialized => "uninitialized",
            RoomStatus::Active => "active",
            RoomStatus::Closed => "closed",
        }
    }
}

/// Why a room refused a client operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DenialReason {
    RoomNotInitialized,
    RoomFull,
    RoomClosed,
    ParticipantNotFound,
    /// The connection id is already bound to a different wallet.
    ConnectionConflict,
    CreditsExhausted,
}

impl DenialReason {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            DenialReason::RoomNotInitialized => "room_not_initialized",
            DenialReason::RoomFull => "room_full",
            DenialReason::RoomClosed => "room_closed",
            DenialReason::ParticipantNotFound => "participant_not_found",
            DenialReason::ConnectionConflict => "connection_conflict",
            DenialReason::CreditsExhausted => "credits_exhausted",
        }
    }

    /// True when repeating the same request can never succeed.
    ///
    /// Lets the embedding request layer tell clients whether to retry.
    ///
    /// A full room may free a seat, an uninitialized room may be initialized
    /// and a wallet may be topped up. The rest are final.
    #[must_use]
    pub fn is_permanent(self) -> bool {
        matches!(
            self,
            DenialReason::RoomClosed
                | DenialReason::ParticipantNotFound
                | DenialReason::ConnectionConflict
        )
    }
}

impl std::fmt::Display for DenialReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The room's decision on a client operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome<T> {
    Granted(T),
    Denied(DenialReason),
}

impl<T> Outcome<T> {
    #[must_use]
    pub fn is_granted(&self) -> bool {
        matches!(self, Outcome::Granted(_))
    }

    #[must_use]
    pub fn denial(&self) -> Option<DenialReason> {
        match self {
            Outcome::Granted(_) => None,
            Outcome::Denied(reason) => Some(*reason),
        }
    }

    /// Consumes the outcome, returning the granted value if any.
    #[must_use]
    pub fn granted(self) -> Option<T> {
        match self {
            Outcome::Granted(value) => Some(value),
            Outcome::Denied(_) => None,
        }
    }
}

/// Arguments to `init`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoomSpec {
    pub room_type: RoomType,
    pub host_wallet: Wallet,
    /// Seat limit. `None` uses the policy default for the room type.
    pub capacity: Option<NonZeroU32>,
    /// Media channel participants are admitted to.
    pub channel_name: String,
    pub chain_id: u64,
    /// Booking reference for scheduled rooms.
    pub booking_id: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct InitResult {
    /// The room already existed; nothing was changed.
    pub already_initialized: bool,
    pub status: RoomStatus,
}

/// Arguments to `join`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JoinRequest {
    /// Caller-chosen, unique per client connection.
    pub connection_id: String,
    pub wallet: Wallet,
    /// Numeric media identity for the credential.
    pub external_uid: u32,
}

impl JoinRequest {
    /// Builds a request deriving `external_uid` from the wallet.
    #[must_use]
    pub fn for_wallet(connection_id: impl Into<String>, wallet: Wallet) -> Self {
        let external_uid = wallet.external_uid();
        Self {
            connection_id: connection_id.into(),
            wallet,
            external_uid,
        }
    }
}

/// When a metered client should renew and heartbeat.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RenewalHints {
    pub renew_after_seconds: u32,
    pub heartbeat_interval_seconds: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JoinGrant {
    pub connection_id: String,
    pub external_uid: u32,
    pub credential: IssuedCredential,
    /// Present for metered rooms only.
    pub renewal: Option<RenewalHints>,
    /// Ledger balance at join time. `None` for unmetered rooms.
    pub remaining_seconds: Option<i64>,
}

/// Balance notifications, each delivered at most once per participant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum CreditEvent {
    CreditsLow { remaining_seconds: i64 },
    CreditsExhausted,
}

impl CreditEvent {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            CreditEvent::CreditsLow { .. } => "credits_low",
            CreditEvent::CreditsExhausted => "credits_exhausted",
        }
    }
}

/// Result of metering one participant.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
pub struct MeteringReport {
    /// Seconds debited by this call.
    pub debited_seconds: u64,
    /// Ledger balance after this call. `None` for unmetered rooms.
    pub remaining_seconds: Option<i64>,
    /// Lifetime debit for this participant in this room.
    pub total_debited_seconds: u64,
    /// The ledger debited less than requested.
    pub clamped: bool,
    /// Events not yet seen by the client, oldest first.
    pub events: Vec<CreditEvent>,
}

/// Reply to `renew`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RenewResult {
    Renewed {
        credential: IssuedCredential,
        renewal: Option<RenewalHints>,
        metering: MeteringReport,
    },
    /// Metering ran but the balance is below the renewal floor.
    Denied {
        reason: DenialReason,
        metering: MeteringReport,
    },
}

impl RenewResult {
    #[must_use]
    pub fn metering(&self) -> &MeteringReport {
        match self {
            RenewResult::Renewed { metering, .. } | RenewResult::Denied { metering, .. } => {
                metering
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct LeaveResult {
    pub total_debited_seconds: u64,
    pub remaining_seconds: Option<i64>,
    /// The leave emptied the room and closed it.
    pub room_closed: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CloseResult {
    /// Final metering of the initiating participant, if it was present.
    pub initiator: Option<MeteringReport>,
    pub closed: bool,
}

/// Why a participant left.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LeaveReason {
    Voluntary,
    Stale,
    RoomClosed,
}

impl LeaveReason {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            LeaveReason::Voluntary => "voluntary",
            LeaveReason::Stale => "stale",
            LeaveReason::RoomClosed => "room_closed",
        }
    }
}

/// Read-only view of a room for debugging.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RoomStateView {
    pub room_id: String,
    pub status: RoomStatus,
    pub room: Option<RoomRecord>,
    pub participants: Vec<ParticipantRecord>,
    pub tick_armed: bool,
    pub next_tick_at: Option<i64>,
    /// Audit records not yet accepted by the registry.
    pub pending_audit: usize,
    /// Audit records set aside after a permanent registry rejection.
    pub rejected_audit: usize,
    pub generation: u64,
}

/// Messages sent to `RoomActor`.
#[derive(Debug)]
pub enum RoomMessage {
    Init {
        spec: RoomSpec,
        respond_to: oneshot::Sender<Result<InitResult, RoomError>>,
    },

    Join {
        request: JoinRequest,
        respond_to: oneshot::Sender<Result<Outcome<JoinGrant>, RoomError>>,
    },

    /// Liveness ping that also meters.
    Heartbeat {
        connection_id: String,
        respond_to: oneshot::Sender<Result<Outcome<MeteringReport>, RoomError>>,
    },

    /// Meter, then reissue a credential if the balance allows.
    Renew {
        connection_id: String,
        respond_to: oneshot::Sender<Result<Outcome<RenewResult>, RoomError>>,
    },

    Leave {
        connection_id: String,
        respond_to: oneshot::Sender<Result<Outcome<LeaveResult>, RoomError>>,
    },

    /// Final-meter everyone and close the room.
    Close {
        initiator_connection_id: Option<String>,
        respond_to: oneshot::Sender<Result<Outcome<CloseResult>, RoomError>>,
    },

    /// Erase all state for this room, including its registry rows.
    Destroy {
        respond_to: oneshot::Sender<Result<(), RoomError>>,
    },

    GetState {
        respond_to: oneshot::Sender<RoomStateView>,
    },
}

/// Messages sent to `RoomDirectoryActor`.
#[derive(Debug)]
pub enum DirectoryMessage {
    /// Get the actor for a room, spawning (and rehydrating) it if needed.
    GetRoom {
        room_id: String,
        respond_to: oneshot::Sender<Result<super::RoomActorHandle, RoomError>>,
    },

    /// Stop a room actor. Its persisted state is untouched.
    Evict {
        room_id: String,
        respond_to: oneshot::Sender<bool>,
    },

    GetStatus {
        respond_to: oneshot::Sender<DirectoryStatus>,
    },

    /// Stop accepting rooms and cancel every live actor.
    Shutdown {
        respond_to: oneshot::Sender<()>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct DirectoryStatus {
    pub room_count: usize,
    pub participant_count: usize,
    pub is_draining: bool,
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_denial_reason_codes() {
        assert_eq!(DenialReason::RoomFull.as_str(), "room_full");
        assert_eq!(
            serde_json::to_string(&DenialReason::ConnectionConflict).unwrap(),
            "\"connection_conflict\""
        );
        assert_eq!(DenialReason::CreditsExhausted.to_string(), "credits_exhausted");
    }

    #[test]
    fn test_denial_permanence() {
        assert!(!DenialReason::RoomFull.is_permanent());
        assert!(!DenialReason::RoomNotInitialized.is_permanent());
        assert!(!DenialReason::CreditsExhausted.is_permanent());
        assert!(DenialReason::RoomClosed.is_permanent());
        assert!(DenialReason::ParticipantNotFound.is_permanent());
    }

    #[test]
    fn test_credit_event_wire_shape() {
        let low = CreditEvent::CreditsLow {
            remaining_seconds: 240,
        };
        let json = serde_json::to_value(low).unwrap();
        assert_eq!(json["event"], "credits_low");
        assert_eq!(json["remaining_seconds"], 240);

        let exhausted = serde_json::to_value(CreditEvent::CreditsExhausted).unwrap();
        assert_eq!(exhausted["event"], "credits_exhausted");
    }

    #[test]
    fn test_room_type_profiles() {
        assert_eq!(
            RoomType::Ephemeral.credential_profile(),
            CredentialProfile::Short
        );
        assert_eq!(
            RoomType::Scheduled.credential_profile(),
            CredentialProfile::Long
        );
        assert!(RoomType::Ephemeral.is_metered());
        assert!(!RoomType::Scheduled.is_metered());
    }

    #[test]
    fn test_outcome_accessors() {
        let granted: Outcome<u32> = Outcome::Granted(7);
        assert!(granted.is_granted());
        assert_eq!(granted.denial(), None);
        assert_eq!(granted.granted(), Some(7));

        let denied: Outcome<u32> = Outcome::Denied(DenialReason::RoomFull);
        assert_eq!(denied.denial(), Some(DenialReason::RoomFull));
        assert_eq!(denied.granted(), None);
    }

    #[test]
    fn test_join_request_derives_uid_from_wallet() {
        let wallet = Wallet::new("0xAbC");
        let request = JoinRequest::for_wallet("conn-1", wallet.clone());
        assert_eq!(request.external_uid, wallet.external_uid());
        assert_eq!(request.connection_id, "conn-1");
    }
}
