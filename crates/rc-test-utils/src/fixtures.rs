//! Room and participant fixtures.

use common::types::Wallet;
use room_coordinator::actors::{JoinRequest, RoomSpec, RoomType};
use std::num::NonZeroU32;
use uuid::Uuid;

/// Epoch second the harness clock starts at (2026-01-01T00:00:00Z).
pub const START_EPOCH: i64 = 1_767_225_600;

/// Base chain used by the fixtures.
pub const TEST_CHAIN_ID: u64 = 8453;

/// Builder for `RoomSpec`.
#[derive(Debug, Clone)]
pub struct TestRoomSpec {
    room_type: RoomType,
    host_wallet: Wallet,
    capacity: Option<NonZeroU32>,
    channel_name: String,
    booking_id: Option<String>,
}

impl TestRoomSpec {
    #[must_use]
    pub fn ephemeral() -> Self {
        Self {
            room_type: RoomType::Ephemeral,
            host_wallet: Wallet::new("0x4057"),
            capacity: None,
            channel_name: format!("chan-{}", Uuid::new_v4().simple()),
            booking_id: None,
        }
    }

    /// A pre-paid room with a booking id.
    #[must_use]
    pub fn scheduled() -> Self {
        Self {
            room_type: RoomType::Scheduled,
            booking_id: Some(format!("booking-{}", Uuid::new_v4().simple())),
            ..Self::ephemeral()
        }
    }

    /// Override the per-type default capacity.
    ///
    /// # Panics
    ///
    /// Panics if `capacity` is zero.
    #[must_use]
    pub fn with_capacity(mut self, capacity: u32) -> Self {
        self.capacity = Some(NonZeroU32::new(capacity).expect("capacity must be non-zero"));
        self
    }

    #[must_use]
    pub fn with_host(mut self, host: &TestParticipant) -> Self {
        self.host_wallet = host.wallet.clone();
        self
    }

    #[must_use]
    pub fn with_channel(mut self, channel_name: impl Into<String>) -> Self {
        self.channel_name = channel_name.into();
        self
    }

    #[must_use]
    pub fn build(self) -> RoomSpec {
        RoomSpec {
            room_type: self.room_type,
            host_wallet: self.host_wallet,
            capacity: self.capacity,
            channel_name: self.channel_name,
            chain_id: TEST_CHAIN_ID,
            booking_id: self.booking_id,
        }
    }
}

/// A client connection and the wallet behind it.
#[derive(Debug, Clone)]
pub struct TestParticipant {
    pub connection_id: String,
    pub wallet: Wallet,
}

impl TestParticipant {
    #[must_use]
    pub fn new(connection_id: impl Into<String>, wallet: &str) -> Self {
        Self {
            connection_id: connection_id.into(),
            wallet: Wallet::new(wallet),
        }
    }

    /// Random connection id and wallet.
    #[must_use]
    pub fn random() -> Self {
        let id = Uuid::new_v4().simple().to_string();
        Self::new(format!("conn-{id}"), &format!("0x{id}"))
    }

    #[must_use]
    pub fn join_request(&self) -> JoinRequest {
        JoinRequest::for_wallet(self.connection_id.clone(), self.wallet.clone())
    }

    /// Same wallet on a different connection.
    #[must_use]
    pub fn reconnected_as(&self, connection_id: impl Into<String>) -> Self {
        Self {
            connection_id: connection_id.into(),
            wallet: self.wallet.clone(),
        }
    }
}
