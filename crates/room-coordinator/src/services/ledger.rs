//! Credit ledger client.
//!
//! The ledger is the source of truth for a wallet's prepaid talk time. The
//! coordinator only reads balances and debits elapsed seconds; it never
//! grants credit. Debits are clamped by the ledger so a balance never goes
//! negative.

use crate::errors::RoomError;
use crate::observability::metrics;
use common::secret::{ExposeSecret, SecretString};
use common::types::Wallet;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};
use tracing::{error, instrument, warn};

const LEDGER_REQUEST_TIMEOUT_SECS: u64 = 10;
const LEDGER_CONNECT_TIMEOUT_SECS: u64 = 5;

/// A wallet's balance breakdown.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreditBalance {
    #[serde(rename = "remaining")]
    pub remaining_seconds: i64,
    #[serde(rename = "base_granted")]
    pub base_granted_seconds: i64,
    #[serde(rename = "bonus_granted")]
    pub bonus_granted_seconds: i64,
    #[serde(rename = "consumed")]
    pub consumed_seconds: i64,
}

/// Result of a debit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DebitReceipt {
    #[serde(rename = "remaining")]
    pub remaining_seconds: i64,
    /// Seconds actually taken; less than requested when clamped.
    #[serde(rename = "debited")]
    pub debited_seconds: u64,
    pub clamped: bool,
}

#[derive(Debug, Serialize)]
struct DebitRequest<'a> {
    seconds: u64,
    connection_id: &'a str,
}

/// Ledger operations used by room actors.
#[async_trait::async_trait]
pub trait CreditLedger: Send + Sync {
    async fn get_balance(&self, wallet: &Wallet) -> Result<CreditBalance, RoomError>;

    /// Debit up to `seconds` from `wallet`.
    ///
    /// `connection_id` attributes the debit; the ledger does not
    /// deduplicate on it.
    async fn debit(
        &self,
        wallet: &Wallet,
        seconds: u64,
        connection_id: &str,
    ) -> Result<DebitReceipt, RoomError>;
}

/// HTTP ledger client authenticated with the coordinator's service token.
pub struct HttpCreditLedger {
    client: Client,
    base_url: String,
    service_token: SecretString,
}

impl HttpCreditLedger {
    /// # Errors
    ///
    /// Returns `RoomError::Config` if the HTTP client cannot be built.
    pub fn new(base_url: String, service_token: SecretString) -> Result<Self, RoomError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(LEDGER_REQUEST_TIMEOUT_SECS))
            .connect_timeout(Duration::from_secs(LEDGER_CONNECT_TIMEOUT_SECS))
            .build()
            .map_err(|e| {
                error!(target: "rc.services.ledger", error = %e, "Failed to build HTTP client");
                RoomError::Config(format!("ledger client: {e}"))
            })?;

        Ok(Self {
            client,
            base_url,
            service_token,
        })
    }

    async fn handle_response<T: serde::de::DeserializeOwned>(
        response: reqwest::Response,
    ) -> Result<T, RoomError> {
        let status = response.status();

        if status.is_success() {
            response.json().await.map_err(|e| {
                error!(target: "rc.services.ledger", error = %e, "Failed to parse ledger response");
                RoomError::Ledger(format!("malformed response: {e}"))
            })
        } else if status.as_u16() == 401 || status.as_u16() == 403 {
            error!(target: "rc.services.ledger", status = %status, "Service token rejected by ledger");
            Err(RoomError::Ledger(format!("unauthorized: {status}")))
        } else {
            let body = response.text().await.unwrap_or_default();
            warn!(target: "rc.services.ledger", status = %status, body = %body, "Ledger returned error");
            Err(RoomError::Ledger(format!("status {status}")))
        }
    }
}

#[async_trait::async_trait]
impl CreditLedger for HttpCreditLedger {
    #[instrument(skip_all, name = "rc.services.ledger.get_balance", fields(wallet = %wallet.fingerprint()))]
    async fn get_balance(&self, wallet: &Wallet) -> Result<CreditBalance, RoomError> {
        let url = format!("{}/v1/credits/{}", self.base_url, wallet.as_str());
        let started = Instant::now();

        let result = match self
            .client
            .get(&url)
            .bearer_auth(self.service_token.expose_secret())
            .send()
            .await
        {
            Ok(response) => Self::handle_response(response).await,
            Err(e) => {
                warn!(target: "rc.services.ledger", error = %e, "Ledger request failed");
                Err(RoomError::Ledger(format!("request failed: {e}")))
            }
        };

        let status = if result.is_ok() { "success" } else { "error" };
        metrics::record_ledger_latency("get_balance", status, started.elapsed());
        result
    }

    #[instrument(
        skip_all,
        name = "rc.services.ledger.debit",
        fields(wallet = %wallet.fingerprint(), seconds = seconds)
    )]
    async fn debit(
        &self,
        wallet: &Wallet,
        seconds: u64,
        connection_id: &str,
    ) -> Result<DebitReceipt, RoomError> {
        let url = format!("{}/v1/credits/{}/debit", self.base_url, wallet.as_str());
        let started = Instant::now();

        let result = match self
            .client
            .post(&url)
            .bearer_auth(self.service_token.expose_secret())
            .json(&DebitRequest {
                seconds,
                connection_id,
            })
            .send()
            .await
        {
            Ok(response) => Self::handle_response(response).await,
            Err(e) => {
                warn!(target: "rc.services.ledger", error = %e, "Ledger request failed");
                Err(RoomError::Ledger(format!("request failed: {e}")))
            }
        };

        let status = if result.is_ok() { "success" } else { "error" };
        metrics::record_ledger_latency("debit", status, started.elapsed());
        result
    }
}

/// In-memory ledger for tests.
pub mod mock {
    use super::*;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::{Mutex, PoisonError};

    /// One recorded debit call.
    #[derive(Debug, Clone, PartialEq, Eq)]
    pub struct DebitCall {
        pub wallet: Wallet,
        pub requested_seconds: u64,
        pub debited_seconds: u64,
        pub connection_id: String,
    }

    /// Ledger that clamps debits like the real service.
    ///
    /// Unknown wallets have a zero balance.
    #[derive(Debug, Default)]
    pub struct MockCreditLedger {
        balances: Mutex<HashMap<Wallet, i64>>,
        debits: Mutex<Vec<DebitCall>>,
        balance_calls: AtomicUsize,
        failing: AtomicBool,
    }

    impl MockCreditLedger {
        #[must_use]
        pub fn new() -> Self {
            Self::default()
        }

        #[must_use]
        pub fn with_balance(self, wallet: &Wallet, seconds: i64) -> Self {
            self.set_balance(wallet, seconds);
            self
        }

        pub fn set_balance(&self, wallet: &Wallet, seconds: i64) {
            self.balances
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .insert(wallet.clone(), seconds);
        }

        #[must_use]
        pub fn balance_of(&self, wallet: &Wallet) -> i64 {
            self.balances
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .get(wallet)
                .copied()
                .unwrap_or(0)
        }

        /// Make every call fail with `RoomError::Ledger` until reset.
        pub fn set_failing(&self, failing: bool) {
            self.failing.store(failing, Ordering::SeqCst);
        }

        #[must_use]
        pub fn debits(&self) -> Vec<DebitCall> {
            self.debits
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .clone()
        }

        /// Total seconds debited for one connection.
        #[must_use]
        pub fn debited_for(&self, connection_id: &str) -> u64 {
            self.debits()
                .iter()
                .filter(|call| call.connection_id == connection_id)
                .map(|call| call.debited_seconds)
                .sum()
        }

        #[must_use]
        pub fn debit_count(&self) -> usize {
            self.debits
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .len()
        }

        #[must_use]
        pub fn balance_calls(&self) -> usize {
            self.balance_calls.load(Ordering::SeqCst)
        }

        fn check_failing(&self) -> Result<(), RoomError> {
            if self.failing.load(Ordering::SeqCst) {
                return Err(RoomError::Ledger("mock ledger unavailable".to_string()));
            }
            Ok(())
        }
    }

    #[async_trait::async_trait]
    impl CreditLedger for MockCreditLedger {
        async fn get_balance(&self, wallet: &Wallet) -> Result<CreditBalance, RoomError> {
            self.balance_calls.fetch_add(1, Ordering::SeqCst);
            self.check_failing()?;
            let remaining = self.balance_of(wallet);
            Ok(CreditBalance {
                remaining_seconds: remaining,
                base_granted_seconds: remaining.max(0),
                bonus_granted_seconds: 0,
                consumed_seconds: 0,
            })
        }

        async fn debit(
            &self,
            wallet: &Wallet,
            seconds: u64,
            connection_id: &str,
        ) -> Result<DebitReceipt, RoomError> {
            self.check_failing()?;

            let mut balances = self.balances.lock().unwrap_or_else(PoisonError::into_inner);
            let balance = balances.entry(wallet.clone()).or_insert(0);
            let available = u64::try_from(*balance).unwrap_or(0);
            let debited = seconds.min(available);
            *balance -= i64::try_from(debited).unwrap_or(0);
            let remaining = *balance;
            drop(balances);

            self.debits
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .push(DebitCall {
                    wallet: wallet.clone(),
                    requested_seconds: seconds,
                    debited_seconds: debited,
                    connection_id: connection_id.to_string(),
                });

            Ok(DebitReceipt {
                remaining_seconds: remaining,
                debited_seconds: debited,
                clamped: debited < seconds,
            })
        }
    }
}
