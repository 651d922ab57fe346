//! Media credential issuer client.
//!
//! Credentials admit one external uid to one media channel for a bounded
//! time. Metered rooms use short credentials and renew them; scheduled rooms
//! get one long credential per join.

use crate::errors::RoomError;
use crate::observability::metrics;
use common::secret::{ExposeSecret, SecretString};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::{Duration, Instant};
use tracing::{error, instrument, warn};

const ISSUER_REQUEST_TIMEOUT_SECS: u64 = 10;
const ISSUER_CONNECT_TIMEOUT_SECS: u64 = 5;

/// Credential lifetime class.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CredentialProfile {
    Short,
    Long,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CredentialRequest {
    pub channel_name: String,
    pub external_uid: u32,
    pub profile: CredentialProfile,
    pub ttl_seconds: u32,
}

/// An issued media credential.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IssuedCredential {
    pub token: String,
    #[serde(rename = "expires_in")]
    pub expires_in_seconds: u32,
}

impl fmt::Debug for IssuedCredential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IssuedCredential")
            .field("token", &"[REDACTED]")
            .field("expires_in_seconds", &self.expires_in_seconds)
            .finish()
    }
}

#[async_trait::async_trait]
pub trait CredentialIssuer: Send + Sync {
    async fn issue(&self, request: &CredentialRequest) -> Result<IssuedCredential, RoomError>;
}

/// HTTP issuer client authenticated with the coordinator's service token.
pub struct HttpCredentialIssuer {
    client: Client,
    base_url: String,
    service_token: SecretString,
}

impl HttpCredentialIssuer {
    /// # Errors
    ///
    /// Returns `RoomError::Config` if the HTTP client cannot be built.
    pub fn new(base_url: String, service_token: SecretString) -> Result<Self, RoomError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(ISSUER_REQUEST_TIMEOUT_SECS))
            .connect_timeout(Duration::from_secs(ISSUER_CONNECT_TIMEOUT_SECS))
            .build()
            .map_err(|e| {
                error!(target: "rc.services.issuer", error = %e, "Failed to build HTTP client");
                RoomError::Config(format!("issuer client: {e}"))
            })?;

        Ok(Self {
            client,
            base_url,
            service_token,
        })
    }

    async fn handle_response(response: reqwest::Response) -> Result<IssuedCredential, RoomError> {
        let status = response.status();

        if status.is_success() {
            response.json().await.map_err(|e| {
                error!(target: "rc.services.issuer", error = %e, "Failed to parse issuer response");
                RoomError::CredentialIssuer(format!("malformed response: {e}"))
            })
        } else if status.as_u16() == 401 || status.as_u16() == 403 {
            error!(target: "rc.services.issuer", status = %status, "Service token rejected by issuer");
            Err(RoomError::CredentialIssuer(format!("unauthorized: {status}")))
        } else {
            warn!(target: "rc.services.issuer", status = %status, "Issuer returned error");
            Err(RoomError::CredentialIssuer(format!("status {status}")))
        }
    }
}

#[async_trait::async_trait]
impl CredentialIssuer for HttpCredentialIssuer {
    #[instrument(
        skip_all,
        name = "rc.services.issuer.issue",
        fields(channel = %request.channel_name, uid = request.external_uid)
    )]
    async fn issue(&self, request: &CredentialRequest) -> Result<IssuedCredential, RoomError> {
        let url = format!("{}/v1/credentials", self.base_url);
        let started = Instant::now();

        let result = match self
            .client
            .post(&url)
            .bearer_auth(self.service_token.expose_secret())
            .json(request)
            .send()
            .await
        {
            Ok(response) => Self::handle_response(response).await,
            Err(e) => {
                warn!(target: "rc.services.issuer", error = %e, "Issuer request failed");
                Err(RoomError::CredentialIssuer(format!("request failed: {e}")))
            }
        };

        let status = if result.is_ok() { "success" } else { "error" };
        metrics::record_issuer_latency(status, started.elapsed());
        result
    }
}

/// Deterministic issuer for tests.
pub mod mock {
    use super::*;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::{Mutex, PoisonError};

    /// Issues `tok-<channel>-<uid>-<n>` with the requested TTL.
    #[derive(Debug, Default)]
    pub struct MockCredentialIssuer {
        issued: Mutex<Vec<CredentialRequest>>,
        call_count: AtomicUsize,
        failing: AtomicBool,
    }

    impl MockCredentialIssuer {
        #[must_use]
        pub fn new() -> Self {
            Self::default()
        }

        pub fn set_failing(&self, failing: bool) {
            self.failing.store(failing, Ordering::SeqCst);
        }

        #[must_use]
        pub fn call_count(&self) -> usize {
            self.call_count.load(Ordering::SeqCst)
        }

        /// Requests that produced a credential, in order.
        #[must_use]
        pub fn issued(&self) -> Vec<CredentialRequest> {
            self.issued
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .clone()
        }
    }

    #[async_trait::async_trait]
    impl CredentialIssuer for MockCredentialIssuer {
        async fn issue(&self, request: &CredentialRequest) -> Result<IssuedCredential, RoomError> {
            let n = self.call_count.fetch_add(1, Ordering::SeqCst);
            if self.failing.load(Ordering::SeqCst) {
                return Err(RoomError::CredentialIssuer(
                    "mock issuer unavailable".to_string(),
                ));
            }

            self.issued
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .push(request.clone());

            Ok(IssuedCredential {
                token: format!("tok-{}-{}-{n}", request.channel_name, request.external_uid),
                expires_in_seconds: request.ttl_seconds,
            })
        }
    }
}
