//! Room Coordinator error types.
//!
//! `RoomError` covers faults only: a collaborator or the runtime failed and
//! the caller may retry. Client-facing denials (room full, not initialized,
//! credits exhausted, ...) are not errors; they travel as
//! [`DenialReason`](crate::actors::DenialReason) inside a successful reply.
//!
//! Internal details are logged server-side but never exposed to clients.

use thiserror::Error;

/// Room Coordinator fault type.
#[derive(Debug, Error)]
pub enum RoomError {
    /// Credit ledger call failed (unreachable, 5xx, malformed reply).
    #[error("Credit ledger error: {0}")]
    Ledger(String),

    /// Credential issuer call failed.
    #[error("Credential issuer error: {0}")]
    CredentialIssuer(String),

    /// Durable room registry write failed.
    #[error("Room registry error: {0}")]
    Registry(String),

    /// The registry refused a record outright; replaying it cannot succeed.
    #[error("Audit record rejected: {0}")]
    AuditRejected(String),

    /// Room state storage failed.
    #[error("Storage error: {0}")]
    Storage(String),

    /// Another actor instance claimed this room after us.
    #[error("Fenced out: {0}")]
    FencedOut(String),

    /// Coordinator is shutting down and no longer hosts new rooms.
    #[error("Coordinator is draining")]
    Draining,

    /// The caller asked for something the room can never represent.
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Internal error (actor mailbox closed, serialization, ...).
    #[error("Internal error: {0}")]
    Internal(String),
}

impl RoomError {
    /// Stable machine-readable code for this error.
    #[must_use]
    pub fn error_code(&self) -> &'static str {
        match self {
            RoomError::Ledger(_) => "ledger_unavailable",
            RoomError::CredentialIssuer(_) => "credential_issuer_unavailable",
            RoomError::Registry(_) | RoomError::AuditRejected(_) | RoomError::Storage(_) => {
                "storage_error"
            }
            RoomError::InvalidRequest(_) => "invalid_request",
            RoomError::FencedOut(_) | RoomError::Draining => "room_moved",
            RoomError::Config(_) | RoomError::Internal(_) => "internal_error",
        }
    }

    /// Returns a client-safe error message (no internal details).
    ///
    /// For the embedding request layer; the actors only log the full error.
    #[must_use]
    pub fn client_message(&self) -> String {
        match self {
            RoomError::Ledger(_) => "Credit service is unavailable, please retry".to_string(),
            RoomError::CredentialIssuer(_) => {
                "Credential service is unavailable, please retry".to_string()
            }
            RoomError::FencedOut(_) | RoomError::Draining => {
                "Room is being moved, please retry".to_string()
            }
            RoomError::InvalidRequest(_) => "Invalid room parameters".to_string(),
            RoomError::Registry(_)
            | RoomError::AuditRejected(_)
            | RoomError::Storage(_)
            | RoomError::Config(_)
            | RoomError::Internal(_) => "An internal error occurred".to_string(),
        }
    }

    /// Whether retrying the same operation later can succeed.
    ///
    /// The audit outbox uses this to decide between keeping a record queued
    /// and setting it aside.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        !matches!(
            self,
            RoomError::AuditRejected(_) | RoomError::InvalidRequest(_) | RoomError::Config(_)
        )
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_error_code_mapping() {
        assert_eq!(
            RoomError::Ledger("timeout".to_string()).error_code(),
            "ledger_unavailable"
        );
        assert_eq!(
            RoomError::CredentialIssuer("503".to_string()).error_code(),
            "credential_issuer_unavailable"
        );
        assert_eq!(
            RoomError::Registry("pool".to_string()).error_code(),
            "storage_error"
        );
        assert_eq!(
            RoomError::Storage("redis".to_string()).error_code(),
            "storage_error"
        );
        assert_eq!(
            RoomError::FencedOut("gen 3".to_string()).error_code(),
            "room_moved"
        );
        assert_eq!(RoomError::Draining.error_code(), "room_moved");
        assert_eq!(
            RoomError::InvalidRequest("chain_id".to_string()).error_code(),
            "invalid_request"
        );
        assert_eq!(
            RoomError::Internal("closed".to_string()).error_code(),
            "internal_error"
        );
    }

    #[test]
    fn test_client_messages_hide_internal_details() {
        let storage_err = RoomError::Storage("connection refused at 10.0.3.7:6379".to_string());
        assert!(!storage_err.client_message().contains("10.0.3.7"));
        assert_eq!(storage_err.client_message(), "An internal error occurred");

        let ledger_err = RoomError::Ledger("HTTP 500 from http://ledger.internal".to_string());
        assert!(!ledger_err.client_message().contains("ledger.internal"));
    }

    #[test]
    fn test_retryable() {
        assert!(RoomError::Ledger("x".to_string()).is_retryable());
        assert!(RoomError::Storage("x".to_string()).is_retryable());
        assert!(RoomError::Registry("x".to_string()).is_retryable());
        assert!(!RoomError::AuditRejected("x".to_string()).is_retryable());
        assert!(!RoomError::InvalidRequest("x".to_string()).is_retryable());
        assert!(!RoomError::Config("x".to_string()).is_retryable());
    }

    #[test]
    fn test_display_formatting() {
        assert_eq!(
            format!("{}", RoomError::Storage("timeout".to_string())),
            "Storage error: timeout"
        );
        assert_eq!(
            format!("{}", RoomError::FencedOut("generation 4 is stale".to_string())),
            "Fenced out: generation 4 is stale"
        );
    }
}
