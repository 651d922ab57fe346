//! Secret types for protecting sensitive values from accidental logging.
//!
//! Re-exports the [`secrecy`] types used across the workspace. Service
//! tokens and connection URLs (which may embed passwords) are held as
//! [`SecretString`] so that `Debug` output and tracing fields never reveal
//! them. The inner value is only reachable through [`ExposeSecret`].
//!
//! ```rust
//! use common::secret::{ExposeSecret, SecretString};
//!
//! #[derive(Debug)]
//! struct LedgerAuth {
//!     base_url: String,
//!     service_token: SecretString,
//! }
//!
//! let auth = LedgerAuth {
//!     base_url: "http://ledger.internal".to_string(),
//!     service_token: SecretString::from("s3cr3t"),
//! };
//!
//! assert!(!format!("{auth:?}").contains("s3cr3t"));
//! assert_eq!(auth.service_token.expose_secret(), "s3cr3t");
//! ```

pub use secrecy::{ExposeSecret, SecretBox, SecretString};

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[test]
    fn test_debug_is_redacted() {
        let secret = SecretString::from("redis://:hunter2@cache:6379");
        let debug_str = format!("{secret:?}");

        assert!(debug_str.contains("REDACTED"));
        assert!(!debug_str.contains("hunter2"));
    }

    #[test]
    fn test_deserialized_secret_stays_redacted() {
        #[allow(dead_code)]
        #[derive(Debug, Deserialize)]
        struct IssuerAuth {
            client: String,
            token: SecretString,
        }

        let json = r#"{"client": "room-coordinator", "token": "bearer-value"}"#;
        let auth: IssuerAuth = serde_json::from_str(json).expect("deserialize");

        assert_eq!(auth.token.expose_secret(), "bearer-value");
        let debug = format!("{auth:?}");
        assert!(debug.contains("room-coordinator"));
        assert!(!debug.contains("bearer-value"));
    }
}
