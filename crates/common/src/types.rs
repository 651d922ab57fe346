//! Wallet identity helpers.
//!
//! Wallet addresses arrive from clients in mixed case (EIP-55 checksums),
//! so every derived value is computed over the lowercase form.

use ring::digest::{digest, SHA256};
use serde::{Deserialize, Serialize};
use std::fmt;

/// A wallet address normalized to lowercase.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Wallet(String);

impl Wallet {
    /// Normalize a raw wallet address (trimmed, lowercased).
    #[must_use]
    pub fn new(raw: &str) -> Self {
        Self(raw.trim().to_ascii_lowercase())
    }

    /// The normalized address.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Numeric participant identifier handed to the credential issuer.
    ///
    /// First four bytes of SHA-256 over the normalized address, masked to
    /// 31 bits. Zero is reserved by the transport, so it maps to 1.
    #[must_use]
    pub fn external_uid(&self) -> u32 {
        let hash = digest(&SHA256, self.0.as_bytes());
        let mut prefix = [0u8; 4];
        for (dst, src) in prefix.iter_mut().zip(hash.as_ref()) {
            *dst = *src;
        }
        match u32::from_be_bytes(prefix) & 0x7fff_ffff {
            0 => 1,
            uid => uid,
        }
    }

    /// Short, non-reversible tag for log lines.
    #[must_use]
    pub fn fingerprint(&self) -> String {
        let hash = digest(&SHA256, self.0.as_bytes());
        hex::encode(hash.as_ref().get(..6).unwrap_or_default())
    }
}

impl fmt::Display for Wallet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Wallet {
    fn from(raw: &str) -> Self {
        Self::new(raw)
    }
}
