//! Clients for external services.
//!
//! - `ledger` - Credit ledger (balances and debits)
//! - `issuer` - Media credential issuer
//!
//! Each client is a trait with an HTTP implementation and an in-memory
//! `mock` used by tests.

pub mod issuer;
pub mod ledger;

pub use issuer::{
    CredentialIssuer, CredentialProfile, CredentialRequest, HttpCredentialIssuer, IssuedCredential,
};
pub use ledger::{CreditBalance, CreditLedger, DebitReceipt, HttpCreditLedger};
