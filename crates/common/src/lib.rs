//! Common utilities and types shared across Duet room services.

#![warn(clippy::pedantic)]

/// Module for secret types that prevent accidental logging
pub mod secret;

/// Module for wallet identity helpers
pub mod types;
