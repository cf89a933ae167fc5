//! OS keychain access for the Plaid API secret.
//!
//! Consulted only when neither `config.toml` nor the environment provides
//! a secret. Entries are keyed by Plaid client id.

pub mod keychain;

pub use keychain::Keychain;
