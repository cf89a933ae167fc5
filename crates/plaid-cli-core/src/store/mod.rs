//! Durable storage for linked items.
//!
//! `CredentialStore` maps Plaid item ids to access tokens and keeps the
//! alias tables alongside them. The whole store is one JSON document that
//! is replaced atomically on save, so another plaid-cli process never reads
//! a half-written file.

pub mod atomic;
pub mod credentials;

use std::path::PathBuf;

use thiserror::Error;

pub use atomic::atomic_write;
pub use credentials::CredentialStore;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Credential store at {path} is corrupt: {source}")]
    Corrupt {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("No access token found for item ID `{0}`. Try re-linking your account with `plaid-cli link`.")]
    UnknownItem(String),

    #[error("Credential store I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to serialize credential store: {0}")]
    Serialize(#[source] serde_json::Error),
}
