//! Core library for plaid-cli.
//!
//! This crate holds everything the command-line front end needs to link
//! bank accounts through Plaid and keep the resulting credentials locally:
//!
//! - `api`: Plaid REST client (link tokens, token exchange, transactions)
//! - `link`: the local callback server and the Link/Relink handshake
//! - `store`: the on-disk credential store (tokens and aliases)
//! - `cache`: timestamped cache of transaction responses
//! - `auth`: OS keychain access for the Plaid secret
//! - `config`: settings assembled once at startup

pub mod api;
pub mod auth;
pub mod cache;
pub mod config;
pub mod link;
pub mod models;
pub mod store;

pub use api::{ApiError, PlaidClient};
pub use config::Settings;
pub use link::{LinkError, Linker};
pub use models::TokenPair;
pub use store::{CredentialStore, StoreError};
