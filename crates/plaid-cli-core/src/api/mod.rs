//! REST API client module for Plaid.
//!
//! `PlaidClient` covers the calls plaid-cli makes: creating Link tokens,
//! exchanging public tokens for access tokens, and fetching transactions.
//! The handshake only depends on the `LinkApi` trait so it can run against
//! a stand-in exchange.

pub mod client;
pub mod error;

pub use client::{LinkApi, PlaidClient};
pub use error::ApiError;
