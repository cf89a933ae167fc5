//! Data models for Plaid entities.
//!
//! - `TokenPair`: the credential produced by a completed Link handshake
//! - `Transaction`, `Account`: typed view of `/transactions/get` results

pub mod token;
pub mod transaction;

pub use token::TokenPair;
pub use transaction::{Account, Balances, Transaction, TransactionsResponse};
