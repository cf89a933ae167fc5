//! The Plaid Link handshake.
//!
//! `Linker` runs one handshake per call: it creates a Link token, serves the
//! Link page from a `CallbackServer` on a local port, waits for the browser
//! to report a public token, and exchanges that token for an access token.
//!
//! Handshake states, per call:
//!
//! ```text
//! Idle -> Listening -> AwaitingCallback -> Delivered | TimedOut | Rejected
//!                  \-> BindFailed                         \-> Stopped
//! ```
//!
//! The server is stopped on every path once it has started.

pub mod linker;
pub mod page;
pub mod server;

use std::time::Duration;

use thiserror::Error;

use crate::api::ApiError;
use crate::store::StoreError;

pub use linker::{HandshakeSession, LinkSettings, Linker};
pub use page::WidgetConfig;
pub use server::CallbackServer;

#[derive(Error, Debug)]
pub enum LinkError {
    #[error("Failed to bind the Link callback server on port {port}: {source}")]
    Bind {
        port: u16,
        #[source]
        source: std::io::Error,
    },

    #[error("Timed out after {}s waiting for Plaid Link to finish", .0.as_secs())]
    Timeout(Duration),

    #[error("Plaid Link did not complete ({code}): {message}")]
    Rejected { code: String, message: String },

    #[error("Callback server shut down before Plaid Link finished")]
    Aborted,

    #[error("Failed to create a Plaid Link token: {0}")]
    LinkToken(#[source] ApiError),

    #[error("Failed to exchange public token: {0}")]
    Exchange(#[source] ApiError),

    #[error("Relink returned item `{actual}` but item `{expected}` was requested")]
    ItemMismatch { expected: String, actual: String },

    #[error(transparent)]
    Store(#[from] StoreError),
}
