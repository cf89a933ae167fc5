use anyhow::{Context, Result};
use keyring::Entry;
use tracing::debug;

const SERVICE_NAME: &str = "plaid-cli";

/// Plaid secrets in the OS keychain, one entry per client id.
pub struct Keychain;

impl Keychain {
    fn entry(client_id: &str) -> Result<Entry> {
        if client_id.is_empty() {
            anyhow::bail!("A Plaid client id is required to use the keychain");
        }
        Entry::new(SERVICE_NAME, client_id).context("Failed to open keychain entry")
    }

    pub fn store_secret(client_id: &str, secret: &str) -> Result<()> {
        Self::entry(client_id)?
            .set_password(secret)
            .context("Failed to store Plaid secret in keychain")?;
        debug!(client_id = client_id, "Stored Plaid secret");
        Ok(())
    }

    /// The stored secret, or `None` if this client id has no entry.
    pub fn get_secret(client_id: &str) -> Result<Option<String>> {
        match Self::entry(client_id)?.get_password() {
            Ok(secret) => Ok(Some(secret)),
            Err(keyring::Error::NoEntry) => Ok(None),
            Err(e) => Err(e).context("Failed to read Plaid secret from keychain"),
        }
    }

    /// Remove the stored secret. Returns whether there was one.
    pub fn delete_secret(client_id: &str) -> Result<bool> {
        match Self::entry(client_id)?.delete_credential() {
            Ok(()) => Ok(true),
            Err(keyring::Error::NoEntry) => Ok(false),
            Err(e) => Err(e).context("Failed to delete Plaid secret from keychain"),
        }
    }
}
