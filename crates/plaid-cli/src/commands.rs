//! Command handlers. Each one loads what it needs from `Settings`, does its
//! work, and prints JSON to stdout where there is output.

use anyhow::{Context, Result};
use chrono::NaiveDate;
use tracing::{info, warn};

use plaid_cli_core::api::{ApiError, PlaidClient};
use plaid_cli_core::auth::Keychain;
use plaid_cli_core::cache::CacheManager;
use plaid_cli_core::link::{LinkSettings, Linker};
use plaid_cli_core::{CredentialStore, Settings};

use crate::cli::{Command, SecretAction};

pub async fn dispatch(command: Command, settings: Settings) -> Result<()> {
    match command {
        Command::Link { item_or_alias, port } => link(&settings, item_or_alias, port).await,
        Command::Tokens => tokens(&settings),
        Command::Alias { item_id, name } => alias(&settings, &item_id, &name),
        Command::Aliases => aliases(&settings),
        Command::Transactions {
            item_or_alias,
            from,
            to,
            cached,
        } => transactions(&settings, &item_or_alias, from, to, cached).await,
        Command::Secret { action } => secret(&settings, action),
    }
}

fn load_store(settings: &Settings) -> Result<CredentialStore> {
    CredentialStore::load(settings.store_path()).context("Failed to load credential store")
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

async fn link(settings: &Settings, item_or_alias: Option<String>, port: Option<u16>) -> Result<()> {
    let mut store = load_store(settings)?;
    let client = PlaidClient::new(&settings.plaid)?;
    let port = port.unwrap_or(settings.link.port);

    let linker = Linker::new(client, LinkSettings::from_settings(settings)).with_announcer(|url| {
        eprintln!("Open {} in your browser to continue with Plaid Link.", url);
    });

    let pair = match item_or_alias {
        Some(name) => {
            let item_id = store.resolve_alias(&name);
            info!(item_id = %item_id, "Re-linking item");
            linker.relink(&store, &item_id, port).await?
        }
        None => linker.link(port).await?,
    };

    let item_id = pair.item_id.clone();
    store.insert_token(pair);
    store.save().context("Failed to save credential store")?;

    println!("{}", item_id);
    if store.back_alias(&item_id).is_none() {
        eprintln!("Give this account a name with `plaid-cli alias {} NAME`.", item_id);
    }
    Ok(())
}

fn tokens(settings: &Settings) -> Result<()> {
    let store = load_store(settings)?;
    print_json(&store.tokens_by_label())
}

fn alias(settings: &Settings, item_id: &str, name: &str) -> Result<()> {
    let mut store = load_store(settings)?;
    store.set_alias(name, item_id)?;
    store.save().context("Failed to save credential store")?;
    Ok(())
}

fn aliases(settings: &Settings) -> Result<()> {
    let store = load_store(settings)?;
    print_json(store.aliases())
}

/// Errors worth falling back to the cache for.
fn is_transient(err: &ApiError) -> bool {
    matches!(
        err,
        ApiError::NetworkError(_) | ApiError::ServerError(_) | ApiError::RateLimited
    )
}

async fn transactions(
    settings: &Settings,
    item_or_alias: &str,
    from: NaiveDate,
    to: NaiveDate,
    cached_only: bool,
) -> Result<()> {
    if from > to {
        anyhow::bail!("--from ({}) is after --to ({})", from, to);
    }

    let store = load_store(settings)?;
    let item_id = store.resolve_alias(item_or_alias);
    let access_token = store.require_token(&item_id)?;
    let cache = CacheManager::new(settings.cache_dir())?;

    if cached_only {
        let cached = cache
            .load_transactions(&item_id, from, to)?
            .ok_or_else(|| anyhow::anyhow!("No cached transactions for {} between {} and {}", item_or_alias, from, to))?;
        if cache.is_stale(&cached) {
            warn!(fetched_at = %cached.fetched_at, "Cached transactions are stale");
        }
        eprintln!("Showing cached transactions fetched {}.", cached.age_display());
        return print_json(&cached.response.transactions);
    }

    let client = PlaidClient::new(&settings.plaid)?;
    match client.get_transactions(access_token, from, to).await {
        Ok(response) => {
            if let Err(e) = cache.save_transactions(&item_id, from, to, &response) {
                warn!(error = %e, "Failed to cache transactions");
            }
            if response.is_partial() {
                warn!(
                    returned = response.transactions.len(),
                    total = response.total_transactions,
                    "Only the first page of transactions was fetched"
                );
            }
            print_json(&response.transactions)
        }
        Err(e) if is_transient(&e) => match cache.load_transactions(&item_id, from, to) {
            Ok(Some(cached)) => {
                warn!(error = %e, "Plaid unavailable, using cached transactions");
                eprintln!("Plaid is unavailable; showing cached transactions fetched {}.", cached.age_display());
                print_json(&cached.response.transactions)
            }
            _ => Err(e).context("Failed to fetch transactions"),
        },
        Err(e) if e.code() == Some("ITEM_LOGIN_REQUIRED") => Err(e).with_context(|| {
            format!("The bank needs you to log in again; run `plaid-cli link {}`", item_or_alias)
        }),
        Err(e) => Err(e).context("Failed to fetch transactions"),
    }
}

fn secret(settings: &Settings, action: SecretAction) -> Result<()> {
    let client_id = settings.plaid.client_id()?;
    match action {
        SecretAction::Set => {
            let secret = rpassword::prompt_password("Plaid secret: ")
                .context("Failed to read secret")?;
            let secret = secret.trim();
            if secret.is_empty() {
                anyhow::bail!("Secret must not be empty");
            }
            Keychain::store_secret(client_id, secret)?;
            eprintln!("Stored Plaid secret for client {} in the keychain.", client_id);
        }
        SecretAction::Clear => {
            if Keychain::delete_secret(client_id)? {
                eprintln!("Removed Plaid secret for client {} from the keychain.", client_id);
            } else {
                eprintln!("No Plaid secret stored for client {}.", client_id);
            }
        }
    }
    Ok(())
}
