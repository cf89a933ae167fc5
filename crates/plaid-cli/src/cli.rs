use chrono::NaiveDate;
use clap::{Parser, Subcommand};

#[derive(Debug, Parser)]
#[command(name = "plaid-cli", version, about = "Link bank accounts to Plaid and pull transactions")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Link a bank account so plaid-cli can pull transactions.
    ///
    /// Pass an item ID or alias to re-link an existing account.
    Link {
        #[arg(value_name = "ITEM-ID-OR-ALIAS")]
        item_or_alias: Option<String>,

        /// Port on which to serve Plaid Link
        #[arg(short, long)]
        port: Option<u16>,
    },

    /// List access tokens, keyed by alias where one is set
    Tokens,

    /// Give a linked bank account a name
    Alias {
        #[arg(value_name = "ITEM-ID")]
        item_id: String,
        #[arg(value_name = "NAME")]
        name: String,
    },

    /// List aliases
    Aliases,

    /// List transactions for a given account
    Transactions {
        #[arg(value_name = "ITEM-ID-OR-ALIAS")]
        item_or_alias: String,

        /// Date of first transaction (YYYY-MM-DD)
        #[arg(short, long)]
        from: NaiveDate,

        /// Date of last transaction (YYYY-MM-DD)
        #[arg(short, long)]
        to: NaiveDate,

        /// Only read from the local cache
        #[arg(long)]
        cached: bool,
    },

    /// Manage the Plaid secret in the OS keychain
    Secret {
        #[command(subcommand)]
        action: SecretAction,
    },
}

#[derive(Debug, Subcommand)]
pub enum SecretAction {
    /// Prompt for the Plaid secret and store it
    Set,
    /// Remove the stored secret
    Clear,
}
