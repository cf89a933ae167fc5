//! Application configuration management.
//!
//! Settings are assembled once at startup and passed by value into the
//! store loader, the API client and the linker. Sources, lowest precedence
//! first:
//!
//! 1. built-in defaults (data dir `~/.plaid-cli`, sandbox, port 8080)
//! 2. `config.toml` in the data dir, or in the working directory
//! 3. environment variables (`PLAID_CLIENT_ID`, `PLAID_SECRET`, ...)
//!
//! Command-line flags are applied on top by the binary. A Plaid secret that
//! is still missing after all of this is looked up in the OS keychain.

use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::auth::Keychain;

/// Directory name under the home directory holding all plaid-cli state
const APP_DIR: &str = ".plaid-cli";

/// Config file name, looked up in the data dir and then the working dir
const CONFIG_FILE: &str = "config.toml";

/// Default port for the local Link page.
pub const DEFAULT_LINK_PORT: u16 = 8080;

/// Default time to wait for the browser to finish Plaid Link.
pub const DEFAULT_LINK_TIMEOUT_SECS: u64 = 300;

const DEFAULT_CLIENT_NAME: &str = "plaid-cli";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    #[default]
    Sandbox,
    Development,
    Production,
}

impl Environment {
    pub fn base_url(&self) -> &'static str {
        match self {
            Environment::Sandbox => "https://sandbox.plaid.com",
            Environment::Development => "https://development.plaid.com",
            Environment::Production => "https://production.plaid.com",
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Environment::Sandbox => "sandbox",
            Environment::Development => "development",
            Environment::Production => "production",
        }
    }
}

impl FromStr for Environment {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "sandbox" => Ok(Environment::Sandbox),
            "development" => Ok(Environment::Development),
            "production" => Ok(Environment::Production),
            other => Err(anyhow::anyhow!("Unknown Plaid environment: {}", other)),
        }
    }
}

impl std::fmt::Display for Environment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Everything needed to talk to the Plaid API.
#[derive(Debug, Clone)]
pub struct PlaidSettings {
    pub client_id: Option<String>,
    pub secret: Option<String>,
    pub environment: Environment,
    pub client_name: String,
    pub products: Vec<String>,
    pub country_codes: Vec<String>,
    pub language: String,
    /// Overrides the environment's base URL (tests, proxies).
    pub base_url: Option<String>,
}

impl Default for PlaidSettings {
    fn default() -> Self {
        Self {
            client_id: None,
            secret: None,
            environment: Environment::default(),
            client_name: DEFAULT_CLIENT_NAME.to_string(),
            products: vec!["transactions".to_string()],
            country_codes: vec!["US".to_string()],
            language: "en".to_string(),
            base_url: None,
        }
    }
}

impl PlaidSettings {
    pub fn base_url(&self) -> &str {
        self.base_url
            .as_deref()
            .unwrap_or_else(|| self.environment.base_url())
    }

    pub fn client_id(&self) -> Result<&str> {
        self.client_id.as_deref().filter(|s| !s.is_empty()).ok_or_else(|| {
            anyhow::anyhow!("Missing Plaid client id: set PLAID_CLIENT_ID or plaid.client_id in config.toml")
        })
    }

    pub fn secret(&self) -> Result<&str> {
        self.secret.as_deref().filter(|s| !s.is_empty()).ok_or_else(|| {
            anyhow::anyhow!(
                "Missing Plaid secret: set PLAID_SECRET, plaid.secret in config.toml, or run `plaid-cli secret set`"
            )
        })
    }
}

/// Settings for the local Link handshake.
#[derive(Debug, Clone)]
pub struct LinkConfig {
    pub port: u16,
    /// Zero disables the timeout.
    pub timeout_secs: u64,
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            port: DEFAULT_LINK_PORT,
            timeout_secs: DEFAULT_LINK_TIMEOUT_SECS,
        }
    }
}

impl LinkConfig {
    pub fn timeout(&self) -> Option<Duration> {
        (self.timeout_secs > 0).then(|| Duration::from_secs(self.timeout_secs))
    }
}

#[derive(Debug, Clone)]
pub struct Settings {
    pub data_dir: PathBuf,
    pub log_dir: Option<PathBuf>,
    pub plaid: PlaidSettings,
    pub link: LinkConfig,
}

/// On-disk shape of `config.toml`. Every field is optional.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct ConfigFile {
    #[serde(default)]
    cli: CliSection,
    #[serde(default)]
    plaid: PlaidSection,
    #[serde(default)]
    link: LinkSection,
}

#[derive(Debug, Default, Deserialize)]
struct CliSection {
    data_dir: Option<PathBuf>,
    log_dir: Option<PathBuf>,
}

#[derive(Debug, Default, Deserialize)]
struct PlaidSection {
    client_id: Option<String>,
    secret: Option<String>,
    environment: Option<Environment>,
    client_name: Option<String>,
    products: Option<Vec<String>>,
    country_codes: Option<Vec<String>>,
    language: Option<String>,
    base_url: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct LinkSection {
    port: Option<u16>,
    timeout_secs: Option<u64>,
}

impl Settings {
    /// Load settings from the process environment, config files and keychain.
    pub fn load() -> Result<Self> {
        let cwd = std::env::current_dir().context("Could not determine working directory")?;
        let mut settings = Self::load_from(|key| std::env::var(key).ok(), &cwd)?;

        if settings.plaid.secret.is_none() {
            if let Some(ref client_id) = settings.plaid.client_id {
                match Keychain::get_secret(client_id) {
                    Ok(Some(secret)) => {
                        debug!("Using Plaid secret from keychain");
                        settings.plaid.secret = Some(secret);
                    }
                    Ok(None) => debug!("No Plaid secret in keychain"),
                    Err(e) => debug!(error = %e, "Keychain unavailable"),
                }
            }
        }

        Ok(settings)
    }

    /// Load settings using `env` for variable lookup and `cwd` as the
    /// fallback config location. Never touches the keychain.
    pub fn load_from(env: impl Fn(&str) -> Option<String>, cwd: &Path) -> Result<Self> {
        let data_dir = match env("PLAID_CLI_DATA_DIR") {
            Some(dir) if !dir.is_empty() => PathBuf::from(dir),
            _ => Self::default_data_dir()?,
        };

        let file = Self::read_config_file(&[data_dir.join(CONFIG_FILE), cwd.join(CONFIG_FILE)])?;

        let mut settings = Settings {
            data_dir,
            log_dir: None,
            plaid: PlaidSettings::default(),
            link: LinkConfig::default(),
        };
        settings.apply_file(file);
        settings.apply_env(&env)?;
        Ok(settings)
    }

    pub fn default_data_dir() -> Result<PathBuf> {
        let home = dirs::home_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not find home directory"))?;
        Ok(home.join(APP_DIR))
    }

    /// Path of the credential store document.
    pub fn store_path(&self) -> PathBuf {
        self.data_dir.join("data.json")
    }

    pub fn cache_dir(&self) -> PathBuf {
        self.data_dir.join("cache")
    }

    fn read_config_file(candidates: &[PathBuf]) -> Result<ConfigFile> {
        for path in candidates {
            if !path.exists() {
                continue;
            }
            let contents = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read config file: {}", path.display()))?;
            let file: ConfigFile = toml::from_str(&contents)
                .with_context(|| format!("Failed to parse config file: {}", path.display()))?;
            debug!(path = %path.display(), "Loaded config file");
            return Ok(file);
        }
        Ok(ConfigFile::default())
    }

    fn apply_file(&mut self, file: ConfigFile) {
        if let Some(dir) = file.cli.data_dir {
            self.data_dir = dir;
        }
        self.log_dir = file.cli.log_dir;

        let plaid = &mut self.plaid;
        let p = file.plaid;
        plaid.client_id = p.client_id.or(plaid.client_id.take());
        plaid.secret = p.secret.or(plaid.secret.take());
        if let Some(env) = p.environment {
            plaid.environment = env;
        }
        if let Some(name) = p.client_name {
            plaid.client_name = name;
        }
        if let Some(products) = p.products {
            plaid.products = products;
        }
        if let Some(codes) = p.country_codes {
            plaid.country_codes = codes;
        }
        if let Some(language) = p.language {
            plaid.language = language;
        }
        plaid.base_url = p.base_url.or(plaid.base_url.take());

        if let Some(port) = file.link.port {
            self.link.port = port;
        }
        if let Some(timeout) = file.link.timeout_secs {
            self.link.timeout_secs = timeout;
        }
    }

    fn apply_env(&mut self, env: &impl Fn(&str) -> Option<String>) -> Result<()> {
        let non_empty = |key: &str| env(key).filter(|v| !v.trim().is_empty());

        if let Some(v) = non_empty("PLAID_CLI_DATA_DIR") {
            self.data_dir = PathBuf::from(v);
        }
        if let Some(v) = non_empty("PLAID_CLIENT_ID") {
            self.plaid.client_id = Some(v);
        }
        if let Some(v) = non_empty("PLAID_SECRET") {
            self.plaid.secret = Some(v);
        }
        if let Some(v) = non_empty("PLAID_ENVIRONMENT") {
            self.plaid.environment = v.parse()?;
        }
        if let Some(v) = non_empty("PLAID_PRODUCTS") {
            self.plaid.products = split_list(&v);
        }
        if let Some(v) = non_empty("PLAID_COUNTRY_CODES") {
            self.plaid.country_codes = split_list(&v);
        }
        if let Some(v) = non_empty("LINK_PORT") {
            self.link.port = v
                .trim()
                .parse()
                .with_context(|| format!("Invalid LINK_PORT: {}", v))?;
        }
        if let Some(v) = non_empty("LINK_TIMEOUT_SECS") {
            self.link.timeout_secs = v
                .trim()
                .parse()
                .with_context(|| format!("Invalid LINK_TIMEOUT_SECS: {}", v))?;
        }
        Ok(())
    }
}

fn split_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
        .collect()
}
