use std::collections::BTreeMap;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::debug;

use super::atomic::{write_temp, PendingWrite};
use super::StoreError;
use crate::models::TokenPair;

/// Serialized form of the store, one document for all three maps.
#[derive(Debug, Default, Serialize, Deserialize)]
struct StoreFile {
    #[serde(default)]
    tokens: BTreeMap<String, String>,
    #[serde(default)]
    aliases: BTreeMap<String, String>,
    #[serde(default, rename = "backAliases")]
    back_aliases: BTreeMap<String, String>,
}

/// Linked items, their access tokens and their aliases.
///
/// Mutations only touch memory; call [`CredentialStore::save`] to persist.
#[derive(Debug)]
pub struct CredentialStore {
    path: PathBuf,
    tokens: BTreeMap<String, String>,
    aliases: BTreeMap<String, String>,
    back_aliases: BTreeMap<String, String>,
}

impl CredentialStore {
    /// Load the store from `path`. A missing file yields an empty store.
    pub fn load(path: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let path = path.into();
        let file = match fs::read_to_string(&path) {
            Ok(contents) => serde_json::from_str::<StoreFile>(&contents).map_err(|source| {
                StoreError::Corrupt {
                    path: path.clone(),
                    source,
                }
            })?,
            Err(err) if err.kind() == ErrorKind::NotFound => {
                debug!(path = %path.display(), "No credential store yet, starting empty");
                StoreFile::default()
            }
            Err(err) => return Err(StoreError::Io(err)),
        };

        debug!(
            path = %path.display(),
            items = file.tokens.len(),
            aliases = file.aliases.len(),
            "Loaded credential store"
        );

        Ok(Self {
            path,
            tokens: file.tokens,
            aliases: file.aliases,
            back_aliases: file.back_aliases,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Persist all three maps, replacing the file atomically.
    pub fn save(&self) -> Result<(), StoreError> {
        self.prepare_save()?.commit()?;
        debug!(path = %self.path.display(), "Saved credential store");
        Ok(())
    }

    /// First half of `save`: the new document is on disk but not yet visible.
    pub(crate) fn prepare_save(&self) -> Result<PendingWrite, StoreError> {
        let file = StoreFile {
            tokens: self.tokens.clone(),
            aliases: self.aliases.clone(),
            back_aliases: self.back_aliases.clone(),
        };
        let contents = serde_json::to_vec_pretty(&file).map_err(StoreError::Serialize)?;
        Ok(write_temp(&self.path, &contents)?)
    }

    /// Record the credential produced by a Link or Relink.
    pub fn insert_token(&mut self, pair: TokenPair) {
        self.tokens.insert(pair.item_id, pair.access_token);
    }

    pub fn access_token(&self, item_id: &str) -> Option<&str> {
        self.tokens.get(item_id).map(String::as_str)
    }

    /// Like `access_token`, but a missing item is an error.
    pub fn require_token(&self, item_id: &str) -> Result<&str, StoreError> {
        self.access_token(item_id)
            .ok_or_else(|| StoreError::UnknownItem(item_id.to_string()))
    }

    /// Point `alias` at `item_id` and make it the item's current alias.
    ///
    /// An alias the item had before stays in the forward table and still
    /// resolves to the item.
    pub fn set_alias(&mut self, alias: &str, item_id: &str) -> Result<(), StoreError> {
        if !self.tokens.contains_key(item_id) {
            return Err(StoreError::UnknownItem(item_id.to_string()));
        }
        self.aliases.insert(alias.to_string(), item_id.to_string());
        self.back_aliases
            .insert(item_id.to_string(), alias.to_string());
        Ok(())
    }

    /// Map an alias to its item id; anything else is returned unchanged.
    pub fn resolve_alias(&self, name_or_id: &str) -> String {
        self.aliases
            .get(name_or_id)
            .cloned()
            .unwrap_or_else(|| name_or_id.to_string())
    }

    pub fn aliases(&self) -> &BTreeMap<String, String> {
        &self.aliases
    }

    pub fn back_alias(&self, item_id: &str) -> Option<&str> {
        self.back_aliases.get(item_id).map(String::as_str)
    }

    /// Access tokens keyed by the item's current alias, or its id if unaliased.
    pub fn tokens_by_label(&self) -> BTreeMap<String, String> {
        self.tokens
            .iter()
            .map(|(item_id, token)| {
                let label = self.back_alias(item_id).unwrap_or(item_id);
                (label.to_string(), token.clone())
            })
            .collect()
    }
}
