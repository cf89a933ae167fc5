use serde::{Deserialize, Serialize};

/// A linked item and the access token that authorizes it.
///
/// Produced once per successful handshake. The caller owns it and is
/// responsible for persisting it into the credential store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenPair {
    pub item_id: String,
    pub access_token: String,
}

impl TokenPair {
    pub fn new(item_id: impl Into<String>, access_token: impl Into<String>) -> Self {
        Self {
            item_id: item_id.into(),
            access_token: access_token.into(),
        }
    }
}
