use std::sync::Arc;
use std::time::Duration;

use rand::distributions::Alphanumeric;
use rand::Rng;
use tracing::{info, warn};

use crate::api::LinkApi;
use crate::config::{Environment, Settings};
use crate::models::TokenPair;
use crate::store::CredentialStore;

use super::page::WidgetConfig;
use super::server::CallbackServer;
use super::LinkError;

/// Length of the per-session nonce the page must echo back.
const STATE_LENGTH: usize = 32;

/// Handshake parameters that do not change between calls.
#[derive(Debug, Clone)]
pub struct LinkSettings {
    pub timeout: Option<Duration>,
    pub client_name: String,
    pub environment: Environment,
    pub products: Vec<String>,
}

impl LinkSettings {
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            timeout: settings.link.timeout(),
            client_name: settings.plaid.client_name.clone(),
            environment: settings.plaid.environment,
            products: settings.plaid.products.clone(),
        }
    }
}

/// One Link or Relink attempt.
#[derive(Debug, Clone)]
pub struct HandshakeSession {
    /// Item being re-authorized; `None` for a new link.
    pub item_id: Option<String>,
    pub port: u16,
    pub state: String,
}

impl HandshakeSession {
    pub fn new_item(port: u16) -> Self {
        Self {
            item_id: None,
            port,
            state: random_state(),
        }
    }

    pub fn existing_item(item_id: &str, port: u16) -> Self {
        Self {
            item_id: Some(item_id.to_string()),
            port,
            state: random_state(),
        }
    }
}

fn random_state() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(STATE_LENGTH)
        .map(char::from)
        .collect()
}

type Announcer = Arc<dyn Fn(&str) + Send + Sync>;

/// Runs Plaid Link handshakes against a [`LinkApi`].
pub struct Linker<A> {
    api: A,
    settings: LinkSettings,
    announce: Option<Announcer>,
}

impl<A: LinkApi> Linker<A> {
    pub fn new(api: A, settings: LinkSettings) -> Self {
        Self {
            api,
            settings,
            announce: None,
        }
    }

    /// Called with the Link page URL once the server is listening.
    pub fn with_announcer(mut self, announce: impl Fn(&str) + Send + Sync + 'static) -> Self {
        self.announce = Some(Arc::new(announce));
        self
    }

    /// Link a new item.
    pub async fn link(&self, port: u16) -> Result<TokenPair, LinkError> {
        let link_token = self
            .api
            .create_link_token(None)
            .await
            .map_err(LinkError::LinkToken)?;
        self.run(HandshakeSession::new_item(port), link_token).await
    }

    /// Re-authorize an item that is already in `store`.
    ///
    /// Fails with `ItemMismatch` if Plaid hands back a different item.
    pub async fn relink(
        &self,
        store: &CredentialStore,
        item_id: &str,
        port: u16,
    ) -> Result<TokenPair, LinkError> {
        let access_token = store.require_token(item_id)?;
        let link_token = self
            .api
            .create_link_token(Some(access_token))
            .await
            .map_err(LinkError::LinkToken)?;

        let pair = self
            .run(HandshakeSession::existing_item(item_id, port), link_token)
            .await?;

        if pair.item_id != item_id {
            warn!(expected = %item_id, actual = %pair.item_id, "Relink returned a different item");
            return Err(LinkError::ItemMismatch {
                expected: item_id.to_string(),
                actual: pair.item_id,
            });
        }
        Ok(pair)
    }

    async fn run(&self, session: HandshakeSession, link_token: String) -> Result<TokenPair, LinkError> {
        let widget = WidgetConfig {
            client_name: self.settings.client_name.clone(),
            environment: self.settings.environment,
            products: self.settings.products.clone(),
            link_token,
            update_item: session.item_id.clone(),
        };

        info!(port = session.port, "Starting Plaid Link");
        let mut server = CallbackServer::start(session.port, &widget, session.state).await?;

        let url = server.url();
        info!(url = %url, "Plaid Link is ready");
        if let Some(ref announce) = self.announce {
            announce(&url);
        }

        let outcome = server.await_result(self.settings.timeout).await;
        server.stop().await;
        let public_token = outcome?;

        self.api
            .exchange_public_token(&public_token)
            .await
            .map_err(LinkError::Exchange)
    }
}
