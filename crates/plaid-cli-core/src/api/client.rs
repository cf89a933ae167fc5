//! API client for the Plaid REST API.
//!
//! Plaid authenticates every call with the client id and secret in the JSON
//! body, so the client carries both and merges them into each request.

use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use chrono::NaiveDate;
use reqwest::Client;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{debug, warn};

use crate::config::PlaidSettings;
use crate::models::{TokenPair, TransactionsResponse};

use super::ApiError;

// ============================================================================
// Constants
// ============================================================================

/// HTTP request timeout in seconds.
const REQUEST_TIMEOUT_SECS: u64 = 30;

/// Maximum number of retries for rate-limited requests.
const MAX_RATE_LIMIT_RETRIES: u32 = 3;

/// Initial backoff delay in milliseconds for rate limiting.
const INITIAL_BACKOFF_MS: u64 = 1000;

/// Page size requested from `/transactions/get`. Plaid caps this at 500.
const TRANSACTIONS_PAGE_SIZE: u32 = 500;

/// Plaid API version pinned for all requests.
const PLAID_VERSION: &str = "2020-09-14";

#[derive(Debug, Deserialize)]
struct LinkTokenResponse {
    link_token: String,
}

#[derive(Debug, Deserialize)]
struct ExchangeResponse {
    access_token: String,
    item_id: String,
}

/// The two Plaid calls a Link handshake needs.
#[async_trait]
pub trait LinkApi: Send + Sync {
    /// Create a Link token. With `update_access_token`, the token opens Link
    /// in update mode for that item instead of linking a new one.
    async fn create_link_token(&self, update_access_token: Option<&str>)
        -> Result<String, ApiError>;

    /// Trade a public token from Link for a durable access token.
    async fn exchange_public_token(&self, public_token: &str) -> Result<TokenPair, ApiError>;
}

/// API client for Plaid.
/// Clone is cheap - reqwest::Client uses Arc internally for connection pooling.
#[derive(Clone)]
pub struct PlaidClient {
    client: Client,
    base_url: String,
    client_id: String,
    secret: String,
    client_name: String,
    products: Vec<String>,
    country_codes: Vec<String>,
    language: String,
}

impl PlaidClient {
    /// Create a client. Fails if the client id or secret is not configured.
    pub fn new(settings: &PlaidSettings) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()?;

        Ok(Self {
            client,
            base_url: settings.base_url().trim_end_matches('/').to_string(),
            client_id: settings.client_id()?.to_string(),
            secret: settings.secret()?.to_string(),
            client_name: settings.client_name.clone(),
            products: settings.products.clone(),
            country_codes: settings.country_codes.clone(),
            language: settings.language.clone(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// Add `client_id` and `secret` to a request body.
    fn authed_body<B: Serialize>(&self, body: &B) -> Result<Value, ApiError> {
        let mut value = serde_json::to_value(body)
            .map_err(|e| ApiError::InvalidResponse(format!("Unserializable request: {}", e)))?;
        if let Value::Object(ref mut map) = value {
            map.insert("client_id".to_string(), Value::String(self.client_id.clone()));
            map.insert("secret".to_string(), Value::String(self.secret.clone()));
        }
        Ok(value)
    }

    /// Check if response is successful, returning an error with body if not.
    async fn check_response(response: reqwest::Response) -> Result<reqwest::Response, ApiError> {
        if response.status().is_success() {
            Ok(response)
        } else {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            Err(ApiError::from_status(status, &body))
        }
    }

    async fn parse<T: DeserializeOwned>(response: reqwest::Response, path: &str) -> Result<T, ApiError> {
        let text = response.text().await?;
        serde_json::from_str(&text)
            .map_err(|e| ApiError::InvalidResponse(format!("Failed to parse {}: {}", path, e)))
    }

    /// Single POST, no retry.
    async fn post_once<T: DeserializeOwned, B: Serialize>(&self, path: &str, body: &B) -> Result<T, ApiError> {
        let response = self
            .client
            .post(self.url(path))
            .header("Plaid-Version", PLAID_VERSION)
            .json(&self.authed_body(body)?)
            .send()
            .await?;

        let response = Self::check_response(response).await?;
        Self::parse(response, path).await
    }

    /// POST that backs off and retries while Plaid reports rate limiting.
    /// Only used for read-only calls.
    async fn post_with_retry<T: DeserializeOwned, B: Serialize>(&self, path: &str, body: &B) -> Result<T, ApiError> {
        let mut retries = 0;
        let mut backoff_ms = INITIAL_BACKOFF_MS;

        loop {
            match self.post_once(path, body).await {
                Err(ApiError::RateLimited) => {
                    retries += 1;
                    if retries > MAX_RATE_LIMIT_RETRIES {
                        return Err(ApiError::RateLimited);
                    }
                    warn!(path = path, retry = retries, backoff_ms = backoff_ms, "Rate limited, backing off");
                    tokio::time::sleep(Duration::from_millis(backoff_ms)).await;
                    backoff_ms *= 2; // Exponential backoff
                }
                other => return other,
            }
        }
    }

    /// Fetch one page of transactions between two dates (inclusive).
    pub async fn get_transactions(
        &self,
        access_token: &str,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<TransactionsResponse, ApiError> {
        debug!(%start, %end, "Fetching transactions");
        let body = json!({
            "access_token": access_token,
            "start_date": start.format("%Y-%m-%d").to_string(),
            "end_date": end.format("%Y-%m-%d").to_string(),
            "options": { "count": TRANSACTIONS_PAGE_SIZE, "offset": 0 },
        });
        self.post_with_retry("/transactions/get", &body).await
    }
}

#[async_trait]
impl LinkApi for PlaidClient {
    async fn create_link_token(
        &self,
        update_access_token: Option<&str>,
    ) -> Result<String, ApiError> {
        let mut body = json!({
            "client_name": self.client_name,
            "language": self.language,
            "country_codes": self.country_codes,
            "user": { "client_user_id": self.client_id },
        });
        match update_access_token {
            Some(token) => body["access_token"] = Value::String(token.to_string()),
            None => body["products"] = json!(self.products),
        }

        debug!(update_mode = update_access_token.is_some(), "Creating link token");
        let resp: LinkTokenResponse = self.post_once("/link/token/create", &body).await?;
        Ok(resp.link_token)
    }

    async fn exchange_public_token(&self, public_token: &str) -> Result<TokenPair, ApiError> {
        let body = json!({ "public_token": public_token });
        let resp: ExchangeResponse = self.post_once("/item/public_token/exchange", &body).await?;
        debug!(item_id = %resp.item_id, "Exchanged public token");
        Ok(TokenPair::new(resp.item_id, resp.access_token))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn test_client(server: &MockServer) -> PlaidClient {
        let settings = PlaidSettings {
            client_id: Some("client-1".to_string()),
            secret: Some("secret-1".to_string()),
            base_url: Some(server.uri()),
            ..PlaidSettings::default()
        };
        PlaidClient::new(&settings).expect("client")
    }

    #[test]
    fn test_new_requires_credentials() {
        assert!(PlaidClient::new(&PlaidSettings::default()).is_err());
    }

    #[tokio::test]
    async fn test_exchange_public_token() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/item/public_token/exchange"))
            .and(body_partial_json(json!({
                "client_id": "client-1",
                "secret": "secret-1",
                "public_token": "public-sandbox-abc",
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "access_token": "access-sandbox-xyz",
                "item_id": "item-123",
                "request_id": "req-1",
            })))
            .expect(1)
            .mount(&server)
            .await;

        let pair = test_client(&server)
            .exchange_public_token("public-sandbox-abc")
            .await
            .unwrap();
        assert_eq!(pair, TokenPair::new("item-123", "access-sandbox-xyz"));
    }

    #[tokio::test]
    async fn test_exchange_does_not_retry_rate_limit() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/item/public_token/exchange"))
            .respond_with(ResponseTemplate::new(429).set_body_json(json!({
                "error_type": "RATE_LIMIT_EXCEEDED",
                "error_code": "RATE_LIMIT_EXCEEDED",
                "error_message": "too many requests",
            })))
            .expect(1)
            .mount(&server)
            .await;

        let err = test_client(&server)
            .exchange_public_token("public-sandbox-abc")
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::RateLimited));
    }

    #[tokio::test]
    async fn test_exchange_surfaces_provider_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/item/public_token/exchange"))
            .respond_with(ResponseTemplate::new(400).set_body_json(json!({
                "error_type": "INVALID_INPUT",
                "error_code": "INVALID_PUBLIC_TOKEN",
                "error_message": "provided public token is in an invalid format",
                "display_message": null,
            })))
            .mount(&server)
            .await;

        let err = test_client(&server)
            .exchange_public_token("garbage")
            .await
            .unwrap_err();
        assert_eq!(err.code(), Some("INVALID_PUBLIC_TOKEN"));
    }

    #[tokio::test]
    async fn test_create_link_token_new_item_sends_products() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/link/token/create"))
            .and(body_partial_json(json!({
                "products": ["transactions"],
                "country_codes": ["US"],
                "user": { "client_user_id": "client-1" },
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "link_token": "link-sandbox-new",
                "expiration": "2024-01-01T00:00:00Z",
            })))
            .expect(1)
            .mount(&server)
            .await;

        let token = test_client(&server).create_link_token(None).await.unwrap();
        assert_eq!(token, "link-sandbox-new");
    }

    #[tokio::test]
    async fn test_create_link_token_update_mode_sends_access_token() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/link/token/create"))
            .and(body_partial_json(json!({ "access_token": "access-sandbox-xyz" })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "link_token": "link-sandbox-update",
            })))
            .expect(1)
            .mount(&server)
            .await;

        let token = test_client(&server)
            .create_link_token(Some("access-sandbox-xyz"))
            .await
            .unwrap();
        assert_eq!(token, "link-sandbox-update");
    }

    #[tokio::test]
    async fn test_get_transactions() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/transactions/get"))
            .and(body_partial_json(json!({
                "access_token": "access-sandbox-xyz",
                "start_date": "2024-01-01",
                "end_date": "2024-01-31",
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "accounts": [],
                "transactions": [{
                    "transaction_id": "tx-1",
                    "account_id": "acc-1",
                    "amount": 4.5,
                    "date": "2024-01-02",
                    "name": "Coffee",
                    "pending": false,
                }],
                "total_transactions": 1,
            })))
            .mount(&server)
            .await;

        let start = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap();
        let end = NaiveDate::from_ymd_opt(2024, 1, 31).unwrap();
        let resp = test_client(&server)
            .get_transactions("access-sandbox-xyz", start, end)
            .await
            .unwrap();
        assert_eq!(resp.transactions.len(), 1);
        assert!(!resp.is_partial());
    }
}
