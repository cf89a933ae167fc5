//! End-to-end Link handshakes: a real `PlaidClient` pointed at a mock Plaid,
//! a real callback server, and a scripted browser.

use std::time::Duration;

use serde_json::{json, Value};
use tempfile::TempDir;
use tokio::sync::mpsc;
use wiremock::matchers::{body_partial_json, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use plaid_cli_core::config::{Environment, PlaidSettings};
use plaid_cli_core::link::{LinkSettings, Linker};
use plaid_cli_core::{CredentialStore, LinkError, PlaidClient, TokenPair};

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

async fn mock_plaid(item_id: &str, access_token: &str) -> MockServer {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/link/token/create"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "link_token": "link-sandbox-e2e",
        })))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/item/public_token/exchange"))
        .and(body_partial_json(json!({ "public_token": "public-sandbox-abc" })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "access_token": access_token,
            "item_id": item_id,
            "request_id": "req-e2e",
        })))
        .mount(&server)
        .await;
    server
}

fn linker_for(
    plaid: &MockServer,
    timeout: Duration,
) -> (Linker<PlaidClient>, mpsc::UnboundedReceiver<String>) {
    let settings = PlaidSettings {
        client_id: Some("client-e2e".to_string()),
        secret: Some("secret-e2e".to_string()),
        base_url: Some(plaid.uri()),
        ..PlaidSettings::default()
    };
    let client = PlaidClient::new(&settings).expect("client");
    let link_settings = LinkSettings {
        timeout: Some(timeout),
        client_name: "plaid-cli".to_string(),
        environment: Environment::Sandbox,
        products: vec!["transactions".to_string()],
    };

    let (tx, rx) = mpsc::unbounded_channel();
    let linker = Linker::new(client, link_settings).with_announcer(move |url| {
        let _ = tx.send(url.to_string());
    });
    (linker, rx)
}

/// Load the Link page like a browser would and pull out its state nonce.
async fn open_page(client: &reqwest::Client, url: &str) -> String {
    let page = client.get(url).send().await.unwrap().text().await.unwrap();
    let marker = r#""state":""#;
    let start = page.find(marker).expect("state in page") + marker.len();
    let end = start + page[start..].find('"').expect("closing quote");
    page[start..end].to_string()
}

/// Scripted browser: open the page, then post each body in order.
async fn browser(mut urls: mpsc::UnboundedReceiver<String>, bodies: Vec<Value>) {
    let url = urls.recv().await.expect("linker should announce a URL");
    let client = reqwest::Client::new();
    let state = open_page(&client, &url).await;
    let exchange = url.replace("/link", "/exchange");

    for mut body in bodies {
        body["state"] = json!(state);
        let _ = client.post(&exchange).json(&body).send().await;
    }
}

fn free_port() -> u16 {
    std::net::TcpListener::bind("127.0.0.1:0")
        .unwrap()
        .local_addr()
        .unwrap()
        .port()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[tokio::test]
async fn link_exchanges_public_token_and_store_persists_it() {
    let plaid = mock_plaid("item-123", "access-sandbox-xyz").await;
    let (linker, urls) = linker_for(&plaid, Duration::from_secs(10));

    let browser = tokio::spawn(browser(urls, vec![json!({"public_token": "public-sandbox-abc"})]));
    let pair = linker.link(0).await.expect("link should succeed");
    browser.await.unwrap();

    assert_eq!(pair, TokenPair::new("item-123", "access-sandbox-xyz"));

    let dir = TempDir::new().unwrap();
    let mut store = CredentialStore::load(dir.path().join("data.json")).unwrap();
    store.insert_token(pair);
    store.set_alias("checking", "item-123").unwrap();
    store.save().unwrap();

    let reloaded = CredentialStore::load(dir.path().join("data.json")).unwrap();
    let item_id = reloaded.resolve_alias("checking");
    assert_eq!(reloaded.access_token(&item_id), Some("access-sandbox-xyz"));
}

#[tokio::test]
async fn repeated_callbacks_deliver_only_the_first_token() {
    let plaid = mock_plaid("item-123", "access-sandbox-xyz").await;
    let (linker, urls) = linker_for(&plaid, Duration::from_secs(10));

    let browser = tokio::spawn(browser(
        urls,
        vec![
            json!({"public_token": "public-sandbox-abc"}),
            json!({"public_token": "public-sandbox-retry"}),
        ],
    ));
    let pair = linker.link(0).await.expect("link should succeed");
    browser.await.unwrap();

    assert_eq!(pair.item_id, "item-123");
    let exchanges = plaid
        .received_requests()
        .await
        .unwrap()
        .into_iter()
        .filter(|r| r.url.path() == "/item/public_token/exchange")
        .count();
    assert_eq!(exchanges, 1);
}

#[tokio::test]
async fn relink_rejects_a_different_item() {
    let plaid = mock_plaid("item-other", "access-sandbox-new").await;
    let (linker, urls) = linker_for(&plaid, Duration::from_secs(10));

    let dir = TempDir::new().unwrap();
    let mut store = CredentialStore::load(dir.path().join("data.json")).unwrap();
    store.insert_token(TokenPair::new("item-123", "access-sandbox-old"));

    let browser = tokio::spawn(browser(urls, vec![json!({"public_token": "public-sandbox-abc"})]));
    let err = linker
        .relink(&store, "item-123", 0)
        .await
        .expect_err("mismatched item must fail");
    browser.await.unwrap();

    assert!(matches!(err, LinkError::ItemMismatch { .. }));
    assert_eq!(store.access_token("item-123"), Some("access-sandbox-old"));
}

#[tokio::test]
async fn port_is_reusable_after_success_and_failure() {
    let plaid = mock_plaid("item-123", "access-sandbox-xyz").await;
    let port = free_port();

    // Success.
    let (linker, urls) = linker_for(&plaid, Duration::from_secs(10));
    let browser_task = tokio::spawn(browser(urls, vec![json!({"public_token": "public-sandbox-abc"})]));
    linker.link(port).await.expect("first link should succeed");
    browser_task.await.unwrap();

    // Timeout.
    let (linker, _urls) = linker_for(&plaid, Duration::from_millis(100));
    let err = linker.link(port).await.expect_err("no browser, should time out");
    assert!(matches!(err, LinkError::Timeout(_)));

    // Rejection.
    let (linker, urls) = linker_for(&plaid, Duration::from_secs(10));
    let browser_task = tokio::spawn(browser(
        urls,
        vec![json!({"error_code": "USER_EXIT", "error_message": "closed"})],
    ));
    let err = linker.link(port).await.expect_err("user exited");
    browser_task.await.unwrap();
    assert!(matches!(err, LinkError::Rejected { .. }));

    // The port must still be bindable.
    let (linker, urls) = linker_for(&plaid, Duration::from_secs(10));
    let browser_task = tokio::spawn(browser(urls, vec![json!({"public_token": "public-sandbox-abc"})]));
    linker.link(port).await.expect("port should be free again");
    browser_task.await.unwrap();
}

#[tokio::test]
async fn bind_failure_is_reported_before_waiting() {
    let plaid = mock_plaid("item-123", "access-sandbox-xyz").await;
    let blocker = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let port = blocker.local_addr().unwrap().port();

    let (linker, mut urls) = linker_for(&plaid, Duration::from_secs(10));
    let err = linker.link(port).await.expect_err("port is taken");

    assert!(matches!(err, LinkError::Bind { .. }));
    assert!(urls.try_recv().is_err());
}
