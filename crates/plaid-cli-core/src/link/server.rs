//! One-shot localhost server for the Plaid Link handshake.
//!
//! Serves the Link page and waits for the page to post back the outcome.
//! The first valid post is delivered to the waiting linker; anything after
//! that is acknowledged and dropped.

use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;
use subtle::ConstantTimeEq;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{oneshot, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::page::{self, WidgetConfig, EXCHANGE_PATH};
use super::LinkError;

/// Upper bound on request line plus headers.
const MAX_HEADER_BYTES: usize = 16 * 1024;

/// Upper bound on a callback body.
const MAX_BODY_BYTES: usize = 64 * 1024;

/// A client that has not sent a full request by now is dropped.
const CONNECTION_TIMEOUT_SECS: u64 = 10;

/// Outcome reported by the Link page.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Delivery {
    PublicToken(String),
    Exited { code: String, message: String },
}

/// JSON body posted by the page.
#[derive(Debug, Deserialize)]
struct CallbackPayload {
    #[serde(default)]
    state: Option<String>,
    #[serde(default)]
    public_token: Option<String>,
    #[serde(default)]
    error_code: Option<String>,
    #[serde(default)]
    error_message: Option<String>,
}

impl CallbackPayload {
    fn into_delivery(self) -> Option<Delivery> {
        match (self.public_token, self.error_code) {
            (Some(token), _) if !token.is_empty() => Some(Delivery::PublicToken(token)),
            (_, Some(code)) => Some(Delivery::Exited {
                code,
                message: self.error_message.unwrap_or_default(),
            }),
            _ => None,
        }
    }
}

/// State shared between the accept loop and connection handlers.
struct Shared {
    page: String,
    state: String,
    slot: Mutex<Option<oneshot::Sender<Delivery>>>,
}

impl Shared {
    /// Hand the outcome to the linker. Only the first call does anything.
    async fn deliver(&self, delivery: Delivery) -> bool {
        match self.slot.lock().await.take() {
            Some(tx) => tx.send(delivery).is_ok(),
            None => false,
        }
    }
}

/// A running callback server. Must be finished with [`CallbackServer::stop`].
pub struct CallbackServer {
    port: u16,
    accept_task: JoinHandle<()>,
    result: oneshot::Receiver<Delivery>,
}

impl CallbackServer {
    /// Bind `127.0.0.1:port` and start serving. Port 0 picks a free port.
    pub async fn start(port: u16, widget: &WidgetConfig, state: String) -> Result<Self, LinkError> {
        let listener = TcpListener::bind(("127.0.0.1", port))
            .await
            .map_err(|source| LinkError::Bind { port, source })?;
        let port = listener
            .local_addr()
            .map_err(|source| LinkError::Bind { port, source })?
            .port();

        let (tx, rx) = oneshot::channel();
        let shared = Arc::new(Shared {
            page: page::render(widget, &state),
            state,
            slot: Mutex::new(Some(tx)),
        });

        let accept_task = tokio::spawn(accept_loop(listener, shared));
        info!(port = port, update_mode = widget.is_update_mode(), "Callback server listening");

        Ok(Self {
            port,
            accept_task,
            result: rx,
        })
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// Address of the Link page for the user's browser.
    pub fn url(&self) -> String {
        format!("http://127.0.0.1:{}/link", self.port)
    }

    /// Wait for the page to report back, up to `timeout` if given.
    pub async fn await_result(&mut self, timeout: Option<Duration>) -> Result<String, LinkError> {
        debug!(port = self.port, "Awaiting Plaid Link callback");
        let received = match timeout {
            Some(limit) => tokio::time::timeout(limit, &mut self.result)
                .await
                .map_err(|_| LinkError::Timeout(limit))?,
            None => (&mut self.result).await,
        };

        match received {
            Ok(Delivery::PublicToken(token)) => {
                debug!("Public token delivered");
                Ok(token)
            }
            Ok(Delivery::Exited { code, message }) => {
                debug!(code = %code, "Plaid Link exited without a token");
                Err(LinkError::Rejected { code, message })
            }
            Err(_) => Err(LinkError::Aborted),
        }
    }

    /// Stop accepting connections and release the port.
    ///
    /// Requests already being handled finish on their own tasks.
    pub async fn stop(mut self) {
        self.accept_task.abort();
        // Awaiting the aborted task guarantees the listener has been dropped.
        let _ = (&mut self.accept_task).await;
        debug!(port = self.port, "Callback server stopped");
    }
}

impl Drop for CallbackServer {
    /// Covers callers that never reach `stop`, e.g. a cancelled handshake.
    /// The listener goes away once the runtime processes the abort.
    fn drop(&mut self) {
        self.accept_task.abort();
    }
}

async fn accept_loop(listener: TcpListener, shared: Arc<Shared>) {
    loop {
        match listener.accept().await {
            Ok((socket, peer)) => {
                debug!(peer = %peer, "Accepted connection");
                let shared = shared.clone();
                tokio::spawn(async move {
                    let handled = tokio::time::timeout(
                        Duration::from_secs(CONNECTION_TIMEOUT_SECS),
                        handle_connection(socket, &shared),
                    )
                    .await;
                    match handled {
                        Ok(Err(e)) => debug!(error = %e, "Error handling connection"),
                        Err(_) => debug!("Connection timed out"),
                        Ok(Ok(())) => {}
                    }
                });
            }
            Err(e) => {
                error!(error = %e, "Accept error");
                break;
            }
        }
    }
}

struct Request {
    method: String,
    path: String,
    body: Vec<u8>,
}

async fn read_request<S: AsyncRead + Unpin>(stream: &mut S) -> std::io::Result<Option<Request>> {
    let mut reader = BufReader::new(stream);
    let mut head = (&mut reader).take(MAX_HEADER_BYTES as u64);

    let mut request_line = String::new();
    if !read_head_line(&mut head, &mut request_line).await? {
        return Ok(None);
    }
    let mut parts = request_line.split_whitespace();
    let method = parts.next().unwrap_or_default().to_string();
    let target = parts.next().unwrap_or_default();
    let path = target.split('?').next().unwrap_or_default().to_string();

    let mut content_length = 0usize;
    loop {
        let mut line = String::new();
        if !read_head_line(&mut head, &mut line).await? {
            return Ok(None);
        }
        let line = line.trim_end();
        if line.is_empty() {
            break;
        }
        if let Some((name, value)) = line.split_once(':') {
            if name.trim().eq_ignore_ascii_case("content-length") {
                content_length = value.trim().parse().unwrap_or(0);
            }
        }
    }

    if content_length > MAX_BODY_BYTES {
        return Ok(None);
    }
    let mut body = vec![0u8; content_length];
    reader.read_exact(&mut body).await?;

    Ok(Some(Request { method, path, body }))
}

/// Read one header line. False if the peer closed the connection or the
/// header budget ran out before a newline.
async fn read_head_line<R: AsyncBufRead + Unpin>(reader: &mut R, line: &mut String) -> std::io::Result<bool> {
    let n = reader.read_line(line).await?;
    Ok(n > 0 && line.ends_with('\n'))
}

async fn handle_connection(mut socket: TcpStream, shared: &Shared) -> std::io::Result<()> {
    let request = match read_request(&mut socket).await? {
        Some(request) => request,
        None => {
            return send_response(&mut socket, 400, "Bad Request", "text/plain", "Bad Request").await;
        }
    };

    debug!(method = %request.method, path = %request.path, "Received request");

    match (request.method.as_str(), request.path.as_str()) {
        ("GET", "/") | ("GET", "/link") => {
            send_response(&mut socket, 200, "OK", "text/html; charset=utf-8", &shared.page).await
        }
        ("POST", EXCHANGE_PATH) => handle_exchange(&mut socket, shared, &request.body).await,
        (_, "/") | (_, "/link") | (_, EXCHANGE_PATH) => {
            send_response(&mut socket, 405, "Method Not Allowed", "text/plain", "Method Not Allowed").await
        }
        _ => send_response(&mut socket, 404, "Not Found", "text/plain", "Not Found").await,
    }
}

async fn handle_exchange(socket: &mut TcpStream, shared: &Shared, body: &[u8]) -> std::io::Result<()> {
    let payload: CallbackPayload = match serde_json::from_slice(body) {
        Ok(payload) => payload,
        Err(e) => {
            warn!(error = %e, "Ignoring malformed Link callback");
            return send_json(socket, 400, "Bad Request", r#"{"status":"malformed"}"#).await;
        }
    };

    if !state_matches(payload.state.as_deref(), &shared.state) {
        warn!("Ignoring Link callback with wrong state");
        return send_json(socket, 403, "Forbidden", r#"{"status":"forbidden"}"#).await;
    }

    let delivery = match payload.into_delivery() {
        Some(delivery) => delivery,
        None => {
            warn!("Ignoring Link callback without a token or error");
            return send_json(socket, 400, "Bad Request", r#"{"status":"malformed"}"#).await;
        }
    };

    // Deliver before answering so a stop right after delivery cannot race it.
    if shared.deliver(delivery).await {
        debug!("Link callback delivered");
    } else {
        debug!("Duplicate Link callback discarded");
    }
    send_json(socket, 200, "OK", r#"{"status":"ok"}"#).await
}

fn state_matches(received: Option<&str>, expected: &str) -> bool {
    match received {
        Some(state) => state.as_bytes().ct_eq(expected.as_bytes()).into(),
        None => false,
    }
}

async fn send_json(socket: &mut TcpStream, status_code: u16, status_text: &str, body: &str) -> std::io::Result<()> {
    send_response(socket, status_code, status_text, "application/json", body).await
}

/// Send an HTTP response and close.
async fn send_response(
    socket: &mut TcpStream,
    status_code: u16,
    status_text: &str,
    content_type: &str,
    body: &str,
) -> std::io::Result<()> {
    let response = format!(
        "HTTP/1.1 {} {}\r\nContent-Type: {}\r\nContent-Length: {}\r\nCache-Control: no-store\r\nConnection: close\r\n\r\n{}",
        status_code,
        status_text,
        content_type,
        body.len(),
        body
    );
    socket.write_all(response.as_bytes()).await?;
    socket.flush().await?;
    let _ = socket.shutdown().await;
    Ok(())
}
