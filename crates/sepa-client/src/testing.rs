//! Test utilities for sepa-client
//!
//! [`MockBroker`] is an in-process SEPA broker: SPARQL query/update endpoints,
//! client registration and token endpoints, and a WebSocket subscribe
//! endpoint whose behaviour tests can steer.
//!
//! ```rust,ignore
//! use sepa_client::testing::MockBroker;
//! use sepa_client::ConnectionHandler;
//!
//! let broker = MockBroker::start().await?;
//! let handler = ConnectionHandler::new(broker.config())?;
//! let results = handler.query_all(&broker.http_url("/query")).await?;
//! ```

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use axum::body::Bytes;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use parking_lot::Mutex;
use serde_json::{json, Value};
use tokio::net::TcpListener;
use tokio::sync::broadcast;

use crate::config::ClientConfig;
use crate::credentials::basic_secret;
use crate::Result;

/// Placeholder replaced by the receiving session's id in pushed messages
pub const SPUID_PLACEHOLDER: &str = "{spuid}";

/// How the broker answers a subscribe request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscribeBehavior {
    /// Confirm with a fresh `sub-N` id and the configured initial bindings
    Confirm,
    /// Never answer
    Silent,
    /// Answer with an error document
    Reject,
    /// Confirm only after the given delay
    ConfirmAfter(Duration),
    /// Send a keepalive, then confirm
    PingThenConfirm,
    /// Answer with a sequence-1 notification instead of a confirmation
    DeltaFirst,
    /// Answer with an unsubscribe acknowledgement instead of a confirmation
    UnsubscribedFirst,
    /// Confirm, then close the connection
    DropAfterConfirm,
}

/// An HTTP request as seen by the broker
#[derive(Debug, Clone)]
pub struct RecordedRequest {
    pub path: String,
    pub content_type: Option<String>,
    pub accept: Option<String>,
    pub authorization: Option<String>,
    pub body: String,
}

struct BrokerState {
    behavior: Mutex<SubscribeBehavior>,
    initial_bindings: Mutex<Vec<Value>>,
    query_response: Mutex<Value>,
    ack_unsubscribe: AtomicBool,
    require_token: AtomicBool,
    next_subscription: AtomicU64,
    next_token: AtomicU64,
    live_sessions: AtomicUsize,
    /// identity -> Basic secret
    clients: Mutex<HashMap<String, String>>,
    valid_token: Mutex<Option<String>>,
    requests: Mutex<Vec<RecordedRequest>>,
    subscribe_messages: Mutex<Vec<Value>>,
    unsubscribe_messages: Mutex<Vec<Value>>,
    pushes: broadcast::Sender<String>,
}

impl BrokerState {
    fn new() -> Self {
        let (pushes, _) = broadcast::channel(64);
        Self {
            behavior: Mutex::new(SubscribeBehavior::Confirm),
            initial_bindings: Mutex::new(Vec::new()),
            query_response: Mutex::new(json!({
                "head": { "vars": [] },
                "results": { "bindings": [] }
            })),
            ack_unsubscribe: AtomicBool::new(true),
            require_token: AtomicBool::new(false),
            next_subscription: AtomicU64::new(1),
            next_token: AtomicU64::new(1),
            live_sessions: AtomicUsize::new(0),
            clients: Mutex::new(HashMap::new()),
            valid_token: Mutex::new(None),
            requests: Mutex::new(Vec::new()),
            subscribe_messages: Mutex::new(Vec::new()),
            unsubscribe_messages: Mutex::new(Vec::new()),
            pushes,
        }
    }
}

/// A mock broker that shuts down when dropped
pub struct MockBroker {
    pub addr: SocketAddr,
    state: Arc<BrokerState>,
    shutdown_tx: Option<tokio::sync::oneshot::Sender<()>>,
    handle: Option<tokio::task::JoinHandle<()>>,
}

impl MockBroker {
    /// Start a broker on an ephemeral local port
    pub async fn start() -> Result<Self> {
        let state = Arc::new(BrokerState::new());

        let router = Router::new()
            .route("/query", post(sparql_endpoint))
            .route("/update", post(sparql_endpoint))
            .route("/oauth/register", post(register))
            .route("/oauth/token", post(token))
            .route("/subscribe", get(subscribe))
            .with_state(Arc::clone(&state));

        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;

        let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel();
        let handle = tokio::spawn(async move {
            axum::serve(listener, router)
                .with_graceful_shutdown(async {
                    let _ = shutdown_rx.await;
                })
                .await
                .ok();
        });

        tokio::time::sleep(Duration::from_millis(10)).await;

        Ok(Self {
            addr,
            state,
            shutdown_tx: Some(shutdown_tx),
            handle: Some(handle),
        })
    }

    pub fn http_url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }

    pub fn ws_url(&self, path: &str) -> String {
        format!("ws://{}{}", self.addr, path)
    }

    /// Client configuration pointing at every broker endpoint
    ///
    /// Timeouts are shortened so failing tests finish quickly.
    pub fn config(&self) -> ClientConfig {
        let mut config = ClientConfig::default();
        config.endpoints.query = Some(self.http_url("/query"));
        config.endpoints.update = Some(self.http_url("/update"));
        config.endpoints.subscribe = Some(self.ws_url("/subscribe"));
        config.endpoints.register = Some(self.http_url("/oauth/register"));
        config.endpoints.token = Some(self.http_url("/oauth/token"));
        config.timeouts.handshake_ms = 1000;
        config.timeouts.unsubscribe_ms = 500;
        config
    }

    pub fn set_behavior(&self, behavior: SubscribeBehavior) {
        *self.state.behavior.lock() = behavior;
    }

    /// Bindings carried by every confirmation
    pub fn set_initial_bindings(&self, bindings: Vec<Value>) {
        *self.state.initial_bindings.lock() = bindings;
    }

    pub fn set_query_response(&self, response: Value) {
        *self.state.query_response.lock() = response;
    }

    /// Whether unsubscribe requests are acknowledged (and the socket closed)
    pub fn set_ack_unsubscribe(&self, ack: bool) {
        self.state.ack_unsubscribe.store(ack, Ordering::SeqCst);
    }

    /// Require a valid bearer token on query and update
    pub fn require_token(&self, required: bool) {
        self.state.require_token.store(required, Ordering::SeqCst);
    }

    /// Invalidate the issued token; the next protected request gets a 401
    pub fn expire_tokens(&self) {
        *self.state.valid_token.lock() = None;
    }

    /// Send a raw message to every confirmed session
    ///
    /// [`SPUID_PLACEHOLDER`] is replaced by each session's own id.
    pub fn push(&self, raw: impl Into<String>) {
        let _ = self.state.pushes.send(raw.into());
    }

    /// Push a notification delta to every confirmed session
    pub fn push_delta(&self, sequence: u64, added: Vec<Value>, removed: Vec<Value>) {
        self.push(
            json!({
                "notification": {
                    "spuid": SPUID_PLACEHOLDER,
                    "sequence": sequence,
                    "addedResults": { "results": { "bindings": added } },
                    "removedResults": { "results": { "bindings": removed } },
                }
            })
            .to_string(),
        );
    }

    pub fn push_ping(&self) {
        self.push(json!({ "ping": { "timestamp": "now" } }).to_string());
    }

    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.state.requests.lock().clone()
    }

    pub fn subscribe_messages(&self) -> Vec<Value> {
        self.state.subscribe_messages.lock().clone()
    }

    pub fn unsubscribe_messages(&self) -> Vec<Value> {
        self.state.unsubscribe_messages.lock().clone()
    }

    /// Number of registered client identities
    pub fn registered_clients(&self) -> usize {
        self.state.clients.lock().len()
    }

    /// Number of open WebSocket connections
    pub fn live_sessions(&self) -> usize {
        self.state.live_sessions.load(Ordering::SeqCst)
    }

    /// Shutdown the broker gracefully
    pub async fn shutdown(mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        if let Some(handle) = self.handle.take() {
            let _ = handle.await;
        }
    }
}

impl Drop for MockBroker {
    fn drop(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
    }
}

// =============================================================================
// HTTP endpoints
// =============================================================================

fn header_value(headers: &HeaderMap, name: header::HeaderName) -> Option<String> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
}

async fn sparql_endpoint(
    State(state): State<Arc<BrokerState>>,
    uri: axum::http::Uri,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let request = RecordedRequest {
        path: uri.path().to_string(),
        content_type: header_value(&headers, header::CONTENT_TYPE),
        accept: header_value(&headers, header::ACCEPT),
        authorization: header_value(&headers, header::AUTHORIZATION),
        body: String::from_utf8_lossy(&body).into_owned(),
    };
    let authorized = match state.valid_token.lock().as_ref() {
        Some(token) => request.authorization.as_deref() == Some(&format!("Bearer {}", token)),
        None => false,
    };
    let is_update = request.path == "/update";
    state.requests.lock().push(request);

    if state.require_token.load(Ordering::SeqCst) && !authorized {
        return (
            StatusCode::UNAUTHORIZED,
            Json(json!({ "error": "invalid_grant", "status_code": 401 })),
        )
            .into_response();
    }

    if is_update {
        Json(json!({ "updated": true })).into_response()
    } else {
        Json(state.query_response.lock().clone()).into_response()
    }
}

async fn register(State(state): State<Arc<BrokerState>>, Json(payload): Json<Value>) -> Response {
    let Some(identity) = payload
        .pointer("/register/client_identity")
        .and_then(Value::as_str)
    else {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({ "error": "invalid_request" })),
        )
            .into_response();
    };

    let mut clients = state.clients.lock();
    if clients.contains_key(identity) {
        return (
            StatusCode::UNAUTHORIZED,
            Json(json!({
                "error": "unauthorized_client",
                "error_description": format!("{} already registered", identity)
            })),
        )
            .into_response();
    }

    let secret = format!("secret-{}", identity);
    clients.insert(identity.to_string(), basic_secret(identity, &secret));

    (
        StatusCode::CREATED,
        Json(json!({
            "credentials": { "client_id": identity, "client_secret": secret }
        })),
    )
        .into_response()
}

async fn token(State(state): State<Arc<BrokerState>>, headers: HeaderMap) -> Response {
    let presented = header_value(&headers, header::AUTHORIZATION);
    let known = presented
        .as_deref()
        .map(|basic| state.clients.lock().values().any(|secret| secret == basic))
        .unwrap_or(false);
    if !known {
        return (
            StatusCode::UNAUTHORIZED,
            Json(json!({ "error": "unauthorized_client" })),
        )
            .into_response();
    }

    let token = format!("token-{}", state.next_token.fetch_add(1, Ordering::SeqCst));
    *state.valid_token.lock() = Some(token.clone());

    (
        StatusCode::CREATED,
        Json(json!({
            "token": { "access_token": token, "token_type": "bearer", "expires_in": 5 }
        })),
    )
        .into_response()
}

// =============================================================================
// Subscribe endpoint
// =============================================================================

async fn subscribe(ws: WebSocketUpgrade, State(state): State<Arc<BrokerState>>) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(mut socket: WebSocket, state: Arc<BrokerState>) {
    state.live_sessions.fetch_add(1, Ordering::SeqCst);
    // Subscribe before confirming so no push sent after confirmation is missed
    let mut pushes = state.pushes.subscribe();
    let mut spuid: Option<String> = None;

    loop {
        tokio::select! {
            inbound = socket.recv() => {
                let text = match inbound {
                    Some(Ok(Message::Text(text))) => text,
                    Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                    Some(Ok(_)) => continue,
                };
                let document: Value = serde_json::from_str(text.as_str()).unwrap_or(Value::Null);

                if document.get("subscribe").is_some() {
                    state.subscribe_messages.lock().push(document.clone());
                    let behavior = *state.behavior.lock();
                    let alias = document.pointer("/subscribe/alias").cloned();
                    let replies = match behavior {
                        SubscribeBehavior::Silent => Vec::new(),
                        SubscribeBehavior::Reject => vec![json!({
                            "error": "invalid_request",
                            "message": "subscription refused"
                        })],
                        SubscribeBehavior::DeltaFirst => vec![json!({
                            "notification": {
                                "spuid": "sub-0",
                                "sequence": 1,
                                "addedResults": { "results": { "bindings": [] } },
                                "removedResults": { "results": { "bindings": [] } }
                            }
                        })],
                        SubscribeBehavior::UnsubscribedFirst => {
                            vec![json!({ "unsubscribed": { "spuid": "sub-0" } })]
                        }
                        SubscribeBehavior::PingThenConfirm => {
                            let id = next_spuid(&state);
                            let replies = vec![
                                json!({ "ping": { "timestamp": "now" } }),
                                confirmation(&state, &id, alias),
                            ];
                            spuid = Some(id);
                            replies
                        }
                        SubscribeBehavior::Confirm
                        | SubscribeBehavior::ConfirmAfter(_)
                        | SubscribeBehavior::DropAfterConfirm => {
                            let id = next_spuid(&state);
                            let replies = vec![confirmation(&state, &id, alias)];
                            spuid = Some(id);
                            replies
                        }
                    };

                    if let SubscribeBehavior::ConfirmAfter(delay) = behavior {
                        tokio::time::sleep(delay).await;
                    }
                    let mut sent = true;
                    for reply in replies {
                        if socket.send(Message::Text(reply.to_string().into())).await.is_err() {
                            sent = false;
                            break;
                        }
                    }
                    if !sent {
                        break;
                    }
                    if behavior == SubscribeBehavior::DropAfterConfirm {
                        let _ = socket.send(Message::Close(None)).await;
                        break;
                    }
                } else if let Some(request) = document.get("unsubscribe") {
                    state.unsubscribe_messages.lock().push(document.clone());
                    if state.ack_unsubscribe.load(Ordering::SeqCst) {
                        let ack = json!({ "unsubscribed": { "spuid": request.get("spuid") } });
                        let _ = socket.send(Message::Text(ack.to_string().into())).await;
                        break;
                    }
                }
            }
            pushed = pushes.recv() => {
                match pushed {
                    Ok(raw) => {
                        if let Some(id) = &spuid {
                            let message = raw.replace(SPUID_PLACEHOLDER, id);
                            if socket.send(Message::Text(message.into())).await.is_err() {
                                break;
                            }
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(_)) => continue,
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        }
    }

    state.live_sessions.fetch_sub(1, Ordering::SeqCst);
}

fn next_spuid(state: &BrokerState) -> String {
    format!(
        "sub-{}",
        state.next_subscription.fetch_add(1, Ordering::SeqCst)
    )
}

fn confirmation(state: &BrokerState, id: &str, alias: Option<Value>) -> Value {
    json!({
        "notification": {
            "spuid": id,
            "alias": alias,
            "sequence": 0,
            "addedResults": {
                "results": { "bindings": state.initial_bindings.lock().clone() }
            },
            "removedResults": { "results": { "bindings": [] } }
        }
    })
}
