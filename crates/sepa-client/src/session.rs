//! Subscription sessions
//!
//! A session owns one WebSocket connection and moves through
//! `Connecting -> Confirmed -> Closed`. [`open`] performs the subscribe
//! handshake and returns the broker-assigned id exactly once; the receive
//! loop it spawns keeps invoking the [`NotificationHandler`] for every delta
//! until the session is closed.
//!
//! # Example
//!
//! ```rust,no_run
//! use sepa_client::{Binding, ClientConfig, ConnectionHandler, SubscriptionRequest};
//!
//! # async fn example() -> sepa_client::Result<()> {
//! let handler = ConnectionHandler::new(ClientConfig::default())?;
//!
//! let request = SubscriptionRequest::new("SELECT ?s WHERE { ?s ?p ?o }", "all");
//! let id = handler
//!     .subscribe("ws://localhost:9000/subscribe", request, |added: Vec<Binding>, removed: Vec<Binding>| {
//!         println!("+{} -{}", added.len(), removed.len());
//!     })
//!     .await?;
//!
//! handler.unsubscribe(&id).await?;
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use serde::Serialize;
use serde_json::json;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::Instant;
use tokio_tungstenite::tungstenite::protocol::Message;
use tracing::{debug, info, instrument, trace, warn};
use url::Url;

use crate::error::{Result, SepaClientError};
use crate::notification::{Binding, NotificationParser, ParsedMessage};
use crate::registry::{SessionEntry, SessionRegistry};
use crate::transport::{Security, Transport, WsStream};

/// Extra wait granted to a closing session beyond its own unsubscribe deadline
const CLOSE_GRACE: Duration = Duration::from_millis(250);

/// A SPARQL subscription as sent in the handshake
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SubscriptionRequest {
    pub sparql: String,
    pub alias: String,
    #[serde(rename = "default-graph-uri", skip_serializing_if = "Option::is_none")]
    pub default_graph: Option<String>,
    #[serde(rename = "named-graph-uri", skip_serializing_if = "Option::is_none")]
    pub named_graph: Option<String>,
}

impl SubscriptionRequest {
    pub fn new(sparql: impl Into<String>, alias: impl Into<String>) -> Self {
        Self {
            sparql: sparql.into(),
            alias: alias.into(),
            default_graph: None,
            named_graph: None,
        }
    }

    pub fn with_default_graph(mut self, uri: impl Into<String>) -> Self {
        self.default_graph = Some(uri.into());
        self
    }

    pub fn with_named_graph(mut self, uri: impl Into<String>) -> Self {
        self.named_graph = Some(uri.into());
        self
    }

    /// Handshake message; `token` is sent as-is
    pub fn handshake(&self, token: Option<&str>) -> serde_json::Value {
        let mut message = json!({ "subscribe": self });
        if let Some(token) = token {
            message["authorization"] = json!(token);
        }
        message
    }
}

/// Unsubscribe message; `authorization` is a complete header value
pub fn unsubscribe_message(subscription_id: &str, authorization: Option<&str>) -> serde_json::Value {
    let mut body = json!({ "spuid": subscription_id });
    if let Some(value) = authorization {
        body["authorization"] = json!(value);
    }
    json!({ "unsubscribe": body })
}

/// Session lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Connecting,
    Confirmed,
    Closed,
}

/// Receives binding deltas for one subscription
///
/// Called from the session's receive loop, never with errors. The first call
/// carries the initial results with an empty `removed` list.
pub trait NotificationHandler: Send + 'static {
    fn handle(&mut self, added: Vec<Binding>, removed: Vec<Binding>);
}

impl<F> NotificationHandler for F
where
    F: FnMut(Vec<Binding>, Vec<Binding>) + Send + 'static,
{
    fn handle(&mut self, added: Vec<Binding>, removed: Vec<Binding>) {
        self(added, removed)
    }
}

/// Requests sent from callers to a session's receive loop
#[derive(Debug)]
pub(crate) enum Control {
    /// Send the unsubscribe message and wait (bounded) for the broker to close
    Unsubscribe { authorization: Option<String> },
    /// The caller's handshake wait timed out; drop the session whatever its state
    Cancel,
}

/// Timing knobs for one session
#[derive(Debug, Clone, Copy)]
pub struct SessionSettings {
    pub connect_timeout: Duration,
    pub handshake_timeout: Duration,
    pub unsubscribe_timeout: Duration,
}

/// Everything the receive loop needs, moved into its task
struct Session<H> {
    alias: String,
    security: Security,
    stream: WsStream,
    handler: H,
    parser: NotificationParser,
    registry: Arc<SessionRegistry>,
    state: watch::Sender<SessionState>,
    /// Arrival time of the latest inbound frame, keepalives included
    activity: watch::Sender<Instant>,
    control_rx: mpsc::UnboundedReceiver<Control>,
    /// Cleared once every control sender is gone during an unsubscribe
    control_open: bool,
    /// Moved into the registry entry on confirmation
    control_tx: Option<mpsc::UnboundedSender<Control>>,
    /// Fired once, on confirmation or on handshake failure
    waiter: Option<oneshot::Sender<Result<String>>>,
    id: Option<String>,
    unsubscribe_timeout: Duration,
    closing_deadline: Option<Instant>,
}

/// Open a session and wait for the broker to confirm it
///
/// Returns the subscription id once the confirmation arrives. If none arrives
/// within `settings.handshake_timeout` the session is abandoned, no registry
/// entry remains, and [`SepaClientError::SubscriptionTimeout`] is returned.
#[allow(clippy::too_many_arguments)]
#[instrument(skip_all, fields(url = %url, alias = %request.alias))]
pub async fn open<H>(
    transport: Transport,
    url: &Url,
    security: Security,
    request: SubscriptionRequest,
    token: Option<String>,
    handler: H,
    registry: Arc<SessionRegistry>,
    settings: SessionSettings,
) -> Result<String>
where
    H: NotificationHandler,
{
    let mut stream = transport.connect(url, settings.connect_timeout).await?;

    let handshake = request.handshake(token.as_deref());
    stream
        .send(Message::Text(handshake.to_string().into()))
        .await?;
    debug!("Subscribe request sent");

    let (waiter_tx, waiter_rx) = oneshot::channel();
    let (control_tx, control_rx) = mpsc::unbounded_channel();
    let (state_tx, _) = watch::channel(SessionState::Connecting);
    let (activity_tx, _) = watch::channel(Instant::now());
    let mut state_rx = state_tx.subscribe();

    let session = Session {
        alias: request.alias,
        security,
        stream,
        handler,
        parser: NotificationParser::new(),
        registry,
        state: state_tx,
        activity: activity_tx,
        control_rx,
        control_open: true,
        control_tx: Some(control_tx.clone()),
        waiter: Some(waiter_tx),
        id: None,
        unsubscribe_timeout: settings.unsubscribe_timeout,
        closing_deadline: None,
    };
    tokio::spawn(session.run());

    match tokio::time::timeout(settings.handshake_timeout, waiter_rx).await {
        Ok(Ok(outcome)) => outcome,
        Ok(Err(_)) => Err(SepaClientError::Handshake(
            "receive loop ended before answering".to_string(),
        )),
        Err(_) => {
            warn!(
                "No confirmation within {:?}, abandoning subscription",
                settings.handshake_timeout
            );
            // A confirmation racing the timeout must not leave a registry entry behind
            if control_tx.send(Control::Cancel).is_ok() {
                let _ = tokio::time::timeout(
                    CLOSE_GRACE,
                    state_rx.wait_for(|s| *s == SessionState::Closed),
                )
                .await;
            }
            Err(SepaClientError::SubscriptionTimeout(
                settings.handshake_timeout,
            ))
        }
    }
}

/// Unsubscribe a registered session
///
/// Closing an id that is not (or no longer) registered is a no-op. The call
/// waits at most `unsubscribe_timeout` (plus a short grace) for the broker to
/// acknowledge; the receive loop force-closes the connection at its own
/// deadline, so a broker that never acknowledges cannot hang the caller.
#[instrument(skip(registry, token))]
pub async fn close(
    registry: &SessionRegistry,
    subscription_id: &str,
    token: Option<String>,
    unsubscribe_timeout: Duration,
) -> Result<()> {
    let Some(entry) = registry.remove(subscription_id) else {
        debug!("Subscription already closed");
        return Ok(());
    };

    let authorization = match entry.security {
        Security::Secure => token.map(|t| format!("Bearer {}", t)),
        Security::Insecure => None,
    };
    if entry
        .control
        .send(Control::Unsubscribe { authorization })
        .is_err()
    {
        // Receive loop already gone
        return Ok(());
    }

    let mut state = entry.state;
    let closed = tokio::time::timeout(
        unsubscribe_timeout + CLOSE_GRACE,
        state.wait_for(|s| *s == SessionState::Closed),
    )
    .await;
    if closed.is_err() {
        warn!(
            "Subscription did not close within {:?}; its connection may linger until the broker drops it",
            unsubscribe_timeout
        );
    }
    Ok(())
}

enum Step {
    Continue,
    Stop,
}

impl<H: NotificationHandler> Session<H> {
    fn state(&self) -> SessionState {
        *self.state.borrow()
    }

    async fn run(mut self) {
        loop {
            let deadline = self.closing_deadline;
            let closing = deadline.is_some();
            let deadline_sleep =
                tokio::time::sleep_until(deadline.unwrap_or_else(Instant::now));
            tokio::pin!(deadline_sleep);

            let step = tokio::select! {
                biased;

                control = self.control_rx.recv(), if self.control_open => {
                    self.on_control(control).await
                }

                _ = &mut deadline_sleep, if closing => {
                    warn!(id = ?self.id, "No unsubscribe acknowledgement, closing connection");
                    Step::Stop
                }

                frame = self.stream.next() => self.on_frame(frame).await,
            };

            if let Step::Stop = step {
                break;
            }
        }

        self.shutdown().await;
    }

    async fn on_control(&mut self, control: Option<Control>) -> Step {
        match control {
            Some(Control::Unsubscribe { authorization }) => {
                let Some(id) = self.id.clone() else {
                    return Step::Stop;
                };
                if self.closing_deadline.is_some() {
                    return Step::Continue;
                }
                let message = unsubscribe_message(&id, authorization.as_deref());
                if let Err(e) = self
                    .stream
                    .send(Message::Text(message.to_string().into()))
                    .await
                {
                    warn!(%id, "Failed to send unsubscribe: {}", e);
                    return Step::Stop;
                }
                debug!(%id, "Unsubscribe sent");
                self.closing_deadline = Some(Instant::now() + self.unsubscribe_timeout);
                Step::Continue
            }
            Some(Control::Cancel) => {
                debug!(id = ?self.id, "Handshake cancelled by caller");
                Step::Stop
            }
            // The registry entry is dropped right after queueing an unsubscribe
            None if self.closing_deadline.is_some() => {
                self.control_open = false;
                Step::Continue
            }
            // Every sender is gone: nobody can close this session any more
            None => Step::Stop,
        }
    }

    async fn on_frame(
        &mut self,
        frame: Option<std::result::Result<Message, tokio_tungstenite::tungstenite::Error>>,
    ) -> Step {
        if let Some(Ok(_)) = &frame {
            self.activity.send_replace(Instant::now());
        }
        match frame {
            Some(Ok(Message::Text(text))) => self.on_text(text.as_str()),
            Some(Ok(Message::Ping(payload))) => {
                let _ = self.stream.send(Message::Pong(payload)).await;
                Step::Continue
            }
            Some(Ok(Message::Close(frame))) => {
                debug!(id = ?self.id, "Broker closed connection: {:?}", frame);
                self.fail_handshake("connection closed by broker");
                Step::Stop
            }
            Some(Ok(Message::Binary(_))) | Some(Ok(Message::Pong(_))) | Some(Ok(Message::Frame(_))) => {
                trace!("Ignoring non-text frame");
                Step::Continue
            }
            Some(Err(e)) => {
                warn!(id = ?self.id, "WebSocket error: {}", e);
                self.fail_handshake(&format!("transport error: {}", e));
                Step::Stop
            }
            None => {
                debug!(id = ?self.id, "WebSocket stream ended");
                self.fail_handshake("connection ended");
                Step::Stop
            }
        }
    }

    fn on_text(&mut self, text: &str) -> Step {
        trace!("Received: {}", text);
        let parsed = self.parser.parse(text);

        match self.state() {
            SessionState::Connecting => self.on_handshake_message(parsed),
            SessionState::Confirmed => self.on_notification(parsed),
            SessionState::Closed => Step::Stop,
        }
    }

    fn on_handshake_message(&mut self, parsed: ParsedMessage) -> Step {
        match parsed {
            ParsedMessage::Confirmed {
                subscription_id,
                initial_added,
                ..
            } => self.confirm(subscription_id, initial_added),
            ParsedMessage::Keepalive => Step::Continue,
            ParsedMessage::Malformed { reason } => {
                self.fail_handshake(&reason);
                Step::Stop
            }
            other => {
                self.fail_handshake(&format!("expected confirmation, got {:?}", other));
                Step::Stop
            }
        }
    }

    fn confirm(&mut self, id: String, initial_added: Vec<Binding>) -> Step {
        let Some(control) = self.control_tx.take() else {
            return Step::Stop;
        };
        let entry = SessionEntry {
            alias: self.alias.clone(),
            security: self.security,
            control,
            state: self.state.subscribe(),
            last_activity: self.activity.subscribe(),
        };
        if !self.registry.insert(&id, entry) {
            self.fail_handshake(&format!("subscription id {} is already in use", id));
            return Step::Stop;
        }
        self.id = Some(id.clone());
        self.state.send_replace(SessionState::Confirmed);

        let released = self
            .waiter
            .take()
            .map(|waiter| waiter.send(Ok(id.clone())).is_ok())
            .unwrap_or(false);
        if !released {
            // The caller gave up waiting; shutdown drops the registry entry
            debug!(%id, "Confirmation arrived after the caller gave up");
            return Step::Stop;
        }
        info!(%id, alias = %self.alias, "Subscription confirmed");

        // Initial results only reach subscriptions the caller was told about
        self.handler.handle(initial_added, Vec::new());
        Step::Continue
    }

    fn on_notification(&mut self, parsed: ParsedMessage) -> Step {
        match parsed {
            ParsedMessage::Delta { added, removed, .. } => {
                debug!(
                    id = ?self.id,
                    added = added.len(),
                    removed = removed.len(),
                    "Notification"
                );
                self.handler.handle(added, removed);
                Step::Continue
            }
            ParsedMessage::Keepalive => Step::Continue,
            ParsedMessage::Unsubscribed { .. } => {
                info!(id = ?self.id, "Broker acknowledged unsubscribe");
                Step::Stop
            }
            ParsedMessage::Malformed { reason } => {
                warn!(id = ?self.id, "Treating malformed notification as empty: {}", reason);
                self.handler.handle(Vec::new(), Vec::new());
                Step::Continue
            }
            // The parser never reports a second confirmation
            ParsedMessage::Confirmed { .. } => Step::Continue,
        }
    }

    fn fail_handshake(&mut self, reason: &str) {
        if let Some(waiter) = self.waiter.take() {
            debug!("Handshake failed: {}", reason);
            let _ = waiter.send(Err(SepaClientError::Handshake(reason.to_string())));
        }
    }

    async fn shutdown(mut self) {
        self.fail_handshake("session closed");
        if let Some(id) = &self.id {
            self.registry.remove(id);
        }
        let _ = self.stream.close(None).await;
        self.state.send_replace(SessionState::Closed);
        debug!(id = ?self.id, "Session closed");
    }
}
