//! Connection handler: the single entry point for SPARQL requests and
//! subscriptions against one broker

use std::sync::Arc;

use serde_json::Value;
use tokio::sync::Mutex;
use tracing::{debug, info, instrument, warn};
use url::Url;

use crate::config::ClientConfig;
use crate::credentials::{CredentialManager, Credentials};
use crate::error::{Result, SepaClientError};
use crate::executor::{RawResponse, RequestExecutor, RequestKind};
use crate::registry::{SessionRegistry, SubscriptionInfo};
use crate::session::{self, NotificationHandler, SessionSettings, SubscriptionRequest};
use crate::transport::{Security, Transport};

/// Update removing every triple of the default graph
pub const CLEAR_ALL: &str = "DELETE WHERE { ?a ?b ?c }";

/// Query returning every triple of the default graph
pub const SELECT_ALL: &str = "SELECT * WHERE { ?a ?b ?c }";

/// Client for a SEPA broker
///
/// Secure or insecure operation is chosen from each URI scheme (`https`/`wss`
/// versus `http`/`ws`); the `*_with` variants take the choice explicitly. On
/// secure paths the client registers and requests a token lazily. A 401
/// clears the token and fails with [`SepaClientError::TokenExpired`]; the
/// caller decides whether to retry.
#[derive(Debug)]
pub struct ConnectionHandler {
    config: ClientConfig,
    executor: RequestExecutor,
    credentials: CredentialManager,
    registry: Arc<SessionRegistry>,
    /// Held while registering and requesting a token on demand
    token_lock: Mutex<()>,
}

impl ConnectionHandler {
    /// Create a handler from configuration
    ///
    /// When `security.credentials_file` is set, credentials are loaded from
    /// (and saved to) that file.
    pub fn new(config: ClientConfig) -> Result<Self> {
        let credentials = match &config.security.credentials_file {
            Some(path) => CredentialManager::with_store(&config.security.client_identity, path)?,
            None => CredentialManager::new(Credentials::new(&config.security.client_identity)),
        };
        Self::with_credentials(config, credentials)
    }

    /// Create a handler with an explicit credential manager
    pub fn with_credentials(config: ClientConfig, credentials: CredentialManager) -> Result<Self> {
        let executor = RequestExecutor::new(&config)?;
        Ok(Self {
            config,
            executor,
            credentials,
            registry: Arc::new(SessionRegistry::new()),
            token_lock: Mutex::new(()),
        })
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn credentials(&self) -> &CredentialManager {
        &self.credentials
    }

    pub fn registry(&self) -> &Arc<SessionRegistry> {
        &self.registry
    }

    // =========================================================================
    // Security
    // =========================================================================

    /// Register with the configured registration endpoint
    pub async fn register(&self) -> Result<()> {
        let uri = configured(&self.config.endpoints.register, "register")?;
        self.credentials.register(&self.executor, &uri).await
    }

    /// Request a bearer token from the configured token endpoint
    pub async fn request_token(&self) -> Result<()> {
        let uri = configured(&self.config.endpoints.token, "token")?;
        self.credentials.request_token(&self.executor, &uri).await
    }

    /// Current bearer token, registering and requesting one if needed
    async fn ensure_token(&self) -> Result<String> {
        if let Some(token) = self.credentials.token() {
            return Ok(token);
        }
        let _acquiring = self.token_lock.lock().await;
        // Another caller may have finished while this one waited
        if let Some(token) = self.credentials.token() {
            return Ok(token);
        }
        if !self.credentials.has_secret() {
            debug!("Client not registered, registering");
            self.register().await?;
        }
        self.request_token().await?;
        self.credentials.token().ok_or_else(|| {
            SepaClientError::TokenRequestFailed("no token stored after request".to_string())
        })
    }

    // =========================================================================
    // Queries and updates
    // =========================================================================

    /// Send a SPARQL request, security chosen from the URI scheme
    pub async fn request(&self, uri: &str, sparql: &str, kind: RequestKind) -> Result<RawResponse> {
        let uri = Url::parse(uri)?;
        let security = Security::from_url(&uri)?;
        self.request_url(&uri, sparql, kind, security).await
    }

    /// Send a SPARQL request with an explicit security level
    pub async fn request_with(
        &self,
        uri: &str,
        sparql: &str,
        kind: RequestKind,
        security: Security,
    ) -> Result<RawResponse> {
        let uri = Url::parse(uri)?;
        self.request_url(&uri, sparql, kind, security).await
    }

    #[instrument(skip(self, sparql), fields(uri = %uri))]
    async fn request_url(
        &self,
        uri: &Url,
        sparql: &str,
        kind: RequestKind,
        security: Security,
    ) -> Result<RawResponse> {
        let token = match security {
            Security::Secure => Some(self.ensure_token().await?),
            Security::Insecure => None,
        };

        let response = self
            .executor
            .send(uri, sparql, kind, token.as_deref())
            .await?;

        if response.status == 401 {
            warn!("Request rejected with 401, dropping bearer token");
            self.credentials.invalidate_token();
            return Err(SepaClientError::TokenExpired);
        }
        Ok(response)
    }

    /// Run a SPARQL query and return the results document
    pub async fn query(&self, uri: &str, sparql: &str) -> Result<Value> {
        let response = self.request(uri, sparql, RequestKind::Query).await?;
        query_results(response)
    }

    pub async fn query_with(&self, uri: &str, sparql: &str, security: Security) -> Result<Value> {
        let response = self
            .request_with(uri, sparql, RequestKind::Query, security)
            .await?;
        query_results(response)
    }

    /// Run a SPARQL update and return the broker's response body
    pub async fn update(&self, uri: &str, sparql: &str) -> Result<String> {
        let response = self.request(uri, sparql, RequestKind::Update).await?;
        update_body(response)
    }

    pub async fn update_with(&self, uri: &str, sparql: &str, security: Security) -> Result<String> {
        let response = self
            .request_with(uri, sparql, RequestKind::Update, security)
            .await?;
        update_body(response)
    }

    /// Remove every triple
    pub async fn clear(&self, uri: &str) -> Result<String> {
        self.update(uri, CLEAR_ALL).await
    }

    /// Fetch every triple
    pub async fn query_all(&self, uri: &str) -> Result<Value> {
        self.query(uri, SELECT_ALL).await
    }

    /// Query against the configured query endpoint
    pub async fn query_default(&self, sparql: &str) -> Result<Value> {
        let uri = configured(&self.config.endpoints.query, "query")?;
        self.query(uri.as_str(), sparql).await
    }

    /// Update against the configured update endpoint
    pub async fn update_default(&self, sparql: &str) -> Result<String> {
        let uri = configured(&self.config.endpoints.update, "update")?;
        self.update(uri.as_str(), sparql).await
    }

    // =========================================================================
    // Subscriptions
    // =========================================================================

    /// Open a subscription, security chosen from the URI scheme
    ///
    /// Returns the broker-assigned subscription id once confirmed. `handler`
    /// first receives the initial results, then every delta until the
    /// subscription is closed.
    pub async fn subscribe<H>(&self, uri: &str, request: SubscriptionRequest, handler: H) -> Result<String>
    where
        H: NotificationHandler,
    {
        let url = Url::parse(uri)?;
        let security = Security::from_url(&url)?;
        self.subscribe_url(&url, request, security, handler).await
    }

    /// Open a subscription with an explicit security level
    pub async fn subscribe_with<H>(
        &self,
        uri: &str,
        request: SubscriptionRequest,
        security: Security,
        handler: H,
    ) -> Result<String>
    where
        H: NotificationHandler,
    {
        let url = Url::parse(uri)?;
        self.subscribe_url(&url, request, security, handler).await
    }

    /// Subscribe against the configured subscribe endpoint
    pub async fn subscribe_default<H>(&self, request: SubscriptionRequest, handler: H) -> Result<String>
    where
        H: NotificationHandler,
    {
        let uri = configured(&self.config.endpoints.subscribe, "subscribe")?;
        self.subscribe(uri.as_str(), request, handler).await
    }

    async fn subscribe_url<H>(
        &self,
        url: &Url,
        request: SubscriptionRequest,
        security: Security,
        handler: H,
    ) -> Result<String>
    where
        H: NotificationHandler,
    {
        let transport = Transport::for_url(url, self.config.security.accept_invalid_certs)?;
        let token = match security {
            Security::Secure => Some(self.ensure_token().await?),
            Security::Insecure => None,
        };

        let id = session::open(
            transport,
            url,
            security,
            request,
            token,
            handler,
            Arc::clone(&self.registry),
            self.session_settings(),
        )
        .await?;

        info!(%id, "Subscribed");
        Ok(id)
    }

    /// Close a subscription
    ///
    /// Closing an unknown or already closed id succeeds without effect.
    pub async fn unsubscribe(&self, subscription_id: &str) -> Result<()> {
        session::close(
            &self.registry,
            subscription_id,
            self.credentials.token(),
            self.config.timeouts.unsubscribe(),
        )
        .await
    }

    /// Ids of all live subscriptions
    pub fn subscriptions(&self) -> Vec<String> {
        self.registry.ids()
    }

    pub fn subscription(&self, subscription_id: &str) -> Option<SubscriptionInfo> {
        self.registry.get(subscription_id)
    }

    /// Close every live subscription
    pub async fn close_all(&self) -> Result<()> {
        for id in self.registry.ids() {
            self.unsubscribe(&id).await?;
        }
        Ok(())
    }

    fn session_settings(&self) -> SessionSettings {
        SessionSettings {
            connect_timeout: self.config.timeouts.connect(),
            handshake_timeout: self.config.timeouts.handshake(),
            unsubscribe_timeout: self.config.timeouts.unsubscribe(),
        }
    }
}

impl Drop for ConnectionHandler {
    fn drop(&mut self) {
        // Receive loops hold the registry, not the handler: ask them to stop
        let token = self.credentials.token();
        for (id, entry) in self.registry.take_all() {
            let authorization = match entry.security {
                Security::Secure => token.as_ref().map(|t| format!("Bearer {}", t)),
                Security::Insecure => None,
            };
            debug!(%id, "Unsubscribing on drop");
            let _ = entry
                .control
                .send(session::Control::Unsubscribe { authorization });
        }
    }
}

fn configured(endpoint: &Option<String>, name: &str) -> Result<Url> {
    let uri = endpoint
        .as_deref()
        .ok_or_else(|| SepaClientError::Config(format!("no {} endpoint configured", name)))?;
    Ok(Url::parse(uri)?)
}

/// Decode a query response, surfacing error documents
fn query_results(response: RawResponse) -> Result<Value> {
    if !response.is_success() {
        return Err(SepaClientError::server_error(response.status, response.body));
    }
    let document: Value = serde_json::from_str(&response.body)?;
    if let Some(error) = document.get("error") {
        return Err(SepaClientError::server_error(
            response.status,
            error_message(error),
        ));
    }
    Ok(document)
}

fn update_body(response: RawResponse) -> Result<String> {
    if !response.is_success() {
        return Err(SepaClientError::server_error(response.status, response.body));
    }
    Ok(response.body)
}

fn error_message(error: &Value) -> String {
    match error {
        Value::String(message) => message.clone(),
        other => other
            .get("message")
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or_else(|| other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn response(status: u16, body: &str) -> RawResponse {
        RawResponse {
            status,
            body: body.to_string(),
        }
    }

    #[test]
    fn test_query_results_ok() {
        let doc = query_results(response(200, r#"{"head":{"vars":[]},"results":{"bindings":[]}}"#))
            .unwrap();
        assert_eq!(doc["results"]["bindings"], json!([]));
    }

    #[test]
    fn test_query_error_document() {
        let err = query_results(response(200, r#"{"error":"bad syntax"}"#)).unwrap_err();
        match err {
            SepaClientError::ServerError { status, message } => {
                assert_eq!(status, 200);
                assert_eq!(message, "bad syntax");
            }
            other => panic!("unexpected error: {:?}", other),
        }

        let err = query_results(response(200, r#"{"error":{"message":"nope"}}"#)).unwrap_err();
        assert!(matches!(err, SepaClientError::ServerError { message, .. } if message == "nope"));
    }

    #[test]
    fn test_non_success_status() {
        let err = update_body(response(500, "boom")).unwrap_err();
        assert!(matches!(err, SepaClientError::ServerError { status: 500, .. }));
        assert_eq!(update_body(response(200, "ok")).unwrap(), "ok");
    }

    #[test]
    fn test_missing_endpoint() {
        let handler = ConnectionHandler::new(ClientConfig::default()).unwrap();
        assert!(matches!(
            configured(&handler.config().endpoints.query, "query"),
            Err(SepaClientError::Config(_))
        ));
    }

    #[tokio::test]
    async fn test_unsupported_scheme() {
        let handler = ConnectionHandler::new(ClientConfig::default()).unwrap();
        let err = handler
            .query("ftp://localhost/query", SELECT_ALL)
            .await
            .unwrap_err();
        assert!(matches!(err, SepaClientError::UnsupportedScheme(_)));
    }

    #[tokio::test]
    async fn test_unsubscribe_unknown_is_noop() {
        let handler = ConnectionHandler::new(ClientConfig::default()).unwrap();
        handler.unsubscribe("never-existed").await.unwrap();
        assert!(handler.subscriptions().is_empty());
    }
}
