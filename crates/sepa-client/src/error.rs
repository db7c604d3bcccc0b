//! Error types for SEPA client operations

use std::time::Duration;

use thiserror::Error;

/// Result type alias for SEPA client operations
pub type Result<T> = std::result::Result<T, SepaClientError>;

/// Errors that can occur during SEPA client operations
#[derive(Error, Debug)]
pub enum SepaClientError {
    /// HTTP request failed at the transport level
    #[error("HTTP request failed: {0}")]
    HttpError(#[from] reqwest::Error),

    /// Invalid URL
    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    /// URL scheme is neither plain nor TLS HTTP/WebSocket
    #[error("Unsupported URL scheme: {0}")]
    UnsupportedScheme(String),

    /// IO error
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    /// Server returned a non-success status (or an error document)
    #[error("Server error {status}: {message}")]
    ServerError { status: u16, message: String },

    /// The client could not be registered
    #[error("Client registration failed: {0}")]
    RegistrationFailed(String),

    /// No bearer token could be obtained
    #[error("Token request failed: {0}")]
    TokenRequestFailed(String),

    /// A protected request was rejected with 401; the stored token was cleared
    #[error("Bearer token expired")]
    TokenExpired,

    /// The subscription was not confirmed within the handshake bound
    #[error("Subscription not confirmed within {0:?}")]
    SubscriptionTimeout(Duration),

    /// The broker broke the subscribe handshake
    #[error("Subscription handshake failed: {0}")]
    Handshake(String),

    /// WebSocket transport error
    #[error("WebSocket error: {0}")]
    WebSocket(String),

    /// Failed to parse a response or document
    #[error("Failed to parse response: {0}")]
    ParseError(String),

    /// Invalid configuration
    #[error("Configuration error: {0}")]
    Config(String),
}

impl SepaClientError {
    /// Create a server error from status code and message
    pub fn server_error(status: u16, message: impl Into<String>) -> Self {
        Self::ServerError {
            status,
            message: message.into(),
        }
    }

    /// Whether the caller may recover by requesting a fresh token and retrying once
    pub fn is_token_expired(&self) -> bool {
        matches!(self, Self::TokenExpired)
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for SepaClientError {
    fn from(e: tokio_tungstenite::tungstenite::Error) -> Self {
        Self::WebSocket(e.to_string())
    }
}

impl From<serde_json::Error> for SepaClientError {
    fn from(e: serde_json::Error) -> Self {
        Self::ParseError(e.to_string())
    }
}
