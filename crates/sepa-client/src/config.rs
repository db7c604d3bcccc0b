//! Client configuration with YAML/TOML support
//!
//! ```yaml
//! endpoints:
//!   query: "http://localhost:8000/query"
//!   update: "http://localhost:8000/update"
//!   subscribe: "ws://localhost:9000/subscribe"
//!   register: "https://localhost:8443/oauth/register"
//!   token: "https://localhost:8443/oauth/token"
//!
//! security:
//!   client_identity: "SEPATest"
//!   credentials_file: "client.jpar"
//!   accept_invalid_certs: true
//!
//! timeouts:
//!   handshake_ms: 5000
//!
//! namespaces:
//!   rdf: "http://www.w3.org/1999/02/22-rdf-syntax-ns#"
//! ```

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Result, SepaClientError};

/// SEPA client configuration
///
/// Can be loaded from YAML, TOML, JSON, or constructed programmatically.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ClientConfig {
    /// Default broker endpoints
    #[serde(default)]
    pub endpoints: EndpointsConfig,

    /// Client-credentials settings
    #[serde(default)]
    pub security: SecurityConfig,

    /// Timeout settings
    #[serde(default)]
    pub timeouts: TimeoutsConfig,

    /// Prefix -> namespace IRI, emitted as `PREFIX` lines ahead of every request
    #[serde(default)]
    pub namespaces: BTreeMap<String, String>,
}

/// Broker endpoint URIs
///
/// The scheme of each URI decides whether the secure path is taken.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EndpointsConfig {
    #[serde(default)]
    pub query: Option<String>,
    #[serde(default)]
    pub update: Option<String>,
    #[serde(default)]
    pub subscribe: Option<String>,
    /// Client registration endpoint (secure path only)
    #[serde(default)]
    pub register: Option<String>,
    /// Token request endpoint (secure path only)
    #[serde(default)]
    pub token: Option<String>,
}

/// Client-credentials settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecurityConfig {
    /// Identity sent on registration
    #[serde(default = "default_client_identity")]
    pub client_identity: String,

    /// JSON file holding `client_id`, `client_secret` and `jwt` across runs
    #[serde(default)]
    pub credentials_file: Option<PathBuf>,

    /// Skip certificate verification (brokers commonly run self-signed)
    #[serde(default)]
    pub accept_invalid_certs: bool,
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            client_identity: default_client_identity(),
            credentials_file: None,
            accept_invalid_certs: false,
        }
    }
}

fn default_client_identity() -> String {
    "sepa-client".to_string()
}

/// Timeout configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimeoutsConfig {
    /// HTTP request timeout in milliseconds (default: 30s)
    #[serde(default = "default_request_timeout")]
    pub request_ms: u64,

    /// Connect timeout in milliseconds, HTTP and WebSocket (default: 10s)
    #[serde(default = "default_connect_timeout")]
    pub connect_ms: u64,

    /// Wait for subscription confirmation in milliseconds (default: 5s)
    #[serde(default = "default_handshake_timeout")]
    pub handshake_ms: u64,

    /// Wait for the unsubscribe acknowledgement before force-closing (default: 2s)
    #[serde(default = "default_unsubscribe_timeout")]
    pub unsubscribe_ms: u64,
}

impl Default for TimeoutsConfig {
    fn default() -> Self {
        Self {
            request_ms: default_request_timeout(),
            connect_ms: default_connect_timeout(),
            handshake_ms: default_handshake_timeout(),
            unsubscribe_ms: default_unsubscribe_timeout(),
        }
    }
}

fn default_request_timeout() -> u64 {
    30_000
}

fn default_connect_timeout() -> u64 {
    10_000
}

fn default_handshake_timeout() -> u64 {
    5_000
}

fn default_unsubscribe_timeout() -> u64 {
    2_000
}

impl TimeoutsConfig {
    pub fn request(&self) -> Duration {
        Duration::from_millis(self.request_ms)
    }

    pub fn connect(&self) -> Duration {
        Duration::from_millis(self.connect_ms)
    }

    pub fn handshake(&self) -> Duration {
        Duration::from_millis(self.handshake_ms)
    }

    pub fn unsubscribe(&self) -> Duration {
        Duration::from_millis(self.unsubscribe_ms)
    }
}

impl ClientConfig {
    /// Load configuration from a file, picking the format from its extension
    ///
    /// `.yaml`/`.yml`, `.toml` and `.json` are recognised.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)?;
        match path.extension().and_then(|e| e.to_str()) {
            Some("yaml") | Some("yml") => Self::from_yaml(&content),
            Some("toml") => Self::from_toml(&content),
            Some("json") => Self::from_json(&content),
            other => Err(SepaClientError::Config(format!(
                "Unknown config file extension {:?} for {}",
                other,
                path.display()
            ))),
        }
    }

    /// Parse configuration from YAML string
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        serde_yaml::from_str(yaml).map_err(|e| SepaClientError::Config(e.to_string()))
    }

    /// Parse configuration from TOML string
    pub fn from_toml(toml_str: &str) -> Result<Self> {
        toml::from_str(toml_str).map_err(|e| SepaClientError::Config(e.to_string()))
    }

    /// Parse configuration from JSON string
    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json).map_err(|e| SepaClientError::Config(e.to_string()))
    }

    /// Add a namespace prefix
    pub fn with_namespace(mut self, prefix: impl Into<String>, iri: impl Into<String>) -> Self {
        self.namespaces.insert(prefix.into(), iri.into());
        self
    }

    /// Set the handshake timeout
    pub fn with_handshake_timeout(mut self, timeout: Duration) -> Self {
        self.timeouts.handshake_ms = timeout.as_millis() as u64;
        self
    }

    /// Render the configured namespaces as SPARQL `PREFIX` lines
    pub fn prefix_block(&self) -> String {
        self.namespaces
            .iter()
            .map(|(prefix, iri)| format!("PREFIX {}: <{}>\n", prefix, iri))
            .collect()
    }
}
