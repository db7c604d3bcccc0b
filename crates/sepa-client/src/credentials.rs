//! Client-credentials security flow
//!
//! A client registers once (obtaining an id/secret pair, stored as a Basic
//! authorization value) and then exchanges that secret for a bearer token.
//! Tokens carry no client-side expiry: a 401 on a protected request is the
//! only expiry signal, after which [`CredentialManager::invalidate_token`]
//! clears the token and the caller requests a new one.

use std::path::{Path, PathBuf};

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{debug, info, instrument, warn};
use url::Url;

use crate::error::{Result, SepaClientError};
use crate::executor::RequestExecutor;

/// Client identity and the secrets obtained for it
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credentials {
    /// Identity presented on registration
    pub client_id: String,

    /// `Basic <base64(id:secret)>` value, present once registered
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_secret: Option<String>,

    /// Bearer token, present once requested
    #[serde(default, rename = "jwt", skip_serializing_if = "Option::is_none")]
    pub bearer_token: Option<String>,
}

impl Credentials {
    pub fn new(client_id: impl Into<String>) -> Self {
        Self {
            client_id: client_id.into(),
            client_secret: None,
            bearer_token: None,
        }
    }

    /// Read credentials from a JSON file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())?;
        serde_json::from_str(&content).map_err(|e| {
            SepaClientError::Config(format!(
                "Invalid credentials file {}: {}",
                path.as_ref().display(),
                e
            ))
        })
    }

    /// Write credentials to a JSON file
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }
}

/// Encode a returned id/secret pair as a Basic authorization value
pub fn basic_secret(client_id: &str, client_secret: &str) -> String {
    format!(
        "Basic {}",
        STANDARD.encode(format!("{}:{}", client_id, client_secret))
    )
}

/// Drives registration and token acquisition for one connection handler
#[derive(Debug)]
pub struct CredentialManager {
    credentials: Mutex<Credentials>,
    store: Option<PathBuf>,
}

impl CredentialManager {
    pub fn new(credentials: Credentials) -> Self {
        Self {
            credentials: Mutex::new(credentials),
            store: None,
        }
    }

    /// Back the credentials with a JSON file
    ///
    /// Existing content is loaded; a missing file starts from `client_id` and
    /// is created after the first successful registration.
    pub fn with_store(client_id: &str, path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let credentials = if path.exists() {
            let mut stored = Credentials::load(&path)?;
            if stored.client_id.is_empty() {
                stored.client_id = client_id.to_string();
            }
            stored
        } else {
            Credentials::new(client_id)
        };

        Ok(Self {
            credentials: Mutex::new(credentials),
            store: Some(path),
        })
    }

    /// Snapshot of the current credentials
    pub fn credentials(&self) -> Credentials {
        self.credentials.lock().clone()
    }

    pub fn has_secret(&self) -> bool {
        self.credentials.lock().client_secret.is_some()
    }

    pub fn token(&self) -> Option<String> {
        self.credentials.lock().bearer_token.clone()
    }

    /// Drop the bearer token after the broker rejected it
    pub fn invalidate_token(&self) {
        if self.credentials.lock().bearer_token.take().is_some() {
            debug!("Bearer token invalidated");
        }
    }

    /// Register this client with the broker
    ///
    /// Registering a client that already holds a secret is refused locally.
    #[instrument(skip(self, executor), fields(uri = %register_uri))]
    pub async fn register(&self, executor: &RequestExecutor, register_uri: &Url) -> Result<()> {
        let client_id = {
            let credentials = self.credentials.lock();
            if credentials.client_secret.is_some() {
                return Err(SepaClientError::RegistrationFailed(format!(
                    "client '{}' is already registered",
                    credentials.client_id
                )));
            }
            credentials.client_id.clone()
        };

        let payload = json!({
            "register": {
                "client_identity": client_id,
                "grant_types": ["client_credentials"],
            }
        });

        let response = executor.post_json(register_uri, Some(&payload), None).await?;
        if response.status != 201 {
            warn!(status = response.status, "Registration refused");
            return Err(SepaClientError::RegistrationFailed(format!(
                "status {}: {}",
                response.status, response.body
            )));
        }

        let document: Value = serde_json::from_str(&response.body).map_err(|e| {
            SepaClientError::RegistrationFailed(format!("unreadable response: {}", e))
        })?;
        let returned = document.get("credentials").unwrap_or(&document);
        let (id, secret) = match (
            returned.get("client_id").and_then(Value::as_str),
            returned.get("client_secret").and_then(Value::as_str),
        ) {
            (Some(id), Some(secret)) => (id, secret),
            _ => {
                return Err(SepaClientError::RegistrationFailed(
                    "response lacks client_id/client_secret".to_string(),
                ))
            }
        };

        let snapshot = {
            let mut credentials = self.credentials.lock();
            credentials.client_secret = Some(basic_secret(id, secret));
            credentials.clone()
        };
        info!(client_id = %snapshot.client_id, "Client registered");

        if let Some(path) = &self.store {
            snapshot.save(path)?;
        }
        Ok(())
    }

    /// Exchange the client secret for a bearer token
    #[instrument(skip(self, executor), fields(uri = %token_uri))]
    pub async fn request_token(&self, executor: &RequestExecutor, token_uri: &Url) -> Result<()> {
        let secret = self.credentials.lock().client_secret.clone().ok_or_else(|| {
            SepaClientError::TokenRequestFailed("client is not registered".to_string())
        })?;

        let response = executor.post_json(token_uri, None, Some(&secret)).await?;
        if response.status != 201 {
            warn!(status = response.status, "Token request refused");
            return Err(SepaClientError::TokenRequestFailed(format!(
                "status {}: {}",
                response.status, response.body
            )));
        }

        let document: Value = serde_json::from_str(&response.body).map_err(|e| {
            SepaClientError::TokenRequestFailed(format!("unreadable response: {}", e))
        })?;
        let token = document
            .get("token")
            .unwrap_or(&document)
            .get("access_token")
            .and_then(Value::as_str)
            .ok_or_else(|| {
                SepaClientError::TokenRequestFailed("response lacks access_token".to_string())
            })?;

        self.credentials.lock().bearer_token = Some(token.to_string());
        debug!("Bearer token acquired");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_basic_secret_encoding() {
        // base64("alice:s3cret")
        assert_eq!(basic_secret("alice", "s3cret"), "Basic YWxpY2U6czNjcmV0");
    }

    #[test]
    fn test_invalidate_keeps_secret() {
        let manager = CredentialManager::new(Credentials {
            client_id: "kp".into(),
            client_secret: Some("Basic abc".into()),
            bearer_token: Some("jwt".into()),
        });

        manager.invalidate_token();
        manager.invalidate_token();

        assert!(manager.token().is_none());
        assert!(manager.has_secret());
    }

    #[test]
    fn test_credentials_file_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("client.jpar");

        let credentials = Credentials {
            client_id: "kp".into(),
            client_secret: Some("Basic abc".into()),
            bearer_token: None,
        };
        credentials.save(&path).unwrap();

        let raw = std::fs::read_to_string(&path).unwrap();
        assert!(!raw.contains("jwt"));

        let manager = CredentialManager::with_store("other", &path).unwrap();
        assert_eq!(manager.credentials(), credentials);
    }

    #[test]
    fn test_missing_store_starts_unregistered() {
        let dir = tempfile::tempdir().unwrap();
        let manager = CredentialManager::with_store("kp", dir.path().join("absent.json")).unwrap();
        assert_eq!(manager.credentials(), Credentials::new("kp"));
    }

    #[tokio::test]
    async fn test_second_registration_is_refused_locally() {
        let manager = CredentialManager::new(Credentials {
            client_id: "kp".into(),
            client_secret: Some("Basic abc".into()),
            bearer_token: None,
        });
        let executor = RequestExecutor::new(&Default::default()).unwrap();
        // Nothing listens here; the guard must fire before any request is made.
        let uri = Url::parse("https://127.0.0.1:1/oauth/register").unwrap();

        let err = manager.register(&executor, &uri).await.unwrap_err();
        assert!(matches!(err, SepaClientError::RegistrationFailed(_)));
    }

    #[tokio::test]
    async fn test_token_request_requires_registration() {
        let manager = CredentialManager::new(Credentials::new("kp"));
        let executor = RequestExecutor::new(&Default::default()).unwrap();
        let uri = Url::parse("https://127.0.0.1:1/oauth/token").unwrap();

        let err = manager.request_token(&executor, &uri).await.unwrap_err();
        assert!(matches!(err, SepaClientError::TokenRequestFailed(_)));
    }
}
