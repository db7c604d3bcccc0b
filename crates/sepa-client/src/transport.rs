//! Security selection and WebSocket transport variants

use std::time::Duration;

use tokio::net::TcpStream;
use tokio_tungstenite::{
    connect_async_tls_with_config, Connector, MaybeTlsStream, WebSocketStream,
};
use tracing::debug;
use url::Url;

use crate::error::{Result, SepaClientError};

/// WebSocket stream as produced by both transport variants
pub type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Whether an operation runs through the client-credentials flow
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Security {
    Insecure,
    Secure,
}

impl Security {
    /// Derive the security level from a URI scheme
    ///
    /// `https`/`wss` are secure, `http`/`ws` are not; anything else is refused.
    pub fn from_url(url: &Url) -> Result<Self> {
        match url.scheme() {
            "http" | "ws" => Ok(Security::Insecure),
            "https" | "wss" => Ok(Security::Secure),
            other => Err(SepaClientError::UnsupportedScheme(other.to_string())),
        }
    }

    pub fn is_secure(self) -> bool {
        self == Security::Secure
    }
}

/// WebSocket transport variant, picked from the subscribe URI scheme
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transport {
    /// Plain `ws://`
    Plain,
    /// TLS-wrapped `wss://`
    Tls { accept_invalid_certs: bool },
}

impl Transport {
    pub fn for_url(url: &Url, accept_invalid_certs: bool) -> Result<Self> {
        match url.scheme() {
            "ws" => Ok(Transport::Plain),
            "wss" => Ok(Transport::Tls {
                accept_invalid_certs,
            }),
            other => Err(SepaClientError::UnsupportedScheme(format!(
                "{} (subscriptions need ws:// or wss://)",
                other
            ))),
        }
    }

    /// Open the connection and complete the WebSocket upgrade
    pub async fn connect(&self, url: &Url, connect_timeout: Duration) -> Result<WsStream> {
        let connector = match *self {
            Transport::Plain => None,
            Transport::Tls {
                accept_invalid_certs,
            } => {
                let tls = native_tls::TlsConnector::builder()
                    .danger_accept_invalid_certs(accept_invalid_certs)
                    .danger_accept_invalid_hostnames(accept_invalid_certs)
                    .build()
                    .map_err(|e| SepaClientError::WebSocket(format!("TLS setup failed: {}", e)))?;
                Some(Connector::NativeTls(tls))
            }
        };

        debug!("Connecting {:?} transport to {}", self, url);
        let connect = connect_async_tls_with_config(url.as_str(), None, false, connector);
        let (stream, response) = tokio::time::timeout(connect_timeout, connect)
            .await
            .map_err(|_| {
                SepaClientError::WebSocket(format!(
                    "Connection to {} timed out after {:?}",
                    url, connect_timeout
                ))
            })??;
        debug!(status = %response.status(), "WebSocket upgrade complete");

        Ok(stream)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn url(s: &str) -> Url {
        Url::parse(s).unwrap()
    }

    #[test]
    fn test_security_from_scheme() {
        assert_eq!(
            Security::from_url(&url("http://localhost:8000/query")).unwrap(),
            Security::Insecure
        );
        assert_eq!(
            Security::from_url(&url("ws://localhost:9000/subscribe")).unwrap(),
            Security::Insecure
        );
        assert_eq!(
            Security::from_url(&url("https://localhost:8443/secure/query")).unwrap(),
            Security::Secure
        );
        assert_eq!(
            Security::from_url(&url("wss://localhost:9443/secure/subscribe")).unwrap(),
            Security::Secure
        );
        assert!(matches!(
            Security::from_url(&url("ftp://localhost/x")),
            Err(SepaClientError::UnsupportedScheme(_))
        ));
    }

    #[test]
    fn test_transport_from_scheme() {
        assert_eq!(
            Transport::for_url(&url("ws://localhost:9000/subscribe"), true).unwrap(),
            Transport::Plain
        );
        assert_eq!(
            Transport::for_url(&url("wss://localhost:9443/subscribe"), true).unwrap(),
            Transport::Tls {
                accept_invalid_certs: true
            }
        );
        assert!(Transport::for_url(&url("http://localhost:8000/query"), false).is_err());
    }
}
