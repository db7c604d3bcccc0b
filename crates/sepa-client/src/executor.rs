//! Single-shot HTTP(S) POSTs against the broker
//!
//! The executor never retries and never turns a non-2xx status into an error:
//! the caller inspects the returned [`RawResponse`] and decides.

use reqwest::header::{ACCEPT, AUTHORIZATION, CONTENT_TYPE};
use reqwest::Client;
use tracing::{debug, instrument};
use url::Url;

use crate::config::ClientConfig;
use crate::error::Result;

/// Media type requested for every SPARQL request
pub const SPARQL_RESULTS_JSON: &str = "application/sparql-results+json";

/// Kind of SPARQL request, which selects the body media type
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestKind {
    Query,
    Update,
}

impl RequestKind {
    pub fn content_type(self) -> &'static str {
        match self {
            RequestKind::Query => "application/sparql-query",
            RequestKind::Update => "application/sparql-update",
        }
    }
}

/// Status code and undecoded body of a broker response
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawResponse {
    pub status: u16,
    pub body: String,
}

impl RawResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Performs the HTTP POSTs issued by the connection handler
#[derive(Debug, Clone)]
pub struct RequestExecutor {
    client: Client,
    prefixes: String,
}

impl RequestExecutor {
    /// Build an executor from the client configuration
    pub fn new(config: &ClientConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(config.timeouts.request())
            .connect_timeout(config.timeouts.connect())
            .danger_accept_invalid_certs(config.security.accept_invalid_certs)
            .build()?;

        Ok(Self {
            client,
            prefixes: config.prefix_block(),
        })
    }

    /// Prepend the configured `PREFIX` lines to a SPARQL text
    pub fn body_for(&self, sparql: &str) -> String {
        format!("{}{}", self.prefixes, sparql)
    }

    /// Send a SPARQL query or update
    ///
    /// `bearer` is the raw token; the `Bearer ` scheme is added here.
    #[instrument(skip(self, sparql, bearer), fields(uri = %uri))]
    pub async fn send(
        &self,
        uri: &Url,
        sparql: &str,
        kind: RequestKind,
        bearer: Option<&str>,
    ) -> Result<RawResponse> {
        let mut request = self
            .client
            .post(uri.clone())
            .header(CONTENT_TYPE, kind.content_type())
            .header(ACCEPT, SPARQL_RESULTS_JSON)
            .body(self.body_for(sparql));

        if let Some(token) = bearer {
            request = request.header(AUTHORIZATION, format!("Bearer {}", token));
        }

        let response = request.send().await?;
        let status = response.status().as_u16();
        let body = response.text().await?;
        debug!(status, "SPARQL {:?} answered", kind);

        Ok(RawResponse { status, body })
    }

    /// POST a JSON document (registration and token requests)
    ///
    /// `authorization` is sent verbatim as the `Authorization` header.
    #[instrument(skip(self, payload, authorization), fields(uri = %uri))]
    pub async fn post_json(
        &self,
        uri: &Url,
        payload: Option<&serde_json::Value>,
        authorization: Option<&str>,
    ) -> Result<RawResponse> {
        let mut request = self
            .client
            .post(uri.clone())
            .header(ACCEPT, "application/json");

        if let Some(payload) = payload {
            request = request.json(payload);
        } else {
            request = request.header(CONTENT_TYPE, "application/json");
        }
        if let Some(value) = authorization {
            request = request.header(AUTHORIZATION, value);
        }

        let response = request.send().await?;
        let status = response.status().as_u16();
        let body = response.text().await?;
        debug!(status, "JSON POST answered");

        Ok(RawResponse { status, body })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_content_types() {
        assert_eq!(RequestKind::Query.content_type(), "application/sparql-query");
        assert_eq!(
            RequestKind::Update.content_type(),
            "application/sparql-update"
        );
    }

    #[test]
    fn test_body_carries_prefixes() {
        let config = ClientConfig::default().with_namespace("test", "http://test#");
        let executor = RequestExecutor::new(&config).unwrap();
        assert_eq!(
            executor.body_for("SELECT * WHERE { ?s ?p ?o }"),
            "PREFIX test: <http://test#>\nSELECT * WHERE { ?s ?p ?o }"
        );
    }

    #[test]
    fn test_raw_response_success_range() {
        let ok = RawResponse {
            status: 201,
            body: String::new(),
        };
        let denied = RawResponse {
            status: 401,
            body: String::new(),
        };
        assert!(ok.is_success());
        assert!(!denied.is_success());
    }
}
