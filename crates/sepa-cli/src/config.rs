//! Configuration file handling for sepa-cli
//!
//! ```toml
//! output = "json"
//!
//! [endpoints]
//! query = "http://localhost:8000/query"
//! update = "http://localhost:8000/update"
//! subscribe = "ws://localhost:9000/subscribe"
//!
//! [security]
//! client_identity = "sepa-cli"
//! credentials_file = "/home/me/.config/sepa-cli/client.json"
//!
//! [namespaces]
//! ex = "http://example.org/"
//! ```

use anyhow::{Context, Result};
use sepa_client::ClientConfig;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Configuration for the CLI tool
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    /// Broker endpoints, security, timeouts and namespaces
    #[serde(flatten)]
    pub client: ClientConfig,
    /// Default output format
    pub output: Option<String>,
    /// Disable colored output
    pub no_color: Option<bool>,
}

/// Endpoint overrides given on the command line
#[derive(Debug, Clone, Default)]
pub struct EndpointArgs {
    pub query: Option<String>,
    pub update: Option<String>,
    pub subscribe: Option<String>,
    pub register: Option<String>,
    pub token: Option<String>,
}

impl Config {
    /// Load configuration from the default config file
    pub fn load() -> Result<Self> {
        let config_path = Self::config_path()?;
        if config_path.exists() {
            Self::load_from(&config_path)
        } else {
            Ok(Self::default())
        }
    }

    /// Load configuration from a specific path
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))
    }

    /// Get the default config file path
    pub fn config_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .context("Could not determine config directory")?
            .join("sepa-cli");

        Ok(config_dir.join("config.toml"))
    }

    /// Merge CLI arguments over config file values
    pub fn merge_with_args(
        &self,
        endpoints: &EndpointArgs,
        output: Option<&str>,
        no_color: bool,
        insecure_tls: bool,
    ) -> MergedConfig {
        let mut client = self.client.clone();
        let overrides = [
            (&endpoints.query, &mut client.endpoints.query),
            (&endpoints.update, &mut client.endpoints.update),
            (&endpoints.subscribe, &mut client.endpoints.subscribe),
            (&endpoints.register, &mut client.endpoints.register),
            (&endpoints.token, &mut client.endpoints.token),
        ];
        for (arg, slot) in overrides {
            if arg.is_some() {
                *slot = arg.clone();
            }
        }
        client.security.accept_invalid_certs |= insecure_tls;

        MergedConfig {
            client,
            output: output
                .map(String::from)
                .or_else(|| self.output.clone())
                .unwrap_or_else(|| "json".to_string()),
            no_color: no_color || self.no_color.unwrap_or(false),
        }
    }
}

/// Fully resolved configuration after merging CLI args
#[derive(Debug, Clone)]
pub struct MergedConfig {
    pub client: ClientConfig,
    pub output: String,
    pub no_color: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_config_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(
            &path,
            r#"
output = "csv"

[endpoints]
query = "http://broker:8000/query"
subscribe = "wss://broker:9443/secure/subscribe"

[security]
client_identity = "tester"
accept_invalid_certs = true

[namespaces]
ex = "http://example.org/"
"#,
        )
        .unwrap();

        let config = Config::load_from(&path).unwrap();
        assert_eq!(config.output.as_deref(), Some("csv"));
        assert_eq!(
            config.client.endpoints.query.as_deref(),
            Some("http://broker:8000/query")
        );
        assert_eq!(config.client.security.client_identity, "tester");
        assert!(config.client.security.accept_invalid_certs);
        assert_eq!(
            config.client.prefix_block(),
            "PREFIX ex: <http://example.org/>\n"
        );
    }

    #[test]
    fn test_args_override_file() {
        let mut config = Config::default();
        config.client.endpoints.query = Some("http://file/query".into());
        config.client.endpoints.update = Some("http://file/update".into());
        config.output = Some("csv".into());

        let args = EndpointArgs {
            query: Some("http://arg/query".into()),
            ..Default::default()
        };
        let merged = config.merge_with_args(&args, None, false, true);

        assert_eq!(
            merged.client.endpoints.query.as_deref(),
            Some("http://arg/query")
        );
        assert_eq!(
            merged.client.endpoints.update.as_deref(),
            Some("http://file/update")
        );
        assert_eq!(merged.output, "csv");
        assert!(merged.client.security.accept_invalid_certs);
        assert!(!merged.no_color);
    }
}
