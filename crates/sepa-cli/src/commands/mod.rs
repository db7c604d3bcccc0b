//! Command implementations for sepa-cli

pub mod query;
pub mod register;
pub mod subscribe;
pub mod update;

pub use query::{query, query_all};
pub use register::register;
pub use subscribe::subscribe;
pub use update::{clear, update};

use anyhow::{bail, Context, Result};
use std::path::Path;

/// SPARQL text from the command line or a file
pub fn read_sparql(inline: Option<&str>, file: Option<&Path>) -> Result<String> {
    match (inline, file) {
        (Some(text), None) => Ok(text.to_string()),
        (None, Some(path)) => std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read SPARQL file: {}", path.display())),
        (Some(_), Some(_)) => bail!("Give the SPARQL text or --file, not both"),
        (None, None) => bail!("No SPARQL text given"),
    }
}

/// Endpoint from the merged configuration
pub fn endpoint<'a>(endpoint: &'a Option<String>, name: &str) -> Result<&'a str> {
    endpoint.as_deref().with_context(|| {
        format!(
            "No {} endpoint: pass --{}-endpoint or set it in the config file",
            name, name
        )
    })
}
