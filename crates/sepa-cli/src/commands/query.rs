//! Query commands

use anyhow::Result;
use sepa_client::{ConnectionHandler, Security};

use crate::output::OutputContext;

/// Run a SPARQL query and print the results
pub async fn query(
    handler: &ConnectionHandler,
    uri: &str,
    sparql: &str,
    security: Option<Security>,
    ctx: &OutputContext,
) -> Result<()> {
    let results = match security {
        Some(security) => handler.query_with(uri, sparql, security).await?,
        None => handler.query(uri, sparql).await?,
    };
    ctx.print_results(&results);
    Ok(())
}

/// Print every triple
pub async fn query_all(
    handler: &ConnectionHandler,
    uri: &str,
    security: Option<Security>,
    ctx: &OutputContext,
) -> Result<()> {
    query(handler, uri, sepa_client::SELECT_ALL, security, ctx).await
}
