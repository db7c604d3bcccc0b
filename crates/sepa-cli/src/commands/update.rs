//! Update commands

use anyhow::Result;
use sepa_client::{ConnectionHandler, Security};

use crate::output::OutputContext;

/// Run a SPARQL update
pub async fn update(
    handler: &ConnectionHandler,
    uri: &str,
    sparql: &str,
    security: Option<Security>,
    ctx: &OutputContext,
) -> Result<()> {
    let body = match security {
        Some(security) => handler.update_with(uri, sparql, security).await?,
        None => handler.update(uri, sparql).await?,
    };
    ctx.success("Update applied");
    if !ctx.quiet && !body.trim().is_empty() {
        println!("{}", body);
    }
    Ok(())
}

/// Remove every triple
pub async fn clear(
    handler: &ConnectionHandler,
    uri: &str,
    security: Option<Security>,
    ctx: &OutputContext,
) -> Result<()> {
    update(handler, uri, sepa_client::CLEAR_ALL, security, ctx).await
}
