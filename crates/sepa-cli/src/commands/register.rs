//! Register command - client-credentials setup

use anyhow::{Context, Result};
use sepa_client::ConnectionHandler;

use crate::output::OutputContext;

/// Register this client and optionally fetch a token
pub async fn register(handler: &ConnectionHandler, with_token: bool, ctx: &OutputContext) -> Result<()> {
    handler
        .register()
        .await
        .context("Registration failed")?;

    let security = &handler.config().security;
    ctx.success(&format!("Registered client '{}'", security.client_identity));
    match &security.credentials_file {
        Some(path) => ctx.info(&format!("Credentials saved to {}", path.display())),
        None => ctx.info("No credentials file configured; the secret is not kept"),
    }

    if with_token {
        handler
            .request_token()
            .await
            .context("Token request failed")?;
        ctx.success("Bearer token acquired");
    }
    Ok(())
}
