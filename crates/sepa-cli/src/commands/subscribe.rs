//! Subscribe command - live notifications until Ctrl+C

use anyhow::Result;
use sepa_client::{Binding, ConnectionHandler, Security, SubscriptionRequest};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;

use crate::output::OutputContext;

/// Subscribe and print every notification
pub async fn subscribe(
    handler: &ConnectionHandler,
    uri: &str,
    request: SubscriptionRequest,
    security: Option<Security>,
    ctx: &OutputContext,
) -> Result<()> {
    ctx.info(&format!("Subscribing '{}' at {}...", request.alias, uri));

    // The callback runs on the session task; printing happens here
    let (tx, mut rx) = mpsc::unbounded_channel::<(Vec<Binding>, Vec<Binding>)>();
    let callback = move |added: Vec<Binding>, removed: Vec<Binding>| {
        let _ = tx.send((added, removed));
    };

    let id = match security {
        Some(security) => {
            handler
                .subscribe_with(uri, request, security, callback)
                .await?
        }
        None => handler.subscribe(uri, request, callback).await?,
    };
    ctx.success(&format!("Subscribed: {}", id));
    ctx.info("Press Ctrl+C to stop");

    // Set up Ctrl+C handler
    let running = Arc::new(AtomicBool::new(true));
    let r = running.clone();
    ctrlc::set_handler(move || {
        r.store(false, Ordering::SeqCst);
    })?;

    while running.load(Ordering::SeqCst) {
        tokio::select! {
            delta = rx.recv() => {
                match delta {
                    Some((added, removed)) => ctx.print_delta(&added, &removed),
                    None => {
                        ctx.error("Subscription closed by the broker");
                        return Ok(());
                    }
                }
            }
            _ = tokio::time::sleep(tokio::time::Duration::from_millis(100)) => {}
        }
    }

    ctx.info("\nStopping subscription...");
    handler.unsubscribe(&id).await?;
    ctx.success("Unsubscribed");

    Ok(())
}
