//! Thread-blocking facade for callers without an async runtime
//!
//! [`BlockingConnectionHandler`] owns a multi-thread tokio runtime. Each call
//! blocks the calling thread until the operation completes; subscription
//! receive loops keep running on the runtime's worker threads, so
//! notification handlers are invoked from those threads after `subscribe`
//! has returned.
//!
//! Must not be used from within an async context.

use serde_json::Value;
use tokio::runtime::{Builder, Runtime};

use crate::config::ClientConfig;
use crate::error::Result;
use crate::handler::ConnectionHandler;
use crate::registry::SubscriptionInfo;
use crate::session::{NotificationHandler, SubscriptionRequest};
use crate::transport::Security;

/// Blocking wrapper around [`ConnectionHandler`]
#[derive(Debug)]
pub struct BlockingConnectionHandler {
    inner: ConnectionHandler,
    runtime: Runtime,
}

impl BlockingConnectionHandler {
    pub fn new(config: ClientConfig) -> Result<Self> {
        Self::from_handler(ConnectionHandler::new(config)?)
    }

    /// Wrap an existing handler
    pub fn from_handler(inner: ConnectionHandler) -> Result<Self> {
        let runtime = Builder::new_multi_thread()
            .thread_name("sepa-client")
            .enable_all()
            .build()?;
        Ok(Self { inner, runtime })
    }

    /// The wrapped async handler
    pub fn handler(&self) -> &ConnectionHandler {
        &self.inner
    }

    pub fn register(&self) -> Result<()> {
        self.runtime.block_on(self.inner.register())
    }

    pub fn request_token(&self) -> Result<()> {
        self.runtime.block_on(self.inner.request_token())
    }

    pub fn query(&self, uri: &str, sparql: &str) -> Result<Value> {
        self.runtime.block_on(self.inner.query(uri, sparql))
    }

    pub fn query_with(&self, uri: &str, sparql: &str, security: Security) -> Result<Value> {
        self.runtime
            .block_on(self.inner.query_with(uri, sparql, security))
    }

    pub fn update(&self, uri: &str, sparql: &str) -> Result<String> {
        self.runtime.block_on(self.inner.update(uri, sparql))
    }

    pub fn update_with(&self, uri: &str, sparql: &str, security: Security) -> Result<String> {
        self.runtime
            .block_on(self.inner.update_with(uri, sparql, security))
    }

    pub fn clear(&self, uri: &str) -> Result<String> {
        self.runtime.block_on(self.inner.clear(uri))
    }

    pub fn query_all(&self, uri: &str) -> Result<Value> {
        self.runtime.block_on(self.inner.query_all(uri))
    }

    /// Open a subscription and block until the broker confirms it
    pub fn subscribe<H>(&self, uri: &str, request: SubscriptionRequest, handler: H) -> Result<String>
    where
        H: NotificationHandler,
    {
        self.runtime
            .block_on(self.inner.subscribe(uri, request, handler))
    }

    pub fn subscribe_with<H>(
        &self,
        uri: &str,
        request: SubscriptionRequest,
        security: Security,
        handler: H,
    ) -> Result<String>
    where
        H: NotificationHandler,
    {
        self.runtime
            .block_on(self.inner.subscribe_with(uri, request, security, handler))
    }

    pub fn unsubscribe(&self, subscription_id: &str) -> Result<()> {
        self.runtime.block_on(self.inner.unsubscribe(subscription_id))
    }

    pub fn subscriptions(&self) -> Vec<String> {
        self.inner.subscriptions()
    }

    pub fn subscription(&self, subscription_id: &str) -> Option<SubscriptionInfo> {
        self.inner.subscription(subscription_id)
    }

    pub fn close_all(&self) -> Result<()> {
        self.runtime.block_on(self.inner.close_all())
    }
}

impl Drop for BlockingConnectionHandler {
    fn drop(&mut self) {
        // Receive loops die with the runtime; unsubscribe while they still run
        if !self.inner.subscriptions().is_empty() {
            let _ = self.runtime.block_on(self.inner.close_all());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_blocking_unsubscribe_unknown() {
        let handler = BlockingConnectionHandler::new(ClientConfig::default()).unwrap();
        handler.unsubscribe("missing").unwrap();
        assert!(handler.subscriptions().is_empty());
        assert!(handler.subscription("missing").is_none());
    }
}
