//! SEPA Client Library
//!
//! Client for SEPA brokers: SPARQL queries and updates over HTTP(S), and
//! push subscriptions over WebSocket with added/removed binding deltas.
//! `https`/`wss` endpoints go through the client-credentials flow
//! (registration, then a bearer token) transparently.
//!
//! # Example
//!
//! ```rust,no_run
//! use sepa_client::{Binding, ClientConfig, ConnectionHandler, SubscriptionRequest};
//!
//! #[tokio::main]
//! async fn main() -> sepa_client::Result<()> {
//!     let handler = ConnectionHandler::new(ClientConfig::default())?;
//!
//!     handler
//!         .update(
//!             "http://localhost:8000/update",
//!             "INSERT DATA { <http://ex/a> <http://ex/b> \"c\" }",
//!         )
//!         .await?;
//!
//!     let results = handler.query_all("http://localhost:8000/query").await?;
//!     println!("{}", results);
//!
//!     let request = SubscriptionRequest::new("SELECT * WHERE { ?s ?p ?o }", "everything");
//!     let id = handler
//!         .subscribe("ws://localhost:9000/subscribe", request, |added: Vec<Binding>, removed: Vec<Binding>| {
//!             println!("added {:?}, removed {:?}", added, removed);
//!         })
//!         .await?;
//!
//!     handler.unsubscribe(&id).await?;
//!     Ok(())
//! }
//! ```
//!
//! # Blocking use
//!
//! [`BlockingConnectionHandler`] exposes the same operations to synchronous
//! callers; it owns its own runtime.
//!
//! # Testing
//!
//! The `testing` module provides an in-process mock broker:
//!
//! ```rust,ignore
//! use sepa_client::testing::MockBroker;
//!
//! let broker = MockBroker::start().await?;
//! let handler = ConnectionHandler::new(broker.config())?;
//! ```

pub mod blocking;
mod config;
mod credentials;
mod error;
mod executor;
mod handler;
pub mod notification;
mod registry;
pub mod session;
pub mod testing;
mod transport;

pub use blocking::BlockingConnectionHandler;
pub use config::{ClientConfig, EndpointsConfig, SecurityConfig, TimeoutsConfig};
pub use credentials::{basic_secret, CredentialManager, Credentials};
pub use error::{Result, SepaClientError};
pub use executor::{RawResponse, RequestExecutor, RequestKind, SPARQL_RESULTS_JSON};
pub use handler::{ConnectionHandler, CLEAR_ALL, SELECT_ALL};
pub use notification::{Binding, NotificationParser, ParsedMessage, RdfTerm, TermType};
pub use registry::{SessionRegistry, SubscriptionInfo};
pub use session::{NotificationHandler, SessionState, SubscriptionRequest};
pub use transport::{Security, Transport};
