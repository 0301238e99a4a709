//! Trellis Client - Live directory graphs over one WebSocket
//!
//! Many subscribers, each watching the graph around a public key at its own
//! ranking filter, share a single connection to the graph-serving node.
//!
//! - [`ConnectionManager`] owns the socket, queues requests while offline
//!   and reconnects forever until closed.
//! - [`SubscriptionRegistry`] fans each pushed snapshot out to subscribers,
//!   filtering it per subscriber and caching the result.
//! - [`GraphClient`] ties the two together with a [`GraphCache`].
//!
//! ```no_run
//! use trellis_client::{ClientConfig, GraphClient};
//!
//! # async fn run() -> trellis_client::Result<()> {
//! let client = GraphClient::new(ClientConfig::with_url("ws://127.0.0.1:8831"));
//! let _subscription = client.subscribe("pubkey=", "main", 50, |graph| {
//!     println!("{} nodes", graph.node_count());
//! })?;
//! # Ok(())
//! # }
//! ```

pub mod client;
pub mod config;
pub mod connection;
pub mod error;
pub mod protocol;
pub mod registry;

#[cfg(test)]
mod testing;

pub use client::GraphClient;
pub use config::{ClientConfig, DEFAULT_PROTOCOL, DEFAULT_URL};
pub use connection::{ConnectionManager, ConnectionStatus, InboundHandler};
pub use error::{ClientError, Result};
pub use protocol::{ClientMessage, GraphPush, GraphRequest, ServerMessage};
pub use registry::{
    GraphCallback, Subscription, SubscriptionId, SubscriptionRegistry, MAX_RANKING_FILTER,
};
pub use trellis_graph::{GraphCache, NormalizedGraph, SubscriptionKey};
