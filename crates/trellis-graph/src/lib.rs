//! Trellis Graph - normalized snapshots and the snapshot cache
//!
//! Every snapshot pushed for a subscription is normalized into a
//! [`NormalizedGraph`]: the raw nodes and links plus indexes for O(1)
//! neighbor lookups. The [`GraphCache`] keeps the latest one per
//! [`SubscriptionKey`] so consumers can render immediately on resubscription.
//!
//! # Architecture
//!
//! Indexes kept per snapshot:
//! - Node id lookups
//! - Public key lookups (first node wins on collision)
//! - Outgoing and incoming adjacency, in snapshot order
//!
//! # Example
//!
//! ```
//! use trellis_core::{Link, Node, RawGraph};
//! use trellis_graph::{GraphCache, SubscriptionKey};
//!
//! let cache = GraphCache::new(16);
//! let raw = RawGraph::new(
//!     "me",
//!     vec![Node::new(0, "me").with_ranking(0.2), Node::new(1, "peer").with_ranking(0.8)],
//!     vec![Link::new(0, 1).with_value(1.0)],
//! );
//!
//! let key = SubscriptionKey::new("main", "me", 50);
//! let graph = cache.put(key.clone(), raw);
//! assert_eq!(graph.outgoing(0).len(), 1);
//! assert!(cache.get(&key).is_some());
//! ```

mod cache;
mod entry;
mod normalized;

pub use cache::{GraphCache, SubscriptionKey, DEFAULT_CACHE_CAPACITY};
pub use entry::{DirectoryEntry, PathRow};
pub use normalized::{normalize, GraphStats, NormalizedGraph};
