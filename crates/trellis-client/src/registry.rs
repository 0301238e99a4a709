//! Subscription registry.
//!
//! Many subscribers share one connection. Each subscriber is a record under
//! its public key; every snapshot pushed for that key is filtered once per
//! record, cached, and handed to the record's callback.

use crate::config::ClientConfig;
use crate::connection::{ConnectionManager, InboundHandler};
use crate::error::{ClientError, Result};
use crate::protocol::{ClientMessage, GraphPush, GraphRequest};
use parking_lot::Mutex;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::{Arc, Weak};
use tracing::{debug, warn};
use trellis_core::DotGraph;
use trellis_graph::{GraphCache, NormalizedGraph, SubscriptionKey};
use uuid::Uuid;

/// Highest accepted ranking filter, in percent.
pub const MAX_RANKING_FILTER: u8 = 100;

/// Callback invoked with every filtered snapshot.
pub type GraphCallback = Arc<dyn Fn(Arc<NormalizedGraph>) + Send + Sync>;

/// Identity of one subscriber record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionId(Uuid);

impl SubscriptionId {
    fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Clone)]
struct SubscriberRecord {
    id: SubscriptionId,
    directory_id: String,
    ranking_filter: u8,
    callback: GraphCallback,
}

/// Fans snapshots out to subscribers.
pub struct SubscriptionRegistry {
    connection: ConnectionManager,
    cache: Arc<GraphCache>,
    /// Records per public key, in subscription order.
    subscribers: Mutex<BTreeMap<String, Vec<SubscriberRecord>>>,
    send_cancellations: bool,
}

impl SubscriptionRegistry {
    /// Builds a registry together with the connection that feeds it.
    pub fn with_config(config: ClientConfig, cache: Arc<GraphCache>) -> Arc<Self> {
        let send_cancellations = config.send_cancellations;
        Arc::new_cyclic(|registry: &Weak<Self>| {
            let handler: Weak<dyn InboundHandler> = registry.clone();
            Self {
                connection: ConnectionManager::new(config, handler),
                cache,
                subscribers: Mutex::new(BTreeMap::new()),
                send_cancellations,
            }
        })
    }

    pub fn connection(&self) -> &ConnectionManager {
        &self.connection
    }

    pub fn cache(&self) -> &Arc<GraphCache> {
        &self.cache
    }

    /// Subscribes to the graph around `public_key` in `directory_id`.
    ///
    /// Starts the connection if needed and requests the graph. `on_update`
    /// receives every snapshot for the key, keeping only nodes ranked at
    /// least `ranking_filter` percent (the root is always kept).
    ///
    /// The returned guard unsubscribes when dropped.
    pub fn subscribe<F>(
        self: &Arc<Self>,
        public_key: &str,
        directory_id: &str,
        ranking_filter: u8,
        on_update: F,
    ) -> Result<Subscription>
    where
        F: Fn(Arc<NormalizedGraph>) + Send + Sync + 'static,
    {
        if public_key.trim().is_empty() {
            return Err(ClientError::MissingPublicKey);
        }
        if ranking_filter > MAX_RANKING_FILTER {
            return Err(ClientError::InvalidRankingFilter(ranking_filter));
        }

        self.connection.connect()?;

        let id = SubscriptionId::new();
        let record = SubscriberRecord {
            id,
            directory_id: directory_id.to_string(),
            ranking_filter,
            callback: Arc::new(on_update),
        };
        let request = GraphRequest::new(public_key, directory_id);
        self.connection.send_after(ClientMessage::GetGraph(request), || {
            self.subscribers
                .lock()
                .entry(public_key.to_string())
                .or_default()
                .push(record);
        });
        debug!(
            "Subscribed {} to {} in {:?} at {}%",
            id, public_key, directory_id, ranking_filter
        );

        Ok(Subscription {
            registry: Arc::downgrade(self),
            id,
            key: SubscriptionKey::new(directory_id, public_key, ranking_filter),
            active: true,
        })
    }

    /// Removes one record. Returns false if it was already gone.
    fn unsubscribe(&self, public_key: &str, id: SubscriptionId) -> bool {
        let (removed, orphaned) = {
            let mut subscribers = self.subscribers.lock();
            let Some(records) = subscribers.get_mut(public_key) else {
                return false;
            };
            let Some(index) = records.iter().position(|record| record.id == id) else {
                return false;
            };

            let removed = records.remove(index);
            let orphaned = !records
                .iter()
                .any(|record| record.directory_id == removed.directory_id);
            if records.is_empty() {
                subscribers.remove(public_key);
            }
            (removed, orphaned)
        };

        debug!("Unsubscribed {} from {}", id, public_key);

        if orphaned && self.send_cancellations {
            self.connection.send(ClientMessage::CancelGraph(GraphRequest::new(
                public_key,
                removed.directory_id,
            )));
        }
        true
    }

    fn is_live(&self, public_key: &str, id: SubscriptionId) -> bool {
        self.subscribers
            .lock()
            .get(public_key)
            .is_some_and(|records| records.iter().any(|record| record.id == id))
    }

    /// Delivers a snapshot to every subscriber of its key.
    ///
    /// Returns how many callbacks ran. A push nobody is subscribed to, or
    /// whose graph text does not parse, is dropped.
    pub fn dispatch(&self, push: &GraphPush) -> usize {
        let targets: Vec<SubscriberRecord> = self
            .subscribers
            .lock()
            .get(&push.public_key)
            .cloned()
            .unwrap_or_default();

        if targets.is_empty() {
            debug!("Dropping graph for {}: no subscribers", push.public_key);
            return 0;
        }

        let graph = match DotGraph::parse(push.text()) {
            Ok(graph) => graph,
            Err(e) => {
                warn!("Dropping malformed graph for {}: {}", push.public_key, e);
                return 0;
            }
        };

        let mut delivered = 0;
        for target in targets {
            let parsed = graph.filter(&push.public_key, target.ranking_filter);
            let key = SubscriptionKey::new(
                target.directory_id.as_str(),
                push.public_key.as_str(),
                target.ranking_filter,
            );
            let normalized = self.cache.put(key, parsed.into_raw(push.public_key.clone()));

            // An earlier callback may have unsubscribed this one.
            if !self.is_live(&push.public_key, target.id) {
                continue;
            }
            (target.callback)(normalized);
            delivered += 1;
        }

        debug!(
            "Delivered graph for {} to {} subscribers",
            push.public_key, delivered
        );
        delivered
    }

    /// Public keys with at least one subscriber, in order.
    pub fn public_keys(&self) -> Vec<String> {
        self.subscribers.lock().keys().cloned().collect()
    }

    /// Number of subscribers under a public key.
    pub fn subscriber_count(&self, public_key: &str) -> usize {
        self.subscribers
            .lock()
            .get(public_key)
            .map_or(0, |records| records.len())
    }

    /// Distinct cache keys currently subscribed to, in order.
    pub fn subscription_keys(&self) -> Vec<SubscriptionKey> {
        let subscribers = self.subscribers.lock();
        let keys: BTreeSet<SubscriptionKey> = subscribers
            .iter()
            .flat_map(|(public_key, records)| {
                records.iter().map(move |record| {
                    SubscriptionKey::new(
                        record.directory_id.as_str(),
                        public_key.as_str(),
                        record.ranking_filter,
                    )
                })
            })
            .collect();
        keys.into_iter().collect()
    }

    /// Total number of subscriber records.
    pub fn len(&self) -> usize {
        self.subscribers.lock().values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.subscribers.lock().is_empty()
    }
}

impl InboundHandler for SubscriptionRegistry {
    fn on_graph(&self, push: GraphPush) {
        self.dispatch(&push);
    }

    fn replay_requests(&self) -> Vec<GraphRequest> {
        let subscribers = self.subscribers.lock();
        let requests: BTreeSet<GraphRequest> = subscribers
            .iter()
            .flat_map(|(public_key, records)| {
                records.iter().map(move |record| {
                    GraphRequest::new(public_key.as_str(), record.directory_id.as_str())
                })
            })
            .collect();
        requests.into_iter().collect()
    }
}

/// Handle to one subscription. Dropping it unsubscribes.
#[must_use = "dropping a Subscription unsubscribes it"]
pub struct Subscription {
    registry: Weak<SubscriptionRegistry>,
    id: SubscriptionId,
    key: SubscriptionKey,
    active: bool,
}

impl Subscription {
    pub fn id(&self) -> SubscriptionId {
        self.id
    }

    /// Cache key the subscriber's snapshots are stored under.
    pub fn key(&self) -> &SubscriptionKey {
        &self.key
    }

    /// Detaches the callback. Pushes arriving later are not delivered to it.
    pub fn unsubscribe(mut self) {
        self.release();
    }

    fn release(&mut self) {
        if !std::mem::take(&mut self.active) {
            return;
        }
        if let Some(registry) = self.registry.upgrade() {
            registry.unsubscribe(&self.key.public_key, self.id);
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.release();
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("id", &self.id)
            .field("key", &self.key)
            .field("active", &self.active)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::ConnectionStatus;

    const SNAPSHOT: &str = r#"digraph {
        0 [pubkey="root", ranking="0.10"];
        1 [pubkey="a", ranking="0.40"];
        2 [pubkey="b", ranking="0.60"];
        3 [pubkey="c", ranking="0.80"];
        0 -> 1 [weight="1"];
        0 -> 2 [weight="2"];
        2 -> 3 [weight="3"];
    }"#;

    fn offline(send_cancellations: bool) -> Arc<SubscriptionRegistry> {
        let config = ClientConfig {
            reconnect_delay_ms: 60_000,
            send_cancellations,
            ..ClientConfig::with_url("ws://127.0.0.1:9")
        };
        SubscriptionRegistry::with_config(config, Arc::new(GraphCache::default()))
    }

    /// Callback that records every snapshot it receives.
    fn collector() -> (
        Arc<Mutex<Vec<Arc<NormalizedGraph>>>>,
        impl Fn(Arc<NormalizedGraph>) + Send + Sync + 'static,
    ) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        (seen, move |graph: Arc<NormalizedGraph>| sink.lock().push(graph))
    }

    fn sorted_ids(graph: &NormalizedGraph) -> Vec<i64> {
        let mut ids: Vec<i64> = graph.node_ids().collect();
        ids.sort();
        ids
    }

    #[test]
    fn test_preconditions_fail_before_connecting() {
        let registry = offline(false);

        let err = registry.subscribe("", "dir", 50, |_| {}).unwrap_err();
        assert!(matches!(err, ClientError::MissingPublicKey));

        let err = registry.subscribe("  ", "dir", 50, |_| {}).unwrap_err();
        assert!(matches!(err, ClientError::MissingPublicKey));

        let err = registry.subscribe("root", "dir", 101, |_| {}).unwrap_err();
        assert!(matches!(err, ClientError::InvalidRankingFilter(101)));

        assert_eq!(registry.connection().status(), ConnectionStatus::Idle);
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn test_subscribers_filter_independently() {
        let registry = offline(false);
        let (low, on_low) = collector();
        let (high, on_high) = collector();

        let _a = registry.subscribe("root", "dir", 30, on_low).unwrap();
        let _b = registry.subscribe("root", "dir", 70, on_high).unwrap();

        let delivered = registry.dispatch(&GraphPush::new("root", SNAPSHOT));
        assert_eq!(delivered, 2);

        let low = low.lock();
        assert_eq!(low.len(), 1);
        assert_eq!(sorted_ids(&low[0]), vec![0, 1, 2, 3]);
        assert_eq!(low[0].link_count(), 3);

        let high = high.lock();
        assert_eq!(high.len(), 1);
        assert_eq!(sorted_ids(&high[0]), vec![0, 3]);
        assert_eq!(high[0].link_count(), 0);

        registry.connection().close();
    }

    #[tokio::test]
    async fn test_unsubscribed_handler_is_not_called() {
        let registry = offline(false);
        let (seen, on_update) = collector();

        let subscription = registry.subscribe("root", "dir", 50, on_update).unwrap();
        subscription.unsubscribe();

        assert_eq!(registry.subscriber_count("root"), 0);
        assert!(registry.public_keys().is_empty());
        assert_eq!(registry.dispatch(&GraphPush::new("root", SNAPSHOT)), 0);
        assert!(seen.lock().is_empty());

        registry.connection().close();
    }

    #[tokio::test]
    async fn test_dropping_subscription_unsubscribes() {
        let registry = offline(false);
        {
            let _subscription = registry.subscribe("root", "dir", 50, |_| {}).unwrap();
            assert_eq!(registry.subscriber_count("root"), 1);
        }
        assert_eq!(registry.subscriber_count("root"), 0);
        registry.connection().close();
    }

    #[tokio::test]
    async fn test_orphan_push_is_dropped() {
        let registry = offline(false);
        let (seen, on_update) = collector();
        let _sub = registry.subscribe("root", "dir", 50, on_update).unwrap();

        assert_eq!(registry.dispatch(&GraphPush::new("someone-else", SNAPSHOT)), 0);
        assert!(seen.lock().is_empty());
        assert!(registry.cache().is_empty());

        registry.connection().close();
    }

    #[tokio::test]
    async fn test_dispatch_populates_cache() {
        let registry = offline(false);
        let sub = registry.subscribe("root", "dir", 50, |_| {}).unwrap();

        registry.dispatch(&GraphPush::new("root", SNAPSHOT));

        let cached = registry.cache().get(sub.key()).unwrap();
        assert_eq!(sorted_ids(&cached), vec![0, 2, 3]);
        assert_eq!(cached.public_key(), "root");
        assert!(registry.cache().lookup("dir", "root", 70).is_none());

        registry.connection().close();
    }

    #[tokio::test]
    async fn test_malformed_push_keeps_cached_snapshot() {
        let registry = offline(false);
        let (seen, on_update) = collector();
        let sub = registry.subscribe("root", "dir", 50, on_update).unwrap();

        registry.dispatch(&GraphPush::new("root", SNAPSHOT));
        assert_eq!(registry.dispatch(&GraphPush::new("root", "digraph { 0 -> ")), 0);

        assert_eq!(seen.lock().len(), 1);
        assert_eq!(registry.cache().get(sub.key()).unwrap().node_count(), 3);

        registry.connection().close();
    }

    #[tokio::test]
    async fn test_empty_push_delivers_empty_graph() {
        let registry = offline(false);
        let (seen, on_update) = collector();
        let _sub = registry.subscribe("root", "dir", 50, on_update).unwrap();

        let push = GraphPush {
            public_key: "root".to_string(),
            graph: None,
        };
        assert_eq!(registry.dispatch(&push), 1);
        assert_eq!(seen.lock()[0].node_count(), 0);

        registry.connection().close();
    }

    #[tokio::test]
    async fn test_callback_may_unsubscribe_a_sibling() {
        let registry = offline(false);
        let (seen, on_second) = collector();
        let slot: Arc<Mutex<Option<Subscription>>> = Arc::new(Mutex::new(None));

        let victim = slot.clone();
        let _first = registry
            .subscribe("root", "dir", 30, move |_| {
                victim.lock().take();
            })
            .unwrap();
        let second = registry.subscribe("root", "dir", 70, on_second).unwrap();
        *slot.lock() = Some(second);

        assert_eq!(registry.dispatch(&GraphPush::new("root", SNAPSHOT)), 1);
        assert!(seen.lock().is_empty());

        registry.connection().close();
    }

    #[tokio::test]
    async fn test_introspection() {
        let registry = offline(false);
        let _a = registry.subscribe("root", "dir", 30, |_| {}).unwrap();
        let _b = registry.subscribe("root", "dir", 30, |_| {}).unwrap();
        let _c = registry.subscribe("root", "other", 70, |_| {}).unwrap();
        let _d = registry.subscribe("alpha", "dir", 0, |_| {}).unwrap();

        assert_eq!(registry.public_keys(), vec!["alpha", "root"]);
        assert_eq!(registry.subscriber_count("root"), 3);
        assert_eq!(registry.len(), 4);
        assert_eq!(
            registry.subscription_keys(),
            vec![
                SubscriptionKey::new("dir", "alpha", 0),
                SubscriptionKey::new("dir", "root", 30),
                SubscriptionKey::new("other", "root", 70),
            ]
        );
        assert_eq!(
            registry.replay_requests(),
            vec![
                GraphRequest::new("alpha", "dir"),
                GraphRequest::new("root", "dir"),
                GraphRequest::new("root", "other"),
            ]
        );

        registry.connection().close();
    }

    #[tokio::test]
    async fn test_requests_collapse_while_offline() {
        let registry = offline(false);
        let _a = registry.subscribe("root", "dir", 30, |_| {}).unwrap();
        let _b = registry.subscribe("root", "dir", 70, |_| {}).unwrap();
        let _c = registry.subscribe("root", "other", 70, |_| {}).unwrap();

        assert_eq!(registry.connection().pending_len(), 2);
        registry.connection().close();
    }

    #[tokio::test]
    async fn test_subscription_visible_to_replay_and_queued_once() {
        let registry = offline(false);
        let _a = registry.subscribe("root", "dir", 30, |_| {}).unwrap();

        assert_eq!(registry.connection().pending_len(), 1);
        assert_eq!(
            registry.replay_requests(),
            vec![GraphRequest::new("root", "dir")]
        );
        registry.connection().close();
    }

    #[tokio::test]
    async fn test_unsubscribe_keeps_request_without_cancellations() {
        let registry = offline(false);
        registry.subscribe("root", "dir", 30, |_| {}).unwrap().unsubscribe();

        assert_eq!(registry.connection().pending_len(), 1);
        registry.connection().close();
    }

    #[tokio::test]
    async fn test_last_unsubscribe_cancels_request() {
        let registry = offline(true);
        let a = registry.subscribe("root", "dir", 30, |_| {}).unwrap();
        let b = registry.subscribe("root", "dir", 70, |_| {}).unwrap();

        a.unsubscribe();
        assert_eq!(registry.connection().pending_len(), 1);
        b.unsubscribe();
        assert_eq!(registry.connection().pending_len(), 0);

        registry.connection().close();
    }
}
