use crate::config::ClientConfig;
use crate::connection::ConnectionManager;
use crate::error::Result;
use crate::registry::{Subscription, SubscriptionRegistry};
use std::sync::Arc;
use tokio::sync::mpsc;
use trellis_graph::{GraphCache, NormalizedGraph};

/// Entry point for consumers: one connection, one registry, one cache.
///
/// Closes the connection when dropped.
pub struct GraphClient {
    registry: Arc<SubscriptionRegistry>,
}

impl GraphClient {
    pub fn new(config: ClientConfig) -> Self {
        let cache = Arc::new(GraphCache::new(config.cache_capacity));
        Self {
            registry: SubscriptionRegistry::with_config(config, cache),
        }
    }

    /// Subscribes a callback to the graph around `public_key`.
    ///
    /// See [`SubscriptionRegistry::subscribe`].
    pub fn subscribe<F>(
        &self,
        public_key: &str,
        directory_id: &str,
        ranking_filter: u8,
        on_update: F,
    ) -> Result<Subscription>
    where
        F: Fn(Arc<NormalizedGraph>) + Send + Sync + 'static,
    {
        self.registry
            .subscribe(public_key, directory_id, ranking_filter, on_update)
    }

    /// Subscribes and receives snapshots on a channel instead of a callback.
    pub fn subscribe_channel(
        &self,
        public_key: &str,
        directory_id: &str,
        ranking_filter: u8,
    ) -> Result<(Subscription, mpsc::UnboundedReceiver<Arc<NormalizedGraph>>)> {
        let (tx, rx) = mpsc::unbounded_channel();
        let subscription = self.subscribe(public_key, directory_id, ranking_filter, move |graph| {
            let _ = tx.send(graph);
        })?;
        Ok((subscription, rx))
    }

    /// Latest cached snapshot for a subscription, if one has arrived.
    pub fn cached(
        &self,
        directory_id: &str,
        public_key: &str,
        ranking_filter: u8,
    ) -> Option<Arc<NormalizedGraph>> {
        self.registry
            .cache()
            .lookup(directory_id, public_key, ranking_filter)
    }

    pub fn connection(&self) -> &ConnectionManager {
        self.registry.connection()
    }

    pub fn registry(&self) -> &Arc<SubscriptionRegistry> {
        &self.registry
    }

    pub fn cache(&self) -> &Arc<GraphCache> {
        self.registry.cache()
    }

    /// Closes the connection and cancels any pending reconnect.
    pub fn close(&self) {
        self.registry.connection().close();
    }
}

impl Drop for GraphClient {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{ClientMessage, GraphRequest};
    use crate::testing::TestServer;
    use std::time::Duration;

    const SNAPSHOT: &str = r#"digraph {
        0 [pubkey="root", label="Root", ranking=0.1];
        1 [pubkey="a", ranking=0.4];
        2 [pubkey="b", ranking=0.6];
        0 -> 1 [weight=1, height=10, time=1000];
        0 -> 2 [weight=2, height=11, time=1001];
    }"#;

    async fn next(rx: &mut mpsc::UnboundedReceiver<Arc<NormalizedGraph>>) -> Arc<NormalizedGraph> {
        tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("timed out waiting for a snapshot")
            .expect("subscription closed")
    }

    #[tokio::test]
    async fn test_subscribe_receives_filtered_snapshot() {
        let mut server = TestServer::start().await;
        let client = GraphClient::new(server.config());

        let (_sub, mut rx) = client.subscribe_channel("root", "dir", 50).unwrap();
        assert!(client.cached("dir", "root", 50).is_none());

        let mut conn = server.accept().await;
        assert_eq!(
            conn.recv().await,
            ClientMessage::GetGraph(GraphRequest::new("root", "dir"))
        );
        conn.push_graph("root", SNAPSHOT).await;

        let graph = next(&mut rx).await;
        assert_eq!(graph.node_count(), 2);
        assert!(graph.node_by_pubkey("a").is_none());
        assert_eq!(graph.link_count(), 1);
        assert_eq!(graph.outgoing(0)[0].height, Some(11));

        let cached = client.cached("dir", "root", 50).unwrap();
        assert!(Arc::ptr_eq(&cached, &graph));
    }

    #[tokio::test]
    async fn test_subscription_survives_reconnect() {
        let mut server = TestServer::start().await;
        let client = GraphClient::new(server.config());
        let (_sub, mut rx) = client.subscribe_channel("root", "dir", 0).unwrap();

        let mut first = server.accept().await;
        first.recv().await;
        drop(first);

        let mut second = server.accept().await;
        assert_eq!(
            second.recv().await,
            ClientMessage::GetGraph(GraphRequest::new("root", "dir"))
        );
        second.push_graph("root", SNAPSHOT).await;
        assert_eq!(next(&mut rx).await.node_count(), 3);
    }

    #[tokio::test]
    async fn test_drop_closes_connection() {
        let mut server = TestServer::start().await;
        let client = GraphClient::new(server.config());
        let _sub = client.subscribe("root", "dir", 0, |_| {}).unwrap();

        let mut conn = server.accept().await;
        drop(client);
        conn.closed().await;
        assert!(server.try_accept(Duration::from_millis(300)).await.is_none());
    }
}
