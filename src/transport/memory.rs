use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Weak};

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::config::PeerId;
use crate::error::{BoardError, Result};
use crate::rpc::{PeerRequest, PeerResponse, RequestHandler};
use crate::transport::PeerTransport;

/// An in-process network of nodes with injectable partitions.
///
/// Handlers are held weakly; a node dropped by its owner simply becomes
/// unreachable.
#[derive(Default)]
pub struct MemoryNetwork {
    handlers: RwLock<HashMap<u64, Weak<dyn RequestHandler>>>,
    isolated: RwLock<HashSet<u64>>,
    cut_links: RwLock<HashSet<(u64, u64)>>,
}

impl MemoryNetwork {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub async fn register(&self, node_id: u64, handler: &Arc<dyn RequestHandler>) {
        self.handlers
            .write()
            .await
            .insert(node_id, Arc::downgrade(handler));
    }

    /// Transport used by node `from` to reach the others.
    pub fn transport(self: &Arc<Self>, from: u64) -> MemoryTransport {
        MemoryTransport {
            network: self.clone(),
            from,
        }
    }

    /// Cut every link to and from `node_id`.
    pub async fn isolate(&self, node_id: u64) {
        tracing::info!(node_id, "Isolating node");
        self.isolated.write().await.insert(node_id);
    }

    pub async fn heal(&self, node_id: u64) {
        tracing::info!(node_id, "Healing node");
        self.isolated.write().await.remove(&node_id);
    }

    /// Cut the link between two nodes in both directions.
    pub async fn disconnect(&self, a: u64, b: u64) {
        let mut links = self.cut_links.write().await;
        links.insert((a, b));
        links.insert((b, a));
    }

    pub async fn reconnect(&self, a: u64, b: u64) {
        let mut links = self.cut_links.write().await;
        links.remove(&(a, b));
        links.remove(&(b, a));
    }

    pub async fn is_reachable(&self, from: u64, to: u64) -> bool {
        {
            let isolated = self.isolated.read().await;
            if isolated.contains(&from) || isolated.contains(&to) {
                return false;
            }
        }
        !self.cut_links.read().await.contains(&(from, to))
    }

    async fn handler(&self, node_id: u64) -> Option<Arc<dyn RequestHandler>> {
        self.handlers
            .read()
            .await
            .get(&node_id)
            .and_then(Weak::upgrade)
    }
}

#[derive(Clone)]
pub struct MemoryTransport {
    network: Arc<MemoryNetwork>,
    from: u64,
}

#[async_trait]
impl PeerTransport for MemoryTransport {
    async fn send(&self, peer: &PeerId, request: PeerRequest) -> Result<PeerResponse> {
        if !self.network.is_reachable(self.from, peer.id).await {
            return Err(BoardError::Transport {
                peer: peer.id,
                reason: "unreachable".to_string(),
            });
        }
        let handler = self
            .network
            .handler(peer.id)
            .await
            .ok_or_else(|| BoardError::Transport {
                peer: peer.id,
                reason: "no such node".to_string(),
            })?;
        handler.handle(request).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rpc::ElectionAnswer;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct Counter {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl RequestHandler for Counter {
        async fn handle(&self, _request: PeerRequest) -> Result<PeerResponse> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(PeerResponse::Ack)
        }
    }

    fn answer() -> PeerRequest {
        PeerRequest::ElectionAnswer(ElectionAnswer { from_id: 1 })
    }

    #[tokio::test]
    async fn delivers_to_registered_handler() {
        let network = MemoryNetwork::new();
        let counter = Arc::new(Counter::default());
        let handler: Arc<dyn RequestHandler> = counter.clone();
        network.register(2, &handler).await;

        let transport = network.transport(1);
        let response = transport.send(&PeerId::new(2, "mem"), answer()).await.unwrap();
        assert_eq!(response, PeerResponse::Ack);
        assert_eq!(counter.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn isolation_and_cut_links_block_delivery() {
        let network = MemoryNetwork::new();
        let handler: Arc<dyn RequestHandler> = Arc::new(Counter::default());
        network.register(2, &handler).await;
        network.register(3, &handler).await;
        let transport = network.transport(1);

        network.isolate(2).await;
        let err = transport.send(&PeerId::new(2, "mem"), answer()).await.unwrap_err();
        assert!(err.is_transport());
        network.heal(2).await;
        assert!(transport.send(&PeerId::new(2, "mem"), answer()).await.is_ok());

        network.disconnect(1, 3).await;
        assert!(transport.send(&PeerId::new(3, "mem"), answer()).await.is_err());
        assert!(!network.is_reachable(3, 1).await);
        network.reconnect(1, 3).await;
        assert!(transport.send(&PeerId::new(3, "mem"), answer()).await.is_ok());
    }

    #[tokio::test]
    async fn dropped_node_is_unreachable() {
        let network = MemoryNetwork::new();
        let handler: Arc<dyn RequestHandler> = Arc::new(Counter::default());
        network.register(2, &handler).await;
        drop(handler);

        let err = network
            .transport(1)
            .send(&PeerId::new(2, "mem"), answer())
            .await
            .unwrap_err();
        assert!(err.is_transport());
    }

    #[tokio::test]
    async fn broadcast_counts_deliveries() {
        let network = MemoryNetwork::new();
        let handler: Arc<dyn RequestHandler> = Arc::new(Counter::default());
        network.register(2, &handler).await;
        network.register(3, &handler).await;
        network.isolate(3).await;

        let peers = vec![PeerId::new(2, "mem"), PeerId::new(3, "mem"), PeerId::new(4, "mem")];
        let delivered =
            crate::transport::broadcast(Arc::new(network.transport(1)), &peers, answer()).await;
        assert_eq!(delivered, 1);
    }

    #[tokio::test]
    async fn fan_out_reports_each_peer() {
        let network = MemoryNetwork::new();
        let handler: Arc<dyn RequestHandler> = Arc::new(Counter::default());
        network.register(2, &handler).await;

        let peers = vec![PeerId::new(2, "mem"), PeerId::new(3, "mem")];
        let mut replies =
            crate::transport::fan_out(Arc::new(network.transport(1)), &peers, answer()).await;
        replies.sort_by_key(|(peer, _)| peer.id);

        assert_eq!(replies.len(), 2);
        assert!(matches!(replies[0].1, Ok(PeerResponse::Ack)));
        assert!(replies[1].1.as_ref().is_err_and(|e| e.is_transport()));
    }
}
