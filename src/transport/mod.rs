//! How one node reaches another.
//!
//! Everything above this module talks to peers through [`PeerTransport`]. The
//! production implementation is JSON over HTTP; tests wire nodes together
//! in-process with [`memory::MemoryNetwork`] so partitions can be injected.

pub mod http;
pub mod memory;

use std::sync::Arc;

use async_trait::async_trait;
use tokio::task::JoinSet;

use crate::config::PeerId;
use crate::error::Result;
use crate::rpc::{PeerRequest, PeerResponse};

pub use http::HttpTransport;
pub use memory::{MemoryNetwork, MemoryTransport};

#[async_trait]
pub trait PeerTransport: Send + Sync {
    /// Deliver one request and wait for the peer's reply. A peer that cannot
    /// be reached yields a transport error.
    async fn send(&self, peer: &PeerId, request: PeerRequest) -> Result<PeerResponse>;
}

/// Send `request` to every peer concurrently and return how many accepted it.
/// Individual failures are logged and skipped.
pub async fn broadcast(
    transport: Arc<dyn PeerTransport>,
    peers: &[PeerId],
    request: PeerRequest,
) -> usize {
    let path = request.path();
    let mut delivered = 0;
    for (peer, result) in fan_out(transport, peers, request).await {
        match result {
            Ok(_) => delivered += 1,
            Err(e) => {
                tracing::debug!(peer = %peer, path = %path, error = %e, "Broadcast delivery failed");
            }
        }
    }
    delivered
}

/// Send `request` to every peer concurrently and collect each reply.
pub async fn fan_out(
    transport: Arc<dyn PeerTransport>,
    peers: &[PeerId],
    request: PeerRequest,
) -> Vec<(PeerId, Result<PeerResponse>)> {
    let mut pending = JoinSet::new();
    for peer in peers {
        let transport = transport.clone();
        let peer = peer.clone();
        let request = request.clone();
        pending.spawn(async move {
            let result = transport.send(&peer, request).await;
            (peer, result)
        });
    }

    let mut replies = Vec::with_capacity(peers.len());
    while let Some(joined) = pending.join_next().await {
        match joined {
            Ok(reply) => replies.push(reply),
            Err(e) => {
                tracing::warn!(error = %e, "Fan-out task panicked");
            }
        }
    }
    replies
}
