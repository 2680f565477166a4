use std::sync::Arc;
use std::time::Duration;

use crate::config::{MiningConfig, PeerId};
use crate::error::Result;
use crate::ledger::chain::{Ledger, SealedBlock};
use crate::rpc::PeerRequest;
use crate::transport::{broadcast, PeerTransport};

/// Proof-of-work loop over the ledger's open block.
///
/// Nonces are drawn at random. The loop yields for `pause_ms` after every
/// `attempts_per_pause` misses so request handlers are never starved, and
/// sleeps `idle_interval_ms` while there is nothing to mine.
pub struct Miner {
    node_id: u64,
    ledger: Arc<Ledger>,
    transport: Arc<dyn PeerTransport>,
    peers: Vec<PeerId>,
    idle_interval: Duration,
    pause: Duration,
    attempts_per_pause: u32,
}

impl Miner {
    pub fn new(
        node_id: u64,
        ledger: Arc<Ledger>,
        transport: Arc<dyn PeerTransport>,
        peers: Vec<PeerId>,
        config: &MiningConfig,
    ) -> Self {
        Self {
            node_id,
            ledger,
            transport,
            peers,
            idle_interval: Duration::from_millis(config.idle_interval_ms),
            pause: Duration::from_millis(config.pause_ms),
            attempts_per_pause: config.attempts_per_pause.max(1),
        }
    }

    /// Mine forever. Meant to run under the task supervisor, which stops it
    /// on shutdown.
    pub async fn run(self) -> Result<()> {
        tracing::info!(
            node_id = self.node_id,
            difficulty = self.ledger.difficulty().prefix(),
            "Miner started"
        );

        loop {
            if self.ledger.pending_len().await == 0 {
                tokio::time::sleep(self.idle_interval).await;
                continue;
            }

            match self.mine_batch().await {
                Some(sealed) => self.publish(sealed).await,
                None => tokio::time::sleep(self.pause).await,
            }
        }
    }

    /// Try up to `attempts_per_pause` random nonces.
    pub async fn mine_batch(&self) -> Option<SealedBlock> {
        for _ in 0..self.attempts_per_pause {
            let nonce: u64 = rand::random();
            if let Some(sealed) = self.ledger.try_seal(nonce).await {
                return Some(sealed);
            }
        }
        None
    }

    async fn publish(&self, sealed: SealedBlock) {
        let delivered = broadcast(
            self.transport.clone(),
            &self.peers,
            PeerRequest::BlockSubmit(sealed.block),
        )
        .await;
        tracing::info!(
            node_id = self.node_id,
            block_hash = %sealed.hash,
            delivered,
            peers = self.peers.len(),
            "Published sealed block"
        );
    }
}
