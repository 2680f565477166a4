use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::board::{BoardEntry, BoardVersion, Blackboard, WriteOp};
use crate::config::{NodeConfig, PeerId, ReplicationMode};
use crate::election::{ElectionCoordinator, ElectionStatus};
use crate::error::{BoardError, Result};
use crate::ledger::{
    CoSigner, Difficulty, KeyDirectory, Keypair, Ledger, Miner, PublicKey, SignRequest, Transaction,
};
use crate::replication::ReplicationManager;
use crate::rpc::{
    BoardWrite, PeerRequest, PeerResponse, PubkeyAnnouncement, RequestHandler, WriteReceipt,
};
use crate::tasks::{TaskKind, TaskSupervisor};
use crate::transport::{broadcast, PeerTransport};

const ANNOUNCE_ATTEMPTS: u32 = 10;
const ANNOUNCE_INTERVAL: Duration = Duration::from_secs(1);

/// Everything `GET /status` reports about a node.
#[derive(Debug, Clone, Serialize)]
pub struct NodeStatus {
    pub node_id: u64,
    pub address: String,
    pub mode: ReplicationMode,
    pub election: ElectionStatus,
    pub clock: u64,
    pub board_entries: usize,
    pub board_version: BoardVersion,
    pub chain_height: usize,
    pub tip_hash: String,
    pub pending_transactions: usize,
    pub known_keys: usize,
    pub public_key: PublicKey,
}

/// One cluster member: the board, the election, the replication strategy and
/// the ledger, wired to the same transport and task supervisor.
pub struct Node {
    pub config: NodeConfig,
    pub board: Arc<Blackboard>,
    pub election: Arc<ElectionCoordinator>,
    pub replication: Arc<ReplicationManager>,
    pub ledger: Arc<Ledger>,
    pub cosigner: Arc<CoSigner>,
    pub keys: Arc<KeyDirectory>,
    transport: Arc<dyn PeerTransport>,
    tasks: TaskSupervisor,
}

impl Node {
    pub fn new(
        config: NodeConfig,
        transport: Arc<dyn PeerTransport>,
        shutdown: CancellationToken,
    ) -> Self {
        let tasks = TaskSupervisor::new(shutdown);
        let board = Arc::new(Blackboard::new());
        let priority = config.resolve_priority();

        let election = Arc::new(ElectionCoordinator::new(
            config.node_id,
            priority,
            config.peers.clone(),
            transport.clone(),
            &config.election,
            tasks.clone(),
        ));
        let replication = Arc::new(ReplicationManager::new(
            config.node_id,
            board.clone(),
            election.clone(),
            transport.clone(),
            config.peers.clone(),
            &config.replication,
        ));
        let ledger = Arc::new(Ledger::new(
            board.clone(),
            Difficulty::new(config.mining.difficulty_prefix.clone()),
        ));

        tracing::info!(
            node_id = config.node_id,
            priority,
            mode = %config.replication.mode,
            peers = config.peers.len(),
            "Node created"
        );

        Self {
            board,
            election,
            replication,
            ledger,
            cosigner: Arc::new(CoSigner::new(Keypair::generate())),
            keys: Arc::new(KeyDirectory::new()),
            transport,
            tasks,
            config,
        }
    }

    pub fn id(&self) -> u64 {
        self.config.node_id
    }

    pub fn tasks(&self) -> &TaskSupervisor {
        &self.tasks
    }

    pub fn public_key(&self) -> PublicKey {
        self.cosigner.public_key()
    }

    fn peer(&self, node_id: u64) -> Result<&PeerId> {
        self.config.peer(node_id).ok_or(BoardError::UnknownPeer(node_id))
    }

    /// Start the background work: key announcement, the first election after
    /// the startup delay, the leader heartbeat, and the miner when enabled.
    pub fn start(self: &Arc<Self>) {
        let node = self.clone();
        self.tasks.spawn(TaskKind::Announce, async move {
            node.announce_until_delivered().await;
            Ok(())
        });

        let election = self.election.clone();
        let delay = Duration::from_millis(self.config.election.startup_delay_ms);
        self.tasks.spawn(TaskKind::ElectionRound, async move {
            tokio::time::sleep(delay).await;
            election.start_election().await;
            Ok(())
        });

        let node = self.clone();
        self.tasks.spawn(TaskKind::Heartbeat, async move { node.heartbeat_loop().await });

        if self.config.mining.enabled {
            let miner = Miner::new(
                self.id(),
                self.ledger.clone(),
                self.transport.clone(),
                self.config.peers.clone(),
                &self.config.mining,
            );
            self.tasks.spawn(TaskKind::Mining, miner.run());
        }
    }

    /// Start background work and serve HTTP until the shutdown token fires.
    pub async fn run(self: Arc<Self>) -> Result<()> {
        self.start();
        let result = crate::rpc::server::serve(
            self.clone(),
            self.config.listen_addr,
            self.tasks.shutdown_token(),
        )
        .await;
        self.tasks.shutdown().await;
        tracing::info!(node_id = self.id(), "Node stopped");
        result
    }

    /// While this node leads, periodically reassert it to every peer. In
    /// leader-mediated mode the heartbeat is a board push, so a leader that
    /// was cut off also catches up on what the others accepted meanwhile.
    async fn heartbeat_loop(&self) -> Result<()> {
        let interval = self.config.election.heartbeat_interval();
        loop {
            tokio::time::sleep(interval).await;
            if !self.election.is_leader().await {
                continue;
            }
            match self.replication.mode() {
                ReplicationMode::LeaderMediated => {
                    if let Err(e) = self.replication.sync_followers().await {
                        tracing::info!(node_id = self.id(), error = %e, "Heartbeat changed leadership state");
                    }
                }
                ReplicationMode::ScalarClock => {
                    let delivered = self.election.announce().await;
                    tracing::trace!(node_id = self.id(), delivered, "Heartbeat sent");
                }
            }
        }
    }

    pub async fn shutdown(&self) {
        self.tasks.shutdown().await;
    }

    /// Tell every peer which key this node signs with.
    pub async fn announce_public_key(&self) -> usize {
        broadcast(
            self.transport.clone(),
            &self.config.peers,
            PeerRequest::PubkeyAnnounce(PubkeyAnnouncement {
                addr: self.config.advertise_addr.clone(),
                public_key: self.public_key(),
            }),
        )
        .await
    }

    async fn announce_until_delivered(&self) {
        for attempt in 1..=ANNOUNCE_ATTEMPTS {
            let delivered = self.announce_public_key().await;
            tracing::debug!(node_id = self.id(), attempt, delivered, "Announced public key");
            if delivered == self.config.peers.len() {
                return;
            }
            tokio::time::sleep(ANNOUNCE_INTERVAL).await;
        }
        tracing::warn!(node_id = self.id(), "Not every peer acknowledged the public key");
    }

    pub async fn write(&self, op: WriteOp) -> Result<WriteReceipt> {
        self.replication.write(op).await
    }

    pub async fn entries(&self) -> Vec<BoardEntry> {
        self.board.entries().await
    }

    /// Sign `payload` and ask `counterpart` to co-sign it. Returns the id the
    /// counterpart queued the request under.
    pub async fn propose_cosigned(&self, counterpart: u64, payload: impl Into<String>) -> Result<Uuid> {
        let peer = self.peer(counterpart)?;
        let message = self.cosigner.initiate(payload);
        match self
            .transport
            .send(peer, PeerRequest::SignRequestSubmit(message))
            .await?
        {
            PeerResponse::SignRequestQueued { id } => {
                tracing::info!(node_id = self.id(), counterpart, request_id = %id, "Sign request queued");
                Ok(id)
            }
            other => Err(BoardError::Internal(format!(
                "unexpected reply to sign request: {:?}",
                other
            ))),
        }
    }

    /// Decide on a pending sign request. An accepted request becomes a
    /// dual-signed transaction that is queued locally and sent to every peer.
    pub async fn approve_sign_request(&self, id: Uuid, accept: bool) -> Result<Option<Transaction>> {
        let transaction = self.cosigner.approve(id, accept).await?;
        if let Some(tx) = &transaction {
            self.ledger.add_transaction(tx.clone()).await?;
            let delivered = broadcast(
                self.transport.clone(),
                &self.config.peers,
                PeerRequest::TransactionSubmit(tx.clone()),
            )
            .await;
            tracing::info!(
                node_id = self.id(),
                request_id = %id,
                digest = %tx.digest(),
                delivered,
                "Co-signed transaction submitted"
            );
        }
        Ok(transaction)
    }

    pub async fn sign_requests(&self) -> Vec<SignRequest> {
        self.cosigner.pending().await
    }

    pub async fn status(&self) -> NodeStatus {
        NodeStatus {
            node_id: self.id(),
            address: self.config.advertise_addr.clone(),
            mode: self.replication.mode(),
            election: self.election.status().await,
            clock: self.replication.clock().await,
            board_entries: self.board.len().await,
            board_version: self.board.version().await,
            chain_height: self.ledger.height().await,
            tip_hash: self.ledger.tip_hash().await,
            pending_transactions: self.ledger.pending_len().await,
            known_keys: self.keys.len().await,
            public_key: self.public_key(),
        }
    }
}

#[async_trait]
impl RequestHandler for Node {
    async fn handle(&self, request: PeerRequest) -> Result<PeerResponse> {
        match request {
            PeerRequest::ElectionPropose(proposal) => {
                self.election.on_election(proposal).await?;
                Ok(PeerResponse::Ack)
            }
            PeerRequest::ElectionAnswer(answer) => {
                self.election.on_answer(answer).await;
                Ok(PeerResponse::Ack)
            }
            PeerRequest::ElectionCoordinator(announcement) => {
                self.election.on_coordinator(announcement).await?;
                Ok(PeerResponse::Ack)
            }
            PeerRequest::PubkeyAnnounce(announcement) => {
                let previous = self
                    .keys
                    .announce(announcement.addr.clone(), announcement.public_key)
                    .await;
                if previous != Some(announcement.public_key) {
                    tracing::info!(node_id = self.id(), addr = %announcement.addr, "Learned peer public key");
                }
                Ok(PeerResponse::Ack)
            }
            PeerRequest::BlockSubmit(block) => {
                let outcome = self.ledger.accept_foreign_block(block).await?;
                tracing::debug!(
                    node_id = self.id(),
                    block_hash = %outcome.hash,
                    applied = outcome.applied,
                    duplicate = outcome.duplicate,
                    "Processed peer block"
                );
                Ok(PeerResponse::Ack)
            }
            PeerRequest::TransactionSubmit(tx) => {
                self.ledger.add_transaction(tx).await?;
                Ok(PeerResponse::Ack)
            }
            PeerRequest::SignRequestSubmit(message) => {
                let id = self.cosigner.submit(message, &self.keys).await?;
                Ok(PeerResponse::SignRequestQueued { id })
            }
            PeerRequest::SignRequestApprove { id, accept } => {
                let transaction = self.approve_sign_request(id, accept).await?;
                Ok(PeerResponse::SignRequestResolved { transaction })
            }
            PeerRequest::BoardWrite(BoardWrite::Forward { op }) => {
                let receipt = self.replication.apply_as_leader(op).await?;
                Ok(PeerResponse::WriteAccepted(receipt))
            }
            PeerRequest::BoardWrite(BoardWrite::Clocked { clock, snapshot }) => {
                let applied = self.replication.receive_clocked(clock, snapshot).await;
                Ok(PeerResponse::ClockedUpdate { applied })
            }
            PeerRequest::BoardSnapshot(push) => self.replication.receive_snapshot(push).await,
        }
    }
}
