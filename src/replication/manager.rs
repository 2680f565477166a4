use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;

use crate::board::{Blackboard, BoardVersion, Snapshot, SnapshotInstall, WriteOp};
use crate::config::{PeerId, ReplicationConfig, ReplicationMode};
use crate::election::ElectionCoordinator;
use crate::error::{BoardError, Result};
use crate::replication::clock::LogicalClock;
use crate::replication::retry::RetryPolicy;
use crate::rpc::{BoardWrite, LeaderSnapshot, PeerRequest, PeerResponse, WriteReceipt};
use crate::transport::{broadcast, fan_out, PeerTransport};

/// Routes client writes to the rest of the cluster.
///
/// In leader-mediated mode a write is applied by the leader, which then pushes
/// its full board to every peer. A follower forwards the write; when the
/// leader cannot be reached it is invalidated, an election is run, and the
/// write is retried with backoff up to `max_attempts` times.
///
/// Every pushed board carries a [`BoardVersion`]. A follower never trades a
/// newer board for an older one and hands the newer one back instead, so a
/// leader that was cut off adopts what the cluster acknowledged meanwhile
/// before its own writes go out.
///
/// In scalar-clock mode each node applies its own writes and broadcasts a
/// clock-stamped snapshot. Receivers install it only when the stamp is
/// strictly greater than their own clock.
pub struct ReplicationManager {
    node_id: u64,
    mode: ReplicationMode,
    board: Arc<Blackboard>,
    election: Arc<ElectionCoordinator>,
    transport: Arc<dyn PeerTransport>,
    peers: Vec<PeerId>,
    clock: Mutex<LogicalClock>,
    retry: RetryPolicy,
    leader_wait: Duration,
}

impl ReplicationManager {
    pub fn new(
        node_id: u64,
        board: Arc<Blackboard>,
        election: Arc<ElectionCoordinator>,
        transport: Arc<dyn PeerTransport>,
        peers: Vec<PeerId>,
        config: &ReplicationConfig,
    ) -> Self {
        Self {
            node_id,
            mode: config.mode,
            board,
            election,
            transport,
            peers,
            clock: Mutex::new(LogicalClock::new()),
            retry: RetryPolicy::from_config(config),
            leader_wait: Duration::from_millis(config.leader_wait_ms),
        }
    }

    pub fn mode(&self) -> ReplicationMode {
        self.mode
    }

    pub async fn clock(&self) -> u64 {
        self.clock.lock().await.value()
    }

    /// Apply a client write cluster-wide.
    pub async fn write(&self, op: WriteOp) -> Result<WriteReceipt> {
        match self.mode {
            ReplicationMode::LeaderMediated => self.write_via_leader(op).await,
            ReplicationMode::ScalarClock => self.write_with_clock(op).await,
        }
    }

    async fn write_via_leader(&self, op: WriteOp) -> Result<WriteReceipt> {
        for attempt in 1..=self.retry.max_attempts {
            let leader = match self.election.current_leader().await {
                Some(leader) => Some(leader),
                None => {
                    self.election.start_election().await;
                    self.election.wait_for_leader(self.leader_wait).await
                }
            };

            let Some(leader) = leader else {
                tracing::warn!(node_id = self.node_id, attempt, "No leader elected yet");
                tokio::time::sleep(self.retry.backoff(attempt)).await;
                continue;
            };

            let result = if leader == self.node_id {
                self.apply_as_leader(op.clone()).await
            } else {
                self.forward(leader, &op).await
            };

            match result {
                Ok(mut receipt) => {
                    receipt.attempts = attempt;
                    return Ok(receipt);
                }
                Err(e) if e.is_retryable() => {
                    tracing::warn!(
                        node_id = self.node_id,
                        leader,
                        attempt,
                        error = %e,
                        "Write did not reach the leader"
                    );
                    if leader != self.node_id {
                        self.election.invalidate_leader().await;
                    }
                    tokio::time::sleep(self.retry.backoff(attempt)).await;
                }
                Err(e) => return Err(e),
            }
        }

        Err(BoardError::NoLeaderAvailable {
            attempts: self.retry.max_attempts,
        })
    }

    async fn forward(&self, leader: u64, op: &WriteOp) -> Result<WriteReceipt> {
        let peer = self
            .peers
            .iter()
            .find(|p| p.id == leader)
            .ok_or(BoardError::UnknownPeer(leader))?;

        tracing::debug!(node_id = self.node_id, leader, op = %op, "Forwarding write to leader");
        match self
            .transport
            .send(peer, PeerRequest::BoardWrite(BoardWrite::Forward { op: op.clone() }))
            .await?
        {
            PeerResponse::WriteAccepted(receipt) => Ok(receipt),
            other => Err(BoardError::Internal(format!(
                "unexpected reply to forwarded write: {:?}",
                other
            ))),
        }
    }

    /// Apply a write on the leader and push the resulting board to every peer.
    pub async fn apply_as_leader(&self, op: WriteOp) -> Result<WriteReceipt> {
        if !self.election.is_leader().await {
            return Err(BoardError::NotLeader(self.election.current_leader().await));
        }

        let (version, snapshot) = self.board.apply_versioned(&op, self.node_id).await?;
        tracing::info!(
            node_id = self.node_id,
            op = %op,
            version = %version,
            entries = snapshot.len(),
            "Applied write as leader"
        );

        let replicated_to = self.push_snapshot(version, snapshot).await?;

        Ok(WriteReceipt {
            key: op.key().to_string(),
            leader: Some(self.node_id),
            clock: None,
            replicated_to,
            attempts: 1,
        })
    }

    /// Heartbeat of a leader: push the current board so peers learn who leads
    /// and so either side catches up on the newer board.
    pub async fn sync_followers(&self) -> Result<usize> {
        let (version, snapshot) = self.board.versioned_snapshot().await;
        self.push_snapshot(version, snapshot).await
    }

    /// Send a board to every peer and reconcile with their replies.
    ///
    /// A peer that leads itself and outranks this node refuses the push; this
    /// node then stops considering itself leader. A peer holding a board from
    /// outside this board's history returns it, and this node adopts it.
    /// Either way the write that produced `version` did not take effect.
    async fn push_snapshot(&self, version: BoardVersion, snapshot: Snapshot) -> Result<usize> {
        let push = LeaderSnapshot {
            from_id: self.node_id,
            priority: self.election.priority().await,
            version,
            snapshot,
        };
        let replies = fan_out(
            self.transport.clone(),
            &self.peers,
            PeerRequest::BoardSnapshot(push),
        )
        .await;

        let mut installed = 0;
        let mut refused_by = None;
        let mut newest: Option<(BoardVersion, Snapshot)> = None;
        for (peer, reply) in replies {
            match reply {
                Ok(PeerResponse::Ack) => installed += 1,
                Ok(PeerResponse::LeaderRefused { leader }) => refused_by = Some(leader),
                Ok(PeerResponse::SnapshotKept { version: kept, snapshot }) => {
                    if !kept.diverges_from(&version) {
                        // Our own later write reached the peer first.
                        installed += 1;
                    } else if newest.as_ref().map_or(true, |(best, _)| kept > *best) {
                        newest = Some((kept, snapshot));
                    }
                }
                Ok(other) => {
                    tracing::warn!(node_id = self.node_id, peer_id = peer.id, reply = ?other, "Unexpected reply to snapshot");
                }
                Err(e) => {
                    tracing::debug!(node_id = self.node_id, peer_id = peer.id, error = %e, "Snapshot not delivered");
                }
            }
        }

        if let Some(leader) = refused_by {
            tracing::warn!(node_id = self.node_id, leader, "Stepping down, a more eligible node leads");
            self.election.invalidate_leader().await;
            return Err(BoardError::NotLeader(Some(leader)));
        }

        if let Some((found, snapshot)) = newest {
            let adopted = self.board.adopt(found, snapshot, self.node_id).await;
            tracing::warn!(
                node_id = self.node_id,
                pushed = %version,
                found = %found,
                adopted = %adopted,
                "Adopted newer board held by a peer"
            );
            // Hand the adopted board to the peers that took the stale one.
            let (version, snapshot) = self.board.versioned_snapshot().await;
            broadcast(
                self.transport.clone(),
                &self.peers,
                PeerRequest::BoardSnapshot(LeaderSnapshot {
                    from_id: self.node_id,
                    priority: self.election.priority().await,
                    version,
                    snapshot,
                }),
            )
            .await;
            return Err(BoardError::Superseded { term: adopted.term });
        }

        Ok(installed)
    }

    /// Follower side of `board/snapshot`.
    pub async fn receive_snapshot(&self, push: LeaderSnapshot) -> Result<PeerResponse> {
        if !self.election.observe_leader(push.from_id, push.priority).await? {
            return Ok(PeerResponse::LeaderRefused {
                leader: self.node_id,
            });
        }

        match self.board.install_versioned(push.version, push.snapshot).await {
            SnapshotInstall::Installed => {
                tracing::debug!(node_id = self.node_id, leader = push.from_id, version = %push.version, "Installed leader snapshot");
                Ok(PeerResponse::Ack)
            }
            SnapshotInstall::Current => Ok(PeerResponse::Ack),
            SnapshotInstall::Kept { version, snapshot } => {
                tracing::info!(
                    node_id = self.node_id,
                    leader = push.from_id,
                    pushed = %push.version,
                    local = %version,
                    "Keeping newer local board"
                );
                Ok(PeerResponse::SnapshotKept { version, snapshot })
            }
        }
    }

    async fn write_with_clock(&self, op: WriteOp) -> Result<WriteReceipt> {
        let (clock, snapshot) = {
            let mut clock = self.clock.lock().await;
            let snapshot = self.board.apply_and_snapshot(&op).await?;
            (clock.tick(), snapshot)
        };
        tracing::info!(node_id = self.node_id, clock, op = %op, "Applied clocked write");

        let replicated_to = broadcast(
            self.transport.clone(),
            &self.peers,
            PeerRequest::BoardWrite(BoardWrite::Clocked { clock, snapshot }),
        )
        .await;

        Ok(WriteReceipt {
            key: op.key().to_string(),
            leader: None,
            clock: Some(clock),
            replicated_to,
            attempts: 1,
        })
    }

    /// Install a clock-stamped snapshot if its stamp is newer than the local
    /// clock. The comparison and the install happen under one lock.
    pub async fn receive_clocked(&self, carried: u64, snapshot: Snapshot) -> bool {
        let mut clock = self.clock.lock().await;
        if !clock.accepts(carried) {
            tracing::debug!(
                node_id = self.node_id,
                carried,
                local = clock.value(),
                "Ignoring stale clocked snapshot"
            );
            return false;
        }
        self.board.replace(snapshot).await;
        clock.adopt(carried);
        tracing::debug!(node_id = self.node_id, clock = carried, "Installed clocked snapshot");
        true
    }
}
