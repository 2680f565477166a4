use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::RwLock;

use crate::config::{ElectionConfig, PeerId};
use crate::election::state::{ElectionRole, ElectionState, Eligibility, RoundTicket};
use crate::error::{BoardError, Result};
use crate::rpc::{CoordinatorAnnouncement, ElectionAnswer, ElectionProposal, PeerRequest};
use crate::tasks::{TaskKind, TaskSupervisor};
use crate::transport::{broadcast, PeerTransport};

/// Point-in-time view of the election, served by `GET /status`.
#[derive(Debug, Clone, Serialize)]
pub struct ElectionStatus {
    pub role: ElectionRole,
    pub leader: Option<u64>,
    pub round: u64,
    pub priority: u32,
    pub known_priorities: usize,
}

/// Runs the Bully election for one node.
///
/// A round sends `Election` to every peer that could outrank this node, then
/// waits one answer window. If the round is still current and nobody answered,
/// the node declares itself coordinator and tells everyone. The state lock is
/// never held across a peer RPC.
pub struct ElectionCoordinator {
    id: u64,
    peers: Vec<PeerId>,
    state: RwLock<ElectionState>,
    transport: Arc<dyn PeerTransport>,
    answer_window: Duration,
    tasks: TaskSupervisor,
}

impl ElectionCoordinator {
    pub fn new(
        id: u64,
        priority: u32,
        peers: Vec<PeerId>,
        transport: Arc<dyn PeerTransport>,
        config: &ElectionConfig,
        tasks: TaskSupervisor,
    ) -> Self {
        Self {
            id,
            peers,
            state: RwLock::new(ElectionState::new(priority)),
            transport,
            answer_window: config.answer_window(),
            tasks,
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub async fn priority(&self) -> u32 {
        self.state.read().await.priority
    }

    pub async fn eligibility(&self) -> Eligibility {
        self.state.read().await.eligibility(self.id)
    }

    pub async fn current_leader(&self) -> Option<u64> {
        self.state.read().await.current_leader
    }

    pub async fn is_leader(&self) -> bool {
        self.state.read().await.current_leader == Some(self.id)
    }

    pub async fn role(&self) -> ElectionRole {
        self.state.read().await.role
    }

    pub async fn status(&self) -> ElectionStatus {
        let state = self.state.read().await;
        ElectionStatus {
            role: state.role,
            leader: state.current_leader,
            round: state.round,
            priority: state.priority,
            known_priorities: state.known_priorities.len(),
        }
    }

    pub async fn invalidate_leader(&self) {
        let mut state = self.state.write().await;
        if let Some(leader) = state.current_leader {
            tracing::warn!(node_id = self.id, leader, "Invalidating unreachable leader");
        }
        state.invalidate_leader();
    }

    /// Run the sending half of a round and schedule its answer deadline.
    /// Returns the round number that was started.
    pub async fn start_election(self: &Arc<Self>) -> u64 {
        let (ticket, proposal, targets) = {
            let mut state = self.state.write().await;
            let ticket = state.begin_round();
            let proposal = ElectionProposal {
                from_id: self.id,
                priority: state.priority,
                round: ticket.round,
            };
            let targets = state.election_targets(self.id, &self.peers);
            (ticket, proposal, targets)
        };

        tracing::info!(
            node_id = self.id,
            round = ticket.round,
            priority = proposal.priority,
            targets = targets.len(),
            "Starting election"
        );

        for peer in &targets {
            match self
                .transport
                .send(peer, PeerRequest::ElectionPropose(proposal.clone()))
                .await
            {
                Ok(_) => {
                    tracing::debug!(node_id = self.id, peer_id = peer.id, "Election message delivered");
                }
                Err(e) => {
                    tracing::debug!(node_id = self.id, peer_id = peer.id, error = %e, "Election message failed");
                }
            }
        }

        {
            let mut state = self.state.write().await;
            if state.is_current(ticket) {
                state.role = ElectionRole::WaitingAnswers;
            }
        }

        let this = self.clone();
        self.tasks.spawn(TaskKind::ElectionDeadline, async move {
            this.await_answers(ticket).await
        });

        ticket.round
    }

    /// Start a round in the background.
    pub fn trigger_election(self: &Arc<Self>) {
        let this = self.clone();
        self.tasks.spawn(TaskKind::ElectionRound, async move {
            this.start_election().await;
            Ok(())
        });
    }

    async fn await_answers(self: Arc<Self>, ticket: RoundTicket) -> Result<()> {
        tokio::time::sleep(self.answer_window).await;

        let declared = {
            let mut state = self.state.write().await;
            if state.should_declare(ticket) {
                state.declare(self.id);
                true
            } else {
                tracing::debug!(
                    node_id = self.id,
                    round = ticket.round,
                    answers = state.answers_received,
                    "Round ended without self-declaration"
                );
                false
            }
        };

        if declared {
            let delivered = self.announce().await;
            tracing::info!(
                node_id = self.id,
                round = ticket.round,
                delivered,
                "Declared self coordinator"
            );
        }
        Ok(())
    }

    /// Tell every peer this node is the coordinator. Returns how many peers
    /// received it.
    pub async fn announce(&self) -> usize {
        let announcement = CoordinatorAnnouncement {
            from_id: self.id,
            priority: self.priority().await,
        };
        broadcast(
            self.transport.clone(),
            &self.peers,
            PeerRequest::ElectionCoordinator(announcement),
        )
        .await
    }

    fn known_peer(&self, peer_id: u64) -> Result<&PeerId> {
        self.peers
            .iter()
            .find(|p| p.id == peer_id)
            .ok_or(BoardError::UnknownPeer(peer_id))
    }

    /// Handle a challenge. A node that outranks the sender suppresses it with
    /// an answer and runs its own round.
    pub async fn on_election(self: &Arc<Self>, proposal: ElectionProposal) -> Result<()> {
        let peer = self.known_peer(proposal.from_id)?;
        let outranks = {
            let mut state = self.state.write().await;
            state.record_priority(proposal.from_id, proposal.priority);
            state
                .eligibility(self.id)
                .outranks(&Eligibility::new(proposal.priority, proposal.from_id))
        };

        tracing::debug!(
            node_id = self.id,
            from = proposal.from_id,
            round = proposal.round,
            outranks,
            "Received election message"
        );
        if !outranks {
            return Ok(());
        }

        if let Err(e) = self
            .transport
            .send(peer, PeerRequest::ElectionAnswer(ElectionAnswer { from_id: self.id }))
            .await
        {
            tracing::debug!(node_id = self.id, peer_id = peer.id, error = %e, "Answer failed");
        }

        self.trigger_election();
        Ok(())
    }

    pub async fn on_answer(&self, answer: ElectionAnswer) {
        let mut state = self.state.write().await;
        state.record_answer();
        tracing::debug!(
            node_id = self.id,
            from = answer.from_id,
            round = state.round,
            "Election answered by a more eligible node"
        );
    }

    pub async fn on_coordinator(self: &Arc<Self>, announcement: CoordinatorAnnouncement) -> Result<bool> {
        self.observe_leader(announcement.from_id, announcement.priority)
            .await
    }

    /// Handle a node claiming to lead, through an announcement or a board
    /// push. Returns false when this node refuses the claim because it leads
    /// itself and outranks the claimant; it then reasserts itself with a new
    /// round, which a less eligible claimant cannot win.
    pub async fn observe_leader(self: &Arc<Self>, leader_id: u64, priority: u32) -> Result<bool> {
        self.known_peer(leader_id)?;
        {
            let mut state = self.state.write().await;
            state.record_priority(leader_id, priority);
            if !state.refuses_leader(self.id, Eligibility::new(priority, leader_id)) {
                let previous = state.current_leader;
                state.accept_coordinator(leader_id, self.id);
                if previous != Some(leader_id) {
                    tracing::info!(node_id = self.id, leader = leader_id, ?previous, "New coordinator");
                }
                return Ok(true);
            }
        }

        tracing::warn!(
            node_id = self.id,
            claimant = leader_id,
            priority,
            "Refusing leadership claim from a less eligible node"
        );
        self.trigger_election();
        Ok(false)
    }

    /// Poll until a leader is known or `timeout` elapses.
    pub async fn wait_for_leader(&self, timeout: Duration) -> Option<u64> {
        let deadline = tokio::time::Instant::now() + timeout;
        let mut delay = Duration::from_millis(10);
        loop {
            if let Some(leader) = self.current_leader().await {
                return Some(leader);
            }
            let now = tokio::time::Instant::now();
            if now >= deadline {
                return None;
            }
            tokio::time::sleep(delay.min(deadline - now)).await;
            delay = (delay * 2).min(Duration::from_millis(200));
        }
    }
}
