use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::config::PeerId;

/// Round value after a coordinator has been settled.
pub const ROUND_BASELINE: u64 = 0;

/// Where a node stands in the Bully protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ElectionRole {
    Idle,
    Electing,
    WaitingAnswers,
    Leader,
    Follower,
}

impl std::fmt::Display for ElectionRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ElectionRole::Idle => write!(f, "idle"),
            ElectionRole::Electing => write!(f, "electing"),
            ElectionRole::WaitingAnswers => write!(f, "waiting_answers"),
            ElectionRole::Leader => write!(f, "leader"),
            ElectionRole::Follower => write!(f, "follower"),
        }
    }
}

/// Election rank of a node. The derived ordering compares priority first and
/// then id, so the lower tuple is the more eligible node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Eligibility {
    pub priority: u32,
    pub id: u64,
}

impl Eligibility {
    pub fn new(priority: u32, id: u64) -> Self {
        Self { priority, id }
    }

    pub fn outranks(&self, other: &Eligibility) -> bool {
        self < other
    }
}

/// Identifies one started round. `epoch` never resets, so a deadline left
/// over from a settled round can never match a newer one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RoundTicket {
    pub round: u64,
    pub epoch: u64,
}

/// Per-node election state, mutated only under the coordinator's lock.
#[derive(Debug)]
pub struct ElectionState {
    pub priority: u32,
    pub known_priorities: HashMap<u64, u32>,
    pub current_leader: Option<u64>,
    pub round: u64,
    pub awaiting_answer: bool,
    pub answers_received: u32,
    pub role: ElectionRole,
    epoch: u64,
}

impl ElectionState {
    pub fn new(priority: u32) -> Self {
        Self {
            priority,
            known_priorities: HashMap::new(),
            current_leader: None,
            round: ROUND_BASELINE,
            awaiting_answer: false,
            answers_received: 0,
            role: ElectionRole::Idle,
            epoch: 0,
        }
    }

    pub fn eligibility(&self, my_id: u64) -> Eligibility {
        Eligibility::new(self.priority, my_id)
    }

    pub fn record_priority(&mut self, peer_id: u64, priority: u32) {
        self.known_priorities.insert(peer_id, priority);
    }

    /// Start a new round. Answers from earlier rounds no longer count.
    pub fn begin_round(&mut self) -> RoundTicket {
        self.round += 1;
        self.epoch += 1;
        self.awaiting_answer = false;
        self.answers_received = 0;
        self.role = ElectionRole::Electing;
        RoundTicket {
            round: self.round,
            epoch: self.epoch,
        }
    }

    /// Peers that could outrank this node: those known to be more eligible,
    /// plus those whose priority has not been learned yet.
    pub fn election_targets(&self, my_id: u64, peers: &[PeerId]) -> Vec<PeerId> {
        let me = self.eligibility(my_id);
        peers
            .iter()
            .filter(|peer| match self.known_priorities.get(&peer.id) {
                Some(&priority) => Eligibility::new(priority, peer.id).outranks(&me),
                None => true,
            })
            .cloned()
            .collect()
    }

    pub fn record_answer(&mut self) {
        self.awaiting_answer = true;
        self.answers_received += 1;
    }

    pub fn is_current(&self, ticket: RoundTicket) -> bool {
        self.epoch == ticket.epoch && self.round == ticket.round
    }

    /// True when the answer window of `ticket` closed without any answer and
    /// no coordinator settled the round in the meantime.
    pub fn should_declare(&self, ticket: RoundTicket) -> bool {
        self.is_current(ticket) && !self.awaiting_answer && self.answers_received == 0
    }

    pub fn declare(&mut self, my_id: u64) {
        self.current_leader = Some(my_id);
        self.role = ElectionRole::Leader;
        self.reset();
    }

    pub fn accept_coordinator(&mut self, leader_id: u64, my_id: u64) {
        self.current_leader = Some(leader_id);
        self.role = if leader_id == my_id {
            ElectionRole::Leader
        } else {
            ElectionRole::Follower
        };
        self.reset();
    }

    /// Only a node that currently leads itself pushes back on another claim,
    /// and only when it outranks the claimant. Everyone else follows the
    /// latest claim and lets the Bully rounds sort out stale leaders.
    pub fn refuses_leader(&self, my_id: u64, claimant: Eligibility) -> bool {
        self.current_leader == Some(my_id) && self.eligibility(my_id).outranks(&claimant)
    }

    /// Forget the leader after it stopped responding.
    pub fn invalidate_leader(&mut self) {
        self.current_leader = None;
        if matches!(self.role, ElectionRole::Leader | ElectionRole::Follower) {
            self.role = ElectionRole::Idle;
        }
    }

    fn reset(&mut self) {
        self.round = ROUND_BASELINE;
        self.awaiting_answer = false;
        self.answers_received = 0;
    }
}
