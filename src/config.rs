use std::net::SocketAddr;
use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};

/// Identity of a cluster member: its ordinal and the address its RPC server
/// listens on. Ordering is by ordinal only.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PeerId {
    pub id: u64,
    pub addr: String, // host:port format, supports both IP and hostnames
}

impl PeerId {
    pub fn new(id: u64, addr: impl Into<String>) -> Self {
        Self {
            id,
            addr: addr.into(),
        }
    }
}

impl PartialOrd for PeerId {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for PeerId {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.id.cmp(&other.id)
    }
}

impl std::fmt::Display for PeerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}@{}", self.id, self.addr)
    }
}

/// How client writes reach the other nodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ReplicationMode {
    /// Writes are forwarded to the elected leader, which fans out snapshots.
    #[default]
    LeaderMediated,
    /// Every node broadcasts its own writes stamped with a scalar clock.
    ScalarClock,
}

impl std::fmt::Display for ReplicationMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ReplicationMode::LeaderMediated => write!(f, "leader"),
            ReplicationMode::ScalarClock => write!(f, "clock"),
        }
    }
}

/// Timing of the Bully election.
#[derive(Debug, Clone)]
pub struct ElectionConfig {
    /// How long a candidate waits for an answer before declaring itself.
    pub answer_window_ms: u64,
    /// Delay between process start and the first election.
    pub startup_delay_ms: u64,
    /// How often a leader reasserts itself to every peer.
    pub heartbeat_interval_ms: u64,
}

impl Default for ElectionConfig {
    fn default() -> Self {
        Self {
            answer_window_ms: 1000,
            startup_delay_ms: 500,
            heartbeat_interval_ms: 1000,
        }
    }
}

impl ElectionConfig {
    pub fn answer_window(&self) -> Duration {
        Duration::from_millis(self.answer_window_ms)
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.heartbeat_interval_ms)
    }
}

#[derive(Debug, Clone)]
pub struct ReplicationConfig {
    pub mode: ReplicationMode,
    /// Forwarding attempts before a write fails with `NoLeaderAvailable`.
    pub max_attempts: u32,
    pub backoff_base_ms: u64,
    pub backoff_max_ms: u64,
    /// Upper bound on how long one attempt waits for a leader to appear.
    pub leader_wait_ms: u64,
}

impl Default for ReplicationConfig {
    fn default() -> Self {
        Self {
            mode: ReplicationMode::LeaderMediated,
            max_attempts: 5,
            backoff_base_ms: 50,
            backoff_max_ms: 2000,
            leader_wait_ms: 3000,
        }
    }
}

/// Proof-of-work mining loop settings.
#[derive(Debug, Clone)]
pub struct MiningConfig {
    pub enabled: bool,
    /// Required prefix of the hex block digest.
    pub difficulty_prefix: String,
    /// Sleep between checks while the open block has no transactions.
    pub idle_interval_ms: u64,
    /// Nonce attempts between two pauses.
    pub attempts_per_pause: u32,
    pub pause_ms: u64,
}

impl Default for MiningConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            difficulty_prefix: "0".to_string(),
            idle_interval_ms: 500,
            attempts_per_pause: 32,
            pause_ms: 5,
        }
    }
}

#[derive(Debug, Clone)]
pub struct NodeConfig {
    pub node_id: u64,
    pub listen_addr: SocketAddr,
    /// Address other nodes use to reach this one.
    pub advertise_addr: String,
    pub peers: Vec<PeerId>,
    /// Election eligibility number; lower is more eligible.
    pub priority: Option<u32>,
    pub rpc_timeout_ms: u64,
    pub election: ElectionConfig,
    pub replication: ReplicationConfig,
    pub mining: MiningConfig,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            node_id: 1,
            listen_addr: SocketAddr::from(([127, 0, 0, 1], 8001)),
            advertise_addr: "127.0.0.1:8001".to_string(),
            peers: Vec::new(),
            priority: None,
            rpc_timeout_ms: 2000,
            election: ElectionConfig::default(),
            replication: ReplicationConfig::default(),
            mining: MiningConfig::default(),
        }
    }
}

impl NodeConfig {
    pub fn new(node_id: u64, listen_addr: SocketAddr) -> Self {
        Self {
            node_id,
            listen_addr,
            advertise_addr: listen_addr.to_string(),
            ..Default::default()
        }
    }

    pub fn with_peer(mut self, node_id: u64, addr: impl Into<String>) -> Self {
        self.peers.push(PeerId::new(node_id, addr));
        self
    }

    pub fn with_priority(mut self, priority: u32) -> Self {
        self.priority = Some(priority);
        self
    }

    pub fn with_mode(mut self, mode: ReplicationMode) -> Self {
        self.replication.mode = mode;
        self
    }

    /// The configured priority, or a fresh draw from a deliberately tiny range.
    pub fn resolve_priority(&self) -> u32 {
        self.priority
            .unwrap_or_else(|| rand::thread_rng().gen_range(0..=255))
    }

    pub fn rpc_timeout(&self) -> Duration {
        Duration::from_millis(self.rpc_timeout_ms)
    }

    pub fn self_peer(&self) -> PeerId {
        PeerId::new(self.node_id, self.advertise_addr.clone())
    }

    pub fn peer(&self, node_id: u64) -> Option<&PeerId> {
        self.peers.iter().find(|p| p.id == node_id)
    }
}
