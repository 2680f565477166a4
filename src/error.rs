use thiserror::Error;
use uuid::Uuid;

#[derive(Error, Debug)]
pub enum BoardError {
    #[error("Not the leader, current leader is node {0:?}")]
    NotLeader(Option<u64>),

    #[error("No leader available after {attempts} attempts")]
    NoLeaderAvailable { attempts: u32 },

    #[error("Transport error talking to node {peer}: {reason}")]
    Transport { peer: u64, reason: String },

    #[error("Node {peer} rejected the request ({status}): {message}")]
    Remote {
        peer: u64,
        status: u16,
        message: String,
    },

    #[error("Board superseded by a newer one, adopted under term {term}")]
    Superseded { term: u64 },

    #[error("Unknown peer: {0}")]
    UnknownPeer(u64),

    #[error("Entry not found: {0}")]
    EntryNotFound(String),

    #[error("Invalid transaction: {0}")]
    InvalidTransaction(String),

    #[error("Invalid block: {0}")]
    InvalidBlock(String),

    #[error("Sign request not found: {0}")]
    SignRequestNotFound(Uuid),

    #[error("Unknown signer: {0}")]
    UnknownSigner(String),

    #[error("Crypto error: {0}")]
    Crypto(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl BoardError {
    /// True for failures caused by an unreachable or misbehaving peer, as
    /// opposed to a rejection of the request itself.
    pub fn is_transport(&self) -> bool {
        matches!(self, BoardError::Transport { .. } | BoardError::Http(_))
    }

    /// True when a forwarded write should go back through leader discovery:
    /// the peer was unreachable, is no longer the leader, had to catch up on
    /// a newer board, or failed internally.
    pub fn is_retryable(&self) -> bool {
        match self {
            BoardError::Transport { .. }
            | BoardError::Http(_)
            | BoardError::NotLeader(_)
            | BoardError::Superseded { .. } => true,
            BoardError::Remote { status, .. } => *status == 409 || *status >= 500,
            _ => false,
        }
    }
}

pub type Result<T> = std::result::Result<T, BoardError>;
