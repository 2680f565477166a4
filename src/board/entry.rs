use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A single key/value pair installed on the board.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BoardEntry {
    pub key: String,
    pub value: String,
}

/// The complete board content, shipped as a whole during replication.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Snapshot {
    pub entries: BTreeMap<String, String>,
}

impl Snapshot {
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries.get(key).map(String::as_str)
    }
}

impl FromIterator<(String, String)> for Snapshot {
    fn from_iter<I: IntoIterator<Item = (String, String)>>(iter: I) -> Self {
        Self {
            entries: iter.into_iter().collect(),
        }
    }
}

/// Position of a leader-produced board in the write history.
///
/// A node starts a new `term` the first time it writes as leader on top of a
/// board another node produced. The derived ordering compares term, then
/// leader, then `seq`, so a board from a later leadership always wins over
/// one from an earlier leadership regardless of how many writes each holds.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct BoardVersion {
    pub term: u64,
    pub leader: u64,
    pub seq: u64,
}

impl BoardVersion {
    /// Version of the next write by `leader` on top of this board.
    pub fn next(&self, leader: u64) -> Self {
        if self.leader == leader {
            Self {
                seq: self.seq + 1,
                ..*self
            }
        } else {
            Self {
                term: self.term + 1,
                leader,
                seq: 1,
            }
        }
    }

    /// True when this board was not produced along the history of `sent`:
    /// it belongs to a later term, or to another leader of the same term.
    pub fn diverges_from(&self, sent: &BoardVersion) -> bool {
        self.term > sent.term || (self.term == sent.term && self.leader != sent.leader)
    }
}

impl std::fmt::Display for BoardVersion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}.{}", self.term, self.leader, self.seq)
    }
}

/// A client mutation of the board.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum WriteOp {
    Add { key: String, value: String },
    Modify { key: String, value: String },
    Delete { key: String },
}

impl WriteOp {
    /// An insertion under a freshly drawn key. The key is fixed here so that
    /// retried forwards of the same op stay idempotent.
    pub fn add(value: impl Into<String>) -> Self {
        WriteOp::Add {
            key: Uuid::new_v4().simple().to_string(),
            value: value.into(),
        }
    }

    pub fn modify(key: impl Into<String>, value: impl Into<String>) -> Self {
        WriteOp::Modify {
            key: key.into(),
            value: value.into(),
        }
    }

    pub fn delete(key: impl Into<String>) -> Self {
        WriteOp::Delete { key: key.into() }
    }

    pub fn key(&self) -> &str {
        match self {
            WriteOp::Add { key, .. } | WriteOp::Modify { key, .. } | WriteOp::Delete { key } => key,
        }
    }
}

impl std::fmt::Display for WriteOp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            WriteOp::Add { key, .. } => write!(f, "add {}", key),
            WriteOp::Modify { key, .. } => write!(f, "modify {}", key),
            WriteOp::Delete { key } => write!(f, "delete {}", key),
        }
    }
}
