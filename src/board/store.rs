use std::collections::BTreeMap;

use tokio::sync::RwLock;

use crate::board::entry::{BoardEntry, BoardVersion, Snapshot, WriteOp};
use crate::error::{BoardError, Result};

/// What a follower did with a leader's snapshot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SnapshotInstall {
    /// The incoming board was newer and replaced the local one.
    Installed,
    /// The incoming board was the one already held.
    Current,
    /// The local board is newer; it is returned so the sender can catch up.
    Kept {
        version: BoardVersion,
        snapshot: Snapshot,
    },
}

#[derive(Debug, Default)]
struct Content {
    entries: BTreeMap<String, String>,
    version: BoardVersion,
}

impl Content {
    fn snapshot(&self) -> Snapshot {
        Snapshot {
            entries: self.entries.clone(),
        }
    }
}

/// The materialized key/value store every replication strategy updates.
#[derive(Debug, Default)]
pub struct Blackboard {
    content: RwLock<Content>,
}

impl Blackboard {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn get(&self, key: &str) -> Option<String> {
        self.content.read().await.entries.get(key).cloned()
    }

    pub async fn len(&self) -> usize {
        self.content.read().await.entries.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.content.read().await.entries.is_empty()
    }

    pub async fn version(&self) -> BoardVersion {
        self.content.read().await.version
    }

    /// Entries in key order.
    pub async fn entries(&self) -> Vec<BoardEntry> {
        self.content
            .read()
            .await
            .entries
            .iter()
            .map(|(key, value)| BoardEntry {
                key: key.clone(),
                value: value.clone(),
            })
            .collect()
    }

    /// Insert or overwrite a single entry, returning the previous value.
    pub async fn insert(&self, key: impl Into<String>, value: impl Into<String>) -> Option<String> {
        self.content
            .write()
            .await
            .entries
            .insert(key.into(), value.into())
    }

    pub async fn remove(&self, key: &str) -> Result<String> {
        self.content
            .write()
            .await
            .entries
            .remove(key)
            .ok_or_else(|| BoardError::EntryNotFound(key.to_string()))
    }

    /// Apply a client mutation. Modify and delete require the key to exist.
    pub async fn apply(&self, op: &WriteOp) -> Result<()> {
        let mut content = self.content.write().await;
        apply_to(&mut content.entries, op)
    }

    /// Apply a mutation and capture the resulting state under the same lock.
    pub async fn apply_and_snapshot(&self, op: &WriteOp) -> Result<Snapshot> {
        let mut content = self.content.write().await;
        apply_to(&mut content.entries, op)?;
        Ok(content.snapshot())
    }

    /// Apply a mutation as `leader` and stamp the result with the next version.
    pub async fn apply_versioned(&self, op: &WriteOp, leader: u64) -> Result<(BoardVersion, Snapshot)> {
        let mut content = self.content.write().await;
        apply_to(&mut content.entries, op)?;
        content.version = content.version.next(leader);
        Ok((content.version, content.snapshot()))
    }

    pub async fn snapshot(&self) -> Snapshot {
        self.content.read().await.snapshot()
    }

    pub async fn versioned_snapshot(&self) -> (BoardVersion, Snapshot) {
        let content = self.content.read().await;
        (content.version, content.snapshot())
    }

    /// Overwrite the whole board. No merge with the local state.
    pub async fn replace(&self, snapshot: Snapshot) {
        self.content.write().await.entries = snapshot.entries;
    }

    /// Install a leader's board unless the local one is newer. The incoming
    /// board still replaces the local one wholesale.
    pub async fn install_versioned(&self, version: BoardVersion, snapshot: Snapshot) -> SnapshotInstall {
        let mut content = self.content.write().await;
        if version < content.version {
            return SnapshotInstall::Kept {
                version: content.version,
                snapshot: content.snapshot(),
            };
        }
        if version == content.version {
            return SnapshotInstall::Current;
        }
        content.entries = snapshot.entries;
        content.version = version;
        SnapshotInstall::Installed
    }

    /// Take over a newer board found on a peer, opening a fresh term for
    /// `leader` above both the peer's version and the local one.
    pub async fn adopt(&self, found: BoardVersion, snapshot: Snapshot, leader: u64) -> BoardVersion {
        let mut content = self.content.write().await;
        content.version = BoardVersion {
            term: found.term.max(content.version.term) + 1,
            leader,
            seq: 0,
        };
        content.entries = snapshot.entries;
        content.version
    }
}

fn apply_to(content: &mut BTreeMap<String, String>, op: &WriteOp) -> Result<()> {
    match op {
        WriteOp::Add { key, value } => {
            content.insert(key.clone(), value.clone());
        }
        WriteOp::Modify { key, value } => match content.get_mut(key) {
            Some(existing) => *existing = value.clone(),
            None => return Err(BoardError::EntryNotFound(key.clone())),
        },
        WriteOp::Delete { key } => {
            if content.remove(key).is_none() {
                return Err(BoardError::EntryNotFound(key.clone()));
            }
        }
    }
    Ok(())
}
