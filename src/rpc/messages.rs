use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use uuid::Uuid;

use crate::board::{BoardVersion, Snapshot, WriteOp};
use crate::error::Result;
use crate::ledger::{Block, PublicKey, SignRequestMessage, Transaction};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ElectionProposal {
    pub from_id: u64,
    pub priority: u32,
    pub round: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ElectionAnswer {
    pub from_id: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CoordinatorAnnouncement {
    pub from_id: u64,
    pub priority: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PubkeyAnnouncement {
    #[serde(alias = "ip")]
    pub addr: String,
    pub public_key: PublicKey,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignRequestDecision {
    pub accept: bool,
}

/// Payload of `board/write`: either a write forwarded to the leader, or a
/// clock-stamped full snapshot broadcast by the writer itself.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum BoardWrite {
    Forward { op: WriteOp },
    Clocked { clock: u64, snapshot: Snapshot },
}

/// Payload of `board/snapshot`: the sender's whole board, who sent it and
/// where the board sits in the write history. Leaders push one after every
/// write and on each heartbeat.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LeaderSnapshot {
    pub from_id: u64,
    pub priority: u32,
    pub version: BoardVersion,
    pub snapshot: Snapshot,
}

/// Result of a client write.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WriteReceipt {
    pub key: String,
    /// Node that applied the write first; `None` in scalar-clock mode.
    pub leader: Option<u64>,
    /// Clock stamped on the write in scalar-clock mode.
    pub clock: Option<u64>,
    /// Peers that acknowledged the propagated state.
    pub replicated_to: usize,
    pub attempts: u32,
}

/// Every operation of the peer RPC surface.
#[derive(Debug, Clone)]
pub enum PeerRequest {
    ElectionPropose(ElectionProposal),
    ElectionAnswer(ElectionAnswer),
    ElectionCoordinator(CoordinatorAnnouncement),
    PubkeyAnnounce(PubkeyAnnouncement),
    BlockSubmit(Block),
    TransactionSubmit(Transaction),
    SignRequestSubmit(SignRequestMessage),
    SignRequestApprove { id: Uuid, accept: bool },
    BoardWrite(BoardWrite),
    BoardSnapshot(LeaderSnapshot),
}

impl PeerRequest {
    /// Endpoint path, without the leading slash.
    pub fn path(&self) -> String {
        match self {
            PeerRequest::ElectionPropose(_) => "election/propose".to_string(),
            PeerRequest::ElectionAnswer(_) => "election/answer".to_string(),
            PeerRequest::ElectionCoordinator(_) => "election/coordinator".to_string(),
            PeerRequest::PubkeyAnnounce(_) => "pubkey/announce".to_string(),
            PeerRequest::BlockSubmit(_) => "block/submit".to_string(),
            PeerRequest::TransactionSubmit(_) => "transaction/submit".to_string(),
            PeerRequest::SignRequestSubmit(_) => "signrequest/submit".to_string(),
            PeerRequest::SignRequestApprove { id, .. } => format!("signrequest/approve/{}", id),
            PeerRequest::BoardWrite(_) => "board/write".to_string(),
            PeerRequest::BoardSnapshot(_) => "board/snapshot".to_string(),
        }
    }

    /// JSON body posted to [`Self::path`].
    pub fn body(&self) -> Result<Value> {
        let body = match self {
            PeerRequest::ElectionPropose(m) => serde_json::to_value(m)?,
            PeerRequest::ElectionAnswer(m) => serde_json::to_value(m)?,
            PeerRequest::ElectionCoordinator(m) => serde_json::to_value(m)?,
            PeerRequest::PubkeyAnnounce(m) => serde_json::to_value(m)?,
            PeerRequest::BlockSubmit(b) => serde_json::to_value(b)?,
            PeerRequest::TransactionSubmit(tx) => serde_json::to_value(tx)?,
            PeerRequest::SignRequestSubmit(m) => serde_json::to_value(m)?,
            PeerRequest::SignRequestApprove { accept, .. } => json!({ "accept": accept }),
            PeerRequest::BoardWrite(w) => serde_json::to_value(w)?,
            PeerRequest::BoardSnapshot(s) => serde_json::to_value(s)?,
        };
        Ok(body)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum PeerResponse {
    Ack,
    WriteAccepted(WriteReceipt),
    ClockedUpdate { applied: bool },
    SignRequestQueued { id: Uuid },
    SignRequestResolved { transaction: Option<Transaction> },
    /// The receiver holds a newer board than the one pushed to it.
    SnapshotKept {
        version: BoardVersion,
        snapshot: Snapshot,
    },
    /// The receiver leads the cluster itself and outranks the sender.
    LeaderRefused { leader: u64 },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn paths_match_endpoint_table() {
        let id = Uuid::nil();
        assert_eq!(
            PeerRequest::ElectionPropose(ElectionProposal {
                from_id: 1,
                priority: 2,
                round: 3
            })
            .path(),
            "election/propose"
        );
        assert_eq!(
            PeerRequest::SignRequestApprove { id, accept: true }.path(),
            format!("signrequest/approve/{}", id)
        );
        assert_eq!(
            PeerRequest::BoardSnapshot(LeaderSnapshot {
                from_id: 1,
                priority: 4,
                version: BoardVersion::default(),
                snapshot: Snapshot::default(),
            })
            .path(),
            "board/snapshot"
        );
    }

    #[test]
    fn approve_body_carries_only_decision() {
        let body = PeerRequest::SignRequestApprove {
            id: Uuid::new_v4(),
            accept: false,
        }
        .body()
        .unwrap();
        assert_eq!(body, json!({ "accept": false }));
    }

    #[test]
    fn board_write_is_tagged_by_mode() {
        let body = PeerRequest::BoardWrite(BoardWrite::Clocked {
            clock: 7,
            snapshot: Snapshot::default(),
        })
        .body()
        .unwrap();
        assert_eq!(body["mode"], "clocked");
        assert_eq!(body["clock"], 7);
    }

    #[test]
    fn kept_reply_carries_the_newer_board() {
        let response = PeerResponse::SnapshotKept {
            version: BoardVersion {
                term: 2,
                leader: 3,
                seq: 5,
            },
            snapshot: [("k".to_string(), "v".to_string())].into_iter().collect(),
        };
        let json = serde_json::to_value(&response).unwrap();
        assert_eq!(json["status"], "snapshot_kept");
        assert_eq!(json["version"]["term"], 2);
        assert_eq!(json["snapshot"]["entries"]["k"], "v");
        let back: PeerResponse = serde_json::from_value(json).unwrap();
        assert_eq!(back, response);
    }

    #[test]
    fn pubkey_announcement_accepts_ip_field() {
        let key = crate::ledger::Keypair::generate().public_key();
        let json = json!({ "ip": "10.1.0.2:80", "public_key": key.to_hex() });
        let parsed: PubkeyAnnouncement = serde_json::from_value(json).unwrap();
        assert_eq!(parsed.addr, "10.1.0.2:80");
        assert_eq!(parsed.public_key, key);
    }

    #[test]
    fn response_round_trips_through_json() {
        let response = PeerResponse::WriteAccepted(WriteReceipt {
            key: "k".to_string(),
            leader: Some(2),
            clock: None,
            replicated_to: 2,
            attempts: 1,
        });
        let json = serde_json::to_value(&response).unwrap();
        assert_eq!(json["status"], "write_accepted");
        assert_eq!(json["leader"], 2);
        let back: PeerResponse = serde_json::from_value(json).unwrap();
        assert_eq!(back, response);
    }
}
