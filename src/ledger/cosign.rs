use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, RwLock};
use uuid::Uuid;

use crate::error::{BoardError, Result};
use crate::ledger::block::{Signer, Transaction};
use crate::ledger::crypto::{verify, Keypair, PublicKey, Signature};

/// Wire form of a request asking a counterpart to co-sign a payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignRequestMessage {
    pub payload: String,
    pub signature: Signature,
    pub public_key: PublicKey,
}

/// A sign request waiting for an operator's decision.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignRequest {
    pub id: Uuid,
    pub payload: String,
    pub signature: Signature,
    pub public_key: PublicKey,
    pub received_at: DateTime<Utc>,
}

/// Verifying keys announced by peers, keyed by their address.
#[derive(Debug, Default)]
pub struct KeyDirectory {
    keys: RwLock<HashMap<String, PublicKey>>,
}

impl KeyDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register or replace the key announced for `addr`.
    pub async fn announce(&self, addr: impl Into<String>, public_key: PublicKey) -> Option<PublicKey> {
        self.keys.write().await.insert(addr.into(), public_key)
    }

    pub async fn get(&self, addr: &str) -> Option<PublicKey> {
        self.keys.read().await.get(addr).copied()
    }

    pub async fn is_known(&self, public_key: &PublicKey) -> bool {
        self.keys.read().await.values().any(|k| k == public_key)
    }

    pub async fn len(&self) -> usize {
        self.keys.read().await.len()
    }
}

/// This node's half of the dual-signature protocol.
#[derive(Debug)]
pub struct CoSigner {
    keypair: Keypair,
    pending: Mutex<HashMap<Uuid, SignRequest>>,
}

impl CoSigner {
    pub fn new(keypair: Keypair) -> Self {
        Self {
            keypair,
            pending: Mutex::new(HashMap::new()),
        }
    }

    pub fn public_key(&self) -> PublicKey {
        self.keypair.public_key()
    }

    /// Sign a payload as the initiating party.
    pub fn initiate(&self, payload: impl Into<String>) -> SignRequestMessage {
        let payload = payload.into();
        SignRequestMessage {
            signature: self.keypair.sign(payload.as_bytes()),
            public_key: self.keypair.public_key(),
            payload,
        }
    }

    /// Queue an incoming request for approval. The initiator must have
    /// announced its key and its signature must verify.
    pub async fn submit(&self, message: SignRequestMessage, directory: &KeyDirectory) -> Result<Uuid> {
        if !directory.is_known(&message.public_key).await {
            return Err(BoardError::UnknownSigner(message.public_key.to_hex()));
        }
        if !verify(message.payload.as_bytes(), &message.signature, &message.public_key) {
            return Err(BoardError::InvalidTransaction(
                "initiator signature does not verify".to_string(),
            ));
        }

        let request = SignRequest {
            id: Uuid::new_v4(),
            payload: message.payload,
            signature: message.signature,
            public_key: message.public_key,
            received_at: Utc::now(),
        };
        let id = request.id;
        self.pending.lock().await.insert(id, request);
        tracing::info!(request_id = %id, "Sign request queued for approval");
        Ok(id)
    }

    /// Resolve a pending request. Accepting co-signs and returns the completed
    /// transaction; declining just drops the request.
    pub async fn approve(&self, id: Uuid, accept: bool) -> Result<Option<Transaction>> {
        let request = self
            .pending
            .lock()
            .await
            .remove(&id)
            .ok_or(BoardError::SignRequestNotFound(id))?;

        if !accept {
            tracing::info!(request_id = %id, "Sign request declined");
            return Ok(None);
        }

        let tx = Transaction {
            signer1: Signer {
                public_key: request.public_key,
                signature: request.signature,
            },
            signer2: Some(Signer::sign(&self.keypair, &request.payload)),
            payload: request.payload,
        };
        tracing::info!(request_id = %id, digest = %tx.digest(), "Sign request co-signed");
        Ok(Some(tx))
    }

    /// Pending requests, oldest first.
    pub async fn pending(&self) -> Vec<SignRequest> {
        let mut requests: Vec<_> = self.pending.lock().await.values().cloned().collect();
        requests.sort_by_key(|r| r.received_at);
        requests
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn full_cosign_flow_produces_valid_transaction() {
        let alice = CoSigner::new(Keypair::generate());
        let bob = CoSigner::new(Keypair::generate());
        let directory = KeyDirectory::new();
        directory.announce("10.1.0.1:80", alice.public_key()).await;

        let message = alice.initiate("alice and bob agree");
        let id = bob.submit(message, &directory).await.unwrap();
        assert_eq!(bob.pending().await.len(), 1);

        let tx = bob.approve(id, true).await.unwrap().expect("accepted");
        assert!(tx.is_valid());
        assert_eq!(tx.signer1.public_key, alice.public_key());
        assert_eq!(tx.signer2.as_ref().map(|s| s.public_key), Some(bob.public_key()));
        assert!(bob.pending().await.is_empty());
    }

    #[tokio::test]
    async fn declined_request_is_dropped() {
        let alice = CoSigner::new(Keypair::generate());
        let bob = CoSigner::new(Keypair::generate());
        let directory = KeyDirectory::new();
        directory.announce("a", alice.public_key()).await;

        let id = bob.submit(alice.initiate("no"), &directory).await.unwrap();
        assert!(bob.approve(id, false).await.unwrap().is_none());
        assert!(matches!(
            bob.approve(id, true).await,
            Err(BoardError::SignRequestNotFound(_))
        ));
    }

    #[tokio::test]
    async fn unannounced_initiator_is_rejected() {
        let alice = CoSigner::new(Keypair::generate());
        let bob = CoSigner::new(Keypair::generate());
        let directory = KeyDirectory::new();

        let err = bob.submit(alice.initiate("hi"), &directory).await.unwrap_err();
        assert!(matches!(err, BoardError::UnknownSigner(_)));
    }

    #[tokio::test]
    async fn forged_initiator_signature_is_rejected() {
        let alice = CoSigner::new(Keypair::generate());
        let bob = CoSigner::new(Keypair::generate());
        let directory = KeyDirectory::new();
        directory.announce("a", alice.public_key()).await;

        let mut message = alice.initiate("pay 1");
        message.payload = "pay 100".to_string();
        assert!(matches!(
            bob.submit(message, &directory).await,
            Err(BoardError::InvalidTransaction(_))
        ));
        assert!(bob.pending().await.is_empty());
    }

    #[tokio::test]
    async fn key_directory_replaces_announcement() {
        let directory = KeyDirectory::new();
        let k1 = Keypair::generate().public_key();
        let k2 = Keypair::generate().public_key();

        assert!(directory.announce("a", k1).await.is_none());
        assert_eq!(directory.announce("a", k2).await, Some(k1));
        assert_eq!(directory.get("a").await, Some(k2));
        assert!(!directory.is_known(&k1).await);
        assert_eq!(directory.len().await, 1);
    }
}
