use serde::{Deserialize, Serialize};

use crate::error::{BoardError, Result};
use crate::ledger::crypto::{digest_hex, verify, Keypair, PublicKey, Signature};

/// Previous-hash of the very first block on every node.
pub const GENESIS_HASH: &str = "0000000000000000000000000000000000000000000000000000000000000000";

/// One party's endorsement of a transaction payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Signer {
    pub public_key: PublicKey,
    pub signature: Signature,
}

impl Signer {
    pub fn sign(keypair: &Keypair, payload: &str) -> Self {
        Self {
            public_key: keypair.public_key(),
            signature: keypair.sign(payload.as_bytes()),
        }
    }

    pub fn verifies(&self, payload: &str) -> bool {
        verify(payload.as_bytes(), &self.signature, &self.public_key)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    pub payload: String,
    pub signer1: Signer,
    pub signer2: Option<Signer>,
}

impl Transaction {
    pub fn single(keypair: &Keypair, payload: impl Into<String>) -> Self {
        let payload = payload.into();
        Self {
            signer1: Signer::sign(keypair, &payload),
            signer2: None,
            payload,
        }
    }

    /// Every present signature must verify over the payload.
    pub fn is_valid(&self) -> bool {
        self.signer1.verifies(&self.payload)
            && self
                .signer2
                .as_ref()
                .map_or(true, |s| s.verifies(&self.payload))
    }

    pub fn validate(&self) -> Result<()> {
        if !self.signer1.verifies(&self.payload) {
            return Err(BoardError::InvalidTransaction(format!(
                "first signature by {} does not verify",
                self.signer1.public_key
            )));
        }
        if let Some(signer2) = &self.signer2 {
            if !signer2.verifies(&self.payload) {
                return Err(BoardError::InvalidTransaction(format!(
                    "second signature by {} does not verify",
                    signer2.public_key
                )));
            }
        }
        Ok(())
    }

    /// Hex digest of the whole transaction; used as its board key.
    pub fn digest(&self) -> String {
        // Serializing a plain struct of strings cannot fail.
        let bytes = serde_json::to_vec(self).unwrap_or_default();
        digest_hex(&bytes)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Block {
    pub previous_hash: String,
    pub transactions: Vec<Transaction>,
    pub nonce: u64,
}

impl Block {
    pub fn new(previous_hash: impl Into<String>) -> Self {
        Self {
            previous_hash: previous_hash.into(),
            transactions: Vec::new(),
            nonce: 0,
        }
    }

    pub fn genesis() -> Self {
        Self::new(GENESIS_HASH)
    }

    pub fn is_empty(&self) -> bool {
        self.transactions.is_empty()
    }

    /// Digest over `(previous_hash, transactions, nonce)`.
    pub fn hash(&self) -> String {
        self.hash_with_nonce(self.nonce)
    }

    pub fn hash_with_nonce(&self, nonce: u64) -> String {
        let bytes = serde_json::to_vec(&(&self.previous_hash, &self.transactions, nonce))
            .unwrap_or_default();
        digest_hex(&bytes)
    }

    pub fn contains(&self, tx: &Transaction) -> bool {
        self.transactions.iter().any(|t| t == tx)
    }

    /// Fails on the first transaction whose signatures do not verify.
    pub fn validate_transactions(&self) -> Result<()> {
        for (i, tx) in self.transactions.iter().enumerate() {
            tx.validate()
                .map_err(|e| BoardError::InvalidBlock(format!("transaction {}: {}", i, e)))?;
        }
        Ok(())
    }
}

/// Proof-of-work predicate: the hex digest must start with a fixed prefix.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Difficulty {
    prefix: String,
}

impl Difficulty {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into().to_lowercase(),
        }
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    pub fn is_satisfied_by(&self, hash: &str) -> bool {
        hash.starts_with(&self.prefix)
    }

    /// Expected fraction of random digests that satisfy the predicate.
    pub fn selectivity(&self) -> f64 {
        16f64.powi(-(self.prefix.len() as i32))
    }
}

impl Default for Difficulty {
    fn default() -> Self {
        Self::new("0")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::Rng;

    #[test]
    fn single_signed_transaction_is_valid() {
        let keypair = Keypair::generate();
        let tx = Transaction::single(&keypair, "alice pays bob");
        assert!(tx.is_valid());
        assert!(tx.validate().is_ok());
    }

    #[test]
    fn dual_signed_transaction_requires_both_signatures() {
        let alice = Keypair::generate();
        let bob = Keypair::generate();
        let mut tx = Transaction::single(&alice, "shared");
        tx.signer2 = Some(Signer::sign(&bob, "shared"));
        assert!(tx.is_valid());

        // Second signer signed something else.
        tx.signer2 = Some(Signer::sign(&bob, "different"));
        assert!(!tx.is_valid());
        assert!(matches!(tx.validate(), Err(BoardError::InvalidTransaction(_))));
    }

    #[test]
    fn tampered_payload_invalidates_transaction() {
        let keypair = Keypair::generate();
        let mut tx = Transaction::single(&keypair, "amount=10");
        tx.payload = "amount=11".to_string();
        assert!(!tx.is_valid());
    }

    #[test]
    fn digest_changes_with_content() {
        let keypair = Keypair::generate();
        let a = Transaction::single(&keypair, "a");
        let b = Transaction::single(&keypair, "b");
        assert_ne!(a.digest(), b.digest());
        assert_eq!(a.digest(), a.clone().digest());
        assert_eq!(a.digest().len(), 64);
    }

    #[test]
    fn block_hash_depends_on_nonce_and_parent() {
        let block = Block::genesis();
        assert_ne!(block.hash_with_nonce(1), block.hash_with_nonce(2));
        assert_ne!(Block::new("ab").hash(), Block::new("cd").hash());
        assert_eq!(block.hash(), block.hash_with_nonce(0));
    }

    #[test]
    fn difficulty_prefix_predicate() {
        let difficulty = Difficulty::default();
        assert!(difficulty.is_satisfied_by("0abc"));
        assert!(!difficulty.is_satisfied_by("a0bc"));
        assert_eq!(Difficulty::new("00").selectivity(), 1.0 / 256.0);
    }

    #[test]
    fn acceptance_rate_matches_selectivity() {
        let keypair = Keypair::generate();
        let mut block = Block::genesis();
        block.transactions.push(Transaction::single(&keypair, "payload"));

        let difficulty = Difficulty::default();
        let trials = 8_000;
        let mut rng = rand::thread_rng();
        let accepted = (0..trials)
            .filter(|_| difficulty.is_satisfied_by(&block.hash_with_nonce(rng.gen())))
            .count();

        // Expected 500 (1/16); standard deviation is about 22.
        let expected = trials as f64 * difficulty.selectivity();
        let deviation = (accepted as f64 - expected).abs();
        assert!(
            deviation < 120.0,
            "accepted {} of {} trials, expected about {}",
            accepted,
            trials,
            expected
        );
    }

    #[test]
    fn block_validation_reports_offending_transaction() {
        let keypair = Keypair::generate();
        let mut block = Block::genesis();
        block.transactions.push(Transaction::single(&keypair, "ok"));
        let mut bad = Transaction::single(&keypair, "bad");
        bad.payload.push('!');
        block.transactions.push(bad);

        let err = block.validate_transactions().unwrap_err();
        assert!(err.to_string().contains("transaction 1"));
    }
}
