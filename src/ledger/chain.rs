use std::sync::Arc;

use serde::Serialize;
use tokio::sync::{Mutex, RwLock};

use crate::board::Blackboard;
use crate::error::{BoardError, Result};
use crate::ledger::block::{Block, Difficulty, Transaction};

/// A block whose nonce satisfied the difficulty predicate.
#[derive(Debug, Clone, Serialize)]
pub struct SealedBlock {
    pub hash: String,
    pub block: Block,
}

/// What happened when a peer's block was installed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ForeignBlockOutcome {
    pub hash: String,
    /// Transactions written to the board.
    pub applied: usize,
    /// Locally pending transactions dropped because the block did not carry them.
    pub discarded: usize,
    /// The block was already part of the local chain.
    pub duplicate: bool,
}

/// Append-only chain of sealed blocks plus the one open block that collects
/// pending transactions.
///
/// Lock order is open block, then chain, then board. Sealing and foreign
/// block installation both hold the open block for their whole duration.
#[derive(Debug)]
pub struct Ledger {
    difficulty: Difficulty,
    open_block: Mutex<Block>,
    chain: RwLock<Vec<SealedBlock>>,
    board: Arc<Blackboard>,
}

impl Ledger {
    pub fn new(board: Arc<Blackboard>, difficulty: Difficulty) -> Self {
        Self {
            difficulty,
            open_block: Mutex::new(Block::genesis()),
            chain: RwLock::new(Vec::new()),
            board,
        }
    }

    pub fn difficulty(&self) -> &Difficulty {
        &self.difficulty
    }

    /// Validate and queue a transaction in the open block. Returns false when
    /// the identical transaction is already pending or already sealed, which
    /// happens when a peer's block overtakes the transaction broadcast.
    pub async fn add_transaction(&self, tx: Transaction) -> Result<bool> {
        tx.validate()?;

        let mut open = self.open_block.lock().await;
        if open.contains(&tx) {
            return Ok(false);
        }
        if self
            .chain
            .read()
            .await
            .iter()
            .any(|sealed| sealed.block.contains(&tx))
        {
            tracing::debug!(digest = %tx.digest(), "Transaction already sealed");
            return Ok(false);
        }
        tracing::debug!(digest = %tx.digest(), "Transaction added to open block");
        open.transactions.push(tx);
        Ok(true)
    }

    pub async fn open_block(&self) -> Block {
        self.open_block.lock().await.clone()
    }

    pub async fn pending_len(&self) -> usize {
        self.open_block.lock().await.transactions.len()
    }

    /// Hash the next block will reference.
    pub async fn tip_hash(&self) -> String {
        self.open_block.lock().await.previous_hash.clone()
    }

    pub async fn height(&self) -> usize {
        self.chain.read().await.len()
    }

    pub async fn blocks(&self) -> Vec<SealedBlock> {
        self.chain.read().await.clone()
    }

    /// Try one nonce against the open block. On success the block is sealed,
    /// its transactions land on the board keyed by their digest, and a fresh
    /// empty block referencing the new hash is opened.
    pub async fn try_seal(&self, nonce: u64) -> Option<SealedBlock> {
        let mut open = self.open_block.lock().await;
        if open.is_empty() {
            return None;
        }

        let hash = open.hash_with_nonce(nonce);
        if !self.difficulty.is_satisfied_by(&hash) {
            return None;
        }

        open.nonce = nonce;
        let block = std::mem::replace(&mut *open, Block::new(hash.clone()));
        let sealed = SealedBlock { hash, block };

        self.chain.write().await.push(sealed.clone());
        self.apply_to_board(&sealed.block).await;

        tracing::info!(
            block_hash = %sealed.hash,
            nonce,
            transactions = sealed.block.transactions.len(),
            "Sealed block"
        );
        Some(sealed)
    }

    /// Install a block mined by a peer.
    ///
    /// The block is rejected as a whole when its digest misses the difficulty
    /// or any transaction fails verification. Otherwise it becomes the new tip
    /// regardless of the local tip, and pending transactions it does not carry
    /// are dropped.
    pub async fn accept_foreign_block(&self, block: Block) -> Result<ForeignBlockOutcome> {
        let hash = block.hash();
        if !self.difficulty.is_satisfied_by(&hash) {
            return Err(BoardError::InvalidBlock(format!(
                "digest {} does not satisfy difficulty prefix {:?}",
                hash,
                self.difficulty.prefix()
            )));
        }
        block.validate_transactions()?;

        let mut open = self.open_block.lock().await;
        let mut chain = self.chain.write().await;

        if chain.iter().any(|sealed| sealed.hash == hash) {
            return Ok(ForeignBlockOutcome {
                hash,
                applied: 0,
                discarded: 0,
                duplicate: true,
            });
        }

        if open.previous_hash != block.previous_hash {
            tracing::debug!(
                local_tip = %open.previous_hash,
                foreign_parent = %block.previous_hash,
                "Foreign block does not extend local tip, replacing it"
            );
        }

        let discarded = open
            .transactions
            .iter()
            .filter(|tx| !block.contains(tx))
            .count();
        if discarded > 0 {
            tracing::warn!(discarded, "Dropping pending transactions not in foreign block");
        }

        *open = Block::new(hash.clone());
        chain.push(SealedBlock {
            hash: hash.clone(),
            block: block.clone(),
        });
        drop(chain);

        self.apply_to_board(&block).await;

        tracing::info!(block_hash = %hash, transactions = block.transactions.len(), "Accepted foreign block");
        Ok(ForeignBlockOutcome {
            hash,
            applied: block.transactions.len(),
            discarded,
            duplicate: false,
        })
    }

    async fn apply_to_board(&self, block: &Block) {
        for tx in &block.transactions {
            self.board.insert(tx.digest(), tx.payload.clone()).await;
        }
    }
}
