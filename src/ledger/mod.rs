//! Signed transactions, proof-of-work blocks and the co-signing workflow.

pub mod block;
pub mod chain;
pub mod cosign;
pub mod crypto;
pub mod miner;

pub use block::{Block, Difficulty, Signer, Transaction, GENESIS_HASH};
pub use chain::{ForeignBlockOutcome, Ledger, SealedBlock};
pub use cosign::{CoSigner, KeyDirectory, SignRequest, SignRequestMessage};
pub use crypto::{digest, digest_hex, verify, Keypair, PublicKey, Signature};
pub use miner::Miner;
