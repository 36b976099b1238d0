use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::crypto::BlockHash;
use super::transaction::Transaction;

/// Represents a block in the blockchain
///
/// A block never changes after construction. Its hash is derived on demand
/// from the canonical serialization of its fields and is not stored.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Block {
    /// Timestamp when the block was created
    timestamp: DateTime<Utc>,

    /// Proof of work (nonce)
    nonce: u64,

    /// Hash of the previous block
    previous_hash: BlockHash,

    /// List of transactions included in this block, in hashing order
    transactions: Vec<Transaction>,
}

impl Block {
    /// Creates a new block stamped with the current time
    ///
    /// No validation happens here; whether `nonce` is an acceptable proof is
    /// checked by the chain before the block is built.
    ///
    /// # Arguments
    ///
    /// * `nonce` - The proof of work (nonce)
    /// * `previous_hash` - The hash of the previous block
    /// * `transactions` - The transactions to include in the block
    pub fn new(nonce: u64, previous_hash: BlockHash, transactions: Vec<Transaction>) -> Self {
        Block {
            timestamp: Utc::now(),
            nonce,
            previous_hash,
            transactions,
        }
    }

    /// Creates a proof-of-work guess block
    ///
    /// The timestamp is pinned to the Unix epoch so a guess hash depends only
    /// on the nonce, the previous hash and the transactions.
    pub fn guess(nonce: u64, previous_hash: BlockHash, transactions: Vec<Transaction>) -> Self {
        Block {
            timestamp: DateTime::<Utc>::default(),
            nonce,
            previous_hash,
            transactions,
        }
    }

    /// Gets the creation timestamp
    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    /// Gets the nonce
    pub fn nonce(&self) -> u64 {
        self.nonce
    }

    /// Gets the hash of the previous block
    pub fn previous_hash(&self) -> &BlockHash {
        &self.previous_hash
    }

    /// Gets the transactions in the block
    pub fn transactions(&self) -> &[Transaction] {
        &self.transactions
    }

    /// Calculates the hash of the block
    ///
    /// # Returns
    ///
    /// The SHA-256 hash of the canonical serialization of the block
    pub fn hash(&self) -> BlockHash {
        BlockHash::digest(self.canonical_string().as_bytes())
    }

    /// Compact JSON with sorted keys, fed to SHA-256 by [`Block::hash`]
    pub(crate) fn canonical_string(&self) -> String {
        let transactions: Vec<serde_json::Value> = self
            .transactions
            .iter()
            .map(Transaction::canonical_json)
            .collect();

        // Object keys are emitted in sorted order, so the encoding is stable
        let block_data = serde_json::json!({
            "timestamp": self.timestamp,
            "nonce": self.nonce,
            "previous_hash": self.previous_hash.to_hex(),
            "transactions": transactions,
        });

        block_data.to_string()
    }

    /// Renders a human-readable description of the block
    pub fn render(&self) -> String {
        let mut out = format!(
            "timestamp        {}\nprevious hash    {}\nnonce            {}\n",
            self.timestamp.to_rfc3339(),
            self.previous_hash,
            self.nonce
        );

        for transaction in &self.transactions {
            out.push_str(&transaction.render());
        }

        out
    }
}
