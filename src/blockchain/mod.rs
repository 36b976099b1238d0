// Blockchain module
//
// This module contains the ledger engine:
// - Hash type and difficulty predicate
// - Transaction structure
// - Block structure
// - Blockchain structure with proof of work and balances

pub mod block;
pub mod chain;
pub mod crypto;
pub mod transaction;

// Re-export main components for easier access
pub use block::Block;
pub use chain::{is_valid_proof, Blockchain, ChainError};
pub use crypto::BlockHash;
pub use transaction::{Amount, Transaction};
