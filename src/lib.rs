//! In-memory proof-of-work ledger
//!
//! Transfers are queued in a pending pool and sealed into hash-linked blocks
//! by a brute-force proof-of-work search. Balances are computed by scanning
//! the whole chain.

pub mod blockchain;
pub mod config;

pub use blockchain::{Amount, Block, BlockHash, Blockchain, ChainError, Transaction};
pub use config::{ConfigError, LedgerConfig};
