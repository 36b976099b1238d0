//! Ledger configuration

use serde::{Deserialize, Deserializer};
use thiserror::Error;

use std::fs;
use std::path::Path;

use crate::blockchain::Amount;

/// Number of leading zero hex characters a proof must produce
pub const MINING_DIFFICULTY: usize = 3;

/// Sender identifier of synthesized mining rewards
pub const MINING_SENDER: &str = "THE BLOCKCHAIN";

/// Largest usable difficulty: a SHA-256 digest renders as 64 hex characters
pub const MAX_DIFFICULTY: usize = 64;

/// Errors that can occur while loading a configuration
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Invalid difficulty: {0} (maximum: 64)")]
    InvalidDifficulty(usize),

    #[error("Reward sender must not be empty")]
    EmptyRewardSender,
}

/// Tunables of a ledger
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct LedgerConfig {
    /// Mining difficulty (number of leading zeros required in a guess hash)
    pub difficulty: usize,

    /// Amount credited to the ledger owner per mined block
    #[serde(deserialize_with = "deserialize_amount")]
    pub mining_reward: Amount,

    /// Sender recorded on reward transactions
    pub reward_sender: String,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        LedgerConfig {
            difficulty: MINING_DIFFICULTY,
            mining_reward: Amount::ONE,
            reward_sender: MINING_SENDER.to_string(),
        }
    }
}

impl LedgerConfig {
    /// Parses and validates a configuration from TOML text
    ///
    /// Missing keys fall back to their defaults.
    pub fn from_toml_str(s: &str) -> Result<Self, ConfigError> {
        let config: LedgerConfig = toml::from_str(s)?;
        config.validate()?;
        Ok(config)
    }

    /// Loads and validates a configuration from a TOML file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let contents = fs::read_to_string(path)?;
        Self::from_toml_str(&contents)
    }

    /// Validates the configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.difficulty > MAX_DIFFICULTY {
            return Err(ConfigError::InvalidDifficulty(self.difficulty));
        }

        if self.reward_sender.is_empty() {
            return Err(ConfigError::EmptyRewardSender);
        }

        Ok(())
    }
}

/// Accepts `1`, `1.5` or `"1.5"` for an amount
fn deserialize_amount<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Amount, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum RawAmount {
        Int(i64),
        Float(f64),
        Text(String),
    }

    let amount = match RawAmount::deserialize(deserializer)? {
        RawAmount::Int(value) => Amount::checked_from_num(value),
        RawAmount::Float(value) => Amount::checked_from_num(value),
        RawAmount::Text(value) => value.parse::<Amount>().ok(),
    };

    amount.ok_or_else(|| serde::de::Error::custom("amount out of range"))
}
