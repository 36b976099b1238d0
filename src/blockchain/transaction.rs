use fixed::types::I32F32;
use serde::{Deserialize, Serialize};

use std::fmt;

/// Signed fixed-point amount carried by a transaction
///
/// Binary 32.32 fixed point: sums are exact and identical on every platform.
pub type Amount = I32F32;

/// Represents a transfer between two addresses
///
/// Fields are private so a transaction cannot change once it is built.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    /// Sender's address
    sender: String,

    /// Recipient's address
    recipient: String,

    /// Amount being transferred
    amount: Amount,
}

impl Transaction {
    /// Creates a new transaction
    ///
    /// Neither the addresses nor the amount are validated: zero and negative
    /// amounts are accepted as given.
    ///
    /// # Arguments
    ///
    /// * `sender` - The address of the sender
    /// * `recipient` - The address of the recipient
    /// * `amount` - The amount to transfer
    pub fn new(sender: impl Into<String>, recipient: impl Into<String>, amount: Amount) -> Self {
        Transaction {
            sender: sender.into(),
            recipient: recipient.into(),
            amount,
        }
    }

    /// Gets the sender's address
    pub fn sender(&self) -> &str {
        &self.sender
    }

    /// Gets the recipient's address
    pub fn recipient(&self) -> &str {
        &self.recipient
    }

    /// Gets the transferred amount
    pub fn amount(&self) -> Amount {
        self.amount
    }

    /// Checks if the transaction is a mining reward issued by `reward_sender`
    pub fn is_reward(&self, reward_sender: &str) -> bool {
        self.sender == reward_sender
    }

    /// Canonical form used as block hash input
    ///
    /// The amount is encoded by its raw fixed-point bits so the encoding never
    /// depends on decimal formatting.
    pub(crate) fn canonical_json(&self) -> serde_json::Value {
        serde_json::json!({
            "sender": self.sender,
            "recipient": self.recipient,
            "amount": self.amount.to_bits(),
        })
    }

    /// Renders a human-readable description of the transaction
    pub fn render(&self) -> String {
        format!(
            "{}\nsender       {}\nrecipient    {}\namount       {}\n",
            "_".repeat(40),
            self.sender,
            self.recipient,
            self.amount
        )
    }
}

impl fmt::Display for Transaction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.render())
    }
}
