use serde::{Deserialize, Deserializer, Serialize, Serializer};
use sha2::{Digest, Sha256};

use std::fmt;
use std::str::FromStr;

/// Length of a SHA-256 digest in bytes
pub const HASH_LEN: usize = 32;

/// A SHA-256 digest
///
/// Rendered and serialized as 64 lowercase hexadecimal characters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct BlockHash(pub [u8; HASH_LEN]);

impl BlockHash {
    /// Hashes arbitrary bytes with SHA-256
    pub fn digest(data: &[u8]) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(data);
        BlockHash(hasher.finalize().into())
    }

    /// Gets the digest as a lowercase hexadecimal string
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Checks whether the hex rendering starts with `difficulty` zero characters
    ///
    /// A difficulty larger than the rendering can never be met.
    pub fn meets_difficulty(&self, difficulty: usize) -> bool {
        let hex = self.to_hex();
        hex.len() >= difficulty && hex.bytes().take(difficulty).all(|c| c == b'0')
    }
}

impl fmt::Display for BlockHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

impl FromStr for BlockHash {
    type Err = hex::FromHexError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut bytes = [0u8; HASH_LEN];
        hex::decode_to_slice(s, &mut bytes)?;
        Ok(BlockHash(bytes))
    }
}

impl Serialize for BlockHash {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for BlockHash {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}
