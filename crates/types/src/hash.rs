//! Transaction hashes and signing digests.

use crate::{parse_fixed, Error, Result};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use sha3::{Digest, Keccak256};
use std::fmt;
use std::str::FromStr;

/// Hash length in bytes.
pub const HASH_SIZE: usize = 32;

/// A keccak256 digest.
///
/// ```rust
/// use rpcgate_types::H256;
///
/// let hash = H256::keccak256(b"hello world");
/// let parsed: H256 = hash.to_hex().parse().unwrap();
/// assert_eq!(hash, parsed);
/// ```
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct H256([u8; HASH_SIZE]);

impl H256 {
    /// All zero bytes.
    pub const ZERO: Self = Self([0u8; HASH_SIZE]);

    /// keccak256 of `data`.
    pub fn keccak256(data: &[u8]) -> Self {
        Self::keccak256_concat(&[data])
    }

    /// keccak256 of the concatenation of `parts`, e.g. a typed-transaction
    /// tag byte followed by its RLP payload.
    pub fn keccak256_concat(parts: &[&[u8]]) -> Self {
        let mut hasher = Keccak256::new();
        for part in parts {
            hasher.update(part);
        }
        Self(hasher.finalize().into())
    }

    /// A signature scalar left-padded to 32 bytes. RLP strips leading zeros,
    /// so `r` and `s` can arrive shorter.
    pub fn from_be_padded(slice: &[u8]) -> Result<Self> {
        let Some(offset) = HASH_SIZE.checked_sub(slice.len()) else {
            return Err(Error::InvalidLength {
                expected: HASH_SIZE,
                actual: slice.len(),
            });
        };
        let mut bytes = [0u8; HASH_SIZE];
        bytes[offset..].copy_from_slice(slice);
        Ok(Self(bytes))
    }

    /// Parse `0x`-prefixed or bare hex.
    pub fn from_hex(s: &str) -> Result<Self> {
        parse_fixed(s).map(Self)
    }

    /// Raw bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// `0x`-prefixed lowercase hex, as reported in tx status payloads.
    pub fn to_hex(&self) -> String {
        format!("0x{}", hex::encode(self.0))
    }
}

impl fmt::Debug for H256 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "H256({})", self.to_hex())
    }
}

impl fmt::Display for H256 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl FromStr for H256 {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::from_hex(s)
    }
}

impl Serialize for H256 {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for H256 {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Self::from_hex(&s).map_err(serde::de::Error::custom)
    }
}
