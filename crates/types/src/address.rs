//! Account addresses as seen by the admission layer.
//!
//! Per-address request histories are keyed by [`Address::to_lower_hex`], so a
//! checksummed and a lowercase spelling of one account share a history.

use crate::{parse_fixed, Error, Result};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use sha3::{Digest, Keccak256};
use std::fmt;
use std::str::FromStr;

/// Address length in bytes.
pub const ADDRESS_SIZE: usize = 20;

/// A 20-byte account address.
///
/// ```rust
/// use rpcgate_types::Address;
///
/// let addr: Address = "0x742d35Cc6634C0532925a3b844Bc9e7595f0bEb1".parse().unwrap();
/// assert_eq!(addr.to_lower_hex(), "0x742d35cc6634c0532925a3b844bc9e7595f0beb1");
/// ```
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Address([u8; ADDRESS_SIZE]);

impl Address {
    /// Address from an RLP `to` field or any other 20-byte slice.
    pub fn from_slice(slice: &[u8]) -> Result<Self> {
        let bytes: [u8; ADDRESS_SIZE] = slice.try_into().map_err(|_| Error::InvalidLength {
            expected: ADDRESS_SIZE,
            actual: slice.len(),
        })?;
        Ok(Self(bytes))
    }

    /// Parse `0x`-prefixed or bare hex, in any letter case.
    pub fn from_hex(s: &str) -> Result<Self> {
        parse_fixed(s).map(Self)
    }

    /// The signer of a recovered uncompressed public key, without its `0x04`
    /// tag: the last 20 bytes of its keccak256.
    pub fn from_public_key(pubkey: &[u8]) -> Self {
        let digest = Keccak256::digest(pubkey);
        let mut bytes = [0u8; ADDRESS_SIZE];
        bytes.copy_from_slice(&digest[12..]);
        Self(bytes)
    }

    /// Raw bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Lowercase `0x` hex, the history key form.
    pub fn to_lower_hex(&self) -> String {
        format!("0x{}", hex::encode(self.0))
    }
}

impl fmt::Debug for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Address({})", self.to_lower_hex())
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_lower_hex())
    }
}

impl FromStr for Address {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::from_hex(s)
    }
}

impl Serialize for Address {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_lower_hex())
    }
}

impl<'de> Deserialize<'de> for Address {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Self::from_hex(&s).map_err(serde::de::Error::custom)
    }
}
