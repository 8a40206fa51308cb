//! # RPC Gate Types
//!
//! Core type definitions shared by the RPC Gate crates:
//! - [`Address`] - Ethereum-compatible 20-byte addresses
//! - [`H256`] - 32-byte hashes with Keccak256 support
//! - [`DecodedTx`] - raw transaction decoding for `eth_sendRawTransaction`
//!
//! ## Example
//!
//! ```rust
//! use rpcgate_types::{decode_raw_transaction, DecodedTx};
//!
//! // Malformed payloads never panic; they decode to a failure variant
//! let decoded = decode_raw_transaction("0xdeadbeef");
//! assert!(matches!(decoded, DecodedTx::DecodeFailure(_)));
//! ```

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]
#![deny(unsafe_code)]

pub mod address;
pub mod hash;
pub mod transaction;

#[cfg(feature = "test-utils")]
pub mod testing;

// Re-export main types at crate root
pub use address::Address;
pub use alloy_primitives::U256;
pub use hash::H256;
pub use transaction::{decode_hex, decode_raw_bytes, decode_raw_transaction, DecodedTx, TxSummary, TxType};

/// Result type alias for RPC Gate types operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur when working with RPC Gate types
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Invalid hex string
    #[error("invalid hex: {0}")]
    InvalidHex(#[from] hex::FromHexError),

    /// Invalid length for a fixed-size type
    #[error("invalid length: expected {expected}, got {actual}")]
    InvalidLength {
        /// Expected length
        expected: usize,
        /// Actual length
        actual: usize,
    },

    /// Invalid transaction
    #[error("invalid transaction: {0}")]
    InvalidTransaction(String),

    /// RLP decoding error
    #[error("RLP decode error: {0}")]
    RlpDecode(#[from] rlp::DecoderError),

    /// Signature error
    #[error("signature error: {0}")]
    Signature(String),

    /// Invalid decimal quantity
    #[error("invalid quantity: {0}")]
    InvalidQuantity(String),
}

/// Hex (optionally `0x`-prefixed) into exactly `N` bytes.
pub(crate) fn parse_fixed<const N: usize>(s: &str) -> Result<[u8; N]> {
    let bytes = decode_hex(s)?;
    let len = bytes.len();
    bytes.try_into().map_err(|_| Error::InvalidLength {
        expected: N,
        actual: len,
    })
}

/// Converts a base-10 integer string into a `0x`-prefixed hex quantity.
///
/// ```rust
/// assert_eq!(rpcgate_types::int_string_to_hex("255").unwrap(), "0xff");
/// ```
pub fn int_string_to_hex(s: &str) -> Result<String> {
    let trimmed = s.trim();
    if trimmed.is_empty() || !trimmed.bytes().all(|b| b.is_ascii_digit()) {
        return Err(Error::InvalidQuantity(s.to_string()));
    }
    let value = U256::from_str_radix(trimmed, 10)
        .map_err(|_| Error::InvalidQuantity(s.to_string()))?;
    Ok(format!("0x{:x}", value))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_int_string_to_hex() {
        assert_eq!(int_string_to_hex("0").unwrap(), "0x0");
        assert_eq!(int_string_to_hex("16").unwrap(), "0x10");
        assert_eq!(int_string_to_hex(" 1000000000000000000 ").unwrap(), "0xde0b6b3a7640000");
    }

    #[test]
    fn test_int_string_to_hex_rejects_garbage() {
        assert!(int_string_to_hex("abc").is_err());
        assert!(int_string_to_hex("").is_err());
    }
}
