//! Raw transaction decoding.
//!
//! The admission layer never validates transactions; it only needs the sender,
//! recipient and hash of an `eth_sendRawTransaction` payload so that it can
//! rate-limit per address. [`decode_raw_transaction`] tries each supported
//! envelope in a fixed priority order and reports the first that decodes:
//!
//! 1. Legacy (pre-EIP-2718, with or without EIP-155 replay protection)
//! 2. EIP-2930 access list (`0x01`)
//! 3. EIP-1559 dynamic fee (`0x02`)
//!
//! Decoding never panics and never returns an error: anything that fails all
//! three layouts becomes [`DecodedTx::DecodeFailure`].

use crate::{Address, Error, Result, H256};
use alloy_primitives::U256;
use bytes::Bytes;
use k256::ecdsa::{RecoveryId, Signature as K256Signature, VerifyingKey};
use rlp::{Rlp, RlpStream};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Transaction type identifier (EIP-2718).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum TxType {
    /// Legacy transaction (pre-EIP-2718)
    Legacy = 0x00,
    /// EIP-2930 Access List transaction
    AccessList = 0x01,
    /// EIP-1559 Dynamic Fee transaction
    DynamicFee = 0x02,
}

impl TxType {
    /// Returns the transaction type byte.
    pub const fn as_byte(&self) -> u8 {
        *self as u8
    }
}

impl fmt::Display for TxType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TxType::Legacy => write!(f, "legacy"),
            TxType::AccessList => write!(f, "eip2930"),
            TxType::DynamicFee => write!(f, "eip1559"),
        }
    }
}

/// The fields of a decoded transaction the admission layer cares about.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxSummary {
    /// Keccak256 of the raw payload
    pub hash: H256,
    /// Sender recovered from the signature
    pub from: Address,
    /// Recipient (None for contract creation)
    pub to: Option<Address>,
    /// Value transferred in wei
    pub value: U256,
    /// Calldata or init code
    #[serde(with = "hex_bytes")]
    pub data: Bytes,
    /// Chain id, absent for pre-EIP-155 legacy transactions
    pub chain_id: Option<u64>,
}

/// Outcome of decoding a raw transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DecodedTx {
    /// Legacy RLP transaction
    Legacy(TxSummary),
    /// EIP-2930 access list transaction
    AccessList(TxSummary),
    /// EIP-1559 dynamic fee transaction
    DynamicFee(TxSummary),
    /// No supported layout matched
    DecodeFailure(String),
}

impl DecodedTx {
    /// Returns the decoded fields, if decoding succeeded.
    pub fn summary(&self) -> Option<&TxSummary> {
        match self {
            DecodedTx::Legacy(s) | DecodedTx::AccessList(s) | DecodedTx::DynamicFee(s) => Some(s),
            DecodedTx::DecodeFailure(_) => None,
        }
    }

    /// Consumes self and returns the decoded fields, if any.
    pub fn into_summary(self) -> Option<TxSummary> {
        match self {
            DecodedTx::Legacy(s) | DecodedTx::AccessList(s) | DecodedTx::DynamicFee(s) => Some(s),
            DecodedTx::DecodeFailure(_) => None,
        }
    }

    /// Returns the envelope type that matched.
    pub fn tx_type(&self) -> Option<TxType> {
        match self {
            DecodedTx::Legacy(_) => Some(TxType::Legacy),
            DecodedTx::AccessList(_) => Some(TxType::AccessList),
            DecodedTx::DynamicFee(_) => Some(TxType::DynamicFee),
            DecodedTx::DecodeFailure(_) => None,
        }
    }

    /// Returns true if no layout matched.
    pub fn is_failure(&self) -> bool {
        matches!(self, DecodedTx::DecodeFailure(_))
    }
}

/// Field positions of a typed transaction envelope.
struct TypedLayout {
    tx_type: TxType,
    item_count: usize,
    to: usize,
    value: usize,
    data: usize,
}

const ACCESS_LIST_LAYOUT: TypedLayout = TypedLayout {
    tx_type: TxType::AccessList,
    item_count: 11,
    to: 4,
    value: 5,
    data: 6,
};

const DYNAMIC_FEE_LAYOUT: TypedLayout = TypedLayout {
    tx_type: TxType::DynamicFee,
    item_count: 12,
    to: 5,
    value: 6,
    data: 7,
};

/// Decodes a `0x`-prefixed hex string as passed to `eth_sendRawTransaction`.
pub fn decode_raw_transaction(raw: &str) -> DecodedTx {
    match decode_hex(raw) {
        Ok(bytes) => decode_raw_bytes(&bytes),
        Err(e) => DecodedTx::DecodeFailure(e.to_string()),
    }
}

/// Decodes raw transaction bytes, trying each layout in priority order.
pub fn decode_raw_bytes(bytes: &[u8]) -> DecodedTx {
    if bytes.is_empty() {
        return DecodedTx::DecodeFailure("empty transaction data".into());
    }

    let mut failures = Vec::with_capacity(3);

    match decode_legacy(bytes) {
        Ok(summary) => return DecodedTx::Legacy(summary),
        Err(e) => failures.push(format!("{}: {}", TxType::Legacy, e)),
    }
    match decode_typed(bytes, &ACCESS_LIST_LAYOUT) {
        Ok(summary) => return DecodedTx::AccessList(summary),
        Err(e) => failures.push(format!("{}: {}", TxType::AccessList, e)),
    }
    match decode_typed(bytes, &DYNAMIC_FEE_LAYOUT) {
        Ok(summary) => return DecodedTx::DynamicFee(summary),
        Err(e) => failures.push(format!("{}: {}", TxType::DynamicFee, e)),
    }

    DecodedTx::DecodeFailure(failures.join("; "))
}

/// Decodes a hex string with optional `0x` prefix.
pub fn decode_hex(s: &str) -> Result<Vec<u8>> {
    let s = s.trim();
    let s = s
        .strip_prefix("0x")
        .or_else(|| s.strip_prefix("0X"))
        .unwrap_or(s);
    Ok(hex::decode(s)?)
}

fn decode_legacy(bytes: &[u8]) -> Result<TxSummary> {
    let rlp = Rlp::new(bytes);
    expect_whole_list(&rlp, bytes.len(), 9)?;

    let v: u64 = rlp.val_at(6)?;
    let (chain_id, recovery) = match v {
        27 | 28 => (None, (v - 27) as u8),
        v if v >= 35 => (Some((v - 35) / 2), ((v - 35) % 2) as u8),
        other => {
            return Err(Error::InvalidTransaction(format!(
                "invalid legacy v value: {}",
                other
            )))
        }
    };

    // EIP-155 signs over the six payload fields plus (chain_id, 0, 0)
    let mut stream = RlpStream::new_list(if chain_id.is_some() { 9 } else { 6 });
    for i in 0..6 {
        stream.append_raw(rlp.at(i)?.as_raw(), 1);
    }
    if let Some(id) = chain_id {
        stream.append(&id);
        stream.append_empty_data();
        stream.append_empty_data();
    }
    let signing_hash = H256::keccak256(&stream.out());

    let r = scalar_at(&rlp, 7)?;
    let s = scalar_at(&rlp, 8)?;

    Ok(TxSummary {
        hash: H256::keccak256(bytes),
        from: recover_sender(&signing_hash, &r, &s, recovery)?,
        to: to_at(&rlp, 3)?,
        value: value_at(&rlp, 4)?,
        data: data_at(&rlp, 5)?,
        chain_id,
    })
}

fn decode_typed(bytes: &[u8], layout: &TypedLayout) -> Result<TxSummary> {
    if bytes[0] != layout.tx_type.as_byte() {
        return Err(Error::InvalidTransaction(format!(
            "type byte 0x{:02x} is not 0x{:02x}",
            bytes[0],
            layout.tx_type.as_byte()
        )));
    }

    let payload = &bytes[1..];
    let rlp = Rlp::new(payload);
    expect_whole_list(&rlp, payload.len(), layout.item_count)?;

    let unsigned_count = layout.item_count - 3;
    let mut stream = RlpStream::new_list(unsigned_count);
    for i in 0..unsigned_count {
        stream.append_raw(rlp.at(i)?.as_raw(), 1);
    }
    let unsigned = stream.out();
    let signing_hash = H256::keccak256_concat(&[&[layout.tx_type.as_byte()][..], &unsigned[..]]);

    let y_parity: u64 = rlp.val_at(unsigned_count)?;
    if y_parity > 1 {
        return Err(Error::InvalidTransaction(format!(
            "invalid y parity: {}",
            y_parity
        )));
    }
    let r = scalar_at(&rlp, unsigned_count + 1)?;
    let s = scalar_at(&rlp, unsigned_count + 2)?;

    Ok(TxSummary {
        hash: H256::keccak256(bytes),
        from: recover_sender(&signing_hash, &r, &s, y_parity as u8)?,
        to: to_at(&rlp, layout.to)?,
        value: value_at(&rlp, layout.value)?,
        data: data_at(&rlp, layout.data)?,
        chain_id: Some(rlp.val_at(0)?),
    })
}

fn expect_whole_list(rlp: &Rlp<'_>, len: usize, item_count: usize) -> Result<()> {
    if !rlp.is_list() {
        return Err(Error::InvalidTransaction("payload is not an RLP list".into()));
    }
    let info = rlp.payload_info()?;
    if info.header_len + info.value_len != len {
        return Err(Error::InvalidTransaction("trailing bytes after RLP list".into()));
    }
    let count = rlp.item_count()?;
    if count != item_count {
        return Err(Error::InvalidTransaction(format!(
            "expected {} RLP items, got {}",
            item_count, count
        )));
    }
    Ok(())
}

fn to_at(rlp: &Rlp<'_>, index: usize) -> Result<Option<Address>> {
    let to_bytes: Vec<u8> = rlp.val_at(index)?;
    if to_bytes.is_empty() {
        Ok(None)
    } else {
        Address::from_slice(&to_bytes).map(Some)
    }
}

fn value_at(rlp: &Rlp<'_>, index: usize) -> Result<U256> {
    let value_bytes: Vec<u8> = rlp.val_at(index)?;
    U256::try_from_be_slice(&value_bytes)
        .ok_or_else(|| Error::InvalidTransaction("value exceeds 256 bits".into()))
}

fn data_at(rlp: &Rlp<'_>, index: usize) -> Result<Bytes> {
    let data_bytes: Vec<u8> = rlp.val_at(index)?;
    Ok(Bytes::from(data_bytes))
}

fn scalar_at(rlp: &Rlp<'_>, index: usize) -> Result<H256> {
    let scalar: Vec<u8> = rlp.val_at(index)?;
    H256::from_be_padded(&scalar)
}

/// Recovers the signing address from a prehash and signature components.
fn recover_sender(signing_hash: &H256, r: &H256, s: &H256, recovery: u8) -> Result<Address> {
    let mut sig_bytes = [0u8; 64];
    sig_bytes[0..32].copy_from_slice(r.as_bytes());
    sig_bytes[32..64].copy_from_slice(s.as_bytes());

    let signature = K256Signature::from_bytes((&sig_bytes).into())
        .map_err(|e| Error::Signature(e.to_string()))?;

    let recovery_id = RecoveryId::from_byte(recovery)
        .ok_or_else(|| Error::Signature("invalid recovery id".into()))?;

    let verifying_key =
        VerifyingKey::recover_from_prehash(signing_hash.as_bytes(), &signature, recovery_id)
            .map_err(|e| Error::Signature(e.to_string()))?;

    // Uncompressed point is 0x04 || X || Y; the address hashes X || Y
    let pubkey = verifying_key.to_encoded_point(false);
    Ok(Address::from_public_key(&pubkey.as_bytes()[1..]))
}

/// Serde helper for serializing bytes as hex.
mod hex_bytes {
    use bytes::Bytes;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(bytes: &Bytes, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&format!("0x{}", hex::encode(bytes)))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Bytes, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        let s = s.strip_prefix("0x").unwrap_or(&s);
        hex::decode(s)
            .map(Bytes::from)
            .map_err(serde::de::Error::custom)
    }
}
