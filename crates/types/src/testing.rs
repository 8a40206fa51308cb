//! Signed raw transaction builders for tests.
//!
//! Only compiled with the `test-utils` feature. Produces the byte layouts that
//! [`decode_raw_bytes`](crate::decode_raw_bytes) accepts, signed with a real
//! secp256k1 key so sender recovery can be asserted.

use crate::{Address, H256};
use k256::ecdsa::SigningKey;
use rlp::RlpStream;

/// Unsigned transaction fields used by every builder.
#[derive(Debug, Clone)]
pub struct TestTx {
    /// Chain id (ignored by pre-EIP-155 legacy signing)
    pub chain_id: u64,
    /// Sender nonce
    pub nonce: u64,
    /// Gas price, or max fee for EIP-1559
    pub gas_price: u128,
    /// Gas limit
    pub gas_limit: u64,
    /// Recipient, None for contract creation
    pub to: Option<Address>,
    /// Value in wei
    pub value: u128,
    /// Calldata
    pub data: Vec<u8>,
}

impl Default for TestTx {
    fn default() -> Self {
        Self {
            chain_id: 1,
            nonce: 0,
            gas_price: 1_000_000_000,
            gas_limit: 21_000,
            to: None,
            value: 0,
            data: Vec::new(),
        }
    }
}

impl TestTx {
    /// A transfer to `to` with the given nonce.
    pub fn transfer(to: Address, nonce: u64) -> Self {
        Self {
            to: Some(to),
            nonce,
            value: 1,
            ..Default::default()
        }
    }
}

/// Deterministic signing key derived from a one-byte seed.
pub fn test_key(seed: u8) -> SigningKey {
    let mut bytes = [0u8; 32];
    bytes[31] = seed.max(1);
    bytes[0] = 0x11;
    SigningKey::from_bytes((&bytes).into()).expect("valid test key")
}

/// The address controlled by `key`.
pub fn address_of(key: &SigningKey) -> Address {
    let point = key.verifying_key().to_encoded_point(false);
    Address::from_public_key(&point.as_bytes()[1..])
}

/// Signs a legacy transaction, with EIP-155 replay protection if `eip155`.
pub fn sign_legacy(key: &SigningKey, tx: &TestTx, eip155: bool) -> Vec<u8> {
    let mut unsigned = RlpStream::new_list(if eip155 { 9 } else { 6 });
    append_legacy_fields(&mut unsigned, tx);
    if eip155 {
        unsigned.append(&tx.chain_id);
        unsigned.append_empty_data();
        unsigned.append_empty_data();
    }
    let (r, s, recovery) = sign_hash(key, &H256::keccak256(&unsigned.out()));

    let v = if eip155 {
        tx.chain_id * 2 + 35 + recovery as u64
    } else {
        27 + recovery as u64
    };

    let mut signed = RlpStream::new_list(9);
    append_legacy_fields(&mut signed, tx);
    signed.append(&v);
    signed.append(&trim_leading_zeros(&r));
    signed.append(&trim_leading_zeros(&s));
    signed.out().to_vec()
}

/// Signs an EIP-2930 access list transaction with an empty access list.
pub fn sign_access_list(key: &SigningKey, tx: &TestTx) -> Vec<u8> {
    sign_typed(key, tx, 0x01)
}

/// Signs an EIP-1559 transaction with an empty access list.
pub fn sign_dynamic_fee(key: &SigningKey, tx: &TestTx) -> Vec<u8> {
    sign_typed(key, tx, 0x02)
}

/// Hex-encodes raw bytes with a `0x` prefix, as JSON-RPC clients send them.
pub fn to_hex_param(raw: &[u8]) -> String {
    format!("0x{}", hex::encode(raw))
}

fn sign_typed(key: &SigningKey, tx: &TestTx, type_byte: u8) -> Vec<u8> {
    let field_count = if type_byte == 0x01 { 8 } else { 9 };

    let mut unsigned = RlpStream::new_list(field_count);
    append_typed_fields(&mut unsigned, tx, type_byte);
    let unsigned = unsigned.out();
    let (r, s, recovery) = sign_hash(key, &H256::keccak256_concat(&[&[type_byte][..], &unsigned[..]]));

    let mut signed = RlpStream::new_list(field_count + 3);
    append_typed_fields(&mut signed, tx, type_byte);
    signed.append(&(recovery as u64));
    signed.append(&trim_leading_zeros(&r));
    signed.append(&trim_leading_zeros(&s));

    let mut out = vec![type_byte];
    out.extend_from_slice(&signed.out());
    out
}

fn append_legacy_fields(stream: &mut RlpStream, tx: &TestTx) {
    stream.append(&tx.nonce);
    stream.append(&tx.gas_price);
    stream.append(&tx.gas_limit);
    append_to(stream, tx.to);
    stream.append(&tx.value);
    stream.append(&tx.data.as_slice());
}

fn append_typed_fields(stream: &mut RlpStream, tx: &TestTx, type_byte: u8) {
    stream.append(&tx.chain_id);
    stream.append(&tx.nonce);
    if type_byte == 0x02 {
        // max priority fee, then max fee
        stream.append(&tx.gas_price);
    }
    stream.append(&tx.gas_price);
    stream.append(&tx.gas_limit);
    append_to(stream, tx.to);
    stream.append(&tx.value);
    stream.append(&tx.data.as_slice());
    stream.begin_list(0);
}

fn append_to(stream: &mut RlpStream, to: Option<Address>) {
    match to {
        Some(addr) => stream.append(&addr.as_bytes()),
        None => stream.append_empty_data(),
    };
}

fn sign_hash(key: &SigningKey, hash: &H256) -> ([u8; 32], [u8; 32], u8) {
    let (signature, recovery_id) = key
        .sign_prehash_recoverable(hash.as_bytes())
        .expect("prehash signing");
    let bytes = signature.to_bytes();
    let mut r = [0u8; 32];
    let mut s = [0u8; 32];
    r.copy_from_slice(&bytes[0..32]);
    s.copy_from_slice(&bytes[32..64]);
    (r, s, recovery_id.to_byte())
}

fn trim_leading_zeros(bytes: &[u8]) -> Vec<u8> {
    let first = bytes.iter().position(|b| *b != 0).unwrap_or(bytes.len());
    bytes[first..].to_vec()
}
