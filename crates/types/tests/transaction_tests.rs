//! Tests for raw transaction decoding

use rpcgate_types::testing::{
    address_of, sign_access_list, sign_dynamic_fee, sign_legacy, test_key, to_hex_param, TestTx,
};
use rpcgate_types::{decode_raw_bytes, decode_raw_transaction, Address, DecodedTx, TxType, H256, U256};

fn contract() -> Address {
    Address::from_hex("0x742d35Cc6634C0532925a3b844Bc9e7595f0bEb1").unwrap()
}

#[test]
fn test_eip155_reference_vector() {
    // Signed example transaction from EIP-155
    let raw = "0xf86c098504a817c800825208943535353535353535353535353535353535353535880de0b6b3a76400008025a028ef61340bd939bc2195fe537567866003e1a15d3c71ff63e1590620aa636276a067cbe9d8997f761aecb703304b3800ccf555c9f3dc64214b297fb1966a3b6d83";

    let decoded = decode_raw_transaction(raw);
    assert_eq!(decoded.tx_type(), Some(TxType::Legacy));

    let summary = decoded.summary().unwrap();
    assert_eq!(
        summary.from.to_lower_hex(),
        "0x9d8a62f656a8d1615c1294fd71e9cfb3e4855a4f"
    );
    assert_eq!(
        summary.to,
        Some(Address::from_hex("0x3535353535353535353535353535353535353535").unwrap())
    );
    assert_eq!(summary.value, U256::from(1_000_000_000_000_000_000u128));
    assert_eq!(summary.chain_id, Some(1));
    assert!(summary.data.is_empty());
}

#[test]
fn test_legacy_eip155_recovers_sender() {
    let key = test_key(1);
    let tx = TestTx {
        chain_id: 8082,
        ..TestTx::transfer(contract(), 7)
    };
    let raw = sign_legacy(&key, &tx, true);

    let decoded = decode_raw_bytes(&raw);
    let summary = match decoded {
        DecodedTx::Legacy(summary) => summary,
        other => panic!("expected legacy, got {:?}", other),
    };
    assert_eq!(summary.from, address_of(&key));
    assert_eq!(summary.to, Some(contract()));
    assert_eq!(summary.chain_id, Some(8082));
    assert_eq!(summary.hash, H256::keccak256(&raw));
}

#[test]
fn test_legacy_pre_eip155_has_no_chain_id() {
    let key = test_key(2);
    let raw = sign_legacy(&key, &TestTx::transfer(contract(), 0), false);

    let decoded = decode_raw_bytes(&raw);
    assert_eq!(decoded.tx_type(), Some(TxType::Legacy));
    let summary = decoded.summary().unwrap();
    assert_eq!(summary.chain_id, None);
    assert_eq!(summary.from, address_of(&key));
}

#[test]
fn test_access_list_recovers_sender() {
    let key = test_key(3);
    let tx = TestTx {
        data: vec![0xa9, 0x05, 0x9c, 0xbb],
        ..TestTx::transfer(contract(), 1)
    };
    let raw = sign_access_list(&key, &tx);

    let decoded = decode_raw_transaction(&to_hex_param(&raw));
    let summary = match decoded {
        DecodedTx::AccessList(summary) => summary,
        other => panic!("expected access list, got {:?}", other),
    };
    assert_eq!(summary.from, address_of(&key));
    assert_eq!(summary.data.as_ref(), &[0xa9, 0x05, 0x9c, 0xbb]);
    assert_eq!(summary.hash, H256::keccak256(&raw));
}

#[test]
fn test_dynamic_fee_recovers_sender() {
    let key = test_key(4);
    let raw = sign_dynamic_fee(&key, &TestTx::transfer(contract(), 3));

    let decoded = decode_raw_bytes(&raw);
    assert_eq!(decoded.tx_type(), Some(TxType::DynamicFee));
    assert_eq!(decoded.summary().unwrap().from, address_of(&key));
}

#[test]
fn test_contract_creation_has_no_recipient() {
    let key = test_key(5);
    let tx = TestTx {
        to: None,
        data: vec![0x60, 0x80, 0x60, 0x40],
        ..Default::default()
    };
    let raw = sign_legacy(&key, &tx, true);

    let summary = decode_raw_bytes(&raw).into_summary().unwrap();
    assert!(summary.to.is_none());
}

#[test]
fn test_truncated_payload_is_failure() {
    let key = test_key(6);
    let raw = sign_legacy(&key, &TestTx::transfer(contract(), 0), true);

    let decoded = decode_raw_bytes(&raw[..raw.len() - 4]);
    assert!(decoded.is_failure());
    assert!(decoded.summary().is_none());
}

#[test]
fn test_trailing_bytes_are_rejected() {
    let key = test_key(7);
    let mut raw = sign_dynamic_fee(&key, &TestTx::transfer(contract(), 0));
    raw.push(0x00);

    assert!(decode_raw_bytes(&raw).is_failure());
}

#[test]
fn test_unknown_type_byte_is_failure() {
    let key = test_key(8);
    let mut raw = sign_dynamic_fee(&key, &TestTx::transfer(contract(), 0));
    raw[0] = 0x03;

    assert!(decode_raw_bytes(&raw).is_failure());
}
