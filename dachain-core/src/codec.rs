//! Canonical serialization: the deterministic byte forms whose SHA-256 is
//! the identity of transactions and block headers.
//!
//! Forms are JSON objects with lexicographically ordered keys and minimal
//! separators, UTF-8 encoded; arrays preserve element order. `serde_json`'s
//! default map is `BTreeMap`-backed, so building a `Value` and rendering it
//! compactly yields exactly this shape.

use serde_json::{json, Value};
use shared::{ChainError, Hash256, Result, TxId};

use crate::block::BlockHeader;
use crate::transaction::{Transaction, TxInput, TxOutput};

fn to_bytes(value: &Value) -> Result<Vec<u8>> {
    serde_json::to_vec(value).map_err(|e| ChainError::Serialization(e.to_string()))
}

fn input_value(input: &TxInput, include_signature: bool) -> Value {
    let mut value = json!({
        "txid_ref": input.txid_ref.to_string(),
        "index": input.index,
        "pubkey": input.pubkey,
    });
    if include_signature {
        value["signature"] = Value::String(input.signature.clone());
    }
    value
}

fn output_value(output: &TxOutput) -> Value {
    json!({
        "asset_id": output.asset_id,
        "pubkey_hash": output.pubkey_hash,
        "portion": output.portion,
    })
}

fn transaction_value(tx: &Transaction, include_signatures: bool) -> Value {
    json!({
        "inputs": tx
            .inputs
            .iter()
            .map(|input| input_value(input, include_signatures))
            .collect::<Vec<_>>(),
        "outputs": tx.outputs.iter().map(output_value).collect::<Vec<_>>(),
    })
}

/// Signing form: inputs without their signature field. This is the message
/// each input signs.
///
/// # Errors
///
/// Returns an error if JSON rendering fails
pub fn transaction_signing_bytes(tx: &Transaction) -> Result<Vec<u8>> {
    to_bytes(&transaction_value(tx, false))
}

/// Identity form: inputs with their signature field. Its SHA-256 is the txid.
///
/// # Errors
///
/// Returns an error if JSON rendering fails
pub fn transaction_identity_bytes(tx: &Transaction) -> Result<Vec<u8>> {
    to_bytes(&transaction_value(tx, true))
}

/// Header identity form: the four-field object hashed into the block hash
///
/// # Errors
///
/// Returns an error if JSON rendering fails
pub fn header_bytes(header: &BlockHeader) -> Result<Vec<u8>> {
    to_bytes(&json!({
        "height": header.height,
        "prev_hash": header.prev_hash.to_string(),
        "merkle_root": header.merkle_root.to_string(),
        "nonce": header.nonce,
    }))
}

/// Merkle root over an ordered list of txids.
///
/// Levels hash pairwise concatenations; a level of odd length duplicates its
/// last element. The empty list hashes the empty byte string, and a single
/// txid hashes against itself.
#[must_use]
pub fn merkle_root(txids: &[TxId]) -> Hash256 {
    if txids.is_empty() {
        return Hash256::sha256(b"");
    }

    let mut level: Vec<Hash256> = txids.to_vec();
    loop {
        let mut next = Vec::with_capacity((level.len() + 1) / 2);
        for pair in level.chunks(2) {
            let left = pair[0];
            let right = if pair.len() == 2 { pair[1] } else { left };

            let mut buf = [0u8; 64];
            buf[..32].copy_from_slice(left.as_bytes());
            buf[32..].copy_from_slice(right.as_bytes());
            next.push(Hash256::sha256(&buf));
        }
        if next.len() == 1 {
            return next[0];
        }
        level = next;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_tx() -> Transaction {
        let input = TxInput::new(
            Hash256::sha256(b"prev"),
            1,
            "ab".to_string(),
            "cd".to_string(),
        );
        let output = TxOutput::new("asset-0".to_string(), "ef".to_string(), 100);
        Transaction::new(vec![input], vec![output]).unwrap()
    }

    #[test]
    fn test_identity_form_is_sorted_and_compact() {
        let tx = sample_tx();
        let rendered = String::from_utf8(transaction_identity_bytes(&tx).unwrap()).unwrap();
        let expected = format!(
            "{{\"inputs\":[{{\"index\":1,\"pubkey\":\"ab\",\"signature\":\"cd\",\
             \"txid_ref\":\"{}\"}}],\"outputs\":[{{\"asset_id\":\"asset-0\",\
             \"portion\":100,\"pubkey_hash\":\"ef\"}}]}}",
            Hash256::sha256(b"prev")
        );
        assert_eq!(rendered, expected);
    }

    #[test]
    fn test_signing_form_omits_signature() {
        let tx = sample_tx();
        let rendered = String::from_utf8(transaction_signing_bytes(&tx).unwrap()).unwrap();

        assert!(!rendered.contains("signature"));
        assert!(rendered.contains("\"pubkey\":\"ab\""));
    }

    #[test]
    fn test_header_form_is_sorted_and_compact() {
        let header = BlockHeader::new(3, Hash256::zero(), Hash256::sha256(b"root"), 42);
        let rendered = String::from_utf8(header_bytes(&header).unwrap()).unwrap();
        let expected = format!(
            "{{\"height\":3,\"merkle_root\":\"{}\",\"nonce\":42,\"prev_hash\":\"{}\"}}",
            Hash256::sha256(b"root"),
            Hash256::zero()
        );
        assert_eq!(rendered, expected);
    }

    #[test]
    fn test_merkle_root_of_empty_list() {
        assert_eq!(merkle_root(&[]), Hash256::sha256(b""));
    }

    #[test]
    fn test_merkle_root_of_single_txid_hashes_against_itself() {
        let txid = Hash256::sha256(b"tx");
        let mut buf = [0u8; 64];
        buf[..32].copy_from_slice(txid.as_bytes());
        buf[32..].copy_from_slice(txid.as_bytes());

        assert_eq!(merkle_root(&[txid]), Hash256::sha256(&buf));
    }

    #[test]
    fn test_merkle_root_duplicates_last_on_odd_level() {
        let a = Hash256::sha256(b"a");
        let b = Hash256::sha256(b"b");
        let c = Hash256::sha256(b"c");

        let pair = |l: Hash256, r: Hash256| {
            let mut buf = [0u8; 64];
            buf[..32].copy_from_slice(l.as_bytes());
            buf[32..].copy_from_slice(r.as_bytes());
            Hash256::sha256(&buf)
        };

        let expected = pair(pair(a, b), pair(c, c));
        assert_eq!(merkle_root(&[a, b, c]), expected);
    }

    #[test]
    fn test_merkle_root_is_order_sensitive() {
        let a = Hash256::sha256(b"a");
        let b = Hash256::sha256(b"b");

        assert_ne!(merkle_root(&[a, b]), merkle_root(&[b, a]));
    }
}
