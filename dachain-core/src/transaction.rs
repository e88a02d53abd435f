use serde::{Deserialize, Serialize};
use shared::{
    AssetId, Hash256, OutPoint, OutputIndex, Portion, PubKeyHashHex, PubKeyHex, Result,
    SignatureHex, TxId,
};

use crate::codec;

/// A share of an asset held by a key
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxOutput {
    /// Asset being divided
    pub asset_id: AssetId,
    /// Hex SHA-256 of the owner's raw public-key bytes
    pub pubkey_hash: PubKeyHashHex,
    /// Ownership percentage carried by this output, 1..=100
    pub portion: Portion,
}

impl TxOutput {
    /// Creates a new output
    #[must_use]
    pub const fn new(asset_id: AssetId, pubkey_hash: PubKeyHashHex, portion: Portion) -> Self {
        Self {
            asset_id,
            pubkey_hash,
            portion,
        }
    }
}

/// A spend of a prior output
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxInput {
    /// Transaction whose output is being spent
    pub txid_ref: TxId,
    /// Index of that output
    pub index: OutputIndex,
    /// Claimant's full public key, hex encoded
    pub pubkey: PubKeyHex,
    /// Hex signature over the transaction's signing-form hash
    pub signature: SignatureHex,
}

impl TxInput {
    /// Creates a new input
    #[must_use]
    pub const fn new(
        txid_ref: TxId,
        index: OutputIndex,
        pubkey: PubKeyHex,
        signature: SignatureHex,
    ) -> Self {
        Self {
            txid_ref,
            index,
            pubkey,
            signature,
        }
    }

    /// The outpoint this input consumes
    #[must_use]
    pub const fn outpoint(&self) -> OutPoint {
        OutPoint::new(self.txid_ref, self.index)
    }
}

/// An ordered list of inputs and outputs with a derived identifier.
///
/// The txid is the SHA-256 of the identity form (inputs with signatures);
/// the message every input signs is the hash of the signing form (inputs
/// without signatures).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    pub inputs: Vec<TxInput>,
    pub outputs: Vec<TxOutput>,
    pub txid: TxId,
}

impl Transaction {
    /// Builds a transaction and derives its txid
    ///
    /// # Errors
    ///
    /// Returns an error if the canonical form fails to serialize
    pub fn new(inputs: Vec<TxInput>, outputs: Vec<TxOutput>) -> Result<Self> {
        let mut tx = Self {
            inputs,
            outputs,
            txid: Hash256::zero(),
        };
        tx.recompute_txid()?;
        Ok(tx)
    }

    /// Re-derives the txid; required after mutating any field
    ///
    /// # Errors
    ///
    /// Returns an error if the canonical form fails to serialize
    pub fn recompute_txid(&mut self) -> Result<()> {
        self.txid = Hash256::sha256(&codec::transaction_identity_bytes(self)?);
        Ok(())
    }

    /// Hash of the signing form; the message each input signs
    ///
    /// # Errors
    ///
    /// Returns an error if the canonical form fails to serialize
    pub fn message_hash(&self) -> Result<Hash256> {
        Ok(Hash256::sha256(&codec::transaction_signing_bytes(self)?))
    }

    /// Coinbase and genesis transactions carry no inputs
    #[must_use]
    pub fn is_coinbase(&self) -> bool {
        self.inputs.is_empty()
    }

    /// Sum of the output portions
    #[must_use]
    pub fn total_output_portion(&self) -> Portion {
        self.outputs.iter().map(|output| output.portion).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_tx() -> Transaction {
        let input = TxInput::new(Hash256::sha256(b"prev"), 0, "aa".repeat(64), "bb".repeat(64));
        let output = TxOutput::new("asset-0".to_string(), "cc".repeat(32), 100);
        Transaction::new(vec![input], vec![output]).unwrap()
    }

    #[test]
    fn test_txid_is_deterministic() {
        let a = sample_tx();
        let b = sample_tx();
        assert_eq!(a.txid, b.txid);
    }

    #[test]
    fn test_txid_depends_on_signature() {
        let mut tx = sample_tx();
        let original = tx.txid;

        tx.inputs[0].signature = "dd".repeat(64);
        tx.recompute_txid().unwrap();

        assert_ne!(tx.txid, original);
    }

    #[test]
    fn test_message_hash_ignores_signature() {
        let mut tx = sample_tx();
        let before = tx.message_hash().unwrap();

        tx.inputs[0].signature = "dd".repeat(64);
        tx.recompute_txid().unwrap();

        assert_eq!(tx.message_hash().unwrap(), before);
    }

    #[test]
    fn test_coinbase_has_no_inputs() {
        let output = TxOutput::new("asset-0".to_string(), "cc".repeat(32), 100);
        let tx = Transaction::new(vec![], vec![output]).unwrap();

        assert!(tx.is_coinbase());
        assert!(!sample_tx().is_coinbase());
    }

    #[test]
    fn test_total_output_portion() {
        let outputs = vec![
            TxOutput::new("asset-0".to_string(), "cc".repeat(32), 60),
            TxOutput::new("asset-0".to_string(), "dd".repeat(32), 40),
        ];
        let tx = Transaction::new(vec![], outputs).unwrap();
        assert_eq!(tx.total_output_portion(), 100);
    }

    #[test]
    fn test_serde_round_trip_preserves_txid() {
        let tx = sample_tx();
        let json = serde_json::to_string(&tx).unwrap();
        let back: Transaction = serde_json::from_str(&json).unwrap();

        assert_eq!(back, tx);
        assert_eq!(back.txid, tx.txid);
    }
}
