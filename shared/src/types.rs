//! Types shared across the daChain crates

use serde::{Deserialize, Serialize};

/// Alias for a transaction identifier (hash of the identity form)
pub type TxId = crate::Hash256;

/// Alias for a block identifier (hash of the header identity form)
pub type BlockId = crate::Hash256;

/// Alias for an opaque asset identifier
pub type AssetId = String;

/// Alias for a hex-encoded raw (X, Y) public key
pub type PubKeyHex = String;

/// Alias for a hex-encoded compact ECDSA signature
pub type SignatureHex = String;

/// Alias for the hex SHA-256 of raw public-key bytes
pub type PubKeyHashHex = String;

/// Alias for an integer ownership percentage, 1..=100
pub type Portion = u32;

/// Alias for a block height
pub type BlockHeight = u64;

/// Alias for an output index within a transaction
pub type OutputIndex = u32;

/// Reference to a prior transaction output
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OutPoint {
    /// Transaction that created the output
    pub txid: TxId,
    /// Index of the output within that transaction
    pub index: OutputIndex,
}

impl OutPoint {
    /// Creates a new output reference
    #[must_use]
    pub const fn new(txid: TxId, index: OutputIndex) -> Self {
        Self { txid, index }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Hash256;

    #[test]
    fn test_outpoint_creation() {
        let txid = Hash256::sha256(b"tx");
        let outpoint = OutPoint::new(txid, 2);

        assert_eq!(outpoint.txid, txid);
        assert_eq!(outpoint.index, 2);
    }

    #[test]
    fn test_outpoint_identity() {
        let txid = Hash256::sha256(b"tx");
        assert_eq!(OutPoint::new(txid, 0), OutPoint::new(txid, 0));
        assert_ne!(OutPoint::new(txid, 0), OutPoint::new(txid, 1));
    }
}
