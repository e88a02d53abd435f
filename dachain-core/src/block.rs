use std::sync::Arc;

use serde::{Deserialize, Serialize};
use shared::{BlockHeight, ChainError, Hash256, Result, TxId, Wallet};

use crate::codec;
use crate::transaction::{Transaction, TxOutput};

/// Block header; the hash of its canonical form is the block identity
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockHeader {
    /// Height of the block in the chain
    pub height: BlockHeight,
    /// Hash of the previous block's header; zero for genesis
    pub prev_hash: Hash256,
    /// Merkle root over the txids of the contained transactions, in order
    pub merkle_root: Hash256,
    /// Proof-of-work nonce
    pub nonce: u64,
}

impl BlockHeader {
    /// Creates a new block header
    #[must_use]
    pub const fn new(
        height: BlockHeight,
        prev_hash: Hash256,
        merkle_root: Hash256,
        nonce: u64,
    ) -> Self {
        Self {
            height,
            prev_hash,
            merkle_root,
            nonce,
        }
    }

    /// SHA-256 over the canonical four-field header object
    ///
    /// # Errors
    ///
    /// Returns an error if the canonical form fails to serialize
    pub fn hash(&self) -> Result<Hash256> {
        Ok(Hash256::sha256(&codec::header_bytes(self)?))
    }
}

/// A header plus the ordered transactions committed by its merkle root
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Block {
    pub header: BlockHeader,
    pub txs: Vec<Transaction>,
}

impl Block {
    /// Creates a new block
    #[must_use]
    pub const fn new(header: BlockHeader, txs: Vec<Transaction>) -> Self {
        Self { header, txs }
    }

    /// Hash of the block header
    ///
    /// # Errors
    ///
    /// Returns an error if the canonical header form fails to serialize
    pub fn hash(&self) -> Result<Hash256> {
        self.header.hash()
    }

    /// Ordered txids of the contained transactions
    #[must_use]
    pub fn txids(&self) -> Vec<TxId> {
        self.txs.iter().map(|tx| tx.txid).collect()
    }

    /// Builds the genesis block: one coinbase transaction per asset, each
    /// assigning the full portion to one of the initial owner wallets.
    ///
    /// Asset identifiers are `asset-0`, `asset-1`, … The genesis header is
    /// not mined; it is applied without a proof-of-work check.
    ///
    /// # Errors
    ///
    /// Returns an error if fewer owner wallets than assets are supplied or
    /// if a canonical form fails to serialize
    pub fn genesis(num_assets: usize, owners: &[Arc<Wallet>]) -> Result<Self> {
        if owners.len() < num_assets {
            return Err(ChainError::InvalidBlock(format!(
                "genesis needs {num_assets} owner wallets, got {}",
                owners.len()
            )));
        }

        let mut txs = Vec::with_capacity(num_assets);
        for (i, owner) in owners.iter().take(num_assets).enumerate() {
            let output = TxOutput::new(format!("asset-{i}"), owner.pubkey_hash(), 100);
            txs.push(Transaction::new(vec![], vec![output])?);
        }

        let txids: Vec<TxId> = txs.iter().map(|tx| tx.txid).collect();
        let header = BlockHeader::new(0, Hash256::zero(), codec::merkle_root(&txids), 0);
        Ok(Self::new(header, txs))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn owners(count: usize) -> Vec<Arc<Wallet>> {
        let mut rng = StdRng::seed_from_u64(0);
        (0..count)
            .map(|_| Arc::new(Wallet::generate(&mut rng)))
            .collect()
    }

    #[test]
    fn test_header_hash_is_deterministic() {
        let header = BlockHeader::new(1, Hash256::sha256(b"prev"), Hash256::sha256(b"root"), 7);
        assert_eq!(header.hash().unwrap(), header.hash().unwrap());
    }

    #[test]
    fn test_header_hash_depends_on_nonce() {
        let a = BlockHeader::new(1, Hash256::zero(), Hash256::zero(), 0);
        let b = BlockHeader::new(1, Hash256::zero(), Hash256::zero(), 1);
        assert_ne!(a.hash().unwrap(), b.hash().unwrap());
    }

    #[test]
    fn test_genesis_layout() {
        let wallets = owners(2);
        let genesis = Block::genesis(2, &wallets).unwrap();

        assert_eq!(genesis.header.height, 0);
        assert!(genesis.header.prev_hash.is_zero());
        assert_eq!(genesis.txs.len(), 2);

        for (i, tx) in genesis.txs.iter().enumerate() {
            assert!(tx.is_coinbase());
            assert_eq!(tx.outputs.len(), 1);
            assert_eq!(tx.outputs[0].asset_id, format!("asset-{i}"));
            assert_eq!(tx.outputs[0].portion, 100);
            assert_eq!(tx.outputs[0].pubkey_hash, wallets[i].pubkey_hash());
        }
    }

    #[test]
    fn test_genesis_merkle_root_matches_txids() {
        let genesis = Block::genesis(2, &owners(2)).unwrap();
        assert_eq!(
            genesis.header.merkle_root,
            codec::merkle_root(&genesis.txids())
        );
    }

    #[test]
    fn test_genesis_requires_enough_owners() {
        assert!(Block::genesis(3, &owners(2)).is_err());
    }
}
