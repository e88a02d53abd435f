//! Thin write-through persistence boundary.
//!
//! Three logical collections mirror the chain: blocks keyed by hash (with
//! height and prev-hash lookups), UTXOs keyed by (txid, index) (with
//! pubkey-hash and asset lookups), wallets keyed by name. Records round-trip
//! losslessly through serde, so any backing store that can hold JSON
//! documents can implement the trait; `MemoryStore` is the in-process
//! implementation the controller binds.

use std::collections::HashMap;
use std::sync::Mutex;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use shared::{
    AssetId, BlockHeight, ChainError, Hash256, OutputIndex, Portion, PubKeyHashHex, Result, TxId,
};

use crate::block::{Block, BlockHeader};
use crate::transaction::Transaction;

/// Stored block document: header fields flattened beside the transactions
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockRecord {
    pub hash: Hash256,
    pub height: BlockHeight,
    pub prev_hash: Hash256,
    pub merkle_root: Hash256,
    pub nonce: u64,
    /// Unix time of the write, not part of consensus identity
    pub timestamp: i64,
    pub txs: Vec<Transaction>,
}

impl BlockRecord {
    /// Flattens a block for storage, stamping the write time
    #[must_use]
    pub fn from_block(hash: Hash256, block: &Block) -> Self {
        Self {
            hash,
            height: block.header.height,
            prev_hash: block.header.prev_hash,
            merkle_root: block.header.merkle_root,
            nonce: block.header.nonce,
            timestamp: Utc::now().timestamp(),
            txs: block.txs.clone(),
        }
    }

    /// Rebuilds the in-memory block
    #[must_use]
    pub fn to_block(&self) -> Block {
        Block::new(
            BlockHeader::new(self.height, self.prev_hash, self.merkle_root, self.nonce),
            self.txs.clone(),
        )
    }
}

/// Stored unspent output
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UtxoRecord {
    pub txid: TxId,
    pub index: OutputIndex,
    pub asset_id: AssetId,
    pub pubkey_hash: PubKeyHashHex,
    pub portion: Portion,
}

/// Stored wallet key material
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WalletRecord {
    pub name: String,
    pub privkey: String,
    pub pubkey: String,
    pub pubkey_hash: PubKeyHashHex,
}

/// Write-through store for blocks, UTXOs and wallets
pub trait ChainStore: Send + Sync {
    /// # Errors
    ///
    /// Returns an error if a block with the same hash is already stored
    fn insert_block(&self, record: &BlockRecord) -> Result<()>;
    fn block_by_hash(&self, hash: &Hash256) -> Result<Option<BlockRecord>>;
    fn block_by_height(&self, height: BlockHeight) -> Result<Option<BlockRecord>>;
    fn block_by_prev_hash(&self, prev_hash: &Hash256) -> Result<Option<BlockRecord>>;
    /// Highest block by height
    fn tip_block(&self) -> Result<Option<BlockRecord>>;
    /// Every block, ascending by height
    fn all_blocks(&self) -> Result<Vec<BlockRecord>>;

    /// # Errors
    ///
    /// Returns an error if the outpoint is already stored
    fn insert_utxo(&self, record: &UtxoRecord) -> Result<()>;
    /// Returns whether the outpoint was present
    fn delete_utxo(&self, txid: &TxId, index: OutputIndex) -> Result<bool>;
    fn utxo(&self, txid: &TxId, index: OutputIndex) -> Result<Option<UtxoRecord>>;
    fn utxos_by_pubkey_hash(&self, pubkey_hash: &str) -> Result<Vec<UtxoRecord>>;
    fn utxos_by_asset(&self, asset_id: &str) -> Result<Vec<UtxoRecord>>;
    fn all_utxos(&self) -> Result<Vec<UtxoRecord>>;

    /// # Errors
    ///
    /// Returns an error if a wallet with the same name is already stored
    fn insert_wallet(&self, record: &WalletRecord) -> Result<()>;
    fn wallet_by_name(&self, name: &str) -> Result<Option<WalletRecord>>;
    fn all_wallets(&self) -> Result<Vec<WalletRecord>>;
}

#[derive(Debug, Default)]
struct MemoryStoreInner {
    blocks: HashMap<Hash256, BlockRecord>,
    utxos: HashMap<(TxId, OutputIndex), UtxoRecord>,
    wallets: HashMap<String, WalletRecord>,
}

/// In-process implementation of the persistence boundary
#[derive(Debug, Default)]
pub struct MemoryStore {
    inner: Mutex<MemoryStoreInner>,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl ChainStore for MemoryStore {
    fn insert_block(&self, record: &BlockRecord) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        if inner.blocks.contains_key(&record.hash) {
            return Err(ChainError::Store(format!(
                "duplicate block {}",
                record.hash
            )));
        }
        inner.blocks.insert(record.hash, record.clone());
        Ok(())
    }

    fn block_by_hash(&self, hash: &Hash256) -> Result<Option<BlockRecord>> {
        Ok(self.inner.lock().unwrap().blocks.get(hash).cloned())
    }

    fn block_by_height(&self, height: BlockHeight) -> Result<Option<BlockRecord>> {
        let inner = self.inner.lock().unwrap();
        Ok(inner
            .blocks
            .values()
            .find(|record| record.height == height)
            .cloned())
    }

    fn block_by_prev_hash(&self, prev_hash: &Hash256) -> Result<Option<BlockRecord>> {
        let inner = self.inner.lock().unwrap();
        Ok(inner
            .blocks
            .values()
            .find(|record| record.prev_hash == *prev_hash)
            .cloned())
    }

    fn tip_block(&self) -> Result<Option<BlockRecord>> {
        let inner = self.inner.lock().unwrap();
        Ok(inner
            .blocks
            .values()
            .max_by_key(|record| record.height)
            .cloned())
    }

    fn all_blocks(&self) -> Result<Vec<BlockRecord>> {
        let inner = self.inner.lock().unwrap();
        let mut blocks: Vec<BlockRecord> = inner.blocks.values().cloned().collect();
        blocks.sort_by_key(|record| record.height);
        Ok(blocks)
    }

    fn insert_utxo(&self, record: &UtxoRecord) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        let key = (record.txid, record.index);
        if inner.utxos.contains_key(&key) {
            return Err(ChainError::Store(format!(
                "duplicate UTXO ({}, {})",
                record.txid, record.index
            )));
        }
        inner.utxos.insert(key, record.clone());
        Ok(())
    }

    fn delete_utxo(&self, txid: &TxId, index: OutputIndex) -> Result<bool> {
        let mut inner = self.inner.lock().unwrap();
        Ok(inner.utxos.remove(&(*txid, index)).is_some())
    }

    fn utxo(&self, txid: &TxId, index: OutputIndex) -> Result<Option<UtxoRecord>> {
        Ok(self.inner.lock().unwrap().utxos.get(&(*txid, index)).cloned())
    }

    fn utxos_by_pubkey_hash(&self, pubkey_hash: &str) -> Result<Vec<UtxoRecord>> {
        let inner = self.inner.lock().unwrap();
        Ok(inner
            .utxos
            .values()
            .filter(|record| record.pubkey_hash == pubkey_hash)
            .cloned()
            .collect())
    }

    fn utxos_by_asset(&self, asset_id: &str) -> Result<Vec<UtxoRecord>> {
        let inner = self.inner.lock().unwrap();
        Ok(inner
            .utxos
            .values()
            .filter(|record| record.asset_id == asset_id)
            .cloned()
            .collect())
    }

    fn all_utxos(&self) -> Result<Vec<UtxoRecord>> {
        Ok(self.inner.lock().unwrap().utxos.values().cloned().collect())
    }

    fn insert_wallet(&self, record: &WalletRecord) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        if inner.wallets.contains_key(&record.name) {
            return Err(ChainError::Store(format!(
                "duplicate wallet {}",
                record.name
            )));
        }
        inner.wallets.insert(record.name.clone(), record.clone());
        Ok(())
    }

    fn wallet_by_name(&self, name: &str) -> Result<Option<WalletRecord>> {
        Ok(self.inner.lock().unwrap().wallets.get(name).cloned())
    }

    fn all_wallets(&self) -> Result<Vec<WalletRecord>> {
        Ok(self.inner.lock().unwrap().wallets.values().cloned().collect())
    }
}
