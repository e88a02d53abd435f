//! Authoritative chain state: transaction validation, proof-of-work mining,
//! asset tracing and the tip-to-genesis walk.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, RwLock};

use thiserror::Error;
use tracing::debug;

use shared::{
    pubkey_hash_hex, verify_signature, BlockHeight, ChainError, Hash256, OutPoint, OutputIndex,
    Portion, Result, TxId,
};

use crate::block::{Block, BlockHeader};
use crate::codec;
use crate::store::{BlockRecord, ChainStore, UtxoRecord};
use crate::transaction::{Transaction, TxOutput};
use crate::utxo::UtxoSet;

/// Fixed 256-bit proof-of-work threshold: `00000f` followed by 58 `f`s.
/// A header hash is acceptable iff its big-endian magnitude is strictly
/// below this value.
pub const POW_TARGET: Hash256 = Hash256::from_bytes([
    0x00, 0x00, 0x0f, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff,
    0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff,
    0xff, 0xff,
]);

/// Upper bound on transactions selected into one block
pub const MAX_TX_PER_BLOCK: usize = 8;

/// Reasons a transaction is refused admission.
///
/// Rejections are recoverable data, not process errors: the transaction is
/// dropped with its reason and the node continues.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TxRejection {
    #[error("missing UTXO for ({txid}, {index})")]
    MissingUtxo { txid: TxId, index: OutputIndex },

    #[error("multiple asset_ids in inputs")]
    MixedInputAssets,

    #[error("pubkey hash mismatch")]
    PubkeyHashMismatch,

    #[error("output asset_id mismatch")]
    OutputAssetMismatch,

    #[error("portion mismatch: in={total_in}, out={total_out}")]
    PortionMismatch { total_in: Portion, total_out: Portion },

    #[error("signature verification failed")]
    SignatureInvalid,
}

/// One hit in an asset's history: the containing block and the transaction
#[derive(Debug, Clone)]
pub struct AssetTraceEntry {
    pub height: BlockHeight,
    pub block_hash: Hash256,
    pub tx: Transaction,
}

#[derive(Debug, Default)]
struct ChainState {
    blocks: HashMap<Hash256, Block>,
    tip: Option<Hash256>,
    utxos: UtxoSet,
}

impl ChainState {
    fn tip_or_zero(&self) -> Hash256 {
        self.tip.unwrap_or_else(Hash256::zero)
    }
}

/// The authoritative ledger shared by every node in the process.
///
/// The chain map, tip and UTXO set live behind one coarse lock; the
/// proof-of-work nonce search runs with no lock held and the commit
/// re-checks the tip before appending.
pub struct Ledger {
    state: RwLock<ChainState>,
    store: Option<Arc<dyn ChainStore>>,
}

impl Default for Ledger {
    fn default() -> Self {
        Self::new()
    }
}

impl Ledger {
    /// Creates an empty in-memory ledger
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: RwLock::new(ChainState::default()),
            store: None,
        }
    }

    /// Creates an empty ledger that writes blocks and UTXOs through to the
    /// given store
    #[must_use]
    pub fn with_store(store: Arc<dyn ChainStore>) -> Self {
        Self {
            state: RwLock::new(ChainState::default()),
            store: Some(store),
        }
    }

    /// Rebuilds a ledger from a previously written store and keeps writing
    /// through to it
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be read
    pub fn restore(store: Arc<dyn ChainStore>) -> Result<Self> {
        let mut state = ChainState::default();

        for record in store.all_blocks()? {
            state.blocks.insert(record.hash, record.to_block());
        }
        if let Some(tip) = store.tip_block()? {
            state.tip = Some(tip.hash);
        }
        for record in store.all_utxos()? {
            state.utxos.add(
                record.txid,
                record.index,
                TxOutput::new(record.asset_id, record.pubkey_hash, record.portion),
            );
        }

        Ok(Self {
            state: RwLock::new(state),
            store: Some(store),
        })
    }

    /// Hash of the current best block, if any
    #[must_use]
    pub fn tip_hash(&self) -> Option<Hash256> {
        self.state.read().unwrap().tip
    }

    /// The current best block, if any
    #[must_use]
    pub fn tip_block(&self) -> Option<Block> {
        let state = self.state.read().unwrap();
        state.tip.and_then(|hash| state.blocks.get(&hash).cloned())
    }

    /// Height of the current best block, if any
    #[must_use]
    pub fn height(&self) -> Option<BlockHeight> {
        self.tip_block().map(|block| block.header.height)
    }

    /// Looks up a block by its header hash
    #[must_use]
    pub fn block(&self, hash: &Hash256) -> Option<Block> {
        self.state.read().unwrap().blocks.get(hash).cloned()
    }

    /// Stable view of the unspent outputs
    #[must_use]
    pub fn utxo_snapshot(&self) -> Vec<(OutPoint, TxOutput)> {
        self.state.read().unwrap().utxos.snapshot()
    }

    /// Sum of the unspent portions of one asset
    #[must_use]
    pub fn asset_total(&self, asset_id: &str) -> Portion {
        self.state.read().unwrap().utxos.asset_total(asset_id)
    }

    /// Checks a transaction against the current UTXO set without mutating
    /// any state. Validation is pure: two calls with no intervening
    /// mutation yield the same verdict.
    ///
    /// # Errors
    ///
    /// Returns the first failing check as a [`TxRejection`]
    pub fn validate_transaction(&self, tx: &Transaction) -> std::result::Result<(), TxRejection> {
        let state = self.state.read().unwrap();
        validate_against(&state.utxos, tx)
    }

    /// Installs the genesis block, applying every output without validation
    ///
    /// # Errors
    ///
    /// Returns [`ChainError::GenesisExists`] if the chain is not empty
    pub fn add_genesis_block(&self, block: Block) -> Result<()> {
        let hash = block.hash()?;
        let mut state = self.state.write().unwrap();
        if state.tip.is_some() {
            return Err(ChainError::GenesisExists);
        }

        if let Some(store) = self.store.as_deref() {
            store.insert_block(&BlockRecord::from_block(hash, &block))?;
        }
        for tx in &block.txs {
            for (index, output) in tx.outputs.iter().enumerate() {
                let index = output_index(index)?;
                state.utxos.add(tx.txid, index, output.clone());
                if let Some(store) = self.store.as_deref() {
                    store.insert_utxo(&utxo_record(tx.txid, index, output))?;
                }
            }
        }
        state.blocks.insert(hash, block);
        state.tip = Some(hash);
        Ok(())
    }

    /// Mines one block from the pending transactions.
    ///
    /// Scans `pending` in order, collecting each transaction that currently
    /// validates, until the list is exhausted or [`MAX_TX_PER_BLOCK`] are
    /// selected. The nonce search starts at zero and runs with no lock
    /// held; the commit re-checks that the tip still matches the captured
    /// previous hash.
    ///
    /// # Errors
    ///
    /// Returns [`ChainError::NothingToMine`] when no pending transaction
    /// validates, or [`ChainError::StaleTip`] when another block was
    /// appended during the search
    pub fn mine_block(&self, pending: &[Transaction]) -> Result<Block> {
        let (selected, height, prev_hash) = {
            let state = self.state.read().unwrap();

            let mut selected: Vec<Transaction> = Vec::new();
            for tx in pending {
                if validate_against(&state.utxos, tx).is_ok() {
                    selected.push(tx.clone());
                }
                if selected.len() >= MAX_TX_PER_BLOCK {
                    break;
                }
            }
            if selected.is_empty() {
                return Err(ChainError::NothingToMine);
            }

            let (height, prev_hash) = match state.tip.and_then(|hash| state.blocks.get(&hash)) {
                Some(tip_block) => (tip_block.header.height + 1, tip_block.hash()?),
                None => (0, Hash256::zero()),
            };
            (selected, height, prev_hash)
        };

        let txids: Vec<TxId> = selected.iter().map(|tx| tx.txid).collect();
        let merkle_root = codec::merkle_root(&txids);

        let mut nonce = 0u64;
        let header = loop {
            let header = BlockHeader::new(height, prev_hash, merkle_root, nonce);
            if header.hash()?.below_target(&POW_TARGET) {
                break header;
            }
            nonce += 1;
        };
        debug!(height, nonce, "proof-of-work found");

        let block = Block::new(header, selected);
        self.apply_block(&block)?;
        Ok(block)
    }

    /// Appends a block that extends the current tip and applies its
    /// transactions in order. Callers are responsible for validation; only
    /// the extend-the-tip check is re-done here, under the write lock.
    ///
    /// # Errors
    ///
    /// Returns [`ChainError::StaleTip`] when the block does not extend the
    /// current tip
    pub fn apply_block(&self, block: &Block) -> Result<()> {
        let hash = block.hash()?;
        let mut state = self.state.write().unwrap();
        if state.tip_or_zero() != block.header.prev_hash {
            return Err(ChainError::StaleTip);
        }

        if let Some(store) = self.store.as_deref() {
            store.insert_block(&BlockRecord::from_block(hash, block))?;
        }
        for tx in &block.txs {
            apply_transaction(&mut state, self.store.as_deref(), tx)?;
        }
        state.blocks.insert(hash, block.clone());
        state.tip = Some(hash);
        Ok(())
    }

    /// History of one asset, newest block first. A transaction contributes
    /// at most one entry even when several of its outputs match.
    #[must_use]
    pub fn trace_asset(&self, asset_id: &str) -> Vec<AssetTraceEntry> {
        let state = self.state.read().unwrap();

        let mut blocks: Vec<(&Hash256, &Block)> = state.blocks.iter().collect();
        blocks.sort_by(|a, b| b.1.header.height.cmp(&a.1.header.height));

        let mut entries = Vec::new();
        for (hash, block) in blocks {
            for tx in &block.txs {
                if tx.outputs.iter().any(|output| output.asset_id == asset_id) {
                    entries.push(AssetTraceEntry {
                        height: block.header.height,
                        block_hash: *hash,
                        tx: tx.clone(),
                    });
                }
            }
        }
        entries
    }

    /// Historical output lookup across every block, irrespective of spent
    /// status
    #[must_use]
    pub fn find_output_in_chain(&self, txid: &TxId, index: OutputIndex) -> Option<TxOutput> {
        let state = self.state.read().unwrap();
        for block in state.blocks.values() {
            for tx in &block.txs {
                if tx.txid == *txid {
                    if let Some(output) = tx.outputs.get(index as usize) {
                        return Some(output.clone());
                    }
                }
            }
        }
        None
    }

    /// Walks prev-hash links from the tip, returning (hash, block) pairs
    /// tip first. Stops on genesis, a missing block, or a revisited hash.
    #[must_use]
    pub fn build_chain_from_tip(&self) -> Vec<(Hash256, Block)> {
        let state = self.state.read().unwrap();
        walk_chain(&state.blocks, state.tip)
    }
}

fn output_index(index: usize) -> Result<OutputIndex> {
    OutputIndex::try_from(index)
        .map_err(|_| ChainError::InvalidBlock("output index overflow".to_string()))
}

fn utxo_record(txid: TxId, index: OutputIndex, output: &TxOutput) -> UtxoRecord {
    UtxoRecord {
        txid,
        index,
        asset_id: output.asset_id.clone(),
        pubkey_hash: output.pubkey_hash.clone(),
        portion: output.portion,
    }
}

/// Removes each input's outpoint, then adds each output under the new txid.
/// Pre-condition: the transaction validated against this UTXO set.
fn apply_transaction(
    state: &mut ChainState,
    store: Option<&dyn ChainStore>,
    tx: &Transaction,
) -> Result<()> {
    for input in &tx.inputs {
        state.utxos.remove(input.txid_ref, input.index);
        if let Some(store) = store {
            store.delete_utxo(&input.txid_ref, input.index)?;
        }
    }
    for (index, output) in tx.outputs.iter().enumerate() {
        let index = output_index(index)?;
        state.utxos.add(tx.txid, index, output.clone());
        if let Some(store) = store {
            store.insert_utxo(&utxo_record(tx.txid, index, output))?;
        }
    }
    Ok(())
}

/// The admission rules of the ledger, checked in order against a UTXO set:
/// outpoint existence, single input asset, pubkey-hash binding, output
/// asset match, portion conservation, then every signature over the
/// signing-form hash. Empty input lists are coinbase/genesis and accepted.
fn validate_against(utxos: &UtxoSet, tx: &Transaction) -> std::result::Result<(), TxRejection> {
    if tx.is_coinbase() {
        return Ok(());
    }

    let mut asset_id: Option<&str> = None;
    let mut total_in: Portion = 0;
    for input in &tx.inputs {
        let utxo = utxos
            .get(&input.txid_ref, input.index)
            .ok_or(TxRejection::MissingUtxo {
                txid: input.txid_ref,
                index: input.index,
            })?;

        match asset_id {
            None => asset_id = Some(utxo.asset_id.as_str()),
            Some(id) if id != utxo.asset_id => return Err(TxRejection::MixedInputAssets),
            Some(_) => {}
        }
        total_in += utxo.portion;

        let claimed = pubkey_hash_hex(&input.pubkey);
        if claimed.as_deref() != Some(utxo.pubkey_hash.as_str()) {
            return Err(TxRejection::PubkeyHashMismatch);
        }
    }

    let mut total_out: Portion = 0;
    for output in &tx.outputs {
        if asset_id != Some(output.asset_id.as_str()) {
            return Err(TxRejection::OutputAssetMismatch);
        }
        total_out += output.portion;
    }
    if total_in != total_out {
        return Err(TxRejection::PortionMismatch { total_in, total_out });
    }

    let msg_hash = tx.message_hash().map_err(|_| TxRejection::SignatureInvalid)?;
    for input in &tx.inputs {
        if !verify_signature(&input.pubkey, &msg_hash, &input.signature) {
            return Err(TxRejection::SignatureInvalid);
        }
    }
    Ok(())
}

fn walk_chain(
    blocks: &HashMap<Hash256, Block>,
    tip: Option<Hash256>,
) -> Vec<(Hash256, Block)> {
    let mut chain = Vec::new();
    let mut current = match tip {
        Some(hash) => hash,
        None => return chain,
    };

    let mut visited = HashSet::new();
    while visited.insert(current) {
        let block = match blocks.get(&current) {
            Some(block) => block,
            None => break,
        };
        chain.push((current, block.clone()));
        if block.header.prev_hash.is_zero() {
            break;
        }
        current = block.header.prev_hash;
    }
    chain
}
