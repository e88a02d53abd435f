//! Core of daChain: a pedagogical UTXO ledger tracking fractional ownership
//! of named assets, with proof-of-work mining, flood gossip between full
//! nodes, background traffic and a supervisory observer.

pub mod block;
pub mod codec;
pub mod ledger;
pub mod master;
pub mod node;
pub mod store;
pub mod traffic;
pub mod transaction;
pub mod utxo;

// Main re-exports
pub use block::{Block, BlockHeader};
pub use ledger::{AssetTraceEntry, Ledger, TxRejection, MAX_TX_PER_BLOCK, POW_TARGET};
pub use master::{ChainSnapshot, Master};
pub use node::{BlockObserver, FullNode};
pub use store::{BlockRecord, ChainStore, MemoryStore, UtxoRecord, WalletRecord};
pub use traffic::{
    random_invalid_transaction, random_valid_transaction, TrafficConfig, UserProcess,
};
pub use transaction::{Transaction, TxInput, TxOutput};
pub use utxo::UtxoSet;

// Shared type re-exports
pub use shared::{ChainError, Hash256, OutPoint, Result, Wallet};
