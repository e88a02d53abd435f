pub mod crypto;
pub mod error;
pub mod hash;
pub mod types;

pub use crypto::{pubkey_hash_hex, verify_signature, Wallet};
pub use error::ChainError;
pub use hash::Hash256;
pub use types::{
    AssetId, BlockHeight, BlockId, OutPoint, OutputIndex, Portion, PubKeyHashHex, PubKeyHex,
    SignatureHex, TxId,
};

pub type Result<T> = std::result::Result<T, ChainError>;
