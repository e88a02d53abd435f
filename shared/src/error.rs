use thiserror::Error;

/// Process-level ledger errors
#[derive(Error, Debug)]
pub enum ChainError {
    #[error("invalid block: {0}")]
    InvalidBlock(String),

    #[error("invalid hash: {0}")]
    InvalidHash(String),

    #[error("no valid transactions to mine")]
    NothingToMine,

    #[error("chain tip moved during mining")]
    StaleTip,

    #[error("genesis block already present")]
    GenesisExists,

    #[error("cryptographic error: {0}")]
    Crypto(String),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("storage error: {0}")]
    Store(String),
}
