use chaindex_types::Hash256;

/// Errors surfaced by the persistence layer.
///
/// `Resolver` wraps failures of the upstream transaction resolver (usually
/// node RPC trouble) and is the only transient variant; everything else
/// means the unit of work cannot succeed as issued.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Db(#[from] sqlx::Error),
    #[error("transaction resolver failed: {0}")]
    Resolver(#[source] anyhow::Error),
    #[error("transaction {0} is not in the store and no resolver was supplied")]
    UnknownTransaction(Hash256),
    #[error("input {txid}:{vout} could not be resolved to a known output")]
    UtxoMissing { txid: Hash256, vout: u32 },
    #[error("chain state error: {0}")]
    Chain(String),
    #[error("malformed database row: {0}")]
    Decode(String),
}

pub type Result<T> = std::result::Result<T, StoreError>;
