//! Domain types shared across the chaindex crates.

mod amount;
mod hash;
mod kinds;
mod node;

pub use amount::{Amount, COIN};
pub use hash::{Hash256, ParseHashError};
pub use kinds::{AddressKind, TxOutKind};
pub use node::{
    BlockInfo, BlockchainInfo, DecodedScript, ScriptPubKey, TransactionInfo, TxIn, TxOut,
    ValidatedAddress,
};

use async_trait::async_trait;

/// Resolves a txid into the node's decoded transaction view.
///
/// The store consumes this at import time so it never has to know which
/// concrete client is behind it; the daemon crate provides the production
/// implementation, tests use in-memory maps.
#[async_trait]
pub trait TransactionResolver: Send + Sync {
    async fn resolve_transaction(&self, txid: &Hash256) -> anyhow::Result<TransactionInfo>;
}
