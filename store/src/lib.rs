//! Relational persistence layer and writer session for chaindex.
//!
//! The engine owns exactly one [`Session`] (the single writer); the HTTP
//! façade reads through [`Reader`] on short-lived pool connections. Both
//! operate on the same schema, bootstrapped by [`SQLXPool::connect`].

pub mod cache;
mod counters;
mod entities;
mod error;
mod pool;
mod queries;
mod reader;
mod session;

#[cfg(test)]
mod tests;

pub use cache::{CachedAddress, Caches};
pub use counters::CounterId;
pub use entities::{
    AddressRow, BlockRow, BlockTxRow, CoinbaseRow, MutationRow, PoolRow, TransactionRow, TxInRow,
    TxOutRow,
};
pub use error::{Result, StoreError};
pub use pool::{Driver, SQLXPool};
pub use reader::{
    AddressMutation, BlockStats, InputDetail, OutputDetail, PoolStats, Reader, RichlistEntry,
    TransactionMutation, TransactionStats,
};
pub use session::{CoinbaseCapture, CoinbaseSink, CoindaysCandidate, Session};

/// Seeded pool group that collects solo miners.
pub const SOLO_POOL_GROUP_ID: i64 = 1;

/// Fast balance updates defer to the slow path beyond this many unspent
/// outputs on one address.
pub const BALANCE_DEFER_UTXO_COUNT: i64 = 5_000;

/// A coinbase output carrying more than this share of the total coinbase
/// value is treated as the pool's payout output. Empirical policy, not law.
pub const MAINOUTPUT_THRESHOLD_PCT: i64 = 95;

/// Coinbase scripts this short carry no pool tag at all.
pub const SOLO_COINBASE_MAX_LEN: usize = 8;
