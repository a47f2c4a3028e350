//! The chaindex indexer engine.
//!
//! A single [`Service`] owns the one writer session and multiplexes every
//! background duty cooperatively: catching up to the node's tip (reorgs
//! included), tracking the mempool, reconciling dirty balances, accumulating
//! coin-days-destroyed and back-filling derived columns. All of it runs on
//! one task; the only suspension points are node RPCs, store round-trips and
//! the idle sleep.

mod balances;
mod coindays;
mod mempool;
mod migrate;
mod scheduler;
mod service;

#[cfg(test)]
mod tests;

pub use balances::run_balance_worker;
pub use service::Service;

use chaindex_daemon::DaemonError;
use chaindex_store::StoreError;

/// Engine-level failures. Transient ones (node connectivity) make the
/// scheduler rebuild its session and retry; everything else ends the
/// process so a supervisor can restart into the Verifying state.
#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Daemon(#[from] DaemonError),
    #[error("chain error: {0}")]
    Chain(String),
}

impl SyncError {
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            SyncError::Daemon(_) | SyncError::Store(StoreError::Resolver(_))
        )
    }
}

pub type Result<T> = std::result::Result<T, SyncError>;
