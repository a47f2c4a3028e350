//! Balance reconciliation drivers: the fast pass inside the main loop and
//! the standalone slow worker.

use std::time::Duration;

use log::info;
use tokio_util::sync::CancellationToken;

use chaindex_daemon::NodeRpc;
use chaindex_store::{SQLXPool, Session};

use crate::service::Service;
use crate::Result;

const WORKER_IDLE_SLEEP: Duration = Duration::from_secs(10);

impl<N: NodeRpc> Service<N> {
    /// Fast pass: settle (or defer) one queued address.
    pub async fn update_single_balance(&mut self) -> Result<bool> {
        match self.session.next_dirty_address(1, false).await? {
            Some(address) => {
                self.session.update_address_balance(&address).await?;
                Ok(true)
            }
            None => Ok(false),
        }
    }
}

/// The background process handling deferred (mode-2) balance updates.
/// Addresses are picked at random so restarts do not hammer the same few
/// giants; interrupted in-progress rows are requeued at startup.
pub async fn run_balance_worker(pool: SQLXPool, shutdown: CancellationToken) -> Result<()> {
    let mut session = Session::new(pool, false);
    session.reset_slow_balance_updates().await?;
    info!("balance worker started");

    loop {
        if shutdown.is_cancelled() {
            info!("balance worker shutting down");
            return Ok(());
        }
        let worked = match session.next_dirty_address(2, true).await? {
            Some(address) => {
                session.update_address_balance_slow(&address).await?;
                true
            }
            None => false,
        };
        if !worked {
            session.reset().await?;
            tokio::select! {
                _ = tokio::time::sleep(WORKER_IDLE_SLEEP) => {}
                _ = shutdown.cancelled() => {}
            }
        }
    }
}
