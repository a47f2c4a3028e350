//! The cooperative main loop: Verifying → InitialSync → Live.

use std::time::Duration;

use log::{info, warn};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use chaindex_daemon::NodeRpc;
use chaindex_store::Session;

use crate::service::Service;
use crate::Result;

/// Soft deadline for each bounded background task per pass.
const TASK_DEADLINE: Duration = Duration::from_secs(3);

/// Sleep when a full pass found nothing to do.
const IDLE_SLEEP: Duration = Duration::from_secs(1);

/// Back-off after losing the node connection.
const RECONNECT_SLEEP: Duration = Duration::from_secs(10);

/// Drives `$method` until it reports idle or the soft deadline passes.
macro_rules! drive_until_deadline {
    ($service:ident, $method:ident) => {{
        let deadline = Instant::now() + TASK_DEADLINE;
        let mut worked = false;
        while $service.$method().await? {
            worked = true;
            if Instant::now() >= deadline {
                break;
            }
        }
        worked
    }};
}

impl<N: NodeRpc> Service<N> {
    /// Runs the engine until cancelled. Transient node trouble is absorbed
    /// by rebuilding the session (fresh caches included) and backing off;
    /// anything else is surfaced so the supervisor restarts the process
    /// into the Verifying state.
    pub async fn run(&mut self, shutdown: CancellationToken) -> Result<()> {
        self.verify_state().await?;

        while !shutdown.is_cancelled() {
            match self.initial_sync().await {
                Ok(()) => break,
                Err(err) if err.is_transient() => {
                    warn!("initial sync interrupted: {err}; reconnecting");
                    self.rebuild_session();
                    sleep_or_cancel(RECONNECT_SLEEP, &shutdown).await;
                }
                Err(err) => return Err(err),
            }
        }

        self.live_loop(shutdown).await
    }

    /// Converges the store with its own invariants after an unclean stop:
    /// half-committed blocks are cleared, dangling confirmation links
    /// repaired in both directions, interrupted slow balance updates
    /// requeued.
    async fn verify_state(&mut self) -> Result<()> {
        info!("verifying store state");
        self.session.remove_blocks_without_coinbase().await?;
        self.session.verify_confirmed_transactions_state().await?;
        self.session.verify_unconfirmed_transactions_state().await?;
        self.session.reset_slow_balance_updates().await?;
        Ok(())
    }

    async fn initial_sync(&mut self) -> Result<()> {
        match self.node.uptime().await {
            Ok(uptime) => info!("node reachable, up for {uptime} s"),
            Err(err) => warn!("node uptime probe failed: {err}"),
        }
        let chain_height = self.node.best_height().await?;
        let indexer_height = self
            .session
            .chaintip()
            .await?
            .and_then(|tip| tip.height)
            .unwrap_or(-1);
        info!("initial sync: indexer at height {indexer_height}, node at {chain_height}");
        self.sync_blocks(true).await?;
        info!("initial sync complete, switching to live tracking");
        Ok(())
    }

    async fn live_loop(&mut self, shutdown: CancellationToken) -> Result<()> {
        loop {
            if shutdown.is_cancelled() {
                info!("interrupt received, stopping between units");
                return Ok(());
            }
            match self.live_pass().await {
                Ok(did_work) => {
                    if !did_work {
                        sleep_or_cancel(IDLE_SLEEP, &shutdown).await;
                    }
                }
                Err(err) if err.is_transient() => {
                    warn!("lost the node: {err}; reconnecting");
                    self.rebuild_session();
                    sleep_or_cancel(RECONNECT_SLEEP, &shutdown).await;
                }
                Err(err) => return Err(err),
            }
        }
    }

    /// One cooperative pass over every duty. Chain and mempool first, then
    /// each bounded background task until its deadline or idle.
    async fn live_pass(&mut self) -> Result<bool> {
        self.session.reset().await?;

        let mut did_work = self.query_mempool().await?;
        did_work |= self.sync_blocks(false).await?;
        did_work |= self.check_mempool_for_doublespends().await?;

        did_work |= drive_until_deadline!(self, update_single_balance);
        did_work |= drive_until_deadline!(self, update_coindays_destroyed);
        did_work |= drive_until_deadline!(self, migrate_old_data);

        Ok(did_work)
    }

    fn rebuild_session(&mut self) {
        self.session = Session::new(self.pool.clone(), self.utxo_cache);
    }
}

async fn sleep_or_cancel(duration: Duration, shutdown: &CancellationToken) {
    tokio::select! {
        _ = tokio::time::sleep(duration) => {}
        _ = shutdown.cancelled() => {}
    }
}
