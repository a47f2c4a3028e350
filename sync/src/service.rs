//! Chain synchronisation: common-ancestor search, reorg handling and block
//! import driving.

use std::time::Duration;

use log::{info, warn};
use tokio::time::Instant;

use chaindex_daemon::{NodeResolver, NodeRpc};
use chaindex_store::cache::TtlCache;
use chaindex_store::{SQLXPool, Session};
use chaindex_types::Hash256;

use crate::migrate::Migration;
use crate::{Result, SyncError};

/// During catch-up the open unit is committed at least this often.
const COMMIT_INTERVAL: Duration = Duration::from_secs(3);

/// Interior-gap verification window on initial sync.
const GAP_WINDOW: i64 = 1_000;

/// Mempool txids already inspected this run.
const MEMPOOL_SEEN_TTL: Duration = Duration::from_secs(600);
const MEMPOOL_SEEN_CAPACITY: usize = 4_096;

/// The indexer engine: one writer session plus the node it mirrors.
pub struct Service<N: NodeRpc> {
    pub(crate) node: N,
    pub(crate) pool: SQLXPool,
    pub(crate) session: Session,
    pub(crate) utxo_cache: bool,
    pub(crate) mempool_seen: TtlCache<Hash256>,
    pub(crate) last_doublespend_tip: Option<Hash256>,
    pub(crate) migration: Migration,
}

impl<N: NodeRpc> Service<N> {
    pub fn new(node: N, pool: SQLXPool, utxo_cache: bool) -> Service<N> {
        Service {
            node,
            session: Session::new(pool.clone(), utxo_cache),
            pool,
            utxo_cache,
            mempool_seen: TtlCache::new(MEMPOOL_SEEN_TTL, MEMPOOL_SEEN_CAPACITY),
            last_doublespend_tip: None,
            migration: Migration::default(),
        }
    }

    /// Highest height where the store and the node agree, along with both
    /// tips. `-1` all around when the store is empty.
    pub(crate) async fn find_common_ancestor(&mut self) -> Result<(i64, i64, i64)> {
        let chain_height = self.node.best_height().await?;
        let indexer_height = match self.session.chaintip().await? {
            Some(tip) => tip.height.unwrap_or(-1),
            None => return Ok((-1, -1, chain_height)),
        };

        let mut height = indexer_height.min(chain_height);
        while height > 0 {
            let node_hash = self.node.block_hash(height).await?;
            let stored = self.session.block_by_height(height).await?;
            if stored.map(|block| block.hash) == Some(node_hash) {
                break;
            }
            height -= 1;
        }
        Ok((height, indexer_height, chain_height))
    }

    /// Catches the store up to the node's tip. Returns whether anything
    /// changed. A common ancestor below our own tip means a reorganisation:
    /// the stale blocks are orphaned before the replacement chain imports.
    pub async fn sync_blocks(&mut self, initial: bool) -> Result<bool> {
        let (ancestor, indexer_height, chain_height) = self.find_common_ancestor().await?;
        let mut did_work = false;

        if ancestor < indexer_height {
            info!(
                "reorganisation: orphaning heights {}..={indexer_height}",
                ancestor + 1
            );
            self.session.orphan_blocks(ancestor + 1).await?;
            did_work = true;
        }

        if initial {
            did_work |= self.verify_block_ranges(ancestor).await?;
        }

        if ancestor == chain_height {
            return Ok(did_work);
        }

        let mut last_commit = Instant::now();
        for height in (ancestor + 1)..=chain_height {
            self.import_blockheight(height, false).await?;
            if last_commit.elapsed() >= COMMIT_INTERVAL {
                self.session.commit().await?;
                last_commit = Instant::now();
            }
        }
        self.session.commit().await?;
        Ok(true)
    }

    /// Imports the node's block at one height, checking that it chains onto
    /// what the store already holds. A `previousblockhash` mismatch is fatal
    /// for the unit; a disagreeing stored successor is orphaned first.
    pub(crate) async fn import_blockheight(&mut self, height: i64, commit: bool) -> Result<()> {
        let hash = self.node.block_hash(height).await?;
        let info = self.node.block(&hash).await?;

        if height > 0 {
            if let (Some(previous), Some(stored_parent)) = (
                info.previousblockhash,
                self.session.block_by_height(height - 1).await?,
            ) {
                if stored_parent.hash != previous {
                    return Err(SyncError::Chain(format!(
                        "block {hash} at height {height} does not chain onto stored block {}",
                        stored_parent.hash
                    )));
                }
            }
        }
        if let Some(next) = info.nextblockhash {
            if let Some(stored_child) = self.session.block_by_height(height + 1).await? {
                if stored_child.hash != next {
                    self.session.orphan_blocks(height + 1).await?;
                }
            }
        }

        self.session
            .import_block(&info, &NodeResolver(&self.node), commit)
            .await?;
        Ok(())
    }

    /// Initial-sync safety net: every full window below the common ancestor
    /// must be dense; missing heights are re-imported one by one.
    async fn verify_block_ranges(&mut self, through_height: i64) -> Result<bool> {
        let mut did_work = false;
        let mut window_start = 0;
        while window_start <= through_height {
            let window_end = (window_start + GAP_WINDOW).min(through_height + 1);
            let expected = window_end - window_start;
            let found = self
                .session
                .block_count_in_range(window_start, window_end)
                .await?;
            if found != expected {
                warn!(
                    "heights {window_start}..{window_end} hold {found}/{expected} blocks, re-importing"
                );
                for height in window_start..window_end {
                    if self.session.block_by_height(height).await?.is_none() {
                        self.import_blockheight(height, true).await?;
                        did_work = true;
                    }
                }
            }
            window_start += GAP_WINDOW;
        }
        Ok(did_work)
    }
}
