//! Persisted aggregate counters with validity flags.
//!
//! The counters live in the store (`cachedvalue` table) so the read façade
//! can share them; the writer keeps them in lockstep with block commits and
//! flips every flag off whenever an event cannot be fixed up incrementally.

use log::info;
use sqlx::Row;

use chaindex_types::Amount;

use crate::error::Result;
use crate::session::Session;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CounterId {
    TotalTransactions = 1,
    TotalBlocks = 2,
    TotalFees = 3,
    TotalCoinsReleased = 4,
}

impl CounterId {
    pub const ALL: [CounterId; 4] = [
        CounterId::TotalTransactions,
        CounterId::TotalBlocks,
        CounterId::TotalFees,
        CounterId::TotalCoinsReleased,
    ];

    /// Counters kept in lockstep with block rows.
    pub const BLOCK_GROUP: [CounterId; 3] = [
        CounterId::TotalBlocks,
        CounterId::TotalFees,
        CounterId::TotalCoinsReleased,
    ];

    /// Counters kept in lockstep with confirmed transactions.
    pub const TRANSACTION_GROUP: [CounterId; 1] = [CounterId::TotalTransactions];

    pub fn id(self) -> i64 {
        self as i64
    }
}

impl Session {
    pub async fn counter(&mut self, id: CounterId) -> Result<i64> {
        let row = sqlx::query("SELECT value FROM cachedvalue WHERE id = $1")
            .bind(id.id())
            .fetch_one(self.conn().await?)
            .await?;
        Ok(row.try_get("value")?)
    }

    pub async fn set_counter(&mut self, id: CounterId, value: i64) -> Result<()> {
        sqlx::query("UPDATE cachedvalue SET value = $1, valid = 1 WHERE id = $2")
            .bind(value)
            .bind(id.id())
            .execute(self.conn().await?)
            .await?;
        Ok(())
    }

    pub async fn add_to_counter(&mut self, id: CounterId, delta: i64) -> Result<()> {
        let value = self.counter(id).await?;
        self.set_counter(id, value + delta).await
    }

    /// Flags every counter invalid; the next block import recomputes them.
    pub async fn invalidate_counters(&mut self) -> Result<()> {
        info!("dropping aggregate counter caches");
        sqlx::query("UPDATE cachedvalue SET valid = 0")
            .execute(self.conn().await?)
            .await?;
        Ok(())
    }

    pub async fn counters_valid(&mut self, ids: &[CounterId]) -> Result<bool> {
        for id in ids {
            let row = sqlx::query("SELECT valid FROM cachedvalue WHERE id = $1")
                .bind(id.id())
                .fetch_one(self.conn().await?)
                .await?;
            if row.try_get::<i64, _>("valid")? == 0 {
                return Ok(false);
            }
        }
        Ok(true)
    }

    /// Recomputes and revalidates any invalid counter group from a full
    /// aggregate query. Commits each recomputed group, as incremental
    /// updates must start from a durable valid base.
    pub async fn revalidate_counters(&mut self) -> Result<()> {
        if self.counters_valid(&CounterId::ALL).await? {
            return Ok(());
        }
        self.commit().await?;

        if !self.counters_valid(&CounterId::BLOCK_GROUP).await? {
            info!("recalculating block counter caches");
            let stats = self.aggregate_block_stats().await?;
            self.set_counter(CounterId::TotalBlocks, stats.0).await?;
            self.set_counter(CounterId::TotalFees, stats.1.sats()).await?;
            self.set_counter(CounterId::TotalCoinsReleased, stats.2.sats())
                .await?;
            self.commit().await?;
        }

        if !self.counters_valid(&CounterId::TRANSACTION_GROUP).await? {
            info!("recalculating transaction counter caches");
            let transactions = self.aggregate_confirmed_transactions().await?;
            self.set_counter(CounterId::TotalTransactions, transactions)
                .await?;
            self.commit().await?;
        }
        Ok(())
    }

    /// `(on-chain blocks, total fees, coins released)` from scratch.
    pub(crate) async fn aggregate_block_stats(&mut self) -> Result<(i64, Amount, Amount)> {
        let row = sqlx::query(
            "SELECT COUNT(block.id) AS blocks, \
                    CAST(SUM(block.totalfee) AS BIGINT) AS totalfees, \
                    CAST(SUM(coinbase.newcoins) AS BIGINT) AS newcoins \
             FROM block \
             LEFT JOIN coinbase ON coinbase.block_id = block.id \
             WHERE block.height IS NOT NULL",
        )
        .fetch_one(self.conn().await?)
        .await?;
        Ok((
            row.try_get("blocks")?,
            Amount::from_sats(row.try_get::<Option<i64>, _>("totalfees")?.unwrap_or(0)),
            Amount::from_sats(row.try_get::<Option<i64>, _>("newcoins")?.unwrap_or(0)),
        ))
    }

    /// Count of confirmed non-coinbase transactions from scratch.
    pub(crate) async fn aggregate_confirmed_transactions(&mut self) -> Result<i64> {
        let row = sqlx::query(
            "SELECT COUNT(tx.id) AS transactions \
             FROM tx \
             JOIN blocktx ON tx.confirmation = blocktx.id \
             JOIN block ON blocktx.block_id = block.id \
             WHERE block.height IS NOT NULL \
               AND tx.id NOT IN (SELECT tx_id FROM coinbase)",
        )
        .fetch_one(self.conn().await?)
        .await?;
        Ok(row.try_get("transactions")?)
    }
}
