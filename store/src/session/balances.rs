//! Dirty-flag driven per-address balance reconciliation.
//!
//! `balance_dirty` states: 0 clean, 1 queued for the fast pass, 2 deferred
//! to the slow pass, 3 slow update in progress. Confirm/unconfirm flips
//! touched addresses to 1; flipping an in-progress 3 back to 1 is what makes
//! a racing slow update abort instead of writing a stale balance.

use std::time::Instant;

use log::{debug, info};
use sqlx::Row;

use chaindex_types::Amount;

use crate::entities::AddressRow;
use crate::error::Result;
use crate::session::Session;
use crate::BALANCE_DEFER_UTXO_COUNT;

impl Session {
    /// One address whose dirty flag equals `mode`, lowest id first, or a
    /// random one for the background worker so parallel runs spread out.
    pub async fn next_dirty_address(&mut self, mode: i64, random: bool) -> Result<Option<AddressRow>> {
        let order = if random { "RANDOM()" } else { "id" };
        let sql = format!(
            "SELECT {} FROM address WHERE balance_dirty = $1 ORDER BY {} LIMIT 1",
            AddressRow::COLUMNS,
            order
        );
        let row = sqlx::query(&sql)
            .bind(mode)
            .fetch_optional(self.conn().await?)
            .await?;
        row.as_ref().map(AddressRow::from_row).transpose()
    }

    /// Fast pass: recomputes the balance in one statement, unless the
    /// address holds too many unspent outputs, in which case it is deferred
    /// to the slow pass untouched.
    pub async fn update_address_balance(&mut self, address: &AddressRow) -> Result<()> {
        debug!("updating balance of {}", address.display());
        let started = Instant::now();

        let row = sqlx::query(
            "SELECT COUNT(id) AS utxos FROM txout \
             WHERE address_id = $1 AND spentby IS NULL",
        )
        .bind(address.id)
        .fetch_one(self.conn().await?)
        .await?;
        let utxos: i64 = row.try_get("utxos")?;

        if utxos > BALANCE_DEFER_UTXO_COUNT {
            sqlx::query("UPDATE address SET balance_dirty = 2 WHERE id = $1")
                .bind(address.id)
                .execute(self.conn().await?)
                .await?;
            self.commit().await?;
            info!("deferred balance of {} ({utxos} utxos)", address.display());
            return Ok(());
        }

        sqlx::query(
            "UPDATE address SET balance_dirty = 0, balance = COALESCE(( \
                 SELECT SUM(txout.amount) FROM txout \
                 JOIN tx ON txout.tx_id = tx.id \
                 WHERE txout.address_id = $1 \
                   AND txout.spentby IS NULL \
                   AND tx.confirmation IS NOT NULL \
             ), 0) WHERE id = $1",
        )
        .bind(address.id)
        .execute(self.conn().await?)
        .await?;
        self.commit().await?;

        debug!(
            "updated balance of {} ({utxos} utxos, {} ms)",
            address.display(),
            started.elapsed().as_millis()
        );
        Ok(())
    }

    /// Slow pass, split so the expensive aggregate runs outside the write
    /// transaction: mark in-progress, compute, then write back only if
    /// nobody re-dirtied the row in the meantime.
    pub async fn update_address_balance_slow(&mut self, address: &AddressRow) -> Result<()> {
        info!("slow balance update of {}", address.display());
        let started = Instant::now();

        self.begin_slow_balance_update(address.id).await?;
        let balance = self.confirmed_unspent_balance(address.id).await?;
        self.reset().await?;

        if self.finish_slow_balance_update(address.id, balance).await? {
            info!(
                "updated balance of {} to {balance} ({} s)",
                address.display(),
                started.elapsed().as_secs()
            );
        } else {
            info!("aborted balance update of {}", address.display());
        }
        Ok(())
    }

    pub async fn begin_slow_balance_update(&mut self, address_id: i64) -> Result<()> {
        sqlx::query("UPDATE address SET balance_dirty = 3 WHERE id = $1")
            .bind(address_id)
            .execute(self.conn().await?)
            .await?;
        self.commit().await
    }

    /// Writes the computed balance back iff the row is still in-progress.
    pub async fn finish_slow_balance_update(
        &mut self,
        address_id: i64,
        balance: Amount,
    ) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE address SET balance_dirty = 0, balance = $1 \
             WHERE id = $2 AND balance_dirty = 3",
        )
        .bind(balance.sats())
        .bind(address_id)
        .execute(self.conn().await?)
        .await?;
        self.commit().await?;
        Ok(result.rows_affected() > 0)
    }

    /// Sum of the address's confirmed, unspent outputs.
    pub async fn confirmed_unspent_balance(&mut self, address_id: i64) -> Result<Amount> {
        let row = sqlx::query(
            "SELECT CAST(COALESCE(SUM(txout.amount), 0) AS BIGINT) AS balance FROM txout \
             JOIN tx ON txout.tx_id = tx.id \
             WHERE txout.address_id = $1 \
               AND txout.spentby IS NULL \
               AND tx.confirmation IS NOT NULL",
        )
        .bind(address_id)
        .fetch_one(self.conn().await?)
        .await?;
        Ok(Amount::from_sats(row.try_get("balance")?))
    }

    /// Interrupted slow updates are retried on the next run.
    pub async fn reset_slow_balance_updates(&mut self) -> Result<()> {
        sqlx::query("UPDATE address SET balance_dirty = 2 WHERE balance_dirty = 3")
            .execute(self.conn().await?)
            .await?;
        self.commit().await
    }
}
