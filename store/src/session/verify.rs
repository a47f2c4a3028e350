//! Startup convergence: repairs whatever a mid-commit abort left behind.

use log::info;
use sqlx::Row;

use chaindex_types::Hash256;

use crate::error::Result;
use crate::session::Session;

impl Session {
    /// Drops confirmed blocks that never got their coinbase data — the
    /// telltale of a process killed between the block insert and its
    /// coinbase commit. Genesis legitimately has no coinbase row and is
    /// exempt. The affected transactions are unconfirmed so a later sync
    /// re-imports the block cleanly.
    pub async fn remove_blocks_without_coinbase(&mut self) -> Result<()> {
        let rows = sqlx::query(
            "SELECT id, hash FROM block \
             WHERE height IS NOT NULL AND height != 0 \
               AND id NOT IN (SELECT block_id FROM coinbase)",
        )
        .fetch_all(self.conn().await?)
        .await?;

        let mut corrupt: Vec<(i64, Vec<u8>)> = Vec::with_capacity(rows.len());
        for row in &rows {
            corrupt.push((row.try_get("id")?, row.try_get("hash")?));
        }

        for (block_id, hash) in corrupt {
            info!("clearing corrupt block {}", hex::encode(&hash));

            let rows = sqlx::query(
                "SELECT id FROM tx WHERE confirmation IN \
                 (SELECT id FROM blocktx WHERE block_id = $1)",
            )
            .bind(block_id)
            .fetch_all(self.conn().await?)
            .await?;
            for row in &rows {
                let tx_id: i64 = row.try_get("id")?;
                self.unconfirm_transaction(tx_id).await?;
            }

            sqlx::query("DELETE FROM blocktx WHERE block_id = $1")
                .bind(block_id)
                .execute(self.conn().await?)
                .await?;
            sqlx::query("DELETE FROM block WHERE id = $1")
                .bind(block_id)
                .execute(self.conn().await?)
                .await?;
        }
        self.commit().await?;
        self.forget_chaintip();
        Ok(())
    }

    /// Re-runs the confirmation for transactions referenced from a
    /// confirmed block but never marked confirmed themselves.
    pub async fn verify_confirmed_transactions_state(&mut self) -> Result<()> {
        let rows = sqlx::query(
            "SELECT blocktx.block_id AS block_id, tx.txid AS txid \
             FROM blocktx \
             JOIN block ON blocktx.block_id = block.id \
             JOIN tx ON blocktx.tx_id = tx.id \
             WHERE block.height IS NOT NULL AND tx.confirmation IS NULL",
        )
        .fetch_all(self.conn().await?)
        .await?;

        let mut pending: Vec<(i64, Hash256)> = Vec::with_capacity(rows.len());
        for row in &rows {
            let txid_bytes: Vec<u8> = row.try_get("txid")?;
            let txid = Hash256::from_slice(&txid_bytes)
                .map_err(|e| crate::StoreError::Decode(e.to_string()))?;
            pending.push((row.try_get("block_id")?, txid));
        }

        for (block_id, txid) in pending {
            self.confirm_transaction(&txid, block_id, None).await?;
        }
        self.commit().await
    }

    /// Unconfirms transactions still pointing at a block whose height was
    /// NULLed.
    pub async fn verify_unconfirmed_transactions_state(&mut self) -> Result<()> {
        let rows = sqlx::query(
            "SELECT tx.id AS id FROM tx \
             JOIN blocktx ON tx.confirmation = blocktx.id \
             JOIN block ON blocktx.block_id = block.id \
             WHERE block.height IS NULL",
        )
        .fetch_all(self.conn().await?)
        .await?;

        let mut pending: Vec<i64> = Vec::with_capacity(rows.len());
        for row in &rows {
            pending.push(row.try_get("id")?);
        }
        for tx_id in pending {
            self.unconfirm_transaction(tx_id).await?;
        }
        self.commit().await
    }
}
