//! Double-spend links, coin-days-destroyed candidates and the derived-column
//! backfill units driven by the migration runner.

use log::info;
use sqlx::Row;

use chaindex_types::Amount;

use crate::entities::AddressRow;
use crate::error::Result;
use crate::session::Session;

/// A confirmed non-coinbase transaction still lacking its
/// coin-days-destroyed row.
#[derive(Clone, Debug)]
pub struct CoindaysCandidate {
    pub tx_id: i64,
    pub firstseen: Option<i64>,
    pub block_time: i64,
}

impl Session {
    /// Internal id of the coinbase transaction of one block, if recorded.
    pub async fn coinbase_tx_of_block(&mut self, block_id: i64) -> Result<Option<i64>> {
        let coinbase = crate::queries::coinbase_for_block(self.conn().await?, block_id).await?;
        Ok(coinbase.map(|row| row.tx_id))
    }

    /// Orphaned coinbases can never reconfirm once the canonical chain has
    /// taken their slot; they double-spend against the tip's coinbase.
    pub async fn mark_coinbase_doublespends(&mut self, tip_coinbase_tx: i64) -> Result<u64> {
        let result = sqlx::query(
            "UPDATE tx SET doublespends = $1 \
             WHERE confirmation IS NULL \
               AND doublespends IS NULL \
               AND id != $1 \
               AND id IN ( \
                   SELECT coinbase.tx_id FROM coinbase \
                   JOIN block ON coinbase.block_id = block.id \
                   WHERE block.height IS NULL \
               )",
        )
        .bind(tip_coinbase_tx)
        .execute(self.conn().await?)
        .await?;
        Ok(result.rows_affected())
    }

    /// An unconfirmed transaction consuming an output that a different,
    /// confirmed transaction has already taken is marked with that spender.
    pub async fn mark_spent_input_doublespends(&mut self) -> Result<u64> {
        let result = sqlx::query(
            "UPDATE tx SET doublespends = ( \
                 SELECT spender.tx_id FROM txin me \
                 JOIN txout o ON me.input = o.id \
                 JOIN txin spender ON o.spentby = spender.id \
                 WHERE me.tx_id = tx.id AND spender.tx_id != tx.id \
                 LIMIT 1 \
             ) \
             WHERE tx.confirmation IS NULL \
               AND tx.doublespends IS NULL \
               AND EXISTS ( \
                   SELECT 1 FROM txin me \
                   JOIN txout o ON me.input = o.id \
                   JOIN txin spender ON o.spentby = spender.id \
                   WHERE me.tx_id = tx.id AND spender.tx_id != tx.id \
               )",
        )
        .execute(self.conn().await?)
        .await?;
        Ok(result.rows_affected())
    }

    /// Descendants of a double-spending transaction are themselves dead;
    /// they point at their direct parent.
    pub async fn propagate_doublespends(&mut self) -> Result<u64> {
        let result = sqlx::query(
            "UPDATE tx SET doublespends = ( \
                 SELECT parent.id FROM txin me \
                 JOIN txout o ON me.input = o.id \
                 JOIN tx parent ON o.tx_id = parent.id \
                 WHERE me.tx_id = tx.id AND parent.doublespends IS NOT NULL \
                 LIMIT 1 \
             ) \
             WHERE tx.confirmation IS NULL \
               AND tx.doublespends IS NULL \
               AND EXISTS ( \
                   SELECT 1 FROM txin me \
                   JOIN txout o ON me.input = o.id \
                   JOIN tx parent ON o.tx_id = parent.id \
                   WHERE me.tx_id = tx.id AND parent.doublespends IS NOT NULL \
               )",
        )
        .execute(self.conn().await?)
        .await?;
        Ok(result.rows_affected())
    }

    /// Next batch of confirmed non-coinbase transactions without a
    /// coin-days-destroyed row, oldest blocks first.
    pub async fn next_transactions_without_coindays(
        &mut self,
        limit: i64,
    ) -> Result<Vec<CoindaysCandidate>> {
        let rows = sqlx::query(
            "SELECT tx.id AS tx_id, tx.firstseen AS firstseen, \
                    block.timestamp AS block_time \
             FROM tx \
             JOIN blocktx ON tx.confirmation = blocktx.id \
             JOIN block ON blocktx.block_id = block.id \
             WHERE block.height IS NOT NULL \
               AND tx.id NOT IN (SELECT tx_id FROM coindays) \
               AND tx.id NOT IN (SELECT tx_id FROM coinbase) \
             ORDER BY block.id, tx.id \
             LIMIT $1",
        )
        .bind(limit)
        .fetch_all(self.conn().await?)
        .await?;
        rows.iter()
            .map(|row| {
                Ok(CoindaysCandidate {
                    tx_id: row.try_get("tx_id")?,
                    firstseen: row.try_get("firstseen")?,
                    block_time: row.try_get("block_time")?,
                })
            })
            .collect()
    }

    /// `(amount, source block timestamp)` for every input of a confirmed
    /// transaction.
    pub async fn input_ages(&mut self, tx_id: i64) -> Result<Vec<(Amount, i64)>> {
        let rows = sqlx::query(
            "SELECT txout.amount AS amount, srcblock.timestamp AS source_time \
             FROM txin \
             JOIN txout ON txin.input = txout.id \
             JOIN tx src ON txout.tx_id = src.id \
             JOIN blocktx ON src.confirmation = blocktx.id \
             JOIN block srcblock ON blocktx.block_id = srcblock.id \
             WHERE txin.tx_id = $1",
        )
        .bind(tx_id)
        .fetch_all(self.conn().await?)
        .await?;
        rows.iter()
            .map(|row| {
                Ok((
                    Amount::from_sats(row.try_get("amount")?),
                    row.try_get("source_time")?,
                ))
            })
            .collect()
    }

    pub async fn insert_coindays(&mut self, tx_id: i64, coindays: f64) -> Result<()> {
        sqlx::query("INSERT INTO coindays (tx_id, coindays) VALUES ($1, $2)")
            .bind(tx_id)
            .bind(coindays)
            .execute(self.conn().await?)
            .await?;
        Ok(())
    }

    /// Migration phase 1: oldest transaction past the cursor that has
    /// outputs but no mutation rows yet.
    pub async fn next_tx_without_mutations(&mut self, after: i64) -> Result<Option<i64>> {
        let row = sqlx::query(
            "SELECT tx.id AS id FROM tx \
             WHERE tx.id > $1 \
               AND tx.id NOT IN (SELECT tx_id FROM mutation) \
               AND tx.id IN (SELECT tx_id FROM txout) \
             ORDER BY tx.id LIMIT 1",
        )
        .bind(after)
        .fetch_optional(self.conn().await?)
        .await?;
        row.map(|row| Ok(row.try_get("id")?)).transpose()
    }

    /// Migration phase 2: decodable address past the cursor whose script
    /// text has not been filled in yet.
    pub async fn next_address_without_script(&mut self, after: i64) -> Result<Option<AddressRow>> {
        let sql = format!(
            "SELECT {} FROM address \
             WHERE id > $1 AND raw IS NULL AND kind IN (1, 2) AND address IS NOT NULL \
             ORDER BY id LIMIT 1",
            AddressRow::COLUMNS
        );
        let row = sqlx::query(&sql)
            .bind(after)
            .fetch_optional(self.conn().await?)
            .await?;
        row.as_ref().map(AddressRow::from_row).transpose()
    }

    pub async fn set_address_raw(&mut self, address_id: i64, raw: &str) -> Result<()> {
        sqlx::query("UPDATE address SET raw = $1 WHERE id = $2")
            .bind(raw.to_string())
            .bind(address_id)
            .execute(self.conn().await?)
            .await?;
        Ok(())
    }

    /// Migration phase 3: on-chain block past the cursor whose fee total was
    /// never computed.
    pub async fn next_block_without_totalfee(&mut self, after: i64) -> Result<Option<i64>> {
        let row = sqlx::query(
            "SELECT id FROM block \
             WHERE id > $1 AND height IS NOT NULL AND totalfee IS NULL \
             ORDER BY id LIMIT 1",
        )
        .bind(after)
        .fetch_optional(self.conn().await?)
        .await?;
        row.map(|row| Ok(row.try_get("id")?)).transpose()
    }

    pub async fn backfill_block_totalfee(&mut self, block_id: i64) -> Result<()> {
        sqlx::query(
            "UPDATE block SET totalfee = COALESCE(( \
                 SELECT SUM(tx.fee) FROM blocktx \
                 JOIN tx ON blocktx.tx_id = tx.id \
                 WHERE blocktx.block_id = $1 \
                   AND tx.id NOT IN (SELECT tx_id FROM coinbase) \
             ), 0) WHERE id = $1",
        )
        .bind(block_id)
        .execute(self.conn().await?)
        .await?;
        Ok(())
    }

    /// Migration phase 4: coinbase row past the cursor whose subsidy was
    /// never derived.
    pub async fn next_coinbase_without_newcoins(&mut self, after: i64) -> Result<Option<i64>> {
        let row = sqlx::query(
            "SELECT block_id FROM coinbase \
             WHERE block_id > $1 AND newcoins IS NULL \
             ORDER BY block_id LIMIT 1",
        )
        .bind(after)
        .fetch_optional(self.conn().await?)
        .await?;
        row.map(|row| Ok(row.try_get("block_id")?)).transpose()
    }

    /// Subsidy = coinbase output total − block fee total.
    pub async fn backfill_coinbase_newcoins(&mut self, block_id: i64) -> Result<()> {
        info!("backfilling coinbase subsidy for block #{block_id}");
        sqlx::query(
            "UPDATE coinbase SET newcoins = ( \
                 SELECT tx.totalvalue - COALESCE(block.totalfee, 0) \
                 FROM tx, block \
                 WHERE tx.id = coinbase.tx_id AND block.id = coinbase.block_id \
             ) WHERE block_id = $1",
        )
        .bind(block_id)
        .execute(self.conn().await?)
        .await?;
        Ok(())
    }
}
