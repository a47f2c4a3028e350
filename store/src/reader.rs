//! Read model for the HTTP façade.
//!
//! Every call acquires a short-lived pool connection; nothing here ever
//! opens a long transaction or touches the writer's caches. The aggregate
//! counters are the only shared state: an invalid flag makes the reader
//! fall back to the full aggregate query instead of trusting the row.

use sqlx::Row;

use chaindex_types::{Amount, Hash256, TxOutKind};

use crate::counters::CounterId;
use crate::entities::{AddressRow, BlockRow, PoolRow, TransactionRow};
use crate::error::{Result, StoreError};
use crate::pool::SQLXPool;
use crate::queries;

/// One row of an address's mutation history.
#[derive(Clone, Debug)]
pub struct AddressMutation {
    pub time: Option<i64>,
    pub txid: Hash256,
    pub change: Amount,
    pub confirmed: bool,
}

/// One resolved input of a transaction; coinbase inputs have no source.
#[derive(Clone, Debug)]
pub struct InputDetail {
    pub idx: i64,
    pub amount: Option<Amount>,
    pub source_txid: Option<Hash256>,
    pub source_vout: Option<i64>,
    pub address: Option<String>,
}

/// One output of a transaction with its address and spent state.
#[derive(Clone, Debug)]
pub struct OutputDetail {
    pub idx: i64,
    pub kind: TxOutKind,
    pub amount: Amount,
    pub address: Option<String>,
    pub raw: Option<String>,
    pub spent: bool,
}

/// Net per-address effect of one transaction.
#[derive(Clone, Debug)]
pub struct TransactionMutation {
    pub address: Option<String>,
    pub amount: Amount,
}

#[derive(Clone, Copy, Debug, Default)]
pub struct BlockStats {
    pub blocks: i64,
    pub totalfees: Amount,
    pub coinsreleased: Amount,
}

#[derive(Clone, Copy, Debug, Default)]
pub struct TransactionStats {
    pub transactions: i64,
    pub transactedvalue: Amount,
}

#[derive(Clone, Debug)]
pub struct PoolStats {
    pub name: String,
    pub amountmined: i64,
    pub latestblock: Option<i64>,
    pub website: Option<String>,
    pub graphcolor: Option<String>,
}

#[derive(Clone, Debug)]
pub struct RichlistEntry {
    pub address: String,
    pub balance: Amount,
}

#[derive(Clone)]
pub struct Reader {
    pool: SQLXPool,
}

impl Reader {
    pub fn new(pool: SQLXPool) -> Reader {
        Reader { pool }
    }

    pub async fn chaintip(&self) -> Result<Option<BlockRow>> {
        let mut conn = self.pool.acquire().await?;
        queries::chaintip(&mut conn).await
    }

    /// Looks a block up by decimal height or 64-char hex hash.
    pub async fn block_by_ident(&self, ident: &str) -> Result<Option<BlockRow>> {
        let mut conn = self.pool.acquire().await?;
        if !ident.is_empty() && ident.bytes().all(|b| b.is_ascii_digit()) {
            return match ident.parse::<i64>() {
                Ok(height) => queries::block_by_height(&mut conn, height).await,
                Err(_) => Ok(None),
            };
        }
        match ident.parse::<Hash256>() {
            Ok(hash) => queries::block_by_hash(&mut conn, &hash).await,
            Err(_) => Ok(None),
        }
    }

    pub async fn block_by_hash(&self, hash: &Hash256) -> Result<Option<BlockRow>> {
        let mut conn = self.pool.acquire().await?;
        queries::block_by_hash(&mut conn, hash).await
    }

    pub async fn block_by_id(&self, id: i64) -> Result<Option<BlockRow>> {
        let mut conn = self.pool.acquire().await?;
        queries::block_by_id(&mut conn, id).await
    }

    pub async fn blocks(
        &self,
        start_height: i64,
        limit: i64,
        interval: Option<i64>,
    ) -> Result<Vec<BlockRow>> {
        let mut conn = self.pool.acquire().await?;
        queries::blocks_from(&mut conn, start_height, limit, interval).await
    }

    pub async fn block_transactions(&self, block_id: i64) -> Result<Vec<TransactionRow>> {
        let mut conn = self.pool.acquire().await?;
        queries::block_transactions(&mut conn, block_id).await
    }

    pub async fn pool_by_id(&self, id: i64) -> Result<Option<PoolRow>> {
        let mut conn = self.pool.acquire().await?;
        queries::pool_by_id(&mut conn, id).await
    }

    pub async fn transaction(&self, txid: &Hash256) -> Result<Option<TransactionRow>> {
        let mut conn = self.pool.acquire().await?;
        queries::tx_by_txid(&mut conn, txid).await
    }

    /// The block confirming a transaction, when there is one.
    pub async fn confirming_block(&self, tx: &TransactionRow) -> Result<Option<BlockRow>> {
        let confirmation = match tx.confirmation {
            Some(confirmation) => confirmation,
            None => return Ok(None),
        };
        let mut conn = self.pool.acquire().await?;
        let row = sqlx::query("SELECT block_id FROM blocktx WHERE id = $1")
            .bind(confirmation)
            .fetch_optional(&mut *conn)
            .await?;
        match row {
            Some(row) => queries::block_by_id(&mut conn, row.try_get("block_id")?).await,
            None => Ok(None),
        }
    }

    pub async fn latest_transactions(
        &self,
        limit: i64,
        confirmed_only: bool,
    ) -> Result<Vec<TransactionRow>> {
        let mut conn = self.pool.acquire().await?;
        queries::latest_transactions(&mut conn, limit, confirmed_only).await
    }

    pub async fn mempool(&self, limit: i64) -> Result<Vec<TransactionRow>> {
        let mut conn = self.pool.acquire().await?;
        queries::mempool_transactions(&mut conn, limit).await
    }

    pub async fn transaction_inputs(&self, tx_id: i64) -> Result<Vec<InputDetail>> {
        let mut conn = self.pool.acquire().await?;
        let rows = sqlx::query(
            "SELECT txin.idx AS idx, txout.amount AS amount, txout.idx AS source_vout, \
                    src.txid AS source_txid, address.address AS address \
             FROM txin \
             LEFT JOIN txout ON txin.input = txout.id \
             LEFT JOIN tx src ON txout.tx_id = src.id \
             LEFT JOIN address ON txout.address_id = address.id \
             WHERE txin.tx_id = $1 ORDER BY txin.idx",
        )
        .bind(tx_id)
        .fetch_all(&mut *conn)
        .await?;
        rows.iter()
            .map(|row| {
                let source_txid = row
                    .try_get::<Option<Vec<u8>>, _>("source_txid")?
                    .map(|bytes| {
                        Hash256::from_slice(&bytes).map_err(|e| StoreError::Decode(e.to_string()))
                    })
                    .transpose()?;
                Ok(InputDetail {
                    idx: row.try_get("idx")?,
                    amount: row
                        .try_get::<Option<i64>, _>("amount")?
                        .map(Amount::from_sats),
                    source_txid,
                    source_vout: row.try_get("source_vout")?,
                    address: row.try_get("address")?,
                })
            })
            .collect()
    }

    pub async fn transaction_outputs(&self, tx_id: i64) -> Result<Vec<OutputDetail>> {
        let mut conn = self.pool.acquire().await?;
        let rows = sqlx::query(
            "SELECT txout.idx AS idx, txout.kind AS kind, txout.amount AS amount, \
                    txout.spentby AS spentby, address.address AS address, address.raw AS raw \
             FROM txout \
             JOIN address ON txout.address_id = address.id \
             WHERE txout.tx_id = $1 ORDER BY txout.idx",
        )
        .bind(tx_id)
        .fetch_all(&mut *conn)
        .await?;
        rows.iter()
            .map(|row| {
                Ok(OutputDetail {
                    idx: row.try_get("idx")?,
                    kind: TxOutKind::from_internal_id(row.try_get("kind")?),
                    amount: Amount::from_sats(row.try_get("amount")?),
                    address: row.try_get("address")?,
                    raw: row.try_get("raw")?,
                    spent: row.try_get::<Option<i64>, _>("spentby")?.is_some(),
                })
            })
            .collect()
    }

    pub async fn transaction_mutations(&self, tx_id: i64) -> Result<Vec<TransactionMutation>> {
        let mut conn = self.pool.acquire().await?;
        let rows = sqlx::query(
            "SELECT mutation.amount AS amount, address.address AS address \
             FROM mutation \
             JOIN address ON mutation.address_id = address.id \
             WHERE mutation.tx_id = $1 ORDER BY mutation.id",
        )
        .bind(tx_id)
        .fetch_all(&mut *conn)
        .await?;
        rows.iter()
            .map(|row| {
                Ok(TransactionMutation {
                    address: row.try_get("address")?,
                    amount: Amount::from_sats(row.try_get("amount")?),
                })
            })
            .collect()
    }

    pub async fn address(&self, address: &str) -> Result<Option<AddressRow>> {
        let mut conn = self.pool.acquire().await?;
        let sql = format!(
            "SELECT {} FROM address WHERE address = $1",
            AddressRow::COLUMNS
        );
        let row = sqlx::query(&sql)
            .bind(address.to_string())
            .fetch_optional(&mut *conn)
            .await?;
        row.as_ref().map(AddressRow::from_row).transpose()
    }

    /// Sum of the address's unconfirmed mutations.
    pub async fn address_pending_balance(&self, address: &str) -> Result<Amount> {
        let mutations = self
            .address_mutations(address, Some(false), 0, 1_000)
            .await?;
        Ok(mutations.iter().map(|m| m.change).sum())
    }

    /// Mutation history, newest first. `confirmed = Some(false)` excludes
    /// orphaned coinbases the way the mempool view does.
    pub async fn address_mutations(
        &self,
        address: &str,
        confirmed: Option<bool>,
        start: i64,
        limit: i64,
    ) -> Result<Vec<AddressMutation>> {
        if limit == 0 {
            return Ok(Vec::new());
        }
        let filter = match confirmed {
            Some(true) => " AND tx.confirmation IS NOT NULL",
            Some(false) => {
                " AND tx.confirmation IS NULL \
                  AND tx.id NOT IN (SELECT tx_id FROM coinbase)"
            }
            None => "",
        };
        let sql = format!(
            "SELECT tx.txid AS txid, tx.firstseen AS firstseen, \
                    tx.confirmation AS confirmation, mutation.amount AS amount, \
                    block.timestamp AS block_time \
             FROM mutation \
             JOIN tx ON mutation.tx_id = tx.id \
             JOIN address ON mutation.address_id = address.id \
             LEFT JOIN blocktx ON tx.confirmation = blocktx.id \
             LEFT JOIN block ON blocktx.block_id = block.id \
             WHERE address.address = $1{filter} \
             ORDER BY tx.id DESC LIMIT $2 OFFSET $3"
        );

        let mut conn = self.pool.acquire().await?;
        let rows = sqlx::query(&sql)
            .bind(address.to_string())
            .bind(limit)
            .bind(start)
            .fetch_all(&mut *conn)
            .await?;
        rows.iter()
            .map(|row| {
                let txid_bytes: Vec<u8> = row.try_get("txid")?;
                let confirmation: Option<i64> = row.try_get("confirmation")?;
                let firstseen: Option<i64> = row.try_get("firstseen")?;
                let block_time: Option<i64> = row.try_get("block_time")?;
                Ok(AddressMutation {
                    time: firstseen.or(block_time),
                    txid: Hash256::from_slice(&txid_bytes)
                        .map_err(|e| StoreError::Decode(e.to_string()))?,
                    change: Amount::from_sats(row.try_get("amount")?),
                    confirmed: confirmation.is_some(),
                })
            })
            .collect()
    }

    pub async fn richlist(&self, start: i64, limit: i64) -> Result<Vec<RichlistEntry>> {
        let mut conn = self.pool.acquire().await?;
        let rows = sqlx::query(
            "SELECT address, balance FROM address \
             WHERE address IS NOT NULL \
             ORDER BY balance DESC LIMIT $1 OFFSET $2",
        )
        .bind(limit)
        .bind(start)
        .fetch_all(&mut *conn)
        .await?;
        rows.iter()
            .map(|row| {
                Ok(RichlistEntry {
                    address: row.try_get("address")?,
                    balance: Amount::from_sats(row.try_get("balance")?),
                })
            })
            .collect()
    }

    async fn counter(&self, id: CounterId) -> Result<(i64, bool)> {
        let mut conn = self.pool.acquire().await?;
        let row = sqlx::query("SELECT value, valid FROM cachedvalue WHERE id = $1")
            .bind(id.id())
            .fetch_one(&mut *conn)
            .await?;
        Ok((
            row.try_get("value")?,
            row.try_get::<i64, _>("valid")? != 0,
        ))
    }

    /// Counters when clean; a full aggregate otherwise or when a window is
    /// requested.
    pub async fn block_stats(&self, since: Option<i64>) -> Result<BlockStats> {
        if since.is_none() {
            let (blocks, blocks_ok) = self.counter(CounterId::TotalBlocks).await?;
            let (fees, fees_ok) = self.counter(CounterId::TotalFees).await?;
            let (released, released_ok) = self.counter(CounterId::TotalCoinsReleased).await?;
            if blocks_ok && fees_ok && released_ok {
                return Ok(BlockStats {
                    blocks,
                    totalfees: Amount::from_sats(fees),
                    coinsreleased: Amount::from_sats(released),
                });
            }
        }

        let mut sql = String::from(
            "SELECT COUNT(block.id) AS blocks, \
                    CAST(SUM(block.totalfee) AS BIGINT) AS totalfees, \
                    CAST(SUM(coinbase.newcoins) AS BIGINT) AS coinsreleased \
             FROM block \
             LEFT JOIN coinbase ON coinbase.block_id = block.id \
             WHERE block.height IS NOT NULL",
        );
        if since.is_some() {
            sql.push_str(" AND block.timestamp >= $1");
        }
        let mut query = sqlx::query(&sql);
        if let Some(since) = since {
            query = query.bind(since);
        }
        let mut conn = self.pool.acquire().await?;
        let row = query.fetch_one(&mut *conn).await?;
        Ok(BlockStats {
            blocks: row.try_get("blocks")?,
            totalfees: Amount::from_sats(
                row.try_get::<Option<i64>, _>("totalfees")?.unwrap_or(0),
            ),
            coinsreleased: Amount::from_sats(
                row.try_get::<Option<i64>, _>("coinsreleased")?.unwrap_or(0),
            ),
        })
    }

    pub async fn transaction_stats(&self, since: Option<i64>) -> Result<TransactionStats> {
        let mut sql = String::from(
            "SELECT COUNT(tx.id) AS transactions, \
                    CAST(SUM(tx.totalvalue) AS BIGINT) AS transactedvalue \
             FROM tx \
             JOIN blocktx ON tx.confirmation = blocktx.id \
             JOIN block ON blocktx.block_id = block.id \
             WHERE block.height IS NOT NULL \
               AND tx.id NOT IN (SELECT tx_id FROM coinbase)",
        );
        if since.is_some() {
            sql.push_str(" AND block.timestamp >= $1");
        }
        let mut query = sqlx::query(&sql);
        if let Some(since) = since {
            query = query.bind(since);
        }
        let mut conn = self.pool.acquire().await?;
        let row = query.fetch_one(&mut *conn).await?;
        Ok(TransactionStats {
            transactions: row.try_get("transactions")?,
            transactedvalue: Amount::from_sats(
                row.try_get::<Option<i64>, _>("transactedvalue")?.unwrap_or(0),
            ),
        })
    }

    pub async fn total_coins_released(&self) -> Result<Amount> {
        let (value, valid) = self.counter(CounterId::TotalCoinsReleased).await?;
        if valid {
            return Ok(Amount::from_sats(value));
        }
        Ok(self.block_stats(None).await?.coinsreleased)
    }

    pub async fn total_coins_in_addresses(&self) -> Result<Amount> {
        let mut conn = self.pool.acquire().await?;
        let row = sqlx::query(
            "SELECT CAST(COALESCE(SUM(balance), 0) AS BIGINT) AS total FROM address",
        )
        .fetch_one(&mut *conn)
        .await?;
        Ok(Amount::from_sats(row.try_get("total")?))
    }

    /// Per-pool block production since a timestamp.
    pub async fn pool_stats(&self, since: i64) -> Result<Vec<PoolStats>> {
        let mut conn = self.pool.acquire().await?;
        let rows = sqlx::query(
            "SELECT pool.name AS name, COUNT(block.id) AS blocks, \
                    MAX(block.height) AS lastblock, \
                    pool.website AS website, pool.graphcolor AS graphcolor \
             FROM pool \
             JOIN block ON block.miner = pool.id \
             WHERE block.height IS NOT NULL AND block.timestamp >= $1 \
             GROUP BY pool.name, pool.website, pool.graphcolor",
        )
        .bind(since)
        .fetch_all(&mut *conn)
        .await?;
        rows.iter()
            .map(|row| {
                Ok(PoolStats {
                    name: row.try_get("name")?,
                    amountmined: row.try_get("blocks")?,
                    latestblock: row.try_get("lastblock")?,
                    website: row.try_get("website")?,
                    graphcolor: row.try_get("graphcolor")?,
                })
            })
            .collect()
    }
}
