//! Row-level lookups shared by the writer session and the read façade.
//!
//! Everything here runs against a borrowed connection so the same code path
//! serves both the writer's open transaction and the reader's short-lived
//! pool connections.

use sql_builder::SqlBuilder;
use sqlx::AnyConnection;
use sqlx::Row;

use chaindex_types::Hash256;

use crate::entities::{BlockRow, BlockTxRow, CoinbaseRow, PoolRow, TransactionRow, TxOutRow};
use crate::error::{Result, StoreError};

pub(crate) fn build(sql: &SqlBuilder) -> Result<String> {
    sql.sql().map_err(|e| StoreError::Chain(e.to_string()))
}

pub(crate) async fn block_by_height(
    conn: &mut AnyConnection,
    height: i64,
) -> Result<Option<BlockRow>> {
    let sql = format!(
        "SELECT {} FROM block WHERE height = $1",
        BlockRow::COLUMNS
    );
    let row = sqlx::query(&sql).bind(height).fetch_optional(conn).await?;
    row.as_ref().map(BlockRow::from_row).transpose()
}

pub(crate) async fn block_by_hash(
    conn: &mut AnyConnection,
    hash: &Hash256,
) -> Result<Option<BlockRow>> {
    let sql = format!("SELECT {} FROM block WHERE hash = $1", BlockRow::COLUMNS);
    let row = sqlx::query(&sql)
        .bind(hash.to_vec())
        .fetch_optional(conn)
        .await?;
    row.as_ref().map(BlockRow::from_row).transpose()
}

pub(crate) async fn block_by_id(conn: &mut AnyConnection, id: i64) -> Result<Option<BlockRow>> {
    let sql = format!("SELECT {} FROM block WHERE id = $1", BlockRow::COLUMNS);
    let row = sqlx::query(&sql).bind(id).fetch_optional(conn).await?;
    row.as_ref().map(BlockRow::from_row).transpose()
}

/// Highest block currently on-chain.
pub(crate) async fn chaintip(conn: &mut AnyConnection) -> Result<Option<BlockRow>> {
    let sql = format!(
        "SELECT {} FROM block WHERE height IS NOT NULL ORDER BY height DESC LIMIT 1",
        BlockRow::COLUMNS
    );
    let row = sqlx::query(&sql).fetch_optional(conn).await?;
    row.as_ref().map(BlockRow::from_row).transpose()
}

/// Ascending block range, optionally filtered to one height-modulo class.
pub(crate) async fn blocks_from(
    conn: &mut AnyConnection,
    start_height: i64,
    limit: i64,
    interval: Option<i64>,
) -> Result<Vec<BlockRow>> {
    let mut sql = SqlBuilder::select_from("block");
    sql.field(BlockRow::COLUMNS)
        .and_where("height IS NOT NULL")
        .and_where_ge("height", start_height)
        .order_asc("height")
        .limit(limit);
    if let Some(interval) = interval {
        sql.and_where(format!(
            "height % {} = {}",
            interval,
            start_height.rem_euclid(interval)
        ));
    }
    let rows = sqlx::query(&build(&sql)?).fetch_all(conn).await?;
    rows.iter().map(BlockRow::from_row).collect()
}

/// Number of on-chain blocks with `lo <= height < hi`.
pub(crate) async fn block_count_in_range(
    conn: &mut AnyConnection,
    lo: i64,
    hi: i64,
) -> Result<i64> {
    let row = sqlx::query(
        "SELECT COUNT(id) AS count FROM block WHERE height >= $1 AND height < $2",
    )
    .bind(lo)
    .bind(hi)
    .fetch_one(conn)
    .await?;
    Ok(row.try_get("count")?)
}

pub(crate) async fn tx_by_txid(
    conn: &mut AnyConnection,
    txid: &Hash256,
) -> Result<Option<TransactionRow>> {
    let sql = format!("SELECT {} FROM tx WHERE txid = $1", TransactionRow::COLUMNS);
    let row = sqlx::query(&sql)
        .bind(txid.to_vec())
        .fetch_optional(conn)
        .await?;
    row.as_ref().map(TransactionRow::from_row).transpose()
}

pub(crate) async fn tx_by_id(
    conn: &mut AnyConnection,
    id: i64,
) -> Result<Option<TransactionRow>> {
    let sql = format!("SELECT {} FROM tx WHERE id = $1", TransactionRow::COLUMNS);
    let row = sqlx::query(&sql).bind(id).fetch_optional(conn).await?;
    row.as_ref().map(TransactionRow::from_row).transpose()
}

pub(crate) async fn latest_transactions(
    conn: &mut AnyConnection,
    limit: i64,
    confirmed_only: bool,
) -> Result<Vec<TransactionRow>> {
    let mut sql = SqlBuilder::select_from("tx");
    sql.field(TransactionRow::COLUMNS).order_desc("id").limit(limit);
    if confirmed_only {
        sql.and_where("confirmation IS NOT NULL");
    }
    let rows = sqlx::query(&build(&sql)?).fetch_all(conn).await?;
    rows.iter().map(TransactionRow::from_row).collect()
}

/// Unconfirmed non-coinbase transactions, newest first.
pub(crate) async fn mempool_transactions(
    conn: &mut AnyConnection,
    limit: i64,
) -> Result<Vec<TransactionRow>> {
    let sql = format!(
        "SELECT {} FROM tx \
         WHERE confirmation IS NULL \
           AND id NOT IN (SELECT tx_id FROM coinbase) \
         ORDER BY id DESC LIMIT $1",
        TransactionRow::COLUMNS
    );
    let rows = sqlx::query(&sql).bind(limit).fetch_all(conn).await?;
    rows.iter().map(TransactionRow::from_row).collect()
}

pub(crate) async fn blocktx_for(
    conn: &mut AnyConnection,
    block_id: i64,
    tx_id: i64,
) -> Result<Option<BlockTxRow>> {
    let row = sqlx::query(
        "SELECT id, block_id, tx_id FROM blocktx WHERE block_id = $1 AND tx_id = $2",
    )
    .bind(block_id)
    .bind(tx_id)
    .fetch_optional(conn)
    .await?;
    row.as_ref().map(BlockTxRow::from_row).transpose()
}

/// Transactions of one block in their in-block order.
pub(crate) async fn block_transactions(
    conn: &mut AnyConnection,
    block_id: i64,
) -> Result<Vec<TransactionRow>> {
    let sql = format!(
        "SELECT {} FROM tx \
         JOIN blocktx ON blocktx.tx_id = tx.id \
         WHERE blocktx.block_id = $1 ORDER BY blocktx.id",
        TransactionRow::COLUMNS
            .split(", ")
            .map(|c| format!("tx.{c}"))
            .collect::<Vec<_>>()
            .join(", ")
    );
    let rows = sqlx::query(&sql).bind(block_id).fetch_all(conn).await?;
    rows.iter().map(TransactionRow::from_row).collect()
}

pub(crate) async fn coinbase_for_block(
    conn: &mut AnyConnection,
    block_id: i64,
) -> Result<Option<CoinbaseRow>> {
    let row = sqlx::query(
        "SELECT block_id, tx_id, raw, signature, newcoins, mainoutput \
         FROM coinbase WHERE block_id = $1",
    )
    .bind(block_id)
    .fetch_optional(conn)
    .await?;
    row.as_ref().map(CoinbaseRow::from_row).transpose()
}

pub(crate) async fn output_of(
    conn: &mut AnyConnection,
    tx_id: i64,
    idx: i64,
) -> Result<Option<TxOutRow>> {
    let sql = format!(
        "SELECT {} FROM txout WHERE tx_id = $1 AND idx = $2",
        TxOutRow::COLUMNS
    );
    let row = sqlx::query(&sql)
        .bind(tx_id)
        .bind(idx)
        .fetch_optional(conn)
        .await?;
    row.as_ref().map(TxOutRow::from_row).transpose()
}

pub(crate) async fn pool_by_id(conn: &mut AnyConnection, id: i64) -> Result<Option<PoolRow>> {
    let sql = format!("SELECT {} FROM pool WHERE id = $1", PoolRow::COLUMNS);
    let row = sqlx::query(&sql).bind(id).fetch_optional(conn).await?;
    row.as_ref().map(PoolRow::from_row).transpose()
}
