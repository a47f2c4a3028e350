//! Typed rows of the relational schema.
//!
//! Mapping from `AnyRow` is written out by hand because the `Any` driver only
//! carries the narrow portable type set (i64 / f64 / text / blob); amounts
//! and hashes are reconstructed from their storage encodings here and nowhere
//! else.

use sqlx::any::AnyRow;
use sqlx::Row;

use chaindex_types::{Amount, Hash256};

use crate::error::{Result, StoreError};

fn hash_column(row: &AnyRow, column: &str) -> Result<Hash256> {
    let bytes: Vec<u8> = row.try_get(column)?;
    Hash256::from_slice(&bytes).map_err(|e| StoreError::Decode(format!("{column}: {e}")))
}

#[derive(Clone, Debug)]
pub struct BlockRow {
    pub id: i64,
    pub hash: Hash256,
    pub height: Option<i64>,
    pub size: i64,
    pub difficulty: f64,
    pub timestamp: i64,
    pub firstseen: Option<i64>,
    pub relayedby: Option<String>,
    pub totalfee: Amount,
    pub miner: Option<i64>,
}

impl BlockRow {
    pub const COLUMNS: &'static str =
        "id, hash, height, size, difficulty, timestamp, firstseen, relayedby, totalfee, miner";

    pub fn from_row(row: &AnyRow) -> Result<BlockRow> {
        Ok(BlockRow {
            id: row.try_get("id")?,
            hash: hash_column(row, "hash")?,
            height: row.try_get("height")?,
            size: row.try_get("size")?,
            difficulty: row.try_get("difficulty")?,
            timestamp: row.try_get("timestamp")?,
            firstseen: row.try_get("firstseen")?,
            relayedby: row.try_get("relayedby")?,
            totalfee: Amount::from_sats(row.try_get::<Option<i64>, _>("totalfee")?.unwrap_or(0)),
            miner: row.try_get("miner")?,
        })
    }
}

#[derive(Clone, Debug)]
pub struct TransactionRow {
    pub id: i64,
    pub txid: Hash256,
    pub size: i64,
    pub fee: Amount,
    pub totalvalue: Amount,
    pub firstseen: Option<i64>,
    pub relayedby: Option<String>,
    pub confirmation: Option<i64>,
    pub doublespends: Option<i64>,
}

impl TransactionRow {
    pub const COLUMNS: &'static str =
        "id, txid, size, fee, totalvalue, firstseen, relayedby, confirmation, doublespends";

    pub fn from_row(row: &AnyRow) -> Result<TransactionRow> {
        Ok(TransactionRow {
            id: row.try_get("id")?,
            txid: hash_column(row, "txid")?,
            size: row.try_get("size")?,
            fee: Amount::from_sats(row.try_get("fee")?),
            totalvalue: Amount::from_sats(row.try_get("totalvalue")?),
            firstseen: row.try_get("firstseen")?,
            relayedby: row.try_get("relayedby")?,
            confirmation: row.try_get("confirmation")?,
            doublespends: row.try_get("doublespends")?,
        })
    }

    pub fn confirmed(&self) -> bool {
        self.confirmation.is_some()
    }
}

#[derive(Clone, Debug)]
pub struct BlockTxRow {
    pub id: i64,
    pub block_id: i64,
    pub tx_id: i64,
}

impl BlockTxRow {
    pub fn from_row(row: &AnyRow) -> Result<BlockTxRow> {
        Ok(BlockTxRow {
            id: row.try_get("id")?,
            block_id: row.try_get("block_id")?,
            tx_id: row.try_get("tx_id")?,
        })
    }
}

#[derive(Clone, Debug)]
pub struct CoinbaseRow {
    pub block_id: i64,
    pub tx_id: i64,
    pub raw: Vec<u8>,
    pub signature: Option<String>,
    pub newcoins: Amount,
    pub mainoutput: Option<i64>,
}

impl CoinbaseRow {
    pub fn from_row(row: &AnyRow) -> Result<CoinbaseRow> {
        Ok(CoinbaseRow {
            block_id: row.try_get("block_id")?,
            tx_id: row.try_get("tx_id")?,
            raw: row.try_get("raw")?,
            signature: row.try_get("signature")?,
            newcoins: Amount::from_sats(row.try_get::<Option<i64>, _>("newcoins")?.unwrap_or(0)),
            mainoutput: row.try_get("mainoutput")?,
        })
    }
}

#[derive(Clone, Debug)]
pub struct TxOutRow {
    pub id: i64,
    pub tx_id: i64,
    pub idx: i64,
    pub kind: i64,
    pub address_id: i64,
    pub amount: Amount,
    pub spentby: Option<i64>,
}

impl TxOutRow {
    pub const COLUMNS: &'static str = "id, tx_id, idx, kind, address_id, amount, spentby";

    pub fn from_row(row: &AnyRow) -> Result<TxOutRow> {
        Ok(TxOutRow {
            id: row.try_get("id")?,
            tx_id: row.try_get("tx_id")?,
            idx: row.try_get("idx")?,
            kind: row.try_get("kind")?,
            address_id: row.try_get("address_id")?,
            amount: Amount::from_sats(row.try_get("amount")?),
            spentby: row.try_get("spentby")?,
        })
    }
}

#[derive(Clone, Debug)]
pub struct TxInRow {
    pub id: i64,
    pub tx_id: i64,
    pub idx: i64,
    pub input: Option<i64>,
}

impl TxInRow {
    pub fn from_row(row: &AnyRow) -> Result<TxInRow> {
        Ok(TxInRow {
            id: row.try_get("id")?,
            tx_id: row.try_get("tx_id")?,
            idx: row.try_get("idx")?,
            input: row.try_get("input")?,
        })
    }
}

#[derive(Clone, Debug)]
pub struct AddressRow {
    pub id: i64,
    pub kind: i64,
    pub address: Option<String>,
    pub raw: Option<String>,
    pub balance: Amount,
    pub balance_dirty: i64,
}

impl AddressRow {
    pub const COLUMNS: &'static str = "id, kind, address, raw, balance, balance_dirty";

    pub fn from_row(row: &AnyRow) -> Result<AddressRow> {
        Ok(AddressRow {
            id: row.try_get("id")?,
            kind: row.try_get("kind")?,
            address: row.try_get("address")?,
            raw: row.try_get("raw")?,
            balance: Amount::from_sats(row.try_get("balance")?),
            balance_dirty: row.try_get("balance_dirty")?,
        })
    }

    /// Display form used in log lines; raw-script rows have no address string.
    pub fn display(&self) -> &str {
        self.address.as_deref().unwrap_or("<raw>")
    }
}

#[derive(Clone, Debug)]
pub struct MutationRow {
    pub id: i64,
    pub tx_id: i64,
    pub address_id: i64,
    pub amount: Amount,
}

impl MutationRow {
    pub fn from_row(row: &AnyRow) -> Result<MutationRow> {
        Ok(MutationRow {
            id: row.try_get("id")?,
            tx_id: row.try_get("tx_id")?,
            address_id: row.try_get("address_id")?,
            amount: Amount::from_sats(row.try_get("amount")?),
        })
    }
}

#[derive(Clone, Debug)]
pub struct PoolRow {
    pub id: i64,
    pub group_id: Option<i64>,
    pub name: String,
    pub solo: i64,
    pub website: Option<String>,
    pub graphcolor: Option<String>,
}

impl PoolRow {
    pub const COLUMNS: &'static str = "id, group_id, name, solo, website, graphcolor";

    pub fn from_row(row: &AnyRow) -> Result<PoolRow> {
        Ok(PoolRow {
            id: row.try_get("id")?,
            group_id: row.try_get("group_id")?,
            name: row.try_get("name")?,
            solo: row.try_get("solo")?,
            website: row.try_get("website")?,
            graphcolor: row.try_get("graphcolor")?,
        })
    }
}
