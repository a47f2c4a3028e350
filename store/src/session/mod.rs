//! The single-writer session.
//!
//! One `Session` exists per engine process. All mutations run inside a
//! lazily-begun store transaction; `commit` makes the unit durable,
//! `reset` rolls an unfinished unit back. Between those two calls nothing
//! the session wrote is visible to readers, which is what makes every
//! engine operation all-or-nothing.

mod backfill;
mod balances;
mod blocks;
mod transactions;
mod verify;

pub use backfill::CoindaysCandidate;

use std::collections::HashMap;

use sqlx::{Any, AnyConnection, Transaction};

use chaindex_types::{Amount, Hash256};

use crate::cache::Caches;
use crate::entities::{BlockRow, TransactionRow};
use crate::error::Result;
use crate::pool::SQLXPool;
use crate::queries;

/// Side-channel filled while importing a block's transactions: the raw
/// coinbase script plus the positive single-address outputs, keyed by txid.
#[derive(Default)]
pub struct CoinbaseSink {
    pub entries: HashMap<Hash256, CoinbaseCapture>,
}

#[derive(Clone, Debug)]
pub struct CoinbaseCapture {
    pub raw: Vec<u8>,
    /// `(vout index, address, value)` for every positive-valued
    /// single-address output of the coinbase.
    pub outputs: Vec<(i64, String, Amount)>,
}

pub struct Session {
    pool: SQLXPool,
    txn: Option<Transaction<'static, Any>>,
    pub(crate) caches: Caches,
    chaintip: Option<BlockRow>,
}

impl Session {
    pub fn new(pool: SQLXPool, utxo_cache: bool) -> Session {
        Session {
            pool,
            txn: None,
            caches: Caches::new(utxo_cache),
            chaintip: None,
        }
    }

    pub(crate) async fn conn(&mut self) -> Result<&mut AnyConnection> {
        if self.txn.is_none() {
            self.txn = Some(self.pool.begin().await?);
        }
        Ok(&mut **self.txn.as_mut().expect("transaction just opened"))
    }

    /// Commits the open unit of work, if any.
    pub async fn commit(&mut self) -> Result<()> {
        if let Some(txn) = self.txn.take() {
            txn.commit().await?;
        }
        Ok(())
    }

    /// Rolls back whatever the current unit wrote and drops memoized state.
    pub async fn reset(&mut self) -> Result<()> {
        if let Some(txn) = self.txn.take() {
            txn.rollback().await?;
        }
        self.chaintip = None;
        Ok(())
    }

    /// Highest on-chain block, memoized until the chain changes.
    pub async fn chaintip(&mut self) -> Result<Option<BlockRow>> {
        if self.chaintip.is_none() {
            self.chaintip = queries::chaintip(self.conn().await?).await?;
        }
        Ok(self.chaintip.clone())
    }

    pub(crate) fn forget_chaintip(&mut self) {
        self.chaintip = None;
    }

    pub async fn block_by_height(&mut self, height: i64) -> Result<Option<BlockRow>> {
        queries::block_by_height(self.conn().await?, height).await
    }

    pub async fn block_by_hash(&mut self, hash: &Hash256) -> Result<Option<BlockRow>> {
        queries::block_by_hash(self.conn().await?, hash).await
    }

    pub async fn block_count_in_range(&mut self, lo: i64, hi: i64) -> Result<i64> {
        queries::block_count_in_range(self.conn().await?, lo, hi).await
    }

    pub async fn transaction_by_txid(&mut self, txid: &Hash256) -> Result<Option<TransactionRow>> {
        queries::tx_by_txid(self.conn().await?, txid).await
    }

    pub async fn transaction_by_id(&mut self, id: i64) -> Result<Option<TransactionRow>> {
        queries::tx_by_id(self.conn().await?, id).await
    }

    /// Internal id for a txid, via the txid tier first.
    pub async fn transaction_internal_id(&mut self, txid: &Hash256) -> Result<Option<i64>> {
        if let Some(id) = self.caches.txid.get(txid) {
            return Ok(Some(*id));
        }
        let tx = queries::tx_by_txid(self.conn().await?, txid).await?;
        if let Some(tx) = &tx {
            self.caches.txid.insert(*txid, tx.id);
        }
        Ok(tx.map(|t| t.id))
    }
}
