//! Block import, orphaning and the confirm/unconfirm state changes.

use log::{debug, info};
use sqlx::Row;

use chaindex_types::{Amount, BlockInfo, Hash256, TransactionResolver};

use crate::counters::CounterId;
use crate::error::{Result, StoreError};
use crate::queries;
use crate::session::{CoinbaseCapture, CoinbaseSink, Session};
use crate::{MAINOUTPUT_THRESHOLD_PCT, SOLO_COINBASE_MAX_LEN, SOLO_POOL_GROUP_ID};

impl Session {
    /// Imports one node-reported block.
    ///
    /// Transactions are imported (or looked up) first, the coinbase captured
    /// through the sink on the way. A hash already stored with a NULL height
    /// is merely re-heighted, which cannot be fixed up incrementally and so
    /// drops every aggregate counter. Fresh blocks confirm their
    /// transactions in node order, settle the fee total and coinbase data
    /// and bump the counters atomically with the block itself.
    pub async fn import_block(
        &mut self,
        info: &BlockInfo,
        resolver: &dyn TransactionResolver,
        commit: bool,
    ) -> Result<()> {
        // The genesis coinbase is unspendable and most nodes refuse to
        // return it; height 0 imports with no transactions at all.
        let txids: &[Hash256] = if info.height == 0 { &[] } else { &info.tx };

        match &info.relayedby {
            Some(via) => info!("adding block {} (via {})", info.hash, via),
            None => info!("adding block {}", info.hash),
        }

        let mut sink = CoinbaseSink::default();
        for txid in txids {
            self.check_need_import_transaction(txid, Some(resolver), Some(&mut sink), false)
                .await?;
        }

        if let Some(existing) = self.block_by_hash(&info.hash).await? {
            info!("updating block {} to height {}", existing.hash, info.height);
            sqlx::query("UPDATE block SET height = $1 WHERE id = $2")
                .bind(info.height)
                .bind(existing.id)
                .execute(self.conn().await?)
                .await?;
            // Confirmations were skipped for the known transactions, so the
            // counters cannot be bumped incrementally.
            self.invalidate_counters().await?;
            if commit {
                self.commit().await?;
            }
            self.forget_chaintip();
            return Ok(());
        }

        self.revalidate_counters().await?;

        let row = sqlx::query(
            "INSERT INTO block \
             (hash, height, size, difficulty, timestamp, firstseen, relayedby, totalfee) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8) RETURNING id",
        )
        .bind(info.hash.to_vec())
        .bind(info.height)
        .bind(info.size)
        .bind(info.difficulty)
        .bind(info.time)
        .bind(info.relayedat)
        .bind(info.relayedby.clone())
        .bind(0i64)
        .fetch_one(self.conn().await?)
        .await?;
        let block_id: i64 = row.try_get("id")?;

        for txid in txids {
            self.confirm_transaction(txid, block_id, Some(resolver)).await?;
        }

        sqlx::query(
            "UPDATE block SET totalfee = COALESCE(( \
                 SELECT SUM(tx.fee) FROM blocktx \
                 JOIN tx ON blocktx.tx_id = tx.id \
                 WHERE blocktx.block_id = $1 \
             ), 0) WHERE id = $1",
        )
        .bind(block_id)
        .execute(self.conn().await?)
        .await?;

        let block = queries::block_by_id(self.conn().await?, block_id)
            .await?
            .ok_or_else(|| StoreError::Decode("freshly inserted block vanished".to_string()))?;

        let capture = sink
            .entries
            .iter()
            .next()
            .map(|(txid, capture)| (*txid, capture.clone()));
        match capture {
            Some((coinbase_txid, capture)) => {
                info!("adding coinbase data for {coinbase_txid}");
                self.add_coinbase_data(&block, &coinbase_txid, &capture).await?;
                if block.relayedby.is_some() {
                    sqlx::query("UPDATE tx SET firstseen = $1, relayedby = $2 WHERE txid = $3")
                        .bind(block.firstseen)
                        .bind(block.relayedby.clone())
                        .bind(coinbase_txid.to_vec())
                        .execute(self.conn().await?)
                        .await?;
                }
            }
            None if info.height == 0 => {}
            None => {
                return Err(StoreError::Chain(format!(
                    "block {} has no coinbase",
                    info.hash
                )));
            }
        }

        self.add_to_counter(CounterId::TotalBlocks, 1).await?;
        self.add_to_counter(CounterId::TotalFees, block.totalfee.sats())
            .await?;
        self.add_to_counter(
            CounterId::TotalTransactions,
            txids.len() as i64 - sink.entries.len() as i64,
        )
        .await?;

        if commit {
            debug!("commit block {}", info.hash);
            self.commit().await?;
        }
        self.forget_chaintip();
        info!("added block {} (height {})", info.hash, info.height);
        Ok(())
    }

    /// NULLs heights from the tip down to `first_height`, unconfirming every
    /// affected transaction. Block rows survive so their transactions can
    /// reconfirm under a replacement block later.
    pub async fn orphan_blocks(&mut self, first_height: i64) -> Result<()> {
        let tip = match self.chaintip().await? {
            Some(tip) => tip,
            None => return Ok(()),
        };
        let tip_height = tip.height.unwrap_or(0);
        for height in (first_height..=tip_height).rev() {
            self.orphan_block(height).await?;
        }
        self.invalidate_counters().await?;
        self.commit().await?;
        self.forget_chaintip();
        Ok(())
    }

    async fn orphan_block(&mut self, height: i64) -> Result<()> {
        let block = match self.block_by_height(height).await? {
            Some(block) => block,
            None => return Ok(()),
        };
        info!("orphaning block {} (height {height})", block.hash);

        sqlx::query("UPDATE block SET height = NULL WHERE id = $1")
            .bind(block.id)
            .execute(self.conn().await?)
            .await?;

        let rows = sqlx::query("SELECT tx_id FROM blocktx WHERE block_id = $1")
            .bind(block.id)
            .fetch_all(self.conn().await?)
            .await?;
        for row in &rows {
            let tx_id: i64 = row.try_get("tx_id")?;
            self.unconfirm_transaction(tx_id).await?;
        }
        self.commit().await?;
        Ok(())
    }

    /// Marks `txid` confirmed by `block_id`: resolves or imports the
    /// transaction, inserts the (idempotent) block↔tx join row, links every
    /// consumed UTXO back to its spending input, and flags all touched
    /// addresses for balance reconciliation.
    pub async fn confirm_transaction(
        &mut self,
        txid: &Hash256,
        block_id: i64,
        resolver: Option<&dyn TransactionResolver>,
    ) -> Result<()> {
        debug!("confirm tx {txid}");
        let tx_id = self
            .check_need_import_transaction(txid, resolver, None, false)
            .await?;

        let blockref = match queries::blocktx_for(self.conn().await?, block_id, tx_id).await? {
            Some(row) => row.id,
            None => {
                let row = sqlx::query(
                    "INSERT INTO blocktx (block_id, tx_id) VALUES ($1, $2) RETURNING id",
                )
                .bind(block_id)
                .bind(tx_id)
                .fetch_one(self.conn().await?)
                .await?;
                row.try_get::<i64, _>("id")?
            }
        };

        sqlx::query("UPDATE tx SET confirmation = $1 WHERE id = $2")
            .bind(blockref)
            .bind(tx_id)
            .execute(self.conn().await?)
            .await?;

        sqlx::query(
            "UPDATE txout SET spentby = ( \
                 SELECT txin.id FROM txin \
                 WHERE txin.input = txout.id AND txin.tx_id = $1 LIMIT 1 \
             ) WHERE txout.id IN ( \
                 SELECT input FROM txin WHERE txin.tx_id = $1 AND input IS NOT NULL \
             )",
        )
        .bind(tx_id)
        .execute(self.conn().await?)
        .await?;

        self.flag_touched_addresses(tx_id).await?;
        Ok(())
    }

    /// Reverts a confirmation: clears the confirmation link and the
    /// spent-links of every consumed UTXO, flagging the touched addresses.
    /// Never deletes anything.
    pub async fn unconfirm_transaction(&mut self, tx_id: i64) -> Result<()> {
        debug!("unconfirm tx #{tx_id}");
        sqlx::query("UPDATE tx SET confirmation = NULL WHERE id = $1")
            .bind(tx_id)
            .execute(self.conn().await?)
            .await?;
        self.flag_touched_addresses(tx_id).await?;
        sqlx::query(
            "UPDATE txout SET spentby = NULL \
             WHERE spentby IN (SELECT id FROM txin WHERE tx_id = $1)",
        )
        .bind(tx_id)
        .execute(self.conn().await?)
        .await?;
        Ok(())
    }

    async fn flag_touched_addresses(&mut self, tx_id: i64) -> Result<()> {
        sqlx::query(
            "UPDATE address SET balance_dirty = 1 \
             WHERE id IN (SELECT address_id FROM txout WHERE tx_id = $1)",
        )
        .bind(tx_id)
        .execute(self.conn().await?)
        .await?;
        sqlx::query(
            "UPDATE address SET balance_dirty = 1 \
             WHERE id IN ( \
                 SELECT txout.address_id FROM txin \
                 JOIN txout ON txin.input = txout.id \
                 WHERE txin.tx_id = $1 \
             )",
        )
        .bind(tx_id)
        .execute(self.conn().await?)
        .await?;
        Ok(())
    }

    /// Stores the parsed coinbase of a fresh block and attributes the miner.
    pub(crate) async fn add_coinbase_data(
        &mut self,
        block: &crate::entities::BlockRow,
        txid: &Hash256,
        capture: &CoinbaseCapture,
    ) -> Result<()> {
        let tx_id = self
            .transaction_internal_id(txid)
            .await?
            .ok_or(StoreError::UnknownTransaction(*txid))?;

        let total: Amount = capture.outputs.iter().map(|(_, _, value)| *value).sum();
        let newcoins = total - block.totalfee;

        let best_output = capture
            .outputs
            .iter()
            .find(|(_, _, value)| value.sats() * 100 > total.sats() * MAINOUTPUT_THRESHOLD_PCT);
        let mainoutput = match best_output {
            Some((idx, _, _)) => queries::output_of(self.conn().await?, tx_id, *idx)
                .await?
                .map(|out| out.id),
            None => None,
        };

        let solo = capture.raw.len() <= SOLO_COINBASE_MAX_LEN;
        let signature = if solo {
            None
        } else {
            parse_pool_signature(&capture.raw)
        };

        sqlx::query(
            "INSERT INTO coinbase (block_id, tx_id, raw, signature, newcoins, mainoutput) \
             VALUES ($1, $2, $3, $4, $5, $6)",
        )
        .bind(block.id)
        .bind(tx_id)
        .bind(capture.raw.clone())
        .bind(signature.clone())
        .bind(newcoins.sats())
        .bind(mainoutput)
        .execute(self.conn().await?)
        .await?;

        self.add_to_counter(CounterId::TotalCoinsReleased, newcoins.sats())
            .await?;

        self.find_and_set_miner(block.id, mainoutput, signature.as_deref(), solo)
            .await?;
        Ok(())
    }

    /// Miner attribution: a known coinbase signature wins, then a known
    /// payout address; otherwise a pool is synthesised from the payout
    /// address and remembered for next time.
    async fn find_and_set_miner(
        &mut self,
        block_id: i64,
        mainoutput: Option<i64>,
        signature: Option<&str>,
        solo: bool,
    ) -> Result<()> {
        if !solo {
            if let Some(signature) = signature {
                let row = sqlx::query("SELECT pool_id FROM poolsignature WHERE signature = $1")
                    .bind(signature.to_string())
                    .fetch_optional(self.conn().await?)
                    .await?;
                if let Some(row) = row {
                    let pool_id: i64 = row.try_get("pool_id")?;
                    self.set_block_miner(block_id, pool_id).await?;
                    return Ok(());
                }
            }
        }

        let mainoutput = match mainoutput {
            Some(id) => id,
            None => return Ok(()),
        };
        let row = sqlx::query("SELECT address_id FROM txout WHERE id = $1")
            .bind(mainoutput)
            .fetch_optional(self.conn().await?)
            .await?;
        let address_id: i64 = match row {
            Some(row) => row.try_get("address_id")?,
            None => return Ok(()),
        };

        let row = sqlx::query("SELECT pool_id FROM pooladdress WHERE address_id = $1")
            .bind(address_id)
            .fetch_optional(self.conn().await?)
            .await?;
        if let Some(row) = row {
            let pool_id: i64 = row.try_get("pool_id")?;
            self.set_block_miner(block_id, pool_id).await?;
            return Ok(());
        }

        let row = sqlx::query("SELECT address FROM address WHERE id = $1")
            .bind(address_id)
            .fetch_one(self.conn().await?)
            .await?;
        let address: Option<String> = row.try_get("address")?;
        let address = match address {
            Some(address) => address,
            None => return Ok(()),
        };

        let name = format!(
            "{address} {}",
            if solo { "(Solo miner)" } else { "(Unknown Pool)" }
        );
        info!("learned new pool: {name}");
        let row = sqlx::query(
            "INSERT INTO pool (group_id, name, solo) VALUES ($1, $2, $3) RETURNING id",
        )
        .bind(solo.then_some(SOLO_POOL_GROUP_ID))
        .bind(name)
        .bind(solo as i64)
        .fetch_one(self.conn().await?)
        .await?;
        let pool_id: i64 = row.try_get("id")?;

        sqlx::query("INSERT INTO pooladdress (address_id, pool_id) VALUES ($1, $2)")
            .bind(address_id)
            .bind(pool_id)
            .execute(self.conn().await?)
            .await?;
        self.set_block_miner(block_id, pool_id).await?;
        Ok(())
    }

    async fn set_block_miner(&mut self, block_id: i64, pool_id: i64) -> Result<()> {
        sqlx::query("UPDATE block SET miner = $1 WHERE id = $2")
            .bind(pool_id)
            .bind(block_id)
            .execute(self.conn().await?)
            .await?;
        Ok(())
    }
}

/// The pool tag between the final `/…/` delimiters of a coinbase script, if
/// the script carries one.
pub(crate) fn parse_pool_signature(raw: &[u8]) -> Option<String> {
    if raw.last() != Some(&b'/') || !raw[..raw.len() - 1].contains(&b'/') {
        return None;
    }
    let parts: Vec<&[u8]> = raw.split(|byte| *byte == b'/').collect();
    let token = parts.get(parts.len().checked_sub(2)?)?;
    std::str::from_utf8(token)
        .ok()
        .map(|token| format!("/{token}/"))
}

#[cfg(test)]
mod tests {
    use super::parse_pool_signature;

    #[test]
    fn extracts_the_last_slash_delimited_token() {
        assert_eq!(
            parse_pool_signature(b"\x03ab/P2Pool/").as_deref(),
            Some("/P2Pool/")
        );
        assert_eq!(
            parse_pool_signature(b"/a/longer/chain/of/tags/").as_deref(),
            Some("/tags/")
        );
    }

    #[test]
    fn rejects_scripts_without_a_tag() {
        assert_eq!(parse_pool_signature(b"\x03abcd"), None);
        assert_eq!(parse_pool_signature(b"no trailing slash/x"), None);
        assert_eq!(parse_pool_signature(b"onlyonetrailing/"), None);
    }

    #[test]
    fn rejects_non_utf8_tags() {
        assert_eq!(parse_pool_signature(b"/\xff\xfe/"), None);
    }
}
