//! Transaction import: input resolution, output/address creation, totals
//! and per-address mutations.

use std::collections::HashMap;

use log::{debug, info};
use sqlx::Row;

use chaindex_types::{
    Amount, AddressKind, Hash256, ScriptPubKey, TransactionInfo, TransactionResolver, TxIn,
    TxOutKind,
};

use crate::cache::{utxo_key, CachedAddress, CachedUtxo};
use crate::error::{Result, StoreError};
use crate::session::{CoinbaseCapture, CoinbaseSink, Session};

/// Multi-row inserts and batched lookups stay below the sqlite bind limit.
const BULK_CHUNK: usize = 150;

struct InputKey {
    txid: Hash256,
    vout: i64,
    key: String,
}

struct ResolvedInputs {
    by_key: HashMap<String, (i64, Amount)>,
    utxo_cache_hits: usize,
    txid_cache_hits: usize,
}

impl Session {
    /// Returns the internal id for `txid`, importing the transaction first
    /// if the store does not know it yet.
    ///
    /// When a coinbase sink is supplied the transaction body is fetched even
    /// for known txids, so the caller always ends up with the coinbase
    /// capture it asked for. Idempotent on txid.
    pub async fn check_need_import_transaction(
        &mut self,
        txid: &Hash256,
        resolver: Option<&dyn TransactionResolver>,
        coinbase_sink: Option<&mut CoinbaseSink>,
        commit: bool,
    ) -> Result<i64> {
        let known = self.transaction_internal_id(txid).await?;
        if known.is_some() && coinbase_sink.is_none() {
            return Ok(known.expect("checked above"));
        }

        let resolver = match resolver {
            Some(resolver) => resolver,
            None => return known.ok_or(StoreError::UnknownTransaction(*txid)),
        };
        let info = resolver
            .resolve_transaction(txid)
            .await
            .map_err(StoreError::Resolver)?;

        if let Some(sink) = coinbase_sink {
            if let Some(coinbase) = info.vin.iter().find(|input| input.is_coinbase()) {
                let raw = hex::decode(coinbase.coinbase.as_deref().unwrap_or(""))
                    .unwrap_or_default();
                let outputs = info
                    .vout
                    .iter()
                    .filter(|out| out.value.is_positive())
                    .filter_map(|out| {
                        out.script_pub_key
                            .single_address()
                            .map(|address| (out.n as i64, address.to_string(), out.value))
                    })
                    .collect();
                sink.entries
                    .insert(info.txid, CoinbaseCapture { raw, outputs });
            }
        }

        if let Some(id) = known {
            return Ok(id);
        }
        self.import_transaction(&info, commit).await
    }

    /// Imports one decoded transaction. The shell row is inserted with
    /// placeholder totals, inputs are resolved through the cache waterfall,
    /// then outputs, totals and mutation rows follow; `commit` makes the
    /// whole unit durable.
    pub async fn import_transaction(&mut self, info: &TransactionInfo, commit: bool) -> Result<i64> {
        let regular: Vec<&TxIn> = info.vin.iter().filter(|input| !input.is_coinbase()).collect();
        let coinbase = regular.len() != info.vin.len();

        if coinbase {
            info!("adding tx {} (coinbase, {} outputs)", info.txid, info.vout.len());
        } else {
            info!(
                "adding tx {} ({} inputs, {} outputs)",
                info.txid,
                regular.len(),
                info.vout.len()
            );
        }

        let row = sqlx::query(
            "INSERT INTO tx (txid, size, fee, totalvalue, firstseen, relayedby) \
             VALUES ($1, $2, $3, $4, $5, $6) RETURNING id",
        )
        .bind(info.txid.to_vec())
        .bind(info.size)
        .bind(-1i64)
        .bind(-1i64)
        .bind(info.relayedat)
        .bind(info.relayedby.clone())
        .fetch_one(self.conn().await?)
        .await?;
        let tx_id: i64 = row.try_get("id")?;
        self.caches.txid.insert(info.txid, tx_id);

        let mut total_in = Amount::ZERO;
        let mut utxo_cache_hits = 0;
        let mut txid_cache_hits = 0;

        if !regular.is_empty() {
            let keys = input_keys(&regular)?;
            let resolved = self.lookup_input_utxos(&keys).await?;
            utxo_cache_hits = resolved.utxo_cache_hits;
            txid_cache_hits = resolved.txid_cache_hits;
            total_in = self.insert_inputs(tx_id, &keys, &resolved.by_key).await?;
        }

        let mut address_ids = Vec::with_capacity(info.vout.len());
        for out in &info.vout {
            address_ids.push(self.get_or_create_output_address(&out.script_pub_key).await?);
        }

        let (output_ids, total_out) = self.insert_outputs(tx_id, info, &address_ids).await?;

        let (totalvalue, fee) = if coinbase {
            (total_out, Amount::ZERO)
        } else {
            (total_in, total_in - total_out)
        };
        sqlx::query("UPDATE tx SET totalvalue = $1, fee = $2 WHERE id = $3")
            .bind(totalvalue.sats())
            .bind(fee.sats())
            .bind(tx_id)
            .execute(self.conn().await?)
            .await?;

        self.add_tx_mutations(tx_id).await?;

        if commit {
            debug!("commit tx {}", info.txid);
            self.commit().await?;
        }

        if let Some(cache) = &mut self.caches.utxo {
            for (out, utxo_id) in info.vout.iter().zip(&output_ids) {
                let kind = TxOutKind::from_rpc(out.script_pub_key.kind.as_deref());
                if kind != TxOutKind::Raw {
                    cache.insert(
                        utxo_key(&info.txid, out.n as i64),
                        CachedUtxo {
                            tx_id,
                            utxo_id: *utxo_id,
                            amount: out.value,
                        },
                    );
                }
            }
            debug!(
                "added tx {} (utxo cache: {}, hit {}/{}, txid cache: {}, address cache: {})",
                info.txid,
                cache.len(),
                utxo_cache_hits,
                regular.len(),
                self.caches.txid.len(),
                self.caches.address.len()
            );
        } else {
            debug!(
                "added tx {} (hit {}/{}, txid cache: {}, address cache: {})",
                info.txid,
                txid_cache_hits,
                regular.len(),
                self.caches.txid.len(),
                self.caches.address.len()
            );
        }

        Ok(tx_id)
    }

    /// Three-phase UTXO resolution. Phase 1 consumes utxo-cache entries (a
    /// hit removes the entry so nothing can be resolved from cache twice),
    /// phase 2 batch-queries `(internal tx id, vout)` pairs for inputs whose
    /// txid tier hit, phase 3 batch-joins on `(txid, vout)` for the rest.
    /// Any input still unresolved afterwards fails the import.
    async fn lookup_input_utxos(&mut self, keys: &[InputKey]) -> Result<ResolvedInputs> {
        let mut by_key: HashMap<String, (i64, Amount)> = HashMap::with_capacity(keys.len());
        let mut misses: Vec<&InputKey> = Vec::new();

        if let Some(cache) = &mut self.caches.utxo {
            for key in keys {
                match cache.remove(&key.key) {
                    Some(entry) => {
                        by_key.insert(key.key.clone(), (entry.utxo_id, entry.amount));
                    }
                    None => misses.push(key),
                }
            }
        } else {
            misses = keys.iter().collect();
        }
        let utxo_cache_hits = by_key.len();

        let mut slow: Vec<&InputKey> = Vec::new();
        let mut pairs: Vec<(&InputKey, i64)> = Vec::new();
        for key in misses {
            match self.caches.txid.get(&key.txid) {
                Some(tx_id) => pairs.push((key, *tx_id)),
                None => slow.push(key),
            }
        }
        let txid_cache_hits = pairs.len();

        for chunk in pairs.chunks(BULK_CHUNK) {
            let mut sql = String::from("SELECT id, tx_id, idx, amount FROM txout WHERE ");
            let mut bind = 1;
            for i in 0..chunk.len() {
                if i > 0 {
                    sql.push_str(" OR ");
                }
                sql.push_str(&format!("(tx_id = ${} AND idx = ${})", bind, bind + 1));
                bind += 2;
            }
            let mut query = sqlx::query(&sql);
            for &(key, tx_id) in chunk {
                query = query.bind(tx_id).bind(key.vout);
            }
            let rows = query.fetch_all(self.conn().await?).await?;

            let mut found: HashMap<(i64, i64), (i64, Amount)> = HashMap::new();
            for row in &rows {
                found.insert(
                    (row.try_get("tx_id")?, row.try_get("idx")?),
                    (
                        row.try_get("id")?,
                        Amount::from_sats(row.try_get("amount")?),
                    ),
                );
            }
            for &(key, tx_id) in chunk {
                match found.get(&(tx_id, key.vout)) {
                    Some(entry) => {
                        by_key.insert(key.key.clone(), *entry);
                    }
                    None => slow.push(key),
                }
            }
        }

        for chunk in slow.chunks(BULK_CHUNK) {
            let mut sql = String::from(
                "SELECT txout.id AS id, txout.idx AS idx, txout.amount AS amount, \
                        tx.txid AS txid \
                 FROM txout JOIN tx ON txout.tx_id = tx.id WHERE ",
            );
            let mut bind = 1;
            for i in 0..chunk.len() {
                if i > 0 {
                    sql.push_str(" OR ");
                }
                sql.push_str(&format!("(tx.txid = ${} AND txout.idx = ${})", bind, bind + 1));
                bind += 2;
            }
            let mut query = sqlx::query(&sql);
            for key in chunk {
                query = query.bind(key.txid.to_vec()).bind(key.vout);
            }
            let rows = query.fetch_all(self.conn().await?).await?;
            for row in &rows {
                let txid_bytes: Vec<u8> = row.try_get("txid")?;
                let txid = Hash256::from_slice(&txid_bytes)
                    .map_err(|e| StoreError::Decode(e.to_string()))?;
                let idx: i64 = row.try_get("idx")?;
                by_key.insert(
                    utxo_key(&txid, idx),
                    (
                        row.try_get("id")?,
                        Amount::from_sats(row.try_get("amount")?),
                    ),
                );
            }
        }

        for key in keys {
            if !by_key.contains_key(&key.key) {
                return Err(StoreError::UtxoMissing {
                    txid: key.txid,
                    vout: key.vout as u32,
                });
            }
        }

        Ok(ResolvedInputs {
            by_key,
            utxo_cache_hits,
            txid_cache_hits,
        })
    }

    async fn insert_inputs(
        &mut self,
        tx_id: i64,
        keys: &[InputKey],
        resolved: &HashMap<String, (i64, Amount)>,
    ) -> Result<Amount> {
        let mut total = Amount::ZERO;
        for (offset, chunk) in keys.chunks(BULK_CHUNK).enumerate() {
            let mut sql = String::from("INSERT INTO txin (tx_id, idx, input) VALUES ");
            let mut bind = 1;
            for i in 0..chunk.len() {
                if i > 0 {
                    sql.push(',');
                }
                sql.push_str(&format!("(${}, ${}, ${})", bind, bind + 1, bind + 2));
                bind += 3;
            }
            let mut query = sqlx::query(&sql);
            for (i, key) in chunk.iter().enumerate() {
                let (utxo_id, amount) = resolved[&key.key];
                total += amount;
                query = query
                    .bind(tx_id)
                    .bind((offset * BULK_CHUNK + i) as i64)
                    .bind(utxo_id);
            }
            query.execute(self.conn().await?).await?;
        }
        Ok(total)
    }

    async fn insert_outputs(
        &mut self,
        tx_id: i64,
        info: &TransactionInfo,
        address_ids: &[i64],
    ) -> Result<(Vec<i64>, Amount)> {
        let mut total = Amount::ZERO;
        let mut ids_by_idx: HashMap<i64, i64> = HashMap::with_capacity(info.vout.len());

        let outputs: Vec<_> = info.vout.iter().zip(address_ids).collect();
        for chunk in outputs.chunks(BULK_CHUNK) {
            let mut sql =
                String::from("INSERT INTO txout (tx_id, idx, kind, address_id, amount) VALUES ");
            let mut bind = 1;
            for i in 0..chunk.len() {
                if i > 0 {
                    sql.push(',');
                }
                sql.push_str(&format!(
                    "(${}, ${}, ${}, ${}, ${})",
                    bind,
                    bind + 1,
                    bind + 2,
                    bind + 3,
                    bind + 4
                ));
                bind += 5;
            }
            sql.push_str(" RETURNING id, idx");

            let mut query = sqlx::query(&sql);
            for (out, address_id) in chunk {
                let kind = TxOutKind::from_rpc(out.script_pub_key.kind.as_deref());
                total += out.value;
                query = query
                    .bind(tx_id)
                    .bind(out.n as i64)
                    .bind(kind.internal_id())
                    .bind(**address_id)
                    .bind(out.value.sats());
            }
            let rows = query.fetch_all(self.conn().await?).await?;
            for row in &rows {
                ids_by_idx.insert(row.try_get("idx")?, row.try_get("id")?);
            }
        }

        let ids = info
            .vout
            .iter()
            .map(|out| {
                ids_by_idx
                    .get(&(out.n as i64))
                    .copied()
                    .ok_or_else(|| StoreError::Decode("output insert returned no id".to_string()))
            })
            .collect::<Result<Vec<i64>>>()?;
        Ok((ids, total))
    }

    /// Address acquisition: single-address scripts become BASE58/BECH32 rows
    /// (cache → store → insert), `OP_RETURN <token>` becomes a DATA row, and
    /// anything else stores the full disassembly as RAW. Rows without an
    /// address string are never cached.
    pub async fn get_or_create_output_address(&mut self, script: &ScriptPubKey) -> Result<i64> {
        if let Some(address) = script.single_address() {
            let address = address.to_string();
            let kind = AddressKind::classify(&address);

            if let Some(cached) = self.caches.address.get(&address) {
                return Ok(cached.id);
            }
            let row = sqlx::query("SELECT id, kind, raw FROM address WHERE address = $1")
                .bind(address.clone())
                .fetch_optional(self.conn().await?)
                .await?;
            if let Some(row) = row {
                let cached = CachedAddress {
                    id: row.try_get("id")?,
                    kind: AddressKind::from_internal_id(row.try_get("kind")?),
                    raw: row.try_get("raw")?,
                };
                let id = cached.id;
                self.caches.address.insert(address, cached);
                return Ok(id);
            }
            let row = sqlx::query(
                "INSERT INTO address (kind, address) VALUES ($1, $2) RETURNING id",
            )
            .bind(kind.internal_id())
            .bind(address)
            .fetch_one(self.conn().await?)
            .await?;
            return Ok(row.try_get("id")?);
        }

        let asm = script.asm.as_str();
        let (kind, raw) = match asm.strip_prefix("OP_RETURN ") {
            Some(data) if !data.contains(' ') && !data.is_empty() => {
                (AddressKind::Data, data.to_string())
            }
            _ => (AddressKind::Raw, asm.to_string()),
        };
        let row = sqlx::query("INSERT INTO address (kind, raw) VALUES ($1, $2) RETURNING id")
            .bind(kind.internal_id())
            .bind(raw)
            .fetch_one(self.conn().await?)
            .await?;
        Ok(row.try_get("id")?)
    }

    /// One grouped insert producing the transaction's net effect per
    /// address: outputs count positive, consumed inputs negative.
    pub async fn add_tx_mutations(&mut self, tx_id: i64) -> Result<()> {
        sqlx::query(
            "INSERT INTO mutation (tx_id, address_id, amount) \
             SELECT $1, merged.address_id, SUM(merged.amount) FROM ( \
                 SELECT txout.address_id AS address_id, txout.amount AS amount \
                   FROM txout WHERE txout.tx_id = $1 \
                 UNION ALL \
                 SELECT txout.address_id AS address_id, 0 - txout.amount AS amount \
                   FROM txin JOIN txout ON txin.input = txout.id \
                  WHERE txin.tx_id = $1 \
             ) merged GROUP BY merged.address_id",
        )
        .bind(tx_id)
        .execute(self.conn().await?)
        .await?;
        Ok(())
    }
}

fn input_keys(inputs: &[&TxIn]) -> Result<Vec<InputKey>> {
    inputs
        .iter()
        .map(|input| {
            let txid = input
                .txid
                .ok_or_else(|| StoreError::Chain("regular input without txid".to_string()))?;
            let vout = input
                .vout
                .ok_or_else(|| StoreError::Chain("regular input without vout".to_string()))?
                as i64;
            Ok(InputKey {
                txid,
                vout,
                key: utxo_key(&txid, vout),
            })
        })
        .collect()
}
