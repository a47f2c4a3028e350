mod blocks;

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};

use chaindex_types::{BlockInfo, Hash256, TransactionInfo, TransactionResolver};

use crate::{SQLXPool, Session};

static NEXT_DB: std::sync::atomic::AtomicU64 = std::sync::atomic::AtomicU64::new(0);

/// Every test gets its own named shared-cache memory database so the writer
/// session and ad-hoc pool connections observe the same schema.
pub async fn connect_memory() -> SQLXPool {
    let n = NEXT_DB.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
    let url = format!("sqlite:file:chaindex-test-{n}?mode=memory&cache=shared");
    let mut pool = SQLXPool::default();
    pool.connect(&url, Duration::from_secs(5), false)
        .await
        .unwrap();
    pool
}

pub async fn setup(utxo_cache: bool) -> (SQLXPool, Session) {
    let pool = connect_memory().await;
    let session = Session::new(pool.clone(), utxo_cache);
    (pool, session)
}

/// Deterministic txid fixtures.
pub fn txid(n: u8) -> Hash256 {
    Hash256::new([n; 32])
}

/// Deterministic block hash fixtures, disjoint from txids.
pub fn block_hash(n: u8) -> Hash256 {
    let mut bytes = [n; 32];
    bytes[0] = 0xb0;
    Hash256::new(bytes)
}

/// Map-backed stand-in for the node's transaction resolver.
pub struct MapResolver(pub HashMap<Hash256, TransactionInfo>);

impl MapResolver {
    pub fn new(txs: impl IntoIterator<Item = TransactionInfo>) -> MapResolver {
        MapResolver(txs.into_iter().map(|tx| (tx.txid, tx)).collect())
    }
}

#[async_trait]
impl TransactionResolver for MapResolver {
    async fn resolve_transaction(&self, txid: &Hash256) -> anyhow::Result<TransactionInfo> {
        self.0
            .get(txid)
            .cloned()
            .ok_or_else(|| anyhow::anyhow!("unknown txid {txid}"))
    }
}

fn output_json(n: u32, address: &str, value: f64) -> Value {
    json!({
        "n": n,
        "value": value,
        "scriptPubKey": {
            "type": "pubkeyhash",
            "addresses": [address],
            "asm": format!("OP_DUP OP_HASH160 {address} OP_EQUALVERIFY OP_CHECKSIG"),
        },
    })
}

/// A coinbase transaction paying the listed `(n, address, value)` outputs.
pub fn coinbase_tx(id: Hash256, script_hex: &str, outputs: &[(u32, &str, f64)]) -> TransactionInfo {
    let vout: Vec<Value> = outputs
        .iter()
        .map(|(n, address, value)| output_json(*n, address, *value))
        .collect();
    serde_json::from_value(json!({
        "txid": id.to_string(),
        "size": 120,
        "vin": [{"coinbase": script_hex}],
        "vout": vout,
    }))
    .unwrap()
}

/// A regular transaction spending the listed outpoints.
pub fn spend_tx(
    id: Hash256,
    inputs: &[(Hash256, u32)],
    outputs: &[(u32, &str, f64)],
) -> TransactionInfo {
    let vin: Vec<Value> = inputs
        .iter()
        .map(|(txid, vout)| json!({"txid": txid.to_string(), "vout": vout}))
        .collect();
    let vout: Vec<Value> = outputs
        .iter()
        .map(|(n, address, value)| output_json(*n, address, *value))
        .collect();
    serde_json::from_value(json!({
        "txid": id.to_string(),
        "size": 250,
        "vin": vin,
        "vout": vout,
    }))
    .unwrap()
}

pub fn block_info(
    hash: Hash256,
    height: i64,
    time: i64,
    txids: &[Hash256],
    previous: Option<Hash256>,
) -> BlockInfo {
    let txids: Vec<String> = txids.iter().map(|id| id.to_string()).collect();
    serde_json::from_value(json!({
        "hash": hash.to_string(),
        "height": height,
        "size": 285,
        "time": time,
        "difficulty": 0.125,
        "previousblockhash": previous.map(|h| h.to_string()),
        "tx": txids,
    }))
    .unwrap()
}

/// Genesis plus one coinbase block paying 50 coins to `GaddrA`; the most
/// common starting chain in these tests.
pub async fn seed_chain_b1(session: &mut Session) -> MapResolver {
    let t1 = coinbase_tx(txid(1), "03abc123", &[(0, "GaddrA", 50.0)]);
    let resolver = MapResolver::new([t1]);

    let genesis = block_info(block_hash(0), 0, 1_700_000_000, &[txid(0)], None);
    session.import_block(&genesis, &resolver, true).await.unwrap();

    let b1 = block_info(
        block_hash(1),
        1,
        1_700_000_060,
        &[txid(1)],
        Some(block_hash(0)),
    );
    session.import_block(&b1, &resolver, true).await.unwrap();
    resolver
}
