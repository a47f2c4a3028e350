use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};

use chaindex_daemon::{DaemonError, NodeRpc};
use chaindex_store::{CounterId, SQLXPool};
use chaindex_types::{
    Amount, BlockInfo, DecodedScript, Hash256, TransactionInfo, ValidatedAddress,
};

use crate::Service;

static NEXT_DB: std::sync::atomic::AtomicU64 = std::sync::atomic::AtomicU64::new(0);

async fn connect_memory() -> SQLXPool {
    let n = NEXT_DB.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
    let url = format!("sqlite:file:chaindex-sync-test-{n}?mode=memory&cache=shared");
    let mut pool = SQLXPool::default();
    pool.connect(&url, Duration::from_secs(5), false)
        .await
        .unwrap();
    pool
}

fn txid(n: u8) -> Hash256 {
    Hash256::new([n; 32])
}

fn block_hash(n: u8) -> Hash256 {
    let mut bytes = [n; 32];
    bytes[0] = 0xb0;
    Hash256::new(bytes)
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

fn coinbase_tx(id: Hash256, outputs: &[(u32, &str, f64)]) -> TransactionInfo {
    let vout: Vec<Value> = outputs
        .iter()
        .map(|(n, address, value)| output_json(*n, address, *value))
        .collect();
    serde_json::from_value(json!({
        "txid": id.to_string(),
        "size": 120,
        "vin": [{"coinbase": "03abc123"}],
        "vout": vout,
    }))
    .unwrap()
}

fn spend_tx(id: Hash256, inputs: &[(Hash256, u32)], outputs: &[(u32, &str, f64)]) -> TransactionInfo {
    let vin: Vec<Value> = inputs
        .iter()
        .map(|(source, vout)| json!({"txid": source.to_string(), "vout": vout}))
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

#[derive(Default)]
struct FakeChainState {
    /// Canonical chain, index = height.
    blocks: Vec<BlockInfo>,
    transactions: HashMap<Hash256, TransactionInfo>,
    mempool: Vec<Hash256>,
}

/// In-memory stand-in for the full node.
#[derive(Default)]
struct FakeNode {
    state: Mutex<FakeChainState>,
}

impl FakeNode {
    fn new() -> FakeNode {
        let node = FakeNode::default();
        node.push_block(block_hash(0), &[]);
        node
    }

    /// Appends a block holding `txs` to the canonical chain.
    fn push_block(&self, hash: Hash256, txs: &[TransactionInfo]) {
        let mut state = self.state.lock().unwrap();
        let height = state.blocks.len() as i64;
        let previous = state.blocks.last().map(|block| block.hash.to_string());
        let txids: Vec<String> = txs.iter().map(|tx| tx.txid.to_string()).collect();
        for tx in txs {
            state.transactions.insert(tx.txid, tx.clone());
            state.mempool.retain(|id| id != &tx.txid);
        }
        let info: BlockInfo = serde_json::from_value(json!({
            "hash": hash.to_string(),
            "height": height,
            "size": 285,
            "time": 1_700_000_000 + height * 60,
            "difficulty": 0.125,
            "previousblockhash": previous,
            "tx": txids,
        }))
        .unwrap();

        if let Some(parent) = state.blocks.last_mut() {
            parent.nextblockhash = Some(hash);
        }
        state.blocks.push(info);
    }

    /// Drops every block from `height` up, as a competing chain would.
    fn truncate(&self, height: i64) {
        let mut state = self.state.lock().unwrap();
        state.blocks.truncate(height as usize);
        if let Some(tip) = state.blocks.last_mut() {
            tip.nextblockhash = None;
        }
    }

    fn add_mempool_tx(&self, tx: TransactionInfo) {
        let mut state = self.state.lock().unwrap();
        state.mempool.push(tx.txid);
        state.transactions.insert(tx.txid, tx);
    }
}

#[async_trait]
impl NodeRpc for FakeNode {
    async fn uptime(&self) -> Result<i64, DaemonError> {
        Ok(1_234)
    }

    async fn best_height(&self) -> Result<i64, DaemonError> {
        let state = self.state.lock().unwrap();
        Ok(state.blocks.len() as i64 - 1)
    }

    async fn block_hash(&self, height: i64) -> Result<Hash256, DaemonError> {
        let state = self.state.lock().unwrap();
        state
            .blocks
            .get(height as usize)
            .map(|block| block.hash)
            .ok_or_else(|| DaemonError::Rpc {
                code: -8,
                message: "Block height out of range".to_string(),
            })
    }

    async fn block(&self, hash: &Hash256) -> Result<BlockInfo, DaemonError> {
        let state = self.state.lock().unwrap();
        state
            .blocks
            .iter()
            .find(|block| block.hash == *hash)
            .cloned()
            .ok_or_else(|| DaemonError::Rpc {
                code: -5,
                message: "Block not found".to_string(),
            })
    }

    async fn load_transaction(&self, txid: &Hash256) -> Result<TransactionInfo, DaemonError> {
        let state = self.state.lock().unwrap();
        state
            .transactions
            .get(txid)
            .cloned()
            .ok_or_else(|| DaemonError::Rpc {
                code: -5,
                message: "No such mempool or blockchain transaction".to_string(),
            })
    }

    async fn raw_mempool(&self) -> Result<Vec<Hash256>, DaemonError> {
        Ok(self.state.lock().unwrap().mempool.clone())
    }

    async fn validate_address(&self, address: &str) -> Result<ValidatedAddress, DaemonError> {
        Ok(serde_json::from_value(json!({
            "isvalid": true,
            "scriptPubKey": format!("76a9{}88ac", hex::encode(address.as_bytes())),
        }))
        .unwrap())
    }

    async fn decode_script(&self, script_hex: &str) -> Result<DecodedScript, DaemonError> {
        Ok(serde_json::from_value(json!({
            "asm": format!("decoded {script_hex}"),
            "type": "pubkeyhash",
        }))
        .unwrap())
    }
}

/// Node with genesis, one 50-coin coinbase to GaddrA and a spend block.
fn seeded_node() -> FakeNode {
    let node = FakeNode::new();
    node.push_block(block_hash(1), &[coinbase_tx(txid(1), &[(0, "GaddrA", 50.0)])]);
    node.push_block(
        block_hash(2),
        &[
            coinbase_tx(txid(2), &[(0, "GpoolPayout", 50.05)]),
            spend_tx(
                txid(3),
                &[(txid(1), 0)],
                &[(0, "GaddrB", 49.9), (1, "GaddrA", 0.05)],
            ),
        ],
    );
    node
}

#[tokio::test]
async fn initial_sync_mirrors_the_node_chain() {
    let pool = connect_memory().await;
    let mut service = Service::new(seeded_node(), pool.clone(), true);

    assert!(service.sync_blocks(true).await.unwrap());

    assert_eq!(3, pool.fetch_count("block").await.unwrap());
    assert_eq!(3, pool.fetch_count("tx").await.unwrap());
    assert_eq!(2, pool.fetch_count("coinbase").await.unwrap());

    let tip = service.session.chaintip().await.unwrap().unwrap();
    assert_eq!(tip.height, Some(2));
    assert_eq!(tip.hash, block_hash(2));
    assert_eq!(tip.totalfee, Amount::from_coins(0.05));

    // nothing further to do
    assert!(!service.sync_blocks(false).await.unwrap());
    assert_eq!(
        service.session.counter(CounterId::TotalBlocks).await.unwrap(),
        3
    );
}

#[tokio::test]
async fn a_reorg_orphans_and_reimports() {
    let pool = connect_memory().await;
    let node = seeded_node();
    let mut service = Service::new(node, pool.clone(), true);
    service.sync_blocks(true).await.unwrap();

    // the node switches to a different block 2
    service.node.truncate(2);
    service.node.push_block(
        block_hash(3),
        &[
            coinbase_tx(txid(4), &[(0, "GpoolPayout", 50.01)]),
            spend_tx(txid(5), &[(txid(1), 0)], &[(0, "GaddrC", 49.99)]),
        ],
    );

    assert!(service.sync_blocks(false).await.unwrap());

    let tip = service.session.chaintip().await.unwrap().unwrap();
    assert_eq!(tip.hash, block_hash(3));
    assert_eq!(tip.height, Some(2));

    let stale = service
        .session
        .block_by_hash(&block_hash(2))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stale.height, None);

    let replaced = service
        .session
        .transaction_by_txid(&txid(3))
        .await
        .unwrap()
        .unwrap();
    assert!(!replaced.confirmed());

    // the counters were rebuilt to match the new chain
    assert!(service
        .session
        .counters_valid(&CounterId::ALL)
        .await
        .unwrap());
    assert_eq!(
        service.session.counter(CounterId::TotalBlocks).await.unwrap(),
        3
    );
}

#[tokio::test]
async fn mempool_transactions_import_once() {
    let pool = connect_memory().await;
    let node = seeded_node();
    let mut service = Service::new(node, pool.clone(), true);
    service.sync_blocks(true).await.unwrap();

    let pending = spend_tx(txid(6), &[(txid(3), 0)], &[(0, "GaddrD", 49.8)]);
    service.node.add_mempool_tx(pending);

    assert!(service.query_mempool().await.unwrap());
    let row = service
        .session
        .transaction_by_txid(&txid(6))
        .await
        .unwrap()
        .unwrap();
    assert!(!row.confirmed());

    // already seen: the second poll is a no-op
    assert!(!service.query_mempool().await.unwrap());
}

#[tokio::test]
async fn a_confirmed_conflict_marks_the_mempool_spend() {
    let pool = connect_memory().await;
    let node = seeded_node();
    let mut service = Service::new(node, pool.clone(), true);
    service.sync_blocks(true).await.unwrap();

    // a spend of B-block output arrives in the mempool...
    let pending = spend_tx(txid(6), &[(txid(3), 0)], &[(0, "GaddrD", 49.8)]);
    service.node.add_mempool_tx(pending);
    service.query_mempool().await.unwrap();

    // ...but a block confirms a conflicting spend of the same outpoint
    service.node.push_block(
        block_hash(3),
        &[
            coinbase_tx(txid(7), &[(0, "GpoolPayout", 50.0)]),
            spend_tx(txid(8), &[(txid(3), 0)], &[(0, "GaddrE", 49.85)]),
        ],
    );
    service.sync_blocks(false).await.unwrap();

    assert!(service.check_mempool_for_doublespends().await.unwrap());
    let winner = service
        .session
        .transaction_internal_id(&txid(8))
        .await
        .unwrap()
        .unwrap();
    let loser = service
        .session
        .transaction_by_txid(&txid(6))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(loser.doublespends, Some(winner));

    // guarded by the tip hash: no second scan for the same chain state
    assert!(!service.check_mempool_for_doublespends().await.unwrap());
}

#[tokio::test]
async fn gap_verification_reimports_missing_heights() {
    let pool = connect_memory().await;
    let mut service = Service::new(seeded_node(), pool.clone(), true);
    service.sync_blocks(true).await.unwrap();
    service.session.reset().await.unwrap();

    // lose a middle block, as if a past run died half-way
    let mut conn = pool.acquire().await.unwrap();
    sqlx::query("DELETE FROM coinbase WHERE block_id IN (SELECT id FROM block WHERE height = 1)")
        .execute(&mut *conn)
        .await
        .unwrap();
    sqlx::query("DELETE FROM blocktx WHERE block_id IN (SELECT id FROM block WHERE height = 1)")
        .execute(&mut *conn)
        .await
        .unwrap();
    sqlx::query("UPDATE tx SET confirmation = NULL WHERE txid = $1")
        .bind(txid(1).to_vec())
        .execute(&mut *conn)
        .await
        .unwrap();
    sqlx::query("DELETE FROM block WHERE height = 1")
        .execute(&mut *conn)
        .await
        .unwrap();
    drop(conn);

    assert!(service.sync_blocks(true).await.unwrap());
    let restored = service
        .session
        .block_by_height(1)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(restored.hash, block_hash(1));
}

#[tokio::test]
async fn migration_phases_run_to_completion() {
    let pool = connect_memory().await;
    let node = seeded_node();
    let mut service = Service::new(node, pool.clone(), true);
    service.sync_blocks(true).await.unwrap();

    // freshly indexed data needs no mutation/fee backfills, but address
    // scripts are filled via the node
    let mut passes = 0;
    while service.migrate_old_data().await.unwrap() {
        passes += 1;
        assert!(passes < 1_000, "migration does not terminate");
    }
    assert!(!service.migrate_old_data().await.unwrap());

    service.session.reset().await.unwrap();
    let mut conn = pool.acquire().await.unwrap();
    use sqlx::Row;
    let row = sqlx::query("SELECT raw FROM address WHERE address = $1")
        .bind("GaddrA")
        .fetch_one(&mut *conn)
        .await
        .unwrap();
    let raw: Option<String> = row.get("raw");
    assert!(raw.unwrap().starts_with("decoded "));
}
