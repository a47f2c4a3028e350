//! JSON envelope builders.
//!
//! Every entity ships a whitelisted field set: hashes as lowercase hex,
//! timestamps as Unix seconds, amounts as numbers. Nested entities appear
//! as `{href}` reference objects unless the caller opted into expansion.

use std::collections::HashSet;

use serde_json::{json, Value};

use chaindex_store::{
    AddressMutation, AddressRow, BlockRow, InputDetail, OutputDetail, PoolRow, RichlistEntry,
    TransactionMutation, TransactionRow,
};
use chaindex_types::Amount;

/// The `expand=` query parameter: a comma-separated key set, `*` for all.
#[derive(Clone, Debug, Default)]
pub struct Expand {
    keys: HashSet<String>,
    all: bool,
}

impl Expand {
    pub fn parse(raw: Option<&str>) -> Expand {
        let mut expand = Expand::default();
        for key in raw.unwrap_or("").split(',') {
            let key = key.trim();
            match key {
                "" | "none" => {}
                "*" => expand.all = true,
                _ => {
                    expand.keys.insert(key.to_string());
                }
            }
        }
        expand
    }

    pub fn wants(&self, key: &str) -> bool {
        self.all || self.keys.contains(key)
    }
}

fn amount_value(amount: Amount) -> Value {
    json!(amount.as_coins())
}

fn href(endpoint: &str, path: &str) -> Value {
    json!({ "href": format!("{endpoint}{path}") })
}

pub fn block_json(
    block: &BlockRow,
    endpoint: &str,
    expand: &Expand,
    miner: Option<&PoolRow>,
    transactions: Option<Vec<Value>>,
) -> Value {
    let miner_value = match (block.miner, miner) {
        (None, _) => Value::Null,
        (Some(_), Some(pool)) if expand.wants("miner") => pool_json(pool),
        (Some(_), _) => href(endpoint, &format!("/blocks/{}/miner/", block.hash)),
    };
    let transactions_value = match transactions {
        Some(list) if expand.wants("transactions") => Value::Array(list),
        _ => href(endpoint, &format!("/blocks/{}/transactions/", block.hash)),
    };
    json!({
        "hash": block.hash.to_string(),
        "height": block.height,
        "size": block.size,
        "difficulty": block.difficulty,
        "timestamp": block.timestamp,
        "firstseen": block.firstseen,
        "relayedby": block.relayedby,
        "totalfee": amount_value(block.totalfee),
        "miner": miner_value,
        "transactions": transactions_value,
    })
}

/// A transaction with its confirmation reference inlined far enough to
/// navigate (`hash` and `height` ride along on the href).
pub fn transaction_json(tx: &TransactionRow, endpoint: &str, block: Option<&BlockRow>) -> Value {
    let block_value = match block {
        Some(block) => json!({
            "href": format!("{endpoint}/blocks/{}/", block.hash),
            "hash": block.hash.to_string(),
            "height": block.height,
        }),
        None => Value::Null,
    };
    json!({
        "txid": tx.txid.to_string(),
        "size": tx.size,
        "fee": amount_value(tx.fee),
        "totalvalue": amount_value(tx.totalvalue),
        "firstseen": tx.firstseen,
        "relayedby": tx.relayedby,
        "confirmed": tx.confirmed(),
        "block": block_value,
        "inputs": href(endpoint, &format!("/transactions/{}/inputs/", tx.txid)),
        "outputs": href(endpoint, &format!("/transactions/{}/outputs/", tx.txid)),
        "mutations": href(endpoint, &format!("/transactions/{}/mutations/", tx.txid)),
    })
}

pub fn input_json(input: &InputDetail, endpoint: &str) -> Value {
    let source = match (&input.source_txid, input.source_vout) {
        (Some(txid), Some(vout)) => json!({
            "href": format!("{endpoint}/transactions/{txid}/outputs/{vout}/"),
            "txid": txid.to_string(),
            "vout": vout,
        }),
        _ => Value::Null,
    };
    json!({
        "index": input.idx,
        "amount": input.amount.map(amount_value),
        "address": input.address,
        "source": source,
    })
}

pub fn output_json(output: &OutputDetail) -> Value {
    json!({
        "index": output.idx,
        "type": output.kind.as_str(),
        "address": output.address,
        "script": output.raw,
        "amount": amount_value(output.amount),
        "spent": output.spent,
    })
}

pub fn transaction_mutation_json(mutation: &TransactionMutation) -> Value {
    json!({
        "address": mutation.address,
        "amount": amount_value(mutation.amount),
    })
}

pub fn address_json(address: &AddressRow, pending: Amount) -> Value {
    json!({
        "address": address.address,
        "balance": amount_value(address.balance),
        "pending": amount_value(pending),
    })
}

pub fn address_mutation_json(mutation: &AddressMutation) -> Value {
    json!({
        "time": mutation.time,
        "txid": mutation.txid.to_string(),
        "change": amount_value(mutation.change),
        "confirmed": mutation.confirmed,
    })
}

pub fn pool_json(pool: &PoolRow) -> Value {
    json!({
        "name": pool.name,
        "solo": pool.solo != 0,
        "website": pool.website,
        "graphcolor": pool.graphcolor,
    })
}

pub fn richlist_json(entry: &RichlistEntry) -> Value {
    json!({
        "address": entry.address,
        "balance": amount_value(entry.balance),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chaindex_types::Hash256;

    fn sample_block() -> BlockRow {
        BlockRow {
            id: 7,
            hash: Hash256::new([0xab; 32]),
            height: Some(12),
            size: 285,
            difficulty: 0.125,
            timestamp: 1_700_000_000,
            firstseen: None,
            relayedby: None,
            totalfee: Amount::from_coins(0.05),
            miner: Some(3),
        }
    }

    #[test]
    fn expansion_set_parses_stars_and_keys() {
        let expand = Expand::parse(Some("miner,transactions"));
        assert!(expand.wants("miner"));
        assert!(!expand.wants("block"));

        let all = Expand::parse(Some("*"));
        assert!(all.wants("anything"));

        let none = Expand::parse(Some("none"));
        assert!(!none.wants("miner"));
        assert!(!Expand::parse(None).wants("miner"));
    }

    #[test]
    fn unexpanded_references_are_hrefs() {
        let block = sample_block();
        let value = block_json(&block, "https://api.example", &Expand::default(), None, None);
        assert_eq!(
            value["miner"]["href"],
            format!("https://api.example/blocks/{}/miner/", block.hash)
        );
        assert_eq!(value["totalfee"], 0.05);
        assert_eq!(value["timestamp"], 1_700_000_000i64);
        assert_eq!(value["hash"], block.hash.to_string());
    }

    #[test]
    fn expanded_miner_inlines_the_pool() {
        let block = sample_block();
        let pool = PoolRow {
            id: 3,
            group_id: None,
            name: "Example Pool".to_string(),
            solo: 0,
            website: None,
            graphcolor: None,
        };
        let value = block_json(
            &block,
            "",
            &Expand::parse(Some("miner")),
            Some(&pool),
            None,
        );
        assert_eq!(value["miner"]["name"], "Example Pool");
        assert_eq!(value["miner"]["solo"], false);
    }

    #[test]
    fn whitelisted_fields_only() {
        let block = sample_block();
        let value = block_json(&block, "", &Expand::default(), None, None);
        let object = value.as_object().unwrap();
        // internal ids never ship
        assert!(!object.contains_key("id"));
        assert_eq!(object.len(), 10);
    }
}
