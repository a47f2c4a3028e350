//! Deserialized views of the node's JSON-RPC responses.

use serde::Deserialize;

use crate::{Amount, Hash256};

#[derive(Clone, Debug, Deserialize)]
pub struct BlockchainInfo {
    pub blocks: i64,
}

/// `getblock` result. `relayedat`/`relayedby` only appear on nodes patched to
/// track relay metadata; they stay `None` elsewhere.
#[derive(Clone, Debug, Deserialize)]
pub struct BlockInfo {
    pub hash: Hash256,
    pub height: i64,
    pub size: i64,
    pub time: i64,
    pub difficulty: f64,
    #[serde(default)]
    pub previousblockhash: Option<Hash256>,
    #[serde(default)]
    pub nextblockhash: Option<Hash256>,
    #[serde(default)]
    pub tx: Vec<Hash256>,
    #[serde(default)]
    pub relayedat: Option<i64>,
    #[serde(default)]
    pub relayedby: Option<String>,
}

/// `decoderawtransaction` result.
#[derive(Clone, Debug, Deserialize)]
pub struct TransactionInfo {
    pub txid: Hash256,
    pub size: i64,
    pub vin: Vec<TxIn>,
    pub vout: Vec<TxOut>,
    #[serde(default)]
    pub relayedat: Option<i64>,
    #[serde(default)]
    pub relayedby: Option<String>,
}

#[derive(Clone, Debug, Deserialize)]
pub struct TxIn {
    #[serde(default)]
    pub txid: Option<Hash256>,
    #[serde(default)]
    pub vout: Option<u32>,
    #[serde(default)]
    pub coinbase: Option<String>,
}

impl TxIn {
    pub fn is_coinbase(&self) -> bool {
        self.coinbase.is_some()
    }
}

#[derive(Clone, Debug, Deserialize)]
pub struct TxOut {
    pub n: u32,
    pub value: Amount,
    #[serde(rename = "scriptPubKey")]
    pub script_pub_key: ScriptPubKey,
}

#[derive(Clone, Debug, Default, Deserialize)]
pub struct ScriptPubKey {
    #[serde(rename = "type", default)]
    pub kind: Option<String>,
    #[serde(default)]
    pub addresses: Option<Vec<String>>,
    #[serde(default)]
    pub asm: String,
}

impl ScriptPubKey {
    /// The script's single address, when the node decoded exactly one.
    pub fn single_address(&self) -> Option<&str> {
        match self.addresses.as_deref() {
            Some([address]) => Some(address.as_str()),
            _ => None,
        }
    }
}

/// `validateaddress` result, reduced to what the indexer consumes.
#[derive(Clone, Debug, Deserialize)]
pub struct ValidatedAddress {
    #[serde(default)]
    pub isvalid: bool,
    #[serde(rename = "scriptPubKey", default)]
    pub script_pub_key: Option<String>,
}

/// `decodescript` result.
#[derive(Clone, Debug, Deserialize)]
pub struct DecodedScript {
    #[serde(default)]
    pub asm: String,
    #[serde(rename = "type", default)]
    pub kind: Option<String>,
    #[serde(default)]
    pub addresses: Option<Vec<String>>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn deserializes_a_block() {
        let info: BlockInfo = serde_json::from_value(json!({
            "hash": "00000000a1b2c3d4e5f60718293a4b5c6d7e8f9000000000a1b2c3d4e5f60718",
            "height": 12, "size": 285, "time": 1700000000, "difficulty": 0.125,
            "previousblockhash": "00000000a1b2c3d4e5f60718293a4b5c6d7e8f9000000000a1b2c3d4e5f60717",
            "tx": ["11000000a1b2c3d4e5f60718293a4b5c6d7e8f9000000000a1b2c3d4e5f60718"]
        }))
        .unwrap();
        assert_eq!(info.height, 12);
        assert_eq!(info.tx.len(), 1);
        assert!(info.nextblockhash.is_none());
        assert!(info.relayedby.is_none());
    }

    #[test]
    fn deserializes_a_coinbase_transaction() {
        let info: TransactionInfo = serde_json::from_value(json!({
            "txid": "11000000a1b2c3d4e5f60718293a4b5c6d7e8f9000000000a1b2c3d4e5f60718",
            "size": 120,
            "vin": [{"coinbase": "03abc123"}],
            "vout": [{
                "n": 0, "value": 50.0,
                "scriptPubKey": {"type": "pubkeyhash", "addresses": ["GaddrOne"], "asm": "OP_DUP ..."}
            }]
        }))
        .unwrap();
        assert!(info.vin[0].is_coinbase());
        assert_eq!(info.vout[0].value, Amount::from_coins(50.0));
        assert_eq!(info.vout[0].script_pub_key.single_address(), Some("GaddrOne"));
    }

    #[test]
    fn multi_address_scripts_have_no_single_address() {
        let spk: ScriptPubKey = serde_json::from_value(json!({
            "type": "multisig", "addresses": ["a", "b"], "asm": "1 ... 2 OP_CHECKMULTISIG"
        }))
        .unwrap();
        assert_eq!(spk.single_address(), None);
    }
}
