//! Writer-local hot-lookup tiers.
//!
//! All three caches belong to the single writer session; the read façade
//! never consults them. The utxo tier is both a size control and a
//! correctness device: a hit removes the entry, so no output can ever be
//! resolved from cache twice.

pub mod policy;

pub use policy::{LfuCache, RandomEvictCache, TtlCache};

use chaindex_types::{Amount, AddressKind, Hash256};

pub const ADDRESS_CACHE_CAPACITY: usize = 16_384;
pub const TXID_CACHE_CAPACITY: usize = 131_072;
pub const UTXO_CACHE_CAPACITY: usize = 262_144;

/// Cached slice of an address row, enough to attach outputs without a
/// round-trip.
#[derive(Clone, Debug)]
pub struct CachedAddress {
    pub id: i64,
    pub kind: AddressKind,
    pub raw: Option<String>,
}

/// Cached location of a not-yet-spent output: the owning transaction's
/// internal id, the output row id and its amount.
#[derive(Clone, Copy, Debug)]
pub struct CachedUtxo {
    pub tx_id: i64,
    pub utxo_id: i64,
    pub amount: Amount,
}

pub struct Caches {
    pub address: LfuCache<String, CachedAddress>,
    pub txid: RandomEvictCache<Hash256, i64>,
    pub utxo: Option<RandomEvictCache<String, CachedUtxo>>,
}

impl Caches {
    pub fn new(utxo_cache: bool) -> Caches {
        Caches {
            address: LfuCache::new(ADDRESS_CACHE_CAPACITY),
            txid: RandomEvictCache::new(TXID_CACHE_CAPACITY),
            utxo: utxo_cache.then(|| RandomEvictCache::new(UTXO_CACHE_CAPACITY)),
        }
    }
}

/// Cache key for one spendable output: `"<txid hex>_<vout>"`.
pub fn utxo_key(txid: &Hash256, vout: i64) -> String {
    format!("{txid}_{vout}")
}
