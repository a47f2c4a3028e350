/// Output script classes the node reports, plus a catch-all for anything
/// non-standard.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum TxOutKind {
    P2pk,
    P2pkh,
    P2sh,
    P2wpkh,
    P2wsh,
    Raw,
}

impl TxOutKind {
    pub fn from_rpc(kind: Option<&str>) -> TxOutKind {
        match kind {
            Some("pubkey") => TxOutKind::P2pk,
            Some("pubkeyhash") => TxOutKind::P2pkh,
            Some("scripthash") => TxOutKind::P2sh,
            Some("witness_v0_keyhash") => TxOutKind::P2wpkh,
            Some("witness_v0_scripthash") => TxOutKind::P2wsh,
            _ => TxOutKind::Raw,
        }
    }

    /// The stable id stored in the `txout.kind` column. `Raw` is -1, a schema
    /// artefact preserved bit-exactly.
    pub fn internal_id(self) -> i64 {
        match self {
            TxOutKind::P2pk => 1,
            TxOutKind::P2pkh => 2,
            TxOutKind::P2sh => 3,
            TxOutKind::P2wpkh => 4,
            TxOutKind::P2wsh => 5,
            TxOutKind::Raw => -1,
        }
    }

    pub fn from_internal_id(id: i64) -> TxOutKind {
        match id {
            1 => TxOutKind::P2pk,
            2 => TxOutKind::P2pkh,
            3 => TxOutKind::P2sh,
            4 => TxOutKind::P2wpkh,
            5 => TxOutKind::P2wsh,
            _ => TxOutKind::Raw,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            TxOutKind::P2pk => "p2pk",
            TxOutKind::P2pkh => "p2pkh",
            TxOutKind::P2sh => "p2sh",
            TxOutKind::P2wpkh => "p2wpkh",
            TxOutKind::P2wsh => "p2wsh",
            TxOutKind::Raw => "raw",
        }
    }
}

/// How an address row came to be: a decodable address string, an OP_RETURN
/// data carrier, or a raw script disassembly.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum AddressKind {
    Base58,
    Bech32,
    Data,
    Raw,
}

impl AddressKind {
    /// Classifies a single address string the way the node renders them:
    /// base58 addresses never exceed 34 characters.
    pub fn classify(address: &str) -> AddressKind {
        if address.len() <= 34 {
            AddressKind::Base58
        } else {
            AddressKind::Bech32
        }
    }

    pub fn internal_id(self) -> i64 {
        match self {
            AddressKind::Base58 => 1,
            AddressKind::Bech32 => 2,
            AddressKind::Data => 3,
            AddressKind::Raw => -1,
        }
    }

    pub fn from_internal_id(id: i64) -> AddressKind {
        match id {
            1 => AddressKind::Base58,
            2 => AddressKind::Bech32,
            3 => AddressKind::Data,
            _ => AddressKind::Raw,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            AddressKind::Base58 => "base58",
            AddressKind::Bech32 => "bech32",
            AddressKind::Data => "data",
            AddressKind::Raw => "raw",
        }
    }
}
