//! Event signatures and the per-role signature sets.
//!
//! The event id (topic 0) of a signature is keccak256 of its canonical form,
//! e.g. `keccak256("OwnerChanged(bytes32,address)")`.

use alloy_core::dyn_abi::DynSolType;

use pnsindex_core::namehash::keccak256_hex;
use pnsindex_core::types::ContractRole;

/// Semantic type of an event parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamKind {
    Address,
    Bytes32,
    String,
    Uint,
    Bool,
    Bytes,
}

impl ParamKind {
    /// Canonical ABI type name used in the signature string.
    pub fn canonical(&self) -> &'static str {
        match self {
            Self::Address => "address",
            Self::Bytes32 => "bytes32",
            Self::String => "string",
            Self::Uint => "uint256",
            Self::Bool => "bool",
            Self::Bytes => "bytes",
        }
    }

    /// Dynamic types are stored as their keccak hash when indexed.
    pub fn is_dynamic(&self) -> bool {
        matches!(self, Self::String | Self::Bytes)
    }

    pub fn sol_type(&self) -> DynSolType {
        match self {
            Self::Address => DynSolType::Address,
            Self::Bytes32 => DynSolType::FixedBytes(32),
            Self::String => DynSolType::String,
            Self::Uint => DynSolType::Uint(256),
            Self::Bool => DynSolType::Bool,
            Self::Bytes => DynSolType::Bytes,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventParam {
    pub name: String,
    pub kind: ParamKind,
    pub indexed: bool,
}

impl EventParam {
    pub fn indexed(name: &str, kind: ParamKind) -> Self {
        Self {
            name: name.into(),
            kind,
            indexed: true,
        }
    }

    pub fn data(name: &str, kind: ParamKind) -> Self {
        Self {
            name: name.into(),
            kind,
            indexed: false,
        }
    }
}

/// An event name with its ordered parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventSignature {
    pub name: String,
    pub params: Vec<EventParam>,
    topic0: String,
}

impl EventSignature {
    pub fn new(name: &str, params: Vec<EventParam>) -> Self {
        let canonical = canonical_signature(name, &params);
        Self {
            name: name.into(),
            params,
            topic0: keccak256_hex(canonical.as_bytes()),
        }
    }

    /// `Name(type1,type2,…)`.
    pub fn canonical(&self) -> String {
        canonical_signature(&self.name, &self.params)
    }

    /// Event id, lowercase `0x…`.
    pub fn topic0(&self) -> &str {
        &self.topic0
    }

    pub fn indexed_params(&self) -> impl Iterator<Item = &EventParam> {
        self.params.iter().filter(|p| p.indexed)
    }

    pub fn data_params(&self) -> impl Iterator<Item = &EventParam> {
        self.params.iter().filter(|p| !p.indexed)
    }

    pub fn indexed_count(&self) -> usize {
        self.indexed_params().count()
    }
}

fn canonical_signature(name: &str, params: &[EventParam]) -> String {
    let types: Vec<&str> = params.iter().map(|p| p.kind.canonical()).collect();
    format!("{name}({})", types.join(","))
}

/// The signatures emitted by one contract role.
#[derive(Debug, Clone)]
pub struct SignatureSet {
    pub role: ContractRole,
    pub signatures: Vec<EventSignature>,
}

impl SignatureSet {
    pub fn new(role: ContractRole, signatures: Vec<EventSignature>) -> Self {
        Self { role, signatures }
    }

    /// The built-in set for `role`.
    pub fn builtin(role: ContractRole) -> Self {
        match role {
            ContractRole::Registry => Self::registry(),
            ContractRole::Resolver => Self::resolver(),
            ContractRole::Nft => Self::nft(),
        }
    }

    pub fn registry() -> Self {
        use ParamKind::*;
        Self::new(
            ContractRole::Registry,
            vec![
                EventSignature::new(
                    "NameRegistered",
                    vec![
                        EventParam::indexed("nameHash", Bytes32),
                        EventParam::indexed("owner", Address),
                        EventParam::data("name", String),
                        EventParam::data("expires", Uint),
                        EventParam::data("resolver", Address),
                    ],
                ),
                EventSignature::new(
                    "NameRenewed",
                    vec![
                        EventParam::indexed("nameHash", Bytes32),
                        EventParam::data("expires", Uint),
                    ],
                ),
                EventSignature::new(
                    "OwnerChanged",
                    vec![
                        EventParam::indexed("nameHash", Bytes32),
                        EventParam::indexed("owner", Address),
                    ],
                ),
                EventSignature::new(
                    "ResolverChanged",
                    vec![
                        EventParam::indexed("nameHash", Bytes32),
                        EventParam::data("resolver", Address),
                    ],
                ),
            ],
        )
    }

    pub fn resolver() -> Self {
        use ParamKind::*;
        Self::new(
            ContractRole::Resolver,
            vec![
                EventSignature::new(
                    "AddrChanged",
                    vec![
                        EventParam::indexed("node", Bytes32),
                        EventParam::data("addr", Address),
                    ],
                ),
                EventSignature::new(
                    "TextChanged",
                    vec![
                        EventParam::indexed("node", Bytes32),
                        EventParam::indexed("indexedKey", String),
                        EventParam::data("key", String),
                        EventParam::data("value", String),
                    ],
                ),
                EventSignature::new(
                    "ContenthashChanged",
                    vec![
                        EventParam::indexed("node", Bytes32),
                        EventParam::data("hash", Bytes),
                    ],
                ),
                EventSignature::new(
                    "RecordDeleted",
                    vec![
                        EventParam::indexed("node", Bytes32),
                        EventParam::indexed("indexedKey", String),
                        EventParam::data("key", String),
                    ],
                ),
            ],
        )
    }

    pub fn nft() -> Self {
        use ParamKind::*;
        Self::new(
            ContractRole::Nft,
            vec![
                EventSignature::new(
                    "Transfer",
                    vec![
                        EventParam::indexed("from", Address),
                        EventParam::indexed("to", Address),
                        EventParam::indexed("tokenId", Uint),
                    ],
                ),
                // `token` is the zero address when the domain is not wrapped.
                EventSignature::new(
                    "WrapStateChanged",
                    vec![
                        EventParam::indexed("nameHash", Bytes32),
                        EventParam::data("wrapState", Uint),
                        EventParam::data("token", Address),
                    ],
                ),
            ],
        )
    }

    /// Signatures in this set whose event id is `topic0`.
    pub fn candidates<'a>(&'a self, topic0: &'a str) -> impl Iterator<Item = &'a EventSignature> {
        self.signatures
            .iter()
            .filter(move |s| s.topic0().eq_ignore_ascii_case(topic0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn canonical_forms() {
        let reg = SignatureSet::registry();
        let names: Vec<String> = reg.signatures.iter().map(|s| s.canonical()).collect();
        assert_eq!(
            names,
            vec![
                "NameRegistered(bytes32,address,string,uint256,address)",
                "NameRenewed(bytes32,uint256)",
                "OwnerChanged(bytes32,address)",
                "ResolverChanged(bytes32,address)",
            ]
        );
        let text = &SignatureSet::resolver().signatures[1];
        assert_eq!(text.canonical(), "TextChanged(bytes32,string,string,string)");
        assert_eq!(text.indexed_count(), 2);
        let deleted = &SignatureSet::resolver().signatures[3];
        assert_eq!(deleted.canonical(), "RecordDeleted(bytes32,string,string)");
        let wrap = &SignatureSet::nft().signatures[1];
        assert_eq!(wrap.canonical(), "WrapStateChanged(bytes32,uint256,address)");
    }

    #[test]
    fn erc721_transfer_event_id() {
        let transfer = &SignatureSet::nft().signatures[0];
        assert_eq!(
            transfer.topic0(),
            "0xddf252ad1be2c89b69c2b068fc378daa952ba7f163c4a11628f55a4df523b3ef"
        );
        assert_eq!(transfer.indexed_count(), 3);
    }

    #[test]
    fn event_ids_are_distinct_across_sets() {
        let mut ids: Vec<String> = ContractRole::PRIORITY
            .iter()
            .flat_map(|r| SignatureSet::builtin(*r).signatures)
            .map(|s| s.topic0().to_string())
            .collect();
        let total = ids.len();
        ids.sort();
        ids.dedup();
        assert_eq!(ids.len(), total);
        assert!(ids.iter().all(|id| id.len() == 66 && id.starts_with("0x")));
    }

    #[test]
    fn candidates_match_case_insensitively() {
        let set = SignatureSet::nft();
        let upper = set.signatures[0].topic0().to_uppercase().replacen("0X", "0x", 1);
        assert_eq!(set.candidates(&upper).count(), 1);
        assert_eq!(set.candidates("0x00").count(), 0);
    }
}
