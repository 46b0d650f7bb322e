//! Shared types for the ingestion pipeline.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

// ─── Position ────────────────────────────────────────────────────────────────

/// A point in chain order: block number first, log index second.
///
/// Every mirror field is versioned by the position of the log that last
/// wrote it, which is what makes merges idempotent and order-independent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Position {
    pub block_number: u64,
    pub log_index: u32,
}

impl Position {
    pub fn new(block_number: u64, log_index: u32) -> Self {
        Self {
            block_number,
            log_index,
        }
    }

    /// The position used for writes derived from direct state reads at
    /// `block_number`. It sorts after every log in that block.
    pub fn end_of_block(block_number: u64) -> Self {
        Self {
            block_number,
            log_index: u32::MAX,
        }
    }
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.block_number, self.log_index)
    }
}

// ─── RawLogEntry ─────────────────────────────────────────────────────────────

/// A log exactly as returned by the chain, before decoding.
///
/// Uniquely identified by `(transaction_hash, log_index)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawLogEntry {
    /// Emitting contract (`0x…`, lowercase).
    pub address: String,
    /// Topic hashes (`0x…`), topic 0 first.
    pub topics: Vec<String>,
    /// ABI-encoded payload of the non-indexed parameters.
    pub data: Vec<u8>,
    pub block_number: u64,
    pub block_hash: Option<String>,
    pub transaction_hash: String,
    pub log_index: u32,
    /// Set by the node when the log belonged to a block that was re-orged out.
    #[serde(default)]
    pub removed: bool,
}

impl RawLogEntry {
    pub fn topic0(&self) -> Option<&str> {
        self.topics.first().map(String::as_str)
    }

    pub fn position(&self) -> Position {
        Position::new(self.block_number, self.log_index)
    }
}

// ─── LogFilter ───────────────────────────────────────────────────────────────

/// Which logs to pull from the chain.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LogFilter {
    /// Only fetch logs from these contract addresses (empty = all addresses).
    pub addresses: Vec<String>,
    /// Only fetch logs with one of these topic[0] values (empty = all events).
    pub topic0_values: Vec<String>,
}

impl LogFilter {
    /// Create a filter for a single contract address.
    pub fn address(addr: impl Into<String>) -> Self {
        Self {
            addresses: vec![addr.into()],
            ..Default::default()
        }
    }

    /// Add a contract address.
    pub fn with_address(mut self, addr: impl Into<String>) -> Self {
        self.addresses.push(addr.into());
        self
    }

    /// Add a topic0 filter (event signature hash).
    pub fn topic0(mut self, topic: impl Into<String>) -> Self {
        self.topic0_values.push(topic.into());
        self
    }
}

// ─── ContractRole ────────────────────────────────────────────────────────────

/// The role a contract plays in the naming system. Each role owns one
/// signature set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContractRole {
    Registry,
    Resolver,
    Nft,
}

impl ContractRole {
    /// Fallback decode order when the emitting address gives no hint.
    pub const PRIORITY: [ContractRole; 3] = [Self::Registry, Self::Resolver, Self::Nft];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Registry => "registry",
            Self::Resolver => "resolver",
            Self::Nft => "nft",
        }
    }
}

impl fmt::Display for ContractRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ContractRole {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "registry" => Ok(Self::Registry),
            "resolver" => Ok(Self::Resolver),
            "nft" => Ok(Self::Nft),
            other => Err(format!("unknown contract role '{other}'")),
        }
    }
}

// ─── EventValue ──────────────────────────────────────────────────────────────

/// A decoded event parameter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "lowercase")]
pub enum EventValue {
    /// `0x…` lowercase, 20 bytes.
    Address(String),
    /// `0x…` lowercase, 32 bytes.
    Bytes32(String),
    /// Unsigned integer rendered in decimal so 256-bit values survive JSON.
    Uint(String),
    Bool(bool),
    Str(String),
    /// Arbitrary bytes, `0x…` hex.
    Bytes(String),
    /// Hash of an indexed dynamic value. The preimage is not recoverable.
    TopicHash(String),
}

impl EventValue {
    /// Returns the textual payload of string-like variants.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Address(s)
            | Self::Bytes32(s)
            | Self::Uint(s)
            | Self::Str(s)
            | Self::Bytes(s)
            | Self::TopicHash(s) => Some(s),
            Self::Bool(_) => None,
        }
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Address(_) => "address",
            Self::Bytes32(_) => "bytes32",
            Self::Uint(_) => "uint",
            Self::Bool(_) => "bool",
            Self::Str(_) => "str",
            Self::Bytes(_) => "bytes",
            Self::TopicHash(_) => "topichash",
        }
    }
}

// ─── WrapState ───────────────────────────────────────────────────────────────

/// Where a domain's NFT currently lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WrapState {
    None,
    Polygon,
    Solana,
}

impl WrapState {
    /// Maps the on-chain enum code.
    pub fn from_code(code: u64) -> Option<Self> {
        match code {
            0 => Some(Self::None),
            1 => Some(Self::Polygon),
            2 => Some(Self::Solana),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Polygon => "polygon",
            Self::Solana => "solana",
        }
    }
}

impl fmt::Display for WrapState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for WrapState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "none" => Ok(Self::None),
            "polygon" => Ok(Self::Polygon),
            "solana" => Ok(Self::Solana),
            other => Err(format!("unknown wrap state '{other}'")),
        }
    }
}

// ─── DomainEffect ────────────────────────────────────────────────────────────

/// What an event means for the mirrored domain it names.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DomainEffect {
    Registered {
        owner: String,
        expiration: u64,
        resolver: String,
        name: String,
    },
    Renewed {
        expiration: u64,
    },
    OwnerChanged {
        owner: String,
    },
    ResolverChanged {
        resolver: String,
    },
    RecordChanged {
        key: String,
        value: String,
    },
    RecordDeleted {
        key: String,
    },
    /// `token` is the NFT contract the domain is wrapped into, if any.
    WrapStateChanged {
        wrap_state: WrapState,
        token: Option<String>,
    },
}

// ─── NormalizedEvent ─────────────────────────────────────────────────────────

/// A decoded log with its derived effect on the mirror.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NormalizedEvent {
    pub event_name: String,
    pub role: ContractRole,
    /// Emitting contract (`0x…`, lowercase).
    pub address: String,
    pub block_number: u64,
    pub transaction_hash: String,
    pub log_index: u32,
    /// Unix seconds. Filled in after decoding; `None` if the lookup failed.
    pub block_timestamp: Option<i64>,
    pub params: BTreeMap<String, EventValue>,
    /// The domain this event is about (`0x…`, 32 bytes, lowercase).
    pub name_hash: String,
    pub effect: Option<DomainEffect>,
}

impl NormalizedEvent {
    pub fn position(&self) -> Position {
        Position::new(self.block_number, self.log_index)
    }

    pub fn param(&self, name: &str) -> Option<&EventValue> {
        self.params.get(name)
    }

    /// The owner this event sets, if any.
    pub fn owner(&self) -> Option<&str> {
        match &self.effect {
            Some(DomainEffect::Registered { owner, .. })
            | Some(DomainEffect::OwnerChanged { owner }) => Some(owner),
            _ => None,
        }
    }

    /// The expiration (unix seconds) this event sets, if any.
    pub fn expiration(&self) -> Option<u64> {
        match &self.effect {
            Some(DomainEffect::Registered { expiration, .. })
            | Some(DomainEffect::Renewed { expiration }) => Some(*expiration),
            _ => None,
        }
    }

    /// The resolver this event sets, if any.
    pub fn resolver(&self) -> Option<&str> {
        match &self.effect {
            Some(DomainEffect::Registered { resolver, .. })
            | Some(DomainEffect::ResolverChanged { resolver }) => Some(resolver),
            _ => None,
        }
    }
}

// ─── Tests ────────────────────────────────────────────────────────────────────
