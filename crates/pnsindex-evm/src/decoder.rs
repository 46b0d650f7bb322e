//! `EventDecoder` matches raw logs against the registry, resolver and NFT
//! signature sets and produces [`NormalizedEvent`]s.
//!
//! Matching is structural: topic 0 must equal the event id, the topic count
//! must equal `1 + indexed params`, and the data payload must be exactly the
//! ABI encoding of the non-indexed params. A log that fails any check for
//! one set is tried against the next; a log that matches nothing is
//! [`DecodeResult::Unmatched`] and never an error.

use std::collections::{BTreeMap, HashMap};

use alloy_core::dyn_abi::{DynSolType, DynSolValue};

use pnsindex_core::config::IndexerConfig;
use pnsindex_core::namehash::normalize_hash;
use pnsindex_core::types::{
    ContractRole, DomainEffect, EventValue, NormalizedEvent, RawLogEntry, WrapState,
};

use crate::normalizer;
use crate::signature::{EventParam, EventSignature, SignatureSet};

/// Outcome of decoding one log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DecodeResult {
    Matched(NormalizedEvent),
    Unmatched,
}

impl DecodeResult {
    pub fn into_event(self) -> Option<NormalizedEvent> {
        match self {
            Self::Matched(e) => Some(e),
            Self::Unmatched => None,
        }
    }
}

/// Stateless multi-schema decoder.
#[derive(Debug, Clone)]
pub struct EventDecoder {
    sets: Vec<SignatureSet>,
    roles_by_address: HashMap<String, ContractRole>,
}

impl Default for EventDecoder {
    fn default() -> Self {
        Self::builtin()
    }
}

impl EventDecoder {
    pub fn new(sets: Vec<SignatureSet>) -> Self {
        Self {
            sets,
            roles_by_address: HashMap::new(),
        }
    }

    /// Decoder over the registry, resolver and NFT sets, in that priority.
    pub fn builtin() -> Self {
        Self::new(
            ContractRole::PRIORITY
                .iter()
                .map(|r| SignatureSet::builtin(*r))
                .collect(),
        )
    }

    /// Built-in sets plus the contract address hints from `config`.
    pub fn from_config(config: &IndexerConfig) -> Self {
        config
            .contracts()
            .into_iter()
            .fold(Self::builtin(), |d, (role, addr)| d.with_contract(role, &addr))
    }

    /// Declares that logs from `address` should be tried against `role` first.
    pub fn with_contract(mut self, role: ContractRole, address: &str) -> Self {
        self.roles_by_address.insert(address.to_lowercase(), role);
        self
    }

    pub fn role_of(&self, address: &str) -> Option<ContractRole> {
        self.roles_by_address.get(&address.to_lowercase()).copied()
    }

    /// Every event id the decoder understands, for use as a topic-0 filter.
    pub fn topic0_values(&self) -> Vec<String> {
        let mut ids: Vec<String> = self
            .sets
            .iter()
            .flat_map(|s| s.signatures.iter().map(|sig| sig.topic0().to_string()))
            .collect();
        ids.sort();
        ids.dedup();
        ids
    }

    /// Sets to try for a log from `address`: the hinted role first, then the
    /// rest in priority order.
    fn candidate_sets(&self, address: &str) -> Vec<&SignatureSet> {
        let hint = self.role_of(address);
        let mut out: Vec<&SignatureSet> = Vec::with_capacity(self.sets.len());
        if let Some(role) = hint {
            out.extend(self.sets.iter().filter(|s| s.role == role));
        }
        out.extend(self.sets.iter().filter(|s| Some(s.role) != hint));
        out
    }

    /// Decode `raw`. Never panics and never errors on malformed input.
    pub fn decode(&self, raw: &RawLogEntry) -> DecodeResult {
        if raw.removed {
            tracing::debug!(tx = %raw.transaction_hash, log_index = raw.log_index, "skipping removed log");
            return DecodeResult::Unmatched;
        }
        let Some(topic0) = raw.topic0() else {
            return DecodeResult::Unmatched;
        };

        for set in self.candidate_sets(&raw.address) {
            for sig in set.candidates(topic0) {
                match decode_with(sig, set.role, raw) {
                    Ok(event) => return DecodeResult::Matched(event),
                    Err(reason) => tracing::trace!(
                        event = %sig.name,
                        role = %set.role,
                        tx = %raw.transaction_hash,
                        %reason,
                        "candidate rejected"
                    ),
                }
            }
        }

        tracing::debug!(
            address = %raw.address,
            topic0,
            tx = %raw.transaction_hash,
            log_index = raw.log_index,
            "no signature matched log"
        );
        DecodeResult::Unmatched
    }

    /// `decode` as an `Option`.
    pub fn parse_event(&self, raw: &RawLogEntry) -> Option<NormalizedEvent> {
        self.decode(raw).into_event()
    }
}

fn decode_with(
    sig: &EventSignature,
    role: ContractRole,
    raw: &RawLogEntry,
) -> Result<NormalizedEvent, String> {
    if raw.topics.len() != 1 + sig.indexed_count() {
        return Err(format!(
            "expected {} topics, got {}",
            1 + sig.indexed_count(),
            raw.topics.len()
        ));
    }

    let mut params = BTreeMap::new();
    for (param, topic) in sig.indexed_params().zip(&raw.topics[1..]) {
        params.insert(param.name.clone(), normalizer::decode_topic(topic, param.kind)?);
    }

    let data_params: Vec<&EventParam> = sig.data_params().collect();
    for (param, value) in data_params.iter().zip(decode_data(&data_params, &raw.data)?) {
        params.insert(param.name.clone(), value);
    }

    let (name_hash, effect) = derive_effect(sig, raw, &params)?;

    Ok(NormalizedEvent {
        event_name: sig.name.clone(),
        role,
        address: raw.address.to_lowercase(),
        block_number: raw.block_number,
        transaction_hash: raw.transaction_hash.clone(),
        log_index: raw.log_index,
        block_timestamp: None,
        params,
        name_hash,
        effect,
    })
}

/// Decodes the data payload as the tuple of non-indexed params.
fn decode_data(params: &[&EventParam], data: &[u8]) -> Result<Vec<EventValue>, String> {
    if params.is_empty() {
        return if data.is_empty() {
            Ok(vec![])
        } else {
            Err(format!("expected empty data, got {} bytes", data.len()))
        };
    }
    if data.len() % 32 != 0 {
        return Err(format!("data length {} is not word aligned", data.len()));
    }

    let ty = DynSolType::Tuple(params.iter().map(|p| p.kind.sol_type()).collect());
    let decoded = ty.abi_decode_params(data).map_err(|e| e.to_string())?;
    let values = match decoded {
        DynSolValue::Tuple(vals) => vals,
        other => vec![other],
    };
    if values.len() != params.len() {
        return Err(format!("decoded {} values, expected {}", values.len(), params.len()));
    }

    let canonical_len = DynSolValue::Tuple(values.clone()).abi_encode_params().len();
    if canonical_len != data.len() {
        return Err(format!(
            "data is {} bytes, canonical encoding is {canonical_len}",
            data.len()
        ));
    }

    Ok(values.into_iter().map(normalizer::normalize).collect())
}

// ─── Effect derivation ───────────────────────────────────────────────────────

fn text<'a>(params: &'a BTreeMap<String, EventValue>, name: &str) -> Result<&'a str, String> {
    params
        .get(name)
        .and_then(EventValue::as_str)
        .ok_or_else(|| format!("missing param '{name}'"))
}

/// Expirations are unix seconds; values beyond `u64` saturate.
fn seconds(params: &BTreeMap<String, EventValue>, name: &str) -> Result<u64, String> {
    let raw = text(params, name)?;
    Ok(raw.parse::<u64>().unwrap_or(u64::MAX))
}

fn subject(params: &BTreeMap<String, EventValue>, name: &str) -> Result<String, String> {
    let raw = text(params, name)?;
    normalize_hash(raw).ok_or_else(|| format!("param '{name}' is not a 32-byte hash"))
}

const ZERO_ADDRESS: &str = "0x0000000000000000000000000000000000000000";

fn derive_effect(
    sig: &EventSignature,
    raw: &RawLogEntry,
    params: &BTreeMap<String, EventValue>,
) -> Result<(String, Option<DomainEffect>), String> {
    let derived = match sig.name.as_str() {
        "NameRegistered" => (
            subject(params, "nameHash")?,
            DomainEffect::Registered {
                owner: text(params, "owner")?.to_string(),
                expiration: seconds(params, "expires")?,
                resolver: text(params, "resolver")?.to_string(),
                name: text(params, "name")?.to_string(),
            },
        ),
        "NameRenewed" => (
            subject(params, "nameHash")?,
            DomainEffect::Renewed {
                expiration: seconds(params, "expires")?,
            },
        ),
        "OwnerChanged" => (
            subject(params, "nameHash")?,
            DomainEffect::OwnerChanged {
                owner: text(params, "owner")?.to_string(),
            },
        ),
        "ResolverChanged" => (
            subject(params, "nameHash")?,
            DomainEffect::ResolverChanged {
                resolver: text(params, "resolver")?.to_string(),
            },
        ),
        "AddrChanged" => (
            subject(params, "node")?,
            DomainEffect::RecordChanged {
                key: "addr".into(),
                value: text(params, "addr")?.to_string(),
            },
        ),
        // The indexed key is only a hash; the plain key comes from data.
        "TextChanged" => (
            subject(params, "node")?,
            DomainEffect::RecordChanged {
                key: text(params, "key")?.to_string(),
                value: text(params, "value")?.to_string(),
            },
        ),
        "ContenthashChanged" => (
            subject(params, "node")?,
            DomainEffect::RecordChanged {
                key: "contenthash".into(),
                value: text(params, "hash")?.to_string(),
            },
        ),
        "RecordDeleted" => (
            subject(params, "node")?,
            DomainEffect::RecordDeleted {
                key: text(params, "key")?.to_string(),
            },
        ),
        "WrapStateChanged" => {
            let code = seconds(params, "wrapState")?;
            let wrap_state =
                WrapState::from_code(code).ok_or_else(|| format!("unknown wrap state {code}"))?;
            let token = text(params, "token")?;
            (
                subject(params, "nameHash")?,
                DomainEffect::WrapStateChanged {
                    wrap_state,
                    token: (token != ZERO_ADDRESS).then(|| token.to_string()),
                },
            )
        }
        // Token ids are name-hashes; the raw topic already has the 32-byte form.
        "Transfer" => {
            let token_topic = raw.topics.get(3).ok_or("missing tokenId topic")?;
            let name_hash =
                normalize_hash(token_topic).ok_or("tokenId topic is not a 32-byte hash")?;
            (
                name_hash,
                DomainEffect::OwnerChanged {
                    owner: text(params, "to")?.to_string(),
                },
            )
        }
        _ => {
            let name_hash = subject(params, "node").or_else(|_| subject(params, "nameHash"))?;
            return Ok((name_hash, None));
        }
    };
    Ok((derived.0, Some(derived.1)))
}

// ─── Tests ────────────────────────────────────────────────────────────────────
