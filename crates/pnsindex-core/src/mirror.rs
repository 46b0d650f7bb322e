//! Mirror records and their merge rules.
//!
//! Each mirrored field carries the chain [`Position`] of the write that set it.
//! An update only replaces a field when its position is strictly greater, so
//! replaying a batch is a no-op and applying the same set of updates in any
//! order converges to the same record.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::types::{DomainEffect, NormalizedEvent, Position, WrapState};

// ─── Versioned ───────────────────────────────────────────────────────────────

/// A value together with the position of the write that produced it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Versioned<T> {
    pub value: T,
    pub at: Position,
}

impl<T> Versioned<T> {
    pub fn new(value: T, at: Position) -> Self {
        Self { value, at }
    }
}

/// Writes `value` into `slot` if `at` is newer than the current version.
fn merge_field<T>(slot: &mut Option<Versioned<T>>, value: Option<&T>, at: Position) -> bool
where
    T: Clone,
{
    let Some(value) = value else {
        return false;
    };
    match slot {
        Some(current) if current.at >= at => false,
        _ => {
            *slot = Some(Versioned::new(value.clone(), at));
            true
        }
    }
}

// ─── WrapInfo ────────────────────────────────────────────────────────────────

/// Wrap state of a domain's NFT and the token contract it points at.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WrapInfo {
    pub state: WrapState,
    pub token: Option<String>,
}

// ─── DomainRecord ────────────────────────────────────────────────────────────

/// The off-chain view of one domain, keyed by name-hash.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DomainRecord {
    pub name_hash: String,
    /// Plain label, known once the registration event has been seen.
    pub name: Option<Versioned<String>>,
    pub owner: Option<Versioned<String>>,
    pub resolver: Option<Versioned<String>>,
    /// Unix seconds.
    pub expiration: Option<Versioned<u64>>,
    /// Resolver records (`addr`, `contenthash`, text keys). A `None` value is
    /// a deletion and stays versioned so older writes cannot resurrect it.
    pub records: BTreeMap<String, Versioned<Option<String>>>,
    pub wrap: Option<Versioned<WrapInfo>>,
    /// Position of the newest write applied to any field.
    pub last_updated: Position,
    /// Transaction of that write. `None` when it came from a direct state read.
    pub last_tx: Option<String>,
}

impl DomainRecord {
    pub fn new(name_hash: impl Into<String>) -> Self {
        Self {
            name_hash: name_hash.into(),
            name: None,
            owner: None,
            resolver: None,
            expiration: None,
            records: BTreeMap::new(),
            wrap: None,
            last_updated: Position::new(0, 0),
            last_tx: None,
        }
    }

    pub fn owner(&self) -> Option<&str> {
        self.owner.as_ref().map(|v| v.value.as_str())
    }

    pub fn resolver(&self) -> Option<&str> {
        self.resolver.as_ref().map(|v| v.value.as_str())
    }

    pub fn expiration(&self) -> Option<u64> {
        self.expiration.as_ref().map(|v| v.value)
    }

    /// Live value of a resolver record. Deleted keys read as absent.
    pub fn record(&self, key: &str) -> Option<&str> {
        self.records.get(key).and_then(|v| v.value.as_deref())
    }

    /// Resolver records that are currently set.
    pub fn live_records(&self) -> impl Iterator<Item = (&str, &str)> {
        self.records
            .iter()
            .filter_map(|(k, v)| v.value.as_deref().map(|value| (k.as_str(), value)))
    }

    pub fn wrap_state(&self) -> WrapState {
        self.wrap.as_ref().map_or(WrapState::None, |v| v.value.state)
    }

    /// Merges `update` into this record. Returns `true` if any field changed.
    pub fn apply(&mut self, update: &DomainUpdate) -> bool {
        let at = update.at;
        let mut changed = false;
        changed |= merge_field(&mut self.name, update.name.as_ref(), at);
        changed |= merge_field(&mut self.owner, update.owner.as_ref(), at);
        changed |= merge_field(&mut self.resolver, update.resolver.as_ref(), at);
        changed |= merge_field(&mut self.expiration, update.expiration.as_ref(), at);
        changed |= merge_field(&mut self.wrap, update.wrap.as_ref(), at);

        if let Some((key, value)) = &update.record {
            let mut slot = self.records.remove(key);
            changed |= merge_field(&mut slot, Some(value), at);
            if let Some(slot) = slot {
                self.records.insert(key.clone(), slot);
            }
        }

        if changed && at > self.last_updated {
            self.last_updated = at;
            self.last_tx = update.transaction_hash.clone();
        }
        changed
    }
}

// ─── DomainUpdate ────────────────────────────────────────────────────────────

/// A set of field writes for one domain, all at the same position.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DomainUpdate {
    pub name_hash: String,
    pub at: Position,
    pub transaction_hash: Option<String>,
    pub name: Option<String>,
    pub owner: Option<String>,
    pub resolver: Option<String>,
    pub expiration: Option<u64>,
    /// `(key, value)` of a resolver record; a `None` value deletes it.
    pub record: Option<(String, Option<String>)>,
    pub wrap: Option<WrapInfo>,
}

impl DomainUpdate {
    /// An empty update for `name_hash` at `at`.
    pub fn new(name_hash: impl Into<String>, at: Position) -> Self {
        Self {
            name_hash: name_hash.into(),
            at,
            transaction_hash: None,
            name: None,
            owner: None,
            resolver: None,
            expiration: None,
            record: None,
            wrap: None,
        }
    }

    /// Derives the update an event implies, or `None` for events that do not
    /// touch the mirror.
    pub fn from_event(event: &NormalizedEvent) -> Option<Self> {
        let effect = event.effect.as_ref()?;
        let mut update = Self::new(event.name_hash.clone(), event.position());
        update.transaction_hash = Some(event.transaction_hash.clone());
        match effect {
            DomainEffect::Registered {
                owner,
                expiration,
                resolver,
                name,
            } => {
                update.owner = Some(owner.clone());
                update.expiration = Some(*expiration);
                update.resolver = Some(resolver.clone());
                update.name = Some(name.clone());
            }
            DomainEffect::Renewed { expiration } => update.expiration = Some(*expiration),
            DomainEffect::OwnerChanged { owner } => update.owner = Some(owner.clone()),
            DomainEffect::ResolverChanged { resolver } => update.resolver = Some(resolver.clone()),
            DomainEffect::RecordChanged { key, value } => {
                update.record = Some((key.clone(), Some(value.clone())));
            }
            DomainEffect::RecordDeleted { key } => update.record = Some((key.clone(), None)),
            DomainEffect::WrapStateChanged { wrap_state, token } => {
                update.wrap = Some(WrapInfo {
                    state: *wrap_state,
                    token: token.clone(),
                });
            }
        }
        Some(update)
    }

    /// Returns `true` if the update carries no field writes.
    pub fn is_empty(&self) -> bool {
        self.name.is_none()
            && self.owner.is_none()
            && self.resolver.is_none()
            && self.expiration.is_none()
            && self.record.is_none()
            && self.wrap.is_none()
    }
}

// ─── Tests ────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ContractRole;

    const NODE: &str = "0x1111111111111111111111111111111111111111111111111111111111111111";

    fn event(block: u64, idx: u32, effect: DomainEffect) -> NormalizedEvent {
        NormalizedEvent {
            event_name: "Test".into(),
            role: ContractRole::Registry,
            address: "0xreg".into(),
            block_number: block,
            transaction_hash: format!("0xtx{block}{idx}"),
            log_index: idx,
            block_timestamp: None,
            params: BTreeMap::new(),
            name_hash: NODE.into(),
            effect: Some(effect),
        }
    }

    fn fold(events: &[NormalizedEvent]) -> DomainRecord {
        let mut record = DomainRecord::new(NODE);
        for e in events {
            if let Some(u) = DomainUpdate::from_event(e) {
                record.apply(&u);
            }
        }
        record
    }

    fn history() -> Vec<NormalizedEvent> {
        vec![
            event(
                100,
                0,
                DomainEffect::Registered {
                    owner: "0xaaaa".into(),
                    expiration: 1_000,
                    resolver: "0xres1".into(),
                    name: "alice".into(),
                },
            ),
            event(120, 2, DomainEffect::OwnerChanged { owner: "0xbbbb".into() }),
            event(120, 1, DomainEffect::OwnerChanged { owner: "0xcccc".into() }),
            event(130, 0, DomainEffect::Renewed { expiration: 2_000 }),
            event(
                140,
                4,
                DomainEffect::RecordChanged {
                    key: "url".into(),
                    value: "https://alice.example".into(),
                },
            ),
        ]
    }

    #[test]
    fn replay_is_idempotent() {
        let events = history();
        let once = fold(&events);
        let mut twice = once.clone();
        for e in &events {
            let u = DomainUpdate::from_event(e).unwrap();
            assert!(!twice.apply(&u), "replay of {} changed state", e.position());
        }
        assert_eq!(once, twice);
    }

    #[test]
    fn application_order_does_not_matter() {
        let events = history();
        let forward = fold(&events);
        let mut reversed = events.clone();
        reversed.reverse();
        assert_eq!(fold(&reversed), forward);

        let mut rotated = events;
        rotated.rotate_left(2);
        assert_eq!(fold(&rotated), forward);

        assert_eq!(forward.owner(), Some("0xbbbb"));
        assert_eq!(forward.expiration(), Some(2_000));
        assert_eq!(forward.record("url"), Some("https://alice.example"));
        assert_eq!(forward.last_updated, Position::new(140, 4));
    }

    #[test]
    fn older_write_never_overwrites_newer() {
        let mut record = DomainRecord::new(NODE);
        let mut newer = DomainUpdate::new(NODE, Position::new(50, 0));
        newer.owner = Some("0xnew".into());
        let mut older = DomainUpdate::new(NODE, Position::new(49, 7));
        older.owner = Some("0xold".into());
        older.resolver = Some("0xres".into());

        assert!(record.apply(&newer));
        assert!(record.apply(&older));
        assert_eq!(record.owner(), Some("0xnew"));
        assert_eq!(record.resolver(), Some("0xres"));
        assert_eq!(record.last_updated, Position::new(50, 0));
    }

    fn url(block: u64, idx: u32, value: Option<&str>) -> NormalizedEvent {
        let effect = match value {
            Some(v) => DomainEffect::RecordChanged {
                key: "url".into(),
                value: v.into(),
            },
            None => DomainEffect::RecordDeleted { key: "url".into() },
        };
        event(block, idx, effect)
    }

    #[test]
    fn deletion_is_not_undone_by_a_stale_upsert() {
        let events = vec![
            url(10, 0, Some("https://a")),
            url(12, 0, None),
            url(11, 0, Some("https://stale")),
        ];
        let record = fold(&events);
        assert_eq!(record.record("url"), None);
        assert_eq!(record.records["url"].value, None);
        assert_eq!(record.records["url"].at, Position::new(12, 0));
        assert_eq!(record.live_records().count(), 0);

        let mut reversed = events;
        reversed.reverse();
        assert_eq!(fold(&reversed), record);
    }

    #[test]
    fn stale_deletion_does_not_remove_a_newer_value() {
        let record = fold(&[url(12, 0, Some("https://new")), url(11, 3, None)]);
        assert_eq!(record.record("url"), Some("https://new"));
        assert_eq!(
            record.live_records().collect::<Vec<_>>(),
            vec![("url", "https://new")]
        );
    }

    #[test]
    fn deletion_replay_is_idempotent() {
        let mut record = fold(&[url(10, 0, Some("https://a")), url(11, 0, None)]);
        let delete = DomainUpdate::from_event(&url(11, 0, None)).unwrap();
        assert!(!record.apply(&delete));
        assert_eq!(record.record("url"), None);
    }

    #[test]
    fn wrap_state_follows_newest_write() {
        let wrapped = event(
            20,
            0,
            DomainEffect::WrapStateChanged {
                wrap_state: WrapState::Polygon,
                token: Some("0xnft".into()),
            },
        );
        let unwrapped = event(
            21,
            0,
            DomainEffect::WrapStateChanged {
                wrap_state: WrapState::None,
                token: None,
            },
        );
        assert_eq!(DomainRecord::new(NODE).wrap_state(), WrapState::None);
        let record = fold(&[unwrapped.clone(), wrapped.clone()]);
        assert_eq!(record.wrap_state(), WrapState::None);
        assert_eq!(fold(&[wrapped.clone()]).wrap_state(), WrapState::Polygon);
        assert_eq!(
            fold(&[wrapped]).wrap.unwrap().value.token.as_deref(),
            Some("0xnft")
        );
    }

    #[test]
    fn repair_position_wins_within_its_block() {
        let mut record = fold(&history());
        let mut repair = DomainUpdate::new(NODE, Position::end_of_block(130));
        repair.owner = Some("0xdddd".into());
        assert!(record.apply(&repair));
        assert_eq!(record.owner(), Some("0xdddd"));
        assert_eq!(record.last_updated, Position::new(140, 4));
    }
}
