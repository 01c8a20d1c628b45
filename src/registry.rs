//! Watch registry: two disjoint indices of outstanding watches.
//!
//! spend_index:   OutPoint -> { Spent | SpentBasic }
//! confirm_index: Txid     -> { Confirmed }
//!
//! A key is present iff its set is non-empty.
use crate::watch::{ConfirmWatch, Watch, WatchKey};
use bitcoin::{OutPoint, Txid};
use std::collections::{HashMap, HashSet};
use std::hash::Hash;

/// One index: key -> set of structurally distinct watches.
pub type WatchIndex<K> = HashMap<K, HashSet<Watch>>;

/// Insert `watch` under `key`. Returns `false` if an equal watch was already there.
pub fn add_watch<K: Eq + Hash>(index: &mut WatchIndex<K>, key: K, watch: Watch) -> bool {
    index.entry(key).or_default().insert(watch)
}

/// Remove one entry equal to `watch` from `key`, dropping the key once its set is empty.
/// Returns `false` (and changes nothing) if no such watch exists.
pub fn remove_watch<K: Eq + Hash>(index: &mut WatchIndex<K>, key: &K, watch: &Watch) -> bool {
    let Some(set) = index.get_mut(key) else {
        return false;
    };
    let removed = set.remove(watch);
    if set.is_empty() {
        index.remove(key);
    }
    removed
}

/// All outstanding watches, owned by the engine.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct WatchRegistry {
    spend_index: WatchIndex<OutPoint>,
    confirm_index: WatchIndex<Txid>,
}

impl WatchRegistry {
    /// Empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// File `watch` in the index matching its variant. Idempotent.
    pub fn add(&mut self, watch: Watch) -> bool {
        match watch.key() {
            WatchKey::Outpoint(op) => add_watch(&mut self.spend_index, op, watch),
            WatchKey::Txid(txid) => add_watch(&mut self.confirm_index, txid, watch),
        }
    }

    /// Remove one structurally-equal watch. Unknown watches are a no-op.
    pub fn remove(&mut self, watch: &Watch) -> bool {
        match watch.key() {
            WatchKey::Outpoint(op) => remove_watch(&mut self.spend_index, &op, watch),
            WatchKey::Txid(txid) => remove_watch(&mut self.confirm_index, &txid, watch),
        }
    }

    /// Whether an equal watch is registered.
    pub fn contains(&self, watch: &Watch) -> bool {
        match watch.key() {
            WatchKey::Outpoint(op) => self.spend_index.get(&op).is_some_and(|s| s.contains(watch)),
            WatchKey::Txid(txid) => self
                .confirm_index
                .get(&txid)
                .is_some_and(|s| s.contains(watch)),
        }
    }

    /// Spend watches on `outpoint`, if any.
    pub fn spend_watches(&self, outpoint: &OutPoint) -> Option<&HashSet<Watch>> {
        self.spend_index.get(outpoint)
    }

    /// Txids that have at least one pending confirmation watch.
    pub fn confirm_txids(&self) -> Vec<Txid> {
        self.confirm_index.keys().copied().collect()
    }

    /// Confirmation watches on `txid` whose required depth is met by `depth`.
    /// Nothing is removed; see [`WatchRegistry::remove`].
    pub fn satisfied(&self, txid: &Txid, depth: u32) -> Vec<ConfirmWatch> {
        let Some(set) = self.confirm_index.get(txid) else {
            return Vec::new();
        };
        set.iter()
            .filter_map(|w| match w {
                Watch::Confirmed(cw) if cw.min_depth <= depth => Some(cw.clone()),
                Watch::Confirmed(_) | Watch::Spent(_) | Watch::SpentBasic(_) => None,
            })
            .collect()
    }

    /// Read-only view of the spend index.
    pub fn spend_index(&self) -> &WatchIndex<OutPoint> {
        &self.spend_index
    }

    /// Read-only view of the confirmation index.
    pub fn confirm_index(&self) -> &WatchIndex<Txid> {
        &self.confirm_index
    }

    /// Number of spend watches across all outpoints.
    pub fn spend_watch_count(&self) -> usize {
        self.spend_index.values().map(HashSet::len).sum()
    }

    /// Number of pending confirmation watches.
    pub fn confirm_watch_count(&self) -> usize {
        self.confirm_index.values().map(HashSet::len).sum()
    }

    /// True when neither index holds anything.
    pub fn is_empty(&self) -> bool {
        self.spend_index.is_empty() && self.confirm_index.is_empty()
    }
}
