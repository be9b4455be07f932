use std::collections::BTreeSet;
use std::sync::Arc;

use serde_json::Value;
use tracing::debug;
use tracing::trace;

use super::actions::LifecycleAction;
use super::actions::StorageAction;
use super::actions::StoreAction;
use super::actions::ValueTransform;
use super::state::Entries;
use super::state::StorageKey;
use super::state::StorageState;
use super::state::StoredRecord;
use super::state::Timestamp;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageEffect {
    /// The entry map changed and should be written back to persistent storage.
    PersistEntries,
    /// The store just became initialized.
    Initialized,
}

/// Result of [`apply`]: the next state plus what changed on the way there.
#[derive(Debug, Clone)]
pub struct Transition {
    pub state: StorageState,
    pub entries_changed: bool,
    pub initialized_changed: bool,
}

impl Transition {
    pub fn changed(&self) -> bool {
        self.entries_changed || self.initialized_changed
    }
}

/// Pure form of [`reduce`]. `state` is left untouched; unchanged entries are
/// shared with the returned state.
pub fn apply(state: &StorageState, action: StoreAction) -> Transition {
    let mut next = state.clone();
    let effects = reduce(&mut next, action);
    Transition {
        state: next,
        entries_changed: effects.contains(&StorageEffect::PersistEntries),
        initialized_changed: effects.contains(&StorageEffect::Initialized),
    }
}

pub fn reduce(state: &mut StorageState, action: StoreAction) -> Vec<StorageEffect> {
    match action {
        StoreAction::Storage(storage) => {
            if reduce_storage(&mut state.entries, storage) {
                vec![StorageEffect::PersistEntries]
            } else {
                Vec::new()
            }
        }
        StoreAction::Lifecycle(lifecycle) => {
            if reduce_lifecycle(&mut state.initialized, lifecycle) {
                vec![StorageEffect::Initialized]
            } else {
                Vec::new()
            }
        }
        StoreAction::Unrecognized { kind } => {
            trace!(kind = kind.as_str(), "ignoring unrecognized action");
            Vec::new()
        }
    }
}

fn reduce_storage(entries: &mut Arc<Entries>, action: StorageAction) -> bool {
    match action {
        StorageAction::SetItem {
            prefix,
            name,
            value,
            timestamp,
        } => set_if_newer(entries, StorageKey::scoped(prefix, name), value, timestamp),
        StorageAction::RemoveItem { prefix, name } => {
            remove(entries, &StorageKey::scoped(prefix, name))
        }
        StorageAction::SetGlobalItem {
            name,
            value,
            timestamp,
        } => set_if_newer(entries, StorageKey::global(name), value, timestamp),
        StorageAction::RemoveGlobalItem { name } => remove(entries, &StorageKey::global(name)),
        StorageAction::Clear { exclude } => clear(entries, &exclude),
        StorageAction::ActionOnGlobalItemsWithPrefix { prefix, transform } => {
            rewrite_with_prefix(entries, &prefix, &transform, Timestamp::now())
        }
        StorageAction::Rehydrate { snapshot } => rehydrate(entries, snapshot),
    }
}

fn reduce_lifecycle(initialized: &mut bool, action: LifecycleAction) -> bool {
    match action {
        LifecycleAction::RehydrationComplete { complete } => {
            let next = *initialized || complete;
            let changed = next != *initialized;
            *initialized = next;
            changed
        }
    }
}

fn set_if_newer(
    entries: &mut Arc<Entries>,
    key: StorageKey,
    value: Value,
    timestamp: Timestamp,
) -> bool {
    if let Some(current) = entries.get(&key) {
        if !current.accepts_write(timestamp) {
            debug!(
                key = %key,
                incoming = timestamp.as_millis(),
                stored = current.timestamp.map(Timestamp::as_millis),
                "dropping stale write"
            );
            return false;
        }
    }
    Arc::make_mut(entries).insert(key, Arc::new(StoredRecord::new(timestamp, value)));
    true
}

fn remove(entries: &mut Arc<Entries>, key: &StorageKey) -> bool {
    if !entries.contains_key(key) {
        return false;
    }
    Arc::make_mut(entries).remove(key);
    true
}

fn clear(entries: &mut Arc<Entries>, exclude: &BTreeSet<StorageKey>) -> bool {
    let kept: Entries = entries
        .iter()
        .filter(|(key, _)| exclude.contains(*key))
        .map(|(key, record)| (key.clone(), Arc::clone(record)))
        .collect();
    if kept.len() == entries.len() {
        return false;
    }
    debug!(
        dropped = entries.len() - kept.len(),
        kept = kept.len(),
        "cleared storage"
    );
    *entries = Arc::new(kept);
    true
}

fn rewrite_with_prefix(
    entries: &mut Arc<Entries>,
    prefix: &str,
    transform: &ValueTransform,
    now: Timestamp,
) -> bool {
    let updates: Vec<(StorageKey, Value)> = entries
        .iter()
        .filter(|(key, _)| key.starts_with(prefix))
        .filter_map(|(key, record)| {
            let next = transform.call(key, &record.value);
            (next != record.value).then(|| (key.clone(), next))
        })
        .collect();
    if updates.is_empty() {
        return false;
    }
    debug!(prefix, rewritten = updates.len(), "rewrote entries with prefix");
    let entries = Arc::make_mut(entries);
    for (key, value) in updates {
        entries.insert(key, Arc::new(StoredRecord::new(now, value)));
    }
    true
}

fn rehydrate(entries: &mut Arc<Entries>, snapshot: Vec<(StorageKey, StoredRecord)>) -> bool {
    let mut changed = false;
    for (key, record) in snapshot {
        let differs = entries
            .get(&key)
            .map_or(true, |current| current.as_ref() != &record);
        if differs {
            Arc::make_mut(entries).insert(key, Arc::new(record));
            changed = true;
        }
    }
    changed
}

#[cfg(test)]
mod tests;
