use pretty_assertions::assert_eq;
use serde_json::Value;

pub(super) use super::apply;
pub(super) use super::reduce;
pub(super) use super::StorageEffect;
pub(super) use crate::actions::StoreAction;
pub(super) use crate::actions::ValueTransform;
pub(super) use crate::state::StorageKey;
pub(super) use crate::state::StorageState;
pub(super) use crate::state::StoredRecord;
pub(super) use crate::state::Timestamp;

mod monotonic_writes;
mod rehydration;

fn state() -> StorageState {
    StorageState::default()
}

fn record(timestamp: i64, value: Value) -> StoredRecord {
    StoredRecord::new(Timestamp(timestamp), value)
}

fn seeded(records: &[(StorageKey, i64, Value)]) -> StorageState {
    StorageState::from_records(
        records
            .iter()
            .map(|(key, ts, value)| (key.clone(), record(*ts, value.clone()))),
    )
}

fn run(state: &mut StorageState, action: StoreAction) -> Vec<StorageEffect> {
    reduce(state, action)
}

fn set_scoped(prefix: &str, name: &str, value: Value, ts: i64) -> StoreAction {
    StoreAction::set_item(prefix, name, value, Timestamp(ts))
}

fn set_global(name: &str, value: Value, ts: i64) -> StoreAction {
    StoreAction::set_global_item(name, value, Timestamp(ts))
}

fn global_value<'a>(state: &'a StorageState, name: &str) -> Option<&'a Value> {
    state.value(&StorageKey::global(name))
}

fn scoped_value<'a>(state: &'a StorageState, prefix: &str, name: &str) -> Option<&'a Value> {
    state.value(&StorageKey::scoped(prefix, name))
}

fn flat_values(state: &StorageState) -> Vec<(String, Value)> {
    state
        .iter()
        .map(|(key, record)| (key.flat().into_owned(), record.value.clone()))
        .collect()
}

#[test]
fn default_state_is_empty_and_uninitialized() {
    let state = state();
    assert!(state.is_empty());
    assert!(!state.initialized());
    assert_eq!(flat_values(&state), Vec::<(String, Value)>::new());
    assert_eq!(global_value(&state, "missing"), None::<&Value>);
}
