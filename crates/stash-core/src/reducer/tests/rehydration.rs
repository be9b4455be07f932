use super::*;
use pretty_assertions::assert_eq;
use serde_json::json;

#[test]
fn rehydrate_overwrites_regardless_of_timestamps() {
    let mut state = seeded(&[
        (StorageKey::global("a"), 1, json!(0)),
        (StorageKey::global("b"), 2, json!(9)),
    ]);
    run(
        &mut state,
        StoreAction::rehydrate([(StorageKey::global("a"), record(5, json!(1)))]),
    );

    assert_eq!(state.get(&StorageKey::global("a")), Some(&record(5, json!(1))));
    assert_eq!(state.get(&StorageKey::global("b")), Some(&record(2, json!(9))));
}

#[test]
fn rehydrate_wins_even_with_older_timestamp() {
    let mut state = seeded(&[(StorageKey::global("a"), 50, json!("live"))]);
    run(
        &mut state,
        StoreAction::rehydrate([(StorageKey::global("a"), record(1, json!("persisted")))]),
    );
    assert_eq!(global_value(&state, "a"), Some(&json!("persisted")));
}

#[test]
fn rehydrate_accepts_untimed_records() {
    let mut state = state();
    run(
        &mut state,
        StoreAction::rehydrate([(StorageKey::scoped("p_", "a"), StoredRecord::untimed(json!(1)))]),
    );
    run(&mut state, set_scoped("p_", "a", json!(2), 1));
    assert_eq!(scoped_value(&state, "p_", "a"), Some(&json!(2)));
}

#[test]
fn empty_snapshot_changes_nothing() {
    let mut state = seeded(&[(StorageKey::global("a"), 1, json!(1))]);
    let before = state.clone();
    let effects = run(&mut state, StoreAction::rehydrate([]));

    assert!(effects.is_empty());
    assert!(state.shares_entries_with(&before));
}

#[test]
fn identical_snapshot_reports_no_change() {
    let mut state = seeded(&[(StorageKey::global("a"), 1, json!(1))]);
    let effects = run(
        &mut state,
        StoreAction::rehydrate([(StorageKey::global("a"), record(1, json!(1)))]),
    );
    assert!(effects.is_empty());
}

#[test]
fn rehydrate_does_not_mark_initialized() {
    let mut state = state();
    run(
        &mut state,
        StoreAction::rehydrate([(StorageKey::global("a"), record(1, json!(1)))]),
    );
    assert!(!state.initialized());
}
