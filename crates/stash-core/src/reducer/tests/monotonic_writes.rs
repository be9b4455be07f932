use super::*;
use pretty_assertions::assert_eq;
use serde_json::json;

#[test]
fn newer_timestamp_replaces_older_value() {
    let mut state = state();
    run(&mut state, set_global("theme", json!("light"), 10));
    run(&mut state, set_global("theme", json!("dark"), 20));
    assert_eq!(global_value(&state, "theme"), Some(&json!("dark")));
}

#[test]
fn timestamp_not_arrival_order_decides_the_winner() {
    let mut forward = state();
    run(&mut forward, set_global("k", json!("t1"), 1));
    run(&mut forward, set_global("k", json!("t2"), 2));

    let mut reversed = state();
    run(&mut reversed, set_global("k", json!("t2"), 2));
    let effects = run(&mut reversed, set_global("k", json!("t1"), 1));

    assert!(effects.is_empty());
    assert_eq!(global_value(&forward, "k"), Some(&json!("t2")));
    assert_eq!(forward, reversed);
}

#[test]
fn equal_timestamp_does_not_replace() {
    let mut state = state();
    run(&mut state, set_global("k", json!("first"), 7));
    let before = state.clone();
    let effects = run(&mut state, set_global("k", json!("second"), 7));

    assert!(effects.is_empty());
    assert_eq!(global_value(&state, "k"), Some(&json!("first")));
    assert!(state.shares_entries_with(&before));
}

#[test]
fn stale_scoped_draft_is_dropped() {
    let mut state = state();
    run(&mut state, set_scoped("draft_", "ch1", json!("hello"), 100));
    run(&mut state, set_scoped("draft_", "ch1", json!("world"), 50));

    assert_eq!(scoped_value(&state, "draft_", "ch1"), Some(&json!("hello")));
    assert_eq!(
        state
            .get(&StorageKey::scoped("draft_", "ch1"))
            .and_then(|record| record.timestamp),
        Some(Timestamp(100))
    );
    assert_eq!(flat_values(&state), vec![("draft_ch1".to_string(), json!("hello"))]);
}

#[test]
fn first_write_to_missing_key_always_lands() {
    let mut state = state();
    let effects = run(&mut state, set_scoped("draft_", "ch1", json!({"text": "hi"}), -3));
    assert_eq!(effects, vec![StorageEffect::PersistEntries]);
    assert_eq!(scoped_value(&state, "draft_", "ch1"), Some(&json!({"text": "hi"})));
}

#[test]
fn record_without_timestamp_is_overwritten_by_any_write() {
    let mut state = StorageState::from_records([(
        StorageKey::global("legacy"),
        StoredRecord::untimed(json!("old")),
    )]);
    run(&mut state, set_global("legacy", json!("new"), 0));
    assert_eq!(global_value(&state, "legacy"), Some(&json!("new")));
}

#[test]
fn zero_timestamp_counts_as_unset() {
    let mut state = seeded(&[(StorageKey::global("k"), 0, json!("zero"))]);
    run(&mut state, set_global("k", json!("older"), -1));
    assert_eq!(global_value(&state, "k"), Some(&json!("older")));
}

#[test]
fn scoped_and_global_writes_do_not_collide() {
    let mut state = state();
    run(&mut state, set_scoped("draft_", "ch1", json!("scoped"), 10));
    run(&mut state, set_global("draft_ch1", json!("global"), 5));

    assert_eq!(scoped_value(&state, "draft_", "ch1"), Some(&json!("scoped")));
    assert_eq!(global_value(&state, "draft_ch1"), Some(&json!("global")));
    assert_eq!(state.len(), 2);
}

#[test]
fn empty_prefix_and_name_are_valid_keys() {
    let mut state = state();
    run(&mut state, set_scoped("", "", json!(1), 1));
    run(&mut state, set_global("", json!(2), 1));

    assert_eq!(scoped_value(&state, "", ""), Some(&json!(1)));
    assert_eq!(global_value(&state, ""), Some(&json!(2)));
}

#[test]
fn pure_apply_leaves_input_untouched() {
    let original = seeded(&[
        (StorageKey::global("a"), 1, json!("a")),
        (StorageKey::global("b"), 1, json!("b")),
    ]);
    let transition = apply(&original, set_global("a", json!("A"), 2));

    assert!(transition.entries_changed);
    assert!(!transition.initialized_changed);
    assert_eq!(global_value(&original, "a"), Some(&json!("a")));
    assert_eq!(global_value(&transition.state, "a"), Some(&json!("A")));
    assert!(std::sync::Arc::ptr_eq(
        &original.entries[&StorageKey::global("b")],
        &transition.state.entries[&StorageKey::global("b")],
    ));
}

#[test]
fn rejected_apply_keeps_the_same_entries() {
    let original = seeded(&[(StorageKey::global("a"), 5, json!("a"))]);
    let transition = apply(&original, set_global("a", json!("stale"), 4));

    assert!(!transition.changed());
    assert!(transition.state.shares_entries_with(&original));
}
