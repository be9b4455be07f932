use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;

use serde_json::Value;

use super::state::StorageKey;
use super::state::StoredRecord;
use super::state::Timestamp;

#[derive(Debug, Clone)]
pub enum StoreAction {
    Storage(StorageAction),
    Lifecycle(LifecycleAction),
    /// An action this store does not handle. Always an identity transition.
    Unrecognized { kind: String },
}

#[derive(Debug, Clone)]
pub enum StorageAction {
    SetItem {
        prefix: String,
        name: String,
        value: Value,
        timestamp: Timestamp,
    },
    RemoveItem {
        prefix: String,
        name: String,
    },
    SetGlobalItem {
        name: String,
        value: Value,
        timestamp: Timestamp,
    },
    RemoveGlobalItem {
        name: String,
    },
    Clear {
        exclude: BTreeSet<StorageKey>,
    },
    ActionOnGlobalItemsWithPrefix {
        prefix: String,
        transform: ValueTransform,
    },
    Rehydrate {
        snapshot: Vec<(StorageKey, StoredRecord)>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleAction {
    RehydrationComplete { complete: bool },
}

type TransformFn = dyn Fn(&StorageKey, &Value) -> Value + Send + Sync;

/// Callback used by prefix rewrites. Returning a value equal to the input
/// leaves that entry untouched.
#[derive(Clone)]
pub struct ValueTransform(Arc<TransformFn>);

impl ValueTransform {
    pub fn new<F>(f: F) -> Self
    where
        F: Fn(&StorageKey, &Value) -> Value + Send + Sync + 'static,
    {
        Self(Arc::new(f))
    }

    pub fn identity() -> Self {
        Self::new(|_, value| value.clone())
    }

    /// Replaces every matched value with `value`.
    pub fn constant(value: Value) -> Self {
        Self::new(move |_, _| value.clone())
    }

    pub fn call(&self, key: &StorageKey, value: &Value) -> Value {
        (self.0)(key, value)
    }
}

impl fmt::Debug for ValueTransform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("ValueTransform(..)")
    }
}

impl StoreAction {
    pub fn set_item(
        prefix: impl Into<String>,
        name: impl Into<String>,
        value: Value,
        timestamp: Timestamp,
    ) -> Self {
        Self::Storage(StorageAction::SetItem {
            prefix: prefix.into(),
            name: name.into(),
            value,
            timestamp,
        })
    }

    pub fn remove_item(prefix: impl Into<String>, name: impl Into<String>) -> Self {
        Self::Storage(StorageAction::RemoveItem {
            prefix: prefix.into(),
            name: name.into(),
        })
    }

    pub fn set_global_item(name: impl Into<String>, value: Value, timestamp: Timestamp) -> Self {
        Self::Storage(StorageAction::SetGlobalItem {
            name: name.into(),
            value,
            timestamp,
        })
    }

    pub fn remove_global_item(name: impl Into<String>) -> Self {
        Self::Storage(StorageAction::RemoveGlobalItem { name: name.into() })
    }

    pub fn clear(exclude: impl IntoIterator<Item = StorageKey>) -> Self {
        Self::Storage(StorageAction::Clear {
            exclude: exclude.into_iter().collect(),
        })
    }

    pub fn on_items_with_prefix(prefix: impl Into<String>, transform: ValueTransform) -> Self {
        Self::Storage(StorageAction::ActionOnGlobalItemsWithPrefix {
            prefix: prefix.into(),
            transform,
        })
    }

    pub fn rehydrate(snapshot: impl IntoIterator<Item = (StorageKey, StoredRecord)>) -> Self {
        Self::Storage(StorageAction::Rehydrate {
            snapshot: snapshot.into_iter().collect(),
        })
    }

    pub fn rehydration_complete(complete: bool) -> Self {
        Self::Lifecycle(LifecycleAction::RehydrationComplete { complete })
    }

    pub fn kind(&self) -> &str {
        match self {
            Self::Storage(StorageAction::SetItem { .. }) => "SET_ITEM",
            Self::Storage(StorageAction::RemoveItem { .. }) => "REMOVE_ITEM",
            Self::Storage(StorageAction::SetGlobalItem { .. }) => "SET_GLOBAL_ITEM",
            Self::Storage(StorageAction::RemoveGlobalItem { .. }) => "REMOVE_GLOBAL_ITEM",
            Self::Storage(StorageAction::Clear { .. }) => "CLEAR",
            Self::Storage(StorageAction::ActionOnGlobalItemsWithPrefix { .. }) => {
                "ACTION_ON_GLOBAL_ITEMS_WITH_PREFIX"
            }
            Self::Storage(StorageAction::Rehydrate { .. }) => "STORAGE_REHYDRATE",
            Self::Lifecycle(LifecycleAction::RehydrationComplete { .. }) => {
                "REHYDRATION_COMPLETE"
            }
            Self::Unrecognized { kind } => kind.as_str(),
        }
    }
}
