use std::borrow::Cow;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use serde::Deserialize;
use serde::Serialize;
use serde_json::Value;

/// Milliseconds since the Unix epoch. Zero means "never written".
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Timestamp(pub i64);

impl Timestamp {
    pub const UNSET: Timestamp = Timestamp(0);

    pub fn now() -> Self {
        Self(chrono::Utc::now().timestamp_millis())
    }

    pub fn from_millis(millis: i64) -> Self {
        Self(millis)
    }

    pub fn as_millis(self) -> i64 {
        self.0
    }

    pub fn is_set(self) -> bool {
        self.0 != 0
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Address of an entry. Scoped and global keys live side by side in one map
/// but never collide, even when their flat forms are equal.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StorageKey {
    Scoped { prefix: String, name: String },
    Global { name: String },
}

impl StorageKey {
    pub fn scoped(prefix: impl Into<String>, name: impl Into<String>) -> Self {
        Self::Scoped {
            prefix: prefix.into(),
            name: name.into(),
        }
    }

    pub fn global(name: impl Into<String>) -> Self {
        Self::Global { name: name.into() }
    }

    pub fn name(&self) -> &str {
        match self {
            Self::Scoped { name, .. } | Self::Global { name } => name.as_str(),
        }
    }

    pub fn prefix(&self) -> Option<&str> {
        match self {
            Self::Scoped { prefix, .. } => Some(prefix.as_str()),
            Self::Global { .. } => None,
        }
    }

    pub fn is_global(&self) -> bool {
        matches!(self, Self::Global { .. })
    }

    /// `prefix ++ name` for scoped keys, `name` for global ones.
    pub fn flat(&self) -> Cow<'_, str> {
        match self {
            Self::Scoped { prefix, name } if prefix.is_empty() => Cow::Borrowed(name.as_str()),
            Self::Scoped { prefix, name } => Cow::Owned(format!("{prefix}{name}")),
            Self::Global { name } => Cow::Borrowed(name.as_str()),
        }
    }

    /// Whether the flat form starts with `needle`, without building it.
    pub fn starts_with(&self, needle: &str) -> bool {
        match self {
            Self::Global { name } => name.starts_with(needle),
            Self::Scoped { prefix, name } => {
                if needle.len() <= prefix.len() {
                    prefix.starts_with(needle)
                } else {
                    needle.starts_with(prefix.as_str())
                        && name.starts_with(&needle[prefix.len()..])
                }
            }
        }
    }
}

impl fmt::Display for StorageKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.flat())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredRecord {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<Timestamp>,
    pub value: Value,
}

impl StoredRecord {
    pub fn new(timestamp: Timestamp, value: Value) -> Self {
        Self {
            timestamp: Some(timestamp),
            value,
        }
    }

    pub fn untimed(value: Value) -> Self {
        Self {
            timestamp: None,
            value,
        }
    }

    /// Last-timestamp-wins: an unset stored timestamp loses to anything,
    /// otherwise the incoming one must be strictly newer.
    pub fn accepts_write(&self, incoming: Timestamp) -> bool {
        match self.timestamp {
            Some(current) if current.is_set() => current < incoming,
            _ => true,
        }
    }
}

pub type Entries = BTreeMap<StorageKey, Arc<StoredRecord>>;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct StorageState {
    pub(crate) entries: Arc<Entries>,
    pub(crate) initialized: bool,
}

impl StorageState {
    pub fn from_records(records: impl IntoIterator<Item = (StorageKey, StoredRecord)>) -> Self {
        Self {
            entries: Arc::new(
                records
                    .into_iter()
                    .map(|(key, record)| (key, Arc::new(record)))
                    .collect(),
            ),
            initialized: false,
        }
    }

    pub fn initialized(&self) -> bool {
        self.initialized
    }

    pub fn entries(&self) -> &Entries {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, key: &StorageKey) -> Option<&StoredRecord> {
        self.entries.get(key).map(Arc::as_ref)
    }

    pub fn value(&self, key: &StorageKey) -> Option<&Value> {
        self.get(key).map(|record| &record.value)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&StorageKey, &StoredRecord)> {
        self.entries
            .iter()
            .map(|(key, record)| (key, record.as_ref()))
    }

    pub fn keys_with_prefix<'a>(
        &'a self,
        prefix: &'a str,
    ) -> impl Iterator<Item = &'a StorageKey> + 'a {
        self.entries.keys().filter(move |key| key.starts_with(prefix))
    }

    /// True when both states point at the same entry map, i.e. no transition
    /// between them touched an entry.
    pub fn shares_entries_with(&self, other: &StorageState) -> bool {
        Arc::ptr_eq(&self.entries, &other.entries)
    }

    /// Entries that were inserted or replaced relative to `earlier`.
    /// Removals are not reported.
    pub fn changed_since(&self, earlier: &StorageState) -> Vec<(StorageKey, StoredRecord)> {
        if self.shares_entries_with(earlier) {
            return Vec::new();
        }
        self.entries
            .iter()
            .filter(|(key, record)| match earlier.entries.get(*key) {
                Some(previous) => !Arc::ptr_eq(previous, *record) && previous != *record,
                None => true,
            })
            .map(|(key, record)| (key.clone(), record.as_ref().clone()))
            .collect()
    }
}
