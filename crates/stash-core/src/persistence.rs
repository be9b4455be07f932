use std::fs::File;
use std::fs::OpenOptions;
use std::io::BufRead;
use std::io::BufReader;
use std::io::Write;
use std::path::Path;
use std::path::PathBuf;

use serde::Deserialize;
use serde::Serialize;
use serde_json::Value;
use tracing::info;
use tracing::warn;

use super::actions::LifecycleAction;
use super::actions::StorageAction;
use super::actions::StoreAction;
use super::error::StashError;
use super::error::StashResult;
use super::reducer::reduce;
use super::state::StorageKey;
use super::state::StorageState;
use super::state::StoredRecord;
use super::state::Timestamp;

pub const SNAPSHOT_VERSION: u8 = 1;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PersistedEntry {
    pub key: StorageKey,
    #[serde(flatten)]
    pub record: StoredRecord,
}

impl From<(StorageKey, StoredRecord)> for PersistedEntry {
    fn from((key, record): (StorageKey, StoredRecord)) -> Self {
        Self { key, record }
    }
}

/// Journal form of [`StoreAction`]. Prefix rewrites carry a closure and are
/// journaled as a `STORAGE_REHYDRATE` of the entries they changed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PersistedStorageAction {
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
        #[serde(default)]
        exclude: Vec<StorageKey>,
    },
    StorageRehydrate {
        snapshot: Vec<PersistedEntry>,
    },
    RehydrationComplete {
        complete: bool,
    },
    #[serde(other)]
    Unrecognized,
}

impl PersistedStorageAction {
    /// `None` for actions that cannot be written to the journal as-is.
    pub fn from_action(action: &StoreAction) -> Option<Self> {
        let persisted = match action {
            StoreAction::Storage(StorageAction::SetItem {
                prefix,
                name,
                value,
                timestamp,
            }) => Self::SetItem {
                prefix: prefix.clone(),
                name: name.clone(),
                value: value.clone(),
                timestamp: *timestamp,
            },
            StoreAction::Storage(StorageAction::RemoveItem { prefix, name }) => Self::RemoveItem {
                prefix: prefix.clone(),
                name: name.clone(),
            },
            StoreAction::Storage(StorageAction::SetGlobalItem {
                name,
                value,
                timestamp,
            }) => Self::SetGlobalItem {
                name: name.clone(),
                value: value.clone(),
                timestamp: *timestamp,
            },
            StoreAction::Storage(StorageAction::RemoveGlobalItem { name }) => {
                Self::RemoveGlobalItem { name: name.clone() }
            }
            StoreAction::Storage(StorageAction::Clear { exclude }) => Self::Clear {
                exclude: exclude.iter().cloned().collect(),
            },
            StoreAction::Storage(StorageAction::Rehydrate { snapshot }) => Self::StorageRehydrate {
                snapshot: snapshot.iter().cloned().map(PersistedEntry::from).collect(),
            },
            StoreAction::Lifecycle(LifecycleAction::RehydrationComplete { complete }) => {
                Self::RehydrationComplete {
                    complete: *complete,
                }
            }
            StoreAction::Storage(StorageAction::ActionOnGlobalItemsWithPrefix { .. })
            | StoreAction::Unrecognized { .. } => return None,
        };
        Some(persisted)
    }

    pub fn into_action(self) -> StoreAction {
        match self {
            Self::SetItem {
                prefix,
                name,
                value,
                timestamp,
            } => StoreAction::set_item(prefix, name, value, timestamp),
            Self::RemoveItem { prefix, name } => StoreAction::remove_item(prefix, name),
            Self::SetGlobalItem {
                name,
                value,
                timestamp,
            } => StoreAction::set_global_item(name, value, timestamp),
            Self::RemoveGlobalItem { name } => StoreAction::remove_global_item(name),
            Self::Clear { exclude } => StoreAction::clear(exclude),
            Self::StorageRehydrate { snapshot } => StoreAction::rehydrate(
                snapshot.into_iter().map(|entry| (entry.key, entry.record)),
            ),
            Self::RehydrationComplete { complete } => StoreAction::rehydration_complete(complete),
            Self::Unrecognized => StoreAction::Unrecognized {
                kind: "unrecognized".to_string(),
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PersistedStorageRecord {
    pub seq: u64,
    pub ts_ms: i64,
    #[serde(flatten)]
    pub action: PersistedStorageAction,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PersistedStorageSnapshot {
    pub version: u8,
    pub seq: u64,
    pub entries: Vec<PersistedEntry>,
}

impl PersistedStorageSnapshot {
    pub fn capture(state: &StorageState, seq: u64) -> Self {
        Self {
            version: SNAPSHOT_VERSION,
            seq,
            entries: state
                .iter()
                .map(|(key, record)| PersistedEntry {
                    key: key.clone(),
                    record: record.clone(),
                })
                .collect(),
        }
    }
}

#[derive(Debug)]
pub struct StorageJournal {
    path: PathBuf,
    snapshot_path: PathBuf,
    next_seq: u64,
}

impl StorageJournal {
    pub fn open(path: impl AsRef<Path>, snapshot_path: impl AsRef<Path>) -> StashResult<Self> {
        let path = path.as_ref().to_path_buf();
        let snapshot_path = snapshot_path.as_ref().to_path_buf();
        for parent in [path.parent(), snapshot_path.parent()].into_iter().flatten() {
            std::fs::create_dir_all(parent)?;
        }
        let mut journal = Self {
            path,
            snapshot_path,
            next_seq: 1,
        };
        let journal_seq = journal.load()?.iter().map(|record| record.seq).max();
        let snapshot_seq = journal.load_snapshot()?.map(|snapshot| snapshot.seq);
        journal.next_seq = journal_seq
            .max(snapshot_seq)
            .map_or(1, |seq| seq.saturating_add(1));
        Ok(journal)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn snapshot_path(&self) -> &Path {
        &self.snapshot_path
    }

    /// Sequence number of the most recent record, or 0 for a fresh journal.
    pub fn last_seq(&self) -> u64 {
        self.next_seq.saturating_sub(1)
    }

    pub fn append(&mut self, action: PersistedStorageAction) -> StashResult<u64> {
        let seq = self.next_seq;
        let record = PersistedStorageRecord {
            seq,
            ts_ms: Timestamp::now().as_millis(),
            action,
        };
        let line = serde_json::to_string(&record).map_err(|source| StashError::Encode {
            what: "journal record",
            source,
        })?;
        append_line(self.path.as_path(), line.as_str())?;
        self.next_seq = self.next_seq.saturating_add(1);
        Ok(seq)
    }

    /// Journals `action` if it has a persisted form.
    pub fn record(&mut self, action: &StoreAction) -> StashResult<Option<u64>> {
        match PersistedStorageAction::from_action(action) {
            Some(persisted) => self.append(persisted).map(Some),
            None => Ok(None),
        }
    }

    pub fn load(&self) -> StashResult<Vec<PersistedStorageRecord>> {
        load_records(self.path.as_path())
    }

    pub fn load_since(&self, seq_exclusive: u64) -> StashResult<Vec<PersistedStorageRecord>> {
        let records = self.load()?;
        Ok(records
            .into_iter()
            .filter(|record| record.seq > seq_exclusive)
            .collect())
    }

    pub fn save_snapshot(&self, snapshot: &PersistedStorageSnapshot) -> StashResult<()> {
        let encoded = serde_json::to_vec(snapshot).map_err(|source| StashError::Encode {
            what: "snapshot",
            source,
        })?;
        let tmp = self.snapshot_path.with_extension("tmp");
        std::fs::write(&tmp, encoded)?;
        std::fs::rename(&tmp, &self.snapshot_path)?;
        Ok(())
    }

    pub fn load_snapshot(&self) -> StashResult<Option<PersistedStorageSnapshot>> {
        if !self.snapshot_path.exists() {
            return Ok(None);
        }
        let bytes = std::fs::read(&self.snapshot_path)?;
        let snapshot = serde_json::from_slice::<PersistedStorageSnapshot>(&bytes).map_err(
            |source| StashError::Decode {
                path: self.snapshot_path.clone(),
                source,
            },
        )?;
        Ok(Some(snapshot))
    }

    /// Journal records written after the current snapshot.
    pub fn pending(&self) -> StashResult<u64> {
        let snapshot_seq = self.load_snapshot()?.map_or(0, |snapshot| snapshot.seq);
        Ok(self.load_since(snapshot_seq)?.len() as u64)
    }

    /// Rebuilds the store: snapshot, then the journal tail, then the
    /// rehydration-complete signal.
    pub fn restore(&self) -> StashResult<StorageState> {
        let mut state = StorageState::default();
        let snapshot = self.load_snapshot()?;
        let snapshot_seq = snapshot.as_ref().map_or(0, |snapshot| snapshot.seq);
        if let Some(snapshot) = snapshot {
            reduce(
                &mut state,
                StoreAction::rehydrate(
                    snapshot
                        .entries
                        .into_iter()
                        .map(|entry| (entry.key, entry.record)),
                ),
            );
        }
        let tail = self.load_since(snapshot_seq)?;
        let replayed = tail.len();
        let mut state = replay_from(state, tail);
        reduce(&mut state, StoreAction::rehydration_complete(true));
        info!(
            entries = state.len(),
            snapshot_seq, replayed, "restored storage"
        );
        Ok(state)
    }

    /// Writes a snapshot of `state` at the latest seq and truncates the journal.
    pub fn compact(&self, state: &StorageState) -> StashResult<u64> {
        let seq = self.last_seq();
        self.save_snapshot(&PersistedStorageSnapshot::capture(state, seq))?;
        File::create(&self.path)?;
        info!(seq, entries = state.len(), "compacted storage journal");
        Ok(seq)
    }
}

pub fn replay_from(
    mut state: StorageState,
    records: impl IntoIterator<Item = PersistedStorageRecord>,
) -> StorageState {
    let mut sorted: Vec<PersistedStorageRecord> = records.into_iter().collect();
    sorted.sort_by_key(|record| record.seq);
    for record in sorted {
        if matches!(record.action, PersistedStorageAction::Unrecognized) {
            warn!(seq = record.seq, "replaying unrecognized journal record as no-op");
        }
        reduce(&mut state, record.action.into_action());
    }
    state
}

fn load_records(path: &Path) -> StashResult<Vec<PersistedStorageRecord>> {
    if !path.exists() {
        return Ok(Vec::new());
    }
    let file = File::open(path)?;
    let reader = BufReader::new(file);
    let mut records = Vec::new();
    for (index, line) in reader.lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str::<PersistedStorageRecord>(&line) {
            Ok(record) => records.push(record),
            Err(err) => warn!(line = index + 1, error = %err, "skipping undecodable journal line"),
        }
    }
    Ok(records)
}

fn append_line(path: &Path, line: &str) -> std::io::Result<()> {
    let mut opts = OpenOptions::new();
    opts.create(true).append(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        opts.mode(0o600);
    }
    let mut file = opts.open(path)?;
    file.write_all(line.as_bytes())?;
    file.write_all(b"\n")?;
    file.flush()?;
    Ok(())
}
