use std::path::Path;
use std::path::PathBuf;

use serde::Deserialize;
use serde::Serialize;

use super::error::StashResult;

#[derive(Debug, Serialize, Deserialize, Clone, Default, PartialEq)]
#[serde(default)]
pub struct Config {
    pub storage: StorageConfig,
    pub logging: LoggingConfig,
}

impl Config {
    pub fn from_toml_str(raw: &str) -> StashResult<Self> {
        Ok(toml::from_str(raw)?)
    }

    /// Reads `path`, falling back to defaults when the file does not exist.
    pub fn load(path: impl AsRef<Path>) -> StashResult<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Ok(Self::default());
        }
        let raw = std::fs::read_to_string(path)?;
        Self::from_toml_str(&raw)
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct StorageConfig {
    pub data_dir: Option<PathBuf>,
    pub journal_file: String,
    pub snapshot_file: String,
    /// Journal records allowed past the snapshot before compacting.
    pub snapshot_every: u64,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: None,
            journal_file: "storage-journal.jsonl".to_string(),
            snapshot_file: "storage-snapshot.json".to_string(),
            snapshot_every: 64,
        }
    }
}

impl StorageConfig {
    pub fn journal_path(&self, data_dir: &Path) -> PathBuf {
        data_dir.join(&self.journal_file)
    }

    pub fn snapshot_path(&self, data_dir: &Path) -> PathBuf {
        data_dir.join(&self.snapshot_file)
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "warn".to_string(),
            json: false,
        }
    }
}
