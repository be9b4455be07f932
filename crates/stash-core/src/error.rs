use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum StashError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to encode {what}: {source}")]
    Encode {
        what: &'static str,
        #[source]
        source: serde_json::Error,
    },

    #[error("failed to decode {}: {source}", .path.display())]
    Decode {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("invalid config: {0}")]
    Config(#[from] toml::de::Error),
}

pub type StashResult<T> = Result<T, StashError>;
