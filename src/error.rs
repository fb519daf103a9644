//! Error taxonomy for the storage subsystem.
//!
//! Most of these never cross the public boundary: remote and parse failures
//! are logged where they happen and the caller receives a smaller (or empty)
//! result instead. `InvalidClassification` and local write failures are the
//! exceptions surfaced by [`save_prediction`](crate::save::save_prediction).

use thiserror::Error;

pub type Result<T> = std::result::Result<T, StoreError>;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("invalid {kind}: {value}")]
    InvalidClassification { kind: &'static str, value: String },

    #[error("timestamp out of range: {0}")]
    InvalidTimestamp(i64),

    #[error("remote unavailable: {0}")]
    RemoteUnavailable(String),

    #[error("{failed} of {total} remote records could not be read")]
    PartialFetchFailure { failed: usize, total: usize },

    #[error("malformed record at {key}: {source}")]
    ParseFailure {
        key: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("remote write to {path} still conflicting after {attempts} attempts")]
    ConflictUnresolved { path: String, attempts: u32 },

    #[error("local store error: {0}")]
    Local(#[from] sqlx::Error),

    #[error("serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

impl StoreError {
    pub fn parse(key: impl Into<String>, source: serde_json::Error) -> Self {
        Self::ParseFailure {
            key: key.into(),
            source,
        }
    }
}
