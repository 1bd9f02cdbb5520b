//! Error types for the foldsweep core library.
//!
//! Uses `thiserror` for structured variants covering the tracking service
//! adapter, the sweep protocol and configuration loading.

use crate::tracking::RecordId;

/// Errors raised by the tracking session adapter and its backends.
#[derive(Debug, thiserror::Error)]
pub enum TrackingError {
    #[error("Record not found: {id}")]
    RecordNotFound { id: RecordId },

    #[error("Record id already taken: {id}")]
    RecordExists { id: RecordId },

    #[error("Config key '{key}' already set to {existing}, refusing to overwrite with {proposed}")]
    ConfigConflict {
        key: String,
        existing: serde_json::Value,
        proposed: serde_json::Value,
    },

    #[error("Session for record {id} is already closed")]
    SessionClosed { id: RecordId },

    #[error("Session for record {active} is still attached; close it before opening another")]
    SessionAlreadyActive { active: RecordId },

    #[error("Tracking service request failed: {message}")]
    Transport { message: String },

    #[error("Tracking service returned HTTP {status}: {message}")]
    Api { status: u16, message: String },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl From<reqwest::Error> for TrackingError {
    fn from(err: reqwest::Error) -> Self {
        Self::Transport {
            message: err.to_string(),
        }
    }
}

/// Errors that abort a cross-validation sweep.
#[derive(Debug, thiserror::Error)]
pub enum SweepError {
    #[error("No fold results to aggregate (num_folds must be > 0)")]
    EmptyResultSet,

    #[error("Tracking error: {0}")]
    Tracking(#[from] TrackingError),

    #[error("Work function failed on fold {fold_index}: {source}")]
    Work {
        fold_index: usize,
        #[source]
        source: anyhow::Error,
    },

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),
}

/// Errors from loading or validating configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to load configuration: {0}")]
    Load(#[from] Box<figment::Error>),

    #[error("Invalid value for '{field}': {reason}")]
    Invalid { field: String, reason: String },

    #[error("Failed to render configuration: {0}")]
    Render(#[from] toml::ser::Error),
}

pub type Result<T, E = SweepError> = std::result::Result<T, E>;
