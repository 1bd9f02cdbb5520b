//! # foldsweep core
//!
//! Runs a k-fold cross-validation sweep as a group of child records nested
//! under one parent record on an experiment tracking service:
//!
//! 1. open a parent record, stamp its config and a link to its child group, close it
//! 2. for each fold: reset the ambient tracking state, run the work function in
//!    a fresh child record, log its score
//! 3. reopen the parent by id (it must still exist) and log the mean score
//!
//! The tracking service sits behind [`tracking::TrackerBackend`]; an HTTP
//! client and an in-memory service are provided.

pub mod config;
pub mod error;
pub mod fold;
pub mod sweep;
pub mod tracking;
pub mod work;

// Re-export commonly used types at the crate root.
pub use config::{ConfigOverrides, GeneratorConfig, SweepConfig, SweepSettings, TrackerConfig};
pub use error::{ConfigError, Result, SweepError, TrackingError};
pub use fold::{FoldOutcome, FoldSpec, run_fold};
pub use sweep::{SweepOrchestrator, SweepPhase, SweepSummary, mean};
pub use tracking::{
    AmbientState, ConfigMap, HttpTracker, InMemoryTracker, MetricMap, OpenOptions, ProjectRef,
    RecordId, ResumePolicy, Session, TrackerBackend, TrackingClient,
};
pub use work::{NormalResultGenerator, WorkFunction};

use std::sync::Arc;

/// App URL reported by the in-memory tracker.
pub const OFFLINE_APP_URL: &str = "offline://foldsweep";

/// Build the backend selected by `config`.
///
/// `api_key` is only used for the HTTP backend.
pub fn build_backend(config: &TrackerConfig, api_key: Option<String>) -> Arc<dyn TrackerBackend> {
    match (&config.base_url, config.offline) {
        (Some(base_url), false) => Arc::new(HttpTracker::new(
            base_url.clone(),
            config.app_url.clone(),
            api_key,
        )),
        _ => Arc::new(InMemoryTracker::new(
            config
                .app_url
                .clone()
                .unwrap_or_else(|| OFFLINE_APP_URL.to_string()),
        )),
    }
}
