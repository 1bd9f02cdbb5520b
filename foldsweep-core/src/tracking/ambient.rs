//! Ambient tracking state.
//!
//! Tracking clients conventionally read session defaults (run id, group, job
//! type, ...) from `TRACKER_*` environment variables and publish the identity
//! of the session they just opened back into the same place. This module keeps
//! that state as an explicit value owned by the [`TrackingClient`] instead of
//! the process environment, so it can be inspected and reset between runs.
//!
//! [`TrackingClient`]: super::TrackingClient

use std::collections::{BTreeMap, HashSet};

/// Prefix shared by every ambient key.
pub const PREFIX: &str = "TRACKER_";

pub const PROJECT: &str = "TRACKER_PROJECT";
pub const ENTITY: &str = "TRACKER_ENTITY";
pub const API_KEY: &str = "TRACKER_API_KEY";
pub const RUN_ID: &str = "TRACKER_RUN_ID";
pub const RUN_GROUP: &str = "TRACKER_RUN_GROUP";
pub const JOB_TYPE: &str = "TRACKER_JOB_TYPE";
pub const RUN_NAME: &str = "TRACKER_RUN_NAME";
pub const SWEEP_ID: &str = "TRACKER_SWEEP_ID";

/// Keys that survive every reset: project identity, tenant identity, credentials.
pub const REQUIRED_PRESERVED: [&str; 3] = [PROJECT, ENTITY, API_KEY];

/// Snapshot of `TRACKER_*` variables plus whatever the client has published since.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AmbientState {
    vars: BTreeMap<String, String>,
}

impl AmbientState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot the current process environment.
    pub fn from_env() -> Self {
        Self::from_vars(std::env::vars())
    }

    /// Build from arbitrary key/value pairs, keeping only `TRACKER_*` keys.
    pub fn from_vars<I, K, V>(vars: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let vars = vars
            .into_iter()
            .map(|(k, v)| (k.into(), v.into()))
            .filter(|(k, _)| k.starts_with(PREFIX))
            .collect();
        Self { vars }
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.vars
            .get(key)
            .map(String::as_str)
            .filter(|v| !v.is_empty())
    }

    pub fn set(&mut self, key: &str, value: impl Into<String>) {
        self.vars.insert(key.to_string(), value.into());
    }

    pub fn remove(&mut self, key: &str) -> Option<String> {
        self.vars.remove(key)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.vars.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.vars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vars.is_empty()
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.vars.keys().map(String::as_str)
    }

    /// Drop every key except those in `preserve` and [`REQUIRED_PRESERVED`].
    ///
    /// Returns the removed key names. Calling it twice in a row is a no-op the
    /// second time.
    pub fn reset<S: AsRef<str>>(&mut self, preserve: &[S]) -> Vec<String> {
        let keep: HashSet<&str> = preserve
            .iter()
            .map(|k| k.as_ref())
            .chain(REQUIRED_PRESERVED)
            .collect();
        let removed: Vec<String> = self
            .vars
            .keys()
            .filter(|k| !keep.contains(k.as_str()))
            .cloned()
            .collect();
        for key in &removed {
            self.vars.remove(key);
        }
        removed
    }
}
