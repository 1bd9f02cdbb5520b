//! Configuration for foldsweep.
//!
//! Uses `figment` for layered configuration: defaults -> user config ->
//! workspace config -> explicit files -> environment -> CLI overrides.
//! User config lives at `~/.config/foldsweep/config.toml`, workspace config at
//! `.foldsweep/config.toml`.

use crate::error::ConfigError;
use crate::tracking::{ConfigMap, ProjectRef, ambient};
use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::{Path, PathBuf};

/// Top-level configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SweepConfig {
    #[serde(default)]
    pub tracker: TrackerConfig,
    #[serde(default)]
    pub sweep: SweepSettings,
    #[serde(default)]
    pub generator: GeneratorConfig,
}

/// Where and how to reach the tracking service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackerConfig {
    /// REST endpoint of the service. Unset means offline.
    #[serde(default)]
    pub base_url: Option<String>,
    /// Web UI base used for navigation links (defaults to `base_url`).
    #[serde(default)]
    pub app_url: Option<String>,
    #[serde(default = "default_project")]
    pub project: String,
    #[serde(default = "default_entity")]
    pub entity: String,
    /// Environment variable holding the API key.
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,
    /// Force the in-memory tracker even when `base_url` is set.
    #[serde(default)]
    pub offline: bool,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            base_url: None,
            app_url: None,
            project: default_project(),
            entity: default_entity(),
            api_key_env: default_api_key_env(),
            offline: false,
        }
    }
}

impl TrackerConfig {
    pub fn project_ref(&self) -> ProjectRef {
        ProjectRef::new(&self.entity, &self.project)
    }

    pub fn is_offline(&self) -> bool {
        self.offline || self.base_url.is_none()
    }
}

fn default_project() -> String {
    "foldsweep".to_string()
}

fn default_entity() -> String {
    "default".to_string()
}

fn default_api_key_env() -> String {
    ambient::API_KEY.to_string()
}

/// Shape of the cross-validation sweep.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SweepSettings {
    #[serde(default = "default_num_folds")]
    pub num_folds: usize,
    /// Metric each fold logs its score under.
    #[serde(default = "default_fold_metric")]
    pub fold_metric: String,
    /// Metric the parent record receives the mean under.
    #[serde(default = "default_aggregate_metric")]
    pub aggregate_metric: String,
    /// Ambient keys kept across the per-fold environment reset.
    #[serde(default = "default_preserve_env")]
    pub preserve_env: Vec<String>,
}

impl Default for SweepSettings {
    fn default() -> Self {
        Self {
            num_folds: default_num_folds(),
            fold_metric: default_fold_metric(),
            aggregate_metric: default_aggregate_metric(),
            preserve_env: default_preserve_env(),
        }
    }
}

impl SweepSettings {
    pub fn with_num_folds(mut self, num_folds: usize) -> Self {
        self.num_folds = num_folds;
        self
    }
}

fn default_num_folds() -> usize {
    3
}

fn default_fold_metric() -> String {
    "val_accuracy".to_string()
}

fn default_aggregate_metric() -> String {
    "mean_val_accuracy".to_string()
}

fn default_preserve_env() -> Vec<String> {
    ambient::REQUIRED_PRESERVED
        .iter()
        .map(|k| k.to_string())
        .collect()
}

/// Parameters of the stand-in result generator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeneratorConfig {
    #[serde(default)]
    pub mu: f64,
    #[serde(default = "default_sigma")]
    pub sigma: f64,
    #[serde(default = "default_seed")]
    pub seed: u64,
}

impl Default for GeneratorConfig {
    fn default() -> Self {
        Self {
            mu: 0.0,
            sigma: default_sigma(),
            seed: default_seed(),
        }
    }
}

fn default_sigma() -> f64 {
    1.0
}

fn default_seed() -> u64 {
    2024
}

impl SweepConfig {
    /// Reject values the sweep cannot run with.
    ///
    /// `num_folds == 0` is left for the orchestrator, which reports it as an
    /// empty result set.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |field: &str, reason: &str| {
            Err(ConfigError::Invalid {
                field: field.to_string(),
                reason: reason.to_string(),
            })
        };

        if !self.generator.mu.is_finite() {
            return invalid("generator.mu", "must be a finite number");
        }
        if !self.generator.sigma.is_finite() || self.generator.sigma < 0.0 {
            return invalid("generator.sigma", "must be a finite, non-negative number");
        }
        if self.sweep.fold_metric.trim().is_empty() {
            return invalid("sweep.fold_metric", "must not be empty");
        }
        if self.sweep.aggregate_metric.trim().is_empty() {
            return invalid("sweep.aggregate_metric", "must not be empty");
        }
        if self.sweep.fold_metric == self.sweep.aggregate_metric {
            return invalid(
                "sweep.aggregate_metric",
                "must differ from sweep.fold_metric",
            );
        }
        if self.tracker.project.trim().is_empty() {
            return invalid("tracker.project", "must not be empty");
        }
        if self.tracker.entity.trim().is_empty() {
            return invalid("tracker.entity", "must not be empty");
        }
        if let Some(url) = &self.tracker.base_url
            && !(url.starts_with("http://") || url.starts_with("https://"))
        {
            return invalid("tracker.base_url", "must be an http(s) URL");
        }
        Ok(())
    }

    /// Flatten into the mapping stamped on the parent record.
    ///
    /// Nested sections become dotted keys; `config_files` and `cwd` record
    /// where the values came from.
    pub fn to_config_map(&self, config_files: &[PathBuf], cwd: Option<&Path>) -> ConfigMap {
        let mut map = ConfigMap::new();
        // Serializing plain data structs into a Value cannot fail.
        if let Ok(value) = serde_json::to_value(self) {
            flatten_into(&mut map, "", value);
        }
        map.insert(
            "config_files".to_string(),
            Value::Array(
                config_files
                    .iter()
                    .map(|p| Value::String(p.display().to_string()))
                    .collect(),
            ),
        );
        if let Some(cwd) = cwd {
            map.insert("cwd".to_string(), Value::String(cwd.display().to_string()));
        }
        map
    }

    pub fn to_toml(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }
}

fn flatten_into(map: &mut ConfigMap, prefix: &str, value: Value) {
    match value {
        Value::Object(fields) => {
            for (key, value) in fields {
                let path = if prefix.is_empty() {
                    key
                } else {
                    format!("{prefix}.{key}")
                };
                flatten_into(map, &path, value);
            }
        }
        other => {
            map.insert(prefix.to_string(), other);
        }
    }
}

/// Dotted-path overrides applied on top of every other layer.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct ConfigOverrides {
    values: serde_json::Map<String, Value>,
}

impl ConfigOverrides {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set `path` (e.g. `"sweep.num_folds"`) to `value`.
    pub fn set(&mut self, path: &str, value: impl Into<Value>) -> &mut Self {
        let mut segments: Vec<&str> = path.split('.').collect();
        let Some(last) = segments.pop() else {
            return self;
        };
        let mut node = &mut self.values;
        for segment in segments {
            let entry = node
                .entry(segment.to_string())
                .or_insert_with(|| Value::Object(serde_json::Map::new()));
            if !entry.is_object() {
                *entry = Value::Object(serde_json::Map::new());
            }
            let Value::Object(next) = entry else {
                unreachable!("entry was just made an object");
            };
            node = next;
        }
        node.insert(last.to_string(), value.into());
        self
    }

    /// Set `path` only when `value` is present.
    pub fn set_opt<V: Into<Value>>(&mut self, path: &str, value: Option<V>) -> &mut Self {
        if let Some(value) = value {
            self.set(path, value);
        }
        self
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

pub fn user_config_path() -> Option<PathBuf> {
    directories::ProjectDirs::from("dev", "foldsweep", "foldsweep")
        .map(|dirs| dirs.config_dir().join("config.toml"))
}

pub fn workspace_config_path(workspace: &Path) -> PathBuf {
    workspace.join(".foldsweep").join("config.toml")
}

/// Load configuration from layered sources.
///
/// Priority (highest to lowest):
/// 1. Explicit overrides
/// 2. Environment variables (prefixed with `FOLDSWEEP_`, `__` separates sections)
/// 3. Explicit config files, later files winning
/// 4. Workspace-local config (`.foldsweep/config.toml`)
/// 5. User config (`~/.config/foldsweep/config.toml`)
/// 6. Built-in defaults
pub fn load_config(
    workspace: Option<&Path>,
    files: &[PathBuf],
    overrides: Option<&ConfigOverrides>,
) -> Result<SweepConfig, ConfigError> {
    let mut figment = Figment::from(Serialized::defaults(SweepConfig::default()));

    if let Some(user_config) = user_config_path()
        && user_config.exists()
    {
        figment = figment.merge(Toml::file(&user_config));
    }

    if let Some(ws) = workspace {
        let ws_config = workspace_config_path(ws);
        if ws_config.exists() {
            figment = figment.merge(Toml::file(&ws_config));
        }
    }

    // Explicit files must exist; a typo should not silently fall back to defaults.
    for file in files {
        figment = figment.merge(Toml::file_exact(file));
    }

    // FOLDSWEEP_SWEEP__NUM_FOLDS, FOLDSWEEP_TRACKER__BASE_URL, ...
    figment = figment.merge(Env::prefixed("FOLDSWEEP_").split("__"));

    if let Some(overrides) = overrides {
        figment = figment.merge(Serialized::defaults(overrides));
    }

    figment.extract().map_err(|e| ConfigError::Load(Box::new(e)))
}
