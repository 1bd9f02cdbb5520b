//! Tracking session adapter.
//!
//! [`TrackingClient`] wraps an experiment tracking service behind explicit
//! session handles: open (optionally resuming a record by id), stamp config and
//! notes, append metrics, close. The ambient state that tracking clients
//! usually keep in process globals lives inside the client and is cleared with
//! [`TrackingClient::reset_environment`].

pub mod ambient;
pub mod http;
pub mod memory;

pub use ambient::AmbientState;
pub use http::HttpTracker;
pub use memory::{InMemoryTracker, TrackerEvent};

use crate::error::TrackingError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Flat configuration mapping stored on a record.
pub type ConfigMap = serde_json::Map<String, serde_json::Value>;

/// Named scalar metrics logged as one history row.
pub type MetricMap = BTreeMap<String, f64>;

/// Service-assigned record identity.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RecordId(String);

impl RecordId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for RecordId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<String> for RecordId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

/// Project namespace on the tracking service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectRef {
    pub entity: String,
    pub project: String,
}

impl ProjectRef {
    pub fn new(entity: impl Into<String>, project: impl Into<String>) -> Self {
        Self {
            entity: entity.into(),
            project: project.into(),
        }
    }
}

/// How `open` treats an identity that may or may not exist yet.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResumePolicy {
    /// No existence requirement: bind if the record exists, create it otherwise.
    #[default]
    Allow,
    /// The record must already exist.
    MustExist,
    /// Always create a new record. Ambient run ids are ignored, and an
    /// explicit id must not be taken yet.
    Never,
}

/// Lifecycle state of a record on the service.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordState {
    #[default]
    Running,
    Finished,
}

/// A record as the service reports it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordInfo {
    pub id: RecordId,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub group: Option<String>,
    #[serde(default)]
    pub job_type: Option<String>,
    #[serde(default)]
    pub sweep_id: Option<String>,
    #[serde(default)]
    pub config: ConfigMap,
    #[serde(default)]
    pub notes: Option<String>,
    #[serde(default)]
    pub state: RecordState,
    /// Number of history rows already logged.
    #[serde(default)]
    pub last_step: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Request body for creating a record.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NewRecord {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<RecordId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub job_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sweep_id: Option<String>,
    #[serde(default)]
    pub config: ConfigMap,
}

/// Partial update of a record's metadata.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RecordUpdate {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config: Option<ConfigMap>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
}

/// Wire-level operations of an experiment tracking service.
#[async_trait]
pub trait TrackerBackend: Send + Sync {
    /// Create a record. The service assigns an id unless one is requested.
    async fn create_record(
        &self,
        project: &ProjectRef,
        record: &NewRecord,
    ) -> Result<RecordInfo, TrackingError>;

    /// Look a record up by id. `Ok(None)` when it does not exist.
    async fn fetch_record(
        &self,
        project: &ProjectRef,
        id: &RecordId,
    ) -> Result<Option<RecordInfo>, TrackingError>;

    /// Replace config and/or notes on a record.
    async fn update_record(
        &self,
        project: &ProjectRef,
        id: &RecordId,
        update: &RecordUpdate,
    ) -> Result<(), TrackingError>;

    /// Append one history row at `step`.
    async fn append_metrics(
        &self,
        project: &ProjectRef,
        id: &RecordId,
        step: u64,
        metrics: &MetricMap,
    ) -> Result<(), TrackingError>;

    /// Mark the record finished.
    async fn finish_record(&self, project: &ProjectRef, id: &RecordId)
    -> Result<(), TrackingError>;

    /// Base URL of the service's web UI.
    fn app_url(&self) -> &str;
}

/// Options for [`TrackingClient::open`]. Unset fields fall back to ambient state.
#[derive(Debug, Clone, Default)]
pub struct OpenOptions {
    pub id: Option<RecordId>,
    pub resume: ResumePolicy,
    pub name: Option<String>,
    pub group: Option<String>,
    pub job_type: Option<String>,
    pub config: ConfigMap,
}

impl OpenOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a brand-new record regardless of any published run id.
    pub fn fresh() -> Self {
        Self {
            resume: ResumePolicy::Never,
            ..Self::default()
        }
    }

    /// Reopen an existing record; fails if it is gone.
    pub fn resume(id: RecordId) -> Self {
        Self {
            id: Some(id),
            resume: ResumePolicy::MustExist,
            ..Self::default()
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_group(mut self, group: impl Into<String>) -> Self {
        self.group = Some(group.into());
        self
    }

    pub fn with_job_type(mut self, job_type: impl Into<String>) -> Self {
        self.job_type = Some(job_type.into());
        self
    }

    pub fn with_config(mut self, config: ConfigMap) -> Self {
        self.config = config;
        self
    }
}

/// A live handle to one record. Invalid for writes once closed.
#[derive(Debug, Clone)]
pub struct Session {
    id: RecordId,
    project: ProjectRef,
    project_url: String,
    name: Option<String>,
    group: Option<String>,
    job_type: Option<String>,
    sweep_id: Option<String>,
    config: ConfigMap,
    notes: Option<String>,
    step: u64,
    resumed: bool,
    closed: bool,
}

impl Session {
    pub fn id(&self) -> &RecordId {
        &self.id
    }

    pub fn project(&self) -> &ProjectRef {
        &self.project
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    /// Name for display and labelling, falling back to the record id.
    pub fn label(&self) -> &str {
        self.name.as_deref().unwrap_or(self.id.as_str())
    }

    pub fn group(&self) -> Option<&str> {
        self.group.as_deref()
    }

    pub fn job_type(&self) -> Option<&str> {
        self.job_type.as_deref()
    }

    pub fn sweep_id(&self) -> Option<&str> {
        self.sweep_id.as_deref()
    }

    /// Group that children of this record are filed under: the service's
    /// sweep id when it supplied one, otherwise this record's own id.
    pub fn sweep_group_id(&self) -> String {
        self.sweep_id
            .clone()
            .unwrap_or_else(|| self.id.as_str().to_string())
    }

    pub fn config(&self) -> &ConfigMap {
        &self.config
    }

    pub fn notes(&self) -> Option<&str> {
        self.notes.as_deref()
    }

    pub fn step(&self) -> u64 {
        self.step
    }

    pub fn is_resumed(&self) -> bool {
        self.resumed
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    pub fn project_url(&self) -> &str {
        &self.project_url
    }

    pub fn group_url(&self, group: &str) -> String {
        format!("{}/groups/{}", self.project_url, group)
    }

    pub fn sweep_url(&self) -> Option<String> {
        self.sweep_id
            .as_ref()
            .map(|sweep| format!("{}/sweeps/{}", self.project_url, sweep))
    }

    pub fn record_url(&self) -> String {
        format!("{}/runs/{}", self.project_url, self.id)
    }

    fn ensure_open(&self) -> Result<(), TrackingError> {
        if self.closed {
            return Err(TrackingError::SessionClosed {
                id: self.id.clone(),
            });
        }
        Ok(())
    }
}

/// Session adapter over a [`TrackerBackend`].
pub struct TrackingClient {
    backend: Arc<dyn TrackerBackend>,
    ambient: AmbientState,
    default_project: ProjectRef,
    active: Option<RecordId>,
}

impl TrackingClient {
    pub fn new(
        backend: Arc<dyn TrackerBackend>,
        default_project: ProjectRef,
        ambient: AmbientState,
    ) -> Self {
        Self {
            backend,
            ambient,
            default_project,
            active: None,
        }
    }

    pub fn ambient(&self) -> &AmbientState {
        &self.ambient
    }

    pub fn ambient_mut(&mut self) -> &mut AmbientState {
        &mut self.ambient
    }

    /// Id of the session currently holding the ambient state, if any.
    pub fn active(&self) -> Option<&RecordId> {
        self.active.as_ref()
    }

    /// Project the next session would open against.
    pub fn project(&self) -> ProjectRef {
        ProjectRef {
            entity: self
                .ambient
                .get(ambient::ENTITY)
                .map(str::to_string)
                .unwrap_or_else(|| self.default_project.entity.clone()),
            project: self
                .ambient
                .get(ambient::PROJECT)
                .map(str::to_string)
                .unwrap_or_else(|| self.default_project.project.clone()),
        }
    }

    pub fn project_url(&self, project: &ProjectRef) -> String {
        format!(
            "{}/{}/{}",
            self.backend.app_url().trim_end_matches('/'),
            project.entity,
            project.project
        )
    }

    /// Open a session, creating or resuming a record.
    pub async fn open(&mut self, options: OpenOptions) -> Result<Session, TrackingError> {
        if let Some(active) = &self.active {
            return Err(TrackingError::SessionAlreadyActive {
                active: active.clone(),
            });
        }

        let project = self.project();
        let ambient_value = |key: &str, explicit: Option<String>| {
            explicit.or_else(|| self.ambient.get(key).map(str::to_string))
        };
        let id = match options.resume {
            ResumePolicy::Never => options.id.clone(),
            _ => options
                .id
                .clone()
                .or_else(|| self.ambient.get(ambient::RUN_ID).map(RecordId::from)),
        };
        let name = ambient_value(ambient::RUN_NAME, options.name);
        let group = ambient_value(ambient::RUN_GROUP, options.group);
        let job_type = ambient_value(ambient::JOB_TYPE, options.job_type);
        let sweep_id = self.ambient.get(ambient::SWEEP_ID).map(str::to_string);

        let existing = match (&id, options.resume) {
            (_, ResumePolicy::Never) | (None, _) => None,
            (Some(id), _) => self.backend.fetch_record(&project, id).await?,
        };

        let (info, resumed) = match (existing, id) {
            (Some(info), _) => {
                let mut info = info;
                if !options.config.is_empty() {
                    merge_config(&mut info.config, &options.config, true)?;
                    self.backend
                        .update_record(
                            &project,
                            &info.id,
                            &RecordUpdate {
                                config: Some(info.config.clone()),
                                notes: None,
                            },
                        )
                        .await?;
                }
                (info, true)
            }
            (None, Some(id)) if options.resume == ResumePolicy::MustExist => {
                return Err(TrackingError::RecordNotFound { id });
            }
            (None, id) => {
                let record = NewRecord {
                    id,
                    name,
                    group,
                    job_type,
                    sweep_id,
                    config: options.config,
                };
                (self.backend.create_record(&project, &record).await?, false)
            }
        };

        info!(
            record_id = %info.id,
            name = info.name.as_deref().unwrap_or(""),
            group = info.group.as_deref().unwrap_or(""),
            resumed,
            "Opened tracking session"
        );

        self.publish(&info);
        self.active = Some(info.id.clone());

        Ok(Session {
            project_url: self.project_url(&project),
            project,
            id: info.id,
            name: info.name,
            group: info.group,
            job_type: info.job_type,
            sweep_id: info.sweep_id,
            config: info.config,
            notes: info.notes,
            step: info.last_step,
            resumed,
            closed: false,
        })
    }

    /// Merge `mapping` into the session config.
    ///
    /// With `allow_override == false`, a key already holding a different value
    /// fails with [`TrackingError::ConfigConflict`] and nothing is written.
    pub async fn update_config(
        &self,
        session: &mut Session,
        mapping: &ConfigMap,
        allow_override: bool,
    ) -> Result<(), TrackingError> {
        session.ensure_open()?;
        let mut merged = session.config.clone();
        merge_config(&mut merged, mapping, allow_override)?;
        self.backend
            .update_record(
                &session.project,
                &session.id,
                &RecordUpdate {
                    config: Some(merged.clone()),
                    notes: None,
                },
            )
            .await?;
        debug!(record_id = %session.id, keys = mapping.len(), "Updated record config");
        session.config = merged;
        Ok(())
    }

    pub async fn set_notes(
        &self,
        session: &mut Session,
        notes: impl Into<String>,
    ) -> Result<(), TrackingError> {
        session.ensure_open()?;
        let notes = notes.into();
        self.backend
            .update_record(
                &session.project,
                &session.id,
                &RecordUpdate {
                    config: None,
                    notes: Some(notes.clone()),
                },
            )
            .await?;
        session.notes = Some(notes);
        Ok(())
    }

    /// Append one history row. Every call is a new data point.
    pub async fn log(&self, session: &mut Session, metrics: &MetricMap) -> Result<(), TrackingError> {
        session.ensure_open()?;
        self.backend
            .append_metrics(&session.project, &session.id, session.step, metrics)
            .await?;
        debug!(record_id = %session.id, step = session.step, ?metrics, "Logged metrics");
        session.step += 1;
        Ok(())
    }

    /// Finish the record and detach the session.
    pub async fn close(&mut self, session: &mut Session) -> Result<(), TrackingError> {
        session.ensure_open()?;
        self.backend
            .finish_record(&session.project, &session.id)
            .await?;
        session.closed = true;
        if self.active.as_ref() == Some(&session.id) {
            self.active = None;
        }
        info!(record_id = %session.id, "Closed tracking session");
        Ok(())
    }

    /// Clear all ambient session state except `preserve` (project, entity and
    /// credentials are always kept) and detach any active session pointer.
    ///
    /// Safe to call with no open session; repeated calls are no-ops.
    pub fn reset_environment<S: AsRef<str>>(&mut self, preserve: &[S]) {
        if let Some(active) = self.active.take() {
            warn!(record_id = %active, "Resetting tracking environment with a session still attached");
        }
        let removed = self.ambient.reset(preserve);
        debug!(?removed, "Reset tracking environment");
    }

    fn publish(&mut self, info: &RecordInfo) {
        self.ambient.set(ambient::RUN_ID, info.id.as_str());
        let fields = [
            (ambient::RUN_NAME, &info.name),
            (ambient::RUN_GROUP, &info.group),
            (ambient::JOB_TYPE, &info.job_type),
            (ambient::SWEEP_ID, &info.sweep_id),
        ];
        for (key, value) in fields {
            match value {
                Some(value) => self.ambient.set(key, value.as_str()),
                None => {
                    self.ambient.remove(key);
                }
            }
        }
    }
}

/// Merge `mapping` into `target`, rejecting changed values unless overriding.
pub fn merge_config(
    target: &mut ConfigMap,
    mapping: &ConfigMap,
    allow_override: bool,
) -> Result<(), TrackingError> {
    if !allow_override {
        for (key, proposed) in mapping {
            if let Some(existing) = target.get(key)
                && existing != proposed
            {
                return Err(TrackingError::ConfigConflict {
                    key: key.clone(),
                    existing: existing.clone(),
                    proposed: proposed.clone(),
                });
            }
        }
    }
    for (key, value) in mapping {
        target.insert(key.clone(), value.clone());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn client_with(ambient: AmbientState) -> (Arc<InMemoryTracker>, TrackingClient) {
        let tracker = Arc::new(InMemoryTracker::new("https://tracker.test"));
        let client = TrackingClient::new(tracker.clone(), ProjectRef::new("lab", "cv"), ambient);
        (tracker, client)
    }

    fn client() -> (Arc<InMemoryTracker>, TrackingClient) {
        client_with(AmbientState::new())
    }

    fn config(pairs: &[(&str, serde_json::Value)]) -> ConfigMap {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    #[tokio::test]
    async fn test_open_without_identity_creates_record() {
        let (tracker, mut client) = client();
        let session = client.open(OpenOptions::new()).await.unwrap();

        assert!(!session.is_resumed());
        assert_eq!(session.step(), 0);
        assert_eq!(client.active(), Some(session.id()));
        assert!(tracker.record(session.id()).is_some());
    }

    #[tokio::test]
    async fn test_resume_must_exist_unknown_id_fails() {
        let (tracker, mut client) = client();
        let err = client
            .open(OpenOptions::resume(RecordId::from("missing1")))
            .await
            .unwrap_err();

        assert!(matches!(err, TrackingError::RecordNotFound { ref id } if id.as_str() == "missing1"));
        assert!(tracker.records().is_empty());
        assert!(client.active().is_none());
    }

    #[tokio::test]
    async fn test_resume_preserves_config_and_step() {
        let (_tracker, mut client) = client();
        let mut first = client.open(OpenOptions::new()).await.unwrap();
        client
            .update_config(&mut first, &config(&[("lr", json!(0.1))]), true)
            .await
            .unwrap();
        client
            .log(&mut first, &MetricMap::from([("loss".into(), 1.0)]))
            .await
            .unwrap();
        client.close(&mut first).await.unwrap();

        let resumed = client
            .open(OpenOptions::resume(first.id().clone()))
            .await
            .unwrap();
        assert!(resumed.is_resumed());
        assert_eq!(resumed.id(), first.id());
        assert_eq!(resumed.config().get("lr"), Some(&json!(0.1)));
        assert_eq!(resumed.step(), 1);
    }

    #[tokio::test]
    async fn test_update_config_conflict_without_override() {
        let (tracker, mut client) = client();
        let mut session = client
            .open(OpenOptions::new().with_config(config(&[("lr", json!(0.1))])))
            .await
            .unwrap();

        let err = client
            .update_config(&mut session, &config(&[("lr", json!(0.2)), ("bs", json!(32))]), false)
            .await
            .unwrap_err();
        assert!(matches!(err, TrackingError::ConfigConflict { ref key, .. } if key == "lr"));
        assert_eq!(session.config().get("lr"), Some(&json!(0.1)));
        assert!(session.config().get("bs").is_none());
        let stored = tracker.record(session.id()).unwrap();
        assert_eq!(stored.info.config.get("lr"), Some(&json!(0.1)));

        // Same value is not a conflict.
        client
            .update_config(&mut session, &config(&[("lr", json!(0.1))]), false)
            .await
            .unwrap();
        // Override replaces.
        client
            .update_config(&mut session, &config(&[("lr", json!(0.2))]), true)
            .await
            .unwrap();
        assert_eq!(session.config().get("lr"), Some(&json!(0.2)));
    }

    #[tokio::test]
    async fn test_closed_session_rejects_writes() {
        let (_tracker, mut client) = client();
        let mut session = client.open(OpenOptions::new()).await.unwrap();
        client.close(&mut session).await.unwrap();
        assert!(session.is_closed());
        assert!(client.active().is_none());

        let metrics = MetricMap::from([("x".into(), 1.0)]);
        assert!(matches!(
            client.log(&mut session, &metrics).await,
            Err(TrackingError::SessionClosed { .. })
        ));
        assert!(matches!(
            client.update_config(&mut session, &ConfigMap::new(), true).await,
            Err(TrackingError::SessionClosed { .. })
        ));
        assert!(matches!(
            client.set_notes(&mut session, "late").await,
            Err(TrackingError::SessionClosed { .. })
        ));
        assert!(matches!(
            client.close(&mut session).await,
            Err(TrackingError::SessionClosed { .. })
        ));
    }

    #[tokio::test]
    async fn test_second_open_while_attached_fails() {
        let (_tracker, mut client) = client();
        let first = client.open(OpenOptions::new()).await.unwrap();
        let err = client.open(OpenOptions::new()).await.unwrap_err();
        assert!(matches!(err, TrackingError::SessionAlreadyActive { ref active } if active == first.id()));
    }

    #[tokio::test]
    async fn test_stale_ambient_id_leaks_without_reset() {
        let (_tracker, mut client) = client();
        let mut parent = client.open(OpenOptions::new()).await.unwrap();
        client.close(&mut parent).await.unwrap();

        // The parent's identity is still published, so a fresh open binds to it.
        let leaked = client.open(OpenOptions::new()).await.unwrap();
        assert_eq!(leaked.id(), parent.id());
        assert!(leaked.is_resumed());
    }

    #[tokio::test]
    async fn test_fresh_open_ignores_published_id() {
        let (tracker, mut client) = client();
        let mut parent = client.open(OpenOptions::new()).await.unwrap();
        client.close(&mut parent).await.unwrap();

        let child = client.open(OpenOptions::fresh()).await.unwrap();
        assert_ne!(child.id(), parent.id());
        assert!(!child.is_resumed());
        assert_eq!(tracker.records().len(), 2);
        assert_eq!(client.ambient().get(ambient::RUN_ID), Some(child.id().as_str()));
    }

    #[tokio::test]
    async fn test_explicit_id_from_other_project_is_not_overwritten() {
        let (tracker, mut client) = client();
        let mut first = client
            .open(OpenOptions::new().with_config(config(&[("lr", json!(0.1))])))
            .await
            .unwrap();
        client.close(&mut first).await.unwrap();
        client.reset_environment::<&str>(&[]);

        client.ambient_mut().set(ambient::PROJECT, "elsewhere");
        let options = OpenOptions {
            id: Some(first.id().clone()),
            ..OpenOptions::new()
        };
        let err = client.open(options).await.unwrap_err();

        assert!(matches!(err, TrackingError::RecordExists { ref id } if id == first.id()));
        assert!(client.active().is_none());
        let stored = tracker.record(first.id()).unwrap();
        assert_eq!(stored.project, ProjectRef::new("lab", "cv"));
        assert_eq!(stored.info.config.get("lr"), Some(&json!(0.1)));
    }

    #[tokio::test]
    async fn test_reset_environment_isolates_next_open() {
        let ambient = AmbientState::from_vars([
            (ambient::PROJECT, "cv"),
            (ambient::ENTITY, "lab"),
            (ambient::API_KEY, "secret"),
        ]);
        let (_tracker, mut client) = client_with(ambient);
        let mut parent = client
            .open(OpenOptions::new().with_group("g1").with_job_type("train"))
            .await
            .unwrap();
        client.close(&mut parent).await.unwrap();
        assert_eq!(client.ambient().get(ambient::RUN_ID), Some(parent.id().as_str()));

        client.reset_environment(&ambient::REQUIRED_PRESERVED);
        assert_eq!(client.ambient().get(ambient::PROJECT), Some("cv"));
        assert_eq!(client.ambient().get(ambient::ENTITY), Some("lab"));
        assert_eq!(client.ambient().get(ambient::API_KEY), Some("secret"));
        assert!(!client.ambient().contains(ambient::RUN_ID));
        assert!(!client.ambient().contains(ambient::RUN_GROUP));
        assert!(!client.ambient().contains(ambient::JOB_TYPE));

        let child = client.open(OpenOptions::new()).await.unwrap();
        assert_ne!(child.id(), parent.id());
        assert_eq!(child.group(), None);
        assert_eq!(child.job_type(), None);
    }

    #[test]
    fn test_reset_environment_without_session() {
        let (_tracker, mut client) = client();
        client.reset_environment::<&str>(&[]);
        client.reset_environment::<&str>(&[]);
        assert!(client.active().is_none());
        assert!(client.ambient().is_empty());
    }

    #[tokio::test]
    async fn test_ambient_project_overrides_default() {
        let ambient = AmbientState::from_vars([(ambient::PROJECT, "other")]);
        let (_tracker, mut client) = client_with(ambient);
        let session = client.open(OpenOptions::new()).await.unwrap();
        assert_eq!(session.project(), &ProjectRef::new("lab", "other"));
        assert_eq!(session.project_url(), "https://tracker.test/lab/other");
    }

    #[tokio::test]
    async fn test_urls() {
        let (tracker, mut client) = client();
        tracker.register_sweep("sw42", ConfigMap::new());
        client.ambient_mut().set(ambient::SWEEP_ID, "sw42");
        let session = client.open(OpenOptions::new()).await.unwrap();

        assert_eq!(session.project_url(), "https://tracker.test/lab/cv");
        assert_eq!(session.sweep_group_id(), "sw42");
        assert_eq!(
            session.group_url("sw42"),
            "https://tracker.test/lab/cv/groups/sw42"
        );
        assert_eq!(
            session.sweep_url().as_deref(),
            Some("https://tracker.test/lab/cv/sweeps/sw42")
        );
        assert_eq!(
            session.record_url(),
            format!("https://tracker.test/lab/cv/runs/{}", session.id())
        );
    }

    #[tokio::test]
    async fn test_sweep_group_falls_back_to_record_id() {
        let (_tracker, mut client) = client();
        let session = client.open(OpenOptions::new()).await.unwrap();
        assert_eq!(session.sweep_id(), None);
        assert_eq!(session.sweep_url(), None);
        assert_eq!(session.sweep_group_id(), session.id().as_str());
    }

    #[test]
    fn test_merge_config_inserts_new_keys() {
        let mut target = config(&[("a", json!(1))]);
        merge_config(&mut target, &config(&[("b", json!("x"))]), false).unwrap();
        assert_eq!(target.len(), 2);
    }
}
