//! In-process tracking service.
//!
//! Backs offline runs and tests. Every backend call is appended to an event
//! journal so call ordering can be asserted on.

use super::{
    ConfigMap, MetricMap, NewRecord, ProjectRef, RecordId, RecordInfo, RecordState, RecordUpdate,
    TrackerBackend,
};
use crate::error::TrackingError;
use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};

/// A record plus its metric history.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredRecord {
    /// Creation order on this service.
    pub seq: u64,
    pub project: ProjectRef,
    pub info: RecordInfo,
    pub history: Vec<(u64, MetricMap)>,
}

impl StoredRecord {
    /// Every value logged under `metric`, in step order.
    pub fn metric_values(&self, metric: &str) -> Vec<f64> {
        self.history
            .iter()
            .filter_map(|(_, row)| row.get(metric).copied())
            .collect()
    }
}

/// One observed backend call.
#[derive(Debug, Clone, PartialEq)]
pub enum TrackerEvent {
    Created(RecordId),
    Fetched { id: RecordId, found: bool },
    Updated(RecordId),
    Logged { id: RecordId, metrics: MetricMap },
    Finished(RecordId),
}

impl TrackerEvent {
    pub fn record_id(&self) -> &RecordId {
        match self {
            Self::Created(id) | Self::Updated(id) | Self::Finished(id) => id,
            Self::Fetched { id, .. } | Self::Logged { id, .. } => id,
        }
    }
}

#[derive(Debug, Default)]
struct Store {
    records: HashMap<RecordId, StoredRecord>,
    sweeps: HashMap<String, ConfigMap>,
    events: Vec<TrackerEvent>,
}

/// Tracking service kept entirely in memory.
#[derive(Debug)]
pub struct InMemoryTracker {
    app_url: String,
    store: Mutex<Store>,
    counter: AtomicU64,
}

impl InMemoryTracker {
    pub fn new(app_url: impl Into<String>) -> Self {
        Self {
            app_url: app_url.into(),
            store: Mutex::new(Store::default()),
            counter: AtomicU64::new(0),
        }
    }

    /// Parameters the service injects into records created under `sweep_id`.
    pub fn register_sweep(&self, sweep_id: impl Into<String>, params: ConfigMap) {
        self.lock().sweeps.insert(sweep_id.into(), params);
    }

    pub fn record(&self, id: &RecordId) -> Option<StoredRecord> {
        self.lock().records.get(id).cloned()
    }

    /// All records, oldest first.
    pub fn records(&self) -> Vec<StoredRecord> {
        let mut records: Vec<StoredRecord> = self.lock().records.values().cloned().collect();
        records.sort_by_key(|r| r.seq);
        records
    }

    /// Records filed under `group`, oldest first.
    pub fn records_in_group(&self, group: &str) -> Vec<StoredRecord> {
        self.records()
            .into_iter()
            .filter(|r| r.info.group.as_deref() == Some(group))
            .collect()
    }

    pub fn delete_record(&self, id: &RecordId) -> Option<StoredRecord> {
        self.lock().records.remove(id)
    }

    pub fn events(&self) -> Vec<TrackerEvent> {
        self.lock().events.clone()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Store> {
        // A panic while holding the lock leaves plain data behind; keep serving it.
        self.store
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn next_id(&self) -> RecordId {
        let simple = uuid::Uuid::new_v4().simple().to_string();
        RecordId::new(&simple[..8])
    }

    fn not_found(id: &RecordId) -> TrackingError {
        TrackingError::RecordNotFound { id: id.clone() }
    }
}

#[async_trait]
impl TrackerBackend for InMemoryTracker {
    async fn create_record(
        &self,
        project: &ProjectRef,
        record: &NewRecord,
    ) -> Result<RecordInfo, TrackingError> {
        let mut store = self.lock();
        // Ids are unique across projects; never replace another record.
        if let Some(requested) = &record.id
            && store.records.contains_key(requested)
        {
            return Err(TrackingError::RecordExists {
                id: requested.clone(),
            });
        }
        let id = record.id.clone().unwrap_or_else(|| self.next_id());
        let n = self.counter.fetch_add(1, Ordering::SeqCst) + 1;
        let now = Utc::now();

        let mut config = record
            .sweep_id
            .as_ref()
            .and_then(|sweep| store.sweeps.get(sweep).cloned())
            .unwrap_or_default();
        for (key, value) in &record.config {
            config.insert(key.clone(), value.clone());
        }

        let info = RecordInfo {
            id: id.clone(),
            name: Some(record.name.clone().unwrap_or_else(|| format!("run-{n}"))),
            group: record.group.clone(),
            job_type: record.job_type.clone(),
            sweep_id: record.sweep_id.clone(),
            config,
            notes: None,
            state: RecordState::Running,
            last_step: 0,
            created_at: now,
            updated_at: now,
        };
        store.records.insert(
            id.clone(),
            StoredRecord {
                seq: n,
                project: project.clone(),
                info: info.clone(),
                history: Vec::new(),
            },
        );
        store.events.push(TrackerEvent::Created(id));
        Ok(info)
    }

    async fn fetch_record(
        &self,
        project: &ProjectRef,
        id: &RecordId,
    ) -> Result<Option<RecordInfo>, TrackingError> {
        let mut store = self.lock();
        let found = store
            .records
            .get(id)
            .filter(|r| &r.project == project)
            .map(|r| r.info.clone());
        store.events.push(TrackerEvent::Fetched {
            id: id.clone(),
            found: found.is_some(),
        });
        Ok(found)
    }

    async fn update_record(
        &self,
        _project: &ProjectRef,
        id: &RecordId,
        update: &RecordUpdate,
    ) -> Result<(), TrackingError> {
        let mut store = self.lock();
        let record = store
            .records
            .get_mut(id)
            .ok_or_else(|| Self::not_found(id))?;
        if let Some(config) = &update.config {
            record.info.config = config.clone();
        }
        if let Some(notes) = &update.notes {
            record.info.notes = Some(notes.clone());
        }
        record.info.state = RecordState::Running;
        record.info.updated_at = Utc::now();
        store.events.push(TrackerEvent::Updated(id.clone()));
        Ok(())
    }

    async fn append_metrics(
        &self,
        _project: &ProjectRef,
        id: &RecordId,
        step: u64,
        metrics: &MetricMap,
    ) -> Result<(), TrackingError> {
        let mut store = self.lock();
        let record = store
            .records
            .get_mut(id)
            .ok_or_else(|| Self::not_found(id))?;
        record.history.push((step, metrics.clone()));
        record.info.last_step = record.info.last_step.max(step + 1);
        record.info.state = RecordState::Running;
        record.info.updated_at = Utc::now();
        store.events.push(TrackerEvent::Logged {
            id: id.clone(),
            metrics: metrics.clone(),
        });
        Ok(())
    }

    async fn finish_record(
        &self,
        _project: &ProjectRef,
        id: &RecordId,
    ) -> Result<(), TrackingError> {
        let mut store = self.lock();
        let record = store
            .records
            .get_mut(id)
            .ok_or_else(|| Self::not_found(id))?;
        record.info.state = RecordState::Finished;
        record.info.updated_at = Utc::now();
        store.events.push(TrackerEvent::Finished(id.clone()));
        Ok(())
    }

    fn app_url(&self) -> &str {
        &self.app_url
    }
}
