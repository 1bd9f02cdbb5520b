//! Cross-validation sweep orchestration.
//!
//! One parent record, `num_folds` child records filed under its group, and a
//! mean score appended to the parent after it is reopened by id:
//!
//! ```text
//! Init -> Configured -> FoldsRunning -> Aggregated -> Done
//! ```
//!
//! Any error moves the orchestrator to `Failed` and is returned unchanged.
//! Nothing is closed on the way out: a parent or fold record that was open
//! when the error hit stays open on the service.

use crate::config::SweepSettings;
use crate::error::SweepError;
use crate::fold::{FoldOutcome, FoldSpec, run_fold};
use crate::tracking::{ConfigMap, MetricMap, OpenOptions, RecordId, TrackingClient};
use crate::work::WorkFunction;
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::{info, warn};

/// Orchestrator lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SweepPhase {
    Init,
    Configured,
    FoldsRunning,
    Aggregated,
    Done,
    Failed,
}

impl fmt::Display for SweepPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Init => write!(f, "init"),
            Self::Configured => write!(f, "configured"),
            Self::FoldsRunning => write!(f, "folds_running"),
            Self::Aggregated => write!(f, "aggregated"),
            Self::Done => write!(f, "done"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

/// What a finished sweep produced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SweepSummary {
    pub sweep_record_id: RecordId,
    pub sweep_group_id: String,
    pub sweep_run_name: String,
    pub project_url: String,
    pub group_url: String,
    pub sweep_url: Option<String>,
    pub folds: Vec<FoldOutcome>,
    pub aggregate: f64,
}

impl SweepSummary {
    pub fn fold_values(&self) -> Vec<f64> {
        self.folds.iter().map(|f| f.value).collect()
    }
}

/// Arithmetic mean; an empty slice is an error rather than a division by zero.
pub fn mean(values: &[f64]) -> Result<f64, SweepError> {
    if values.is_empty() {
        return Err(SweepError::EmptyResultSet);
    }
    Ok(values.iter().sum::<f64>() / values.len() as f64)
}

/// Parent record as captured before the folds run.
struct ParentRecord {
    id: RecordId,
    group_id: String,
    run_name: String,
    project_url: String,
    group_url: String,
    sweep_url: Option<String>,
    config: ConfigMap,
}

/// Drives one sweep against a [`TrackingClient`].
pub struct SweepOrchestrator {
    client: TrackingClient,
    settings: SweepSettings,
    phase: SweepPhase,
}

impl SweepOrchestrator {
    pub fn new(client: TrackingClient, settings: SweepSettings) -> Self {
        Self {
            client,
            settings,
            phase: SweepPhase::Init,
        }
    }

    pub fn phase(&self) -> SweepPhase {
        self.phase
    }

    pub fn settings(&self) -> &SweepSettings {
        &self.settings
    }

    pub fn client(&self) -> &TrackingClient {
        &self.client
    }

    pub fn into_client(self) -> TrackingClient {
        self.client
    }

    /// Run the full protocol once. `config` is the resolved configuration
    /// stamped on the parent record.
    pub async fn run(
        &mut self,
        work: &mut dyn WorkFunction,
        config: ConfigMap,
    ) -> Result<SweepSummary, SweepError> {
        if self.phase != SweepPhase::Init {
            warn!(phase = %self.phase, "Sweep orchestrator reused; starting over");
            self.phase = SweepPhase::Init;
        }
        match self.drive(work, config).await {
            Ok(summary) => Ok(summary),
            Err(err) => {
                warn!(phase = %self.phase, error = %err, "Sweep aborted");
                self.phase = SweepPhase::Failed;
                Err(err)
            }
        }
    }

    async fn drive(
        &mut self,
        work: &mut dyn WorkFunction,
        config: ConfigMap,
    ) -> Result<SweepSummary, SweepError> {
        let num_folds = self.settings.num_folds;
        if num_folds == 0 {
            return Err(SweepError::EmptyResultSet);
        }

        let parent = self.configure(config).await?;

        self.transition(SweepPhase::FoldsRunning);
        let mut folds = Vec::with_capacity(num_folds);
        for fold_index in 0..num_folds {
            // Every fold re-publishes its own identity, so the reset is per fold.
            self.client.reset_environment(self.settings.preserve_env.as_slice());
            let spec = FoldSpec {
                fold_index,
                group_id: parent.group_id.clone(),
                job_label: parent.run_name.clone(),
                config: parent.config.clone(),
                metric: self.settings.fold_metric.clone(),
            };
            folds.push(run_fold(&mut self.client, work, spec).await?);
        }

        let values: Vec<f64> = folds.iter().map(|f| f.value).collect();
        let aggregate = mean(&values)?;
        self.transition(SweepPhase::Aggregated);
        info!(aggregate, folds = values.len(), "Aggregated fold results");

        self.client.reset_environment(self.settings.preserve_env.as_slice());
        let mut session = self.client.open(OpenOptions::resume(parent.id.clone())).await?;
        let metrics = MetricMap::from([(self.settings.aggregate_metric.clone(), aggregate)]);
        self.client.log(&mut session, &metrics).await?;
        self.client.close(&mut session).await?;
        self.transition(SweepPhase::Done);

        Ok(SweepSummary {
            sweep_record_id: parent.id,
            sweep_group_id: parent.group_id,
            sweep_run_name: parent.run_name,
            project_url: parent.project_url,
            group_url: parent.group_url,
            sweep_url: parent.sweep_url,
            folds,
            aggregate,
        })
    }

    /// Create the parent record, stamp config and the group link, close it.
    async fn configure(&mut self, config: ConfigMap) -> Result<ParentRecord, SweepError> {
        let mut session = self.client.open(OpenOptions::new()).await?;
        let group_id = session.sweep_group_id();
        let group_url = session.group_url(&group_id);

        self.client.update_config(&mut session, &config, true).await?;
        self.client.set_notes(&mut session, group_url.clone()).await?;

        let parent = ParentRecord {
            id: session.id().clone(),
            run_name: session.label().to_string(),
            project_url: session.project_url().to_string(),
            sweep_url: session.sweep_url(),
            config: session.config().clone(),
            group_id,
            group_url,
        };
        self.client.close(&mut session).await?;
        self.transition(SweepPhase::Configured);
        info!(
            record_id = %parent.id,
            group = %parent.group_id,
            name = %parent.run_name,
            "Sweep record configured"
        );
        Ok(parent)
    }

    fn transition(&mut self, next: SweepPhase) {
        info!(from = %self.phase, to = %next, "Sweep phase transition");
        self.phase = next;
    }
}
