//! Single-fold execution.

use crate::error::SweepError;
use crate::tracking::{
    ConfigMap, MetricMap, OpenOptions, RecordId, ResumePolicy, TrackingClient,
};
use crate::work::WorkFunction;
use serde::{Deserialize, Serialize};
use tracing::info;

/// Everything one fold needs. `config` is owned: the fold works on its own snapshot.
#[derive(Debug, Clone)]
pub struct FoldSpec {
    pub fold_index: usize,
    pub group_id: String,
    pub job_label: String,
    pub config: ConfigMap,
    pub metric: String,
}

impl FoldSpec {
    pub fn display_name(&self) -> String {
        display_name(&self.job_label, self.fold_index)
    }
}

/// Result of one completed fold.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FoldOutcome {
    pub fold_index: usize,
    pub record_id: RecordId,
    pub display_name: String,
    pub value: f64,
}

pub fn display_name(job_label: &str, fold_index: usize) -> String {
    format!("{job_label}-{fold_index}")
}

/// Run one fold in a brand-new child record.
///
/// The session is opened with [`ResumePolicy::Never`], so a run id still
/// published by the parent or a sibling is ignored and a new record is
/// always created. If `work` fails the error is returned and the fold
/// session is left open; the whole sweep is expected to abort.
pub async fn run_fold(
    client: &mut TrackingClient,
    work: &mut dyn WorkFunction,
    spec: FoldSpec,
) -> Result<FoldOutcome, SweepError> {
    let display_name = spec.display_name();
    let options = OpenOptions {
        id: None,
        resume: ResumePolicy::Never,
        name: Some(display_name.clone()),
        group: Some(spec.group_id.clone()),
        job_type: Some(spec.job_label.clone()),
        config: spec.config.clone(),
        ..OpenOptions::default()
    };
    let mut session = client.open(options).await?;

    let value = work
        .evaluate(&spec.config)
        .map_err(|source| SweepError::Work {
            fold_index: spec.fold_index,
            source,
        })?;

    let metrics = MetricMap::from([(spec.metric.clone(), value)]);
    client.log(&mut session, &metrics).await?;
    client.close(&mut session).await?;

    info!(
        fold = spec.fold_index,
        record_id = %session.id(),
        name = %display_name,
        value,
        "Fold complete"
    );

    Ok(FoldOutcome {
        fold_index: spec.fold_index,
        record_id: session.id().clone(),
        display_name,
        value,
    })
}
