//! REST client for a remote tracking service.
//!
//! Endpoints, relative to `base_url`:
//!
//! | Method  | Path                                                 |
//! |---------|------------------------------------------------------|
//! | `POST`  | `/api/v1/projects/{entity}/{project}/runs`           |
//! | `GET`   | `/api/v1/projects/{entity}/{project}/runs/{id}`      |
//! | `PATCH` | `/api/v1/projects/{entity}/{project}/runs/{id}`      |
//! | `POST`  | `/api/v1/projects/{entity}/{project}/runs/{id}/history` |
//! | `POST`  | `/api/v1/projects/{entity}/{project}/runs/{id}/finish`  |
//!
//! Requests are sent once; transport failures surface immediately.

use super::{MetricMap, NewRecord, ProjectRef, RecordId, RecordInfo, RecordUpdate, TrackerBackend};
use crate::error::TrackingError;
use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Body of a history append.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryRow {
    pub step: u64,
    pub metrics: MetricMap,
}

/// Tracking backend speaking JSON over HTTP.
pub struct HttpTracker {
    client: Client,
    base_url: String,
    app_url: String,
    api_key: Option<String>,
}

impl HttpTracker {
    /// `app_url` defaults to `base_url` when the web UI is served from the same host.
    pub fn new(base_url: impl Into<String>, app_url: Option<String>, api_key: Option<String>) -> Self {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        let app_url = app_url
            .map(|u| u.trim_end_matches('/').to_string())
            .unwrap_or_else(|| base_url.clone());
        Self {
            client: Client::new(),
            base_url,
            app_url,
            api_key,
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn runs_url(&self, project: &ProjectRef) -> String {
        format!(
            "{}/api/v1/projects/{}/{}/runs",
            self.base_url, project.entity, project.project
        )
    }

    pub fn run_url(&self, project: &ProjectRef, id: &RecordId) -> String {
        format!("{}/{}", self.runs_url(project), id)
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.api_key {
            Some(key) => request.bearer_auth(key),
            None => request,
        }
    }

    async fn send(&self, request: RequestBuilder) -> Result<Response, TrackingError> {
        Ok(self.authorize(request).send().await?)
    }

    /// Map a non-success status to an error. 404 means the record is gone.
    async fn check(response: Response, id: Option<&RecordId>) -> Result<Response, TrackingError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        Err(map_status(status, &body, id))
    }
}

pub(crate) fn map_status(status: StatusCode, body: &str, id: Option<&RecordId>) -> TrackingError {
    match (status, id) {
        (StatusCode::NOT_FOUND, Some(id)) => TrackingError::RecordNotFound { id: id.clone() },
        _ => TrackingError::Api {
            status: status.as_u16(),
            message: if body.is_empty() {
                status
                    .canonical_reason()
                    .unwrap_or("unknown status")
                    .to_string()
            } else {
                body.to_string()
            },
        },
    }
}

#[async_trait]
impl TrackerBackend for HttpTracker {
    async fn create_record(
        &self,
        project: &ProjectRef,
        record: &NewRecord,
    ) -> Result<RecordInfo, TrackingError> {
        let url = self.runs_url(project);
        debug!(url = %url, "Creating tracking record");
        let response = self.send(self.client.post(&url).json(record)).await?;
        if let Some(id) = &record.id
            && response.status() == StatusCode::CONFLICT
        {
            return Err(TrackingError::RecordExists { id: id.clone() });
        }
        let response = Self::check(response, None).await?;
        Ok(response.json().await?)
    }

    async fn fetch_record(
        &self,
        project: &ProjectRef,
        id: &RecordId,
    ) -> Result<Option<RecordInfo>, TrackingError> {
        let url = self.run_url(project, id);
        debug!(url = %url, "Fetching tracking record");
        let response = self.send(self.client.get(&url)).await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let response = Self::check(response, Some(id)).await?;
        Ok(Some(response.json().await?))
    }

    async fn update_record(
        &self,
        project: &ProjectRef,
        id: &RecordId,
        update: &RecordUpdate,
    ) -> Result<(), TrackingError> {
        let url = self.run_url(project, id);
        let response = self.send(self.client.patch(&url).json(update)).await?;
        Self::check(response, Some(id)).await?;
        Ok(())
    }

    async fn append_metrics(
        &self,
        project: &ProjectRef,
        id: &RecordId,
        step: u64,
        metrics: &MetricMap,
    ) -> Result<(), TrackingError> {
        let url = format!("{}/history", self.run_url(project, id));
        let row = HistoryRow {
            step,
            metrics: metrics.clone(),
        };
        let response = self.send(self.client.post(&url).json(&row)).await?;
        Self::check(response, Some(id)).await?;
        Ok(())
    }

    async fn finish_record(
        &self,
        project: &ProjectRef,
        id: &RecordId,
    ) -> Result<(), TrackingError> {
        let url = format!("{}/finish", self.run_url(project, id));
        let response = self.send(self.client.post(&url)).await?;
        Self::check(response, Some(id)).await?;
        Ok(())
    }

    fn app_url(&self) -> &str {
        &self.app_url
    }
}
