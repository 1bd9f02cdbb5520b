//! Drives the HTTP backend against a local axum service backed by the in-memory tracker.

use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use foldsweep_core::tracking::http::HistoryRow;
use foldsweep_core::tracking::{NewRecord, RecordInfo, RecordState, RecordUpdate};
use foldsweep_core::{
    AmbientState, ConfigMap, HttpTracker, InMemoryTracker, OpenOptions, ProjectRef, RecordId,
    SweepError, SweepOrchestrator, SweepSettings, TrackerBackend, TrackingClient, TrackingError,
};
use pretty_assertions::assert_eq;
use serde_json::json;
use std::sync::Arc;

const API_KEY: &str = "test-key";
const APP_URL: &str = "https://app.tracker.test";

type Service = Arc<InMemoryTracker>;

struct ApiError(StatusCode, String);

impl From<TrackingError> for ApiError {
    fn from(err: TrackingError) -> Self {
        match err {
            TrackingError::RecordNotFound { .. } => {
                ApiError(StatusCode::NOT_FOUND, err.to_string())
            }
            TrackingError::RecordExists { .. } => ApiError(StatusCode::CONFLICT, err.to_string()),
            other => ApiError(StatusCode::INTERNAL_SERVER_ERROR, other.to_string()),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.0, self.1).into_response()
    }
}

fn authorize(headers: &HeaderMap) -> Result<(), ApiError> {
    let expected = format!("Bearer {API_KEY}");
    match headers.get(header::AUTHORIZATION).and_then(|v| v.to_str().ok()) {
        Some(value) if value == expected => Ok(()),
        _ => Err(ApiError(StatusCode::UNAUTHORIZED, "invalid api key".into())),
    }
}

async fn create_run(
    State(service): State<Service>,
    Path((entity, project)): Path<(String, String)>,
    headers: HeaderMap,
    Json(body): Json<NewRecord>,
) -> Result<Json<RecordInfo>, ApiError> {
    authorize(&headers)?;
    let info = service
        .create_record(&ProjectRef::new(entity, project), &body)
        .await?;
    Ok(Json(info))
}

async fn fetch_run(
    State(service): State<Service>,
    Path((entity, project, id)): Path<(String, String, String)>,
    headers: HeaderMap,
) -> Result<Json<RecordInfo>, ApiError> {
    authorize(&headers)?;
    let id = RecordId::new(id);
    service
        .fetch_record(&ProjectRef::new(entity, project), &id)
        .await?
        .map(Json)
        .ok_or(ApiError(StatusCode::NOT_FOUND, format!("no run {id}")))
}

async fn update_run(
    State(service): State<Service>,
    Path((entity, project, id)): Path<(String, String, String)>,
    headers: HeaderMap,
    Json(body): Json<RecordUpdate>,
) -> Result<StatusCode, ApiError> {
    authorize(&headers)?;
    service
        .update_record(&ProjectRef::new(entity, project), &RecordId::new(id), &body)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn append_history(
    State(service): State<Service>,
    Path((entity, project, id)): Path<(String, String, String)>,
    headers: HeaderMap,
    Json(row): Json<HistoryRow>,
) -> Result<StatusCode, ApiError> {
    authorize(&headers)?;
    service
        .append_metrics(
            &ProjectRef::new(entity, project),
            &RecordId::new(id),
            row.step,
            &row.metrics,
        )
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn finish_run(
    State(service): State<Service>,
    Path((entity, project, id)): Path<(String, String, String)>,
    headers: HeaderMap,
) -> Result<StatusCode, ApiError> {
    authorize(&headers)?;
    service
        .finish_record(&ProjectRef::new(entity, project), &RecordId::new(id))
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

/// Start the service on an ephemeral port and return its base URL.
async fn spawn_service(service: Service) -> String {
    let app = Router::new()
        .route("/api/v1/projects/{entity}/{project}/runs", post(create_run))
        .route(
            "/api/v1/projects/{entity}/{project}/runs/{id}",
            get(fetch_run).patch(update_run),
        )
        .route(
            "/api/v1/projects/{entity}/{project}/runs/{id}/history",
            post(append_history),
        )
        .route(
            "/api/v1/projects/{entity}/{project}/runs/{id}/finish",
            post(finish_run),
        )
        .with_state(service);

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{addr}")
}

async fn http_client(service: &Service, api_key: &str) -> TrackingClient {
    let base_url = spawn_service(service.clone()).await;
    let backend = Arc::new(HttpTracker::new(
        base_url,
        Some(APP_URL.to_string()),
        Some(api_key.to_string()),
    ));
    TrackingClient::new(backend, ProjectRef::new("lab", "cv"), AmbientState::new())
}

#[tokio::test]
async fn test_sweep_over_http() {
    let service: Service = Arc::new(InMemoryTracker::new(APP_URL));
    let client = http_client(&service, API_KEY).await;
    let mut orch = SweepOrchestrator::new(client, SweepSettings::default().with_num_folds(3));

    let mut scores = vec![0.7, 0.9, 0.8].into_iter();
    let mut work = move |_: &ConfigMap| -> anyhow::Result<f64> {
        scores
            .next()
            .ok_or_else(|| anyhow::anyhow!("no more scores"))
    };
    let mut config = ConfigMap::new();
    config.insert("generator.seed".into(), json!(7));

    let summary = orch.run(&mut work, config.clone()).await.unwrap();

    assert!((summary.aggregate - 0.8).abs() < 1e-9);
    assert_eq!(summary.project_url, format!("{APP_URL}/lab/cv"));

    let parent = service.record(&summary.sweep_record_id).unwrap();
    assert_eq!(parent.project, ProjectRef::new("lab", "cv"));
    assert_eq!(parent.info.config, config);
    assert_eq!(parent.info.state, RecordState::Finished);
    assert_eq!(parent.metric_values("mean_val_accuracy").len(), 1);

    let folds = service.records_in_group(&summary.sweep_group_id);
    let values: Vec<f64> = folds
        .iter()
        .flat_map(|f| f.metric_values("val_accuracy"))
        .collect();
    assert_eq!(values, vec![0.7, 0.9, 0.8]);
}

#[tokio::test]
async fn test_missing_record_maps_to_not_found() {
    let service: Service = Arc::new(InMemoryTracker::new(APP_URL));
    let mut client = http_client(&service, API_KEY).await;

    let err = client
        .open(OpenOptions::resume(RecordId::new("gone1234")))
        .await
        .unwrap_err();
    assert!(matches!(err, TrackingError::RecordNotFound { ref id } if id.as_str() == "gone1234"));
}

#[tokio::test]
async fn test_deleted_record_rejects_updates() {
    let service: Service = Arc::new(InMemoryTracker::new(APP_URL));
    let mut client = http_client(&service, API_KEY).await;

    let mut session = client.open(OpenOptions::new()).await.unwrap();
    service.delete_record(session.id());

    let err = client
        .set_notes(&mut session, "never stored")
        .await
        .unwrap_err();
    assert!(matches!(err, TrackingError::RecordNotFound { .. }));
}

#[tokio::test]
async fn test_rejected_credentials_surface_as_api_error() {
    let service: Service = Arc::new(InMemoryTracker::new(APP_URL));
    let client = http_client(&service, "wrong-key").await;
    let mut orch = SweepOrchestrator::new(client, SweepSettings::default());

    let mut work = |_: &ConfigMap| Ok::<_, anyhow::Error>(1.0);
    let err = orch.run(&mut work, ConfigMap::new()).await.unwrap_err();

    assert!(matches!(
        err,
        SweepError::Tracking(TrackingError::Api { status: 401, .. })
    ));
    assert!(service.records().is_empty());

    // Nothing was opened, so nothing is left attached.
    assert!(orch.into_client().active().is_none());
}

#[tokio::test]
async fn test_taken_id_maps_to_record_exists() {
    let service: Service = Arc::new(InMemoryTracker::new(APP_URL));
    let mut client = http_client(&service, API_KEY).await;
    let mut first = client.open(OpenOptions::new()).await.unwrap();
    client.close(&mut first).await.unwrap();

    let options = OpenOptions {
        id: Some(first.id().clone()),
        ..OpenOptions::fresh()
    };
    let err = client.open(options).await.unwrap_err();

    assert!(matches!(err, TrackingError::RecordExists { ref id } if id == first.id()));
    assert_eq!(service.records().len(), 1);
}
