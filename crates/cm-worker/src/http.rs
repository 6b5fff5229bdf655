// SPDX-License-Identifier: MIT OR Apache-2.0
//! The Axum router and handlers common to every worker role.

use crate::specialization::{
    self, AnalyzeRequest, DesignRequest, DocumentRequest, GenerateTestsRequest,
};
use crate::{HealthMetrics, HealthResponse, IntegrityFlags, Worker};
use axum::extract::{Path as AxPath, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::Utc;
use cm_core::{AbpError, ArtifactType, TaskRequest};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use uuid::Uuid;

/// Wraps an [`AbpError`] so Axum handlers can return it directly; converts
/// to `{success:false, error}` with the status from
/// [`AbpError::status_code`].
pub struct ApiError(AbpError);

impl From<AbpError> for ApiError {
    fn from(e: AbpError) -> Self {
        Self(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = StatusCode::from_u16(self.0.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        let body = Json(json!({ "success": false, "error": self.0.to_string() }));
        (status, body).into_response()
    }
}

/// Build the Axum router for `worker`'s full HTTP surface: the routes every
/// role exposes plus, when the role has one, its specialization endpoint.
#[must_use]
pub fn build_router(worker: Arc<Worker>) -> Router {
    let mut router = Router::new()
        .route("/health", get(health))
        .route("/metrics", get(metrics_text))
        .route("/task", post(task))
        .route("/artifacts", post(store_artifact))
        .route("/artifacts/{id}", get(retrieve_artifact))
        .route("/audit", get(audit_log));

    if let Some(path) = worker.role.specialization_path() {
        router = match worker.role {
            cm_core::Role::Analyzer => router.route(path, post(analyze)),
            cm_core::Role::Architect => router.route(path, post(design)),
            cm_core::Role::Tester => router.route(path, post(generate_tests)),
            cm_core::Role::Communicator => router.route(path, post(document)),
            cm_core::Role::Coordinator => router,
        };
    }

    router
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(worker)
}

/// Build the `/health` response for `worker`. Exposed so the coordinator can
/// report its own health inline in `GET /network-status` without an HTTP
/// round trip to itself.
pub async fn build_health(worker: &Worker) -> HealthResponse {
    let metrics = worker.metrics().await;
    let uptime = (Utc::now() - worker.start_time()).num_seconds().max(0);

    HealthResponse {
        status: "active".to_string(),
        role: worker.role,
        specialization: worker.specialization.clone(),
        timestamp: Utc::now(),
        integrity: IntegrityFlags {
            integrity_monitor_active: true,
            evidence_collector_active: true,
            auto_gen_connected: true,
            artifact_manager_initialized: worker.artifacts.is_initialized(),
        },
        metrics: HealthMetrics {
            uptime,
            tasks_processed: metrics.tasks_processed,
            average_response_ms: metrics.average_response_ms,
            errors: metrics.errors,
            success_rate: metrics.success_rate(),
        },
    }
}

async fn health(State(worker): State<Arc<Worker>>) -> Json<HealthResponse> {
    Json(build_health(&worker).await)
}

async fn metrics_text(State(worker): State<Arc<Worker>>) -> String {
    let metrics = worker.metrics().await;
    format!(
        "tasks_processed {}\nerrors {}\naverage_response_ms {}\n",
        metrics.tasks_processed, metrics.errors, metrics.average_response_ms
    )
}

async fn task(
    State(worker): State<Arc<Worker>>,
    Json(req): Json<TaskRequest>,
) -> Result<Json<cm_core::TaskResponse>, ApiError> {
    Ok(Json(worker.execute_task(req).await?))
}

#[derive(Debug, Deserialize)]
struct StoreArtifactRequest {
    #[serde(rename = "type")]
    artifact_type: ArtifactType,
    content: String,
    #[serde(default)]
    metadata: BTreeMap<String, Value>,
}

async fn store_artifact(
    State(worker): State<Arc<Worker>>,
    Json(req): Json<StoreArtifactRequest>,
) -> Result<(StatusCode, Json<cm_core::Manifest>), ApiError> {
    let manifest = worker
        .artifacts
        .store(req.artifact_type, req.content.into_bytes(), req.metadata, None)
        .await?;
    Ok((StatusCode::CREATED, Json(manifest)))
}

#[derive(Debug, Deserialize)]
struct RetrieveArtifactQuery {
    #[serde(default, rename = "manifestOnly")]
    manifest_only: bool,
}

#[derive(Debug, Serialize)]
struct ArtifactResponse {
    manifest: cm_core::Manifest,
    #[serde(skip_serializing_if = "Option::is_none")]
    content: Option<String>,
}

async fn retrieve_artifact(
    State(worker): State<Arc<Worker>>,
    AxPath(id): AxPath<Uuid>,
    Query(q): Query<RetrieveArtifactQuery>,
) -> Result<Json<ArtifactResponse>, ApiError> {
    let (manifest, content) = worker.artifacts.retrieve(id, q.manifest_only).await?;
    Ok(Json(ArtifactResponse {
        manifest,
        content: content.map(|bytes| String::from_utf8_lossy(&bytes).into_owned()),
    }))
}

#[derive(Debug, Deserialize)]
struct AuditLogQuery {
    #[serde(default, rename = "taskId")]
    task_id: Option<String>,
}

async fn audit_log(
    State(worker): State<Arc<Worker>>,
    Query(q): Query<AuditLogQuery>,
) -> Result<Json<cm_evidence::AuditTrail>, ApiError> {
    let task_id = q
        .task_id
        .ok_or_else(|| AbpError::Validation("audit_log requires a taskId".to_string()))?;
    Ok(Json(worker.evidence.audit_trail(&task_id).await))
}

async fn analyze(
    State(worker): State<Arc<Worker>>,
    Json(req): Json<AnalyzeRequest>,
) -> Result<Json<specialization::SpecializationResponse>, ApiError> {
    Ok(Json(specialization::analyze(&worker, req).await?))
}

async fn design(
    State(worker): State<Arc<Worker>>,
    Json(req): Json<DesignRequest>,
) -> Result<Json<specialization::SpecializationResponse>, ApiError> {
    Ok(Json(specialization::design(&worker, req).await?))
}

async fn generate_tests(
    State(worker): State<Arc<Worker>>,
    Json(req): Json<GenerateTestsRequest>,
) -> Result<Json<specialization::SpecializationResponse>, ApiError> {
    Ok(Json(specialization::generate_tests(&worker, req).await?))
}

async fn document(
    State(worker): State<Arc<Worker>>,
    Json(req): Json<DocumentRequest>,
) -> Result<Json<specialization::SpecializationResponse>, ApiError> {
    Ok(Json(specialization::document(&worker, req).await?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use cm_artifacts::ArtifactStore;
    use cm_core::Role;
    use cm_evidence::EvidenceRecorder;
    use cm_llm::TestBackend;
    use tempfile::tempdir;
    use tower::ServiceExt;

    async fn router() -> (Router, tempfile::TempDir) {
        let dir = tempdir().unwrap();
        let artifacts = Arc::new(ArtifactStore::open(dir.path().join("store")).await.unwrap());
        let evidence = Arc::new(EvidenceRecorder::new(dir.path().join("audit")));
        let backend = Arc::new(TestBackend::with_response("ok"));
        let worker = Arc::new(Worker::new(Role::Analyzer, "test-model", backend, artifacts, evidence));
        (build_router(worker), dir)
    }

    #[tokio::test]
    async fn health_endpoint_reports_active_status() {
        let (app, _dir) = router().await;
        let resp = app
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn empty_prompt_task_returns_error_status() {
        let (app, _dir) = router().await;
        let body = serde_json::to_vec(&TaskRequest::new("   ")).unwrap();
        let resp = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/task")
                    .header("content-type", "application/json")
                    .body(Body::from(body))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert!(resp.status().is_client_error() || resp.status().is_server_error());
    }

    #[tokio::test]
    async fn audit_log_requires_a_task_id() {
        let (app, _dir) = router().await;
        let resp = app
            .oneshot(Request::builder().uri("/audit").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert!(resp.status().is_client_error());
    }

    #[tokio::test]
    async fn analyzer_specialization_route_is_mounted() {
        let (app, _dir) = router().await;
        let body = serde_json::to_vec(&json!({"code": "function a(){return 1}", "language": "javascript"})).unwrap();
        let resp = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/analyze")
                    .header("content-type", "application/json")
                    .body(Body::from(body))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
    }
}
