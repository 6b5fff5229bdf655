// SPDX-License-Identifier: MIT OR Apache-2.0
#![doc = "Omega: delegates and orchestrates across the clone mesh."]
#![deny(unsafe_code)]
#![warn(missing_docs)]

//! The coordinator is a [`cm_worker::Worker`] (role
//! [`Role::Coordinator`](cm_core::Role::Coordinator)) with three extra
//! routes merged onto the common worker router: `GET /network-status`,
//! `POST /delegate`, `POST /orchestrate`. It is not a distinct
//! implementation — `build_router` here composes
//! [`cm_worker::http::build_router`]'s output with
//! [`Router::merge`](axum::Router::merge), per the worker runtime's
//! polymorphism-over-clone-roles design.

use axum::extract::State;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use cm_core::{AbpError, Execution, Manifest, Role, TaskRequest, TaskResponse};
use cm_evidence::EvidenceRecorder;
use cm_quality::ContextInput;
use cm_worker::{build_health, HealthResponse, Worker};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

const DELEGATE_TIMEOUT: Duration = Duration::from_secs(30);
const ORCHESTRATE_TIMEOUT: Duration = Duration::from_secs(60);
const NETWORK_STATUS_PROBE_TIMEOUT: Duration = Duration::from_secs(5);

/// The coordinator's view of where every clone in the mesh lives.
///
/// Seeded from [`Role::ALL`] and [`Role::default_external_port`] on
/// construction; [`Registry::register`] overrides an entry, e.g. when a
/// peer runs on a non-default host or port.
pub struct Registry {
    bases: tokio::sync::RwLock<HashMap<Role, String>>,
}

impl Registry {
    /// Build a registry with every non-coordinator role pointing at
    /// `http://127.0.0.1:<default_external_port>`.
    #[must_use]
    pub fn with_defaults() -> Self {
        let mut bases = HashMap::new();
        for role in Role::ALL {
            if role == Role::Coordinator {
                continue;
            }
            bases.insert(role, format!("http://127.0.0.1:{}", role.default_external_port()));
        }
        Self {
            bases: tokio::sync::RwLock::new(bases),
        }
    }

    /// Override (or add) the base URL for `role`.
    pub async fn register(&self, role: Role, base_url: impl Into<String>) {
        self.bases.write().await.insert(role, base_url.into());
    }

    /// The base URL currently on file for `role`, if any.
    pub async fn base_url(&self, role: Role) -> Option<String> {
        self.bases.read().await.get(&role).cloned()
    }

    /// Every role this registry knows a base URL for.
    pub async fn known_roles(&self) -> Vec<Role> {
        self.bases.read().await.keys().copied().collect()
    }
}

/// The coordinator: a worker plus the registry and HTTP client it needs to
/// delegate to peers.
pub struct Coordinator {
    /// The underlying worker (role is always [`Role::Coordinator`]).
    pub worker: Arc<Worker>,
    /// Known peer base URLs.
    pub registry: Registry,
    client: reqwest::Client,
}

impl Coordinator {
    /// Build a coordinator around `worker`, seeding its registry with
    /// default peer addresses.
    #[must_use]
    pub fn new(worker: Arc<Worker>) -> Self {
        Self {
            worker,
            registry: Registry::with_defaults(),
            client: reqwest::Client::new(),
        }
    }
}

/// Build the coordinator's full router: the common worker surface plus
/// `/network-status`, `/delegate`, `/orchestrate`.
#[must_use]
pub fn build_router(coordinator: Arc<Coordinator>) -> Router {
    let worker_routes = cm_worker::build_router(Arc::clone(&coordinator.worker));
    let coordinator_routes = Router::new()
        .route("/network-status", get(network_status))
        .route("/delegate", post(delegate))
        .route("/orchestrate", post(orchestrate))
        .with_state(coordinator);

    worker_routes.merge(coordinator_routes)
}

struct ApiError(AbpError);

impl From<AbpError> for ApiError {
    fn from(e: AbpError) -> Self {
        Self(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = axum::http::StatusCode::from_u16(self.0.status_code())
            .unwrap_or(axum::http::StatusCode::INTERNAL_SERVER_ERROR);
        (status, Json(serde_json::json!({ "success": false, "error": self.0.to_string() }))).into_response()
    }
}

/// One peer's reported health, or the failure reason the probe hit.
#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
enum PeerStatus {
    Reachable(HealthResponse),
    Unreachable { error: String },
}

#[derive(Debug, Serialize)]
struct NetworkStatusResponse {
    coordinator: HealthResponse,
    clones: BTreeMap<String, PeerStatus>,
}

async fn probe_peer(client: &reqwest::Client, base_url: &str) -> PeerStatus {
    let url = format!("{base_url}/health");
    match client
        .get(&url)
        .timeout(NETWORK_STATUS_PROBE_TIMEOUT)
        .send()
        .await
    {
        Ok(resp) => match resp.json::<HealthResponse>().await {
            Ok(health) => PeerStatus::Reachable(health),
            Err(e) => PeerStatus::Unreachable { error: e.to_string() },
        },
        Err(e) => PeerStatus::Unreachable { error: e.to_string() },
    }
}

/// `GET /network-status`: this coordinator's own health, inlined without an
/// HTTP round trip to itself, plus a best-effort `/health` probe of every
/// registered peer. An unreachable peer is reported, never treated as a
/// request failure.
async fn network_status(State(coordinator): State<Arc<Coordinator>>) -> Json<NetworkStatusResponse> {
    let coordinator_health = build_health(&coordinator.worker).await;
    let roles = coordinator.registry.known_roles().await;

    let mut clones = BTreeMap::new();
    for role in roles {
        if let Some(base_url) = coordinator.registry.base_url(role).await {
            let status = probe_peer(&coordinator.client, &base_url).await;
            clones.insert(role.as_str().to_string(), status);
        }
    }

    Json(NetworkStatusResponse {
        coordinator: coordinator_health,
        clones,
    })
}

/// `POST /delegate` request body.
#[derive(Debug, Deserialize)]
struct DelegateRequest {
    target_clone: String,
    prompt: String,
    #[serde(default)]
    context: BTreeMap<String, Value>,
    #[serde(default)]
    session_id: Option<String>,
}

/// `POST /delegate`: forward a task directly to `target_clone`, no quality
/// gate. `target_clone` is parsed with [`Role::from_str`], so an
/// unrecognized name naturally surfaces as [`AbpError::UnknownClone`]
/// without a separate registry-membership check.
async fn delegate(
    State(coordinator): State<Arc<Coordinator>>,
    Json(req): Json<DelegateRequest>,
) -> Result<Json<TaskResponse>, ApiError> {
    let role = Role::from_str(&req.target_clone)
        .map_err(|_| AbpError::UnknownClone(req.target_clone.clone()))?;

    let base_url = coordinator
        .registry
        .base_url(role)
        .await
        .ok_or_else(|| AbpError::UnknownClone(req.target_clone.clone()))?;

    let task_req = TaskRequest {
        prompt: req.prompt,
        context: req.context,
        session_id: req.session_id,
        require_evidence: false,
    };

    let response = forward_task(&coordinator.client, &base_url, &task_req, DELEGATE_TIMEOUT).await?;
    Ok(Json(response))
}

async fn forward_task(
    client: &reqwest::Client,
    base_url: &str,
    req: &TaskRequest,
    timeout: Duration,
) -> Result<TaskResponse, AbpError> {
    let url = format!("{base_url}/task");
    let resp = client
        .post(&url)
        .timeout(timeout)
        .json(req)
        .send()
        .await
        .map_err(|e| {
            if e.is_timeout() {
                AbpError::BackendTimeout(timeout)
            } else {
                AbpError::Backend(e.to_string())
            }
        })?;

    if !resp.status().is_success() {
        return Err(AbpError::Backend(format!(
            "peer returned status {}",
            resp.status()
        )));
    }

    resp.json::<TaskResponse>()
        .await
        .map_err(|e| AbpError::Backend(e.to_string()))
}

/// `POST /orchestrate` request body.
#[derive(Debug, Deserialize)]
struct OrchestrateRequest {
    objective: String,
    target_clone: String,
    #[serde(default)]
    artifact_manifests: Vec<Manifest>,
    #[serde(default)]
    essential_data: BTreeMap<String, Value>,
    #[serde(default)]
    constraints: Vec<String>,
    #[serde(default)]
    session_id: Option<String>,
}

#[derive(Debug, Serialize)]
struct OrchestrationSummary {
    task_id: String,
    start_time: DateTime<Utc>,
    end_time: DateTime<Utc>,
    duration_ms: u64,
}

#[derive(Debug, Serialize)]
struct OrchestrateResponse {
    success: bool,
    result: String,
    context_quality: cm_core::QualityScore,
    orchestration: OrchestrationSummary,
}

/// `POST /orchestrate`: build a quality-scored [`ContextEnvelope`], reject
/// below the quality gate without ever contacting the target, otherwise
/// forward to the target's `/task` and record an `orchestration` evidence
/// event once the downstream response is in hand.
///
/// [`ContextEnvelope`]: cm_core::ContextEnvelope
async fn orchestrate(
    State(coordinator): State<Arc<Coordinator>>,
    Json(req): Json<OrchestrateRequest>,
) -> Result<Json<OrchestrateResponse>, ApiError> {
    let target_clone = Role::from_str(&req.target_clone)
        .map_err(|_| AbpError::UnknownClone(req.target_clone.clone()))?;

    let envelope = cm_quality::construct_context_package(ContextInput {
        objective: req.objective,
        target_clone,
        essential_data: req.essential_data,
        constraints: req.constraints,
        artifact_manifests: req.artifact_manifests,
    })?;

    if envelope.quality.is_warning() {
        warn!(
            overall_quality = envelope.quality.overall_quality,
            target = %target_clone,
            "context envelope in quality warning band, proceeding"
        );
        record_quality_warning_evidence(
            &coordinator.worker.evidence,
            &envelope.context_id.to_string(),
            target_clone,
            envelope.quality.overall_quality,
        )
        .await;
    }

    let base_url = coordinator
        .registry
        .base_url(target_clone)
        .await
        .ok_or_else(|| AbpError::UnknownClone(req.target_clone.clone()))?;

    let context_json: BTreeMap<String, Value> = [
        ("essential_data".to_string(), serde_json::to_value(&envelope.essential_data).unwrap_or_default()),
        ("constraints".to_string(), serde_json::to_value(&envelope.constraints).unwrap_or_default()),
        (
            "artifact_manifests".to_string(),
            serde_json::to_value(&envelope.artifact_manifests).unwrap_or_default(),
        ),
    ]
    .into_iter()
    .collect();

    let task_req = TaskRequest {
        prompt: envelope.objective.clone(),
        context: context_json,
        session_id: req.session_id,
        require_evidence: false,
    };

    let task_id = envelope.context_id.to_string();
    let start_time = Utc::now();

    let downstream = forward_task(&coordinator.client, &base_url, &task_req, ORCHESTRATE_TIMEOUT).await;

    let end_time = Utc::now();
    let duration_ms = (end_time - start_time).num_milliseconds().max(0) as u64;

    let execution = if downstream.is_ok() { Execution::Real } else { Execution::Failed };
    record_orchestration_evidence(
        &coordinator.worker.evidence,
        &task_id,
        target_clone,
        duration_ms,
        execution,
        downstream.as_ref().err().map(ToString::to_string),
    )
    .await;

    let response = downstream?;
    let result = response
        .messages
        .iter()
        .rev()
        .find(|m| matches!(m.role, cm_core::MessageRole::Assistant))
        .map(|m| m.content.clone())
        .unwrap_or_default();

    Ok(Json(OrchestrateResponse {
        success: response.success,
        result,
        context_quality: envelope.quality,
        orchestration: OrchestrationSummary {
            task_id,
            start_time,
            end_time,
            duration_ms,
        },
    }))
}

async fn record_orchestration_evidence(
    evidence: &EvidenceRecorder,
    task_id: &str,
    target: Role,
    duration_ms: u64,
    execution: Execution,
    error: Option<String>,
) {
    let mut record = cm_core::EvidenceRecord::new("orchestration", execution)
        .with_task_id(task_id.to_string())
        .with_clone(target)
        .with_execution_time_ms(duration_ms);
    if let Some(error) = error {
        record = record.with_error(error);
    }

    if let Err(e) = evidence.record(record.clone()).await {
        warn!(error = %e, "failed to record orchestration evidence");
    }
    if let Err(e) = evidence.write_to_audit_log(&record).await {
        warn!(error = %e, "failed to persist orchestration audit log entry");
    }
}

async fn record_quality_warning_evidence(
    evidence: &EvidenceRecorder,
    task_id: &str,
    target: Role,
    overall_quality: u8,
) {
    let record = cm_core::EvidenceRecord::new("quality_warning", Execution::Real)
        .with_task_id(task_id.to_string())
        .with_clone(target)
        .with_extra("overall_quality", overall_quality as i64)
        .with_extra("target_clone", target.to_string());

    if let Err(e) = evidence.record(record.clone()).await {
        warn!(error = %e, "failed to record quality warning evidence");
    }
    if let Err(e) = evidence.write_to_audit_log(&record).await {
        warn!(error = %e, "failed to persist quality warning audit log entry");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use cm_artifacts::ArtifactStore;
    use cm_llm::TestBackend;
    use tempfile::tempdir;
    use tower::ServiceExt;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    async fn coordinator() -> (Arc<Coordinator>, tempfile::TempDir) {
        let dir = tempdir().unwrap();
        let artifacts = Arc::new(ArtifactStore::open(dir.path().join("store")).await.unwrap());
        let evidence = Arc::new(EvidenceRecorder::new(dir.path().join("audit")));
        let backend = Arc::new(TestBackend::with_response("ok"));
        let worker = Arc::new(Worker::new(Role::Coordinator, "test-model", backend, artifacts, evidence));
        (Arc::new(Coordinator::new(worker)), dir)
    }

    #[tokio::test]
    async fn network_status_reports_coordinator_and_unreachable_peers() {
        let (coordinator, _dir) = coordinator().await;
        let app = build_router(coordinator);
        let resp = app
            .oneshot(Request::builder().uri("/network-status").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let body = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        let value: Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(value["coordinator"]["role"], "coordinator");
        assert!(value["clones"]["analyzer"]["error"].is_string());
    }

    #[tokio::test]
    async fn delegate_rejects_unknown_clone_name() {
        let (coordinator, _dir) = coordinator().await;
        let app = build_router(coordinator);
        let body = serde_json::to_vec(&serde_json::json!({
            "target_clone": "theta",
            "prompt": "do something",
        }))
        .unwrap();
        let resp = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/delegate")
                    .header("content-type", "application/json")
                    .body(Body::from(body))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn delegate_forwards_to_the_registered_peer() {
        let mock_server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/task"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "success": true,
                "execution": "real",
                "messages": [],
                "clone": "analyzer",
                "execution_time_ms": 5,
            })))
            .mount(&mock_server)
            .await;

        let (coordinator, _dir) = coordinator().await;
        coordinator.registry.register(Role::Analyzer, mock_server.uri()).await;
        let app = build_router(coordinator);

        let body = serde_json::to_vec(&serde_json::json!({
            "target_clone": "analyzer",
            "prompt": "analyze this",
        }))
        .unwrap();
        let resp = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/delegate")
                    .header("content-type", "application/json")
                    .body(Body::from(body))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn orchestrate_rejects_low_quality_objective_without_contacting_target() {
        let (coordinator, _dir) = coordinator().await;
        let app = build_router(coordinator);

        let body = serde_json::to_vec(&serde_json::json!({
            "objective": "x",
            "target_clone": "analyzer",
        }))
        .unwrap();
        let resp = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/orchestrate")
                    .header("content-type", "application/json")
                    .body(Body::from(body))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn orchestrate_forwards_a_well_formed_objective_and_returns_quality() {
        let mock_server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/task"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "success": true,
                "execution": "real",
                "messages": [
                    {"role": "user", "content": "hi", "timestamp": "2026-01-01T00:00:00Z"},
                    {"role": "assistant", "content": "design drafted", "timestamp": "2026-01-01T00:00:01Z"}
                ],
                "clone": "architect",
                "execution_time_ms": 12,
            })))
            .mount(&mock_server)
            .await;

        let (coordinator, _dir) = coordinator().await;
        coordinator.registry.register(Role::Architect, mock_server.uri()).await;
        let app = build_router(coordinator);

        let body = serde_json::to_vec(&serde_json::json!({
            "objective": "design a caching layer for the user profile service",
            "target_clone": "architect",
            "essential_data": {"service": "user-profile"},
        }))
        .unwrap();
        let resp = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/orchestrate")
                    .header("content-type", "application/json")
                    .body(Body::from(body))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let body = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        let value: Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(value["result"], "design drafted");
        assert!(value["context_quality"]["overall_quality"].as_u64().unwrap() >= 60);
    }
}
