// SPDX-License-Identifier: MIT OR Apache-2.0
#![doc = "The role-parameterized worker: identity, task pipeline, metrics, HTTP surface."]
#![deny(unsafe_code)]
#![warn(missing_docs)]

//! Roles differ only in system prompt, one specialization endpoint, and
//! default port (design note: polymorphism over clone roles). `Worker` is
//! the one concrete type every role uses; `role: Role` is the tagged
//! variant that selects behavior. The coordinator in `cm-coordinator` is
//! this same type with an extra route set merged on, not a distinct
//! implementation.

/// Metrics and HTTP health-surface shapes.
pub mod health;
/// Axum router and handlers for the common worker HTTP surface.
pub mod http;
/// Role-specific specialization endpoints (`/analyze`, `/design`, ...).
pub mod specialization;

pub use health::{HealthMetrics, HealthResponse, IntegrityFlags, Metrics};
pub use http::{build_health, build_router, ApiError};

use chrono::{DateTime, Utc};
use cm_artifacts::ArtifactStore;
use cm_core::{AbpError, Execution, MessageRole, Role, TaskMessage, TaskRequest, TaskResponse};
use cm_evidence::EvidenceRecorder;
use cm_llm::{LlmBackend, LlmRequest};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Mutex;
use tracing::{info, warn};

/// The phrase every role's system prompt must contain, so downstream tests
/// (and the model itself) can verify the instruction was actually delivered.
pub const NO_SIMULATIONS_LAW: &str =
    "NO SIMULATIONS LAW: you must never fabricate a result; every response must reflect a real backend call.";

/// A clone-mesh worker process. One concrete type for every role —
/// `role` and `specialization` carry what would otherwise be per-role
/// subclasses.
pub struct Worker {
    /// This process's fixed role.
    pub role: Role,
    /// Short human-readable description of this role's specialty, echoed on
    /// `/health`.
    pub specialization: String,
    /// The assembled system prompt, always containing [`NO_SIMULATIONS_LAW`].
    pub system_prompt: String,
    /// Default model identifier passed to the backend when a request
    /// doesn't specify one.
    pub default_model: String,
    /// The LLM backend capability.
    pub backend: Arc<dyn LlmBackend>,
    /// The artifact store backing `/artifacts` and specialization writes.
    pub artifacts: Arc<ArtifactStore>,
    /// The evidence recorder backing every task's audit trail.
    pub evidence: Arc<EvidenceRecorder>,
    metrics: Mutex<Metrics>,
    start_time: DateTime<Utc>,
}

fn specialization_text(role: Role) -> &'static str {
    match role {
        Role::Coordinator => "delegation and orchestration across the clone mesh",
        Role::Analyzer => "static and behavioral code analysis",
        Role::Architect => "system and API design",
        Role::Tester => "test generation",
        Role::Communicator => "documentation",
    }
}

impl Worker {
    /// Construct a worker for `role`, assembling its system prompt.
    #[must_use]
    pub fn new(
        role: Role,
        default_model: impl Into<String>,
        backend: Arc<dyn LlmBackend>,
        artifacts: Arc<ArtifactStore>,
        evidence: Arc<EvidenceRecorder>,
    ) -> Self {
        let specialization = specialization_text(role).to_string();
        let system_prompt = format!(
            "You are {role}, a specialist in {specialization}. {NO_SIMULATIONS_LAW}"
        );
        Self {
            role,
            specialization,
            system_prompt,
            default_model: default_model.into(),
            backend,
            artifacts,
            evidence,
            metrics: Mutex::new(Metrics::default()),
            start_time: Utc::now(),
        }
    }

    /// Snapshot of this worker's metrics.
    pub async fn metrics(&self) -> Metrics {
        self.metrics.lock().await.clone()
    }

    /// When this process started, for `/health`'s `uptime` field.
    #[must_use]
    pub fn start_time(&self) -> DateTime<Utc> {
        self.start_time
    }

    /// Run the task pipeline: validate, build the effective prompt, call the
    /// backend, verify the execution marker, record evidence, update
    /// metrics.
    ///
    /// # Errors
    ///
    /// Returns [`AbpError::Validation`] if `req.prompt` is blank — this path
    /// does not touch `tasksProcessed`, matching the "not counted" rule. Any
    /// other failure (backend error, timeout, simulation violation)
    /// increments both `tasksProcessed` and `errors` and records a `failed`
    /// evidence event before propagating.
    pub async fn execute_task(&self, req: TaskRequest) -> Result<TaskResponse, AbpError> {
        let validation = cm_integrity::verify_request(&req);
        if !validation.valid {
            return Err(AbpError::Validation(validation.errors.join("; ")));
        }

        let effective_prompt = self.build_effective_prompt(&req);
        let started = Instant::now();

        let llm_req = LlmRequest {
            model: self.default_model.clone(),
            prompt: effective_prompt,
            session_id: req.session_id.clone(),
            metadata: Default::default(),
        };

        let result = self.backend.query(llm_req).await;
        let elapsed_ms = started.elapsed().as_millis() as u64;

        let response = match result {
            Ok(resp) => resp,
            Err(e) => {
                self.record_failure(&req, elapsed_ms, &e.to_string()).await;
                return Err(e);
            }
        };

        if let Err(e) = cm_integrity::verify_real_execution(response.execution) {
            self.record_failure(&req, elapsed_ms, &e.to_string()).await;
            return Err(e);
        }

        self.record_success(&req, elapsed_ms, &response).await;

        Ok(TaskResponse {
            success: true,
            execution: Execution::Real,
            messages: vec![
                TaskMessage {
                    role: MessageRole::User,
                    content: req.prompt,
                    timestamp: Utc::now(),
                },
                TaskMessage {
                    role: MessageRole::Assistant,
                    content: response.content,
                    timestamp: response.timestamp,
                },
            ],
            session_id: req.session_id,
            clone: self.role,
            execution_time_ms: elapsed_ms,
            evidence: if req.require_evidence {
                self.evidence.last_record().await
            } else {
                None
            },
        })
    }

    fn build_effective_prompt(&self, req: &TaskRequest) -> String {
        let context_json = serde_json::to_string(&req.context).unwrap_or_default();
        format!("{}\n\n{}\n\nContext:\n{}", self.system_prompt, req.prompt, context_json)
    }

    async fn record_success(
        &self,
        req: &TaskRequest,
        elapsed_ms: u64,
        response: &cm_llm::LlmResponse,
    ) {
        let record = cm_core::EvidenceRecord::new("task_execution", Execution::Real)
            .with_clone(self.role)
            .with_execution_time_ms(elapsed_ms)
            .with_model(response.model.clone())
            .with_extra("prompt_len", req.prompt.len() as i64)
            .with_extra("response_len", response.content.len() as i64);
        let record = match req.session_id.clone() {
            Some(sid) => record.with_task_id(sid),
            None => record,
        };

        if let Err(e) = self.evidence.record(record.clone()).await {
            warn!(error = %e, "failed to record success evidence");
        }
        if let Err(e) = self.evidence.write_to_audit_log(&record).await {
            warn!(error = %e, "failed to persist audit log entry");
        }

        let mut metrics = self.metrics.lock().await;
        metrics.record_success(elapsed_ms);
        info!(role = %self.role, execution_time_ms = elapsed_ms, "task execution succeeded");
    }

    async fn record_failure(&self, req: &TaskRequest, elapsed_ms: u64, error: &str) {
        let record = cm_core::EvidenceRecord::new("task_execution", Execution::Failed)
            .with_clone(self.role)
            .with_execution_time_ms(elapsed_ms)
            .with_error(error.to_string());
        let record = match req.session_id.clone() {
            Some(sid) => record.with_task_id(sid),
            None => record,
        };

        if let Err(e) = self.evidence.record(record.clone()).await {
            warn!(error = %e, "failed to record failure evidence");
        }
        if let Err(e) = self.evidence.write_to_audit_log(&record).await {
            warn!(error = %e, "failed to persist audit log entry");
        }

        let mut metrics = self.metrics.lock().await;
        metrics.record_failure();
        warn!(role = %self.role, error = %error, "task execution failed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cm_core::ArtifactType;
    use cm_llm::TestBackend;
    use tempfile::tempdir;

    async fn worker(backend: Arc<dyn LlmBackend>) -> (Worker, tempfile::TempDir) {
        let dir = tempdir().unwrap();
        let artifacts = Arc::new(ArtifactStore::open(dir.path().join("store")).await.unwrap());
        let evidence = Arc::new(EvidenceRecorder::new(dir.path().join("audit")));
        (
            Worker::new(Role::Analyzer, "test-model", backend, artifacts, evidence),
            dir,
        )
    }

    #[tokio::test]
    async fn system_prompt_contains_the_no_simulations_law() {
        let (w, _dir) = worker(Arc::new(TestBackend::with_response("ok"))).await;
        assert!(w.system_prompt.contains("NO SIMULATIONS LAW"));
    }

    #[tokio::test]
    async fn blank_prompt_is_rejected_and_not_counted() {
        let (w, _dir) = worker(Arc::new(TestBackend::with_response("ok"))).await;
        let err = w.execute_task(TaskRequest::new("   ")).await.unwrap_err();
        assert!(matches!(err, AbpError::Validation(_)));
        assert_eq!(w.metrics().await.tasks_processed, 0);
    }

    #[tokio::test]
    async fn successful_task_increments_tasks_processed_and_records_evidence() {
        let (w, _dir) = worker(Arc::new(TestBackend::with_response("analysis complete"))).await;
        let resp = w.execute_task(TaskRequest::new("analyze this function")).await.unwrap();
        assert!(resp.success);
        assert_eq!(resp.execution, Execution::Real);

        let metrics = w.metrics().await;
        assert_eq!(metrics.tasks_processed, 1);
        assert_eq!(metrics.errors, 0);
    }

    #[tokio::test]
    async fn backend_failure_increments_both_tasks_processed_and_errors() {
        let (w, _dir) = worker(Arc::new(TestBackend::failing("upstream exploded"))).await;
        let err = w.execute_task(TaskRequest::new("do the thing please")).await.unwrap_err();
        assert!(matches!(err, AbpError::Backend(_)));

        let metrics = w.metrics().await;
        assert_eq!(metrics.tasks_processed, 1);
        assert_eq!(metrics.errors, 1);
    }

    #[tokio::test]
    async fn artifact_store_is_reachable_from_the_worker() {
        let (w, _dir) = worker(Arc::new(TestBackend::with_response("x"))).await;
        let manifest = w
            .artifacts
            .store(ArtifactType::Code, b"fn main() {}".to_vec(), Default::default(), None)
            .await
            .unwrap();
        let (_, content) = w.artifacts.retrieve(manifest.artifact_id, false).await.unwrap();
        assert_eq!(content.unwrap(), b"fn main() {}".to_vec());
    }
}
