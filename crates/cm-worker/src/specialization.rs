// SPDX-License-Identifier: MIT OR Apache-2.0
//! Role-specific specialization endpoints: `/analyze`, `/design`,
//! `/generate-tests`, `/document`.
//!
//! Each wraps [`crate::Worker::execute_task`] and additionally stores the
//! response as an artifact of the role's output type; metadata always
//! includes the original input's size and any tags the caller passed.

use crate::Worker;
use cm_core::{AbpError, ArtifactType, Execution, Manifest, TaskRequest};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use tracing::warn;

/// `POST /analyze` request body.
#[derive(Debug, Clone, Deserialize)]
pub struct AnalyzeRequest {
    /// Source code to analyze.
    pub code: String,
    /// Source language, if known.
    #[serde(default)]
    pub language: Option<String>,
    /// Arbitrary extra context for the analysis.
    #[serde(default)]
    pub context: Option<Value>,
}

/// `POST /design` request body.
#[derive(Debug, Clone, Deserialize)]
pub struct DesignRequest {
    /// The design requirements.
    pub requirements: String,
    /// Constraints the design must respect.
    #[serde(default)]
    pub constraints: Option<Vec<String>>,
    /// A focus area to emphasize (e.g. `"scalability"`).
    #[serde(default)]
    pub focus: Option<String>,
}

/// `POST /generate-tests` request body.
#[derive(Debug, Clone, Deserialize)]
pub struct GenerateTestsRequest {
    /// Source code to generate tests for.
    pub code: String,
    /// Target test framework, if known.
    #[serde(default)]
    pub framework: Option<String>,
    /// Arbitrary extra context for generation.
    #[serde(default)]
    pub context: Option<Value>,
}

/// `POST /document` request body.
#[derive(Debug, Clone, Deserialize)]
pub struct DocumentRequest {
    /// Content to document.
    pub content: String,
    /// Kind of document to produce (e.g. `"api_reference"`).
    #[serde(default)]
    pub doc_type: Option<String>,
    /// Intended audience (e.g. `"end_user"`, `"maintainer"`).
    #[serde(default)]
    pub audience: Option<String>,
}

/// The common response shape for every specialization endpoint.
#[derive(Debug, Clone, Serialize)]
pub struct SpecializationResponse {
    /// Whether the underlying task succeeded.
    pub success: bool,
    /// The LLM's output text.
    pub result: String,
    /// The manifest of the artifact stored from `result`.
    pub artifact: Manifest,
    /// Wall-clock execution time in milliseconds.
    pub execution_time_ms: u64,
}

async fn run_specialization(
    worker: &Worker,
    prompt: String,
    artifact_type: ArtifactType,
    input_size: usize,
    mut tags: BTreeMap<String, Value>,
) -> Result<SpecializationResponse, AbpError> {
    let response = worker.execute_task(TaskRequest::new(prompt)).await?;
    let result = response
        .messages
        .iter()
        .rev()
        .find(|m| matches!(m.role, cm_core::MessageRole::Assistant))
        .map(|m| m.content.clone())
        .unwrap_or_default();

    tags.insert("input_size".to_string(), Value::from(input_size));

    let manifest = worker
        .artifacts
        .store(artifact_type, result.clone().into_bytes(), tags, Some(worker.role))
        .await?;

    record_artifact_store_evidence(worker, &manifest).await;

    Ok(SpecializationResponse {
        success: response.success,
        result,
        artifact: manifest,
        execution_time_ms: response.execution_time_ms,
    })
}

/// Record an `artifact_store` evidence event for a specialization's
/// stored output, after the `task_execution` event `execute_task` already
/// recorded — satisfies the ordering guarantee that artifact-store events
/// produced by a specialization wrapper appear after the task event.
async fn record_artifact_store_evidence(worker: &Worker, manifest: &Manifest) {
    let record = cm_core::EvidenceRecord::new("artifact_store", Execution::Real)
        .with_clone(worker.role)
        .with_checksum_verified(!manifest.checksum.is_empty())
        .with_extra("artifact_id", manifest.artifact_id.to_string())
        .with_extra("artifact_type", manifest.artifact_type.name());

    if let Err(e) = worker.evidence.record(record.clone()).await {
        warn!(error = %e, "failed to record artifact store evidence");
    }
    if let Err(e) = worker.evidence.write_to_audit_log(&record).await {
        warn!(error = %e, "failed to persist artifact store audit log entry");
    }
}

/// Handle `/analyze`: analyze `req.code`, storing the result as a
/// `code_analysis` artifact.
pub async fn analyze(worker: &Worker, req: AnalyzeRequest) -> Result<SpecializationResponse, AbpError> {
    let mut tags = BTreeMap::new();
    if let Some(lang) = &req.language {
        tags.insert("language".to_string(), Value::String(lang.clone()));
    }
    let prompt = format!(
        "Analyze the following code{}:\n\n{}",
        req.language.as_deref().map(|l| format!(" ({l})")).unwrap_or_default(),
        req.code
    );
    run_specialization(worker, prompt, ArtifactType::CodeAnalysis, req.code.len(), tags).await
}

/// Handle `/design`: produce a system design from `req.requirements`,
/// storing the result as an `architecture_design` artifact.
pub async fn design(worker: &Worker, req: DesignRequest) -> Result<SpecializationResponse, AbpError> {
    let mut tags = BTreeMap::new();
    if let Some(focus) = &req.focus {
        tags.insert("focus".to_string(), Value::String(focus.clone()));
    }
    let constraints = req.constraints.clone().unwrap_or_default();
    let prompt = format!(
        "Design a solution for these requirements:\n\n{}\n\nConstraints: {}",
        req.requirements,
        constraints.join(", ")
    );
    run_specialization(worker, prompt, ArtifactType::ArchitectureDesign, req.requirements.len(), tags)
        .await
}

/// Handle `/generate-tests`: produce a test suite for `req.code`, storing
/// the result as a `test_suite` artifact.
pub async fn generate_tests(
    worker: &Worker,
    req: GenerateTestsRequest,
) -> Result<SpecializationResponse, AbpError> {
    let mut tags = BTreeMap::new();
    if let Some(framework) = &req.framework {
        tags.insert("framework".to_string(), Value::String(framework.clone()));
    }
    let prompt = format!(
        "Generate tests{} for the following code:\n\n{}",
        req.framework.as_deref().map(|f| format!(" using {f}")).unwrap_or_default(),
        req.code
    );
    run_specialization(worker, prompt, ArtifactType::TestSuite, req.code.len(), tags).await
}

/// Handle `/document`: produce documentation for `req.content`, storing the
/// result as a `documentation` artifact.
pub async fn document(worker: &Worker, req: DocumentRequest) -> Result<SpecializationResponse, AbpError> {
    let mut tags = BTreeMap::new();
    if let Some(doc_type) = &req.doc_type {
        tags.insert("doc_type".to_string(), Value::String(doc_type.clone()));
    }
    if let Some(audience) = &req.audience {
        tags.insert("audience".to_string(), Value::String(audience.clone()));
    }
    let prompt = format!(
        "Write {} documentation for the following{}:\n\n{}",
        req.doc_type.as_deref().unwrap_or("general"),
        req.audience.as_deref().map(|a| format!(" for a {a} audience")).unwrap_or_default(),
        req.content
    );
    run_specialization(worker, prompt, ArtifactType::Documentation, req.content.len(), tags).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use cm_artifacts::ArtifactStore;
    use cm_core::Role;
    use cm_evidence::EvidenceRecorder;
    use cm_llm::TestBackend;
    use std::sync::Arc;
    use tempfile::tempdir;

    async fn analyzer_worker() -> (Worker, tempfile::TempDir) {
        let dir = tempdir().unwrap();
        let artifacts = Arc::new(ArtifactStore::open(dir.path().join("store")).await.unwrap());
        let evidence = Arc::new(EvidenceRecorder::new(dir.path().join("audit")));
        let backend = Arc::new(TestBackend::with_response("looks fine, no bugs found"));
        (
            Worker::new(Role::Analyzer, "test-model", backend, artifacts, evidence),
            dir,
        )
    }

    #[tokio::test]
    async fn analyze_stores_a_code_analysis_artifact() {
        let (worker, _dir) = analyzer_worker().await;
        let req = AnalyzeRequest {
            code: "function a(){return 1}".to_string(),
            language: Some("javascript".to_string()),
            context: None,
        };
        let resp = analyze(&worker, req).await.unwrap();
        assert!(resp.success);
        assert_eq!(resp.artifact.artifact_type, ArtifactType::CodeAnalysis);
        assert!(resp.artifact.checksum.len() == 64);
        assert!(resp.artifact.checksum.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[tokio::test]
    async fn document_records_doc_type_and_audience_tags() {
        let (worker, _dir) = analyzer_worker().await;
        let req = DocumentRequest {
            content: "the widget API".to_string(),
            doc_type: Some("api_reference".to_string()),
            audience: Some("external_developer".to_string()),
        };
        let resp = document(&worker, req).await.unwrap();
        assert_eq!(resp.artifact.artifact_type, ArtifactType::Documentation);
        assert_eq!(
            resp.artifact.metadata.get("doc_type").and_then(Value::as_str),
            Some("api_reference")
        );
    }
}
