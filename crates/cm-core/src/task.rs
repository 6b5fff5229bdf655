// SPDX-License-Identifier: MIT OR Apache-2.0
//! Inbound task requests and outbound task responses.

use crate::{evidence::EvidenceRecord, role::Role, Execution};
use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// An inbound request to `/task` or a role's specialization endpoint.
///
/// Invariant: `prompt.trim()` is non-empty. Construction does not enforce
/// this — `cm_integrity::verify_request` does, so that an invalid request
/// can still be inspected and reported rather than rejected at the type
/// level.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct TaskRequest {
    /// The task prompt.
    pub prompt: String,
    /// Arbitrary caller-supplied context, serialized into the effective
    /// prompt sent to the LLM backend.
    #[serde(default)]
    pub context: BTreeMap<String, Value>,
    /// Caller-supplied session identifier, echoed back and used as the
    /// evidence record's `taskId`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    /// When `true`, the caller wants the evidence record inlined on the
    /// response rather than only persisted to the audit log.
    #[serde(default)]
    pub require_evidence: bool,
}

impl TaskRequest {
    /// Construct a minimal request with no context or session.
    #[must_use]
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            context: BTreeMap::new(),
            session_id: None,
            require_evidence: false,
        }
    }
}

/// One message in a [`TaskResponse`]'s conversation trace.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct TaskMessage {
    /// Who produced this message.
    pub role: MessageRole,
    /// Message text.
    pub content: String,
    /// When the message was produced.
    pub timestamp: DateTime<Utc>,
}

/// The speaker of a [`TaskMessage`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum MessageRole {
    /// The caller.
    User,
    /// The LLM backend's reply.
    Assistant,
    /// The worker's own system/framing text.
    System,
}

/// The outbound result of `executeTask` or a specialization endpoint.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct TaskResponse {
    /// Whether the task completed without error.
    pub success: bool,
    /// The execution marker — `"real"` or `"failed"`, never fabricated.
    pub execution: Execution,
    /// The conversation trace produced for this task.
    pub messages: Vec<TaskMessage>,
    /// Echoed session identifier.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    /// The role that executed this task.
    pub clone: Role,
    /// Wall-clock execution time in milliseconds.
    pub execution_time_ms: u64,
    /// The evidence record for this task, when `require_evidence` was set.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub evidence: Option<EvidenceRecord>,
}
