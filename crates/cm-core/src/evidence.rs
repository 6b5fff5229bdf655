// SPDX-License-Identifier: MIT OR Apache-2.0
//! One structured, timestamped line in the audit stream.

use crate::{role::Role, Execution};
use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use uuid::Uuid;

/// One event in the audit stream.
///
/// Invariant: `execution` is exactly `Execution::Real` or
/// `Execution::Failed` — the type system enforces this; any other value
/// would have been a programming error under the source's stringly-typed
/// design.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct EvidenceRecord {
    /// Unique identifier (UUID v4), filled in by [`crate::evidence`]
    /// recorders if absent at construction.
    pub evidence_id: Uuid,
    /// UTC timestamp, filled in by the recorder if absent at construction.
    pub timestamp: DateTime<Utc>,
    /// What kind of operation this record documents (e.g.
    /// `"task_execution"`, `"orchestration"`).
    pub operation: String,
    /// The execution marker for this operation.
    pub execution: Execution,
    /// The task this record belongs to, when applicable.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task_id: Option<String>,
    /// The clone that performed the operation, when applicable.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub clone: Option<Role>,
    /// Wall-clock duration of the operation in milliseconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub execution_time_ms: Option<u64>,
    /// Whether an artifact checksum was verified as part of this operation.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub checksum_verified: Option<bool>,
    /// The LLM model used, when applicable.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    /// Error detail, present only when `execution == Failed`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Additional free-form context not covered by the named fields above.
    #[serde(flatten, default)]
    pub extras: BTreeMap<String, Value>,
}

impl EvidenceRecord {
    /// Start building a record for the given operation and execution
    /// marker. `evidence_id` and `timestamp` are left unset so a recorder
    /// can complete them atomically at insertion time.
    #[must_use]
    pub fn new(operation: impl Into<String>, execution: Execution) -> Self {
        Self {
            evidence_id: Uuid::nil(),
            timestamp: DateTime::<Utc>::UNIX_EPOCH,
            operation: operation.into(),
            execution,
            task_id: None,
            clone: None,
            execution_time_ms: None,
            checksum_verified: None,
            model: None,
            error: None,
            extras: BTreeMap::new(),
        }
    }

    /// Builder-style setter for `task_id`.
    #[must_use]
    pub fn with_task_id(mut self, task_id: impl Into<String>) -> Self {
        self.task_id = Some(task_id.into());
        self
    }

    /// Builder-style setter for `clone`.
    #[must_use]
    pub fn with_clone(mut self, clone: Role) -> Self {
        self.clone = Some(clone);
        self
    }

    /// Builder-style setter for `execution_time_ms`.
    #[must_use]
    pub fn with_execution_time_ms(mut self, ms: u64) -> Self {
        self.execution_time_ms = Some(ms);
        self
    }

    /// Builder-style setter for `model`.
    #[must_use]
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    /// Builder-style setter for `error`.
    #[must_use]
    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.error = Some(error.into());
        self
    }

    /// Builder-style setter for `checksum_verified`.
    #[must_use]
    pub fn with_checksum_verified(mut self, verified: bool) -> Self {
        self.checksum_verified = Some(verified);
        self
    }

    /// Insert an extra free-form key/value pair.
    #[must_use]
    pub fn with_extra(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.extras.insert(key.into(), value.into());
        self
    }
}
