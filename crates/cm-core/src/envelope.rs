// SPDX-License-Identifier: MIT OR Apache-2.0
//! Delegation envelopes and the quality score that gates them.

use crate::{artifact::Manifest, role::Role};
use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use uuid::Uuid;

/// A delegation payload carrying an objective, essential data, constraints
/// and artifact manifests, gated by a [`QualityScore`] before it is allowed
/// to cross a worker boundary.
///
/// Invariant: `artifact_manifests` carries manifests only — never artifact
/// bytes. [`crate::error::AbpError::QualityGate`] is the enforcement point.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct ContextEnvelope {
    /// Unique identifier for this envelope.
    pub context_id: Uuid,
    /// When the envelope was constructed.
    pub timestamp: DateTime<Utc>,
    /// Human-readable objective for the delegated task.
    pub objective: String,
    /// The role this envelope is addressed to.
    pub target_clone: Role,
    /// Manifests of artifacts relevant to the objective (never raw bytes).
    #[serde(default)]
    pub artifact_manifests: Vec<Manifest>,
    /// Arbitrary structured data essential to completing the objective.
    #[serde(default)]
    pub essential_data: BTreeMap<String, Value>,
    /// Constraints the target clone must respect.
    #[serde(default)]
    pub constraints: Vec<String>,
    /// The computed quality score for this envelope.
    pub quality: QualityScore,
}

/// A 0–100 score on three axes, combined into an overall quality figure
/// that gates whether a [`ContextEnvelope`] may be delegated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct QualityScore {
    /// How clearly the objective states an action and a target (0–100).
    pub objective_clarity: u8,
    /// How relevant/complete `essential_data` is (0–100).
    pub data_relevance: u8,
    /// Whether artifacts are referenced as lightweight manifests (0–100).
    pub artifact_utilization: u8,
    /// `round(0.4*clarity + 0.3*relevance + 0.3*utilization)`.
    pub overall_quality: u8,
}

/// Overall-quality threshold below which an envelope is rejected outright.
pub const REJECT_THRESHOLD: u8 = 40;
/// Overall-quality threshold below which an envelope proceeds with a warning.
pub const WARN_THRESHOLD: u8 = 60;

impl QualityScore {
    /// Whether this score falls below the reject threshold.
    #[must_use]
    pub fn is_rejected(&self) -> bool {
        self.overall_quality < REJECT_THRESHOLD
    }

    /// Whether this score falls in the warn band (reject <= score < warn).
    #[must_use]
    pub fn is_warning(&self) -> bool {
        (REJECT_THRESHOLD..WARN_THRESHOLD).contains(&self.overall_quality)
    }
}
