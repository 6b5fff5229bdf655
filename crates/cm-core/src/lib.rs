// SPDX-License-Identifier: MIT OR Apache-2.0
#![doc = "Stable data model and error taxonomy for the clone-mesh substrate."]
#![deny(unsafe_code)]
#![warn(missing_docs)]

//! `cm-core` is the one crate every other clone-mesh crate depends on. It
//! carries no behavior beyond simple constructors and accessors: routing,
//! scoring, persistence and HTTP all live in dedicated crates built on top
//! of these types.

/// Content-addressed artifacts and their manifest side-cars.
pub mod artifact;
/// Delegation envelopes and context quality scores.
pub mod envelope;
/// The catalogued error taxonomy shared by every component.
pub mod error;
/// Audit/evidence records.
pub mod evidence;
/// Clone roles and the default port table.
pub mod role;
/// Task request/response shapes exchanged over the worker HTTP surface.
pub mod task;

pub use artifact::{Artifact, ArtifactType, Manifest};
pub use envelope::{ContextEnvelope, QualityScore};
pub use error::AbpError;
pub use evidence::EvidenceRecord;
pub use role::Role;
pub use task::{MessageRole, TaskMessage, TaskRequest, TaskResponse};

/// The execution marker every LLM-backed operation must carry.
///
/// Exactly `"real"` or `"failed"` — see [`error::AbpError::SimulationViolation`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize, schemars::JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum Execution {
    /// The operation actually reached the LLM backend and produced output.
    Real,
    /// The operation failed; no fabricated output was substituted.
    Failed,
}

impl std::fmt::Display for Execution {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Real => write!(f, "real"),
            Self::Failed => write!(f, "failed"),
        }
    }
}
