// SPDX-License-Identifier: MIT OR Apache-2.0
//! The error taxonomy shared by every clone-mesh component.
//!
//! Each variant corresponds to one Kind from the error handling design:
//! a source component, a local-handling note, and an HTTP surface code.
//! Names describe kinds, not language types — see `status_code` for the
//! HTTP mapping every Axum handler uses to turn an `AbpError` into a
//! `{success:false, error}` response.

use thiserror::Error;

/// The unified error type returned by every clone-mesh operation that can
/// fail in a way a caller needs to distinguish.
#[derive(Debug, Error)]
pub enum AbpError {
    /// A task request failed integrity-checker validation (e.g. empty prompt).
    #[error("validation failed: {0}")]
    Validation(String),

    /// An LLM response reached a caller without `execution == "real"`.
    #[error("simulation violation: {0}")]
    SimulationViolation(String),

    /// An artifact's recomputed checksum did not match its manifest.
    #[error("checksum mismatch for artifact {artifact_id}: expected {expected}, got {actual}")]
    ChecksumMismatch {
        /// The artifact whose content failed verification.
        artifact_id: uuid::Uuid,
        /// Checksum recorded in the manifest.
        expected: String,
        /// Checksum recomputed from the on-disk content.
        actual: String,
    },

    /// An artifact, manifest, or registry entry could not be found.
    #[error("not found: {0}")]
    NotFound(String),

    /// A context envelope scored below the reject threshold (< 40).
    #[error("quality gate rejected envelope: {0}")]
    QualityGate(String),

    /// A delegation target named a role not present in the peer registry.
    #[error("unknown clone: {0}")]
    UnknownClone(String),

    /// The LLM backend reported a failure; no fallback was synthesized.
    #[error("backend error: {0}")]
    Backend(String),

    /// The LLM backend call exceeded its configured timeout.
    #[error("backend timed out after {0:?}")]
    BackendTimeout(std::time::Duration),

    /// A filesystem operation failed (partial writes are cleaned up before
    /// this propagates).
    #[error("io error: {0}")]
    Io(String),

    /// Invalid input was supplied to an operation (e.g. nil content, empty type).
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// Startup configuration was invalid or incomplete.
    #[error("configuration error: {0}")]
    Configuration(String),
}

impl AbpError {
    /// The HTTP status code this error surfaces as, per the error handling
    /// design table.
    #[must_use]
    pub fn status_code(&self) -> u16 {
        match self {
            Self::Validation(_) | Self::InvalidInput(_) | Self::QualityGate(_) | Self::UnknownClone(_) => 400,
            Self::NotFound(_) => 404,
            Self::SimulationViolation(_)
            | Self::ChecksumMismatch { .. }
            | Self::Io(_) => 500,
            Self::Backend(_) => 502,
            Self::BackendTimeout(_) => 504,
            Self::Configuration(_) => 500,
        }
    }

    /// Short machine-readable kind name, useful for logging and metrics
    /// labels without the interpolated detail in [`std::fmt::Display`].
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Validation(_) => "ValidationError",
            Self::SimulationViolation(_) => "SimulationViolation",
            Self::ChecksumMismatch { .. } => "ChecksumMismatch",
            Self::NotFound(_) => "NotFound",
            Self::QualityGate(_) => "QualityGateError",
            Self::UnknownClone(_) => "UnknownClone",
            Self::Backend(_) => "BackendError",
            Self::BackendTimeout(_) => "BackendError",
            Self::Io(_) => "IOError",
            Self::InvalidInput(_) => "InvalidInput",
            Self::Configuration(_) => "ConfigurationError",
        }
    }
}

impl From<std::io::Error> for AbpError {
    fn from(e: std::io::Error) -> Self {
        Self::Io(e.to_string())
    }
}

impl From<serde_json::Error> for AbpError {
    fn from(e: serde_json::Error) -> Self {
        Self::Io(format!("json: {e}"))
    }
}
