// SPDX-License-Identifier: MIT OR Apache-2.0
#![doc = "Checksumming, request validation, and the NO-SIMULATIONS execution-marker contract."]
#![deny(unsafe_code)]
#![warn(missing_docs)]

//! The one place that enforces the substrate's central invariant: that no
//! recorded output can be mistaken for a fabricated one. Every other
//! component calls [`verify_real_execution`] on an LLM adapter's output
//! before returning it to a caller.

use cm_core::{AbpError, Execution, TaskRequest};
use sha2::{Digest, Sha256};

/// Compute the hex-encoded SHA-256 of `content`.
///
/// Deterministic: two calls on identical bytes always produce the identical
/// 64-char lowercase hex string.
///
/// # Errors
///
/// Returns [`AbpError::InvalidInput`] if `content` is empty — an empty
/// artifact/response body is never a valid thing to checksum in this
/// system (real content always has at least the caller's prompt echoed
/// back into it).
pub fn checksum(content: &[u8]) -> Result<String, AbpError> {
    if content.is_empty() {
        return Err(AbpError::InvalidInput("content must not be empty".into()));
    }
    let mut hasher = Sha256::new();
    hasher.update(content);
    Ok(format!("{:x}", hasher.finalize()))
}

/// Verify that `content` hashes to `expected`.
///
/// # Errors
///
/// Returns [`AbpError::InvalidInput`] if `expected` is empty.
pub fn verify_checksum(content: &[u8], expected: &str) -> Result<bool, AbpError> {
    if expected.is_empty() {
        return Err(AbpError::InvalidInput("expected checksum must not be empty".into()));
    }
    Ok(checksum(content).map(|actual| actual == expected).unwrap_or(false))
}

/// The result of validating a [`TaskRequest`]'s shape.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationResult {
    /// Whether the request is well-formed enough to execute.
    pub valid: bool,
    /// Human-readable problems found, empty when `valid`.
    pub errors: Vec<String>,
}

/// Validate the shape of an inbound [`TaskRequest`].
///
/// The only mandatory invariant is that `prompt.trim()` is non-empty;
/// everything else in a request is optional.
#[must_use]
pub fn verify_request(req: &TaskRequest) -> ValidationResult {
    let mut errors = Vec::new();
    if req.prompt.trim().is_empty() {
        errors.push("prompt must not be empty or whitespace-only".to_string());
    }
    ValidationResult {
        valid: errors.is_empty(),
        errors,
    }
}

/// Verify that a value carrying an [`Execution`] marker is `Execution::Real`.
///
/// # Errors
///
/// Returns [`AbpError::SimulationViolation`] when the marker is anything
/// other than `Execution::Real`, including when it was never set — a
/// missing marker and a `Failed` marker are both violations from a
/// caller's perspective, since neither is safe to treat as genuine output.
pub fn verify_real_execution(execution: Execution) -> Result<(), AbpError> {
    match execution {
        Execution::Real => Ok(()),
        Execution::Failed => Err(AbpError::SimulationViolation(
            "response carried execution=\"failed\"; no output was fabricated".to_string(),
        )),
    }
}
