// SPDX-License-Identifier: MIT OR Apache-2.0
//! In-memory task metrics and the `/health` response shape.

use chrono::{DateTime, Utc};
use cm_core::Role;
use serde::{Deserialize, Serialize};

/// In-memory task counters, reset whenever the process starts.
///
/// `tasks_processed` counts every call that passed validation, whether it
/// ultimately succeeded or failed — this keeps `tasks_processed >= errors`
/// an invariant regardless of failure mix. `average_response_ms` only folds
/// in successful calls, since a failed call has no representative response
/// time.
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct Metrics {
    /// Calls that passed validation (success or failure).
    pub tasks_processed: u64,
    /// Sum of elapsed milliseconds across successful calls.
    pub total_execution_ms: u64,
    /// Rolling average of successful calls' elapsed milliseconds.
    pub average_response_ms: f64,
    /// Calls that passed validation but ultimately failed.
    pub errors: u64,
}

impl Metrics {
    /// Fold a successful call's elapsed time into the rolling average.
    pub fn record_success(&mut self, elapsed_ms: u64) {
        self.tasks_processed += 1;
        self.total_execution_ms += elapsed_ms;
        let successes = self.tasks_processed - self.errors;
        self.average_response_ms = if successes == 0 {
            0.0
        } else {
            self.total_execution_ms as f64 / successes as f64
        };
    }

    /// Count a failed call without touching the response-time average.
    pub fn record_failure(&mut self) {
        self.tasks_processed += 1;
        self.errors += 1;
    }

    /// `(tasks_processed - errors) / tasks_processed * 100`, defined as 100
    /// when `tasks_processed == 0`.
    #[must_use]
    pub fn success_rate(&self) -> f64 {
        if self.tasks_processed == 0 {
            return 100.0;
        }
        let successes = (self.tasks_processed - self.errors) as f64;
        successes / self.tasks_processed as f64 * 100.0
    }
}

/// Component liveness flags reported on `/health`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct IntegrityFlags {
    /// The integrity checker is stateless and always available once loaded.
    pub integrity_monitor_active: bool,
    /// The evidence recorder accepted its most recent write.
    pub evidence_collector_active: bool,
    /// Whether an LLM backend capability is configured for this worker.
    /// Field name preserved from the wire contract this system grew out of.
    pub auto_gen_connected: bool,
    /// Whether the artifact store finished its startup index rebuild.
    pub artifact_manager_initialized: bool,
}

/// Task metrics as reported on `/health`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct HealthMetrics {
    /// Seconds since process start.
    pub uptime: i64,
    /// See [`Metrics::tasks_processed`].
    pub tasks_processed: u64,
    /// See [`Metrics::average_response_ms`].
    pub average_response_ms: f64,
    /// See [`Metrics::errors`].
    pub errors: u64,
    /// See [`Metrics::success_rate`].
    pub success_rate: f64,
}

/// The full `GET /health` response body.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    /// Always `"active"` for a running worker.
    pub status: String,
    /// This worker's fixed role.
    pub role: Role,
    /// Human-readable specialty description.
    pub specialization: String,
    /// When this response was produced.
    pub timestamp: DateTime<Utc>,
    /// Component liveness flags.
    pub integrity: IntegrityFlags,
    /// Task metrics.
    pub metrics: HealthMetrics,
}
