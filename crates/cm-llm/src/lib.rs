// SPDX-License-Identifier: MIT OR Apache-2.0
#![doc = "The LLM backend capability: a single Query call, no retries, no fallback."]
#![deny(unsafe_code)]
#![warn(missing_docs)]

//! A worker depends on an [`LlmBackend`] trait object rather than a
//! concrete vendor client. On success the backend always returns
//! `execution = Execution::Real`; on failure it returns an error carrying
//! the backend's own message — it never synthesizes a plausible-looking
//! response. This is the operational shape of the "no simulations" rule.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use cm_core::{AbpError, Execution};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::time::Duration;

/// One call to an LLM backend.
#[derive(Debug, Clone)]
pub struct LlmRequest {
    /// Model identifier.
    pub model: String,
    /// Fully assembled prompt (system prompt + context already folded in
    /// by the worker runtime).
    pub prompt: String,
    /// Caller's session id, for backend-side correlation/tracing only.
    pub session_id: Option<String>,
    /// Arbitrary vendor-specific metadata.
    pub metadata: BTreeMap<String, Value>,
}

impl LlmRequest {
    /// Construct a request with no session or metadata.
    #[must_use]
    pub fn new(model: impl Into<String>, prompt: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            prompt: prompt.into(),
            session_id: None,
            metadata: BTreeMap::new(),
        }
    }
}

/// The result of a successful [`LlmBackend::query`] call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmResponse {
    /// The model's output text.
    pub content: String,
    /// Always `Execution::Real` on a response that reaches a caller — see
    /// [`cm_integrity::verify_real_execution`] for the enforcement point.
    pub execution: Execution,
    /// The model identifier that actually served the request.
    pub model: String,
    /// When the backend produced this response.
    pub timestamp: DateTime<Utc>,
    /// Vendor-specific metadata (token usage, stop reason, ...).
    #[serde(default)]
    pub metadata: BTreeMap<String, Value>,
    /// Set on responses from a test-mode construction path so tests can
    /// filter them out of production metrics.
    #[serde(default)]
    pub test_mode: bool,
}

/// A backend capable of answering a single [`LlmRequest`].
///
/// Implementors must not retry internally and must not substitute a
/// fabricated response for a backend failure — a failed call always
/// surfaces as `Err`.
#[async_trait]
pub trait LlmBackend: Send + Sync {
    /// Issue one query against the backend.
    ///
    /// # Errors
    ///
    /// Returns [`AbpError::Backend`] on any backend-reported failure and
    /// [`AbpError::BackendTimeout`] if the configured timeout elapses
    /// first. Neither path produces a response.
    async fn query(&self, req: LlmRequest) -> Result<LlmResponse, AbpError>;
}

/// Construction-time configuration for [`AnthropicBackend`].
#[derive(Debug, Clone)]
pub struct BackendConfig {
    /// API key for the backend. Must be non-empty.
    pub api_key: String,
    /// Default model identifier used when a request doesn't override it.
    pub model: String,
    /// Per-request timeout.
    pub timeout: Duration,
    /// Base URL for the backend's chat-completions-style endpoint.
    pub base_url: String,
}

impl BackendConfig {
    /// Validate this configuration eagerly.
    ///
    /// # Errors
    ///
    /// Returns [`AbpError::Configuration`] if `api_key` is empty — missing
    /// credentials must fail at construction time, never at first call.
    pub fn validate(&self) -> Result<(), AbpError> {
        if self.api_key.trim().is_empty() {
            return Err(AbpError::Configuration(
                "LLM_API_KEY must be set and non-empty in production".to_string(),
            ));
        }
        Ok(())
    }
}

/// A production backend that calls a real HTTP LLM provider.
///
/// Construction fails eagerly (`ConfigurationError`) if the API key is
/// missing, rather than at first call.
pub struct AnthropicBackend {
    client: reqwest::Client,
    config: BackendConfig,
}

impl AnthropicBackend {
    /// Construct a backend from validated configuration.
    ///
    /// # Errors
    ///
    /// Returns [`AbpError::Configuration`] if `config.api_key` is empty.
    pub fn new(config: BackendConfig) -> Result<Self, AbpError> {
        config.validate()?;
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| AbpError::Configuration(format!("failed to build HTTP client: {e}")))?;
        Ok(Self { client, config })
    }
}

#[async_trait]
impl LlmBackend for AnthropicBackend {
    async fn query(&self, req: LlmRequest) -> Result<LlmResponse, AbpError> {
        let model = if req.model.is_empty() {
            self.config.model.clone()
        } else {
            req.model.clone()
        };

        let body = serde_json::json!({
            "model": model,
            "max_tokens": 4096,
            "messages": [{"role": "user", "content": req.prompt}],
        });

        let result = self
            .client
            .post(&self.config.base_url)
            .header("x-api-key", &self.config.api_key)
            .header("content-type", "application/json")
            .json(&body)
            .send()
            .await;

        let resp = match result {
            Ok(r) => r,
            Err(e) if e.is_timeout() => {
                return Err(AbpError::BackendTimeout(self.config.timeout));
            }
            Err(e) => return Err(AbpError::Backend(e.to_string())),
        };

        if !resp.status().is_success() {
            let status = resp.status();
            let detail = resp.text().await.unwrap_or_default();
            return Err(AbpError::Backend(format!(
                "backend returned {status}: {detail}"
            )));
        }

        let payload: Value = resp
            .json()
            .await
            .map_err(|e| AbpError::Backend(format!("malformed backend response: {e}")))?;

        let content = extract_text(&payload)
            .ok_or_else(|| AbpError::Backend("backend response had no text content".to_string()))?;

        Ok(LlmResponse {
            content,
            execution: Execution::Real,
            model,
            timestamp: Utc::now(),
            metadata: BTreeMap::new(),
            test_mode: false,
        })
    }
}

fn extract_text(payload: &Value) -> Option<String> {
    payload
        .get("content")?
        .as_array()?
        .iter()
        .filter_map(|block| block.get("text").and_then(Value::as_str))
        .collect::<Vec<_>>()
        .join("")
        .into()
}

/// A deterministic, offline backend for tests.
///
/// Responses still carry `execution = Execution::Real` (a genuine call
/// into this backend did occur) and additionally set `test_mode = true`
/// so production metrics can filter them out.
#[derive(Debug, Clone, Default)]
pub struct TestBackend {
    /// Fixed response text returned for every query, unless overridden per
    /// test via [`TestBackend::with_response`].
    pub canned_response: String,
    /// When set, `query` returns this error instead of a response —
    /// for exercising the no-retry / no-fallback failure path.
    pub fail_with: Option<String>,
}

impl TestBackend {
    /// Construct a backend that always returns `response`.
    #[must_use]
    pub fn with_response(response: impl Into<String>) -> Self {
        Self {
            canned_response: response.into(),
            fail_with: None,
        }
    }

    /// Construct a backend that always fails with `message`.
    #[must_use]
    pub fn failing(message: impl Into<String>) -> Self {
        Self {
            canned_response: String::new(),
            fail_with: Some(message.into()),
        }
    }
}

#[async_trait]
impl LlmBackend for TestBackend {
    async fn query(&self, req: LlmRequest) -> Result<LlmResponse, AbpError> {
        if let Some(msg) = &self.fail_with {
            return Err(AbpError::Backend(msg.clone()));
        }
        let content = if self.canned_response.is_empty() {
            format!("[test-mode reply to: {}]", req.prompt)
        } else {
            self.canned_response.clone()
        };
        Ok(LlmResponse {
            content,
            execution: Execution::Real,
            model: if req.model.is_empty() {
                "test-backend".to_string()
            } else {
                req.model
            },
            timestamp: Utc::now(),
            metadata: BTreeMap::new(),
            test_mode: true,
        })
    }
}
