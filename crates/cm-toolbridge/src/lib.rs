// SPDX-License-Identifier: MIT OR Apache-2.0
#![doc = "The stdio tool bridge: a fixed tool catalogue wrapping the clone mesh's HTTP surface."]
#![deny(unsafe_code)]
#![warn(missing_docs)]

//! One request per line, one response per line, LF-terminated, no framing
//! length prefix — the same "line-delimited JSON over stdio" shape the
//! worker/coordinator pair's sidecar counterparts use, adapted here to a
//! fixed tool catalogue instead of a work-order protocol.

use cm_core::Role;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::time::Duration;
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tracing::warn;

const DEFAULT_TOOL_TIMEOUT: Duration = Duration::from_secs(30);
const ORCHESTRATE_TOOL_TIMEOUT: Duration = Duration::from_secs(60);

/// One incoming tool-bridge message.
#[derive(Debug, Clone, Deserialize)]
pub struct ToolRequest {
    /// The dispatch parameters. Absent entirely → a structured validation error.
    pub params: Option<ToolParams>,
}

/// The `params` object of a [`ToolRequest`].
#[derive(Debug, Clone, Deserialize)]
pub struct ToolParams {
    /// The tool name, matched against the fixed catalogue.
    pub name: Option<String>,
    /// Tool arguments; defaults to an empty object when absent.
    #[serde(default = "default_arguments")]
    pub arguments: Value,
}

fn default_arguments() -> Value {
    json!({})
}

/// One outgoing tool-bridge message.
#[derive(Debug, Clone, Serialize)]
pub struct ToolResponse {
    /// Always exactly one text block carrying the serialized payload.
    pub content: Vec<ContentBlock>,
    /// Present and `true` only on a validation, dispatch, or timeout failure.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub is_error: bool,
}

/// A single content block in a [`ToolResponse`].
#[derive(Debug, Clone, Serialize)]
pub struct ContentBlock {
    /// Always `"text"` — the only content kind this bridge produces.
    #[serde(rename = "type")]
    pub kind: &'static str,
    /// The serialized tool result (or error message).
    pub text: String,
}

impl ToolResponse {
    fn ok(payload: impl Serialize) -> Self {
        let text = serde_json::to_string(&payload).unwrap_or_else(|e| {
            json!({ "error": format!("failed to serialize tool result: {e}") }).to_string()
        });
        Self {
            content: vec![ContentBlock { kind: "text", text }],
            is_error: false,
        }
    }

    fn error(message: impl Into<String>) -> Self {
        Self {
            content: vec![ContentBlock {
                kind: "text",
                text: message.into(),
            }],
            is_error: true,
        }
    }
}

/// Errors from the bridge's own I/O loop (not individual tool dispatch
/// failures, which are reported as `isError` responses rather than
/// propagated).
#[derive(Debug, Error)]
pub enum BridgeError {
    /// The line could not be parsed as a [`ToolRequest`].
    #[error("invalid request line: {0}")]
    InvalidRequest(String),
    /// Writing a response to the output stream failed.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Where each tool's HTTP request goes and how it's shaped.
///
/// Seeded with the default role-to-port map; `register` overrides an
/// entry, e.g. in a test or a non-default deployment.
pub struct Bridge {
    client: reqwest::Client,
    coordinator_base: String,
    clone_bases: HashMap<Role, String>,
}

impl Bridge {
    /// Build a bridge whose coordinator lives at `coordinator_base` and
    /// whose specialists live at their default ports on localhost.
    #[must_use]
    pub fn new(coordinator_base: impl Into<String>) -> Self {
        let mut clone_bases = HashMap::new();
        for role in Role::ALL {
            clone_bases.insert(role, format!("http://127.0.0.1:{}", role.default_external_port()));
        }
        Self {
            client: reqwest::Client::new(),
            coordinator_base: coordinator_base.into(),
            clone_bases,
        }
    }

    /// Override the base URL for `role` (the coordinator is addressed
    /// separately via its own configured base).
    pub fn register(&mut self, role: Role, base_url: impl Into<String>) {
        self.clone_bases.insert(role, base_url.into());
    }

    fn base_for(&self, role: Role) -> &str {
        if role == Role::Coordinator {
            &self.coordinator_base
        } else {
            self.clone_bases.get(&role).map(String::as_str).unwrap_or(&self.coordinator_base)
        }
    }

    /// Dispatch one parsed [`ToolRequest`], producing a [`ToolResponse`].
    /// Never returns an `Err` for a tool-level failure — those become
    /// `isError: true` responses, per the tool bridge's "no silent
    /// failure" requirement.
    pub async fn dispatch(&self, req: ToolRequest) -> ToolResponse {
        let Some(params) = req.params else {
            return ToolResponse::error("missing params");
        };
        let Some(name) = params.name else {
            return ToolResponse::error("missing params.name");
        };

        match name.as_str() {
            "health_check" => self.call_get(&self.coordinator_base, "/network-status", DEFAULT_TOOL_TIMEOUT).await,
            "beta_analyze" => self.call_specialization(Role::Analyzer, params.arguments).await,
            "gamma_design" => self.call_specialization(Role::Architect, params.arguments).await,
            "delta_test" => self.call_specialization(Role::Tester, params.arguments).await,
            "sigma_document" => self.call_specialization(Role::Communicator, params.arguments).await,
            "omega_orchestrate" => {
                self.call_post(&self.coordinator_base, "/orchestrate", params.arguments, ORCHESTRATE_TOOL_TIMEOUT)
                    .await
            }
            "store_artifact" => {
                self.call_post(&self.coordinator_base, "/artifacts", params.arguments, DEFAULT_TOOL_TIMEOUT)
                    .await
            }
            "get_artifact" => self.call_get_artifact(params.arguments).await,
            "audit_log" => self.call_audit_log(params.arguments).await,
            other => ToolResponse::error(format!("unknown tool: {other}")),
        }
    }

    async fn call_specialization(&self, role: Role, arguments: Value) -> ToolResponse {
        let Some(path) = role.specialization_path() else {
            return ToolResponse::error(format!("{role} has no specialization endpoint"));
        };
        self.call_post(self.base_for(role), path, arguments, DEFAULT_TOOL_TIMEOUT).await
    }

    async fn call_get_artifact(&self, arguments: Value) -> ToolResponse {
        let Some(id) = arguments.get("artifactId").and_then(Value::as_str) else {
            return ToolResponse::error("get_artifact requires arguments.artifactId");
        };
        let manifest_only = arguments
            .get("manifestOnly")
            .and_then(Value::as_bool)
            .unwrap_or(false);
        let path = format!("/artifacts/{id}{}", if manifest_only { "?manifestOnly=true" } else { "" });
        self.call_get(&self.coordinator_base, &path, DEFAULT_TOOL_TIMEOUT).await
    }

    async fn call_audit_log(&self, arguments: Value) -> ToolResponse {
        let Some(clone_name) = arguments.get("clone").and_then(Value::as_str) else {
            return ToolResponse::error("audit_log requires arguments.clone");
        };
        let Ok(role) = clone_name.parse::<Role>() else {
            return ToolResponse::error(format!("unknown clone: {clone_name}"));
        };
        let task_id = arguments.get("taskId").and_then(Value::as_str).unwrap_or_default();
        let path = format!("/audit?taskId={task_id}");
        self.call_get(self.base_for(role), &path, DEFAULT_TOOL_TIMEOUT).await
    }

    async fn call_get(&self, base: &str, path: &str, timeout: Duration) -> ToolResponse {
        let url = format!("{base}{path}");
        match self.client.get(&url).timeout(timeout).send().await {
            Ok(resp) => Self::response_to_tool_response(resp).await,
            Err(e) => Self::request_error_to_tool_response(e, timeout),
        }
    }

    async fn call_post(&self, base: &str, path: &str, body: Value, timeout: Duration) -> ToolResponse {
        let url = format!("{base}{path}");
        match self.client.post(&url).timeout(timeout).json(&body).send().await {
            Ok(resp) => Self::response_to_tool_response(resp).await,
            Err(e) => Self::request_error_to_tool_response(e, timeout),
        }
    }

    async fn response_to_tool_response(resp: reqwest::Response) -> ToolResponse {
        let status = resp.status();
        match resp.json::<Value>().await {
            Ok(body) if status.is_success() => ToolResponse::ok(body),
            Ok(body) => ToolResponse::error(
                body.get("error")
                    .and_then(Value::as_str)
                    .map(str::to_string)
                    .unwrap_or_else(|| format!("request failed with status {status}")),
            ),
            Err(e) => ToolResponse::error(format!("could not parse backend response: {e}")),
        }
    }

    fn request_error_to_tool_response(e: reqwest::Error, timeout: Duration) -> ToolResponse {
        if e.is_timeout() {
            ToolResponse::error(format!("tool call timed out after {timeout:?}"))
        } else {
            ToolResponse::error(format!("request error: {e}"))
        }
    }

    /// Run the bridge's read-dispatch-write loop over real stdin/stdout
    /// until stdin closes.
    pub async fn run_stdio(&self) -> Result<(), BridgeError> {
        let stdin = tokio::io::stdin();
        let mut stdout = tokio::io::stdout();
        self.run_with_io(stdin, &mut stdout).await
    }

    /// Run the loop with injectable I/O, for testing.
    pub async fn run_with_io<R, W>(&self, reader: R, writer: &mut W) -> Result<(), BridgeError>
    where
        R: tokio::io::AsyncRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        let mut lines = BufReader::new(reader).lines();
        while let Some(line) = lines.next_line().await? {
            if line.trim().is_empty() {
                continue;
            }
            let response = match serde_json::from_str::<ToolRequest>(&line) {
                Ok(req) => self.dispatch(req).await,
                Err(e) => {
                    warn!(error = %e, "failed to parse tool bridge request line");
                    ToolResponse::error(format!("invalid request line: {e}"))
                }
            };
            let mut out = serde_json::to_string(&response).unwrap_or_else(|e| {
                json!({ "content": [{"type": "text", "text": e.to_string()}], "isError": true }).to_string()
            });
            out.push('\n');
            writer.write_all(out.as_bytes()).await?;
            writer.flush().await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn missing_params_is_a_structured_error() {
        let bridge = Bridge::new("http://127.0.0.1:3000");
        let resp = bridge.dispatch(ToolRequest { params: None }).await;
        assert!(resp.is_error);
        assert!(resp.content[0].text.contains("missing params"));
    }

    #[tokio::test]
    async fn missing_name_is_a_structured_error() {
        let bridge = Bridge::new("http://127.0.0.1:3000");
        let resp = bridge
            .dispatch(ToolRequest {
                params: Some(ToolParams { name: None, arguments: json!({}) }),
            })
            .await;
        assert!(resp.is_error);
    }

    #[tokio::test]
    async fn unknown_tool_name_is_a_structured_error() {
        let bridge = Bridge::new("http://127.0.0.1:3000");
        let resp = bridge
            .dispatch(ToolRequest {
                params: Some(ToolParams {
                    name: Some("theta_invent".to_string()),
                    arguments: json!({}),
                }),
            })
            .await;
        assert!(resp.is_error);
        assert!(resp.content[0].text.contains("unknown tool"));
    }

    #[tokio::test]
    async fn health_check_dispatches_to_network_status() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/network-status"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"coordinator": {}, "clones": {}})))
            .mount(&mock_server)
            .await;

        let bridge = Bridge::new(mock_server.uri());
        let resp = bridge
            .dispatch(ToolRequest {
                params: Some(ToolParams { name: Some("health_check".to_string()), arguments: json!({}) }),
            })
            .await;
        assert!(!resp.is_error);
    }

    #[tokio::test]
    async fn audit_log_rejects_unknown_clone_name() {
        let bridge = Bridge::new("http://127.0.0.1:3000");
        let resp = bridge
            .dispatch(ToolRequest {
                params: Some(ToolParams {
                    name: Some("audit_log".to_string()),
                    arguments: json!({"clone": "theta", "taskId": "t1"}),
                }),
            })
            .await;
        assert!(resp.is_error);
    }

    #[tokio::test]
    async fn stdio_loop_reads_one_request_and_writes_one_response() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/network-status"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"coordinator": {}, "clones": {}})))
            .mount(&mock_server)
            .await;

        let bridge = Bridge::new(mock_server.uri());
        let input = b"{\"params\":{\"name\":\"health_check\",\"arguments\":{}}}\n".to_vec();
        let mut output = Vec::new();
        bridge.run_with_io(&input[..], &mut output).await.unwrap();

        let lines: Vec<&[u8]> = output.split(|&b| b == b'\n').filter(|l| !l.is_empty()).collect();
        assert_eq!(lines.len(), 1);
        let parsed: Value = serde_json::from_slice(lines[0]).unwrap();
        assert!(parsed["isError"].is_null());
        assert!(parsed["content"][0]["type"] == "text");
    }
}
