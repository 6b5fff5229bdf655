// SPDX-License-Identifier: MIT OR Apache-2.0
//! Configuration loading, validation, and merging for clone-mesh binaries.
#![deny(unsafe_code)]
#![warn(missing_docs)]

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Errors that can occur during configuration loading or validation.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// The requested configuration file was not found.
    #[error("config file not found: {path}")]
    FileNotFound {
        /// Path that was requested.
        path: String,
    },

    /// The file could not be parsed as valid TOML.
    #[error("failed to parse config: {reason}")]
    ParseError {
        /// Human-readable parse error detail.
        reason: String,
    },

    /// Semantic validation failed (one or more problems).
    #[error("config validation failed: {reasons:?}")]
    ValidationError {
        /// Individual validation failure messages.
        reasons: Vec<String>,
    },
}

/// Advisory-level issues that do not prevent startup but deserve attention.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigWarning {
    /// A recommended optional field is missing.
    MissingOptionalField {
        /// Name of the missing field.
        field: String,
        /// Why it matters.
        hint: String,
    },
    /// `audit_retention_days` is unusually large.
    LargeRetention {
        /// The configured retention window, in days.
        days: i64,
    },
}

impl std::fmt::Display for ConfigWarning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigWarning::MissingOptionalField { field, hint } => {
                write!(f, "missing optional field '{field}': {hint}")
            }
            ConfigWarning::LargeRetention { days } => {
                write!(f, "audit_retention_days is unusually large ({days} days)")
            }
        }
    }
}

/// The log output format, selected by `CM_LOG_FORMAT`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    /// Human-readable, ANSI-colored output (the default).
    Pretty,
    /// Newline-delimited JSON, one object per event.
    Json,
}

impl Default for LogFormat {
    fn default() -> Self {
        Self::Pretty
    }
}

/// Top-level runtime configuration shared by every clone-mesh binary.
#[derive(Debug, Clone, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
pub struct CloneMeshConfig {
    /// The port this process binds to. `None` defers to the role's default
    /// (`cm_core::Role::default_external_port`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,

    /// API key for the configured LLM backend. Required unless `test_mode`
    /// is set.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub llm_api_key: Option<String>,

    /// Root directory for artifacts, manifests, and the audit log.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workspace_root: Option<String>,

    /// How many days of audit logs to retain.
    #[serde(default = "default_retention_days")]
    pub audit_retention_days: i64,

    /// The log output format.
    #[serde(default)]
    pub log_format: LogFormat,

    /// When `true`, `validate_config` does not require `llm_api_key` — the
    /// process will run against `cm_llm::TestBackend` instead of a real
    /// vendor endpoint.
    #[serde(default)]
    pub test_mode: bool,
}

fn default_retention_days() -> i64 {
    30
}

impl Default for CloneMeshConfig {
    fn default() -> Self {
        Self {
            port: None,
            llm_api_key: None,
            workspace_root: None,
            audit_retention_days: default_retention_days(),
            log_format: LogFormat::default(),
            test_mode: false,
        }
    }
}

const MAX_SANE_RETENTION_DAYS: i64 = 3650;
const LARGE_RETENTION_THRESHOLD: i64 = 365;

/// Load a [`CloneMeshConfig`] from an optional TOML file path.
///
/// * If `path` is `Some`, reads and parses the file.
/// * If `path` is `None`, starts from [`CloneMeshConfig::default`].
///
/// Environment variable overrides are always applied on top, so a file is
/// never the sole source of truth for a production deployment.
///
/// # Errors
///
/// Returns [`ConfigError::FileNotFound`] if `path` is given but unreadable,
/// or [`ConfigError::ParseError`] if its contents are not valid TOML for
/// this shape.
pub fn load_config(path: Option<&Path>) -> Result<CloneMeshConfig, ConfigError> {
    let mut config = match path {
        Some(p) => {
            let content = std::fs::read_to_string(p).map_err(|_| ConfigError::FileNotFound {
                path: p.display().to_string(),
            })?;
            parse_toml(&content)?
        }
        None => CloneMeshConfig::default(),
    };
    apply_env_overrides(&mut config);
    Ok(config)
}

/// Parse a TOML string into a [`CloneMeshConfig`].
///
/// # Errors
///
/// Returns [`ConfigError::ParseError`] if `content` is not valid TOML for
/// this shape.
pub fn parse_toml(content: &str) -> Result<CloneMeshConfig, ConfigError> {
    toml::from_str::<CloneMeshConfig>(content).map_err(|e| ConfigError::ParseError {
        reason: e.to_string(),
    })
}

/// Apply environment variable overrides.
///
/// Recognised variables: `PORT`, `LLM_API_KEY`, `WORKSPACE_ROOT`,
/// `AUDIT_RETENTION_DAYS`, `CM_LOG_FORMAT` (`pretty`|`json`).
pub fn apply_env_overrides(config: &mut CloneMeshConfig) {
    if let Ok(val) = std::env::var("PORT") {
        if let Ok(port) = val.parse() {
            config.port = Some(port);
        }
    }
    if let Ok(val) = std::env::var("LLM_API_KEY") {
        config.llm_api_key = Some(val);
    }
    if let Ok(val) = std::env::var("WORKSPACE_ROOT") {
        config.workspace_root = Some(val);
    }
    if let Ok(val) = std::env::var("AUDIT_RETENTION_DAYS") {
        if let Ok(days) = val.parse() {
            config.audit_retention_days = days;
        }
    }
    if let Ok(val) = std::env::var("CM_LOG_FORMAT") {
        match val.as_str() {
            "json" => config.log_format = LogFormat::Json,
            "pretty" => config.log_format = LogFormat::Pretty,
            _ => {}
        }
    }
}

/// Validate a loaded configuration, returning advisory warnings.
///
/// Hard errors (`port == 0`, a non-positive retention window, or a missing
/// `llm_api_key` outside `test_mode`) are returned as
/// [`ConfigError::ValidationError`]; soft issues come back as warnings.
///
/// # Errors
///
/// Returns [`ConfigError::ValidationError`] if any hard check fails.
pub fn validate_config(config: &CloneMeshConfig) -> Result<Vec<ConfigWarning>, ConfigError> {
    let mut errors: Vec<String> = Vec::new();
    let mut warnings: Vec<ConfigWarning> = Vec::new();

    if let Some(0) = config.port {
        errors.push("port must not be 0".to_string());
    }

    if config.audit_retention_days <= 0 {
        errors.push("audit_retention_days must be positive".to_string());
    } else if config.audit_retention_days > MAX_SANE_RETENTION_DAYS {
        errors.push(format!(
            "audit_retention_days {} exceeds the maximum of {MAX_SANE_RETENTION_DAYS}",
            config.audit_retention_days
        ));
    } else if config.audit_retention_days > LARGE_RETENTION_THRESHOLD {
        warnings.push(ConfigWarning::LargeRetention {
            days: config.audit_retention_days,
        });
    }

    if !config.test_mode {
        let key_missing = config
            .llm_api_key
            .as_deref()
            .map(|k| k.trim().is_empty())
            .unwrap_or(true);
        if key_missing {
            errors.push("llm_api_key must be set and non-empty outside test_mode".to_string());
        }
    }

    if config.workspace_root.is_none() {
        warnings.push(ConfigWarning::MissingOptionalField {
            field: "workspace_root".to_string(),
            hint: "defaults to the current working directory".to_string(),
        });
    }

    if errors.is_empty() {
        Ok(warnings)
    } else {
        Err(ConfigError::ValidationError { reasons: errors })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn default_config_in_test_mode_is_valid() {
        let cfg = CloneMeshConfig {
            test_mode: true,
            ..Default::default()
        };
        let warnings = validate_config(&cfg).unwrap();
        assert!(warnings.iter().any(|w| matches!(w, ConfigWarning::MissingOptionalField { .. })));
    }

    #[test]
    fn missing_llm_api_key_outside_test_mode_is_a_hard_error() {
        let cfg = CloneMeshConfig::default();
        let err = validate_config(&cfg).unwrap_err();
        assert!(matches!(err, ConfigError::ValidationError { .. }));
    }

    #[test]
    fn zero_port_is_rejected() {
        let cfg = CloneMeshConfig {
            port: Some(0),
            test_mode: true,
            ..Default::default()
        };
        let err = validate_config(&cfg).unwrap_err();
        match err {
            ConfigError::ValidationError { reasons } => {
                assert!(reasons.iter().any(|r| r.contains("port")));
            }
            other => panic!("expected ValidationError, got {other:?}"),
        }
    }

    #[test]
    fn large_retention_produces_a_warning_not_an_error() {
        let cfg = CloneMeshConfig {
            audit_retention_days: 900,
            test_mode: true,
            workspace_root: Some("/tmp".into()),
            ..Default::default()
        };
        let warnings = validate_config(&cfg).unwrap();
        assert!(warnings.iter().any(|w| matches!(w, ConfigWarning::LargeRetention { .. })));
    }

    #[test]
    fn absurd_retention_is_a_hard_error() {
        let cfg = CloneMeshConfig {
            audit_retention_days: 100_000,
            test_mode: true,
            ..Default::default()
        };
        assert!(validate_config(&cfg).is_err());
    }

    #[test]
    fn parse_invalid_toml_gives_parse_error() {
        let err = parse_toml("this is [not valid toml =").unwrap_err();
        assert!(matches!(err, ConfigError::ParseError { .. }));
    }

    #[test]
    fn parse_valid_toml_string() {
        let toml_str = r#"
            port = 3000
            workspace_root = "/var/lib/clone-mesh"
            audit_retention_days = 14
            log_format = "json"
        "#;
        let cfg = parse_toml(toml_str).unwrap();
        assert_eq!(cfg.port, Some(3000));
        assert_eq!(cfg.log_format, LogFormat::Json);
        assert_eq!(cfg.audit_retention_days, 14);
    }

    #[test]
    fn env_overrides_win_over_file_values() {
        std::env::set_var("PORT", "4100");
        let mut cfg = parse_toml("port = 3000").unwrap();
        apply_env_overrides(&mut cfg);
        assert_eq!(cfg.port, Some(4100));
        std::env::remove_var("PORT");
    }

    #[test]
    fn load_config_from_file_on_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("clone-mesh.toml");
        let mut f = std::fs::File::create(&path).unwrap();
        writeln!(f, "audit_retention_days = 7\ntest_mode = true").unwrap();
        let cfg = load_config(Some(&path)).unwrap();
        assert_eq!(cfg.audit_retention_days, 7);
        assert!(cfg.test_mode);
    }

    #[test]
    fn load_missing_file_gives_file_not_found() {
        let err = load_config(Some(Path::new("/nonexistent/clone-mesh.toml"))).unwrap_err();
        assert!(matches!(err, ConfigError::FileNotFound { .. }));
    }

    #[test]
    fn load_none_path_returns_default() {
        let cfg = load_config(None).unwrap();
        assert_eq!(cfg.audit_retention_days, 30);
    }
}
