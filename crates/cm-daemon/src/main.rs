// SPDX-License-Identifier: MIT OR Apache-2.0
#![deny(unsafe_code)]
//! The clone-mesh worker/coordinator process entry point.

use anyhow::{Context, Result};
use clap::Parser;
use cm_artifacts::ArtifactStore;
use cm_config::{apply_env_overrides, load_config, validate_config, CloneMeshConfig, LogFormat};
use cm_core::Role;
use cm_evidence::EvidenceRecorder;
use cm_llm::{AnthropicBackend, BackendConfig, LlmBackend, TestBackend};
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

/// Run one clone-mesh worker, or the coordinator, as a standalone HTTP process.
#[derive(Parser, Debug)]
#[command(name = "cm-daemon", version, about = "Clone mesh worker/coordinator daemon")]
struct Args {
    /// Which role this process plays: coordinator, analyzer, architect, tester, or communicator
    /// (Greek codenames omega/beta/gamma/delta/sigma are also accepted).
    #[arg(long)]
    role: String,

    /// Bind address. Defaults to `0.0.0.0:<PORT>`, where `PORT` comes from the
    /// environment (default 3001) rather than the role's external port —
    /// the external port table in the on-disk layout design is a reverse-proxy
    /// concern, not something a worker hard-codes.
    #[arg(long)]
    bind: Option<String>,

    /// Path to a TOML config file. Environment variables still override it.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Root directory for `artifacts/`, `manifests/`, `audit/`.
    #[arg(long)]
    workspace_root: Option<PathBuf>,

    /// Enable debug-level logging.
    #[arg(long)]
    debug: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let role = Role::from_str(&args.role)
        .map_err(|e| anyhow::anyhow!("unrecognized --role {:?}: {e}", args.role))?;

    let mut config = load_config(args.config.as_deref()).context("loading configuration")?;
    apply_env_overrides(&mut config);
    if args.debug {
        config.log_format = LogFormat::Pretty;
    }

    let warnings = validate_config(&config).context("validating configuration")?;
    init_tracing(&config, args.debug);
    for warning in &warnings {
        warn!(%warning, "configuration warning");
    }

    let workspace_root = args
        .workspace_root
        .or_else(|| config.workspace_root.clone().map(PathBuf::from))
        .unwrap_or_else(std::env::temp_dir);

    let artifacts = Arc::new(
        ArtifactStore::open(workspace_root.join("artifacts_store"))
            .await
            .context("opening artifact store")?,
    );
    let evidence = Arc::new(EvidenceRecorder::with_retention(
        workspace_root.join("audit"),
        config.audit_retention_days,
    ));

    let backend = build_backend(&config)?;
    let default_model = std::env::var("CM_DEFAULT_MODEL").unwrap_or_else(|_| "claude-sonnet".to_string());

    let worker = Arc::new(cm_worker::Worker::new(role, default_model, backend, artifacts, evidence));

    let bind = args
        .bind
        .unwrap_or_else(|| format!("0.0.0.0:{}", config.port.unwrap_or(3001)));
    let listener = tokio::net::TcpListener::bind(&bind)
        .await
        .with_context(|| format!("binding {bind}"))?;

    info!(%role, %bind, "clone mesh worker listening");

    let app = if role == Role::Coordinator {
        cm_coordinator::build_router(Arc::new(cm_coordinator::Coordinator::new(worker)))
    } else {
        cm_worker::build_router(worker)
    };

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("serving HTTP")
}

fn build_backend(config: &CloneMeshConfig) -> Result<Arc<dyn LlmBackend>> {
    if config.test_mode {
        return Ok(Arc::new(TestBackend::default()));
    }

    let api_key = config
        .llm_api_key
        .clone()
        .context("LLM_API_KEY must be set outside test mode")?;

    let backend = AnthropicBackend::new(BackendConfig {
        api_key,
        model: std::env::var("CM_DEFAULT_MODEL").unwrap_or_else(|_| "claude-sonnet".to_string()),
        timeout: Duration::from_secs(30),
        base_url: std::env::var("CM_LLM_BASE_URL")
            .unwrap_or_else(|_| "https://api.anthropic.com/v1/messages".to_string()),
    })
    .map_err(|e| anyhow::anyhow!("{e}"))?;

    Ok(Arc::new(backend))
}

fn init_tracing(config: &CloneMeshConfig, debug: bool) {
    let filter = if debug {
        EnvFilter::new("cm=debug,info")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("cm=info"))
    };

    let subscriber = tracing_subscriber::fmt().with_env_filter(filter);
    match config.log_format {
        LogFormat::Json => subscriber.json().init(),
        LogFormat::Pretty => subscriber.init(),
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        let _ = tokio::signal::ctrl_c().await;
    };

    #[cfg(unix)]
    let terminate = async {
        let mut sigterm = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler");
        sigterm.recv().await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => info!("SIGINT received, shutting down"),
        () = terminate => info!("SIGTERM received, shutting down"),
    }
}
