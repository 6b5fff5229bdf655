// SPDX-License-Identifier: MIT OR Apache-2.0
#![deny(unsafe_code)]
//! Entry point for the stdio tool bridge: wraps the coordinator's HTTP
//! surface in the fixed tool catalogue an IDE speaks over stdin/stdout.

use anyhow::{Context, Result};
use clap::Parser;
use cm_toolbridge::Bridge;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "cm-tool-bridge", version, about = "Stdio tool bridge for the clone mesh")]
struct Args {
    /// Base URL of the coordinator, e.g. `http://127.0.0.1:3000`.
    #[arg(long, default_value = "http://127.0.0.1:3000")]
    coordinator_url: String,

    /// Enable debug-level logging. Logs go to stderr — stdout is reserved
    /// for the tool protocol.
    #[arg(long)]
    debug: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let filter = if args.debug {
        EnvFilter::new("cm=debug,info")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("cm=info"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let bridge = Bridge::new(args.coordinator_url);
    bridge.run_stdio().await.context("tool bridge stdio loop")
}
