// Copyright (c) 2026 flowsentry
// Licensed under the MIT License. See LICENSE file in the project root.
// https://github.com/flowsentry/flowsentry

//! FlowSentry - Field Telemetry Pipeline Core
//!
//! Headless pipeline daemon: telemetry ingestion, anomaly detection,
//! device liveness, alert correlation, and mission playback, all fanned
//! out over a single ordered event stream.

use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

use flowsentry::{Config, Engine, VERSION};

/// FlowSentry - Field Telemetry Pipeline Core
#[derive(Parser, Debug)]
#[command(name = "flowsentry")]
#[command(author = "FlowSentry Project")]
#[command(version = VERSION)]
#[command(about = "Field telemetry anomaly detection and incident correlation")]
struct Args {
    /// Configuration file path
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,

    /// Enable trace-level logging
    #[arg(long)]
    trace: bool,

    /// Data output directory
    #[arg(long)]
    data_dir: Option<PathBuf>,

    /// Disable snapshot persistence (volatile run)
    #[arg(long)]
    volatile: bool,
}

fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging
    let log_level = if args.trace {
        Level::TRACE
    } else if args.debug {
        Level::DEBUG
    } else {
        Level::INFO
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_target(false)
        .with_thread_ids(true)
        .with_file(args.debug)
        .with_line_number(args.debug)
        .with_ansi(true)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    info!("FlowSentry v{} - field telemetry pipeline core", VERSION);

    // Load or create configuration
    let config_path = args.config.unwrap_or_else(Config::default_path);
    let mut config = Config::load_or_create(&config_path)?;

    // Override with command line args
    if let Some(data_dir) = args.data_dir {
        config.data_dir = data_dir;
    }
    if args.volatile {
        config.persistence_enabled = false;
    }

    info!("Configuration loaded from {:?}", config_path);

    let rt = tokio::runtime::Runtime::new()?;
    rt.block_on(run(config))
}

async fn run(config: Config) -> Result<()> {
    let engine = Engine::new(config)?;
    engine.start().await?;

    info!("FlowSentry running");
    info!("   Press Ctrl+C to shutdown");

    tokio::signal::ctrl_c().await?;

    info!("Shutdown signal received, cleaning up...");
    engine.stop().await;

    let state = engine.state();
    info!(
        "FlowSentry shutdown complete ({} events published)",
        state.events_published
    );
    Ok(())
}
