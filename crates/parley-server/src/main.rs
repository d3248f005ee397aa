//! Parley Coordinator Server
//!
//! Main entry point for the Parley coordinator: the central authority for
//! node registration, chatroom placement, dead-node eviction, and the
//! two-phase-commit layer over the data nodes.

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing_subscriber::prelude::*;

use parley_cluster::{
    Cleaner, NodeRegistry, NodeRpc, Operations, Placement, TcpRpc, TwoPhaseEngine, TxnCoordinator,
};
use parley_common::config::CoordinatorConfig;
use parley_server::serve;

/// Parley - coordinator for a distributed chat platform
#[derive(Parser, Debug)]
#[command(name = "parley")]
#[command(version, about, long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = "config/parley.toml")]
    config: PathBuf,

    /// Override listen address
    #[arg(long)]
    listen: Option<String>,

    /// Override the client/registration port
    #[arg(long)]
    port: Option<u16>,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let config = load_config(&args)?;

    // Initialize logging with config-driven level and format
    let log_level = if args.verbose {
        "debug"
    } else {
        &config.logging.level
    };
    let env_filter = tracing_subscriber::filter::EnvFilter::try_from_default_env()
        .or_else(|_| tracing_subscriber::filter::EnvFilter::try_new(log_level))
        .unwrap_or_else(|_| tracing_subscriber::filter::EnvFilter::new("info"));

    let use_json = config.logging.format == "json";

    let console_layer: Box<dyn tracing_subscriber::Layer<_> + Send + Sync> = if use_json {
        Box::new(tracing_subscriber::fmt::layer().with_target(true).json())
    } else {
        Box::new(tracing_subscriber::fmt::layer().with_target(true))
    };

    // Optional file layer with daily rotation
    let file_layer: Option<Box<dyn tracing_subscriber::Layer<_> + Send + Sync>> =
        if let Some(ref log_file) = config.logging.file {
            let file_appender = tracing_appender::rolling::daily(
                log_file
                    .parent()
                    .unwrap_or_else(|| std::path::Path::new(".")),
                log_file
                    .file_name()
                    .unwrap_or_else(|| std::ffi::OsStr::new("parley.log")),
            );
            let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);
            // Leak the guard so file logging stays active for the process lifetime
            std::mem::forget(guard);

            if use_json {
                Some(Box::new(
                    tracing_subscriber::fmt::layer()
                        .with_writer(non_blocking)
                        .with_ansi(false)
                        .json(),
                ))
            } else {
                Some(Box::new(
                    tracing_subscriber::fmt::layer()
                        .with_writer(non_blocking)
                        .with_ansi(false),
                ))
            }
        } else {
            None
        };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(console_layer)
        .with(file_layer)
        .init();

    print_banner();

    info!("Loading configuration from {:?}", args.config);

    if let Err(errors) = config.validate() {
        for err in &errors {
            tracing::error!("Config validation error: {}", err);
        }
        anyhow::bail!(
            "Configuration validation failed with {} error(s). \
             See log output above for details.",
            errors.len()
        );
    }

    info!("Starting Parley coordinator...");
    info!("Sweep interval: {:?}", config.sweep.interval);
    info!(
        "Fail-skip voting: {}",
        if config.two_phase.require_full_quorum {
            "disabled (full quorum required)"
        } else {
            "enabled"
        }
    );

    // Wire up the coordination stack
    let registry = Arc::new(NodeRegistry::new());
    let rpc: Arc<dyn NodeRpc> = Arc::new(TcpRpc::new(config.rpc.clone()));
    let cleaner = Arc::new(Cleaner::new(
        registry.clone(),
        rpc.clone(),
        config.sweep.clone(),
    ));
    let coordinator = Arc::new(TxnCoordinator::new());
    let engine = Arc::new(TwoPhaseEngine::new(
        coordinator.clone(),
        rpc.clone(),
        config.two_phase.clone(),
    ));
    let placement = Arc::new(Placement::new(
        registry.clone(),
        rpc.clone(),
        cleaner.clone(),
    ));
    let ops = Arc::new(Operations::new(
        registry,
        coordinator,
        engine,
        placement,
        rpc,
        config.client_port,
    ));

    // Background registry sweep
    let sweeper = cleaner.clone();
    tokio::spawn(async move {
        sweeper.run().await;
    });

    let addr = format!("{}:{}", config.listen_addr, config.client_port);
    let listener = TcpListener::bind(&addr).await?;
    info!("Parley coordinator listening on {}", addr);

    // Graceful shutdown on SIGINT/SIGTERM
    let cancel = CancellationToken::new();
    let shutdown_cancel = cancel.clone();
    let shutdown_cleaner = cleaner.clone();
    tokio::spawn(async move {
        let ctrl_c = async {
            tokio::signal::ctrl_c()
                .await
                .expect("Failed to listen for ctrl+c");
        };

        #[cfg(unix)]
        let terminate = async {
            tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
                .expect("Failed to listen for SIGTERM")
                .recv()
                .await;
        };

        #[cfg(not(unix))]
        let terminate = std::future::pending::<()>();

        tokio::select! {
            _ = ctrl_c => info!("Received SIGINT, initiating graceful shutdown..."),
            _ = terminate => info!("Received SIGTERM, initiating graceful shutdown..."),
        }

        shutdown_cleaner.stop();
        shutdown_cancel.cancel();
    });

    serve(listener, ops, config.rpc.max_frame_size, cancel).await;

    info!("Parley coordinator stopped");
    Ok(())
}

fn print_banner() {
    println!(
        r#"
  ____   _    ____  _     _______   __
 |  _ \ / \  |  _ \| |   | ____\ \ / /
 | |_) / _ \ | |_) | |   |  _|  \ V /
 |  __/ ___ \|  _ <| |___| |___  | |
 |_| /_/   \_\_| \_\_____|_____| |_|

  Distributed Chat Platform Coordinator
  Version: {}
"#,
        env!("CARGO_PKG_VERSION")
    );
}

fn load_config(args: &Args) -> anyhow::Result<CoordinatorConfig> {
    let mut config = if args.config.exists() {
        let content = std::fs::read_to_string(&args.config)?;
        toml::from_str(&content)?
    } else {
        CoordinatorConfig::default()
    };

    // Apply command line overrides
    if let Some(listen) = &args.listen {
        config.listen_addr = listen.clone();
    }
    if let Some(port) = args.port {
        config.client_port = port;
    }

    // Apply environment variable overrides (highest priority)
    if let Ok(val) = std::env::var("PARLEY_LISTEN_ADDR") {
        config.listen_addr = val;
    }
    if let Ok(val) = std::env::var("PARLEY_CLIENT_PORT") {
        if let Ok(port) = val.parse() {
            config.client_port = port;
        }
    }
    if let Ok(val) = std::env::var("PARLEY_LOG_LEVEL") {
        config.logging.level = val;
    }
    if let Ok(val) = std::env::var("PARLEY_SWEEP_INTERVAL") {
        if let Ok(interval) = humantime::parse_duration(&val) {
            config.sweep.interval = interval;
        }
    }
    if let Ok(val) = std::env::var("PARLEY_REQUIRE_FULL_QUORUM") {
        if let Ok(required) = val.parse() {
            config.two_phase.require_full_quorum = required;
        }
    }

    Ok(config)
}
