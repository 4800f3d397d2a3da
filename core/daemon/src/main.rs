//! formcoach-daemon entrypoint.

use clap::Parser;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{error, info, warn};

use formcoach_daemon::config::load_config;
use formcoach_daemon::logging;
use formcoach_daemon::server;
use formcoach_daemon::state::{spawn_idle_sweeper, SharedState};

#[derive(Debug, Parser)]
#[command(name = "formcoach-daemon", version, about = "Live exercise-form coaching service")]
struct Cli {
    /// Path to the TOML config file.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Overrides the configured listen address.
    #[arg(long)]
    bind: Option<SocketAddr>,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    let _log_guard = logging::init();

    let mut config = match load_config(cli.config) {
        Ok(config) => config,
        Err(err) => {
            error!(error = %err, "Failed to load config");
            std::process::exit(1);
        }
    };
    if let Err(err) = config.apply_env() {
        error!(error = %err, "Invalid environment override");
        std::process::exit(1);
    }
    if let Some(bind) = cli.bind {
        config.server.bind_addr = bind;
    }

    let state = match SharedState::from_config(&config) {
        Ok(state) => Arc::new(state),
        Err(err) => {
            error!(error = %err, "Failed to initialize daemon state");
            std::process::exit(1);
        }
    };

    if config.vision.base_url.is_none() {
        warn!("No vision service configured; frame analysis will answer python_unavailable");
    }

    let listener = match TcpListener::bind(config.server.bind_addr).await {
        Ok(listener) => listener,
        Err(err) => {
            error!(error = %err, addr = %config.server.bind_addr, "Failed to bind listener");
            std::process::exit(1);
        }
    };

    info!(
        addr = %config.server.bind_addr,
        vision_url = config.vision.base_url.as_deref().unwrap_or("<unset>"),
        end_policy = ?config.sessions.end_without_session,
        "formcoach daemon started"
    );

    let sweeper = spawn_idle_sweeper(Arc::clone(&state), &config.registry);

    let result = server::serve(
        listener,
        state,
        config.server.max_frame_bytes,
        shutdown_signal(),
    )
    .await;
    sweeper.abort();

    if let Err(err) = result {
        error!(error = %err, "Server terminated with error");
        std::process::exit(1);
    }
    info!("formcoach daemon stopped");
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        warn!(error = %err, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    info!("Shutdown requested");
}
