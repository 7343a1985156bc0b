//! Pod Watcher
//!
//! Mirrors the pods matching a namespace and selector filter, turns every
//! add, update and delete into a keyed event, and hands the events to a
//! deduplicating rate-limited queue drained by a pool of workers.

mod config;
mod controller;
mod error;
mod event;
mod handlers;
mod probes;
mod queue;
mod worker;

use crate::config::Config;
use crate::error::ControllerError;
use controller::Controller;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), ControllerError> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    // kube's rustls backend needs a process-wide crypto provider
    if rustls::crypto::ring::default_provider().install_default().is_err() {
        info!("TLS crypto provider already installed");
    }

    info!("Starting Pod Watcher");

    let config = Config::from_env()?;
    config.log();

    let controller = Controller::new(config).await?;
    controller.run_until(shutdown_signal()).await?;

    info!("Pod Watcher exited cleanly");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => info!("Received Ctrl+C, shutting down"),
        () = terminate => info!("Received SIGTERM, shutting down"),
    }
}
