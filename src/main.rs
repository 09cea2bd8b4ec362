// src/main.rs

//! Entry point: parses configuration, wires up the leader cell, tracker, and
//! acceptor, and exits on the first termination signal.

use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use tokio::net::TcpListener;
use tracing::info;

use sentinel_proxy::cli::Cli;
use sentinel_proxy::leader::LeaderCell;
use sentinel_proxy::{acceptor, tracker};

#[cfg(unix)]
use tokio::signal::unix::{SignalKind, signal};
#[cfg(windows)]
use tracing::error;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.debug);

    let config = match cli.into_proxy_config() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("invalid configuration: {e}");
            std::process::exit(1);
        }
    };

    let listener = match TcpListener::bind(config.listen).await {
        Ok(listener) => listener,
        Err(e) => {
            eprintln!("failed to bind {}: {e}", config.listen);
            std::process::exit(1);
        }
    };
    info!("listening on {}", config.listen);

    let cell = Arc::new(LeaderCell::new());
    let dial_timeout = std::time::Duration::from_millis(config.tracker.timeout_ms);

    let tracker_cell = cell.clone();
    tokio::spawn(async move {
        tracker::run(config.tracker, tracker_cell).await;
    });

    tokio::select! {
        _ = acceptor::run(listener, cell, dial_timeout) => {}
        _ = await_shutdown_signal() => {
            info!("shutdown signal received, exiting");
        }
    }

    Ok(())
}

fn init_logging(debug: bool) {
    let default_filter = if debug {
        "info,sentinel_proxy=debug"
    } else {
        "info"
    };
    let log_level = std::env::var("RUST_LOG").unwrap_or_else(|_| default_filter.to_string());
    tracing_subscriber::fmt()
        .with_env_filter(log_level)
        .compact()
        .with_ansi(true)
        .init();
}

/// Waits for a termination signal: SIGINT/SIGTERM on Unix, Ctrl-C on
/// Windows. Mirrors `connection_loop::await_shutdown_signal`.
async fn await_shutdown_signal() {
    #[cfg(unix)]
    {
        let mut sigint = signal(SignalKind::interrupt()).expect("failed to install SIGINT handler");
        let mut sigterm = signal(SignalKind::terminate()).expect("failed to install SIGTERM handler");
        tokio::select! {
            _ = sigint.recv() => info!("SIGINT received"),
            _ = sigterm.recv() => info!("SIGTERM received"),
        }
    }

    #[cfg(windows)]
    {
        match tokio::signal::ctrl_c().await {
            Ok(()) => info!("Ctrl-C received"),
            Err(e) => error!("failed to listen for Ctrl-C: {e}"),
        }
    }
}
