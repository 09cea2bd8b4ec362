// src/errors.rs

//! Error taxonomy for the proxy core, per the propagation policy: only
//! `ConfigError` is fatal at startup. Everything else is caught at its task
//! boundary and logged.

use std::net::AddrParseError;
use thiserror::Error;

/// Fatal at startup: the process cannot run without valid configuration.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("invalid listen address '{0}': {1}")]
    InvalidListenAddr(String, AddrParseError),

    #[error("invalid sentinel endpoint '{0}': {1}")]
    InvalidSentinelEndpoint(String, String),

    #[error("sentinel list is empty")]
    EmptySentinelList,
}

/// Failures talking to a single Sentinel endpoint. Logged and the caller
/// rotates to the next IP/Sentinel; never propagated past the tracker.
#[derive(Error, Debug)]
pub enum SentinelError {
    #[error("failed to resolve {host}:{port}: {source}")]
    Resolve {
        host: String,
        port: u16,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to connect to {0}: {1}")]
    Connect(std::net::SocketAddr, #[source] std::io::Error),

    #[error("malformed reply from sentinel: {0}")]
    Protocol(String),

    #[error("io error talking to sentinel: {0}")]
    Io(#[from] std::io::Error),
}

/// A Sentinel-advertised leader failed its TCP probe. The cell is left
/// untouched; the tracker retries on the next cycle.
#[derive(Error, Debug)]
pub enum ValidationError {
    #[error("candidate leader {0} refused connection within the configured timeout: {1}")]
    ProbeFailed(std::net::SocketAddr, #[source] std::io::Error),
}

/// A proxied connection pair failed to reach its backend. Causes the pair
/// to tear down; never propagated upward past the connection pair's own
/// task.
#[derive(Error, Debug)]
pub enum PipeError {
    #[error("failed to dial backend {0}: {1}")]
    DialBackend(std::net::SocketAddr, #[source] std::io::Error),
}
