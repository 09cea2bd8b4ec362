// src/acceptor.rs

//! Binds the local endpoint and accepts connections in a loop, dispatching
//! each to its own `ProxyPair` task. Mirrors the accept-loop shape of
//! `warden::listener::run_listener` and `connection_loop::run`'s accept
//! branch, simplified to a single task per connection with no TLS, ACL, or
//! session bookkeeping.

use std::time::Duration;

use tokio::net::TcpListener;
use tracing::{info, warn};

use crate::leader::SharedLeaderCell;
use crate::proxy;

/// Accepts connections until the process exits. Accept errors are logged
/// and the loop continues; they are never fatal once the listener is
/// bound.
pub async fn run(listener: TcpListener, cell: SharedLeaderCell, dial_timeout: Duration) -> ! {
    info!("accepting connections on {}", listener.local_addr().map(|a| a.to_string()).unwrap_or_default());
    loop {
        match listener.accept().await {
            Ok((socket, addr)) => {
                let cell = cell.clone();
                tokio::spawn(async move {
                    proxy::run(socket, addr, &cell, dial_timeout).await;
                });
            }
            Err(e) => {
                warn!("accept failed: {e}");
            }
        }
    }
}
