// src/tracker.rs

//! Drives the Sentinel client on a schedule, validates candidate leaders by
//! probing them, and publishes accepted ones into the shared `LeaderCell`.
//! Mirrors the shape of `warden::MasterMonitor::run`: independent loops
//! spawned into a `JoinSet` and joined so a panic or unexpected exit in
//! either is visible to the caller.

use std::net::SocketAddr;
use std::time::Duration;

use tokio::task::JoinSet;
use tokio::time::sleep;
use tracing::{debug, info, warn};

use crate::errors::{SentinelError, ValidationError};
use crate::leader::{LeaderAddress, LeaderCell, SharedLeaderCell};
use crate::sentinel::{self, SentinelEndpoint};

/// Delay between full sweeps of the Sentinel list in event mode when every
/// Sentinel was unreachable. Keeps the outer reconnect loop from hot-spinning
/// without the full exponential backoff a longer-lived connection would
/// warrant, since each sweep already performs one blocking dial per Sentinel.
const EVENT_MODE_EMPTY_SWEEP_DELAY: Duration = Duration::from_secs(1);

#[derive(Debug, Clone)]
pub struct TrackerConfig {
    pub sentinels: Vec<SentinelEndpoint>,
    pub master_name: String,
    pub username: Option<String>,
    pub password: Option<String>,
    pub timeout_ms: u64,
    pub check_ms: u64,
    pub event_listener: bool,
}

impl TrackerConfig {
    fn dial_timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

/// Spawns the polling loop and, if enabled, the event loop, and runs them
/// until one of them exits (which should never happen in normal operation).
pub async fn run(cfg: TrackerConfig, cell: SharedLeaderCell) {
    let mut tasks: JoinSet<()> = JoinSet::new();

    if cfg.check_ms > 0 {
        let cfg = cfg.clone();
        let cell = cell.clone();
        tasks.spawn(async move { run_polling_loop(cfg, cell).await });
    } else {
        info!("polling disabled (checkms=0)");
    }

    if cfg.event_listener {
        let cfg = cfg.clone();
        let cell = cell.clone();
        tasks.spawn(async move { run_event_loop(cfg, cell).await });
    }

    if tasks.is_empty() {
        warn!("neither polling nor event-listener discovery is enabled; leader will never be set");
        std::future::pending::<()>().await;
        return;
    }

    if let Some(res) = tasks.join_next().await {
        if let Err(e) = res {
            warn!("a tracker task panicked: {e:?}");
        }
    }
}

async fn run_polling_loop(cfg: TrackerConfig, cell: SharedLeaderCell) {
    loop {
        if let Some((host, port)) = poll_once(&cfg).await {
            validate_and_publish(&cfg, &cell, &host, port).await;
        } else {
            warn!("poll cycle found no valid leader from any sentinel");
        }

        let cold_start = cell.read().0.is_none();
        if cold_start {
            // The cluster is probably still converging; slow our roll.
            sleep(Duration::from_secs(cfg.check_ms)).await;
        } else {
            sleep(Duration::from_millis(cfg.check_ms)).await;
        }
    }
}

/// One polling cycle: try each configured Sentinel in order, and within each,
/// each resolved IP in turn. The first Sentinel/IP that answers
/// `get-master-addr-by-name` wins the cycle; later Sentinels are not
/// consulted. The returned candidate is still subject to the probe in
/// `validate_and_publish`.
async fn poll_once(cfg: &TrackerConfig) -> Option<(String, u16)> {
    for endpoint in &cfg.sentinels {
        let addrs = match sentinel::resolve(endpoint).await {
            Ok(addrs) => addrs,
            Err(e) => {
                warn!("resolve failed for sentinel {}:{}: {e}", endpoint.host, endpoint.port);
                continue;
            }
        };

        for addr in addrs {
            match query_leader(cfg, addr).await {
                Ok(candidate) => return Some(candidate),
                Err(e) => {
                    warn!("sentinel {addr} did not yield a usable leader: {e}");
                    continue;
                }
            }
        }
    }
    None
}

async fn query_leader(cfg: &TrackerConfig, sentinel_addr: SocketAddr) -> Result<(String, u16), String> {
    let mut stream = sentinel::connect(sentinel_addr, cfg.dial_timeout())
        .await
        .map_err(|e| e.to_string())?;
    sentinel::authenticate(
        &mut stream,
        cfg.username.as_deref(),
        cfg.password.as_deref(),
        cfg.dial_timeout(),
    )
    .await
    .map_err(|e| e.to_string())?;
    let (host, port) = sentinel::get_leader(&mut stream, &cfg.master_name, cfg.dial_timeout())
        .await
        .map_err(|e| e.to_string())?;
    Ok((host, port))
}

async fn run_event_loop(cfg: TrackerConfig, cell: SharedLeaderCell) {
    loop {
        let mut made_progress = false;

        for endpoint in &cfg.sentinels {
            let addrs = match sentinel::resolve(endpoint).await {
                Ok(addrs) => addrs,
                Err(e) => {
                    warn!("resolve failed for sentinel {}:{}: {e}", endpoint.host, endpoint.port);
                    continue;
                }
            };

            for addr in addrs {
                if run_one_event_connection(&cfg, &cell, addr).await {
                    made_progress = true;
                }
            }
        }

        if !made_progress {
            debug!("event loop swept all sentinels with no successful connection, backing off");
            sleep(EVENT_MODE_EMPTY_SWEEP_DELAY).await;
        }
    }
}

/// Connects to one Sentinel, seeds the cell via a one-shot `get_leader`, then
/// subscribes and consumes switch events until disconnect. Returns whether
/// the connection was ever usable (so the outer loop knows whether to back
/// off before rotating).
async fn run_one_event_connection(cfg: &TrackerConfig, cell: &SharedLeaderCell, addr: SocketAddr) -> bool {
    let mut stream = match sentinel::connect(addr, cfg.dial_timeout()).await {
        Ok(stream) => stream,
        Err(e) => {
            warn!("event-mode connect failed for {addr}: {e}");
            return false;
        }
    };

    if let Err(e) = sentinel::authenticate(
        &mut stream,
        cfg.username.as_deref(),
        cfg.password.as_deref(),
        cfg.dial_timeout(),
    )
    .await
    {
        warn!("event-mode auth failed for {addr}: {e}");
    }

    if let Ok((host, port)) = sentinel::get_leader(&mut stream, &cfg.master_name, cfg.dial_timeout()).await {
        validate_and_publish(cfg, cell, &host, port).await;
    }

    let mut sub = match sentinel::subscribe_switch(stream, &cfg.master_name).await {
        Ok(sub) => sub,
        Err(e) => {
            warn!("failed to subscribe on {addr}: {e}");
            return false;
        }
    };

    info!("subscribed to +switch-master on {addr}");
    loop {
        match sub.next_event().await {
            Ok(Some(event)) => {
                info!(
                    "switch-master event: {} -> {}:{}",
                    event.name, event.new_host, event.new_port
                );
                validate_and_publish(cfg, cell, &event.new_host, event.new_port).await;
            }
            Ok(None) => {
                info!("sentinel {addr} closed the subscription connection");
                return true;
            }
            Err(e) => {
                warn!("error reading switch-master events from {addr}: {e}");
                return true;
            }
        }
    }
}

/// The critical routine: dial the candidate, and only if the probe succeeds,
/// publish it to the cell (if it actually differs from the current leader).
/// Sentinel advertisements are trusted only after this probe.
async fn validate_and_publish(cfg: &TrackerConfig, cell: &LeaderCell, host: &str, port: u16) {
    let candidates = match sentinel::resolve_host_port(host, port).await {
        Ok(addrs) => addrs,
        Err(e) => {
            warn!("could not resolve candidate leader {host}:{port}: {e}");
            return;
        }
    };
    let Some(&addr) = candidates.first() else {
        warn!("candidate leader {host}:{port} resolved to no addresses");
        return;
    };

    if let Err(ValidationError::ProbeFailed(addr, source)) = probe(cfg, addr).await {
        warn!("validation failed for candidate leader {addr}: {source}");
        return;
    }

    if cell.update(LeaderAddress::new(addr)) {
        info!("leader changed to {addr}");
    }
}

async fn probe(cfg: &TrackerConfig, addr: SocketAddr) -> Result<(), ValidationError> {
    match sentinel::connect(addr, cfg.dial_timeout()).await {
        Ok(_stream) => Ok(()), // dropped immediately, closing the probe connection
        Err(SentinelError::Connect(addr, source)) => Err(ValidationError::ProbeFailed(addr, source)),
        Err(other) => Err(ValidationError::ProbeFailed(
            addr,
            std::io::Error::other(other.to_string()),
        )),
    }
}
