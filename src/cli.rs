// src/cli.rs

//! Command-line and environment-variable configuration surface, per spec
//! §6. CLI flags take precedence over the equivalently-named environment
//! variable (clap's default behavior when both `long` and `env` are set on
//! an argument).

use std::net::SocketAddr;

use clap::Parser;

use crate::errors::ConfigError;
use crate::sentinel::SentinelEndpoint;
use crate::tracker::TrackerConfig;

#[derive(Debug, Parser)]
#[command(name = "sentinel-proxy", about = "Transparent TCP proxy with Sentinel-based fail-over")]
pub struct Cli {
    /// Local TCP bind address.
    #[arg(long, env = "LISTEN", default_value = ":9999")]
    pub listen: String,

    /// Comma-separated Sentinel endpoints, host:port[,host:port...].
    #[arg(long, env = "SENTINEL", default_value = ":26379")]
    pub sentinel: String,

    /// Logical leader name registered with Sentinel.
    #[arg(long, env = "MASTER", default_value = "mymaster")]
    pub master: String,

    /// Authentication username (if ACLs are enabled).
    #[arg(long, env = "USERNAME", default_value = "")]
    pub username: String,

    /// Authentication password. If unset, falls back to REDIS_PASSWORD.
    #[arg(long, env = "PASSWORD", default_value = "")]
    pub password: String,

    /// Enable subscription-based discovery in addition to polling.
    #[arg(long, env = "EVENTLISTENER")]
    pub eventlistener: bool,

    /// Dial / probe timeout, in milliseconds.
    #[arg(long, env = "TIMEOUTMS", default_value_t = 2000)]
    pub timeoutms: u64,

    /// Polling interval in milliseconds; 0 disables polling.
    #[arg(long, env = "CHECKMS", default_value_t = 250)]
    pub checkms: u64,

    /// Verbose logging.
    #[arg(long, env = "DEBUG")]
    pub debug: bool,
}

/// Fully resolved configuration derived from `Cli`.
pub struct ProxyConfig {
    pub listen: SocketAddr,
    pub tracker: TrackerConfig,
}

impl Cli {
    pub fn into_proxy_config(self) -> Result<ProxyConfig, ConfigError> {
        let listen = parse_listen_addr(&self.listen)?;

        let sentinels: Vec<SentinelEndpoint> = self
            .sentinel
            .split(',')
            .map(|s| s.trim())
            .filter(|s| !s.is_empty())
            .map(|s| {
                SentinelEndpoint::parse(s)
                    .map_err(|msg| ConfigError::InvalidSentinelEndpoint(s.to_string(), msg))
            })
            .collect::<Result<_, _>>()?;
        if sentinels.is_empty() {
            return Err(ConfigError::EmptySentinelList);
        }

        let password = crate::password::resolve(&self.password);
        let username = if self.username.is_empty() { None } else { Some(self.username) };

        Ok(ProxyConfig {
            listen,
            tracker: TrackerConfig {
                sentinels,
                master_name: self.master,
                username,
                password,
                timeout_ms: self.timeoutms,
                check_ms: self.checkms,
                event_listener: self.eventlistener,
            },
        })
    }
}

/// Parses a local bind address. A leading `:port` form (as emitted by the
/// original Go flags, e.g. `:9999`) binds on all interfaces.
fn parse_listen_addr(raw: &str) -> Result<SocketAddr, ConfigError> {
    let normalized = if let Some(port) = raw.strip_prefix(':') {
        format!("0.0.0.0:{port}")
    } else {
        raw.to_string()
    };
    normalized
        .parse()
        .map_err(|e| ConfigError::InvalidListenAddr(raw.to_string(), e))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_colon_port_as_all_interfaces() {
        let addr = parse_listen_addr(":9999").unwrap();
        assert_eq!(addr.port(), 9999);
        assert!(addr.ip().is_unspecified());
    }

    #[test]
    fn parses_explicit_host() {
        let addr = parse_listen_addr("127.0.0.1:9999").unwrap();
        assert_eq!(addr.to_string(), "127.0.0.1:9999");
    }

    #[test]
    fn rejects_garbage_listen_addr() {
        assert!(parse_listen_addr("not-an-address").is_err());
    }
}
