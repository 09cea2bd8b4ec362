// src/sentinel.rs

//! A stateless set of operations against a single Sentinel TCP endpoint.
//! Wire framing is line-oriented ASCII; this client never interprets RESP
//! binary frames, only bounded byte reads (discovery) and line reads
//! (subscription), since the replies of interest are all short textual
//! bursts.

use std::net::{IpAddr, SocketAddr};
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpStream, lookup_host};
use tokio::time::timeout;
use tracing::{debug, warn};

use crate::errors::SentinelError;

/// A `(host, port)` pair from configuration. `host` may resolve to multiple
/// IPs; the list is read-only after startup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentinelEndpoint {
    pub host: String,
    pub port: u16,
}

impl SentinelEndpoint {
    pub fn parse(spec: &str) -> Result<Self, String> {
        let (host, port) = spec
            .rsplit_once(':')
            .ok_or_else(|| format!("expected host:port, got '{spec}'"))?;
        let port: u16 = port
            .parse()
            .map_err(|_| format!("invalid port in '{spec}'"))?;
        Ok(Self {
            host: host.to_string(),
            port,
        })
    }
}

/// A successfully parsed `+switch-master` notification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SwitchMasterEvent {
    pub name: String,
    pub old_host: String,
    pub old_port: u16,
    pub new_host: String,
    pub new_port: u16,
}

/// Expands `endpoint.host` to its A/AAAA records.
pub async fn resolve(endpoint: &SentinelEndpoint) -> Result<Vec<SocketAddr>, SentinelError> {
    let lookup = format!("{}:{}", endpoint.host, endpoint.port);
    let addrs: Vec<SocketAddr> = lookup_host(&lookup)
        .await
        .map_err(|source| SentinelError::Resolve {
            host: endpoint.host.clone(),
            port: endpoint.port,
            source,
        })?
        .collect();
    Ok(addrs)
}

/// TCP-dials `addr` with the given timeout.
pub async fn connect(addr: SocketAddr, connect_timeout: Duration) -> Result<TcpStream, SentinelError> {
    match timeout(connect_timeout, TcpStream::connect(addr)).await {
        Ok(Ok(stream)) => Ok(stream),
        Ok(Err(e)) => Err(SentinelError::Connect(addr, e)),
        Err(_) => Err(SentinelError::Connect(
            addr,
            std::io::Error::new(std::io::ErrorKind::TimedOut, "connect timed out"),
        )),
    }
}

/// Reads into `buf`, bounded by `read_timeout`. An elapsed timeout is
/// reported the same way a real I/O failure would be, matching
/// `warden::client::WardenClient::send_and_receive`'s bounded-read shape.
async fn bounded_read(
    stream: &mut TcpStream,
    buf: &mut [u8],
    read_timeout: Duration,
) -> Result<usize, SentinelError> {
    match timeout(read_timeout, stream.read(buf)).await {
        Ok(Ok(n)) => Ok(n),
        Ok(Err(e)) => Err(SentinelError::Io(e)),
        Err(_) => Err(SentinelError::Io(std::io::Error::new(
            std::io::ErrorKind::TimedOut,
            "read timed out",
        ))),
    }
}

/// Writes an `AUTH` line if a password is configured. Authentication
/// failure is logged but never aborts the call; the subsequent discovery
/// request will surface the real error, matching the original's permissive
/// behavior.
pub async fn authenticate(
    stream: &mut TcpStream,
    username: Option<&str>,
    password: Option<&str>,
    read_timeout: Duration,
) -> Result<(), SentinelError> {
    let Some(password) = password.filter(|p| !p.is_empty()) else {
        return Ok(());
    };

    let line = match username.filter(|u| !u.is_empty()) {
        Some(user) => format!("AUTH {user} {password}\n"),
        None => format!("AUTH {password}\n"),
    };
    stream.write_all(line.as_bytes()).await?;

    let mut resp = [0u8; 256];
    if let Err(e) = bounded_read(stream, &mut resp, read_timeout).await {
        warn!("AUTH response read failed (continuing anyway): {e}");
    }
    Ok(())
}

/// Issues `sentinel get-master-addr-by-name <name>` and parses the standard
/// multi-bulk textual reply. Reads a single bounded burst and splits on
/// CRLF; tokens 3 and 5 (1-indexed, per spec) are host and port.
pub async fn get_leader(
    stream: &mut TcpStream,
    name: &str,
    read_timeout: Duration,
) -> Result<(String, u16), SentinelError> {
    let cmd = format!("sentinel get-master-addr-by-name {name}\n");
    stream.write_all(cmd.as_bytes()).await?;

    let mut buf = [0u8; 256];
    let n = bounded_read(stream, &mut buf, read_timeout).await?;
    let text = String::from_utf8_lossy(&buf[..n]);
    debug!("sentinel get-master-addr-by-name reply: {:?}", text);

    let tokens: Vec<&str> = text.split("\r\n").collect();
    if tokens.len() < 5 {
        return Err(SentinelError::Protocol(format!(
            "expected at least 5 CRLF-separated tokens, got {}: {:?}",
            tokens.len(),
            text
        )));
    }
    let host = tokens[2].to_string();
    let port: u16 = tokens[4]
        .parse()
        .map_err(|_| SentinelError::Protocol(format!("non-numeric port token: {:?}", tokens[4])))?;
    Ok((host, port))
}

/// Wraps a connection that has already issued `subscribe +switch-master`
/// and reads its line-delimited event stream.
pub struct SwitchSubscription {
    reader: BufReader<TcpStream>,
    name: String,
}

/// Writes `subscribe +switch-master` and returns a handle for reading the
/// resulting event stream. The subscription read loop is unbounded; it only
/// ends on disconnect.
pub async fn subscribe_switch(
    mut stream: TcpStream,
    name: &str,
) -> Result<SwitchSubscription, SentinelError> {
    stream.write_all(b"subscribe +switch-master\n").await?;
    Ok(SwitchSubscription {
        reader: BufReader::new(stream),
        name: name.to_string(),
    })
}

impl SwitchSubscription {
    /// Reads and parses the next event, skipping status lines and malformed
    /// or irrelevant messages. Returns `Ok(None)` once the connection closes.
    pub async fn next_event(&mut self) -> Result<Option<SwitchMasterEvent>, SentinelError> {
        loop {
            let mut line = String::new();
            let n = self.reader.read_line(&mut line).await?;
            if n == 0 {
                return Ok(None);
            }

            let parts: Vec<&str> = line.trim_end().split(' ').collect();
            if parts.len() == 1 {
                // Status line (e.g. subscribe confirmation); nothing to report.
                continue;
            }
            if parts.len() != 5 {
                warn!("unexpected switch-master message: {:?}", line);
                continue;
            }
            if parts[0] != self.name {
                warn!(
                    "got master change event for '{}', but listening for '{}'",
                    parts[0], self.name
                );
                continue;
            }
            let (Ok(old_port), Ok(new_port)) = (parts[2].parse(), parts[4].parse()) else {
                warn!("unexpected switch-master port tokens: {:?}", line);
                continue;
            };
            return Ok(Some(SwitchMasterEvent {
                name: parts[0].to_string(),
                old_host: parts[1].to_string(),
                old_port,
                new_host: parts[3].to_string(),
                new_port,
            }));
        }
    }
}

/// Resolves `host` as an IP literal or DNS name, used by the tracker when it
/// already has a candidate `(host, port)` pair from a Sentinel reply rather
/// than a configured endpoint.
pub async fn resolve_host_port(host: &str, port: u16) -> Result<Vec<SocketAddr>, SentinelError> {
    if let Ok(ip) = host.parse::<IpAddr>() {
        return Ok(vec![SocketAddr::new(ip, port)]);
    }
    resolve(&SentinelEndpoint {
        host: host.to_string(),
        port,
    })
    .await
}
