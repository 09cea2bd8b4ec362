// src/bin/healthcheck.rs

//! Standalone health-probe companion to the proxy (spec §6). Dials the
//! proxy's listen address, issues a minimal `ROLE` probe framed the same
//! inline-command way the Sentinel client frames its own requests, and maps
//! the reported role to an exit code external orchestration can key off of:
//! `0` healthy, `1` unhealthy, `127` anything else (malformed reply,
//! unexpected I/O failure).

use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::timeout;

const DIAL_TIMEOUT: Duration = Duration::from_secs(2);
const READ_TIMEOUT: Duration = Duration::from_secs(2);

#[tokio::main]
async fn main() {
    let listen = std::env::var("LISTEN").unwrap_or_else(|_| "localhost:9999".to_string());
    let username = std::env::var("USERNAME").unwrap_or_default();
    let password = sentinel_proxy::password::resolve(&std::env::var("PASSWORD").unwrap_or_default());

    let code = match probe(&listen, &username, password.as_deref()).await {
        Ok(true) => 0,
        Ok(false) => 1,
        Err(()) => 127,
    };
    std::process::exit(code);
}

async fn probe(listen: &str, username: &str, password: Option<&str>) -> Result<bool, ()> {
    let mut stream = timeout(DIAL_TIMEOUT, TcpStream::connect(listen))
        .await
        .map_err(|_| ())?
        .map_err(|_| ())?;

    if let Some(password) = password.filter(|p| !p.is_empty()) {
        let auth_line = if username.is_empty() {
            format!("AUTH {password}\n")
        } else {
            format!("AUTH {username} {password}\n")
        };
        stream.write_all(auth_line.as_bytes()).await.map_err(|_| ())?;
        let mut auth_resp = [0u8; 64];
        let _ = timeout(READ_TIMEOUT, stream.read(&mut auth_resp)).await;
    }

    stream.write_all(b"ROLE\n").await.map_err(|_| ())?;

    let mut buf = [0u8; 512];
    let n = timeout(READ_TIMEOUT, stream.read(&mut buf))
        .await
        .map_err(|_| ())?
        .map_err(|_| ())?;
    let text = String::from_utf8_lossy(&buf[..n]);
    let tokens: Vec<&str> = text.split("\r\n").collect();

    let Some(role) = tokens.get(2) else { return Err(()) };
    match *role {
        "master" => Ok(true),
        "slave" => Ok(matches!(tokens.get(7), Some(&"connected"))),
        _ => Err(()),
    }
}
