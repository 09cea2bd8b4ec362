// tests/proxy_failover.rs

//! End-to-end exercise of the acceptor + tracker against a fake Sentinel and
//! fake backends: cold start, fail-over mid-connection, and a bad
//! advertisement that must never displace a validated leader.

use std::net::Ipv4Addr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU16, Ordering};
use std::time::Duration;

use sentinel_proxy::acceptor;
use sentinel_proxy::leader::LeaderCell;
use sentinel_proxy::sentinel::SentinelEndpoint;
use sentinel_proxy::tracker::{self, TrackerConfig};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

/// Spawns a backend that echoes back whatever it reads, one task per
/// connection, until the peer closes.
async fn spawn_echo_backend() -> u16 {
    let listener = TcpListener::bind((Ipv4Addr::LOCALHOST, 0)).await.unwrap();
    let port = listener.local_addr().unwrap().port();
    tokio::spawn(async move {
        loop {
            let Ok((mut sock, _)) = listener.accept().await else { break };
            tokio::spawn(async move {
                let mut buf = [0u8; 1024];
                loop {
                    match sock.read(&mut buf).await {
                        Ok(0) | Err(_) => break,
                        Ok(n) => {
                            if sock.write_all(&buf[..n]).await.is_err() {
                                break;
                            }
                        }
                    }
                }
            });
        }
    });
    port
}

/// Spawns a fake Sentinel that answers `sentinel get-master-addr-by-name`
/// with whatever port `current` currently holds, on 127.0.0.1.
async fn spawn_fake_sentinel(current: Arc<AtomicU16>) -> u16 {
    let listener = TcpListener::bind((Ipv4Addr::LOCALHOST, 0)).await.unwrap();
    let port = listener.local_addr().unwrap().port();
    tokio::spawn(async move {
        loop {
            let Ok((mut sock, _)) = listener.accept().await else { break };
            let current = current.clone();
            tokio::spawn(async move {
                let mut buf = [0u8; 256];
                loop {
                    match sock.read(&mut buf).await {
                        Ok(0) | Err(_) => break,
                        Ok(_) => {
                            let target_port = current.load(Ordering::SeqCst);
                            let reply = format!(
                                "*2\r\n$9\r\n127.0.0.1\r\n${}\r\n{}\r\n",
                                target_port.to_string().len(),
                                target_port
                            );
                            if sock.write_all(reply.as_bytes()).await.is_err() {
                                break;
                            }
                        }
                    }
                }
            });
        }
    });
    port
}

async fn wait_for_leader(cell: &LeaderCell, expected_port: u16, attempts: u32) -> bool {
    for _ in 0..attempts {
        if let (Some(addr), _, _) = cell.read() {
            if addr.addr().port() == expected_port {
                return true;
            }
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    false
}

#[tokio::test]
async fn cold_start_then_failover_then_bad_advertisement() {
    let backend1_port = spawn_echo_backend().await;
    let backend2_port = spawn_echo_backend().await;

    let current_target = Arc::new(AtomicU16::new(backend1_port));
    let sentinel_port = spawn_fake_sentinel(current_target.clone()).await;

    let cell = Arc::new(LeaderCell::new());
    let tracker_cfg = TrackerConfig {
        sentinels: vec![SentinelEndpoint {
            host: "127.0.0.1".to_string(),
            port: sentinel_port,
        }],
        master_name: "mymaster".to_string(),
        username: None,
        password: None,
        timeout_ms: 500,
        check_ms: 30,
        event_listener: false,
    };
    let tracker_cell = cell.clone();
    tokio::spawn(async move { tracker::run(tracker_cfg, tracker_cell).await });

    // --- S1: cold start ---
    assert!(
        wait_for_leader(&cell, backend1_port, 100).await,
        "leader cell should settle on backend1 within the polling window"
    );

    let proxy_listener = TcpListener::bind((Ipv4Addr::LOCALHOST, 0)).await.unwrap();
    let proxy_addr = proxy_listener.local_addr().unwrap();
    let acceptor_cell = cell.clone();
    tokio::spawn(async move {
        acceptor::run(proxy_listener, acceptor_cell, Duration::from_millis(500)).await;
    });

    let mut client = TcpStream::connect(proxy_addr).await.unwrap();
    client.write_all(b"hello").await.unwrap();
    let mut buf = [0u8; 5];
    client.read_exact(&mut buf).await.unwrap();
    assert_eq!(&buf, b"hello");

    // --- S2: fail-over severs the in-flight connection ---
    current_target.store(backend2_port, Ordering::SeqCst);
    assert!(
        wait_for_leader(&cell, backend2_port, 100).await,
        "leader cell should move to backend2 after the advertisement changes"
    );

    let mut probe_buf = [0u8; 1];
    let closed = tokio::time::timeout(Duration::from_secs(2), client.read(&mut probe_buf))
        .await
        .expect("client read should not hang")
        .map(|n| n == 0)
        .unwrap_or(true);
    assert!(closed, "existing client connection must be severed on fail-over");

    let mut fresh_client = TcpStream::connect(proxy_addr).await.unwrap();
    fresh_client.write_all(b"world").await.unwrap();
    let mut buf2 = [0u8; 5];
    fresh_client.read_exact(&mut buf2).await.unwrap();
    assert_eq!(&buf2, b"world", "a fresh connection must land on the new leader");

    // --- S3: bad advertisement leaves the cell untouched ---
    current_target.store(9, Ordering::SeqCst); // nothing listens on port 9
    tokio::time::sleep(Duration::from_millis(200)).await;
    let (current, _, _) = cell.read();
    assert_eq!(
        current.unwrap().addr().port(),
        backend2_port,
        "an unreachable candidate must never replace the validated leader"
    );
}
