// src/proxy.rs

//! A single client-to-backend connection pair: dial the current leader,
//! shuttle bytes in both directions, and tear the pair down the instant
//! either side closes or the leader changes underneath it.

use std::time::Duration;

use tokio::io;
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::{debug, warn};

use crate::errors::PipeError;
use crate::leader::LeaderCell;

/// Runs one client connection end to end. Never returns an error to the
/// caller; every failure mode here is isolated to this pair and only
/// logged, per the proxy's partial-failure contract.
pub async fn run(client: TcpStream, client_addr: std::net::SocketAddr, cell: &LeaderCell, dial_timeout: Duration) {
    // Read the current leader and a subscription handle in the same lock
    // acquisition so we can never miss the invalidation for the address we
    // just observed.
    let (leader, epoch, mut invalidate) = cell.read();

    let Some(leader) = leader else {
        debug!("{client_addr}: no leader known yet, dropping connection");
        drop(client);
        return;
    };

    let backend = match dial_backend(leader.addr(), dial_timeout).await {
        Ok(stream) => stream,
        Err(e) => {
            warn!("{client_addr}: {e}");
            drop(client);
            return;
        }
    };

    debug!("{client_addr}: proxying to leader {leader} (epoch {epoch})");

    let (client_read, client_write) = client.into_split();
    let (backend_read, backend_write) = backend.into_split();

    let mut client_to_backend = tokio::spawn(async move {
        let (mut client_read, mut backend_write) = (client_read, backend_write);
        io::copy(&mut client_read, &mut backend_write).await
    });
    let mut backend_to_client = tokio::spawn(async move {
        let (mut backend_read, mut client_write) = (backend_read, client_write);
        io::copy(&mut backend_read, &mut client_write).await
    });

    tokio::select! {
        res = &mut client_to_backend => log_pump_result("client->backend", client_addr, res),
        res = &mut backend_to_client => log_pump_result("backend->client", client_addr, res),
        _ = invalidate.recv() => {
            debug!("{client_addr}: leader changed, tearing down connection");
        }
    }

    // Closing either half causes the other pump to unblock on end-of-stream;
    // aborting both tasks guarantees both sockets are dropped and closed
    // regardless of which branch woke us.
    client_to_backend.abort();
    backend_to_client.abort();
}

async fn dial_backend(addr: std::net::SocketAddr, dial_timeout: Duration) -> Result<TcpStream, PipeError> {
    match timeout(dial_timeout, TcpStream::connect(addr)).await {
        Ok(Ok(stream)) => Ok(stream),
        Ok(Err(e)) => Err(PipeError::DialBackend(addr, e)),
        Err(_) => Err(PipeError::DialBackend(
            addr,
            std::io::Error::new(std::io::ErrorKind::TimedOut, "backend dial timed out"),
        )),
    }
}

fn log_pump_result(
    direction: &str,
    client_addr: std::net::SocketAddr,
    res: Result<io::Result<u64>, tokio::task::JoinError>,
) {
    match res {
        Ok(Ok(bytes)) => debug!("{client_addr}: {direction} closed after {bytes} bytes"),
        Ok(Err(e)) => debug!("{client_addr}: {direction} closed with error: {e}"),
        Err(e) if e.is_cancelled() => {}
        Err(e) => warn!("{client_addr}: {direction} pump panicked: {e}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::leader::LeaderAddress;
    use std::net::Ipv4Addr;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn drops_client_when_no_leader_known() {
        let cell = LeaderCell::new();
        let listener = TcpListener::bind((Ipv4Addr::LOCALHOST, 0)).await.unwrap();
        let addr = listener.local_addr().unwrap();
        let client_task = tokio::spawn(async move { TcpStream::connect(addr).await });
        let (server_side, peer_addr) = listener.accept().await.unwrap();
        let client_side = client_task.await.unwrap().unwrap();

        run(server_side, peer_addr, &cell, Duration::from_millis(100)).await;

        // The accepted side was dropped; the client observes EOF.
        let mut buf = [0u8; 1];
        let n = client_side.try_read(&mut buf).unwrap_or(0);
        assert_eq!(n, 0);
    }

    #[tokio::test]
    async fn shuttles_bytes_until_backend_closes() {
        let backend_listener = TcpListener::bind((Ipv4Addr::LOCALHOST, 0)).await.unwrap();
        let backend_addr = backend_listener.local_addr().unwrap();
        let backend_task = tokio::spawn(async move {
            let (mut sock, _) = backend_listener.accept().await.unwrap();
            let mut buf = [0u8; 5];
            sock.read_exact(&mut buf).await.unwrap();
            sock.write_all(b"pong!").await.unwrap();
        });

        let cell = LeaderCell::new();
        cell.update(LeaderAddress::new(backend_addr));

        let proxy_listener = TcpListener::bind((Ipv4Addr::LOCALHOST, 0)).await.unwrap();
        let proxy_addr = proxy_listener.local_addr().unwrap();

        let client_task = tokio::spawn(async move {
            let mut sock = TcpStream::connect(proxy_addr).await.unwrap();
            sock.write_all(b"hello").await.unwrap();
            let mut buf = [0u8; 5];
            sock.read_exact(&mut buf).await.unwrap();
            buf
        });

        let (accepted, peer_addr) = proxy_listener.accept().await.unwrap();
        run(accepted, peer_addr, &cell, Duration::from_millis(200)).await;

        backend_task.await.unwrap();
        let received = client_task.await.unwrap();
        assert_eq!(&received, b"pong!");
    }

    #[tokio::test]
    async fn invalidation_tears_down_connection() {
        let backend_listener = TcpListener::bind((Ipv4Addr::LOCALHOST, 0)).await.unwrap();
        let backend_addr = backend_listener.local_addr().unwrap();
        tokio::spawn(async move {
            loop {
                let Ok((sock, _)) = backend_listener.accept().await else { break };
                // Hold the connection open without reading or writing.
                std::mem::forget(sock);
            }
        });

        let cell = std::sync::Arc::new(LeaderCell::new());
        cell.update(LeaderAddress::new(backend_addr));

        let proxy_listener = TcpListener::bind((Ipv4Addr::LOCALHOST, 0)).await.unwrap();
        let proxy_addr = proxy_listener.local_addr().unwrap();

        let cell_for_pair = cell.clone();
        let pair_task = tokio::spawn(async move {
            let (accepted, peer_addr) = proxy_listener.accept().await.unwrap();
            run(accepted, peer_addr, &cell_for_pair, Duration::from_millis(200)).await;
        });

        let mut client = TcpStream::connect(proxy_addr).await.unwrap();

        // Give the pair a moment to dial the backend and subscribe.
        tokio::time::sleep(Duration::from_millis(50)).await;
        cell.update(LeaderAddress::new(std::net::SocketAddr::new(
            Ipv4Addr::LOCALHOST.into(),
            1,
        )));

        tokio::time::timeout(Duration::from_secs(2), pair_task)
            .await
            .expect("pair should tear down promptly on invalidation")
            .unwrap();

        let mut buf = [0u8; 1];
        let n = tokio::time::timeout(Duration::from_secs(1), client.read(&mut buf))
            .await
            .expect("client read should not hang")
            .unwrap_or(0);
        assert_eq!(n, 0);
    }
}
