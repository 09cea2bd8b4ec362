// src/leader.rs

//! The single piece of shared mutable state in this proxy: the current
//! leader address, plus the broadcast token that wakes every in-flight
//! `ProxyPair` the instant it changes.

use std::net::SocketAddr;
use std::sync::Arc;

use parking_lot::RwLock;
use tokio::sync::broadcast;

/// A resolved backend endpoint. Equality and hashing are structural on the
/// canonical textual form, not the parsed `SocketAddr`, so two addresses that
/// print identically are always treated as identical.
#[derive(Debug, Clone)]
pub struct LeaderAddress {
    addr: SocketAddr,
    text: String,
}

impl LeaderAddress {
    pub fn new(addr: SocketAddr) -> Self {
        let text = addr.to_string();
        Self { addr, text }
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn as_str(&self) -> &str {
        &self.text
    }
}

impl PartialEq for LeaderAddress {
    fn eq(&self, other: &Self) -> bool {
        self.text == other.text
    }
}
impl Eq for LeaderAddress {}

impl std::fmt::Display for LeaderAddress {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.text)
    }
}

struct Inner {
    current: Option<LeaderAddress>,
    epoch: u64,
    invalidate: broadcast::Sender<()>,
}

/// Thread-safe cell holding the current leader address and epoch. Mutated by
/// exactly one producer (the tracker); read and subscribed to by many
/// consumers (the acceptor and every proxy pair). All operations are
/// non-suspending.
pub struct LeaderCell {
    inner: RwLock<Inner>,
}

impl Default for LeaderCell {
    fn default() -> Self {
        Self::new()
    }
}

impl LeaderCell {
    pub fn new() -> Self {
        let (invalidate, _) = broadcast::channel(1);
        Self {
            inner: RwLock::new(Inner {
                current: None,
                epoch: 0,
                invalidate,
            }),
        }
    }

    /// Returns the current address (if any), its epoch, and a subscription
    /// handle armed against the invalidation token currently in effect. The
    /// three are read atomically under the same lock acquisition so a
    /// subscriber can never miss the update that invalidates what it just
    /// read.
    pub fn read(&self) -> (Option<LeaderAddress>, u64, broadcast::Receiver<()>) {
        let inner = self.inner.read();
        (
            inner.current.clone(),
            inner.epoch,
            inner.invalidate.subscribe(),
        )
    }

    pub fn subscribe(&self) -> broadcast::Receiver<()> {
        self.inner.read().invalidate.subscribe()
    }

    /// Installs `new` as the current leader if it differs from the current
    /// address (by canonical text). Returns `true` if it changed anything.
    /// A no-op update does not bump the epoch and does not fire the
    /// invalidation broadcast. Once the cell holds `Some`, it is never
    /// written back to `None`.
    pub fn update(&self, new: LeaderAddress) -> bool {
        let mut inner = self.inner.write();
        if inner.current.as_ref() == Some(&new) {
            return false;
        }
        inner.current = Some(new);
        inner.epoch += 1;
        // Firing the old sender wakes every subscriber exactly once. A fresh
        // sender is armed so future subscribers wait on the next change
        // instead of one that already fired.
        let _ = inner.invalidate.send(());
        let (fresh, _) = broadcast::channel(1);
        inner.invalidate = fresh;
        true
    }
}

pub type SharedLeaderCell = Arc<LeaderCell>;
