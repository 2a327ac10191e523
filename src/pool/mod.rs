//! Connection pooling.
//!
//! - HTTP/1.1: idle connections parked per target, newest reused first,
//!   expired after the idle timeout.
//! - HTTP/2: one multiplexed connection per target, held by the round
//!   tripper's codec slot. Its idle close is handled by the connection
//!   driver itself.

use std::collections::HashMap;
use std::fmt;
use std::time::{Duration, Instant};

use tokio::sync::RwLock;

use crate::transport::h1::H1Connection;

/// Target a connection is bound to.
#[derive(Debug, Clone, Hash, Eq, PartialEq)]
pub struct PoolKey {
    pub host: String,
    pub port: u16,
    pub is_https: bool,
}

impl PoolKey {
    pub fn new(host: impl Into<String>, port: u16, is_https: bool) -> Self {
        Self {
            host: host.into(),
            port,
            is_https,
        }
    }
}

impl fmt::Display for PoolKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let scheme = if self.is_https { "https" } else { "http" };
        write!(f, "{scheme}://{}:{}", self.host, self.port)
    }
}

#[derive(Debug)]
struct IdleEntry {
    conn: H1Connection,
    parked_at: Instant,
}

impl IdleEntry {
    fn is_expired(&self, max_idle: Option<Duration>) -> bool {
        max_idle.is_some_and(|max| self.parked_at.elapsed() >= max)
    }
}

/// Idle HTTP/1.1 connections by target.
#[derive(Debug)]
pub struct ConnectionPool {
    idle: RwLock<HashMap<PoolKey, Vec<IdleEntry>>>,
    max_idle_duration: Option<Duration>,
    max_idle_per_host: usize,
}

impl ConnectionPool {
    pub fn new(max_idle_duration: Option<Duration>, max_idle_per_host: usize) -> Self {
        Self {
            idle: RwLock::new(HashMap::new()),
            max_idle_duration,
            max_idle_per_host,
        }
    }

    /// Take the most recently parked live connection for `key`.
    pub async fn checkout(&self, key: &PoolKey) -> Option<H1Connection> {
        let mut idle = self.idle.write().await;
        let entries = idle.get_mut(key)?;
        while let Some(entry) = entries.pop() {
            if entry.is_expired(self.max_idle_duration) {
                tracing::debug!(target = %key, idle = ?entry.parked_at.elapsed(), "idle connection expired");
                continue;
            }
            tracing::debug!(target = %key, remaining = entries.len(), "reusing idle connection");
            return Some(entry.conn);
        }
        idle.remove(key);
        None
    }

    /// Park a connection after a completed exchange. Non-reusable
    /// connections are dropped, which closes them.
    pub async fn checkin(&self, key: PoolKey, conn: H1Connection) {
        if !conn.is_reusable() || self.max_idle_per_host == 0 {
            tracing::trace!(target = %key, "connection not pooled");
            return;
        }
        let mut idle = self.idle.write().await;
        let entries = idle.entry(key).or_default();
        entries.push(IdleEntry {
            conn,
            parked_at: Instant::now(),
        });
        if entries.len() > self.max_idle_per_host {
            // oldest first
            entries.remove(0);
        }
    }

    /// Whether any connection is parked for `key`.
    pub async fn has_idle(&self, key: &PoolKey) -> bool {
        self.idle.read().await.contains_key(key)
    }

    /// Drop expired connections.
    pub async fn cleanup(&self) {
        let mut idle = self.idle.write().await;
        for entries in idle.values_mut() {
            entries.retain(|e| !e.is_expired(self.max_idle_duration));
        }
        idle.retain(|_, entries| !entries.is_empty());
    }

    pub async fn stats(&self) -> PoolStats {
        let idle = self.idle.read().await;
        PoolStats {
            targets: idle.len(),
            idle_connections: idle.values().map(Vec::len).sum(),
        }
    }
}

/// Pool statistics for debugging.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolStats {
    pub targets: usize,
    pub idle_connections: usize,
}
