use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::SystemTime;

/// Point-in-time copy of the proxy counters
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatsSnapshot {
    /// Total number of accepted connections
    pub total_connections: u64,
    /// Currently active connections
    pub active_connections: u64,
    /// Connections dropped by the allowlist
    pub denied_connections: u64,
    /// Connections dropped by the rate limiter or connection cap
    pub rejected_connections: u64,
    /// CONNECT tunnels established
    pub tunnels: u64,
    /// Plain HTTP requests forwarded
    pub forwards: u64,
    /// Requests answered with 400 or 405
    pub client_errors: u64,
    /// Requests answered with 502 or 504
    pub upstream_errors: u64,
    /// Relays torn down by an I/O error
    pub relay_errors: u64,
    /// Bytes copied from clients to upstreams
    pub bytes_to_upstream: u64,
    /// Bytes copied from upstreams to clients
    pub bytes_to_client: u64,
    /// Unix timestamp when the proxy started
    pub start_time: u64,
}

#[derive(Debug, Default)]
struct Counters {
    total_connections: AtomicU64,
    active_connections: AtomicU64,
    denied_connections: AtomicU64,
    rejected_connections: AtomicU64,
    tunnels: AtomicU64,
    forwards: AtomicU64,
    client_errors: AtomicU64,
    upstream_errors: AtomicU64,
    relay_errors: AtomicU64,
    bytes_to_upstream: AtomicU64,
    bytes_to_client: AtomicU64,
}

/// Lock-free counters shared by every connection handler
#[derive(Debug, Clone)]
pub struct ProxyStats {
    counters: Arc<Counters>,
    start_time: u64,
}

impl ProxyStats {
    pub fn new() -> Self {
        Self {
            counters: Arc::new(Counters::default()),
            start_time: SystemTime::now()
                .duration_since(SystemTime::UNIX_EPOCH)
                .map(|d| d.as_secs())
                .unwrap_or_default(),
        }
    }

    /// Count a new connection; the returned guard marks it finished when dropped
    pub fn connection_started(&self) -> ConnectionGuard {
        self.counters
            .total_connections
            .fetch_add(1, Ordering::Relaxed);
        self.counters
            .active_connections
            .fetch_add(1, Ordering::Relaxed);
        ConnectionGuard {
            stats: self.clone(),
        }
    }

    fn connection_ended(&self) {
        self.counters
            .active_connections
            .fetch_sub(1, Ordering::Relaxed);
    }

    pub fn connection_denied(&self) {
        self.counters
            .denied_connections
            .fetch_add(1, Ordering::Relaxed);
    }

    pub fn connection_rejected(&self) {
        self.counters
            .rejected_connections
            .fetch_add(1, Ordering::Relaxed);
    }

    pub fn tunnel_established(&self) {
        self.counters.tunnels.fetch_add(1, Ordering::Relaxed);
    }

    pub fn request_forwarded(&self) {
        self.counters.forwards.fetch_add(1, Ordering::Relaxed);
    }

    pub fn client_error(&self) {
        self.counters.client_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn upstream_error(&self) {
        self.counters
            .upstream_errors
            .fetch_add(1, Ordering::Relaxed);
    }

    pub fn relay_error(&self) {
        self.counters.relay_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add_bytes_to_upstream(&self, bytes: u64) {
        self.counters
            .bytes_to_upstream
            .fetch_add(bytes, Ordering::Relaxed);
    }

    pub fn add_bytes_to_client(&self, bytes: u64) {
        self.counters
            .bytes_to_client
            .fetch_add(bytes, Ordering::Relaxed);
    }

    /// Currently active connections
    pub fn active_connections(&self) -> u64 {
        self.counters.active_connections.load(Ordering::Relaxed)
    }

    /// Get current snapshot of stats
    pub fn snapshot(&self) -> StatsSnapshot {
        let c = &self.counters;
        StatsSnapshot {
            total_connections: c.total_connections.load(Ordering::Relaxed),
            active_connections: c.active_connections.load(Ordering::Relaxed),
            denied_connections: c.denied_connections.load(Ordering::Relaxed),
            rejected_connections: c.rejected_connections.load(Ordering::Relaxed),
            tunnels: c.tunnels.load(Ordering::Relaxed),
            forwards: c.forwards.load(Ordering::Relaxed),
            client_errors: c.client_errors.load(Ordering::Relaxed),
            upstream_errors: c.upstream_errors.load(Ordering::Relaxed),
            relay_errors: c.relay_errors.load(Ordering::Relaxed),
            bytes_to_upstream: c.bytes_to_upstream.load(Ordering::Relaxed),
            bytes_to_client: c.bytes_to_client.load(Ordering::Relaxed),
            start_time: self.start_time,
        }
    }
}

impl Default for ProxyStats {
    fn default() -> Self {
        Self::new()
    }
}

/// Decrements the active connection count on drop
#[derive(Debug)]
pub struct ConnectionGuard {
    stats: ProxyStats,
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        self.stats.connection_ended();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connection_guard_tracks_active() {
        let stats = ProxyStats::new();
        {
            let _a = stats.connection_started();
            let _b = stats.connection_started();
            assert_eq!(stats.active_connections(), 2);
        }
        let snapshot = stats.snapshot();
        assert_eq!(snapshot.total_connections, 2);
        assert_eq!(snapshot.active_connections, 0);
    }

    #[test]
    fn test_counters_are_shared_between_clones() {
        let stats = ProxyStats::new();
        let clone = stats.clone();
        clone.tunnel_established();
        clone.add_bytes_to_client(10);
        stats.add_bytes_to_upstream(3);
        stats.connection_denied();

        let snapshot = stats.snapshot();
        assert_eq!(snapshot.tunnels, 1);
        assert_eq!(snapshot.bytes_to_client, 10);
        assert_eq!(snapshot.bytes_to_upstream, 3);
        assert_eq!(snapshot.denied_connections, 1);
    }

    #[test]
    fn test_snapshot_serializes() {
        let stats = ProxyStats::new();
        stats.request_forwarded();
        let json = serde_json::to_value(stats.snapshot()).unwrap();
        assert_eq!(json["forwards"], 1);
        assert_eq!(json["relay_errors"], 0);
    }
}
