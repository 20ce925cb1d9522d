//! In-memory registry of tunnels the agent currently has open.
//!
//! One [`ActiveTunnel`] per successful `ReqTunnel`/`NewTunnel` exchange.
//! Byte counters use atomics rather than a lock because they're updated
//! from the proxy session's hot read/write loop and read from the
//! supervisor's stats API concurrently.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use tokio::sync::RwLock;

use crate::config::{Protocol, TunnelConfig};

/// A tunnel the gateway has accepted and is routing traffic for.
///
/// Carries its own `protocol`/`subdomain` alongside `config` (which also
/// has them) because both survive independently of the caller-supplied
/// config across a reconnect: the subdomain in particular may have been
/// assigned by the gateway rather than requested.
#[derive(Debug)]
pub struct ActiveTunnel {
    pub local_id: String,
    pub tunnel_id: String,
    pub url: String,
    pub protocol: Protocol,
    pub subdomain: Option<String>,
    pub config: TunnelConfig,
    pub created_at: Instant,
    bytes_in: AtomicU64,
    bytes_out: AtomicU64,
    connections_served: AtomicU64,
}

impl ActiveTunnel {
    pub fn new(tunnel_id: impl Into<String>, url: impl Into<String>, config: TunnelConfig) -> Self {
        let subdomain = config.subdomain.clone();
        let protocol = config.protocol;
        Self {
            local_id: retunnel_protocol::generate_tunnel_local_id(),
            tunnel_id: tunnel_id.into(),
            url: url.into(),
            protocol,
            subdomain,
            config,
            created_at: Instant::now(),
            bytes_in: AtomicU64::new(0),
            bytes_out: AtomicU64::new(0),
            connections_served: AtomicU64::new(0),
        }
    }

    pub fn uptime(&self) -> std::time::Duration {
        self.created_at.elapsed()
    }

    pub fn record_request(&self, bytes_in: u64, bytes_out: u64) {
        self.bytes_in.fetch_add(bytes_in, Ordering::Relaxed);
        self.bytes_out.fetch_add(bytes_out, Ordering::Relaxed);
        self.connections_served.fetch_add(1, Ordering::Relaxed);
    }

    pub fn stats(&self) -> TunnelStats {
        TunnelStats {
            bytes_in: self.bytes_in.load(Ordering::Relaxed),
            bytes_out: self.bytes_out.load(Ordering::Relaxed),
            connections_served: self.connections_served.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct TunnelStats {
    pub bytes_in: u64,
    pub bytes_out: u64,
    pub connections_served: u64,
}

/// Keyed by the gateway-assigned tunnel id. Lookups during proxying key by
/// a substring match on the tunnel's public URL instead (see `proxy`),
/// since `StartProxy` carries the URL, not the id.
#[derive(Debug, Default, Clone)]
pub struct TunnelRegistry {
    tunnels: Arc<RwLock<HashMap<String, Arc<ActiveTunnel>>>>,
}

impl TunnelRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert(&self, tunnel: ActiveTunnel) -> Arc<ActiveTunnel> {
        let tunnel = Arc::new(tunnel);
        self.tunnels
            .write()
            .await
            .insert(tunnel.tunnel_id.clone(), tunnel.clone());
        tunnel
    }

    pub async fn remove(&self, tunnel_id: &str) -> Option<Arc<ActiveTunnel>> {
        self.tunnels.write().await.remove(tunnel_id)
    }

    pub async fn get(&self, tunnel_id: &str) -> Option<Arc<ActiveTunnel>> {
        self.tunnels.read().await.get(tunnel_id).cloned()
    }

    /// Finds the tunnel whose public id is a substring of `proxy_url`
    /// (`StartProxy::Url`), per spec §4.6 step 4. Matching on the tunnel id
    /// rather than the full URL avoids cross-matching two tunnels that
    /// share a base host and differ only by path or a later-appended
    /// subdomain segment.
    pub async fn find_by_url(&self, proxy_url: &str) -> Option<Arc<ActiveTunnel>> {
        self.tunnels
            .read()
            .await
            .values()
            .find(|t| proxy_url.contains(t.tunnel_id.as_str()))
            .cloned()
    }

    pub async fn all(&self) -> Vec<Arc<ActiveTunnel>> {
        self.tunnels.read().await.values().cloned().collect()
    }

    pub async fn len(&self) -> usize {
        self.tunnels.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn insert_and_get_round_trips() {
        let registry = TunnelRegistry::new();
        registry
            .insert(ActiveTunnel::new(
                "tun_abc",
                "https://foo.retunnel.net",
                TunnelConfig::http(8080),
            ))
            .await;
        assert!(registry.get("tun_abc").await.is_some());
        assert_eq!(registry.len().await, 1);
    }

    #[tokio::test]
    async fn find_by_url_matches_on_tunnel_id_substring() {
        let registry = TunnelRegistry::new();
        registry
            .insert(ActiveTunnel::new(
                "tun_abc",
                "https://foo.retunnel.net",
                TunnelConfig::http(8080),
            ))
            .await;
        let found = registry
            .find_by_url("https://gateway.retunnel.net/proxy/tun_abc")
            .await;
        assert!(found.is_some());
        assert_eq!(found.unwrap().tunnel_id, "tun_abc");
    }

    #[tokio::test]
    async fn find_by_url_does_not_cross_match_on_shared_host() {
        let registry = TunnelRegistry::new();
        registry
            .insert(ActiveTunnel::new(
                "tun_abc",
                "https://foo.retunnel.net",
                TunnelConfig::http(8080),
            ))
            .await;
        registry
            .insert(ActiveTunnel::new(
                "tun_xyz",
                "https://foo.retunnel.net/other",
                TunnelConfig::http(8081),
            ))
            .await;
        let found = registry
            .find_by_url("https://gateway.retunnel.net/proxy/tun_xyz")
            .await;
        assert_eq!(found.unwrap().tunnel_id, "tun_xyz");
    }

    #[tokio::test]
    async fn record_request_updates_stats() {
        let tunnel = ActiveTunnel::new("tun_abc", "https://foo.retunnel.net", TunnelConfig::http(8080));
        tunnel.record_request(100, 200);
        tunnel.record_request(50, 25);
        let stats = tunnel.stats();
        assert_eq!(stats.bytes_in, 150);
        assert_eq!(stats.bytes_out, 225);
        assert_eq!(stats.connections_served, 2);
    }

    #[tokio::test]
    async fn remove_drops_tunnel_from_registry() {
        let registry = TunnelRegistry::new();
        registry
            .insert(ActiveTunnel::new(
                "tun_abc",
                "https://foo.retunnel.net",
                TunnelConfig::http(8080),
            ))
            .await;
        registry.remove("tun_abc").await;
        assert!(registry.is_empty().await);
    }
}
