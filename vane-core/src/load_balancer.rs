//! The load-balancer state machine: owns the endpoint list and
//! per-endpoint statistics, dispatches selection to a [`Rule`]
//! (spec.md §4.1).

use std::collections::HashSet;
use std::sync::atomic::AtomicU32;
use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwap;
use async_trait::async_trait;
use futures::future::join_all;

use crate::config::CircuitBreakerConfig;
use crate::filter::ServerListFilter;
use crate::list_source::ServerListSource;
use crate::ping::Pinger;
use crate::rules::Rule;
use crate::server::Server;
use crate::stats::LoadBalancerStats;

/// Public contract of a load balancer (spec.md §6 `ILoadBalancer`).
#[async_trait]
pub trait ILoadBalancer: Send + Sync {
    /// Appends servers to the list. Duplicates are permitted — they are
    /// a valid weighting mechanism (spec.md §4.1).
    async fn add_servers(&self, servers: Vec<Server>);

    /// Picks one server, or `None` if none are eligible right now.
    /// Never panics/throws.
    async fn choose_server(&self, key: Option<&str>) -> Option<Arc<Server>>;

    /// Flips the cached liveness bit for a server so it stops being
    /// returned from [`Self::get_reachable_servers`] until the next
    /// refresh or ping cycle restores it.
    async fn mark_server_down(&self, server_id: &str);

    async fn get_reachable_servers(&self) -> Vec<Arc<Server>>;
    async fn get_all_servers(&self) -> Vec<Arc<Server>>;
}

/// The capability a [`Rule`] needs from a load balancer, passed as a
/// parameter to [`Rule::choose`] rather than held as a back-reference
/// (spec.md §9 "Cyclic references").
pub trait LoadBalancerView: Send + Sync {
    /// Current full list (`allServers`), as of one dereference.
    fn all_servers(&self) -> Arc<Vec<Arc<Server>>>;

    /// Subset of `all_servers` passing liveness (`upServers`, L1).
    fn up_servers(&self) -> Vec<Arc<Server>> {
        self.all_servers()
            .iter()
            .filter(|s| s.is_up())
            .cloned()
            .collect()
    }

    fn stats(&self) -> &LoadBalancerStats;

    /// Shared cyclic counter for round-robin-flavored rules (L3).
    fn cyclic_counter(&self) -> &AtomicU32;
}

/// Default load balancer implementation (spec.md §4.1, C8).
///
/// The list is held behind an [`ArcSwap`] so readers dereference once
/// per `choose` and see either the pre- or post-swap list in full,
/// never a mix (L2).
pub struct LoadBalancer {
    all_servers: ArcSwap<Vec<Arc<Server>>>,
    stats: Arc<LoadBalancerStats>,
    rule: Box<dyn Rule>,
    cyclic_counter: AtomicU32,
    stats_expiry: Duration,
}

impl LoadBalancer {
    pub fn new(rule: Box<dyn Rule>, circuit_breaker_cfg: CircuitBreakerConfig, stats_expiry: Duration) -> Self {
        Self::with_stats(rule, Arc::new(LoadBalancerStats::new(circuit_breaker_cfg)), stats_expiry)
    }

    /// Builds a load balancer sharing an existing stats registry, used by
    /// [`crate::zone_aware::ZoneAwareLoadBalancer`] so per-zone
    /// sub-balancers observe the same counters as the parent (spec.md §3
    /// "ZoneAwareLoadBalancer ... shares the parent's stats object").
    pub fn with_stats(rule: Box<dyn Rule>, stats: Arc<LoadBalancerStats>, stats_expiry: Duration) -> Self {
        Self {
            all_servers: ArcSwap::from_pointee(Vec::new()),
            stats,
            rule,
            cyclic_counter: AtomicU32::new(0),
            stats_expiry,
        }
    }

    pub fn stats(&self) -> &LoadBalancerStats {
        &self.stats
    }

    pub fn stats_arc(&self) -> Arc<LoadBalancerStats> {
        self.stats.clone()
    }

    /// Atomically replaces the full server list — the publish half of a
    /// list refresh (spec.md §4.1, §4.7). Also re-registers zone
    /// membership and lazily evicts stats for servers that have been
    /// gone long enough (`StaleStats`, spec.md §7).
    pub async fn set_servers_list(&self, servers: Vec<Server>) {
        let servers: Vec<Arc<Server>> = servers.into_iter().map(Arc::new).collect();
        self.set_servers_list_shared(servers).await;
    }

    /// As [`Self::set_servers_list`], but takes already-wrapped servers.
    /// Used by [`crate::zone_aware::ZoneAwareLoadBalancer`] so the parent
    /// and a per-zone sub-balancer share the very same `Arc<Server>`
    /// instances — a ping updating one's liveness flag is then visible
    /// through the other.
    pub async fn set_servers_list_shared(&self, servers: Vec<Arc<Server>>) {
        self.stats.sync_servers(&servers).await;
        let active_ids: HashSet<String> = servers.iter().map(|s| s.id().to_owned()).collect();
        self.stats.evict_expired(&active_ids, self.stats_expiry).await;
        self.all_servers.store(Arc::new(servers));
    }

    /// Fetches from `source`, narrows through `filter` if present, and
    /// publishes the result. A failure leaves the previous list in
    /// place and is logged (`UpdaterFault`, spec.md §7).
    pub async fn refresh_from_source(
        &self,
        source: &dyn ServerListSource,
        filter: Option<&dyn ServerListFilter>,
    ) {
        let raw = match source.get_server_list().await {
            Ok(list) => list,
            Err(err) => {
                log::error!("Server list refresh failed, keeping previous list: {:?}", err);
                return;
            }
        };
        let raw: Vec<Arc<Server>> = raw.into_iter().map(Arc::new).collect();
        let filtered = match filter {
            Some(filter) => filter.filter(raw, &self.stats).await,
            None => raw,
        };
        log::debug!("Refreshed server list: {} servers", filtered.len());
        let active_ids: HashSet<String> = filtered.iter().map(|s| s.id().to_owned()).collect();
        self.stats.sync_servers(&filtered).await;
        self.stats.evict_expired(&active_ids, self.stats_expiry).await;
        self.all_servers.store(Arc::new(filtered));
    }

    /// Runs one reachability probe pass over the current list in
    /// parallel, updating each server's cached liveness.
    pub async fn ping_once(&self, pinger: &dyn Pinger) {
        let servers = self.all_servers.load_full();
        let results = join_all(servers.iter().map(|server| async move {
            let alive = pinger.is_alive(server).await;
            (server.clone(), alive)
        }))
        .await;
        for (server, alive) in results {
            if server.is_alive() != alive {
                log::info!("Server {} is now {}", server, if alive { "alive" } else { "unreachable" });
            }
            server.set_alive(alive);
        }
    }

    pub fn add_servers_sync(&self, mut servers: Vec<Server>) {
        let current = self.all_servers.load_full();
        let mut next: Vec<Arc<Server>> = (*current).clone();
        next.extend(servers.drain(..).map(Arc::new));
        self.all_servers.store(Arc::new(next));
    }

    pub fn mark_server_down_sync(&self, server_id: &str) {
        if let Some(server) = self.all_servers.load().iter().find(|s| s.id() == server_id) {
            server.set_alive(false);
        }
    }
}

impl LoadBalancerView for LoadBalancer {
    fn all_servers(&self) -> Arc<Vec<Arc<Server>>> {
        self.all_servers.load_full()
    }

    fn stats(&self) -> &LoadBalancerStats {
        &self.stats
    }

    fn cyclic_counter(&self) -> &AtomicU32 {
        &self.cyclic_counter
    }
}

#[async_trait]
impl ILoadBalancer for LoadBalancer {
    async fn add_servers(&self, servers: Vec<Server>) {
        self.add_servers_sync(servers);
    }

    async fn choose_server(&self, key: Option<&str>) -> Option<Arc<Server>> {
        self.rule.choose(self, key).await
    }

    async fn mark_server_down(&self, server_id: &str) {
        self.mark_server_down_sync(server_id);
    }

    async fn get_reachable_servers(&self) -> Vec<Arc<Server>> {
        self.up_servers()
    }

    async fn get_all_servers(&self) -> Vec<Arc<Server>> {
        (*self.all_servers.load_full()).clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CircuitBreakerConfig;
    use crate::rules::RoundRobinRule;

    fn cb_cfg() -> CircuitBreakerConfig {
        CircuitBreakerConfig {
            failure_threshold: 3,
            base_blackout_ms: 1_000,
            max_blackout_ms: 10_000,
            active_requests_count_timeout_ms: 60_000,
        }
    }

    #[tokio::test]
    async fn choose_server_never_returns_server_outside_all_servers() {
        let lb = LoadBalancer::new(Box::new(RoundRobinRule::new()), cb_cfg(), Duration::from_secs(60));
        lb.set_servers_list(vec![Server::new("a", 1, None), Server::new("b", 2, None)])
            .await;
        for _ in 0..10 {
            let chosen = lb.choose_server(None).await;
            if let Some(chosen) = chosen {
                let all = lb.get_all_servers().await;
                assert!(all.iter().any(|s| s.id() == chosen.id()));
            }
        }
    }

    #[tokio::test]
    async fn mark_server_down_removes_from_reachable() {
        let lb = LoadBalancer::new(Box::new(RoundRobinRule::new()), cb_cfg(), Duration::from_secs(60));
        lb.set_servers_list(vec![Server::new("a", 1, None), Server::new("b", 2, None)])
            .await;
        lb.mark_server_down("a:1").await;
        let reachable = lb.get_reachable_servers().await;
        assert!(reachable.iter().all(|s| s.id() != "a:1"));
        let all = lb.get_all_servers().await;
        assert!(all.iter().any(|s| s.id() == "a:1"));
    }

    #[tokio::test]
    async fn add_servers_permits_duplicates() {
        let lb = LoadBalancer::new(Box::new(RoundRobinRule::new()), cb_cfg(), Duration::from_secs(60));
        lb.add_servers(vec![Server::new("a", 1, None)]).await;
        lb.add_servers(vec![Server::new("a", 1, None)]).await;
        assert_eq!(lb.get_all_servers().await.len(), 2);
    }
}
