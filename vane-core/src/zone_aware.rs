//! Zone-partitioned load balancer (spec.md §3 "ZoneAwareLoadBalancer",
//! §4.7).

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::config::{CircuitBreakerConfig, ZoneAvoidanceConfig};
use crate::load_balancer::{ILoadBalancer, LoadBalancer};
use crate::rules::Rule;
use crate::server::Server;
use crate::stats::LoadBalancerStats;
use crate::zone_avoidance::{self, ZoneAvoidanceParams};

/// Maintains `zone -> sub-LoadBalancer`, each owning only the servers of
/// one zone and sharing the parent's [`LoadBalancerStats`].
///
/// Each sub-balancer gets its own `Rule` instance built from
/// `rule_factory` rather than a literal clone of the parent's `Rule`
/// trait object — object-safe `Rule`s aren't `Clone`, and a fresh
/// instance from the same factory carries no cursor state to leak
/// across zones, which is the property the source's "clone the Rule"
/// requirement is actually protecting.
pub struct ZoneAwareLoadBalancer {
    parent: LoadBalancer,
    rule_factory: Box<dyn Fn() -> Box<dyn Rule> + Send + Sync>,
    zone_params: ZoneAvoidanceParams,
    stats_expiry: Duration,
    sub_balancers: RwLock<HashMap<String, LoadBalancer>>,
}

impl ZoneAwareLoadBalancer {
    pub fn new(
        rule_factory: impl Fn() -> Box<dyn Rule> + Send + Sync + 'static,
        zone_cfg: ZoneAvoidanceConfig,
        circuit_breaker_cfg: CircuitBreakerConfig,
        stats_expiry: Duration,
    ) -> Self {
        let parent = LoadBalancer::new(rule_factory(), circuit_breaker_cfg, stats_expiry);
        Self {
            parent,
            rule_factory: Box::new(rule_factory),
            zone_params: ZoneAvoidanceParams {
                triggering_load: zone_cfg.triggering_load_per_server_threshold,
                triggering_blackout_percentage: zone_cfg.avoid_zone_with_blackout_percetage,
            },
            stats_expiry,
            sub_balancers: RwLock::new(HashMap::new()),
        }
    }

    pub fn stats(&self) -> &LoadBalancerStats {
        self.parent.stats()
    }

    /// Publishes `servers` on the parent and repartitions them by zone
    /// across sub-balancers. Zones with no more servers get their
    /// sub-balancer's list emptied rather than removed, so stale zone
    /// snapshots don't linger (spec.md §4.7).
    pub async fn set_servers_list(&self, servers: Vec<Server>) {
        let servers: Vec<Arc<Server>> = servers.into_iter().map(Arc::new).collect();

        let mut by_zone: HashMap<String, Vec<Arc<Server>>> = HashMap::new();
        for server in &servers {
            if let Some(zone) = &server.zone {
                by_zone.entry(zone.clone()).or_default().push(server.clone());
            }
        }

        self.parent.set_servers_list_shared(servers).await;

        let mut subs = self.sub_balancers.write().await;
        let seen_zones: HashSet<&String> = by_zone.keys().collect();
        for (zone, sub) in subs.iter() {
            if !seen_zones.contains(zone) {
                sub.set_servers_list_shared(Vec::new()).await;
            }
        }
        for (zone, zone_servers) in by_zone {
            let stats = self.parent.stats_arc();
            let sub = subs.entry(zone).or_insert_with(|| {
                LoadBalancer::with_stats((self.rule_factory)(), stats, self.stats_expiry)
            });
            sub.set_servers_list_shared(zone_servers).await;
        }
    }

    /// Pings through the parent: since sub-balancers hold the same
    /// `Arc<Server>` instances, updating liveness there is visible to
    /// every sub-balancer too.
    pub async fn ping_once(&self, pinger: &dyn crate::ping::Pinger) {
        self.parent.ping_once(pinger).await;
    }

    pub async fn refresh_from_source(
        &self,
        source: &dyn crate::list_source::ServerListSource,
        filter: Option<&dyn crate::filter::ServerListFilter>,
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
            Some(filter) => filter.filter(raw, self.parent.stats()).await,
            None => raw,
        };
        let owned: Vec<Server> = filtered.iter().map(|s| (**s).clone()).collect();
        self.set_servers_list(owned).await;
    }

    /// Delegates to the parent's rule directly when fewer than two zones
    /// are known. Otherwise computes the available-zone set and, if it's
    /// non-empty and strictly smaller than the full zone set, draws a
    /// zone and delegates to its sub-balancer. Any miss (draw failed, or
    /// the sub-balancer itself returned nothing) falls back to the
    /// parent's rule (`RuleInternalFault` handling, spec.md §7).
    pub async fn choose_server(&self, key: Option<&str>) -> Option<Arc<Server>> {
        let subs = self.sub_balancers.read().await;
        if subs.len() < 2 {
            return self.parent.choose_server(key).await;
        }

        let snapshot = self.parent.stats().get_zone_snapshots().await;
        let total_zone_count = snapshot.len();
        let available = zone_avoidance::available_zones(&snapshot, self.zone_params);

        if !available.is_empty() && available.len() < total_zone_count {
            let candidates: HashMap<String, crate::stats::ZoneSnapshot> = available
                .iter()
                .filter_map(|zone| snapshot.get(zone).map(|zs| (zone.clone(), *zs)))
                .collect();
            if let Some(zone) = zone_avoidance::weighted_zone_choice(&candidates) {
                if let Some(sub) = subs.get(&zone) {
                    if let Some(server) = sub.choose_server(key).await {
                        return Some(server);
                    }
                }
            }
        }
        self.parent.choose_server(key).await
    }

    pub async fn mark_server_down(&self, server_id: &str) {
        self.parent.mark_server_down(server_id).await;
    }

    pub async fn get_reachable_servers(&self) -> Vec<Arc<Server>> {
        self.parent.get_reachable_servers().await
    }

    pub async fn get_all_servers(&self) -> Vec<Arc<Server>> {
        self.parent.get_all_servers().await
    }

    pub async fn zone_count(&self) -> usize {
        self.sub_balancers.read().await.len()
    }
}

#[async_trait]
impl ILoadBalancer for ZoneAwareLoadBalancer {
    async fn add_servers(&self, servers: Vec<Server>) {
        let mut all = self.parent.get_all_servers().await;
        all.extend(servers.into_iter().map(Arc::new));
        let owned: Vec<Server> = all.iter().map(|s| (**s).clone()).collect();
        self.set_servers_list(owned).await;
    }

    async fn choose_server(&self, key: Option<&str>) -> Option<Arc<Server>> {
        self.choose_server(key).await
    }

    async fn mark_server_down(&self, server_id: &str) {
        self.mark_server_down(server_id).await;
    }

    async fn get_reachable_servers(&self) -> Vec<Arc<Server>> {
        self.get_reachable_servers().await
    }

    async fn get_all_servers(&self) -> Vec<Arc<Server>> {
        self.get_all_servers().await
    }
}
