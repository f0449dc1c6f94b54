//! Boolean filters over (server, request-key) with fallback cascades
//! (spec.md §4.4).

use std::sync::atomic::AtomicU32;
use std::sync::Arc;

use async_trait::async_trait;

use crate::config::{AvailabilityConfig, ZoneAvoidanceConfig};
use crate::server::Server;
use crate::stats::LoadBalancerStats;
use crate::util::next_cyclic_index;
use crate::zone_avoidance::{self, ZoneAvoidanceParams};

/// A boolean filter over a candidate server and an optional request key.
#[async_trait]
pub trait Predicate: Send + Sync {
    async fn apply(&self, stats: &LoadBalancerStats, candidate: &Arc<Server>, key: Option<&str>) -> bool;

    /// Returns all servers in `servers` for which [`Self::apply`] is true.
    async fn get_eligible_servers(
        &self,
        stats: &LoadBalancerStats,
        servers: &[Arc<Server>],
        key: Option<&str>,
    ) -> Vec<Arc<Server>> {
        let mut eligible = Vec::with_capacity(servers.len());
        for candidate in servers {
            if self.apply(stats, candidate, key).await {
                eligible.push(candidate.clone());
            }
        }
        eligible
    }

    /// Round-robins over the filtered sublist using a shared cyclic
    /// counter, modulo the filtered size (spec.md §4.3
    /// `PredicateBasedRule`). Returns `None` if the filtered set is empty.
    async fn choose_round_robin_after_filtering(
        &self,
        stats: &LoadBalancerStats,
        servers: &[Arc<Server>],
        key: Option<&str>,
        counter: &AtomicU32,
    ) -> Option<Arc<Server>> {
        let eligible = self.get_eligible_servers(stats, servers, key).await;
        if eligible.is_empty() {
            return None;
        }
        let idx = next_cyclic_index(counter, eligible.len());
        eligible.get(idx).cloned()
    }
}

/// Rejects a server whose circuit breaker is tripped, or whose active
/// request count has reached the configured limit (spec.md §4.4).
pub struct AvailabilityPredicate {
    cfg: AvailabilityConfig,
}

impl AvailabilityPredicate {
    pub fn new(cfg: AvailabilityConfig) -> Self {
        Self { cfg }
    }
}

#[async_trait]
impl Predicate for AvailabilityPredicate {
    async fn apply(&self, stats: &LoadBalancerStats, candidate: &Arc<Server>, _key: Option<&str>) -> bool {
        let server_stats = stats.get_single_server_stat(candidate).await;
        if self.cfg.filter_circuit_tripped && server_stats.is_circuit_breaker_tripped() {
            return false;
        }
        if server_stats.active_requests_count() as i64 >= self.cfg.active_connections_limit as i64 {
            return false;
        }
        true
    }
}

/// Rejects any server whose zone was evicted by the zone-avoidance
/// algorithm (spec.md §4.4, §4.5). Available zones are computed once per
/// [`Predicate::get_eligible_servers`] call, not once per candidate, so
/// the weighted eviction draw is consistent across the whole pass.
pub struct ZoneAvoidancePredicate {
    params: ZoneAvoidanceParams,
}

impl ZoneAvoidancePredicate {
    pub fn new(cfg: ZoneAvoidanceConfig) -> Self {
        Self {
            params: ZoneAvoidanceParams {
                triggering_load: cfg.triggering_load_per_server_threshold,
                triggering_blackout_percentage: cfg.avoid_zone_with_blackout_percetage,
            },
        }
    }
}

#[async_trait]
impl Predicate for ZoneAvoidancePredicate {
    async fn apply(&self, stats: &LoadBalancerStats, candidate: &Arc<Server>, _key: Option<&str>) -> bool {
        let zone = match &candidate.zone {
            Some(zone) => zone,
            None => return true,
        };
        let snapshot = stats.get_zone_snapshots().await;
        let available = zone_avoidance::available_zones(&snapshot, self.params);
        available.contains(zone)
    }

    async fn get_eligible_servers(
        &self,
        stats: &LoadBalancerStats,
        servers: &[Arc<Server>],
        _key: Option<&str>,
    ) -> Vec<Arc<Server>> {
        let snapshot = stats.get_zone_snapshots().await;
        let available = zone_avoidance::available_zones(&snapshot, self.params);
        servers
            .iter()
            .filter(|server| match &server.zone {
                Some(zone) => available.contains(zone),
                None => true,
            })
            .cloned()
            .collect()
    }
}

/// Always true. Used as the terminal fallback of a
/// [`CompositePredicate`] cascade.
pub struct AlwaysTruePredicate;

#[async_trait]
impl Predicate for AlwaysTruePredicate {
    async fn apply(&self, _stats: &LoadBalancerStats, _candidate: &Arc<Server>, _key: Option<&str>) -> bool {
        true
    }
}

/// Conjunction of two predicates: accepts only candidates both accept.
pub struct AndPredicate {
    left: Box<dyn Predicate>,
    right: Box<dyn Predicate>,
}

impl AndPredicate {
    pub fn new(left: Box<dyn Predicate>, right: Box<dyn Predicate>) -> Self {
        Self { left, right }
    }
}

#[async_trait]
impl Predicate for AndPredicate {
    async fn apply(&self, stats: &LoadBalancerStats, candidate: &Arc<Server>, key: Option<&str>) -> bool {
        self.left.apply(stats, candidate, key).await && self.right.apply(stats, candidate, key).await
    }
}

/// A primary predicate with an ordered fallback cascade (spec.md §4.4).
///
/// `get_eligible_servers` applies the primary against the full list; if
/// the result doesn't satisfy both the minimum absolute count and the
/// minimum percentage of the original list, the next fallback is tried
/// against the *original* list (not the primary's output). The first
/// satisfactory result wins; if none satisfy, the last attempted result
/// is returned.
pub struct CompositePredicate {
    primary: Box<dyn Predicate>,
    fallbacks: Vec<Box<dyn Predicate>>,
    minimal_filtered_servers: usize,
    minimal_filtered_percentage: f64,
}

impl CompositePredicate {
    pub fn new(primary: Box<dyn Predicate>, fallbacks: Vec<Box<dyn Predicate>>) -> Self {
        Self {
            primary,
            fallbacks,
            minimal_filtered_servers: 1,
            minimal_filtered_percentage: 0.0,
        }
    }

    pub fn with_thresholds(mut self, minimal_filtered_servers: usize, minimal_filtered_percentage: f64) -> Self {
        self.minimal_filtered_servers = minimal_filtered_servers;
        self.minimal_filtered_percentage = minimal_filtered_percentage;
        self
    }

    fn satisfies(&self, eligible_count: usize, total_count: usize) -> bool {
        eligible_count >= self.minimal_filtered_servers
            && eligible_count as f64 > self.minimal_filtered_percentage * total_count as f64
    }
}

#[async_trait]
impl Predicate for CompositePredicate {
    async fn apply(&self, stats: &LoadBalancerStats, candidate: &Arc<Server>, key: Option<&str>) -> bool {
        self.primary.apply(stats, candidate, key).await
    }

    async fn get_eligible_servers(
        &self,
        stats: &LoadBalancerStats,
        servers: &[Arc<Server>],
        key: Option<&str>,
    ) -> Vec<Arc<Server>> {
        let total = servers.len();
        let mut result = self.primary.get_eligible_servers(stats, servers, key).await;
        if self.satisfies(result.len(), total) {
            return result;
        }
        for fallback in &self.fallbacks {
            let attempt = fallback.get_eligible_servers(stats, servers, key).await;
            let satisfied = self.satisfies(attempt.len(), total);
            result = attempt;
            if satisfied {
                return result;
            }
        }
        result
    }
}
