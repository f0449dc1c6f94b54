//! Narrows a raw server list to an eligible list on refresh (spec.md §4.8).

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use rand::seq::SliceRandom;

use crate::config::{SubsetFilterConfig, ZoneAffinityConfig};
use crate::server::Server;
use crate::stats::LoadBalancerStats;

/// Narrows a raw server list to an eligible list.
#[async_trait]
pub trait ServerListFilter: Send + Sync {
    async fn filter(&self, servers: Vec<Arc<Server>>, stats: &LoadBalancerStats) -> Vec<Arc<Server>>;
}

/// Filters to servers in the caller's own zone, backing off to the
/// unfiltered list when the affinity guard judges the zone unhealthy
/// (spec.md §4.8).
pub struct ZoneAffinityServerListFilter {
    my_zone: Option<String>,
    cfg: ZoneAffinityConfig,
}

impl ZoneAffinityServerListFilter {
    pub fn new(my_zone: Option<String>, cfg: ZoneAffinityConfig) -> Self {
        Self { my_zone, cfg }
    }
}

#[async_trait]
impl ServerListFilter for ZoneAffinityServerListFilter {
    async fn filter(&self, servers: Vec<Arc<Server>>, stats: &LoadBalancerStats) -> Vec<Arc<Server>> {
        let my_zone = match &self.my_zone {
            Some(zone) => zone,
            None => return servers,
        };
        let filtered: Vec<Arc<Server>> = servers
            .iter()
            .filter(|s| s.zone.as_deref() == Some(my_zone.as_str()))
            .cloned()
            .collect();

        if self.cfg.enable_zone_exclusivity {
            return filtered;
        }
        if !self.cfg.enable_zone_affinity {
            return servers;
        }

        let snapshot = stats.get_zone_snapshot_for(&filtered).await;
        let blackout_ratio = if snapshot.instance_count == 0 {
            0.0
        } else {
            snapshot.circuit_tripped_count as f64 / snapshot.instance_count as f64
        };
        let available = snapshot
            .instance_count
            .saturating_sub(snapshot.circuit_tripped_count);
        let guard_tripped = blackout_ratio >= self.cfg.max_black_out_serves_r_percentage
            || snapshot.load_per_server >= self.cfg.max_load_per_server
            || available < self.cfg.min_available_servers;
        if guard_tripped {
            log::debug!(
                "Zone affinity guard disabled affinity to zone {} (blackout_ratio={:.3}, load_per_server={:.3}, available={})",
                my_zone,
                blackout_ratio,
                snapshot.load_per_server,
                available
            );
            return servers;
        }
        filtered
    }
}

/// Health ordering used by [`ServerListSubsetFilter`]'s forced-eviction
/// pass: worse health sorts first.
fn health_rank(stats: &ServerHealthSnapshot) -> (i64, i64) {
    (-(stats.failure_count as i64), -(stats.active_requests as i64))
}

struct ServerHealthSnapshot {
    failure_count: u32,
    active_requests: i64,
}

/// Maintains a stable subset of target size from the candidate pool
/// (spec.md §4.8). Holds the previous subset across refreshes so churn
/// can be bounded.
pub struct ServerListSubsetFilter {
    cfg: SubsetFilterConfig,
    current_subset: tokio::sync::Mutex<Vec<Arc<Server>>>,
}

impl ServerListSubsetFilter {
    pub fn new(cfg: SubsetFilterConfig) -> Self {
        Self {
            cfg,
            current_subset: tokio::sync::Mutex::new(Vec::new()),
        }
    }

    async fn health_of(stats: &LoadBalancerStats, server: &Arc<Server>) -> ServerHealthSnapshot {
        let server_stats = stats.get_single_server_stat(server).await;
        ServerHealthSnapshot {
            failure_count: server_stats.successive_connection_failure_count(),
            active_requests: server_stats.active_requests_count(),
        }
    }
}

#[async_trait]
impl ServerListFilter for ServerListSubsetFilter {
    async fn filter(&self, servers: Vec<Arc<Server>>, stats: &LoadBalancerStats) -> Vec<Arc<Server>> {
        let pool: HashSet<String> = servers.iter().map(|s| s.id().to_owned()).collect();
        let mut subset = self.current_subset.lock().await;

        // 1. Drop current-subset members no longer in the candidate pool.
        subset.retain(|s| pool.contains(s.id()));

        // 2. Drop members past the elimination thresholds; also remove
        // them from the candidate pool so they can't be redrawn.
        let mut candidate_pool: Vec<Arc<Server>> = servers
            .iter()
            .filter(|s| !subset.iter().any(|existing| existing.id() == s.id()))
            .cloned()
            .collect();
        let mut dropped = 0usize;
        let mut survivors = Vec::with_capacity(subset.len());
        for server in subset.drain(..) {
            let health = Self::health_of(stats, &server).await;
            let unhealthy = health.active_requests as usize > self.cfg.elimination_connection_thresold
                || health.failure_count as usize > self.cfg.elimination_failure_thresold;
            if unhealthy {
                dropped += 1;
                candidate_pool.retain(|c| c.id() != server.id());
            } else {
                survivors.push(server);
            }
        }
        *subset = survivors;

        // 3. Force-evict down to quota by health ranking if step 2 didn't
        // churn enough.
        let quota = (self.cfg.force_eliminate_percent * self.cfg.size as f64).ceil() as usize;
        if dropped < quota && !subset.is_empty() {
            let mut ranked = Vec::with_capacity(subset.len());
            for server in subset.iter() {
                ranked.push((Self::health_of(stats, server).await, server.clone()));
            }
            ranked.sort_by_key(|(health, _)| health_rank(health));
            let need = quota - dropped;
            let force_drop = need.min(ranked.len());
            for (_, server) in ranked.into_iter().take(force_drop) {
                subset.retain(|s| s.id() != server.id());
            }
        }

        // 4. Random-fill back to target size.
        let mut rng = rand::thread_rng();
        candidate_pool.shuffle(&mut rng);
        let mut fill_pool = candidate_pool;
        while subset.len() < self.cfg.size {
            match fill_pool.pop() {
                Some(candidate) => subset.push(candidate),
                None => {
                    // Not enough healthy candidates left; re-draw from the
                    // full pool (may reintroduce already-subset servers,
                    // filtered out below).
                    let mut fallback: Vec<Arc<Server>> = servers
                        .iter()
                        .filter(|s| !subset.iter().any(|existing| existing.id() == s.id()))
                        .cloned()
                        .collect();
                    if fallback.is_empty() {
                        break;
                    }
                    fallback.shuffle(&mut rng);
                    fill_pool = fallback;
                }
            }
        }

        subset.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CircuitBreakerConfig;

    fn stats() -> LoadBalancerStats {
        LoadBalancerStats::new(CircuitBreakerConfig {
            failure_threshold: 3,
            base_blackout_ms: 1_000,
            max_blackout_ms: 10_000,
            active_requests_count_timeout_ms: 60_000,
        })
    }

    fn servers(n: usize) -> Vec<Arc<Server>> {
        (0..n)
            .map(|i| Arc::new(Server::new(format!("h{i}"), i as u16, None)))
            .collect()
    }

    #[tokio::test]
    async fn subset_filter_caps_at_target_size() {
        let filter = ServerListSubsetFilter::new(SubsetFilterConfig {
            size: 5,
            force_eliminate_percent: 0.1,
            elimination_connection_thresold: 0,
            elimination_failure_thresold: 0,
        });
        let lb_stats = stats();
        let result = filter.filter(servers(50), &lb_stats).await;
        assert_eq!(result.len(), 5);
    }

    #[tokio::test]
    async fn subset_filter_changes_bounded_on_stable_pool() {
        let filter = ServerListSubsetFilter::new(SubsetFilterConfig {
            size: 5,
            force_eliminate_percent: 0.1,
            elimination_connection_thresold: 0,
            elimination_failure_thresold: 0,
        });
        let lb_stats = stats();
        let pool = servers(50);
        let first = filter.filter(pool.clone(), &lb_stats).await;
        let second = filter.filter(pool, &lb_stats).await;
        let first_ids: HashSet<&str> = first.iter().map(|s| s.id()).collect();
        let second_ids: HashSet<&str> = second.iter().map(|s| s.id()).collect();
        let changed = first_ids.symmetric_difference(&second_ids).count();
        assert!(changed <= 5, "changed {changed} elements, expected <= size");
    }

    #[tokio::test]
    async fn zone_affinity_filters_to_local_zone() {
        let filter = ZoneAffinityServerListFilter::new(
            Some("z1".to_owned()),
            ZoneAffinityConfig {
                enable_zone_affinity: true,
                enable_zone_exclusivity: false,
                max_load_per_server: 0.6,
                max_black_out_serves_r_percentage: 0.8,
                min_available_servers: 2,
            },
        );
        let lb_stats = stats();
        let mut all = servers(4);
        for (i, s) in all.iter_mut().enumerate() {
            let zone = if i % 2 == 0 { "z1" } else { "z2" };
            *s = Arc::new(Server::new(s.host.clone(), s.port, Some(zone.to_owned())));
        }
        let result = filter.filter(all, &lb_stats).await;
        assert!(result.iter().all(|s| s.zone.as_deref() == Some("z1")));
    }

    #[tokio::test]
    async fn zone_affinity_guard_disables_when_too_few_available() {
        let filter = ZoneAffinityServerListFilter::new(
            Some("z1".to_owned()),
            ZoneAffinityConfig {
                enable_zone_affinity: true,
                enable_zone_exclusivity: false,
                max_load_per_server: 0.6,
                max_black_out_serves_r_percentage: 0.8,
                min_available_servers: 2,
            },
        );
        let lb_stats = stats();
        // Only one server total in z1: below min_available_servers=2.
        let all = vec![
            Arc::new(Server::new("a", 1, Some("z1".to_owned()))),
            Arc::new(Server::new("b", 2, Some("z2".to_owned()))),
            Arc::new(Server::new("c", 3, Some("z2".to_owned()))),
        ];
        let result = filter.filter(all, &lb_stats).await;
        assert_eq!(result.len(), 3, "affinity should have been disabled");
    }
}
