use std::sync::Arc;
use std::time::{Duration, Instant};

use arc_swap::ArcSwapOption;
use async_trait::async_trait;
use rand::Rng;

use crate::load_balancer::LoadBalancerView;
use crate::server::Server;
use crate::util::next_cyclic_index;

use super::Rule;

/// Default cadence at which the cumulative weight array is recomputed
/// (spec.md §4.3, §5).
const DEFAULT_RECOMPUTE_INTERVAL: Duration = Duration::from_secs(30);

/// A cumulative weight array over the server list observed at the time
/// it was computed, published as a unit so a reader never sees weights
/// and servers drawn from two different recomputations.
struct WeightSnapshot {
    computed_at: Instant,
    servers: Vec<Arc<Server>>,
    /// `cumulative[i]` is the sum of weights `0..=i`; `cumulative.last()`
    /// is the total weight.
    cumulative: Vec<f64>,
}

impl WeightSnapshot {
    fn is_stale(&self, recompute_interval: Duration) -> bool {
        self.computed_at.elapsed() >= recompute_interval
    }
}

/// Weights servers inversely to their recorded mean response time and
/// draws one proportionally (spec.md §4.3). The cumulative weight array
/// is recomputed at most once per `recompute_interval` (default 30s) and
/// published via an atomic pointer swap; `choose()` reads whichever
/// snapshot is current at entry and draws against it rather than
/// recomputing on every call. Falls back to round robin until enough
/// samples exist to weight meaningfully.
pub struct WeightedResponseTimeRule {
    cache: ArcSwapOption<WeightSnapshot>,
    recompute_interval: Duration,
}

impl Default for WeightedResponseTimeRule {
    fn default() -> Self {
        Self::new()
    }
}

impl WeightedResponseTimeRule {
    pub fn new() -> Self {
        Self::with_recompute_interval(DEFAULT_RECOMPUTE_INTERVAL)
    }

    pub fn with_recompute_interval(recompute_interval: Duration) -> Self {
        Self {
            cache: ArcSwapOption::from(None),
            recompute_interval,
        }
    }

    /// Returns the current snapshot, recomputing and publishing a fresh
    /// one if the cache is empty, stale, or still reflects zero servers
    /// while the load balancer now has some (bootstrap case).
    async fn snapshot(&self, lb: &dyn LoadBalancerView, up: &[Arc<Server>]) -> Option<Arc<WeightSnapshot>> {
        if let Some(current) = self.cache.load_full() {
            if !current.is_stale(self.recompute_interval) && !(current.servers.is_empty() && !up.is_empty()) {
                return Some(current);
            }
        }
        if up.is_empty() {
            return None;
        }

        let mut means = Vec::with_capacity(up.len());
        for server in up {
            let stats = lb.stats().get_single_server_stat(server).await;
            means.push(stats.response_time_mean());
        }
        let max_mean = means.iter().cloned().fold(0.0_f64, f64::max);

        let mut cumulative = Vec::with_capacity(up.len());
        let mut running = 0.0;
        for mean in &means {
            running += (max_mean - mean) + 1.0;
            cumulative.push(running);
        }

        let snapshot = Arc::new(WeightSnapshot {
            computed_at: Instant::now(),
            servers: up.to_vec(),
            cumulative,
        });
        self.cache.store(Some(snapshot.clone()));
        Some(snapshot)
    }
}

#[async_trait]
impl Rule for WeightedResponseTimeRule {
    async fn choose(&self, lb: &dyn LoadBalancerView, _key: Option<&str>) -> Option<Arc<Server>> {
        let up = lb.up_servers();
        if up.is_empty() {
            return None;
        }

        let snapshot = match self.snapshot(lb, &up).await {
            Some(snapshot) => snapshot,
            None => return None,
        };
        let total = snapshot.cumulative.last().copied().unwrap_or(0.0);
        if total <= 0.0 {
            let idx = next_cyclic_index(lb.cyclic_counter(), up.len());
            return up.get(idx).cloned();
        }

        let draw = rand::thread_rng().gen_range(0.0..total);
        let idx = snapshot.cumulative.partition_point(|&cumulative| cumulative <= draw);
        snapshot
            .servers
            .get(idx)
            .or_else(|| snapshot.servers.last())
            .cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CircuitBreakerConfig;
    use crate::load_balancer::LoadBalancer;
    use std::time::Duration;

    fn cb_cfg() -> CircuitBreakerConfig {
        CircuitBreakerConfig {
            failure_threshold: 3,
            base_blackout_ms: 1_000,
            max_blackout_ms: 10_000,
            active_requests_count_timeout_ms: 60_000,
        }
    }

    #[tokio::test]
    async fn favors_the_faster_server_over_many_draws() {
        let lb = LoadBalancer::new(Box::new(WeightedResponseTimeRule::new()), cb_cfg(), Duration::from_secs(60));
        let fast = Server::new("fast", 1, None);
        let slow = Server::new("slow", 2, None);
        lb.set_servers_list(vec![fast, slow]).await;

        for _ in 0..20 {
            lb.stats().note_request_end(&Server::new("fast", 1, None), 1.0, true).await;
            lb.stats().note_request_end(&Server::new("slow", 2, None), 200.0, true).await;
        }

        let mut fast_wins = 0;
        for _ in 0..500 {
            if lb.choose_server(None).await.unwrap().id() == "fast:1" {
                fast_wins += 1;
            }
        }
        assert!(fast_wins > 350, "fast_wins={fast_wins}, expected it to dominate draws");
    }

    #[tokio::test]
    async fn degrades_to_round_robin_with_no_samples() {
        let lb = LoadBalancer::new(Box::new(WeightedResponseTimeRule::new()), cb_cfg(), Duration::from_secs(60));
        lb.set_servers_list(vec![Server::new("a", 1, None), Server::new("b", 2, None)])
            .await;
        assert!(lb.choose_server(None).await.is_some());
    }

    #[tokio::test]
    async fn snapshot_is_reused_until_it_goes_stale() {
        let rule = WeightedResponseTimeRule::with_recompute_interval(Duration::from_millis(20));
        let lb = LoadBalancer::new(Box::new(crate::rules::RoundRobinRule::new()), cb_cfg(), Duration::from_secs(60));
        let a = Arc::new(Server::new("a", 1, None));
        let b = Arc::new(Server::new("b", 2, None));
        let up = vec![a.clone(), b.clone()];

        let first = rule.snapshot(&lb, &up).await.unwrap();
        let second = rule.snapshot(&lb, &up).await.unwrap();
        assert!(Arc::ptr_eq(&first, &second), "snapshot should not recompute before it goes stale");

        tokio::time::sleep(Duration::from_millis(30)).await;
        let third = rule.snapshot(&lb, &up).await.unwrap();
        assert!(!Arc::ptr_eq(&first, &third), "snapshot should recompute once stale");
    }
}
