use std::sync::Arc;

use async_trait::async_trait;

use crate::load_balancer::LoadBalancerView;
use crate::server::Server;

use super::{Rule, RoundRobinRule};

/// Picks the up server with the fewest active requests among those
/// whose circuit breaker is not tripped (spec.md §4.3). Falls back to
/// round robin if every up server is tripped.
pub struct BestAvailableRule {
    fallback: RoundRobinRule,
}

impl Default for BestAvailableRule {
    fn default() -> Self {
        Self {
            fallback: RoundRobinRule::new(),
        }
    }
}

impl BestAvailableRule {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Rule for BestAvailableRule {
    async fn choose(&self, lb: &dyn LoadBalancerView, key: Option<&str>) -> Option<Arc<Server>> {
        let up = lb.up_servers();
        let mut best: Option<(Arc<Server>, i64)> = None;
        for server in &up {
            let stats = lb.stats().get_single_server_stat(server).await;
            if stats.is_circuit_breaker_tripped() {
                continue;
            }
            let active = stats.active_requests_count();
            if best.as_ref().map_or(true, |(_, current)| active < *current) {
                best = Some((server.clone(), active));
            }
        }
        match best {
            Some((server, _)) => Some(server),
            None => self.fallback.choose(lb, key).await,
        }
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
    async fn picks_server_with_fewest_active_requests() {
        let lb = LoadBalancer::new(Box::new(BestAvailableRule::new()), cb_cfg(), Duration::from_secs(60));
        let busy = Server::new("busy", 1, None);
        let idle = Server::new("idle", 2, None);
        lb.set_servers_list(vec![busy, idle]).await;
        lb.stats().note_request_start(&Server::new("busy", 1, None)).await;
        lb.stats().note_request_start(&Server::new("busy", 1, None)).await;
        lb.stats().note_request_start(&Server::new("idle", 2, None)).await;

        let chosen = lb.choose_server(None).await.unwrap();
        assert_eq!(chosen.id(), "idle:2");
    }

    #[tokio::test]
    async fn falls_back_to_round_robin_when_all_tripped() {
        let lb = LoadBalancer::new(Box::new(BestAvailableRule::new()), cb_cfg(), Duration::from_secs(60));
        let a = Server::new("a", 1, None);
        lb.set_servers_list(vec![a]).await;
        for _ in 0..3 {
            lb.stats().note_connection_failure(&Server::new("a", 1, None)).await;
        }
        assert!(lb.choose_server(None).await.is_some());
    }
}
