use std::sync::Arc;

use async_trait::async_trait;
use rand::Rng;

use crate::load_balancer::LoadBalancerView;
use crate::server::Server;

use super::{retry_live, Rule, LIVENESS_RETRY_ATTEMPTS};

/// Picks uniformly at random from `up_servers` (spec.md §4.3).
#[derive(Default)]
pub struct RandomRule;

impl RandomRule {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Rule for RandomRule {
    async fn choose(&self, lb: &dyn LoadBalancerView, _key: Option<&str>) -> Option<Arc<Server>> {
        let up = lb.up_servers();
        retry_live(&up, LIVENESS_RETRY_ATTEMPTS, |len| rand::thread_rng().gen_range(0..len)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CircuitBreakerConfig;
    use crate::load_balancer::LoadBalancer;
    use std::time::Duration;

    #[tokio::test]
    async fn always_picks_a_live_server() {
        let lb = LoadBalancer::new(
            Box::new(RandomRule::new()),
            CircuitBreakerConfig {
                failure_threshold: 3,
                base_blackout_ms: 1_000,
                max_blackout_ms: 10_000,
                active_requests_count_timeout_ms: 60_000,
            },
            Duration::from_secs(60),
        );
        lb.set_servers_list(vec![Server::new("a", 1, None), Server::new("b", 2, None)])
            .await;
        for _ in 0..20 {
            let chosen = lb.choose_server(None).await.unwrap();
            assert!(chosen.id() == "a:1" || chosen.id() == "b:2");
        }
    }

    #[tokio::test]
    async fn empty_list_returns_none() {
        let lb = LoadBalancer::new(
            Box::new(RandomRule::new()),
            CircuitBreakerConfig {
                failure_threshold: 3,
                base_blackout_ms: 1_000,
                max_blackout_ms: 10_000,
                active_requests_count_timeout_ms: 60_000,
            },
            Duration::from_secs(60),
        );
        assert!(lb.choose_server(None).await.is_none());
    }
}
