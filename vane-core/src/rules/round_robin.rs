use std::sync::Arc;

use async_trait::async_trait;

use crate::load_balancer::LoadBalancerView;
use crate::server::Server;
use crate::util::next_cyclic_index;

use super::{retry_live, Rule, LIVENESS_RETRY_ATTEMPTS};

/// Cycles through `up_servers` using the load balancer's shared cyclic
/// counter (spec.md §4.3).
#[derive(Default)]
pub struct RoundRobinRule;

impl RoundRobinRule {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Rule for RoundRobinRule {
    async fn choose(&self, lb: &dyn LoadBalancerView, _key: Option<&str>) -> Option<Arc<Server>> {
        let up = lb.up_servers();
        retry_live(&up, LIVENESS_RETRY_ATTEMPTS, |len| next_cyclic_index(lb.cyclic_counter(), len)).await
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
    async fn cycles_in_order() {
        let lb = LoadBalancer::new(Box::new(RoundRobinRule::new()), cb_cfg(), Duration::from_secs(60));
        lb.set_servers_list(vec![Server::new("a", 1, None), Server::new("b", 2, None), Server::new("c", 3, None)])
            .await;
        let mut picks = Vec::new();
        for _ in 0..6 {
            picks.push(lb.choose_server(None).await.unwrap().id().to_owned());
        }
        assert_eq!(picks, vec!["a:1", "b:2", "c:3", "a:1", "b:2", "c:3"]);
    }

    #[tokio::test]
    async fn empty_list_returns_none() {
        let lb = LoadBalancer::new(Box::new(RoundRobinRule::new()), cb_cfg(), Duration::from_secs(60));
        assert!(lb.choose_server(None).await.is_none());
    }
}
