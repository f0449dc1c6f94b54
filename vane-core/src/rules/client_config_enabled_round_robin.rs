use std::sync::Arc;

use async_trait::async_trait;

use crate::load_balancer::LoadBalancerView;
use crate::server::Server;

use super::{Rule, RoundRobinRule};

/// Round-robin fallback used by predicate-driven rules when their
/// predicate yields no eligible servers, mirroring the source's
/// `ClientConfigEnabledRoundRobinRule` base class (spec.md §4.3).
#[derive(Default)]
pub struct ClientConfigEnabledRoundRobinRule {
    round_robin: RoundRobinRule,
}

impl ClientConfigEnabledRoundRobinRule {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Rule for ClientConfigEnabledRoundRobinRule {
    async fn choose(&self, lb: &dyn LoadBalancerView, key: Option<&str>) -> Option<Arc<Server>> {
        self.round_robin.choose(lb, key).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CircuitBreakerConfig;
    use crate::load_balancer::LoadBalancer;
    use std::time::Duration;

    #[tokio::test]
    async fn behaves_like_round_robin() {
        let lb = LoadBalancer::new(
            Box::new(ClientConfigEnabledRoundRobinRule::new()),
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
        assert_eq!(lb.choose_server(None).await.unwrap().id(), "a:1");
        assert_eq!(lb.choose_server(None).await.unwrap().id(), "b:2");
    }
}
