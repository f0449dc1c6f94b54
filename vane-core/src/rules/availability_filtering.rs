use std::sync::Arc;

use async_trait::async_trait;

use crate::config::AvailabilityConfig;
use crate::load_balancer::LoadBalancerView;
use crate::predicate::{AvailabilityPredicate, Predicate};
use crate::server::Server;
use crate::util::next_cyclic_index;

use super::Rule;

/// Candidate probes to try before falling back to filter-then-pick.
const SAMPLING_ATTEMPTS: usize = 10;

/// Optimised rule over [`AvailabilityPredicate`] (spec.md §4.3, §4.4):
/// round-robins raw candidates off `all_servers`, testing each against
/// the predicate directly, instead of filtering the whole list up front.
/// Only after [`SAMPLING_ATTEMPTS`] rejected candidates does it fall back
/// to the full filter-then-round-robin path.
pub struct AvailabilityFilteringRule {
    predicate: AvailabilityPredicate,
}

impl AvailabilityFilteringRule {
    pub fn new(cfg: AvailabilityConfig) -> Self {
        Self {
            predicate: AvailabilityPredicate::new(cfg),
        }
    }
}

#[async_trait]
impl Rule for AvailabilityFilteringRule {
    async fn choose(&self, lb: &dyn LoadBalancerView, key: Option<&str>) -> Option<Arc<Server>> {
        let all = lb.all_servers();
        if all.is_empty() {
            return None;
        }
        for _ in 0..SAMPLING_ATTEMPTS {
            let idx = next_cyclic_index(lb.cyclic_counter(), all.len());
            let candidate = match all.get(idx) {
                Some(candidate) => candidate,
                None => continue,
            };
            if self.predicate.apply(lb.stats(), candidate, key).await {
                return Some(candidate.clone());
            }
        }
        self.predicate
            .choose_round_robin_after_filtering(lb.stats(), &all, key, lb.cyclic_counter())
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CircuitBreakerConfig;
    use crate::load_balancer::LoadBalancer;
    use std::time::Duration;

    #[tokio::test]
    async fn filters_out_over_limit_servers() {
        let rule = AvailabilityFilteringRule::new(AvailabilityConfig {
            active_connections_limit: 1,
            filter_circuit_tripped: true,
        });
        let lb = LoadBalancer::new(
            Box::new(rule),
            CircuitBreakerConfig {
                failure_threshold: 3,
                base_blackout_ms: 1_000,
                max_blackout_ms: 10_000,
                active_requests_count_timeout_ms: 60_000,
            },
            Duration::from_secs(60),
        );
        let busy = Server::new("busy", 1, None);
        let free = Server::new("free", 2, None);
        lb.set_servers_list(vec![busy, free]).await;
        lb.stats().note_request_start(&Server::new("busy", 1, None)).await;
        lb.stats().note_request_start(&Server::new("busy", 1, None)).await;

        for _ in 0..10 {
            assert_eq!(lb.choose_server(None).await.unwrap().id(), "free:2");
        }
    }
}
