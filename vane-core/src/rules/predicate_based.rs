use std::sync::Arc;

use async_trait::async_trait;

use crate::config::{AvailabilityConfig, ZoneAvoidanceConfig};
use crate::load_balancer::LoadBalancerView;
use crate::predicate::{AlwaysTruePredicate, AvailabilityPredicate, CompositePredicate, Predicate, ZoneAvoidancePredicate};
use crate::server::Server;

use super::Rule;

/// Filters candidates through a [`Predicate`] and round-robins over the
/// survivors (spec.md §4.3 `PredicateBasedRule`).
pub struct PredicateBasedRule {
    predicate: Box<dyn Predicate>,
}

impl PredicateBasedRule {
    pub fn new(predicate: Box<dyn Predicate>) -> Self {
        Self { predicate }
    }
}

#[async_trait]
impl Rule for PredicateBasedRule {
    async fn choose(&self, lb: &dyn LoadBalancerView, key: Option<&str>) -> Option<Arc<Server>> {
        let all = lb.all_servers();
        self.predicate
            .choose_round_robin_after_filtering(lb.stats(), &all, key, lb.cyclic_counter())
            .await
    }
}

/// `PredicateBasedRule` over a [`CompositePredicate`] of zone avoidance
/// primary, availability fallback, and an always-true terminal fallback
/// (spec.md §4.3, §4.4, §4.5).
pub struct ZoneAvoidanceRule {
    inner: PredicateBasedRule,
}

impl ZoneAvoidanceRule {
    pub fn new(zone_cfg: ZoneAvoidanceConfig, availability_cfg: AvailabilityConfig) -> Self {
        let composite = CompositePredicate::new(
            Box::new(ZoneAvoidancePredicate::new(zone_cfg)),
            vec![
                Box::new(AvailabilityPredicate::new(availability_cfg)),
                Box::new(AlwaysTruePredicate),
            ],
        );
        Self {
            inner: PredicateBasedRule::new(Box::new(composite)),
        }
    }
}

#[async_trait]
impl Rule for ZoneAvoidanceRule {
    async fn choose(&self, lb: &dyn LoadBalancerView, key: Option<&str>) -> Option<Arc<Server>> {
        self.inner.choose(lb, key).await
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
            failure_threshold: 1,
            base_blackout_ms: 10_000,
            max_blackout_ms: 10_000,
            active_requests_count_timeout_ms: 60_000,
        }
    }

    #[tokio::test]
    async fn predicate_based_rule_skips_tripped_servers() {
        let rule = PredicateBasedRule::new(Box::new(AvailabilityPredicate::new(AvailabilityConfig {
            active_connections_limit: usize::MAX,
            filter_circuit_tripped: true,
        })));
        let lb = LoadBalancer::new(Box::new(rule), cb_cfg(), Duration::from_secs(60));
        let healthy = Server::new("healthy", 1, None);
        let tripped = Server::new("tripped", 2, None);
        lb.set_servers_list(vec![healthy, tripped]).await;
        lb.stats().note_connection_failure(&Server::new("tripped", 2, None)).await;

        for _ in 0..10 {
            assert_eq!(lb.choose_server(None).await.unwrap().id(), "healthy:1");
        }
    }

    #[tokio::test]
    async fn zone_avoidance_rule_avoids_blacked_out_zone() {
        let rule = ZoneAvoidanceRule::new(
            ZoneAvoidanceConfig {
                triggering_load_per_server_threshold: 0.2,
                avoid_zone_with_blackout_percetage: 0.99,
            },
            AvailabilityConfig {
                active_connections_limit: usize::MAX,
                filter_circuit_tripped: true,
            },
        );
        let lb = LoadBalancer::new(Box::new(rule), cb_cfg(), Duration::from_secs(60));
        let mut servers = Vec::new();
        for i in 0..10 {
            servers.push(Server::new(format!("e{i}"), i as u16, Some("us-east".to_owned())));
        }
        for i in 0..10 {
            servers.push(Server::new(format!("w{i}"), 100 + i as u16, Some("us-west".to_owned())));
        }
        lb.set_servers_list(servers).await;
        for i in 0..10 {
            lb.stats()
                .note_connection_failure(&Server::new(format!("w{i}"), 100 + i as u16, Some("us-west".to_owned())))
                .await;
        }

        for _ in 0..20 {
            let chosen = lb.choose_server(None).await.unwrap();
            assert_eq!(chosen.zone.as_deref(), Some("us-east"));
        }
    }
}
