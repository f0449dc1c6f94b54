//! Selection strategies (spec.md §4.3).
//!
//! Each concrete rule is a value implementing [`Rule`]; composition
//! (`RetryRule` wrapping a sub-rule, `ZoneAvoidanceRule` embedding a
//! `CompositePredicate`) replaces the source's tall class hierarchy, per
//! the Design Notes of spec.md §9.

mod availability_filtering;
mod best_available;
mod client_config_enabled_round_robin;
mod predicate_based;
mod random;
mod retry;
mod round_robin;
mod weighted_response_time;

pub use availability_filtering::AvailabilityFilteringRule;
pub use best_available::BestAvailableRule;
pub use client_config_enabled_round_robin::ClientConfigEnabledRoundRobinRule;
pub use predicate_based::{PredicateBasedRule, ZoneAvoidanceRule};
pub use random::RandomRule;
pub use retry::RetryRule;
pub use round_robin::RoundRobinRule;
pub use weighted_response_time::WeightedResponseTimeRule;

use std::sync::Arc;

use async_trait::async_trait;

use crate::load_balancer::LoadBalancerView;
use crate::server::Server;

/// A strategy that picks one server per request.
///
/// Takes the load balancer as a parameter rather than holding a
/// back-reference to it, breaking the cyclic reference the source
/// expresses via a field (spec.md §9 "Cyclic references").
#[async_trait]
pub trait Rule: Send + Sync {
    async fn choose(&self, lb: &dyn LoadBalancerView, key: Option<&str>) -> Option<Arc<Server>>;
}

/// Internal liveness re-check attempts before giving up (spec.md §4.3:
/// "retry up to 10 times").
pub(crate) const LIVENESS_RETRY_ATTEMPTS: usize = 10;

/// Retries picking a live server up to `attempts` times against a local
/// snapshot of `up_servers`, the liveness-retry loop shared by
/// [`RoundRobinRule`] and [`RandomRule`] (spec.md §4.3).
pub(crate) async fn retry_live<F>(up_servers: &[Arc<Server>], attempts: usize, mut pick: F) -> Option<Arc<Server>>
where
    F: FnMut(usize) -> usize,
{
    if up_servers.is_empty() {
        return None;
    }
    for _ in 0..attempts {
        let idx = pick(up_servers.len());
        if let Some(server) = up_servers.get(idx) {
            if server.is_up() {
                return Some(server.clone());
            }
        }
    }
    None
}
