//! Builds a `Rule`/`ServerListFilter` from a [`LoadBalancerConfig`],
//! translating `NFLoadBalancerRuleClassName`-style selection (spec.md §6)
//! into the concrete value the rest of the crate works with.

use crate::config::{FilterKind, LoadBalancerConfig, RuleKind};
use crate::filter::{ServerListFilter, ServerListSubsetFilter, ZoneAffinityServerListFilter};
use crate::rules::{
    AvailabilityFilteringRule, BestAvailableRule, RandomRule, Rule, RoundRobinRule, WeightedResponseTimeRule,
    ZoneAvoidanceRule,
};

/// Builds the `Rule` named by `cfg.rule`, wrapped in a `RetryRule` if
/// `cfg.enable_retry` is set (spec.md §4.3 `RetryRule`).
pub fn build_rule(cfg: &LoadBalancerConfig) -> Box<dyn Rule> {
    let base: Box<dyn Rule> = match cfg.rule {
        RuleKind::RoundRobin => Box::new(RoundRobinRule::new()),
        RuleKind::Random => Box::new(RandomRule::new()),
        RuleKind::WeightedResponseTime => Box::new(WeightedResponseTimeRule::new()),
        RuleKind::BestAvailable => Box::new(BestAvailableRule::new()),
        RuleKind::AvailabilityFiltering => Box::new(AvailabilityFilteringRule::new(cfg.availability)),
        RuleKind::ZoneAvoidance => Box::new(ZoneAvoidanceRule::new(cfg.zone_avoidance, cfg.availability)),
    };
    if cfg.enable_retry {
        Box::new(crate::rules::RetryRule::new(base, cfg.retry_max_millis))
    } else {
        base
    }
}

/// Builds the `ServerListFilter` named by `cfg.filter`, or `None` for
/// [`FilterKind::None`].
pub fn build_filter(cfg: &LoadBalancerConfig, my_zone: Option<String>) -> Option<Box<dyn ServerListFilter>> {
    match cfg.filter {
        FilterKind::None => None,
        FilterKind::ZoneAffinity => Some(Box::new(ZoneAffinityServerListFilter::new(my_zone, cfg.zone_affinity))),
        FilterKind::Subset => Some(Box::new(ServerListSubsetFilter::new(cfg.subset_filter))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zone_avoidance_config_builds_without_panicking() {
        let cfg = LoadBalancerConfig {
            rule: RuleKind::ZoneAvoidance,
            enable_retry: true,
            ..Default::default()
        };
        let _rule = build_rule(&cfg);
    }

    #[test]
    fn filter_none_yields_no_filter() {
        let cfg = LoadBalancerConfig::default();
        assert!(build_filter(&cfg, None).is_none());
    }
}
