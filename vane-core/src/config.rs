//! Configuration (spec.md §6).
//!
//! As in the teacher's `RuntimeConfigProvider`, configuration that can
//! change at runtime is proxied behind a provider rather than read
//! directly, so a reload can be observed by waiters without redistributing
//! a new struct by hand.

use serde::{Deserialize, Serialize};
use tokio::sync::{Notify, RwLock, RwLockReadGuard};

use crate::error::ConfigError;

/// Which [`crate::rule::Rule`] a [`crate::load_balancer::LoadBalancer`]
/// should be built with (`NFLoadBalancerRuleClassName`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuleKind {
    RoundRobin,
    Random,
    WeightedResponseTime,
    BestAvailable,
    AvailabilityFiltering,
    ZoneAvoidance,
}

impl std::str::FromStr for RuleKind {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "round_robin" | "RoundRobinRule" => Self::RoundRobin,
            "random" | "RandomRule" => Self::Random,
            "weighted_response_time" | "WeightedResponseTimeRule" => Self::WeightedResponseTime,
            "best_available" | "BestAvailableRule" => Self::BestAvailable,
            "availability_filtering" | "AvailabilityFilteringRule" => Self::AvailabilityFiltering,
            "zone_avoidance" | "ZoneAvoidanceRule" => Self::ZoneAvoidance,
            other => return Err(ConfigError::UnknownRule(other.to_owned())),
        })
    }
}

/// Which [`crate::filter::ServerListFilter`] to apply on refresh.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FilterKind {
    None,
    ZoneAffinity,
    Subset,
}

/// `zoneAffinity.*` guard thresholds (spec.md §4.8, §6).
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ZoneAffinityConfig {
    #[serde(default)]
    pub enable_zone_affinity: bool,
    #[serde(default)]
    pub enable_zone_exclusivity: bool,
    #[serde(default = "defaults::max_load_per_server")]
    pub max_load_per_server: f64,
    #[serde(default = "defaults::max_black_out_server_percentage")]
    pub max_black_out_serves_r_percentage: f64,
    #[serde(default = "defaults::min_available_servers")]
    pub min_available_servers: usize,
}

impl Default for ZoneAffinityConfig {
    fn default() -> Self {
        Self {
            enable_zone_affinity: false,
            enable_zone_exclusivity: false,
            max_load_per_server: defaults::max_load_per_server(),
            max_black_out_serves_r_percentage: defaults::max_black_out_server_percentage(),
            min_available_servers: defaults::min_available_servers(),
        }
    }
}

/// `ServerListSubsetFilter.*` (spec.md §4.8, §6).
///
/// Field names preserve the source configuration's misspellings
/// (`*Thresold`) verbatim, per spec.md §9's open-questions note.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct SubsetFilterConfig {
    #[serde(default = "defaults::subset_size")]
    pub size: usize,
    #[serde(default = "defaults::force_eliminate_percent")]
    pub force_eliminate_percent: f64,
    #[serde(default)]
    pub elimination_connection_thresold: usize,
    #[serde(default)]
    pub elimination_failure_thresold: usize,
}

impl Default for SubsetFilterConfig {
    fn default() -> Self {
        Self {
            size: defaults::subset_size(),
            force_eliminate_percent: defaults::force_eliminate_percent(),
            elimination_connection_thresold: 0,
            elimination_failure_thresold: 0,
        }
    }
}

/// `ZoneAwareNIWSDiscoveryLoadBalancer.<name>.*` (spec.md §4.5, §6).
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ZoneAvoidanceConfig {
    #[serde(default = "defaults::triggering_load")]
    pub triggering_load_per_server_threshold: f64,
    #[serde(default = "defaults::triggering_blackout")]
    pub avoid_zone_with_blackout_percetage: f64,
}

impl Default for ZoneAvoidanceConfig {
    fn default() -> Self {
        Self {
            triggering_load_per_server_threshold: defaults::triggering_load(),
            avoid_zone_with_blackout_percetage: defaults::triggering_blackout(),
        }
    }
}

/// `niws.loadbalancer.availabilityFilteringRule.*` (spec.md §4.3, §4.4, §6).
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct AvailabilityConfig {
    #[serde(default = "defaults::active_connections_limit")]
    pub active_connections_limit: usize,
    #[serde(default = "defaults::filter_circuit_tripped")]
    pub filter_circuit_tripped: bool,
}

impl Default for AvailabilityConfig {
    fn default() -> Self {
        Self {
            active_connections_limit: defaults::active_connections_limit(),
            filter_circuit_tripped: defaults::filter_circuit_tripped(),
        }
    }
}

/// Circuit-breaker math tunables (spec.md §3). Not assigned a
/// configuration key by spec.md's §6 table; kept here as the
/// natural home for the blackout-duration formula's constants, per
/// SPEC_FULL.md's "open questions" resolution.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct CircuitBreakerConfig {
    #[serde(default = "defaults::failure_threshold")]
    pub failure_threshold: u32,
    #[serde(default = "defaults::base_blackout_ms")]
    pub base_blackout_ms: u64,
    #[serde(default = "defaults::max_blackout_ms")]
    pub max_blackout_ms: u64,
    #[serde(default = "defaults::active_requests_count_timeout_ms")]
    pub active_requests_count_timeout_ms: u64,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: defaults::failure_threshold(),
            base_blackout_ms: defaults::base_blackout_ms(),
            max_blackout_ms: defaults::max_blackout_ms(),
            active_requests_count_timeout_ms: defaults::active_requests_count_timeout_ms(),
        }
    }
}

/// Top-level tunables for one load balancer instance
/// (namespaced `<clientName>.<nameSpace>.*` in spec.md §6; here just
/// fields of one value passed to constructors, per the Design Notes'
/// "Global mutable state" guidance).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoadBalancerConfig {
    /// `ListOfServers`.
    #[serde(default)]
    pub list_of_servers: Option<String>,
    /// `NFLoadBalancerRuleClassName`.
    #[serde(default = "defaults::rule")]
    pub rule: RuleKind,
    /// Whether the chosen rule is wrapped in a `RetryRule`.
    #[serde(default)]
    pub enable_retry: bool,
    /// `RetryRule`'s wall-clock deadline, in milliseconds.
    #[serde(default = "defaults::retry_max_millis")]
    pub retry_max_millis: u64,
    /// Which [`FilterKind`] narrows the raw list on refresh.
    #[serde(default)]
    pub filter: FilterKind,
    /// `ServerListRefreshIntervalMs`.
    #[serde(default = "defaults::server_list_refresh_interval_ms")]
    pub server_list_refresh_interval_ms: u64,
    /// `NFLoadBalancerPingInterval`, in milliseconds (spec default is 30s).
    #[serde(default = "defaults::ping_interval_ms")]
    pub ping_interval_ms: u64,
    /// `EnableZoneAffinity` / `EnableZoneExclusivity` and friends.
    #[serde(default)]
    pub zone_affinity: ZoneAffinityConfig,
    #[serde(default)]
    pub subset_filter: SubsetFilterConfig,
    #[serde(default)]
    pub zone_avoidance: ZoneAvoidanceConfig,
    #[serde(default)]
    pub availability: AvailabilityConfig,
    #[serde(default)]
    pub circuit_breaker: CircuitBreakerConfig,
    /// Expiry duration (ms) after which a server no longer in the list
    /// has its [`crate::stats::ServerStats`] entry evicted.
    #[serde(default = "defaults::stats_expiry_ms")]
    pub stats_expiry_ms: u64,
}

impl Default for LoadBalancerConfig {
    fn default() -> Self {
        Self {
            list_of_servers: None,
            rule: defaults::rule(),
            enable_retry: false,
            retry_max_millis: defaults::retry_max_millis(),
            filter: FilterKind::None,
            server_list_refresh_interval_ms: defaults::server_list_refresh_interval_ms(),
            ping_interval_ms: defaults::ping_interval_ms(),
            zone_affinity: ZoneAffinityConfig::default(),
            subset_filter: SubsetFilterConfig::default(),
            zone_avoidance: ZoneAvoidanceConfig::default(),
            availability: AvailabilityConfig::default(),
            circuit_breaker: CircuitBreakerConfig::default(),
            stats_expiry_ms: defaults::stats_expiry_ms(),
        }
    }
}

impl Default for FilterKind {
    fn default() -> Self {
        Self::None
    }
}

mod defaults {
    pub fn rule() -> super::RuleKind {
        super::RuleKind::RoundRobin
    }
    pub fn retry_max_millis() -> u64 {
        500
    }
    pub fn server_list_refresh_interval_ms() -> u64 {
        30_000
    }
    pub fn ping_interval_ms() -> u64 {
        30_000
    }
    pub fn max_load_per_server() -> f64 {
        0.6
    }
    pub fn max_black_out_server_percentage() -> f64 {
        0.8
    }
    pub fn min_available_servers() -> usize {
        2
    }
    pub fn subset_size() -> usize {
        20
    }
    pub fn force_eliminate_percent() -> f64 {
        0.1
    }
    pub fn triggering_load() -> f64 {
        0.2
    }
    pub fn triggering_blackout() -> f64 {
        0.99999
    }
    pub fn active_connections_limit() -> usize {
        usize::MAX
    }
    pub fn filter_circuit_tripped() -> bool {
        true
    }
    pub fn failure_threshold() -> u32 {
        3
    }
    pub fn base_blackout_ms() -> u64 {
        1_000
    }
    pub fn max_blackout_ms() -> u64 {
        30_000
    }
    pub fn active_requests_count_timeout_ms() -> u64 {
        60_000
    }
    pub fn stats_expiry_ms() -> u64 {
        30 * 60_000
    }
}

/// As [`LoadBalancerConfig`] may be updated by reloads, it is proxied
/// behind this provider, mirroring `trakt_core::config::RuntimeConfigProvider`.
pub struct ConfigProvider {
    config: RwLock<LoadBalancerConfig>,
    reload_notify: Notify,
}

impl ConfigProvider {
    pub fn new(initial_config: LoadBalancerConfig) -> Self {
        Self {
            config: RwLock::new(initial_config),
            reload_notify: Notify::new(),
        }
    }

    #[inline]
    pub async fn read(&self) -> RwLockReadGuard<'_, LoadBalancerConfig> {
        self.config.read().await
    }

    #[inline]
    pub async fn wait_reload(&self) {
        self.reload_notify.notified().await;
    }

    /// Reloads the configuration, waking any task waiting in [`Self::wait_reload`].
    pub async fn reload(&self, config: LoadBalancerConfig) {
        let mut w = self.config.write().await;
        *w = config;
        drop(w);
        self.reload_notify.notify_waiters();
    }
}

impl Default for ConfigProvider {
    fn default() -> Self {
        Self::new(LoadBalancerConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rule_kind_parses_known_aliases() {
        assert_eq!("round_robin".parse::<RuleKind>().unwrap(), RuleKind::RoundRobin);
        assert_eq!(
            "ZoneAvoidanceRule".parse::<RuleKind>().unwrap(),
            RuleKind::ZoneAvoidance
        );
        assert!("nonsense".parse::<RuleKind>().is_err());
    }

    #[tokio::test]
    async fn provider_wakes_reload_waiters() {
        let provider = ConfigProvider::default();
        let waiter = async { provider.wait_reload().await };
        let reload = async {
            tokio::task::yield_now().await;
            provider
                .reload(LoadBalancerConfig {
                    enable_retry: true,
                    ..Default::default()
                })
                .await;
        };
        tokio::join!(waiter, reload);
        assert!(provider.read().await.enable_retry);
    }
}
