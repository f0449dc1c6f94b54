//! Client-side load balancing: a [`LoadBalancer`](load_balancer::LoadBalancer)
//! state machine, pluggable selection [`Rule`](rules::Rule)s and
//! [`Predicate`](predicate::Predicate)s, and a zone-avoidance algorithm
//! for routing traffic away from unhealthy availability zones.
//!
//! The pieces compose roughly as:
//! - [`server`] / [`stats`] — identity and per-endpoint counters.
//! - [`load_balancer`] / [`zone_aware`] — the state machine.
//! - [`rules`] / [`predicate`] / [`zone_avoidance`] — selection policy.
//! - [`filter`] / [`list_source`] / [`ping`] / [`scheduler`] — list
//!   maintenance.
//! - [`config`] / [`error`] — construction-time configuration and faults.

pub mod builder;
pub mod config;
pub mod error;
pub mod filter;
pub mod list_source;
pub mod load_balancer;
pub mod ping;
pub mod predicate;
pub mod rules;
pub mod scheduler;
pub mod server;
pub mod stats;
mod util;
pub mod zone_avoidance;
pub mod zone_aware;

pub use config::{ConfigProvider, LoadBalancerConfig};
pub use error::ConfigError;
pub use load_balancer::{ILoadBalancer, LoadBalancer, LoadBalancerView};
pub use server::Server;
pub use zone_aware::ZoneAwareLoadBalancer;
