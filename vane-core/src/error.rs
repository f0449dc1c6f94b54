//! Error taxonomy (spec.md §7).
//!
//! `NoEligibleServer` and `RuleInternalFault` are not represented as
//! error types: they are degrade-in-place outcomes of `choose()`
//! (a `None` return, possibly preceded by a `log::warn!`). Only
//! construction-time faults are `Result`-typed.

use thiserror::Error;

/// `ConfigurationFault` (spec.md §7): fatal at construction time.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid server token in server list: {0:?}")]
    InvalidServerToken(String),
    #[error("unknown load balancing rule: {0:?}")]
    UnknownRule(String),
    #[error("unknown server list filter: {0:?}")]
    UnknownFilter(String),
    #[error("tunable {name} out of range: {value} (expected {expected})")]
    OutOfRange {
        name: &'static str,
        value: String,
        expected: &'static str,
    },
}
