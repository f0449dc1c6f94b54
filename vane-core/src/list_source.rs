//! Raw endpoint sources (spec.md §4 C5). Out of scope as a subsystem —
//! only the contract is defined here, plus one trivial concrete
//! implementation for tests and the demo driver.

use async_trait::async_trait;

use crate::error::ConfigError;
use crate::server::Server;

/// External collaborator that yields raw server lists, e.g. backed by a
/// service discovery system. `vane-core` only consumes its contract.
#[async_trait]
pub trait ServerListSource: Send + Sync {
    async fn get_server_list(&self) -> anyhow::Result<Vec<Server>>;
}

/// A [`ServerListSource`] backed by a fixed, pre-parsed list — the
/// `ListOfServers` configuration key of spec.md §6 taken literally,
/// with no further discovery behind it.
pub struct StaticServerListSource {
    servers: Vec<(String, u16, Option<String>)>,
}

impl StaticServerListSource {
    pub fn new(servers: Vec<(String, u16, Option<String>)>) -> Self {
        Self { servers }
    }

    /// Builds a source from the comma-separated `ListOfServers` value.
    pub fn from_config(raw: &str, zone: Option<&str>) -> Result<Self, ConfigError> {
        let parsed = Server::parse_list(raw, zone)?;
        let servers = parsed
            .into_iter()
            .map(|s| (s.host, s.port, s.zone))
            .collect();
        Ok(Self { servers })
    }
}

#[async_trait]
impl ServerListSource for StaticServerListSource {
    async fn get_server_list(&self) -> anyhow::Result<Vec<Server>> {
        Ok(self
            .servers
            .iter()
            .map(|(host, port, zone)| Server::new(host.clone(), *port, zone.clone()))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn static_source_yields_parsed_servers() {
        let source = StaticServerListSource::from_config("a:1,b:2", Some("z1")).unwrap();
        let servers = source.get_server_list().await.unwrap();
        assert_eq!(servers.len(), 2);
        assert_eq!(servers[0].zone.as_deref(), Some("z1"));
    }
}
