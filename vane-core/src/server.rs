use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};

/// Identity of a candidate endpoint a [`crate::load_balancer::LoadBalancer`]
/// can route requests to.
///
/// Identity (`host`, `port`, `zone`) is fixed at construction. The two
/// liveness flags are the only mutable parts and are updated out of band
/// by [`crate::ping::Pinger`] and [`crate::load_balancer::LoadBalancer::mark_server_down`].
#[derive(Debug)]
pub struct Server {
    /// Hostname or IP address.
    pub host: String,
    /// Port.
    pub port: u16,
    /// Topological zone, if known.
    pub zone: Option<String>,
    /// `host:port`, used for equality and as the stats registry key.
    id: String,

    /// Whether the server should be considered for new traffic at all.
    /// Distinct from `alive`: a server can be reachable but drained.
    ready_to_serve: AtomicBool,
    /// Cached liveness, as last reported by a ping cycle or
    /// [`crate::load_balancer::LoadBalancer::mark_server_down`].
    alive: AtomicBool,
}

impl Server {
    /// Builds a server from host/port, defaulting both flags to alive/ready.
    pub fn new(host: impl Into<String>, port: u16, zone: Option<String>) -> Self {
        let host = host.into();
        let id = format!("{host}:{port}");
        Self {
            host,
            port,
            zone,
            id,
            ready_to_serve: AtomicBool::new(true),
            alive: AtomicBool::new(true),
        }
    }

    /// Parses a single `host:port` token, as produced by splitting
    /// the `ListOfServers` configuration key (§6).
    ///
    /// Returns [`None`] for an empty token (skipped by the caller) and
    /// propagates a parse failure for a malformed one.
    pub fn parse(token: &str, zone: Option<String>) -> Result<Option<Self>, crate::error::ConfigError> {
        let token = token.trim();
        if token.is_empty() {
            return Ok(None);
        }
        let (host, port) = token.rsplit_once(':').ok_or_else(|| {
            crate::error::ConfigError::InvalidServerToken(token.to_owned())
        })?;
        let port: u16 = port
            .parse()
            .map_err(|_| crate::error::ConfigError::InvalidServerToken(token.to_owned()))?;
        if host.is_empty() {
            return Err(crate::error::ConfigError::InvalidServerToken(token.to_owned()));
        }
        Ok(Some(Self::new(host, port, zone)))
    }

    /// Parses the comma-separated `ListOfServers` configuration value.
    ///
    /// Empty tokens (consecutive commas, leading/trailing whitespace-only
    /// entries) are skipped, per spec.md §6.
    pub fn parse_list(
        raw: &str,
        zone: Option<&str>,
    ) -> Result<Vec<Self>, crate::error::ConfigError> {
        let mut servers = Vec::new();
        for token in raw.split(',') {
            if let Some(server) = Self::parse(token, zone.map(str::to_owned))? {
                servers.push(server);
            }
        }
        Ok(servers)
    }

    /// `host:port` identity, used as the stats registry key.
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn is_ready_to_serve(&self) -> bool {
        self.ready_to_serve.load(Ordering::Relaxed)
    }

    pub fn set_ready_to_serve(&self, ready: bool) {
        self.ready_to_serve.store(ready, Ordering::Relaxed);
    }

    pub fn is_alive(&self) -> bool {
        self.alive.load(Ordering::Relaxed)
    }

    pub fn set_alive(&self, alive: bool) {
        self.alive.store(alive, Ordering::Relaxed);
    }

    /// Whether the server currently passes liveness (the `upServers`
    /// membership test of spec.md §3).
    pub fn is_up(&self) -> bool {
        self.is_alive() && self.is_ready_to_serve()
    }
}

/// Equality is by id (I: `Server` identity, spec.md §3).
impl PartialEq for Server {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}
impl Eq for Server {}

impl std::hash::Hash for Server {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

impl fmt::Display for Server {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.id)
    }
}

impl Clone for Server {
    /// Clones identity and a snapshot of the current flag values.
    /// Useful for building filtered lists without re-wrapping in `Arc`.
    fn clone(&self) -> Self {
        Self {
            host: self.host.clone(),
            port: self.port,
            zone: self.zone.clone(),
            id: self.id.clone(),
            ready_to_serve: AtomicBool::new(self.is_ready_to_serve()),
            alive: AtomicBool::new(self.is_alive()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_host_port() {
        let server = Server::parse("10.0.0.1:8080", None).unwrap().unwrap();
        assert_eq!(server.host, "10.0.0.1");
        assert_eq!(server.port, 8080);
        assert_eq!(server.id(), "10.0.0.1:8080");
    }

    #[test]
    fn skips_empty_tokens() {
        let servers = Server::parse_list("a:1,,  ,b:2", None).unwrap();
        assert_eq!(servers.len(), 2);
        assert_eq!(servers[0].id(), "a:1");
        assert_eq!(servers[1].id(), "b:2");
    }

    #[test]
    fn rejects_malformed_token() {
        assert!(Server::parse("no-port-here", None).is_err());
        assert!(Server::parse(":1234", None).is_err());
        assert!(Server::parse("host:notaport", None).is_err());
    }

    #[test]
    fn equality_is_by_id() {
        let a = Server::new("h", 1, Some("z1".to_owned()));
        let b = Server::new("h", 1, Some("z2".to_owned()));
        assert_eq!(a, b);
    }
}
