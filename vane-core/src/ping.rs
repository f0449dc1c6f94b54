//! Reachability probing (spec.md §4 C4). External collaborator — only
//! the contract is defined here; `vane-core` just calls it on a
//! schedule and folds the result into [`crate::server::Server::set_alive`].

use std::sync::Arc;

use async_trait::async_trait;

use crate::server::Server;

/// External collaborator that determines liveness of a single server.
#[async_trait]
pub trait Pinger: Send + Sync {
    async fn is_alive(&self, server: &Arc<Server>) -> bool;
}

/// A [`Pinger`] that always reports alive, useful when no external
/// reachability prober is wired up (falls back to
/// `ready_to_serve`-only liveness).
pub struct AlwaysAlivePinger;

#[async_trait]
impl Pinger for AlwaysAlivePinger {
    async fn is_alive(&self, _server: &Arc<Server>) -> bool {
        true
    }
}
