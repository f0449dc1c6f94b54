use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;

use crate::load_balancer::LoadBalancerView;
use crate::server::Server;

use super::Rule;

/// Wraps another rule, retrying `choose` until it yields a server or a
/// wall-clock deadline elapses (spec.md §4.3 `RetryRule`).
pub struct RetryRule {
    inner: Box<dyn Rule>,
    max_millis: u64,
}

impl RetryRule {
    pub fn new(inner: Box<dyn Rule>, max_millis: u64) -> Self {
        Self { inner, max_millis }
    }
}

#[async_trait]
impl Rule for RetryRule {
    async fn choose(&self, lb: &dyn LoadBalancerView, key: Option<&str>) -> Option<Arc<Server>> {
        let deadline = Instant::now() + Duration::from_millis(self.max_millis);
        loop {
            if let Some(server) = self.inner.choose(lb, key).await {
                return Some(server);
            }
            if Instant::now() >= deadline {
                return None;
            }
            tokio::task::yield_now().await;
        }
    }
}
