//! Periodic server-list refresh and reachability pinging (spec.md §4 C2/C4,
//! §5 "Lifecycle"). Mirrors the teacher's `Scheduler<S>`: a
//! semaphore-guarded idempotent start/stop/restart around a
//! `tokio::select!` loop over two independent intervals.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{Notify, Semaphore};

use crate::config::ConfigProvider;
use crate::filter::ServerListFilter;
use crate::list_source::ServerListSource;
use crate::ping::Pinger;

/// What the scheduler drives: a list refresh and a ping pass. Implemented
/// by both [`crate::load_balancer::LoadBalancer`] and
/// [`crate::zone_aware::ZoneAwareLoadBalancer`].
#[async_trait]
pub trait Refreshable: Send + Sync {
    async fn refresh_from_source(&self, source: &dyn ServerListSource, filter: Option<&dyn ServerListFilter>);
    async fn ping_once(&self, pinger: &dyn Pinger);
}

#[async_trait]
impl Refreshable for crate::load_balancer::LoadBalancer {
    async fn refresh_from_source(&self, source: &dyn ServerListSource, filter: Option<&dyn ServerListFilter>) {
        crate::load_balancer::LoadBalancer::refresh_from_source(self, source, filter).await;
    }

    async fn ping_once(&self, pinger: &dyn Pinger) {
        crate::load_balancer::LoadBalancer::ping_once(self, pinger).await;
    }
}

#[async_trait]
impl Refreshable for crate::zone_aware::ZoneAwareLoadBalancer {
    async fn refresh_from_source(&self, source: &dyn ServerListSource, filter: Option<&dyn ServerListFilter>) {
        crate::zone_aware::ZoneAwareLoadBalancer::refresh_from_source(self, source, filter).await;
    }

    async fn ping_once(&self, pinger: &dyn Pinger) {
        crate::zone_aware::ZoneAwareLoadBalancer::ping_once(self, pinger).await;
    }
}

/// Drives `refresh_from_source`/`ping_once` on `T` at the intervals named
/// by a [`ConfigProvider`]. `start`/`stop`/`restart` are idempotent
/// (spec.md §5 "Lifecycle": "required to be idempotent").
pub struct Scheduler<T>(Arc<Internals<T>>);

struct Internals<T> {
    lock: Semaphore,
    stop_notify: Notify,
    config_provider: Arc<ConfigProvider>,
    target: Arc<T>,
    source: Arc<dyn ServerListSource>,
    filter: Option<Arc<dyn ServerListFilter>>,
    pinger: Arc<dyn Pinger>,
}

impl<T: Refreshable + 'static> Scheduler<T> {
    pub fn new(
        config_provider: Arc<ConfigProvider>,
        target: Arc<T>,
        source: Arc<dyn ServerListSource>,
        filter: Option<Arc<dyn ServerListFilter>>,
        pinger: Arc<dyn Pinger>,
    ) -> Self {
        Self(Arc::new(Internals {
            lock: Semaphore::new(1),
            stop_notify: Notify::new(),
            config_provider,
            target,
            source,
            filter,
            pinger,
        }))
    }

    pub fn is_running(&self) -> bool {
        self.0.lock.available_permits() == 0
    }

    /// Spawns the background loop. A no-op if already running.
    pub fn start(&self) {
        if self.is_running() {
            return;
        }
        let inner = self.0.clone();
        tokio::spawn(async move {
            let _permit = inner.lock.acquire().await;
            inner.run().await;
        });
    }

    /// Halts the loop. `wait` blocks until the current iteration (if any)
    /// finishes; in-flight `choose` calls on `target` are unaffected.
    pub async fn stop(&self, wait: bool) {
        if !self.is_running() {
            return;
        }
        self.0.stop_notify.notify_one();
        if wait {
            let _ = self.0.lock.acquire().await;
        }
    }

    /// Stops then starts, so a config reload's new intervals take effect.
    pub async fn restart(&self) {
        self.stop(true).await;
        self.start();
    }
}

impl<T: Refreshable + 'static> Internals<T> {
    async fn run(&self) {
        'outer: loop {
            let (refresh_rate, ping_rate) = {
                let config = self.config_provider.read().await;
                (
                    Duration::from_millis(config.server_list_refresh_interval_ms.max(1)),
                    Duration::from_millis(config.ping_interval_ms.max(1)),
                )
            };
            let mut refresh_interval = tokio::time::interval(refresh_rate);
            let mut ping_interval = tokio::time::interval(ping_rate);
            // First tick fires immediately; skip it so start() doesn't
            // double-refresh against whatever initial list the caller set.
            refresh_interval.tick().await;
            ping_interval.tick().await;

            loop {
                tokio::select! {
                    _ = self.stop_notify.notified() => return,
                    _ = self.config_provider.wait_reload() => continue 'outer,
                    _ = refresh_interval.tick() => {
                        self.target.refresh_from_source(&*self.source, self.filter.as_deref()).await;
                    }
                    _ = ping_interval.tick() => {
                        self.target.ping_once(&*self.pinger).await;
                    }
                }
            }
        }
    }
}
