//! Per-endpoint statistics and zone aggregation (spec.md §3, §4.2).

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicI64, AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use tokio::sync::RwLock;

use crate::config::CircuitBreakerConfig;
use crate::server::Server;

const RESPONSE_TIME_RESERVOIR_CAPACITY: usize = 1000;

/// Running mean/percentile stats over a bounded sample reservoir.
///
/// A simple ring buffer rather than a decaying histogram: recent samples
/// overwrite the oldest once the reservoir is full, which is sufficient
/// for the weighted-response-time rule's recompute cadence (spec.md §4.3).
#[derive(Debug, Default)]
pub struct ResponseTimeDistribution {
    samples: Vec<f64>,
    next: usize,
}

impl ResponseTimeDistribution {
    pub fn record(&mut self, millis: f64) {
        if self.samples.len() < RESPONSE_TIME_RESERVOIR_CAPACITY {
            self.samples.push(millis);
        } else {
            self.samples[self.next] = millis;
            self.next = (self.next + 1) % RESPONSE_TIME_RESERVOIR_CAPACITY;
        }
    }

    pub fn mean(&self) -> f64 {
        if self.samples.is_empty() {
            return 0.0;
        }
        self.samples.iter().sum::<f64>() / self.samples.len() as f64
    }

    /// `p` in `[0.0, 1.0]`.
    pub fn percentile(&self, p: f64) -> f64 {
        if self.samples.is_empty() {
            return 0.0;
        }
        let mut sorted = self.samples.clone();
        sorted.sort_by(|a, b| a.partial_cmp(b).unwrap());
        let rank = ((p.clamp(0.0, 1.0)) * (sorted.len() - 1) as f64).round() as usize;
        sorted[rank]
    }

    pub fn sample_count(&self) -> usize {
        self.samples.len()
    }
}

/// Per-server rolling counters and circuit-breaker state (spec.md §3).
///
/// Counters are individually atomic; the response-time reservoir and the
/// two timestamps sit behind a short-lived `std::sync::Mutex` that is
/// never held across an `.await`, matching the "individually atomic (or
/// protected by a per-server lock)" discipline of spec.md §5.
#[derive(Debug)]
pub struct ServerStats {
    active_requests_count: AtomicI64,
    total_requests: AtomicU64,
    successive_connection_failure_count: AtomicU32,
    total_circuit_breaker_black_out_period_ms: AtomicU64,
    last_connection_failed_at: Mutex<Option<Instant>>,
    last_active_requests_count_change_at: Mutex<Instant>,
    response_time: Mutex<ResponseTimeDistribution>,
    cfg: CircuitBreakerConfig,
}

impl ServerStats {
    pub fn new(cfg: CircuitBreakerConfig) -> Self {
        Self {
            active_requests_count: AtomicI64::new(0),
            total_requests: AtomicU64::new(0),
            successive_connection_failure_count: AtomicU32::new(0),
            total_circuit_breaker_black_out_period_ms: AtomicU64::new(0),
            last_connection_failed_at: Mutex::new(None),
            last_active_requests_count_change_at: Mutex::new(Instant::now()),
            response_time: Mutex::new(ResponseTimeDistribution::default()),
            cfg,
        }
    }

    /// Increments the active-request counter (I1: never goes negative,
    /// this side only ever adds).
    pub fn note_request_start(&self) {
        self.active_requests_count.fetch_add(1, Ordering::Relaxed);
        self.total_requests.fetch_add(1, Ordering::Relaxed);
        self.touch_active_requests_timestamp();
    }

    /// Decrements the active-request counter and records response time.
    /// A decrement with no matching increment is a no-op (I3): the
    /// counter saturates at zero instead of going negative.
    pub fn note_request_end(&self, response_time_ms: f64, success: bool) {
        loop {
            let current = self.active_requests_count.load(Ordering::Relaxed);
            let next = if current > 0 { current - 1 } else { 0 };
            if self
                .active_requests_count
                .compare_exchange_weak(current, next, Ordering::Relaxed, Ordering::Relaxed)
                .is_ok()
            {
                break;
            }
        }
        self.touch_active_requests_timestamp();
        self.response_time.lock().unwrap().record(response_time_ms);
        if success {
            self.successive_connection_failure_count
                .store(0, Ordering::Relaxed);
        }
    }

    /// Records a connection failure, possibly tripping the breaker.
    pub fn note_connection_failure(&self) {
        let successive = self
            .successive_connection_failure_count
            .fetch_add(1, Ordering::Relaxed)
            + 1;
        *self.last_connection_failed_at.lock().unwrap() = Some(Instant::now());
        if successive >= self.cfg.failure_threshold {
            let blackout = self.blackout_duration(successive);
            self.total_circuit_breaker_black_out_period_ms
                .fetch_add(blackout.as_millis() as u64, Ordering::Relaxed);
        }
    }

    fn touch_active_requests_timestamp(&self) {
        *self.last_active_requests_count_change_at.lock().unwrap() = Instant::now();
    }

    /// Active-request count, decayed to zero if not updated for
    /// `activeRequestsCountTimeout` (spec.md §3): protects against a
    /// counter stuck above zero when a completion was missed.
    pub fn active_requests_count(&self) -> i64 {
        let last_change = *self.last_active_requests_count_change_at.lock().unwrap();
        let timeout = Duration::from_millis(self.cfg.active_requests_count_timeout_ms);
        if last_change.elapsed() >= timeout {
            return 0;
        }
        self.active_requests_count.load(Ordering::Relaxed)
    }

    pub fn total_requests(&self) -> u64 {
        self.total_requests.load(Ordering::Relaxed)
    }

    pub fn successive_connection_failure_count(&self) -> u32 {
        self.successive_connection_failure_count.load(Ordering::Relaxed)
    }

    pub fn total_circuit_breaker_black_out_period_ms(&self) -> u64 {
        self.total_circuit_breaker_black_out_period_ms
            .load(Ordering::Relaxed)
    }

    /// `blackoutDuration = min(maxBlackout, base * 2^(successiveFailures - failureThreshold))`.
    fn blackout_duration(&self, successive: u32) -> Duration {
        let exponent = successive.saturating_sub(self.cfg.failure_threshold).min(32);
        let multiplier = 1u64.checked_shl(exponent).unwrap_or(u64::MAX);
        let raw = self.cfg.base_blackout_ms.saturating_mul(multiplier);
        Duration::from_millis(raw.min(self.cfg.max_blackout_ms))
    }

    /// `(now - lastConnectionFailedTimestamp) < blackoutDuration`, active only
    /// when `successiveFailures >= failureThreshold` (I2).
    pub fn is_circuit_breaker_tripped(&self) -> bool {
        let successive = self.successive_connection_failure_count.load(Ordering::Relaxed);
        if successive < self.cfg.failure_threshold {
            return false;
        }
        let last_failed = match *self.last_connection_failed_at.lock().unwrap() {
            Some(t) => t,
            None => return false,
        };
        last_failed.elapsed() < self.blackout_duration(successive)
    }

    pub fn response_time_mean(&self) -> f64 {
        self.response_time.lock().unwrap().mean()
    }

    pub fn response_time_percentile(&self, p: f64) -> f64 {
        self.response_time.lock().unwrap().percentile(p)
    }
}

/// Point-in-time aggregate of per-zone statistics (spec.md §3).
#[derive(Debug, Clone, Copy, Default)]
pub struct ZoneSnapshot {
    pub instance_count: usize,
    pub active_requests_count: i64,
    pub circuit_tripped_count: usize,
    pub load_per_server: f64,
}

impl ZoneSnapshot {
    fn from_counts(instance_count: usize, active_requests_count: i64, circuit_tripped_count: usize) -> Self {
        let available = instance_count.saturating_sub(circuit_tripped_count).max(1);
        Self {
            instance_count,
            active_requests_count,
            circuit_tripped_count,
            load_per_server: active_requests_count as f64 / available as f64,
        }
    }
}

struct Entry {
    stats: Arc<ServerStats>,
    zone: Option<String>,
    last_seen: Instant,
}

/// Registry of [`ServerStats`] and aggregator that produces [`ZoneSnapshot`]s
/// (spec.md §3, §4.2). One instance per [`crate::load_balancer::LoadBalancer`].
pub struct LoadBalancerStats {
    entries: RwLock<HashMap<String, Entry>>,
    circuit_breaker_cfg: CircuitBreakerConfig,
}

impl LoadBalancerStats {
    pub fn new(circuit_breaker_cfg: CircuitBreakerConfig) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            circuit_breaker_cfg,
        }
    }

    async fn get_or_create(&self, server: &Server) -> Arc<ServerStats> {
        {
            let entries = self.entries.read().await;
            if let Some(entry) = entries.get(server.id()) {
                return entry.stats.clone();
            }
        }
        let mut entries = self.entries.write().await;
        let entry = entries.entry(server.id().to_owned()).or_insert_with(|| Entry {
            stats: Arc::new(ServerStats::new(self.circuit_breaker_cfg)),
            zone: server.zone.clone(),
            last_seen: Instant::now(),
        });
        entry.zone = server.zone.clone();
        entry.last_seen = Instant::now();
        entry.stats.clone()
    }

    pub async fn note_request_start(&self, server: &Server) {
        self.get_or_create(server).await.note_request_start();
    }

    pub async fn note_request_end(&self, server: &Server, response_time_ms: f64, success: bool) {
        self.get_or_create(server)
            .await
            .note_request_end(response_time_ms, success);
    }

    pub async fn note_connection_failure(&self, server: &Server) {
        self.get_or_create(server).await.note_connection_failure();
    }

    pub async fn get_single_server_stat(&self, server: &Server) -> Arc<ServerStats> {
        self.get_or_create(server).await
    }

    /// Re-registers the zone and `last_seen` timestamp for every server
    /// currently in the list. Called by the `LoadBalancer` on refresh so
    /// zone snapshots reflect the live topology even for servers that
    /// have not yet had traffic routed to them.
    pub async fn sync_servers(&self, servers: &[Arc<Server>]) {
        for server in servers {
            self.get_or_create(server).await;
        }
    }

    /// Lazily evicts stats entries for servers that have been absent
    /// from the list for longer than `expiry` (spec.md §3 lifecycle,
    /// §7 `StaleStats`).
    pub async fn evict_expired(&self, active_ids: &HashSet<String>, expiry: Duration) {
        let mut entries = self.entries.write().await;
        entries.retain(|id, entry| {
            active_ids.contains(id) || entry.last_seen.elapsed() < expiry
        });
    }

    /// Aggregate over all servers currently attributed to `zone`.
    pub async fn get_zone_snapshot(&self, zone: &str) -> ZoneSnapshot {
        let entries = self.entries.read().await;
        let mut instance_count = 0;
        let mut active_requests_count = 0i64;
        let mut circuit_tripped_count = 0;
        for entry in entries.values() {
            if entry.zone.as_deref() != Some(zone) {
                continue;
            }
            instance_count += 1;
            active_requests_count += entry.stats.active_requests_count();
            if entry.stats.is_circuit_breaker_tripped() {
                circuit_tripped_count += 1;
            }
        }
        ZoneSnapshot::from_counts(instance_count, active_requests_count, circuit_tripped_count)
    }

    /// Aggregate over an explicit subset of servers, regardless of zone
    /// (the `getZoneSnapshot(subsetServers)` overload of spec.md §4.2).
    pub async fn get_zone_snapshot_for(&self, servers: &[Arc<Server>]) -> ZoneSnapshot {
        let mut instance_count = 0;
        let mut active_requests_count = 0i64;
        let mut circuit_tripped_count = 0;
        for server in servers {
            let stats = self.get_or_create(server).await;
            instance_count += 1;
            active_requests_count += stats.active_requests_count();
            if stats.is_circuit_breaker_tripped() {
                circuit_tripped_count += 1;
            }
        }
        ZoneSnapshot::from_counts(instance_count, active_requests_count, circuit_tripped_count)
    }

    /// All distinct non-empty zones currently tracked.
    pub async fn get_available_zones(&self) -> Vec<String> {
        let entries = self.entries.read().await;
        let mut zones: Vec<String> = entries
            .values()
            .filter_map(|entry| entry.zone.clone())
            .collect::<HashSet<_>>()
            .into_iter()
            .collect();
        zones.sort();
        zones
    }

    /// Snapshot map `zone -> ZoneSnapshot` for every known zone, the
    /// direct input to the zone-avoidance algorithm (spec.md §4.5).
    pub async fn get_zone_snapshots(&self) -> HashMap<String, ZoneSnapshot> {
        let zones = self.get_available_zones().await;
        let mut out = HashMap::with_capacity(zones.len());
        for zone in zones {
            let snapshot = self.get_zone_snapshot(&zone).await;
            out.insert(zone, snapshot);
        }
        out
    }
}
