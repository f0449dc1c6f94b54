//! Zone-avoidance algorithm and weighted zone choice (spec.md §4.5, §4.6).

use std::collections::{HashMap, HashSet};

use rand::Rng;

use crate::stats::ZoneSnapshot;

/// Tunables for [`available_zones`].
#[derive(Debug, Clone, Copy)]
pub struct ZoneAvoidanceParams {
    pub triggering_load: f64,
    pub triggering_blackout_percentage: f64,
}

impl Default for ZoneAvoidanceParams {
    fn default() -> Self {
        Self {
            triggering_load: 0.2,
            triggering_blackout_percentage: 0.99999,
        }
    }
}

/// Computes the set of zones that should remain eligible for selection
/// (spec.md §4.5).
///
/// Zones with no instances, or whose blackout ratio/negative load mark
/// them unusable, are unconditionally dropped. Among the rest, at most
/// one "worst" zone (by `load_per_server`, ties broken by a weighted
/// random draw over instance count) is evicted, and only when the
/// overall load warrants it.
pub fn available_zones(
    snapshot: &HashMap<String, ZoneSnapshot>,
    params: ZoneAvoidanceParams,
) -> HashSet<String> {
    let mut available: HashSet<String> = snapshot.keys().cloned().collect();
    let mut limited = false;
    let mut max_load = f64::MIN;
    let mut worst_zones: Vec<String> = Vec::new();

    for (zone, zs) in snapshot {
        if zs.instance_count == 0 {
            available.remove(zone);
            limited = true;
            continue;
        }
        let blackout_ratio = zs.circuit_tripped_count as f64 / zs.instance_count as f64;
        if blackout_ratio >= params.triggering_blackout_percentage || zs.load_per_server < 0.0 {
            available.remove(zone);
            limited = true;
            continue;
        }
        if (zs.load_per_server - max_load).abs() < 1e-6 {
            worst_zones.push(zone.clone());
        } else if zs.load_per_server > max_load {
            max_load = zs.load_per_server;
            worst_zones.clear();
            worst_zones.push(zone.clone());
        }
    }

    if max_load < params.triggering_load && !limited {
        return available;
    }

    // Never evict the last remaining zone: a zone already reduced to one
    // survivor by step 2 stays, even if its own load looks "worst" among
    // what's left.
    if worst_zones.is_empty() || available.len() <= 1 {
        return available;
    }
    let candidates: HashMap<String, ZoneSnapshot> = worst_zones
        .iter()
        .filter_map(|z| snapshot.get(z).map(|zs| (z.clone(), *zs)))
        .collect();
    if let Some(evicted) = weighted_zone_choice(&candidates) {
        available.remove(&evicted);
    }
    available
}

/// §4.6: given a candidate set, draws one zone weighted by instance count.
///
/// `T = sum(instanceCount)`, draw `r` uniform in `[1, T]`, return the
/// first zone (in iteration order) whose running instance-count sum
/// reaches `r`. Zones with more instances are proportionally more
/// likely to be chosen.
pub fn weighted_zone_choice(candidates: &HashMap<String, ZoneSnapshot>) -> Option<String> {
    weighted_zone_choice_with_rng(candidates, &mut rand::thread_rng())
}

fn weighted_zone_choice_with_rng<R: Rng + ?Sized>(
    candidates: &HashMap<String, ZoneSnapshot>,
    rng: &mut R,
) -> Option<String> {
    let total: usize = candidates.values().map(|zs| zs.instance_count).sum();
    if total == 0 {
        return None;
    }
    let r = rng.gen_range(1..=total);
    let mut running = 0usize;
    for (zone, zs) in candidates {
        running += zs.instance_count;
        if running >= r {
            return Some(zone.clone());
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;

    fn zs(instance_count: usize, active: i64, tripped: usize) -> ZoneSnapshot {
        let available = instance_count.saturating_sub(tripped).max(1);
        ZoneSnapshot {
            instance_count,
            active_requests_count: active,
            circuit_tripped_count: tripped,
            load_per_server: active as f64 / available as f64,
        }
    }

    #[test]
    fn returns_all_zones_under_normal_load() {
        let mut snapshot = HashMap::new();
        snapshot.insert("us-east".to_owned(), zs(10, 1, 0));
        snapshot.insert("us-west".to_owned(), zs(10, 1, 0));
        let params = ZoneAvoidanceParams::default();
        let available = available_zones(&snapshot, params);
        assert_eq!(available.len(), 2);
    }

    #[test]
    fn never_evicts_the_last_remaining_zone() {
        // Scenario 3 (spec.md §8): a fully blacked-out zone is dropped in
        // step 2, leaving a single survivor that must not then be evicted
        // as "worst" even though it has nonzero load.
        let mut snapshot = HashMap::new();
        snapshot.insert("us-east".to_owned(), zs(10, 1, 0));
        snapshot.insert("us-west".to_owned(), zs(10, 0, 10));
        let params = ZoneAvoidanceParams {
            triggering_load: 0.2,
            triggering_blackout_percentage: 0.99,
        };
        let available = available_zones(&snapshot, params);
        assert_eq!(available, HashSet::from(["us-east".to_owned()]));
    }

    #[test]
    fn weighted_choice_favors_larger_zone() {
        let mut candidates = HashMap::new();
        candidates.insert("us-east".to_owned(), zs(10, 5, 0));
        candidates.insert("us-west".to_owned(), zs(30, 15, 0));
        let mut east_wins = 0;
        let trials = 4000;
        for seed in 0..trials {
            let mut rng = rand::rngs::StdRng::seed_from_u64(seed);
            if weighted_zone_choice_with_rng(&candidates, &mut rng).as_deref() == Some("us-east") {
                east_wins += 1;
            }
        }
        let ratio = east_wins as f64 / trials as f64;
        assert!((0.2..0.3).contains(&ratio), "ratio was {ratio}");
    }

    #[test]
    fn zero_instance_zone_is_removed() {
        let mut snapshot = HashMap::new();
        snapshot.insert("empty".to_owned(), zs(0, 0, 0));
        snapshot.insert("ok".to_owned(), zs(5, 0, 0));
        let params = ZoneAvoidanceParams::default();
        let available = available_zones(&snapshot, params);
        assert_eq!(available, HashSet::from(["ok".to_owned()]));
    }
}
