// ── Damped rendezvous-hash planner ──
//
// Weighted HRW picks a stable ranking of shards per circuit. New circuits
// land on the least-loaded of their top candidates; existing ones only move
// when rebalancing clearly pays for itself. Salt and assignments persist
// between runs so placement survives restarts.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{debug, info};

/// Bumped whenever scoring changes; a mismatch discards persisted assignments.
pub const ALGO_VERSION: u32 = 1;

/// Tunables of the rendezvous planner.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlannerParams {
    /// How many top HRW shards a circuit may live on.
    pub candidates: usize,
    /// Fraction of a shard's capacity treated as full.
    pub headroom: f64,
    /// A move must save at least this fraction of the current cost.
    pub hysteresis: f64,
    pub cooldown_secs: i64,
    pub move_budget: usize,
    /// Only move circuits off shards that are over capacity.
    pub freeze: bool,
    pub move_penalty: f64,
    pub penalty_half_life_secs: f64,
    pub global_balance_weight: f64,
    /// Persisted state older than this gets a fresh salt.
    pub state_ttl_secs: i64,
}

impl Default for PlannerParams {
    fn default() -> Self {
        Self {
            candidates: 3,
            headroom: 0.9,
            hysteresis: 0.05,
            cooldown_secs: 3600,
            move_budget: 32,
            freeze: false,
            move_penalty: 0.01,
            penalty_half_life_secs: 21_600.0,
            global_balance_weight: 0.0,
            state_ttl_secs: 86_400,
        }
    }
}

/// Persisted planner state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlannerState {
    pub algo_version: u32,
    pub salt: String,
    /// circuit id → shard id
    pub assignments: BTreeMap<String, String>,
    /// circuit id → unix time of its last placement change
    pub last_change_timestamps: BTreeMap<String, i64>,
    pub updated_at: i64,
}

impl PlannerState {
    pub fn fresh(previous_salt: &str, now: i64) -> Self {
        Self {
            algo_version: ALGO_VERSION,
            salt: derive_salt(previous_salt, now),
            assignments: BTreeMap::new(),
            last_change_timestamps: BTreeMap::new(),
            updated_at: now,
        }
    }

    pub fn updated_at_utc(&self) -> Option<DateTime<Utc>> {
        DateTime::from_timestamp(self.updated_at, 0)
    }
}

fn derive_salt(previous: &str, now: i64) -> String {
    let digest = Sha256::digest(format!("{previous}|{now}").as_bytes());
    digest.iter().take(16).map(|b| format!("{b:02x}")).collect()
}

/// Apply staleness rules to loaded state.
///
/// Missing, stale (older than `ttl_secs`) or version-mismatched state is
/// replaced by an empty one with a new salt. Rotating the salt reshuffles
/// every circuit at once.
pub fn refresh_state(state: Option<PlannerState>, ttl_secs: i64, now: i64) -> PlannerState {
    match state {
        None => PlannerState::fresh("", now),
        Some(state) if state.algo_version != ALGO_VERSION => {
            info!(
                found = state.algo_version,
                expected = ALGO_VERSION,
                "planner algorithm changed; starting over"
            );
            PlannerState::fresh(&state.salt, now)
        }
        Some(state) if now.saturating_sub(state.updated_at) > ttl_secs => {
            info!(age_secs = now - state.updated_at, "planner state stale; rotating salt");
            PlannerState::fresh(&state.salt, now)
        }
        Some(state) => state,
    }
}

// ── Scoring ─────────────────────────────────────────────────────────

/// A placement target.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Shard {
    pub id: String,
    pub weight: f64,
    /// Load (Mbps) the shard is sized for.
    pub capacity: f64,
}

/// Deterministic uniform in (0, 1] from `SHA-256(salt | circuit | shard)`.
fn hash_uniform(salt: &str, circuit_id: &str, shard_id: &str) -> f64 {
    let digest = Sha256::digest(format!("{salt}|{circuit_id}|{shard_id}").as_bytes());
    let mut head = [0u8; 8];
    head.copy_from_slice(&digest[..8]);
    let bits = u64::from_be_bytes(head) >> 11;
    #[allow(clippy::cast_precision_loss, clippy::as_conversions)]
    let mantissa = (bits + 1) as f64;
    mantissa / 9_007_199_254_740_992.0 // 2^53
}

/// Weighted HRW score `weight / -ln(U)`.
pub fn hrw_score(salt: &str, circuit_id: &str, shard: &Shard) -> f64 {
    if shard.weight <= 0.0 {
        return 0.0;
    }
    let u = hash_uniform(salt, circuit_id, &shard.id);
    shard.weight / -u.ln()
}

/// Shard indices ranked by descending score; ties go to the lower index.
pub fn hrw_candidates(salt: &str, circuit_id: &str, shards: &[Shard]) -> Vec<usize> {
    let scores: Vec<f64> = shards
        .iter()
        .map(|s| hrw_score(salt, circuit_id, s))
        .collect();
    let mut ranked: Vec<usize> = (0..shards.len()).collect();
    ranked.sort_by(|&a, &b| scores[b].total_cmp(&scores[a]).then(a.cmp(&b)));
    ranked
}

// ── Planning ────────────────────────────────────────────────────────

/// A circuit to place and the load it brings.
#[derive(Debug, Clone, PartialEq)]
pub struct PlanItem {
    pub circuit_id: String,
    pub load: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PlanOutcome {
    /// Shard index per input item.
    pub placement: Vec<usize>,
    pub cold_starts: usize,
    pub moves: usize,
}

struct Balance<'a> {
    shards: &'a [Shard],
    params: &'a PlannerParams,
    loads: Vec<f64>,
}

impl Balance<'_> {
    fn cost(&self) -> f64 {
        let mut over = 0.0;
        for (shard, load) in self.shards.iter().zip(&self.loads) {
            let limit = shard.capacity * self.params.headroom;
            if limit > 0.0 {
                over += (load / limit - 1.0).max(0.0).powi(2);
            }
        }
        over + self.params.global_balance_weight * self.utilisation_variance()
    }

    fn utilisation_variance(&self) -> f64 {
        let ratios: Vec<f64> = self
            .shards
            .iter()
            .zip(&self.loads)
            .map(|(shard, load)| if shard.capacity > 0.0 { load / shard.capacity } else { 0.0 })
            .collect();
        if ratios.is_empty() {
            return 0.0;
        }
        #[allow(clippy::cast_precision_loss, clippy::as_conversions)]
        let n = ratios.len() as f64;
        let mean = ratios.iter().sum::<f64>() / n;
        ratios.iter().map(|r| (r - mean).powi(2)).sum::<f64>() / n
    }

    fn utilisation(&self, shard: usize) -> f64 {
        let capacity = self.shards[shard].capacity;
        if capacity > 0.0 {
            self.loads[shard] / capacity
        } else {
            f64::INFINITY
        }
    }

    fn over_headroom(&self, shard: usize) -> bool {
        self.loads[shard] > self.shards[shard].capacity * self.params.headroom
    }

    fn cost_if_moved(&mut self, load: f64, from: usize, to: usize) -> f64 {
        self.loads[from] -= load;
        self.loads[to] += load;
        let cost = self.cost();
        self.loads[to] -= load;
        self.loads[from] += load;
        cost
    }
}

/// Movement penalty, heavier for circuits that moved recently.
fn move_penalty(params: &PlannerParams, last_change: Option<i64>, now: i64) -> f64 {
    let freshness = match last_change {
        Some(at) if params.penalty_half_life_secs > 0.0 => {
            #[allow(clippy::cast_precision_loss, clippy::as_conversions)]
            let age = now.saturating_sub(at).max(0) as f64;
            (-age / params.penalty_half_life_secs).exp2()
        }
        _ => 0.0,
    };
    params.move_penalty * (0.5 + 0.5 * freshness)
}

/// Place every item on a shard, updating `state` in place.
///
/// Items already assigned to a known shard stay put unless a rebalance move
/// clears every gate (gain above penalty and hysteresis, cooldown elapsed,
/// budget left, and in freeze mode an overloaded source).
pub fn plan_assignments(
    items: &[PlanItem],
    shards: &[Shard],
    state: &mut PlannerState,
    params: &PlannerParams,
    now: i64,
) -> PlanOutcome {
    if shards.is_empty() {
        return PlanOutcome {
            placement: Vec::new(),
            cold_starts: 0,
            moves: 0,
        };
    }
    let shard_index: BTreeMap<&str, usize> = shards
        .iter()
        .enumerate()
        .map(|(idx, s)| (s.id.as_str(), idx))
        .collect();
    let top = params.candidates.clamp(1, shards.len());
    let candidates: Vec<Vec<usize>> = items
        .iter()
        .map(|item| {
            let mut ranked = hrw_candidates(&state.salt, &item.circuit_id, shards);
            ranked.truncate(top);
            ranked
        })
        .collect();

    let mut balance = Balance {
        shards,
        params,
        loads: vec![0.0; shards.len()],
    };
    let mut placement: Vec<Option<usize>> = items
        .iter()
        .map(|item| {
            state
                .assignments
                .get(&item.circuit_id)
                .and_then(|id| shard_index.get(id.as_str()).copied())
        })
        .collect();
    for (item, slot) in items.iter().zip(&placement) {
        if let Some(shard) = slot {
            balance.loads[*shard] += item.load;
        }
    }

    // cold starts: least utilised of the top candidates, ties by HRW rank
    let mut cold_starts = 0;
    for (idx, item) in items.iter().enumerate() {
        if placement[idx].is_some() {
            continue;
        }
        let mut best = candidates[idx][0];
        for &shard in &candidates[idx][1..] {
            if balance.utilisation(shard) < balance.utilisation(best) {
                best = shard;
            }
        }
        balance.loads[best] += item.load;
        placement[idx] = Some(best);
        state.last_change_timestamps.insert(item.circuit_id.clone(), now);
        cold_starts += 1;
        debug!(circuit_id = %item.circuit_id, shard = %shards[best].id, "cold-start placement");
    }
    let mut placement: Vec<usize> = placement.into_iter().map(|p| p.unwrap_or(0)).collect();

    let moves = rebalance(items, &candidates, &mut placement, &mut balance, state, now);

    state.assignments = items
        .iter()
        .zip(&placement)
        .map(|(item, &shard)| (item.circuit_id.clone(), shards[shard].id.clone()))
        .collect();
    state
        .last_change_timestamps
        .retain(|id, _| state.assignments.contains_key(id));
    state.updated_at = now;

    info!(
        circuits = items.len(),
        shards = shards.len(),
        cold_starts,
        moves,
        "rendezvous plan complete"
    );
    PlanOutcome {
        placement,
        cold_starts,
        moves,
    }
}

fn rebalance(
    items: &[PlanItem],
    candidates: &[Vec<usize>],
    placement: &mut [usize],
    balance: &mut Balance<'_>,
    state: &mut PlannerState,
    now: i64,
) -> usize {
    let params = balance.params;
    let mut moves = 0;
    while moves < params.move_budget {
        let current = balance.cost();
        if current <= 0.0 {
            break;
        }
        let mut best: Option<(f64, usize, usize)> = None;
        for (idx, item) in items.iter().enumerate() {
            let last_change = state.last_change_timestamps.get(&item.circuit_id).copied();
            if last_change.is_some_and(|at| now.saturating_sub(at) < params.cooldown_secs) {
                continue;
            }
            let from = placement[idx];
            if params.freeze && !balance.over_headroom(from) {
                continue;
            }
            let penalty = move_penalty(params, last_change, now);
            for &to in &candidates[idx] {
                if to == from {
                    continue;
                }
                let gain = current - balance.cost_if_moved(item.load, from, to) - penalty;
                if gain <= params.hysteresis * current {
                    continue;
                }
                if best.is_none_or(|(g, _, _)| gain > g) {
                    best = Some((gain, idx, to));
                }
            }
        }
        let Some((gain, idx, to)) = best else {
            break;
        };
        let from = placement[idx];
        let load = items[idx].load;
        balance.loads[from] -= load;
        balance.loads[to] += load;
        placement[idx] = to;
        state
            .last_change_timestamps
            .insert(items[idx].circuit_id.clone(), now);
        moves += 1;
        debug!(
            circuit_id = %items[idx].circuit_id,
            from = %balance.shards[from].id,
            to = %balance.shards[to].id,
            gain,
            "rebalance move"
        );
    }
    moves
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    const NOW: i64 = 1_700_000_000;

    fn shards(n: usize, capacity: f64) -> Vec<Shard> {
        (1..=n)
            .map(|i| Shard {
                id: format!("Generated_PN_{i}"),
                weight: 1.0,
                capacity,
            })
            .collect()
    }

    fn items(n: usize, load: f64) -> Vec<PlanItem> {
        (0..n)
            .map(|i| PlanItem {
                circuit_id: format!("c{i}"),
                load,
            })
            .collect()
    }

    #[test]
    fn uniform_is_in_unit_interval() {
        for i in 0..200 {
            let u = hash_uniform("salt", &format!("c{i}"), "s");
            assert!(u > 0.0 && u <= 1.0);
        }
    }

    #[test]
    fn candidates_are_a_deterministic_total_order() {
        let pool = shards(8, 100.0);
        let first = hrw_candidates("abc", "circuit-42", &pool);
        let second = hrw_candidates("abc", "circuit-42", &pool);
        assert_eq!(first, second);
        let mut sorted = first.clone();
        sorted.sort_unstable();
        assert_eq!(sorted, (0..8).collect::<Vec<_>>());
    }

    #[test]
    fn zero_weight_shards_rank_last() {
        let mut pool = shards(3, 100.0);
        pool[0].weight = 0.0;
        let ranked = hrw_candidates("abc", "c1", &pool);
        assert_eq!(ranked[2], 0);
    }

    #[test]
    fn refresh_keeps_recent_state() {
        let mut state = PlannerState::fresh("", NOW);
        state.assignments.insert("c1".into(), "Generated_PN_1".into());
        let kept = refresh_state(Some(state.clone()), 86_400, NOW + 60);
        assert_eq!(kept, state);
    }

    #[test]
    fn refresh_rotates_salt_after_ttl() {
        let mut state = PlannerState::fresh("", NOW);
        state.assignments.insert("c1".into(), "Generated_PN_1".into());
        let rotated = refresh_state(Some(state.clone()), 86_400, NOW + 86_401);
        assert_ne!(rotated.salt, state.salt);
        assert!(rotated.assignments.is_empty());
        assert_eq!(rotated.updated_at, NOW + 86_401);
    }

    #[test]
    fn refresh_discards_other_algorithm_versions() {
        let mut state = PlannerState::fresh("", NOW);
        state.algo_version = ALGO_VERSION + 1;
        state.assignments.insert("c1".into(), "Generated_PN_1".into());
        assert!(refresh_state(Some(state), 86_400, NOW).assignments.is_empty());
    }

    #[test]
    fn cold_start_spreads_load() {
        let pool = shards(4, 1000.0);
        let mut state = PlannerState::fresh("", NOW);
        let outcome = plan_assignments(
            &items(40, 10.0),
            &pool,
            &mut state,
            &PlannerParams::default(),
            NOW,
        );
        assert_eq!(outcome.cold_starts, 40);
        let mut counts = [0usize; 4];
        for shard in &outcome.placement {
            counts[*shard] += 1;
        }
        assert!(counts.iter().all(|&c| c >= 6), "{counts:?}");
        assert_eq!(state.assignments.len(), 40);
    }

    #[test]
    fn unchanged_input_keeps_every_assignment() {
        let pool = shards(4, 1000.0);
        let params = PlannerParams::default();
        let work = items(25, 10.0);
        let mut state = PlannerState::fresh("", NOW);
        let first = plan_assignments(&work, &pool, &mut state, &params, NOW);
        let snapshot = state.assignments.clone();

        let second = plan_assignments(&work, &pool, &mut state, &params, NOW + 7200);
        assert_eq!(second.placement, first.placement);
        assert_eq!(second.moves, 0);
        assert_eq!(second.cold_starts, 0);
        assert_eq!(state.assignments, snapshot);
    }

    #[test]
    fn overload_moves_respect_budget_and_cooldown() {
        let pool = shards(2, 100.0);
        let work = items(10, 20.0);
        let mut state = PlannerState::fresh("", NOW);
        for item in &work {
            state
                .assignments
                .insert(item.circuit_id.clone(), "Generated_PN_1".into());
        }
        let params = PlannerParams {
            candidates: 2,
            move_budget: 3,
            ..PlannerParams::default()
        };

        // recently moved circuits are frozen by the cooldown
        for item in &work {
            state.last_change_timestamps.insert(item.circuit_id.clone(), NOW);
        }
        let blocked = plan_assignments(&work, &pool, &mut state, &params, NOW + 10);
        assert_eq!(blocked.moves, 0);

        let moved = plan_assignments(&work, &pool, &mut state, &params, NOW + 7200);
        assert_eq!(moved.moves, 3);
        assert_eq!(moved.placement.iter().filter(|&&s| s == 1).count(), 3);
    }

    #[test]
    fn freeze_only_drains_overloaded_shards() {
        let pool = shards(2, 1000.0);
        let work = items(4, 10.0);
        let mut state = PlannerState::fresh("", NOW);
        for item in &work {
            state
                .assignments
                .insert(item.circuit_id.clone(), "Generated_PN_1".into());
        }
        let params = PlannerParams {
            candidates: 2,
            freeze: true,
            global_balance_weight: 10.0,
            ..PlannerParams::default()
        };
        let outcome = plan_assignments(&work, &pool, &mut state, &params, NOW);
        assert_eq!(outcome.moves, 0);
    }

    #[test]
    fn cold_start_ties_go_to_the_higher_ranked_shard() {
        let pool = shards(4, 1000.0);
        let mut state = PlannerState::fresh("", NOW);
        let salt = state.salt.clone();
        // zero-load circuits leave every shard equally utilised
        let work = items(20, 0.0);
        let outcome = plan_assignments(&work, &pool, &mut state, &PlannerParams::default(), NOW);
        for (item, shard) in work.iter().zip(&outcome.placement) {
            assert_eq!(*shard, hrw_candidates(&salt, &item.circuit_id, &pool)[0]);
        }
    }

    fn overloaded_first_shard(work: &[PlanItem]) -> PlannerState {
        let mut state = PlannerState::fresh("", NOW);
        for item in work {
            state
                .assignments
                .insert(item.circuit_id.clone(), "Generated_PN_1".into());
        }
        state
    }

    #[test]
    fn hysteresis_refuses_marginal_gains() {
        // 100 Mbps on a shard full at 90: shedding one circuit saves ~19% of the cost
        let pool = shards(2, 100.0);
        let work = items(100, 1.0);
        let strict = PlannerParams {
            candidates: 2,
            hysteresis: 0.5,
            move_penalty: 0.0,
            ..PlannerParams::default()
        };
        let mut state = overloaded_first_shard(&work);
        let refused = plan_assignments(&work, &pool, &mut state, &strict, NOW);
        assert_eq!(refused.moves, 0);

        let lenient = PlannerParams {
            hysteresis: 0.1,
            ..strict
        };
        let mut state = overloaded_first_shard(&work);
        let accepted = plan_assignments(&work, &pool, &mut state, &lenient, NOW);
        assert!(accepted.moves > 0);
    }

    #[test]
    fn move_penalty_decays_towards_half() {
        let params = PlannerParams {
            move_penalty: 1.0,
            penalty_half_life_secs: 3600.0,
            ..PlannerParams::default()
        };
        let fresh = move_penalty(&params, Some(NOW), NOW);
        let one_half_life = move_penalty(&params, Some(NOW - 3600), NOW);
        let ancient = move_penalty(&params, Some(NOW - 3600 * 40), NOW);
        let never = move_penalty(&params, None, NOW);
        assert!((fresh - 1.0).abs() < 1e-9);
        assert!((one_half_life - 0.75).abs() < 1e-9);
        assert!(fresh > one_half_life && one_half_life > ancient);
        assert!((ancient - 0.5).abs() < 1e-6);
        assert!((never - 0.5).abs() < 1e-9);
    }

    #[test]
    fn recently_moved_circuit_is_dearer_to_move() {
        let pool = shards(2, 100.0);
        let work = vec![
            PlanItem {
                circuit_id: "recent".into(),
                load: 50.0,
            },
            PlanItem {
                circuit_id: "settled".into(),
                load: 50.0,
            },
        ];
        let mut state = overloaded_first_shard(&work);
        state.last_change_timestamps.insert("recent".into(), NOW);
        state
            .last_change_timestamps
            .insert("settled".into(), NOW - 3600 * 10);
        let params = PlannerParams {
            candidates: 2,
            cooldown_secs: 0,
            move_budget: 1,
            hysteresis: 0.0,
            move_penalty: 0.005,
            penalty_half_life_secs: 3600.0,
            ..PlannerParams::default()
        };
        let outcome = plan_assignments(&work, &pool, &mut state, &params, NOW);
        assert_eq!(outcome.moves, 1);
        assert_eq!(outcome.placement, vec![0, 1]);
        assert_eq!(state.assignments["settled"], "Generated_PN_2");
    }

    #[test]
    fn vanished_circuits_are_forgotten() {
        let pool = shards(2, 1000.0);
        let mut state = PlannerState::fresh("", NOW);
        state.assignments.insert("gone".into(), "Generated_PN_2".into());
        state.last_change_timestamps.insert("gone".into(), NOW);
        plan_assignments(&items(1, 10.0), &pool, &mut state, &PlannerParams::default(), NOW);
        assert!(!state.assignments.contains_key("gone"));
        assert!(!state.last_change_timestamps.contains_key("gone"));
    }

    #[test]
    fn state_json_uses_camel_case() {
        let state = PlannerState::fresh("", NOW);
        let json = serde_json::to_value(&state).unwrap();
        for key in ["algoVersion", "salt", "assignments", "lastChangeTimestamps", "updatedAt"] {
            assert!(json.get(key).is_some(), "missing {key}");
        }
        let back: PlannerState = serde_json::from_value(json).unwrap();
        assert_eq!(back, state);
    }
}
