//! Search back-end.
//!
//! Solves the compiled [`SolverModel`] with a deterministic greedy
//! construction followed by parallel iterated local search: every worker
//! thread runs seeded add/drop/swap moves with strict-improvement acceptance
//! and stall-triggered perturbation, sharing one best solution. The solution
//! callback fires on each global improvement and observes the cancellation
//! flag; all hard constraints are maintained invariantly, so every reported
//! solution is feasible.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Instant;

use parking_lot::Mutex;
use rand::prelude::*;
use rand_chacha::ChaCha20Rng;

use super::model::SolverModel;

/// Iterations between deadline / cancellation checks.
const CHECK_INTERVAL: usize = 64;
/// Rejected moves before a perturbation restart.
const STALL_LIMIT: usize = 400;
/// Perturbation cycles without a global improvement before a worker
/// considers the search converged.
const MAX_IDLE_CYCLES: usize = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchStatus {
    Optimal,
    Feasible,
    Infeasible,
    Unknown,
}

impl SearchStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SearchStatus::Optimal => "OPTIMAL",
            SearchStatus::Feasible => "FEASIBLE",
            SearchStatus::Infeasible => "INFEASIBLE",
            SearchStatus::Unknown => "UNKNOWN",
        }
    }

    pub fn is_solution(&self) -> bool {
        matches!(self, SearchStatus::Optimal | SearchStatus::Feasible)
    }
}

#[derive(Debug, Clone)]
pub struct SolutionSnapshot {
    pub assigned: Vec<bool>,
    pub objective: i64,
}

#[derive(Debug, Clone)]
pub struct SolutionRecord {
    pub solution: usize,
    pub time_ms: f64,
    pub objective: i64,
}

pub struct SearchOutcome {
    pub status: SearchStatus,
    pub best: Option<SolutionSnapshot>,
    pub solution_times: Vec<SolutionRecord>,
    pub was_aborted: bool,
}

/// Invoked on each improved solution with (solution number, elapsed ms,
/// objective, assignment vector). Returning `false` stops the search.
pub type SolutionCallback<'a> = &'a (dyn Fn(usize, f64, i64, &[bool]) -> bool + Sync);

/// Feasibility-preserving assignment state.
#[derive(Clone)]
struct SearchState {
    assigned: Vec<bool>,
    group_counts: Vec<i64>,
}

impl SearchState {
    fn new(model: &SolverModel) -> SearchState {
        SearchState {
            assigned: vec![false; model.vars.len()],
            group_counts: vec![0; model.groups.len()],
        }
    }

    fn can_assign(&self, model: &SolverModel, var_id: usize) -> bool {
        if self.assigned[var_id] || model.forced_zero[var_id] {
            return false;
        }
        let group_idx = model.var_group[var_id];
        if self.group_counts[group_idx] >= model.groups[group_idx].capacity {
            return false;
        }
        !model.conflicts[var_id].iter().any(|&other| self.assigned[other])
    }

    fn add(&mut self, model: &SolverModel, var_id: usize) {
        debug_assert!(!self.assigned[var_id]);
        self.assigned[var_id] = true;
        self.group_counts[model.var_group[var_id]] += 1;
    }

    fn remove(&mut self, model: &SolverModel, var_id: usize) {
        debug_assert!(self.assigned[var_id]);
        self.assigned[var_id] = false;
        self.group_counts[model.var_group[var_id]] -= 1;
    }
}

/// Deterministic construction: walk the coverage groups in priority order and
/// fill each missing seat with the best-scoring admissible candidate.
fn greedy_fill(model: &SolverModel, state: &mut SearchState) {
    let mut minutes_by_clinician = vec![0i64; model.clinician_ids.len()];
    for (var_id, meta) in model.vars.iter().enumerate() {
        if state.assigned[var_id] {
            minutes_by_clinician[meta.clinician_idx] += meta.duration_minutes;
        }
    }
    let hours_by_clinician: Vec<Option<(i64, i64, i64)>> = {
        let mut table = vec![None; model.clinician_ids.len()];
        for term in &model.hours {
            table[term.clinician_idx] = Some((
                term.manual_minutes,
                term.target_minus_tolerance,
                term.target_plus_tolerance,
            ));
        }
        table
    };

    for (group_idx, group) in model.groups.iter().enumerate() {
        let mut need = group.missing - state.group_counts[group_idx];
        while need > 0 {
            let mut best: Option<(i64, usize)> = None;
            for &var_id in &group.var_ids {
                if !state.can_assign(model, var_id) {
                    continue;
                }
                let meta = &model.vars[var_id];
                let mut score = meta.preference_weight;
                if meta.window_fit {
                    score += 5;
                }
                if let Some((manual, minus_tol, plus_tol)) =
                    hours_by_clinician[meta.clinician_idx]
                {
                    let total = manual + minutes_by_clinician[meta.clinician_idx];
                    if total < minus_tol {
                        score += 10;
                    } else if total + meta.duration_minutes > plus_tol {
                        score -= 10;
                    }
                }
                // Deterministic tie-break on the lowest clinician index.
                let better = match best {
                    None => true,
                    Some((best_score, best_var)) => {
                        score > best_score
                            || (score == best_score
                                && model.vars[best_var].clinician_idx > meta.clinician_idx)
                    }
                };
                if better {
                    best = Some((score, var_id));
                }
            }
            let Some((_, var_id)) = best else {
                break;
            };
            state.add(model, var_id);
            minutes_by_clinician[model.vars[var_id].clinician_idx] +=
                model.vars[var_id].duration_minutes;
            need -= 1;
        }
    }
}

struct Shared<'a> {
    best: Mutex<SolutionSnapshot>,
    records: Mutex<Vec<SolutionRecord>>,
    solution_counter: AtomicUsize,
    stop: AtomicBool,
    on_solution: SolutionCallback<'a>,
    search_start: Instant,
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum OfferResult {
    Improved,
    NotImproved,
    Stopped,
}

impl<'a> Shared<'a> {
    /// Publish a candidate if it improves the global best, invoking the
    /// solution callback under the lock so events stay strictly ordered.
    fn offer(&self, candidate: &SearchState, objective: i64) -> OfferResult {
        let mut best = self.best.lock();
        if objective >= best.objective {
            return OfferResult::NotImproved;
        }
        best.assigned = candidate.assigned.clone();
        best.objective = objective;
        let solution = self.solution_counter.fetch_add(1, Ordering::SeqCst) + 1;
        let time_ms = self.search_start.elapsed().as_secs_f64() * 1000.0;
        self.records.lock().push(SolutionRecord {
            solution,
            time_ms,
            objective,
        });
        let keep_going = (self.on_solution)(solution, time_ms, objective, &best.assigned);
        if !keep_going {
            self.stop.store(true, Ordering::SeqCst);
            return OfferResult::Stopped;
        }
        OfferResult::Improved
    }
}

enum AppliedMove {
    Add(usize),
    Remove(usize),
    Swap { removed: usize, added: usize },
}

fn revert(state: &mut SearchState, model: &SolverModel, applied: AppliedMove) {
    match applied {
        AppliedMove::Add(v) => state.remove(model, v),
        AppliedMove::Remove(v) => state.add(model, v),
        AppliedMove::Swap { removed, added } => {
            state.remove(model, added);
            state.add(model, removed);
        }
    }
}

fn propose_move(
    model: &SolverModel,
    state: &mut SearchState,
    rng: &mut ChaCha20Rng,
) -> Option<AppliedMove> {
    let var_count = model.vars.len();
    let var_id = rng.gen_range(0..var_count);
    match rng.gen_range(0..3u8) {
        0 => {
            if state.can_assign(model, var_id) {
                state.add(model, var_id);
                Some(AppliedMove::Add(var_id))
            } else {
                None
            }
        }
        1 => {
            if state.assigned[var_id] {
                state.remove(model, var_id);
                Some(AppliedMove::Remove(var_id))
            } else {
                None
            }
        }
        _ => {
            let group = &model.groups[model.var_group[var_id]];
            let assigned_in_group: Vec<usize> = group
                .var_ids
                .iter()
                .copied()
                .filter(|&v| state.assigned[v])
                .collect();
            if assigned_in_group.is_empty() {
                return None;
            }
            let removed = assigned_in_group[rng.gen_range(0..assigned_in_group.len())];
            state.remove(model, removed);
            let offset = rng.gen_range(0..group.var_ids.len());
            let added = group
                .var_ids
                .iter()
                .cycle()
                .skip(offset)
                .take(group.var_ids.len())
                .copied()
                .find(|&v| v != removed && state.can_assign(model, v));
            match added {
                Some(added) => {
                    state.add(model, added);
                    Some(AppliedMove::Swap { removed, added })
                }
                None => {
                    state.add(model, removed);
                    None
                }
            }
        }
    }
}

/// Worker result: true when the worker stopped because its search converged
/// (no improvement over several perturbation cycles), false when it was cut
/// off by the deadline, a stop request, or cancellation.
fn worker_loop(
    model: &SolverModel,
    shared: &Shared<'_>,
    cancel: &AtomicBool,
    deadline: Instant,
    worker_idx: usize,
) -> bool {
    let mut rng = ChaCha20Rng::seed_from_u64(0x5EED_0000 + worker_idx as u64);
    let mut current = {
        let best = shared.best.lock();
        let mut state = SearchState::new(model);
        for (var_id, &flag) in best.assigned.iter().enumerate() {
            if flag {
                state.add(model, var_id);
            }
        }
        state
    };
    let mut current_objective = model.evaluate(&current.assigned).objective;
    let mut stall = 0usize;
    let mut idle_cycles = 0usize;
    let mut iterations = 0usize;

    loop {
        iterations += 1;
        if iterations % CHECK_INTERVAL == 0
            && (Instant::now() >= deadline
                || shared.stop.load(Ordering::SeqCst)
                || cancel.load(Ordering::SeqCst))
        {
            return false;
        }

        let improved = match propose_move(model, &mut current, &mut rng) {
            None => false,
            Some(applied) => {
                let objective = model.evaluate(&current.assigned).objective;
                if objective < current_objective {
                    current_objective = objective;
                    match shared.offer(&current, objective) {
                        OfferResult::Improved => idle_cycles = 0,
                        OfferResult::NotImproved => {}
                        OfferResult::Stopped => return false,
                    }
                    true
                } else {
                    revert(&mut current, model, applied);
                    false
                }
            }
        };

        if improved {
            stall = 0;
            continue;
        }
        stall += 1;
        if stall > STALL_LIMIT {
            stall = 0;
            match perturb_cycle(model, shared, &mut current, &mut current_objective, &mut rng) {
                OfferResult::Improved => idle_cycles = 0,
                OfferResult::NotImproved => idle_cycles += 1,
                OfferResult::Stopped => return false,
            }
            if idle_cycles >= MAX_IDLE_CYCLES {
                return true;
            }
        }
    }
}

/// Restart from a perturbed copy of the global best: drop a quarter of its
/// assignments and greedily refill.
fn perturb_cycle(
    model: &SolverModel,
    shared: &Shared<'_>,
    current: &mut SearchState,
    current_objective: &mut i64,
    rng: &mut ChaCha20Rng,
) -> OfferResult {
    let best_assigned = shared.best.lock().assigned.clone();
    let mut state = SearchState::new(model);
    for (var_id, &flag) in best_assigned.iter().enumerate() {
        if flag {
            state.add(model, var_id);
        }
    }
    let assigned_ids: Vec<usize> = (0..model.vars.len())
        .filter(|&v| state.assigned[v])
        .collect();
    if !assigned_ids.is_empty() {
        let removals = (assigned_ids.len() / 4).max(1);
        for _ in 0..removals {
            let victim = assigned_ids[rng.gen_range(0..assigned_ids.len())];
            if state.assigned[victim] {
                state.remove(model, victim);
            }
        }
    }
    greedy_fill(model, &mut state);
    let objective = model.evaluate(&state.assigned).objective;
    *current = state;
    *current_objective = objective;
    shared.offer(current, objective)
}

/// Run the search. `workers` is clamped to at least one thread; the deadline
/// bounds wall-clock time and `cancel` is honored at move granularity.
pub fn solve_model(
    model: &SolverModel,
    deadline: Instant,
    cancel: &AtomicBool,
    workers: usize,
    on_solution: SolutionCallback<'_>,
) -> SearchOutcome {
    if model.vars.is_empty() {
        return SearchOutcome {
            status: SearchStatus::Infeasible,
            best: None,
            solution_times: Vec::new(),
            was_aborted: cancel.load(Ordering::SeqCst),
        };
    }

    let search_start = Instant::now();
    if cancel.load(Ordering::SeqCst) {
        return SearchOutcome {
            status: SearchStatus::Unknown,
            best: None,
            solution_times: Vec::new(),
            was_aborted: true,
        };
    }

    // Construction: the empty assignment is feasible (coverage floors are
    // soft), so greedy always yields a first solution.
    let mut initial = SearchState::new(model);
    greedy_fill(model, &mut initial);
    let initial_objective = model.evaluate(&initial.assigned).objective;

    let shared = Shared {
        // Seed the best with an empty assignment so the greedy result is
        // published through the normal callback path.
        best: Mutex::new(SolutionSnapshot {
            assigned: vec![false; model.vars.len()],
            objective: i64::MAX,
        }),
        records: Mutex::new(Vec::new()),
        solution_counter: AtomicUsize::new(0),
        stop: AtomicBool::new(false),
        on_solution,
        search_start,
    };
    let initial_offer = shared.offer(&initial, initial_objective);

    let workers = workers.max(1);
    let mut converged = vec![false; workers];
    if initial_offer != OfferResult::Stopped {
        std::thread::scope(|scope| {
            let handles: Vec<_> = (0..workers)
                .map(|worker_idx| {
                    let shared = &shared;
                    let model_ref = model;
                    scope
                        .spawn(move || worker_loop(model_ref, shared, cancel, deadline, worker_idx))
                })
                .collect();
            for (worker_idx, handle) in handles.into_iter().enumerate() {
                converged[worker_idx] = handle.join().unwrap_or(false);
            }
        });
    }

    let was_aborted = cancel.load(Ordering::SeqCst) || shared.stop.load(Ordering::SeqCst);
    let best = shared.best.into_inner();
    let solution_times = shared.records.into_inner();
    let best = if best.objective == i64::MAX {
        None
    } else {
        Some(best)
    };

    let status = match &best {
        None => SearchStatus::Unknown,
        Some(_) => {
            if converged.iter().all(|&c| c) && !was_aborted && Instant::now() < deadline {
                SearchStatus::Optimal
            } else {
                SearchStatus::Feasible
            }
        }
    };

    SearchOutcome {
        status,
        best,
        solution_times,
        was_aborted,
    }
}
