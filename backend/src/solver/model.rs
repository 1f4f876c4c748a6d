//! CP model construction.
//!
//! Builds the decision space for one solve: boolean assignment variables with
//! admission rules, hard constraints compiled into forced-zero flags,
//! pairwise conflicts and per-(date, slot) capacity groups, and the weighted
//! soft terms of the objective. The search back-end in [`super::engine`]
//! consumes the compiled model; [`SolverModel::evaluate`] scores a candidate
//! assignment vector exactly.

use std::collections::{BTreeMap, BTreeSet};

use crate::models::state::{ScheduleDocument, SolverSettings, WorkingWindow};
use crate::models::time::{day_type_for, weekday_key, parse_date_iso, DayType, MINUTES_PER_DAY};

use super::context::SlotContext;

/// Maximum day distance two intervals can span and still overlap, given the
/// end-day offset is clamped to three days.
const MAX_OVERLAP_DAY_DISTANCE: i64 = 3;

const WORKING_HOURS_BLOCK_MINUTES: i64 = 15;

#[derive(Debug, Clone, Copy)]
pub struct SolverWeights {
    pub coverage: i64,
    pub slack: i64,
    pub total_assignments: i64,
    pub slot_priority: i64,
    pub time_window: i64,
    pub gap_penalty: i64,
    pub section_preference: i64,
    pub working_hours: i64,
}

impl SolverWeights {
    pub fn from_settings(settings: &SolverSettings) -> SolverWeights {
        SolverWeights {
            coverage: settings.weight_coverage,
            slack: settings.weight_slack,
            total_assignments: settings.weight_total_assignments,
            slot_priority: settings.weight_slot_priority,
            time_window: settings.weight_time_window,
            gap_penalty: settings.weight_gap_penalty,
            section_preference: settings.weight_section_preference,
            working_hours: settings.weight_working_hours,
        }
    }
}

/// One decision variable: assign `clinician` to `slot` on `date`.
#[derive(Debug, Clone)]
pub struct VarMeta {
    pub clinician_idx: usize,
    /// Index into the context-horizon day list.
    pub day_idx: usize,
    pub date_iso: String,
    pub ctx_idx: usize,
    pub slot_id: String,
    /// Interval in absolute minutes (day index × 1440 + clock minutes).
    pub start_abs: i64,
    pub end_abs: i64,
    pub location_id: String,
    pub duration_minutes: i64,
    pub preference_weight: i64,
    /// Counts toward the time-window reward when assigned.
    pub window_fit: bool,
    pub on_call: bool,
    pub order_weight: i64,
}

impl VarMeta {
    fn is_zero_length(&self) -> bool {
        self.start_abs == self.end_abs
    }
}

/// A fixed (manual) assignment the solver must plan around.
#[derive(Debug, Clone)]
struct ManualItem {
    start_abs: i64,
    end_abs: i64,
    location_id: String,
    on_call: bool,
}

impl ManualItem {
    fn is_zero_length(&self) -> bool {
        self.start_abs == self.end_abs
    }
}

/// Coverage group for one (date, slot): capacity ceiling plus the coverage /
/// slack bookkeeping for the objective.
#[derive(Debug, Clone)]
pub struct SlotDayGroup {
    pub ctx_idx: usize,
    pub date_iso: String,
    pub var_ids: Vec<usize>,
    pub manual_count: i64,
    pub base_required: i64,
    pub target: i64,
    pub missing: i64,
    pub capacity: i64,
    pub order_weight: i64,
}

/// A manual-manual gap: costs a constant 1 unless one of the bridging
/// variables is assigned (a shift that touches both manuals fills the gap).
#[derive(Debug, Clone)]
pub struct ManualGap {
    pub bridging_vars: Vec<usize>,
}

#[derive(Debug, Clone, Default)]
pub struct GapTerms {
    /// Both variables assigned to the same clinician on the same date with a
    /// strict gap between them.
    pub var_var: Vec<(usize, usize)>,
    /// Variable gapped against a fixed manual assignment.
    pub var_manual: Vec<usize>,
    pub manual_manual: Vec<ManualGap>,
}

/// Working-hours target for one clinician, scaled to the solved range.
#[derive(Debug, Clone)]
pub struct HoursTerm {
    pub clinician_idx: usize,
    pub manual_minutes: i64,
    pub target_minus_tolerance: i64,
    pub target_plus_tolerance: i64,
}

#[derive(Debug, Clone, Default)]
pub struct SubScoreValues {
    pub covered: i64,
    pub slack: i64,
    pub total_assignments: i64,
    pub priority: i64,
    pub preference: i64,
    pub time_window: i64,
    pub gap: i64,
    pub hours_blocks: i64,
}

#[derive(Debug, Clone)]
pub struct Evaluation {
    pub objective: i64,
    pub sub: SubScoreValues,
}

pub struct SolverModel {
    pub vars: Vec<VarMeta>,
    pub forced_zero: Vec<bool>,
    /// Pairwise incompatibilities, symmetric adjacency lists.
    pub conflicts: Vec<Vec<usize>>,
    pub groups: Vec<SlotDayGroup>,
    /// Group index of each variable.
    pub var_group: Vec<usize>,
    pub gap: GapTerms,
    pub hours: Vec<HoursTerm>,
    pub weights: SolverWeights,
    pub distribute_all: bool,
    pub clinician_ids: Vec<String>,
    pub num_days: usize,
    pub num_slots: usize,
    pub total_required: i64,
    /// Manual-on-manual on-call rest violations found before solving.
    pub rest_day_conflicts: Vec<String>,
    /// Context-horizon days and the subset actually being solved.
    pub day_isos: Vec<String>,
    pub target_set: BTreeSet<String>,
    pub rest_feature_active: bool,
    pub rest_days_before: usize,
    pub rest_days_after: usize,
    /// (clinician_idx, day_idx) pairs with any manual assignment.
    pub manual_days: BTreeSet<(usize, usize)>,
    /// (clinician_idx, day_idx) pairs with a manual on-call assignment.
    pub manual_on_call_days: BTreeSet<(usize, usize)>,
}

impl SolverModel {
    /// Exact objective and sub-score evaluation of an assignment vector.
    pub fn evaluate(&self, assigned: &[bool]) -> Evaluation {
        let mut sub = SubScoreValues::default();

        let mut group_counts = vec![0i64; self.groups.len()];
        let mut minutes_by_clinician: BTreeMap<usize, i64> = BTreeMap::new();
        for (var_id, meta) in self.vars.iter().enumerate() {
            if !assigned[var_id] {
                continue;
            }
            group_counts[self.var_group[var_id]] += 1;
            sub.total_assignments += 1;
            sub.priority += meta.order_weight;
            sub.preference += meta.preference_weight;
            if meta.window_fit {
                sub.time_window += 1;
            }
            *minutes_by_clinician.entry(meta.clinician_idx).or_insert(0) +=
                meta.duration_minutes;
        }

        let mut weighted_coverage = 0i64;
        let mut weighted_slack = 0i64;
        for (group_idx, group) in self.groups.iter().enumerate() {
            if group.missing <= 0 {
                continue;
            }
            let assigned_here = group_counts[group_idx];
            if !group.var_ids.is_empty() && assigned_here + group.manual_count >= 1 {
                sub.covered += 1;
                weighted_coverage += group.order_weight;
            }
            let slack = (group.missing - assigned_here - group.manual_count)
                .clamp(0, group.missing);
            sub.slack += slack;
            weighted_slack += slack * group.order_weight;
        }

        for (a, b) in &self.gap.var_var {
            if assigned[*a] && assigned[*b] {
                sub.gap += 1;
            }
        }
        for var_id in &self.gap.var_manual {
            if assigned[*var_id] {
                sub.gap += 1;
            }
        }
        for manual_gap in &self.gap.manual_manual {
            let bridged = manual_gap.bridging_vars.iter().any(|v| assigned[*v]);
            if !bridged {
                sub.gap += 1;
            }
        }

        for term in &self.hours {
            let total = term.manual_minutes
                + minutes_by_clinician
                    .get(&term.clinician_idx)
                    .copied()
                    .unwrap_or(0);
            let under = (term.target_minus_tolerance - total).max(0);
            let over = (total - term.target_plus_tolerance).max(0);
            sub.hours_blocks +=
                under / WORKING_HOURS_BLOCK_MINUTES + over / WORKING_HOURS_BLOCK_MINUTES;
        }

        let weights = &self.weights;
        let mut objective = -weighted_coverage * weights.coverage
            + weighted_slack * weights.slack
            - sub.preference * weights.section_preference
            - sub.time_window * weights.time_window
            + sub.gap * weights.gap_penalty
            + sub.hours_blocks * weights.working_hours;
        if self.distribute_all {
            objective -= sub.total_assignments * weights.total_assignments;
            objective -= sub.priority * weights.slot_priority;
        }

        Evaluation { objective, sub }
    }
}

/// Staged model builder. The driver invokes the stages in order, emitting a
/// progress phase and a timer checkpoint around each.
pub struct ModelBuilder<'a> {
    doc: &'a ScheduleDocument,
    contexts: &'a [SlotContext],
    day_isos: Vec<String>,
    target_day_isos: Vec<String>,
    target_set: BTreeSet<String>,
    day_index_by_iso: BTreeMap<String, usize>,
    day_type_by_iso: BTreeMap<String, DayType>,
    only_fill_required: bool,

    clinician_ids: Vec<String>,
    /// manual items per (clinician_idx, day_idx)
    manual_by_clinician_day: BTreeMap<(usize, usize), Vec<ManualItem>>,
    /// manual count per (day_idx, ctx_idx), including unknown clinicians
    manual_count_by_day_slot: BTreeMap<(usize, usize), i64>,
    rest_slot_ctx: BTreeSet<usize>,

    vars: Vec<VarMeta>,
    vars_by_clinician_day: BTreeMap<(usize, usize), Vec<usize>>,
    vars_by_day_slot: BTreeMap<(usize, usize), Vec<usize>>,
    forced_zero: Vec<bool>,
    conflict_pairs: BTreeSet<(usize, usize)>,

    groups: Vec<SlotDayGroup>,
    total_required: i64,
    gap: GapTerms,
    hours: Vec<HoursTerm>,
    rest_day_conflicts: Vec<String>,
}

impl<'a> ModelBuilder<'a> {
    pub fn new(
        doc: &'a ScheduleDocument,
        contexts: &'a [SlotContext],
        day_isos: Vec<String>,
        target_day_isos: Vec<String>,
        only_fill_required: bool,
    ) -> ModelBuilder<'a> {
        let day_index_by_iso: BTreeMap<String, usize> = day_isos
            .iter()
            .enumerate()
            .map(|(idx, iso)| (iso.clone(), idx))
            .collect();
        let day_type_by_iso: BTreeMap<String, DayType> = day_isos
            .iter()
            .map(|iso| (iso.clone(), day_type_for(iso, &doc.holidays)))
            .collect();
        let target_set: BTreeSet<String> = target_day_isos.iter().cloned().collect();
        let clinician_ids: Vec<String> = doc.clinicians.iter().map(|c| c.id.clone()).collect();
        let clinician_idx_by_id: BTreeMap<&str, usize> = clinician_ids
            .iter()
            .enumerate()
            .map(|(idx, id)| (id.as_str(), idx))
            .collect();
        let ctx_idx_by_slot_id: BTreeMap<&str, usize> = contexts
            .iter()
            .enumerate()
            .map(|(idx, ctx)| (ctx.slot_id.as_str(), idx))
            .collect();

        let rest_section_id = doc.solver_settings.on_call_rest_section_id.as_deref();
        let rest_slot_ctx: BTreeSet<usize> = contexts
            .iter()
            .enumerate()
            .filter(|(_, ctx)| Some(ctx.section_id.as_str()) == rest_section_id)
            .map(|(idx, _)| idx)
            .collect();

        // Fixed inputs: manual assignments on slots within the context
        // horizon, skipping clinicians on vacation that day.
        let mut manual_by_clinician_day: BTreeMap<(usize, usize), Vec<ManualItem>> =
            BTreeMap::new();
        let mut manual_count_by_day_slot: BTreeMap<(usize, usize), i64> = BTreeMap::new();
        for assignment in &doc.assignments {
            if !assignment.is_manual() {
                continue;
            }
            let Some(&ctx_idx) = ctx_idx_by_slot_id.get(assignment.row_id.as_str()) else {
                continue;
            };
            let Some(&day_idx) = day_index_by_iso.get(&assignment.date_iso) else {
                continue;
            };
            if let Some(clinician) = doc.clinician_by_id(&assignment.clinician_id) {
                if clinician.is_on_vacation(&assignment.date_iso) {
                    continue;
                }
            }
            *manual_count_by_day_slot.entry((day_idx, ctx_idx)).or_insert(0) += 1;
            if let Some(&clinician_idx) =
                clinician_idx_by_id.get(assignment.clinician_id.as_str())
            {
                let ctx = &contexts[ctx_idx];
                let base = day_idx as i64 * MINUTES_PER_DAY as i64;
                manual_by_clinician_day
                    .entry((clinician_idx, day_idx))
                    .or_default()
                    .push(ManualItem {
                        start_abs: base + ctx.start_minutes as i64,
                        end_abs: base + ctx.end_minutes as i64,
                        location_id: ctx.location_id.clone(),
                        on_call: rest_slot_ctx.contains(&ctx_idx),
                    });
            }
        }

        ModelBuilder {
            doc,
            contexts,
            day_isos,
            target_day_isos,
            target_set,
            day_index_by_iso,
            day_type_by_iso,
            only_fill_required,
            clinician_ids,
            manual_by_clinician_day,
            manual_count_by_day_slot,
            rest_slot_ctx,
            vars: Vec::new(),
            vars_by_clinician_day: BTreeMap::new(),
            vars_by_day_slot: BTreeMap::new(),
            forced_zero: Vec::new(),
            conflict_pairs: BTreeSet::new(),
            groups: Vec::new(),
            total_required: 0,
            gap: GapTerms::default(),
            hours: Vec::new(),
            rest_day_conflicts: Vec::new(),
        }
    }

    pub fn num_variables(&self) -> usize {
        self.vars.len()
    }

    /// Admission: one variable per (clinician, target date, day-type-matching
    /// slot) where the clinician is off vacation, qualified for the slot's
    /// section, and any mandatory window contains the interval.
    pub fn create_variables(&mut self) {
        let doc = self.doc;
        let contexts = self.contexts;
        let total_slots = contexts.len() as i64;
        let target_days = self.target_day_isos.clone();
        for (clinician_idx, clinician) in doc.clinicians.iter().enumerate() {
            let preference_rank: BTreeMap<&str, i64> = clinician
                .preferred_section_ids
                .iter()
                .enumerate()
                .map(|(rank, section)| {
                    (
                        section.as_str(),
                        (clinician.preferred_section_ids.len() as i64 - rank as i64).max(1),
                    )
                })
                .collect();

            for date_iso in &target_days {
                if clinician.is_on_vacation(date_iso) {
                    continue;
                }
                let Some(&day_idx) = self.day_index_by_iso.get(date_iso) else {
                    continue;
                };
                let day_type = self.day_type_by_iso[date_iso];
                let window = parse_date_iso(date_iso)
                    .map(|date| clinician.working_window(weekday_key(date)))
                    .unwrap_or(WorkingWindow::None);

                for (ctx_idx, ctx) in contexts.iter().enumerate() {
                    if ctx.day_type != day_type {
                        continue;
                    }
                    if !clinician.qualified_section_ids.contains(&ctx.section_id) {
                        continue;
                    }
                    let (fits_window, is_preference, is_mandatory) = match window {
                        WorkingWindow::None => (false, false, false),
                        WorkingWindow::Preference { start, end } => (
                            ctx.start_minutes >= start && ctx.end_minutes <= end,
                            true,
                            false,
                        ),
                        WorkingWindow::Mandatory { start, end } => (
                            ctx.start_minutes >= start && ctx.end_minutes <= end,
                            false,
                            true,
                        ),
                    };
                    if is_mandatory && !fits_window {
                        continue;
                    }

                    let base = day_idx as i64 * MINUTES_PER_DAY as i64;
                    let var_id = self.vars.len();
                    self.vars.push(VarMeta {
                        clinician_idx,
                        day_idx,
                        date_iso: date_iso.clone(),
                        ctx_idx,
                        slot_id: ctx.slot_id.clone(),
                        start_abs: base + ctx.start_minutes as i64,
                        end_abs: base + ctx.end_minutes as i64,
                        location_id: ctx.location_id.clone(),
                        duration_minutes: ctx.duration_minutes() as i64,
                        preference_weight: preference_rank
                            .get(ctx.section_id.as_str())
                            .copied()
                            .unwrap_or(0),
                        window_fit: is_preference && fits_window,
                        on_call: self.rest_slot_ctx.contains(&ctx_idx),
                        order_weight: (total_slots - ctx_idx as i64).max(1) * 10,
                    });
                    self.vars_by_clinician_day
                        .entry((clinician_idx, day_idx))
                        .or_default()
                        .push(var_id);
                    self.vars_by_day_slot
                        .entry((day_idx, ctx_idx))
                        .or_default()
                        .push(var_id);
                }
            }
        }
        self.forced_zero = vec![false; self.vars.len()];
    }

    fn add_conflict(&mut self, a: usize, b: usize) {
        if a == b {
            return;
        }
        let pair = if a < b { (a, b) } else { (b, a) };
        self.conflict_pairs.insert(pair);
    }

    /// No-overlap and same-location-per-day constraints, both between
    /// variables and against fixed manual assignments. Interval checks span
    /// up to three days so cross-midnight shifts conflict with everything
    /// they truly intersect; zero-length intervals never overlap.
    pub fn overlap_constraints(&mut self) {
        let enforce_location = self.doc.solver_settings.enforce_same_location_per_day;
        let clinician_count = self.clinician_ids.len();
        let day_count = self.day_isos.len();

        for clinician_idx in 0..clinician_count {
            for day_idx in 0..day_count {
                let Some(day_vars) = self
                    .vars_by_clinician_day
                    .get(&(clinician_idx, day_idx))
                    .cloned()
                else {
                    continue;
                };

                // Same-day variable pairs: time overlap or location clash.
                for (i, &a) in day_vars.iter().enumerate() {
                    for &b in day_vars.iter().skip(i + 1) {
                        if self.vars_overlap(a, b) {
                            self.add_conflict(a, b);
                        }
                        if enforce_location
                            && !self.vars[a].location_id.is_empty()
                            && !self.vars[b].location_id.is_empty()
                            && self.vars[a].location_id != self.vars[b].location_id
                        {
                            self.add_conflict(a, b);
                        }
                    }
                }

                // Same-day manual items: overlap or location clash forces the
                // variable to zero.
                if let Some(manuals) = self
                    .manual_by_clinician_day
                    .get(&(clinician_idx, day_idx))
                    .cloned()
                {
                    for &var_id in &day_vars {
                        for manual in &manuals {
                            if self.var_manual_overlap(var_id, manual) {
                                self.forced_zero[var_id] = true;
                            }
                            if enforce_location
                                && !self.vars[var_id].location_id.is_empty()
                                && !manual.location_id.is_empty()
                                && self.vars[var_id].location_id != manual.location_id
                            {
                                self.forced_zero[var_id] = true;
                            }
                        }
                    }
                }

                // Cross-day checks within the overlap distance.
                for other_day in
                    day_idx.saturating_sub(MAX_OVERLAP_DAY_DISTANCE as usize)..day_idx
                {
                    if let Some(prev_vars) = self
                        .vars_by_clinician_day
                        .get(&(clinician_idx, other_day))
                        .cloned()
                    {
                        for &a in &day_vars {
                            for &b in &prev_vars {
                                if self.vars_overlap(a, b) {
                                    self.add_conflict(a, b);
                                }
                            }
                        }
                    }
                    if let Some(prev_manuals) = self
                        .manual_by_clinician_day
                        .get(&(clinician_idx, other_day))
                        .cloned()
                    {
                        for &var_id in &day_vars {
                            for manual in &prev_manuals {
                                if self.var_manual_overlap(var_id, manual) {
                                    self.forced_zero[var_id] = true;
                                }
                            }
                        }
                    }
                }
                // Manual items on later days against today's variables.
                for other_day in
                    (day_idx + 1)..=(day_idx + MAX_OVERLAP_DAY_DISTANCE as usize).min(day_count - 1)
                {
                    if let Some(next_manuals) = self
                        .manual_by_clinician_day
                        .get(&(clinician_idx, other_day))
                        .cloned()
                    {
                        for &var_id in &day_vars {
                            for manual in &next_manuals {
                                if self.var_manual_overlap(var_id, manual) {
                                    self.forced_zero[var_id] = true;
                                }
                            }
                        }
                    }
                }
            }
        }
    }

    fn vars_overlap(&self, a: usize, b: usize) -> bool {
        let va = &self.vars[a];
        let vb = &self.vars[b];
        if va.is_zero_length() || vb.is_zero_length() {
            return false;
        }
        !(va.end_abs <= vb.start_abs || vb.end_abs <= va.start_abs)
    }

    fn var_manual_overlap(&self, var_id: usize, manual: &ManualItem) -> bool {
        let var = &self.vars[var_id];
        if var.is_zero_length() || manual.is_zero_length() {
            return false;
        }
        !(var.end_abs <= manual.start_abs || manual.end_abs <= var.start_abs)
    }

    /// Coverage ceilings and floors. In only-fill-required mode the capacity
    /// is exactly the missing count; in distribute-all mode the wave
    /// multiplier allows several full rounds of the base requirement.
    pub fn coverage_constraints(&mut self) {
        let contexts = self.contexts;
        let total_slots = contexts.len() as i64;
        let target_days = self.target_day_isos.clone();

        struct PendingGroup {
            ctx_idx: usize,
            date_iso: String,
            day_idx: usize,
            base_required: i64,
            target: i64,
            already: i64,
            missing: i64,
            order_weight: i64,
        }

        let mut pending: Vec<PendingGroup> = Vec::new();
        for (ctx_idx, ctx) in contexts.iter().enumerate() {
            let order_weight = (total_slots - ctx_idx as i64).max(1) * 10;
            for date_iso in &target_days {
                if self.day_type_by_iso[date_iso] != ctx.day_type {
                    continue;
                }
                let day_idx = self.day_index_by_iso[date_iso];
                let override_delta = self
                    .doc
                    .slot_overrides_by_key
                    .get(&format!("{}__{}", ctx.slot_id, date_iso))
                    .copied()
                    .unwrap_or(0);
                let base_required = ctx.required_slots;
                let target = (base_required + override_delta).max(0);
                self.total_required += target;
                let already = self
                    .manual_count_by_day_slot
                    .get(&(day_idx, ctx_idx))
                    .copied()
                    .unwrap_or(0);
                let missing = (target - already).max(0);
                pending.push(PendingGroup {
                    ctx_idx,
                    date_iso: date_iso.clone(),
                    day_idx,
                    base_required,
                    target,
                    already,
                    missing,
                    order_weight,
                });
            }
        }

        // Wave multiplier: how many full rounds of the base requirement the
        // eligible clinician pool supports in distribute-all mode.
        let wave_multiplier = if self.only_fill_required {
            1
        } else {
            let eligible: BTreeSet<usize> =
                self.vars.iter().map(|v| v.clinician_idx).collect();
            let total_base: i64 = pending
                .iter()
                .filter(|g| g.base_required > 0)
                .map(|g| g.base_required)
                .sum();
            if total_base > 0 {
                (eligible.len() as i64 / total_base).max(1)
            } else {
                1
            }
        };

        for group in pending {
            let var_ids = self
                .vars_by_day_slot
                .get(&(group.day_idx, group.ctx_idx))
                .cloned()
                .unwrap_or_default();
            let capacity = if self.only_fill_required {
                group.missing
            } else {
                (group.base_required * wave_multiplier - group.already).max(group.missing)
            };
            self.groups.push(SlotDayGroup {
                ctx_idx: group.ctx_idx,
                date_iso: group.date_iso,
                var_ids,
                manual_count: group.already,
                base_required: group.base_required,
                target: group.target,
                missing: group.missing,
                capacity,
                order_weight: group.order_weight,
            });
        }
    }

    /// On-call rest days: an on-call shift on day `d` blocks all assignments
    /// in the configured before/after window. Manual on-call days force
    /// nearby variables to zero; variable on-call days become pairwise
    /// incompatibilities. Manual-on-manual violations are only reported.
    pub fn on_call_rest_days(&mut self) {
        let settings = &self.doc.solver_settings;
        let rest_before = settings.on_call_rest_days_before.max(0) as usize;
        let rest_after = settings.on_call_rest_days_after.max(0) as usize;
        let active = settings.on_call_rest_enabled
            && !self.rest_slot_ctx.is_empty()
            && (rest_before > 0 || rest_after > 0);
        if !active {
            return;
        }
        let day_count = self.day_isos.len();

        // Pre-check: manual on-call next to other manual assignments.
        let mut conflicts: Vec<String> = Vec::new();
        for ((clinician_idx, day_idx), manuals) in &self.manual_by_clinician_day {
            if !manuals.iter().any(|m| m.on_call) {
                continue;
            }
            let mut checks: Vec<(usize, &str)> = Vec::new();
            for offset in 1..=rest_before {
                if *day_idx >= offset {
                    checks.push((day_idx - offset, "rest day before"));
                }
            }
            for offset in 1..=rest_after {
                if day_idx + offset < day_count {
                    checks.push((day_idx + offset, "rest day after"));
                }
            }
            for (check_idx, label) in checks {
                let occupied = self
                    .manual_by_clinician_day
                    .get(&(*clinician_idx, check_idx))
                    .map(|m| !m.is_empty())
                    .unwrap_or(false);
                if occupied {
                    conflicts.push(format!(
                        "{}: on-call {} but assigned on {} ({})",
                        self.clinician_ids[*clinician_idx],
                        self.day_isos[*day_idx],
                        self.day_isos[check_idx],
                        label,
                    ));
                }
            }
        }
        self.rest_day_conflicts.extend(conflicts);

        for clinician_idx in 0..self.clinician_ids.len() {
            for day_idx in 0..day_count {
                let manual_on_call = self
                    .manual_by_clinician_day
                    .get(&(clinician_idx, day_idx))
                    .map(|items| items.iter().any(|m| m.on_call))
                    .unwrap_or(false);
                let on_call_vars: Vec<usize> = self
                    .vars_by_clinician_day
                    .get(&(clinician_idx, day_idx))
                    .map(|vars| {
                        vars.iter()
                            .copied()
                            .filter(|&v| self.vars[v].on_call)
                            .collect()
                    })
                    .unwrap_or_default();
                if !manual_on_call && on_call_vars.is_empty() {
                    continue;
                }

                let mut window_days: Vec<usize> = Vec::new();
                for offset in 1..=rest_before {
                    if day_idx >= offset {
                        window_days.push(day_idx - offset);
                    }
                }
                for offset in 1..=rest_after {
                    if day_idx + offset < day_count {
                        window_days.push(day_idx + offset);
                    }
                }

                for target_idx in window_days {
                    let target_date = &self.day_isos[target_idx];
                    if !self.target_set.contains(target_date) {
                        continue;
                    }
                    let target_vars: Vec<usize> = self
                        .vars_by_clinician_day
                        .get(&(clinician_idx, target_idx))
                        .cloned()
                        .unwrap_or_default();
                    let manual_on_target = self
                        .manual_by_clinician_day
                        .get(&(clinician_idx, target_idx))
                        .map(|items| !items.is_empty())
                        .unwrap_or(false);

                    if manual_on_call {
                        if manual_on_target {
                            // Already conflicting manuals, reported above.
                            continue;
                        }
                        for var_id in target_vars {
                            self.forced_zero[var_id] = true;
                        }
                        continue;
                    }

                    if manual_on_target {
                        for &on_call_var in &on_call_vars {
                            self.forced_zero[on_call_var] = true;
                        }
                        continue;
                    }
                    for &on_call_var in &on_call_vars {
                        for &target_var in &target_vars {
                            self.add_conflict(on_call_var, target_var);
                        }
                    }
                }
            }
        }
    }

    /// Working-hours penalty terms: target minutes scaled to the solved
    /// range, quantized into 15-minute blocks at evaluation.
    pub fn working_hours_terms(&mut self) {
        let doc = self.doc;
        let total_days = self.target_day_isos.len();
        if total_days == 0 {
            return;
        }
        let scale = total_days as f64 / 7.0;
        let settings_tolerance = doc.solver_settings.working_hours_tolerance_hours;

        for (clinician_idx, clinician) in doc.clinicians.iter().enumerate() {
            let Some(hours_per_week) = clinician.working_hours_per_week else {
                continue;
            };
            if hours_per_week <= 0.0 {
                continue;
            }
            let tolerance_hours = clinician
                .working_hours_tolerance_hours
                .unwrap_or(settings_tolerance)
                .max(0);
            let target_minutes = (hours_per_week * 60.0 * scale).round() as i64;
            let tolerance_minutes = (tolerance_hours as f64 * 60.0 * scale).round() as i64;
            if target_minutes <= 0 && tolerance_minutes <= 0 {
                continue;
            }

            let manual_minutes: i64 = self
                .manual_by_clinician_day
                .iter()
                .filter(|((c, day_idx), _)| {
                    *c == clinician_idx && self.target_set.contains(&self.day_isos[*day_idx])
                })
                .flat_map(|(_, items)| items.iter())
                .map(|item| (item.end_abs - item.start_abs).max(0))
                .sum();

            self.hours.push(HoursTerm {
                clinician_idx,
                manual_minutes,
                target_minus_tolerance: (target_minutes - tolerance_minutes).max(0),
                target_plus_tolerance: target_minutes + tolerance_minutes,
            });
        }
    }

    /// Gap-penalty pairs for the continuous-shift preference. Two same-day
    /// items leave a gap when they neither overlap nor touch; touching at the
    /// same location is "adjacent" and free.
    pub fn gap_terms(&mut self) {
        if !self.doc.solver_settings.prefer_continuous_shifts {
            return;
        }
        let strict_gap = |a_start: i64, a_end: i64, b_start: i64, b_end: i64| -> bool {
            a_end < b_start || b_end < a_start
        };

        let target_days = self.target_day_isos.clone();
        for clinician_idx in 0..self.clinician_ids.len() {
            for date_iso in &target_days {
                let day_idx = self.day_index_by_iso[date_iso];
                let day_vars: Vec<usize> = self
                    .vars_by_clinician_day
                    .get(&(clinician_idx, day_idx))
                    .map(|vars| {
                        vars.iter()
                            .copied()
                            .filter(|&v| !self.vars[v].is_zero_length())
                            .collect()
                    })
                    .unwrap_or_default();
                let manuals: Vec<ManualItem> = self
                    .manual_by_clinician_day
                    .get(&(clinician_idx, day_idx))
                    .map(|items| {
                        items
                            .iter()
                            .filter(|m| !m.is_zero_length())
                            .cloned()
                            .collect()
                    })
                    .unwrap_or_default();

                for (i, &a) in day_vars.iter().enumerate() {
                    for &b in day_vars.iter().skip(i + 1) {
                        let (va, vb) = (&self.vars[a], &self.vars[b]);
                        if strict_gap(va.start_abs, va.end_abs, vb.start_abs, vb.end_abs) {
                            self.gap.var_var.push((a, b));
                        }
                    }
                }

                for &var_id in &day_vars {
                    let var = &self.vars[var_id];
                    for manual in &manuals {
                        if strict_gap(var.start_abs, var.end_abs, manual.start_abs, manual.end_abs)
                        {
                            self.gap.var_manual.push(var_id);
                        }
                    }
                }

                for (i, first) in manuals.iter().enumerate() {
                    for second in manuals.iter().skip(i + 1) {
                        if !strict_gap(
                            first.start_abs,
                            first.end_abs,
                            second.start_abs,
                            second.end_abs,
                        ) {
                            continue;
                        }
                        let (earlier, later) = if first.end_abs < second.start_abs {
                            (first, second)
                        } else {
                            (second, first)
                        };
                        let bridging_vars: Vec<usize> = day_vars
                            .iter()
                            .copied()
                            .filter(|&v| {
                                let var = &self.vars[v];
                                var.start_abs == earlier.end_abs
                                    && var.end_abs == later.start_abs
                                    && var.location_id == earlier.location_id
                                    && var.location_id == later.location_id
                            })
                            .collect();
                        self.gap.manual_manual.push(ManualGap { bridging_vars });
                    }
                }
            }
        }
    }

    pub fn finish(self) -> SolverModel {
        let mut conflicts = vec![Vec::new(); self.vars.len()];
        for (a, b) in &self.conflict_pairs {
            conflicts[*a].push(*b);
            conflicts[*b].push(*a);
        }

        let mut var_group = vec![usize::MAX; self.vars.len()];
        for (group_idx, group) in self.groups.iter().enumerate() {
            for &var_id in &group.var_ids {
                var_group[var_id] = group_idx;
            }
        }

        let settings = &self.doc.solver_settings;
        let rest_days_before = settings.on_call_rest_days_before.max(0) as usize;
        let rest_days_after = settings.on_call_rest_days_after.max(0) as usize;
        let rest_feature_active = settings.on_call_rest_enabled
            && !self.rest_slot_ctx.is_empty()
            && (rest_days_before > 0 || rest_days_after > 0);

        let manual_days: BTreeSet<(usize, usize)> =
            self.manual_by_clinician_day.keys().copied().collect();
        let manual_on_call_days: BTreeSet<(usize, usize)> = self
            .manual_by_clinician_day
            .iter()
            .filter(|(_, items)| items.iter().any(|m| m.on_call))
            .map(|(key, _)| *key)
            .collect();

        SolverModel {
            vars: self.vars,
            forced_zero: self.forced_zero,
            conflicts,
            groups: self.groups,
            var_group,
            gap: self.gap,
            hours: self.hours,
            weights: SolverWeights::from_settings(settings),
            distribute_all: !self.only_fill_required,
            clinician_ids: self.clinician_ids,
            num_days: self.target_day_isos.len(),
            num_slots: self.contexts.len(),
            total_required: self.total_required,
            rest_day_conflicts: self.rest_day_conflicts,
            day_isos: self.day_isos,
            target_set: self.target_set,
            rest_feature_active,
            rest_days_before,
            rest_days_after,
            manual_days,
            manual_on_call_days,
        }
    }
}
