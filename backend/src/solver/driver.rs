//! Solve entry point.
//!
//! Orchestrates one solve: date-horizon setup, the ten preparation/solve
//! phases with timer checkpoints, search execution, result interpretation
//! with diagnostics and sub-scores, and the week-by-week fallback for long
//! infeasible ranges. This function takes no locks; serialization of
//! concurrent solves is the `SolverHost`'s job, which keeps the fallback's
//! re-entry here deadlock-free.

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::NaiveDate;

use crate::api::{
    ProgressEvent, SolveRequest, SolveResponse, SolutionTime, SolverDebugInfo, SolverSubScores,
};
use crate::models::state::{Assignment, AssignmentSource, ScheduleDocument};
use crate::models::time::{format_date_iso, parse_date_iso};

use super::context::collect_slot_contexts;
use super::engine::{solve_model, SearchStatus};
use super::model::{ModelBuilder, SolverModel};
use super::timer::SolveTimer;
use super::SolveError;

/// Shared handles a solve runs under: cancellation, progress emission, and
/// the originating request's clock for budget accounting.
#[derive(Clone)]
pub struct SolveContext {
    pub cancel: Arc<AtomicBool>,
    pub progress: Arc<dyn Fn(ProgressEvent) + Send + Sync>,
    pub request_start: Instant,
    pub cpu_workers: usize,
    pub cpu_cores: usize,
}

impl SolveContext {
    pub fn new() -> SolveContext {
        SolveContext::with_progress(Arc::new(|_| {}))
    }

    pub fn with_progress(progress: Arc<dyn Fn(ProgressEvent) + Send + Sync>) -> SolveContext {
        let cores = num_cpus::get();
        SolveContext {
            cancel: Arc::new(AtomicBool::new(false)),
            progress,
            request_start: Instant::now(),
            // Leave two cores free for the rest of the process.
            cpu_workers: cores.saturating_sub(2).max(1),
            cpu_cores: cores,
        }
    }

    fn emit_phase(&self, phase: &str, label: &str) {
        (self.progress)(ProgressEvent::Phase {
            phase: phase.to_string(),
            label: label.to_string(),
        });
    }
}

impl Default for SolveContext {
    fn default() -> Self {
        Self::new()
    }
}

/// Solve the requested range against a normalized document. Falls back to
/// week-by-week solving when the full range fails and spans more than two
/// weeks.
pub fn solve_range(
    doc: &ScheduleDocument,
    request: &SolveRequest,
    ctx: &SolveContext,
    timer: &mut SolveTimer,
) -> Result<SolveResponse, SolveError> {
    let range_start = parse_date_iso(&request.start_iso)
        .ok_or_else(|| SolveError::InvalidRange("Invalid startISO".to_string()))?;
    let range_end = match &request.end_iso {
        Some(end_iso) => parse_date_iso(end_iso)
            .ok_or_else(|| SolveError::InvalidRange("Invalid endISO".to_string()))?,
        None => range_start + chrono::Duration::days(6),
    };
    if range_end < range_start {
        return Err(SolveError::InvalidRange("Invalid endISO".to_string()));
    }
    let timeout_seconds = request.timeout_seconds();

    let (response, status) = solve_single(
        doc,
        range_start,
        range_end,
        request.only_fill_required,
        timeout_seconds,
        ctx,
        timer,
    );
    if status.is_solution() {
        return Ok(response);
    }

    let total_days = (range_end - range_start).num_days() + 1;
    if total_days <= 14 {
        return Ok(response);
    }

    // Long infeasible ranges are replayed one week at a time.
    let mut week_notes = vec![format!(
        "Full-range solver failed after {:.0}ms. Trying week-by-week...",
        timer.total_ms()
    )];
    let mut week_assignments: Vec<Assignment> = Vec::new();
    let mut week_success = true;
    let mut cursor = range_start;
    let mut week_num = 0;
    while cursor <= range_end {
        week_num += 1;
        let week_end = (cursor + chrono::Duration::days(6)).min(range_end);
        let mut week_timer = SolveTimer::new();
        let (week_response, week_status) = solve_single(
            doc,
            cursor,
            week_end,
            request.only_fill_required,
            timeout_seconds,
            ctx,
            &mut week_timer,
        );
        if week_status.is_solution() {
            if let Some(timing_note) = week_response
                .notes
                .iter()
                .find(|n| n.contains("completed in"))
            {
                week_notes.push(format!("Week {week_num}: {timing_note}"));
            }
            week_assignments.extend(week_response.assignments);
        } else {
            week_notes.push(format!(
                "Week {week_num} ({} to {}): No solution found.",
                format_date_iso(cursor),
                format_date_iso(week_end)
            ));
            week_success = false;
        }
        cursor = week_end + chrono::Duration::days(1);
    }

    if week_success && !week_assignments.is_empty() {
        week_notes.push(format!(
            "Week-by-week solving completed successfully with {} assignments.",
            week_assignments.len()
        ));
        Ok(SolveResponse {
            start_iso: format_date_iso(range_start),
            end_iso: format_date_iso(range_end),
            assignments: week_assignments,
            notes: week_notes,
            debug_info: None,
        })
    } else {
        week_notes.push("Week-by-week solving also failed.".to_string());
        let mut notes = vec!["No solution".to_string()];
        notes.extend(week_notes);
        Ok(SolveResponse {
            start_iso: format_date_iso(range_start),
            end_iso: format_date_iso(range_end),
            assignments: week_assignments,
            notes,
            debug_info: None,
        })
    }
}

fn solve_single(
    doc: &ScheduleDocument,
    range_start: NaiveDate,
    range_end: NaiveDate,
    only_fill_required: bool,
    timeout_seconds: f64,
    ctx: &SolveContext,
    timer: &mut SolveTimer,
) -> (SolveResponse, SearchStatus) {
    let start_iso = format_date_iso(range_start);
    let end_iso = format_date_iso(range_end);

    // Context horizon of one extra day on each side for cross-midnight
    // overlap and rest-day checks against manual assignments.
    let mut day_isos = Vec::new();
    let mut cursor = range_start - chrono::Duration::days(1);
    while cursor <= range_end + chrono::Duration::days(1) {
        day_isos.push(format_date_iso(cursor));
        cursor += chrono::Duration::days(1);
    }
    let mut target_day_isos = Vec::new();
    let mut cursor = range_start;
    while cursor <= range_end {
        target_day_isos.push(format_date_iso(cursor));
        cursor += chrono::Duration::days(1);
    }
    timer.checkpoint("date_setup");

    ctx.emit_phase(
        "slot_contexts",
        "Preparation (2/10): Analyzing shift patterns...",
    );
    let contexts = collect_slot_contexts(doc);
    timer.checkpoint("slot_contexts");

    ctx.emit_phase(
        "create_variables",
        "Preparation (3/10): Setting up assignment options...",
    );
    let mut builder = ModelBuilder::new(
        doc,
        &contexts,
        day_isos,
        target_day_isos.clone(),
        only_fill_required,
    );
    builder.create_variables();
    timer.checkpoint("create_variables");

    // When nothing was admitted, explain why before solving.
    let mut admission_diagnostics: Vec<String> = Vec::new();
    if builder.num_variables() == 0 {
        let total_clinicians = doc.clinicians.len();
        let fully_on_vacation = doc
            .clinicians
            .iter()
            .filter(|c| target_day_isos.iter().all(|d| c.is_on_vacation(d)))
            .count();
        let slot_sections: BTreeSet<&str> =
            contexts.iter().map(|c| c.section_id.as_str()).collect();
        admission_diagnostics.push("No assignment variables created.".to_string());
        admission_diagnostics.push(format!(
            "Clinicians: {total_clinicians} total, {fully_on_vacation} fully on vacation."
        ));
        admission_diagnostics.push(format!(
            "Slots: {} total across {} sections.",
            contexts.len(),
            slot_sections.len()
        ));
        let total_qualifications: usize = doc
            .clinicians
            .iter()
            .map(|c| c.qualified_section_ids.len())
            .sum();
        if total_qualifications == 0 {
            admission_diagnostics
                .push("No clinicians have any section qualifications.".to_string());
        } else {
            let clinician_sections: BTreeSet<&str> = doc
                .clinicians
                .iter()
                .flat_map(|c| c.qualified_section_ids.iter())
                .map(String::as_str)
                .collect();
            if slot_sections.is_disjoint(&clinician_sections) {
                admission_diagnostics.push(format!(
                    "No overlap between slot sections [{}] and clinician qualifications [{}].",
                    slot_sections.iter().copied().collect::<Vec<_>>().join(", "),
                    clinician_sections
                        .iter()
                        .copied()
                        .collect::<Vec<_>>()
                        .join(", ")
                ));
            }
        }
    }

    ctx.emit_phase(
        "overlap_constraints",
        "Preparation (4/10): Adding schedule conflict rules...",
    );
    builder.overlap_constraints();
    timer.checkpoint("overlap_constraints");

    ctx.emit_phase(
        "coverage_constraints",
        "Preparation (5/10): Applying staffing requirements...",
    );
    builder.coverage_constraints();
    timer.checkpoint("coverage_constraints");

    ctx.emit_phase(
        "on_call_rest_days",
        "Preparation (6/10): Setting up on-call rest rules...",
    );
    builder.on_call_rest_days();
    timer.checkpoint("on_call_rest_days");

    ctx.emit_phase(
        "working_hours_constraints",
        "Preparation (7/10): Balancing working hours...",
    );
    builder.working_hours_terms();
    timer.checkpoint("working_hours_constraints");

    ctx.emit_phase(
        "gap_penalty_constraints",
        "Preparation (8/10): Grouping consecutive shifts...",
    );
    builder.gap_terms();
    timer.checkpoint("gap_penalty_constraints");

    ctx.emit_phase(
        "objective_setup",
        "Preparation (9/10): Finalizing optimization goals...",
    );
    let model = builder.finish();
    timer.checkpoint("objective_setup");

    ctx.emit_phase("solve", "Preparation (10/10): Solving constraints...");
    let remaining_seconds =
        (timeout_seconds - ctx.request_start.elapsed().as_secs_f64()).max(1.0);
    let deadline = Instant::now() + Duration::from_secs_f64(remaining_seconds);

    let progress = Arc::clone(&ctx.progress);
    let cancel = Arc::clone(&ctx.cancel);
    let model_ref = &model;
    let callback = move |solution_num: usize, time_ms: f64, objective: i64, assigned: &[bool]| {
        let assignments = extract_assignments(model_ref, assigned, None);
        progress(ProgressEvent::Solution {
            solution_num,
            time_ms: (time_ms * 10.0).round() / 10.0,
            objective,
            assignments,
        });
        !cancel.load(Ordering::SeqCst)
    };
    let outcome = solve_model(
        &model,
        deadline,
        ctx.cancel.as_ref(),
        ctx.cpu_workers,
        &callback,
    );
    timer.checkpoint("solve");

    let solution_times: Vec<SolutionTime> = outcome
        .solution_times
        .iter()
        .map(|record| SolutionTime {
            solution: record.solution,
            time_ms: (record.time_ms * 10.0).round() / 10.0,
            objective: record.objective,
        })
        .collect();

    if !outcome.status.is_solution() {
        let mut diagnostics = admission_diagnostics;
        diagnostics.push("No feasible assignment found.".to_string());
        diagnostics.push(format!(
            "Variables: {} assignment options.",
            model.vars.len()
        ));
        if !model.vars.is_empty() {
            let clinicians: BTreeSet<usize> =
                model.vars.iter().map(|v| v.clinician_idx).collect();
            let dates: BTreeSet<&str> = model.vars.iter().map(|v| v.date_iso.as_str()).collect();
            let slots: BTreeSet<&str> = model.vars.iter().map(|v| v.slot_id.as_str()).collect();
            diagnostics.push(format!(
                "Clinicians with options: {}, Dates: {}, Slots: {}.",
                clinicians.len(),
                dates.len(),
                slots.len()
            ));
        }
        if doc.solver_settings.on_call_rest_enabled {
            diagnostics.push(format!(
                "On-call rest days enabled: {} before, {} after.",
                model.rest_days_before, model.rest_days_after
            ));
            for (clinician_idx, day_idx) in &model.manual_on_call_days {
                diagnostics.push(format!(
                    "Manual on-call assignment: clinician {} on {}.",
                    model.clinician_ids[*clinician_idx], model.day_isos[*day_idx]
                ));
            }
        }
        if doc.solver_settings.enforce_same_location_per_day {
            diagnostics.push("Enforce same location per day: enabled.".to_string());
        }
        if !model.rest_day_conflicts.is_empty() {
            diagnostics.push("MANUAL ASSIGNMENT CONFLICTS DETECTED:".to_string());
            for conflict in model.rest_day_conflicts.iter().take(10) {
                diagnostics.push(format!("  - {conflict}"));
            }
            if model.rest_day_conflicts.len() > 10 {
                diagnostics.push(format!(
                    "  ... and {} more conflicts",
                    model.rest_day_conflicts.len() - 10
                ));
            }
        }
        diagnostics.push(format!("Solver status: {}", outcome.status.as_str()));
        diagnostics.push(format!(
            "Total time: {:.0}ms (budget: {}s, solver limit: {:.1}s)",
            timer.total_ms(),
            timeout_seconds,
            remaining_seconds
        ));
        if outcome.status == SearchStatus::Unknown && !outcome.was_aborted {
            diagnostics.push(
                "Solver timed out. Problem may be too large or have complex constraints."
                    .to_string(),
            );
        }

        let mut notes = vec!["No solution".to_string()];
        notes.extend(diagnostics);
        let response = SolveResponse {
            start_iso,
            end_iso,
            assignments: Vec::new(),
            notes,
            debug_info: Some(SolverDebugInfo {
                timing: timer.timing(),
                solution_times,
                num_variables: model.vars.len(),
                num_days: model.num_days,
                num_slots: model.num_slots,
                solver_status: if outcome.was_aborted {
                    "ABORTED".to_string()
                } else {
                    outcome.status.as_str().to_string()
                },
                cpu_workers_used: ctx.cpu_workers,
                cpu_cores_available: ctx.cpu_cores,
                sub_scores: None,
            }),
        };
        return (response, outcome.status);
    }

    let best = outcome.best.as_ref().expect("solution status implies best");
    let new_assignments =
        extract_assignments(&model, &best.assigned, Some(AssignmentSource::Solver));
    let evaluation = model.evaluate(&best.assigned);

    let mut notes: Vec<String> = Vec::new();
    if !model.rest_day_conflicts.is_empty() {
        notes.push(format!(
            "WARNING: {} manual assignment(s) violate on-call rest day rules.",
            model.rest_day_conflicts.len()
        ));
    }
    if boundary_rest_conflicts(&model, &best.assigned) {
        notes.push(
            "Rest day conflicts outside the selected range; some boundary days are already assigned."
                .to_string(),
        );
    }
    if evaluation.sub.slack > 0 {
        notes.push("Could not fill all required slots.".to_string());
    }
    if only_fill_required && model.total_required == 0 {
        notes.push("No required slots detected for the selected timeframe.".to_string());
    }
    timer.checkpoint("result_extraction");
    notes.push(format!("Solver completed in {:.0}ms.", timer.total_ms()));
    if outcome.was_aborted {
        notes.push("Solver was aborted by user request.".to_string());
    }

    let sub_scores = SolverSubScores {
        slots_filled: evaluation.sub.covered,
        slots_unfilled: evaluation.sub.slack,
        total_assignments: new_assignments.len() as i64,
        preference_score: evaluation.sub.preference,
        time_window_score: evaluation.sub.time_window,
        gap_penalty: evaluation.sub.gap,
        hours_penalty: evaluation.sub.hours_blocks,
    };

    let response = SolveResponse {
        start_iso,
        end_iso,
        assignments: new_assignments,
        notes,
        debug_info: Some(SolverDebugInfo {
            timing: timer.timing(),
            solution_times,
            num_variables: model.vars.len(),
            num_days: model.num_days,
            num_slots: model.num_slots,
            solver_status: if outcome.was_aborted {
                "ABORTED".to_string()
            } else {
                outcome.status.as_str().to_string()
            },
            cpu_workers_used: ctx.cpu_workers,
            cpu_cores_available: ctx.cpu_cores,
            sub_scores: Some(sub_scores),
        }),
    };
    (response, outcome.status)
}

fn extract_assignments(
    model: &SolverModel,
    assigned: &[bool],
    source: Option<AssignmentSource>,
) -> Vec<Assignment> {
    model
        .vars
        .iter()
        .enumerate()
        .filter(|(var_id, _)| assigned[*var_id])
        .map(|(_, meta)| Assignment {
            id: format!(
                "as-{}-{}-{}",
                meta.date_iso, model.clinician_ids[meta.clinician_idx], meta.slot_id
            ),
            row_id: meta.slot_id.clone(),
            date_iso: meta.date_iso.clone(),
            clinician_id: model.clinician_ids[meta.clinician_idx].clone(),
            source,
        })
        .collect()
}

/// True when an on-call day inside the range has manual assignments on rest
/// days that fall outside it (which the solver cannot clear).
fn boundary_rest_conflicts(model: &SolverModel, assigned: &[bool]) -> bool {
    if !model.rest_feature_active {
        return false;
    }
    let mut on_call_days: BTreeSet<(usize, usize)> = model
        .manual_on_call_days
        .iter()
        .filter(|(_, day_idx)| model.target_set.contains(&model.day_isos[*day_idx]))
        .copied()
        .collect();
    for (var_id, meta) in model.vars.iter().enumerate() {
        if assigned[var_id] && meta.on_call {
            on_call_days.insert((meta.clinician_idx, meta.day_idx));
        }
    }

    for (clinician_idx, day_idx) in on_call_days {
        let mut window: Vec<usize> = Vec::new();
        for offset in 1..=model.rest_days_before {
            if day_idx >= offset {
                window.push(day_idx - offset);
            }
        }
        for offset in 1..=model.rest_days_after {
            if day_idx + offset < model.day_isos.len() {
                window.push(day_idx + offset);
            }
        }
        for target_idx in window {
            if model.target_set.contains(&model.day_isos[target_idx]) {
                continue;
            }
            if model.manual_days.contains(&(clinician_idx, target_idx)) {
                return true;
            }
        }
    }
    false
}
