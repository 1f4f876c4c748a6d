//! Preference and soft-constraint behavior: working-time windows, section
//! preferences, working-hours balancing, on-call rest days, gap penalty.

mod support;

use shiftplan_rust::api::SolveRequest;
use shiftplan_rust::models::state::{
    ScheduleDocument, SolverSettings, WorkingTimeRequirement,
};
use shiftplan_rust::models::time::DayType;
use shiftplan_rust::normalize::normalize;
use shiftplan_rust::solver::{solve_range, SolveContext, SolveTimer};

use support::*;

fn solve(
    doc: ScheduleDocument,
    start_iso: &str,
    end_iso: &str,
) -> shiftplan_rust::api::SolveResponse {
    let (doc, _) = normalize(doc);
    let request = SolveRequest {
        start_iso: start_iso.to_string(),
        end_iso: Some(end_iso.to_string()),
        only_fill_required: true,
        timeout_seconds: Some(10.0),
    };
    let ctx = SolveContext::new();
    let mut timer = SolveTimer::new();
    solve_range(&doc, &request, &ctx, &mut timer).expect("solve succeeds")
}

#[test]
fn test_mandatory_window_restricts_to_fitting_slots() {
    let mut clinician = make_clinician("clin-a", &["section-a"]);
    clinician.preferred_working_times.insert(
        "mon".to_string(),
        working_time("09:00", "12:00", WorkingTimeRequirement::Mandatory),
    );
    let doc = build_solver_doc(
        vec![clinician],
        vec![
            make_slot("slot-a", "col-mon-1", 1, "09:00", "11:00"),
            make_slot("slot-b", "col-mon-2", 1, "13:00", "15:00"),
        ],
        vec![
            mon_col_band(),
            make_col_band("col-mon-2", 2, DayType::Mon),
        ],
        plain_settings(),
    );

    let response = solve(doc, "2026-01-05", "2026-01-05");
    let assigned: Vec<&str> = response
        .assignments
        .iter()
        .map(|a| a.row_id.as_str())
        .collect();
    assert!(assigned.contains(&"slot-a"));
    assert!(!assigned.contains(&"slot-b"));
}

#[test]
fn test_mandatory_window_excluding_only_slot_is_infeasible() {
    let mut clinician = make_clinician("clin-a", &["section-a"]);
    clinician.preferred_working_times.insert(
        "mon".to_string(),
        working_time("09:00", "12:00", WorkingTimeRequirement::Mandatory),
    );
    let doc = build_solver_doc(
        vec![clinician],
        vec![make_slot("slot-b", "col-mon-1", 1, "13:00", "15:00")],
        vec![mon_col_band()],
        plain_settings(),
    );

    let response = solve(doc, "2026-01-05", "2026-01-05");
    assert!(response.assignments.is_empty());
    assert!(response
        .notes
        .iter()
        .any(|n| n.contains("No feasible assignment found")));
    let debug = response.debug_info.expect("debug info");
    assert_ne!(debug.solver_status, "OPTIMAL");
    assert_ne!(debug.solver_status, "FEASIBLE");
}

#[test]
fn test_preference_window_steers_choice() {
    // clin-b is listed first and even prefers the section; the time-window
    // reward (weight 5) outweighs the section preference (weight 1).
    let mut clin_b = make_clinician("clin-b", &["section-a"]);
    clin_b.preferred_section_ids.push("section-a".to_string());
    let mut clin_a = make_clinician("clin-a", &["section-a"]);
    clin_a.preferred_working_times.insert(
        "mon".to_string(),
        working_time("08:00", "12:00", WorkingTimeRequirement::Preference),
    );
    let doc = build_solver_doc(
        vec![clin_b, clin_a],
        vec![make_slot("slot-a", "col-mon-1", 1, "09:00", "11:00")],
        vec![mon_col_band()],
        plain_settings(),
    );

    let response = solve(doc, "2026-01-05", "2026-01-05");
    assert_eq!(response.assignments.len(), 1);
    assert_eq!(response.assignments[0].clinician_id, "clin-a");
    let sub = response
        .debug_info
        .and_then(|d| d.sub_scores)
        .expect("sub scores");
    assert_eq!(sub.time_window_score, 1);
}

#[test]
fn test_section_preference_steers_choice() {
    let mut clin_b = make_clinician("clin-b", &["section-a"]);
    clin_b.preferred_section_ids.push("section-a".to_string());
    let clin_a = make_clinician("clin-a", &["section-a"]);
    let doc = build_solver_doc(
        vec![clin_a, clin_b],
        vec![make_slot("slot-a", "col-mon-1", 1, "09:00", "11:00")],
        vec![mon_col_band()],
        plain_settings(),
    );

    let response = solve(doc, "2026-01-05", "2026-01-05");
    assert_eq!(response.assignments.len(), 1);
    assert_eq!(response.assignments[0].clinician_id, "clin-b");
}

#[test]
fn test_working_hours_balance_distributes_slots() {
    let mut clin_a = make_clinician("clin-a", &["section-a"]);
    clin_a.working_hours_per_week = Some(7.0);
    clin_a.working_hours_tolerance_hours = Some(0);
    let mut clin_b = make_clinician("clin-b", &["section-a"]);
    clin_b.working_hours_per_week = Some(7.0);
    clin_b.working_hours_tolerance_hours = Some(0);

    let doc = build_solver_doc(
        vec![clin_a, clin_b],
        vec![
            make_slot("slot-a", "col-mon-1", 1, "08:00", "09:00"),
            make_slot("slot-b", "col-mon-2", 1, "09:00", "10:00"),
        ],
        vec![
            mon_col_band(),
            make_col_band("col-mon-2", 2, DayType::Mon),
        ],
        SolverSettings {
            enforce_same_location_per_day: false,
            on_call_rest_enabled: false,
            prefer_continuous_shifts: false,
            working_hours_tolerance_hours: 0,
            ..SolverSettings::default()
        },
    );

    let response = solve(doc, "2026-01-05", "2026-01-05");
    assert_eq!(response.assignments.len(), 2);
    let mut per_clinician = std::collections::BTreeMap::new();
    for assignment in &response.assignments {
        *per_clinician
            .entry(assignment.clinician_id.clone())
            .or_insert(0) += 1;
    }
    assert_eq!(per_clinician.get("clin-a"), Some(&1));
    assert_eq!(per_clinician.get("clin-b"), Some(&1));
}

#[test]
fn test_on_call_rest_day_blocks_day_before() {
    let doc = {
        let mut doc = build_solver_doc(
            vec![make_clinician("clin-1", &["section-a"])],
            vec![
                make_slot("slot-mon", "col-mon-1", 1, "08:00", "16:00"),
                make_slot("slot-tue", "col-tue-1", 1, "08:00", "16:00"),
            ],
            all_day_col_bands(),
            SolverSettings {
                enforce_same_location_per_day: false,
                on_call_rest_enabled: true,
                on_call_rest_section_id: Some("section-a".to_string()),
                on_call_rest_days_before: 1,
                on_call_rest_days_after: 0,
                prefer_continuous_shifts: false,
                ..SolverSettings::default()
            },
        );
        // Manual on-call shift on Tuesday.
        doc.assignments.push(manual_assignment(
            "manual-tue",
            "slot-tue",
            "2026-01-06",
            "clin-1",
        ));
        doc
    };

    let response = solve(doc, "2026-01-05", "2026-01-06");
    let monday: Vec<_> = response
        .assignments
        .iter()
        .filter(|a| a.date_iso == "2026-01-05")
        .collect();
    assert!(monday.is_empty(), "Monday must stay free before the on-call day");
}

#[test]
fn test_on_call_rest_day_blocks_day_after() {
    let doc = {
        let mut doc = build_solver_doc(
            vec![make_clinician("clin-1", &["section-a"])],
            vec![
                make_slot("slot-mon", "col-mon-1", 1, "08:00", "16:00"),
                make_slot("slot-tue", "col-tue-1", 1, "08:00", "16:00"),
            ],
            all_day_col_bands(),
            SolverSettings {
                enforce_same_location_per_day: false,
                on_call_rest_enabled: true,
                on_call_rest_section_id: Some("section-a".to_string()),
                on_call_rest_days_before: 0,
                on_call_rest_days_after: 1,
                prefer_continuous_shifts: false,
                ..SolverSettings::default()
            },
        );
        doc.assignments.push(manual_assignment(
            "manual-mon",
            "slot-mon",
            "2026-01-05",
            "clin-1",
        ));
        doc
    };

    let response = solve(doc, "2026-01-05", "2026-01-06");
    let tuesday: Vec<_> = response
        .assignments
        .iter()
        .filter(|a| a.date_iso == "2026-01-06")
        .collect();
    assert!(tuesday.is_empty(), "Tuesday must stay free after the on-call day");
}

#[test]
fn test_manual_rest_conflicts_are_reported() {
    let doc = {
        let mut doc = build_solver_doc(
            vec![make_clinician("clin-1", &["section-a"])],
            vec![
                make_slot("slot-mon", "col-mon-1", 1, "08:00", "16:00"),
                make_slot("slot-tue", "col-tue-1", 1, "08:00", "16:00"),
            ],
            all_day_col_bands(),
            SolverSettings {
                enforce_same_location_per_day: false,
                on_call_rest_enabled: true,
                on_call_rest_section_id: Some("section-a".to_string()),
                on_call_rest_days_before: 1,
                on_call_rest_days_after: 0,
                prefer_continuous_shifts: false,
                ..SolverSettings::default()
            },
        );
        // Manual on both the on-call day and the rest day before it. The
        // solver plans around them instead of failing.
        doc.assignments.push(manual_assignment(
            "manual-mon",
            "slot-mon",
            "2026-01-05",
            "clin-1",
        ));
        doc.assignments.push(manual_assignment(
            "manual-tue",
            "slot-tue",
            "2026-01-06",
            "clin-1",
        ));
        doc
    };

    let response = solve(doc, "2026-01-05", "2026-01-06");
    // Both days already covered; no new assignments, no failure.
    assert!(response.assignments.is_empty());
    assert!(response.notes.iter().any(|n| n.contains("completed in")));
    assert!(response
        .notes
        .iter()
        .any(|n| n.contains("violate on-call rest day rules")));
}

#[test]
fn test_gap_penalty_splits_gapped_slots_between_clinicians() {
    let doc = build_solver_doc(
        vec![
            make_clinician("clin-a", &["section-a"]),
            make_clinician("clin-b", &["section-a"]),
        ],
        vec![
            make_slot("slot-early", "col-mon-1", 1, "08:00", "10:00"),
            make_slot("slot-late", "col-mon-2", 1, "14:00", "16:00"),
        ],
        vec![
            mon_col_band(),
            make_col_band("col-mon-2", 2, DayType::Mon),
        ],
        SolverSettings {
            enforce_same_location_per_day: false,
            on_call_rest_enabled: false,
            prefer_continuous_shifts: true,
            ..SolverSettings::default()
        },
    );

    let response = solve(doc, "2026-01-05", "2026-01-05");
    assert_eq!(response.assignments.len(), 2);
    assert_ne!(
        response.assignments[0].clinician_id,
        response.assignments[1].clinician_id,
        "gapped slots should go to different clinicians"
    );
    let sub = response
        .debug_info
        .and_then(|d| d.sub_scores)
        .expect("sub scores");
    assert_eq!(sub.gap_penalty, 0);
}

#[test]
fn test_adjacent_slots_carry_no_gap_penalty() {
    let doc = build_solver_doc(
        vec![make_clinician("clin-a", &["section-a"])],
        vec![
            make_slot("slot-early", "col-mon-1", 1, "08:00", "12:00"),
            make_slot("slot-late", "col-mon-2", 1, "12:00", "16:00"),
        ],
        vec![
            mon_col_band(),
            make_col_band("col-mon-2", 2, DayType::Mon),
        ],
        SolverSettings {
            enforce_same_location_per_day: false,
            on_call_rest_enabled: false,
            prefer_continuous_shifts: true,
            ..SolverSettings::default()
        },
    );

    let response = solve(doc, "2026-01-05", "2026-01-05");
    assert_eq!(response.assignments.len(), 2);
    let sub = response
        .debug_info
        .and_then(|d| d.sub_scores)
        .expect("sub scores");
    assert_eq!(sub.gap_penalty, 0);
}
