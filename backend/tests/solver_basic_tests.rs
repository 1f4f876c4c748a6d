//! Solver behavior tests: admission rules, overlap and location constraints,
//! manual assignments, coverage, and infeasible configurations.

mod support;

use shiftplan_rust::api::SolveRequest;
use shiftplan_rust::models::state::{
    AssignmentSource, ScheduleDocument, SolverSettings, VacationRange,
};
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
fn test_creates_assignment_for_template_slot() {
    let doc = build_solver_doc(
        vec![make_clinician("clin-1", &["section-a"])],
        vec![make_slot("slot-a", "col-mon-1", 1, "08:00", "16:00")],
        vec![mon_col_band()],
        plain_settings(),
    );

    let response = solve(doc, "2026-01-05", "2026-01-05");

    assert_eq!(response.assignments.len(), 1);
    let assignment = &response.assignments[0];
    assert_eq!(assignment.row_id, "slot-a");
    assert_eq!(assignment.date_iso, "2026-01-05");
    assert_eq!(assignment.clinician_id, "clin-1");
    assert_eq!(assignment.source, Some(AssignmentSource::Solver));
    assert_eq!(
        assignment.id,
        "as-2026-01-05-clin-1-slot-a".to_string()
    );
    assert!(response.notes.iter().any(|n| n.contains("completed in")));
    assert!(!response
        .notes
        .iter()
        .any(|n| n.contains("Could not fill all required slots")));

    let debug = response.debug_info.expect("debug info present");
    assert!(debug.solver_status == "OPTIMAL" || debug.solver_status == "FEASIBLE");
    let sub = debug.sub_scores.expect("sub scores on success");
    assert_eq!(sub.slots_unfilled, 0);
    assert_eq!(sub.total_assignments, 1);
}

#[test]
fn test_respects_clinician_qualifications() {
    let doc = build_solver_doc(
        vec![make_clinician("clin-1", &["section-b"])],
        vec![make_slot("slot-a", "col-mon-1", 1, "08:00", "16:00")],
        vec![mon_col_band()],
        plain_settings(),
    );

    let response = solve(doc, "2026-01-05", "2026-01-05");
    assert!(response.assignments.is_empty());
}

#[test]
fn test_blocks_vacation_days() {
    let mut clinician = make_clinician("clin-1", &["section-a"]);
    clinician.vacations.push(VacationRange {
        id: "v1".to_string(),
        start_iso: "2026-01-05".to_string(),
        end_iso: "2026-01-10".to_string(),
    });
    let doc = build_solver_doc(
        vec![clinician],
        vec![make_slot("slot-a", "col-mon-1", 1, "08:00", "16:00")],
        vec![mon_col_band()],
        plain_settings(),
    );

    let response = solve(doc, "2026-01-05", "2026-01-05");
    assert!(response.assignments.is_empty());
}

#[test]
fn test_prevents_overlapping_intervals() {
    let doc = build_solver_doc(
        vec![make_clinician("clin-1", &["section-a"])],
        vec![
            make_slot("slot-a", "col-mon-1", 1, "08:00", "12:00"),
            make_slot("slot-b", "col-mon-2", 1, "10:00", "14:00"),
        ],
        vec![
            mon_col_band(),
            make_col_band("col-mon-2", 2, shiftplan_rust::models::time::DayType::Mon),
        ],
        plain_settings(),
    );

    let response = solve(doc, "2026-01-05", "2026-01-05");
    assert_eq!(response.assignments.len(), 1);
}

#[test]
fn test_allows_touching_intervals() {
    let doc = build_solver_doc(
        vec![make_clinician("clin-1", &["section-a"])],
        vec![
            make_slot("slot-a", "col-mon-1", 1, "08:00", "12:00"),
            make_slot("slot-b", "col-mon-2", 1, "12:00", "16:00"),
        ],
        vec![
            mon_col_band(),
            make_col_band("col-mon-2", 2, shiftplan_rust::models::time::DayType::Mon),
        ],
        plain_settings(),
    );

    let response = solve(doc, "2026-01-05", "2026-01-05");
    assert_eq!(response.assignments.len(), 2);
    let row_ids: Vec<&str> = response
        .assignments
        .iter()
        .map(|a| a.row_id.as_str())
        .collect();
    assert!(row_ids.contains(&"slot-a"));
    assert!(row_ids.contains(&"slot-b"));
}

#[test]
fn test_zero_length_slot_has_no_overlap_constraints() {
    // A zero-length slot sits inside the other slot's interval but never
    // conflicts, so both seats can be filled by the same clinician.
    let doc = build_solver_doc(
        vec![make_clinician("clin-1", &["section-a"])],
        vec![
            make_slot("slot-a", "col-mon-1", 1, "08:00", "16:00"),
            make_slot("slot-zero", "col-mon-2", 1, "10:00", "10:00"),
        ],
        vec![
            mon_col_band(),
            make_col_band("col-mon-2", 2, shiftplan_rust::models::time::DayType::Mon),
        ],
        plain_settings(),
    );

    let response = solve(doc, "2026-01-05", "2026-01-05");
    assert_eq!(response.assignments.len(), 2);
}

#[test]
fn test_overnight_shift_conflicts_with_next_day() {
    // startTime 23:00 with endDayOffset 3 spans into the fourth day and must
    // collide with an all-day slot on the following day.
    let doc = build_solver_doc(
        vec![make_clinician("clin-1", &["section-a"])],
        vec![
            make_slot_with_offset("slot-long", "col-mon-1", 1, "23:00", "23:00", 3),
            make_slot("slot-tue", "col-tue-1", 1, "00:00", "23:00"),
        ],
        vec![
            mon_col_band(),
            make_col_band("col-tue-1", 1, shiftplan_rust::models::time::DayType::Tue),
        ],
        plain_settings(),
    );

    let response = solve(doc, "2026-01-05", "2026-01-06");
    assert_eq!(response.assignments.len(), 1);
}

#[test]
fn test_overnight_shift_allows_disjoint_morning() {
    let doc = build_solver_doc(
        vec![make_clinician("clin-1", &["section-a"])],
        vec![
            make_slot_with_offset("slot-night", "col-mon-1", 1, "22:00", "06:00", 1),
            make_slot("slot-morning", "col-mon-2", 1, "08:00", "12:00"),
        ],
        vec![
            mon_col_band(),
            make_col_band("col-mon-2", 2, shiftplan_rust::models::time::DayType::Mon),
        ],
        plain_settings(),
    );

    let response = solve(doc, "2026-01-05", "2026-01-05");
    assert_eq!(response.assignments.len(), 2);
}

#[test]
fn test_enforces_same_location_per_day() {
    use shiftplan_rust::models::state::*;
    use shiftplan_rust::models::time::DayType;

    let rows = vec![
        make_class_row("section-a", "Section A", "loc-1"),
        make_class_row("section-b", "Section B", "loc-2"),
        make_pool_row("pool-rest-day", "Rest Day"),
    ];
    let col_bands = vec![
        make_col_band("col-mon-1", 1, DayType::Mon),
        make_col_band("col-mon-2", 2, DayType::Mon),
    ];
    let slot_a = TemplateSlot {
        location_id: "loc-1".to_string(),
        ..make_slot("slot-a", "col-mon-1", 1, "08:00", "12:00")
    };
    let slot_b = TemplateSlot {
        location_id: "loc-2".to_string(),
        block_id: "block-b".to_string(),
        ..make_slot("slot-b", "col-mon-2", 1, "13:00", "17:00")
    };
    let template = WeeklyTemplate {
        version: TEMPLATE_VERSION,
        blocks: vec![
            TemplateBlock {
                id: "block-a".to_string(),
                section_id: "section-a".to_string(),
                label: None,
                required_slots: 0,
                color: None,
            },
            TemplateBlock {
                id: "block-b".to_string(),
                section_id: "section-b".to_string(),
                label: None,
                required_slots: 0,
                color: None,
            },
        ],
        locations: vec![
            WeeklyTemplateLocation {
                location_id: "loc-1".to_string(),
                row_bands: vec![TemplateRowBand {
                    id: "row-1".to_string(),
                    order: 1,
                    label: Some("Row 1".to_string()),
                }],
                col_bands: col_bands.clone(),
                slots: vec![slot_a],
            },
            WeeklyTemplateLocation {
                location_id: "loc-2".to_string(),
                row_bands: vec![TemplateRowBand {
                    id: "row-1".to_string(),
                    order: 1,
                    label: Some("Row 1".to_string()),
                }],
                col_bands,
                slots: vec![slot_b],
            },
        ],
    };
    let doc = ScheduleDocument {
        locations: vec![
            make_location("loc-1", "Location 1"),
            make_location("loc-2", "Location 2"),
        ],
        locations_enabled: true,
        rows,
        clinicians: vec![make_clinician("clin-1", &["section-a", "section-b"])],
        assignments: Vec::new(),
        min_slots_by_row_id: Default::default(),
        slot_overrides_by_key: Default::default(),
        weekly_template: Some(template),
        holidays: Vec::new(),
        published_week_start_isos: Vec::new(),
        solver_settings: SolverSettings {
            enforce_same_location_per_day: true,
            on_call_rest_enabled: false,
            prefer_continuous_shifts: false,
            ..SolverSettings::default()
        },
        solver_rules: Vec::new(),
    };

    let response = solve(doc, "2026-01-05", "2026-01-05");
    // The two slots do not overlap in time but sit at different locations.
    assert_eq!(response.assignments.len(), 1);
}

#[test]
fn test_manual_assignments_remain_fixed() {
    let mut doc = build_solver_doc(
        vec![make_clinician("clin-1", &["section-a"])],
        vec![make_slot("slot-a", "col-mon-1", 1, "08:00", "16:00")],
        vec![mon_col_band()],
        plain_settings(),
    );
    doc.assignments
        .push(manual_assignment("manual-1", "slot-a", "2026-01-05", "clin-1"));

    let response = solve(doc, "2026-01-05", "2026-01-05");
    // The slot is already covered manually; nothing new is produced.
    assert!(response.assignments.is_empty());
}

#[test]
fn test_ignores_pool_assignments() {
    let mut doc = build_solver_doc(
        vec![make_clinician("clin-1", &["section-a"])],
        vec![make_slot("slot-a", "col-mon-1", 1, "08:00", "16:00")],
        vec![mon_col_band()],
        plain_settings(),
    );
    doc.assignments.push(manual_assignment(
        "legacy-1",
        "pool-rest-day",
        "2026-01-05",
        "clin-1",
    ));

    let response = solve(doc, "2026-01-05", "2026-01-05");
    assert_eq!(response.assignments.len(), 1);
    assert_eq!(response.assignments[0].row_id, "slot-a");
}

#[test]
fn test_only_fill_required_skips_zero_required_slots() {
    let doc = build_solver_doc(
        vec![make_clinician("clin-1", &["section-a"])],
        vec![make_slot("slot-a", "col-mon-1", 0, "08:00", "16:00")],
        vec![mon_col_band()],
        plain_settings(),
    );

    let response = solve(doc, "2026-01-05", "2026-01-05");
    assert!(response.assignments.is_empty());
    assert!(response
        .notes
        .iter()
        .any(|n| n.contains("No required slots detected")));
}

#[test]
fn test_override_raises_required_count() {
    let mut doc = build_solver_doc(
        vec![
            make_clinician("clin-1", &["section-a"]),
            make_clinician("clin-2", &["section-a"]),
        ],
        vec![make_slot("slot-a", "col-mon-1", 1, "08:00", "16:00")],
        vec![mon_col_band()],
        plain_settings(),
    );
    doc.slot_overrides_by_key
        .insert("slot-a__2026-01-05".to_string(), 1);

    let response = solve(doc, "2026-01-05", "2026-01-05");
    assert_eq!(response.assignments.len(), 2);
}

#[test]
fn test_infeasible_reports_diagnostics() {
    // Nobody to assign: the response structure stays intact and explains why.
    let doc = build_solver_doc(
        Vec::new(),
        vec![make_slot("slot-a", "col-mon-1", 1, "08:00", "16:00")],
        vec![mon_col_band()],
        plain_settings(),
    );

    let response = solve(doc, "2026-01-05", "2026-01-05");
    assert!(response.assignments.is_empty());
    assert_eq!(response.notes[0], "No solution");
    assert!(response
        .notes
        .iter()
        .any(|n| n.contains("No assignment variables created.")));
    assert!(response
        .notes
        .iter()
        .any(|n| n.contains("No feasible assignment found.")));
    assert!(response
        .notes
        .iter()
        .any(|n| n.contains("Solver status: INFEASIBLE")));
    let debug = response.debug_info.expect("debug info present");
    assert_eq!(debug.solver_status, "INFEASIBLE");
    assert_eq!(debug.num_variables, 0);
}

#[test]
fn test_invalid_range_is_rejected() {
    let doc = build_solver_doc(
        vec![make_clinician("clin-1", &["section-a"])],
        vec![make_slot("slot-a", "col-mon-1", 1, "08:00", "16:00")],
        vec![mon_col_band()],
        plain_settings(),
    );
    let (doc, _) = normalize(doc);

    let request = SolveRequest {
        start_iso: "2026-01-10".to_string(),
        end_iso: Some("2026-01-05".to_string()),
        only_fill_required: true,
        timeout_seconds: Some(5.0),
    };
    let ctx = SolveContext::new();
    let mut timer = SolveTimer::new();
    let err = solve_range(&doc, &request, &ctx, &mut timer).unwrap_err();
    assert!(matches!(
        err,
        shiftplan_rust::solver::SolveError::InvalidRange(_)
    ));

    let request = SolveRequest {
        start_iso: "not-a-date".to_string(),
        end_iso: None,
        only_fill_required: true,
        timeout_seconds: Some(5.0),
    };
    let mut timer = SolveTimer::new();
    let err = solve_range(&doc, &request, &ctx, &mut timer).unwrap_err();
    assert!(matches!(
        err,
        shiftplan_rust::solver::SolveError::InvalidRange(_)
    ));
}

#[test]
fn test_produced_assignments_respect_hard_constraints() {
    // Two clinicians, several slots across two days; whatever the solver
    // picks must satisfy qualification, vacation, and no-overlap rules.
    let mut clin_b = make_clinician("clin-b", &["section-a"]);
    clin_b.vacations.push(VacationRange {
        id: "v1".to_string(),
        start_iso: "2026-01-06".to_string(),
        end_iso: "2026-01-06".to_string(),
    });
    let doc = build_solver_doc(
        vec![make_clinician("clin-a", &["section-a"]), clin_b],
        vec![
            make_slot("slot-1", "col-mon-1", 1, "08:00", "12:00"),
            make_slot("slot-2", "col-mon-2", 1, "10:00", "14:00"),
            make_slot("slot-3", "col-tue-1", 2, "08:00", "16:00"),
        ],
        vec![
            mon_col_band(),
            make_col_band("col-mon-2", 2, shiftplan_rust::models::time::DayType::Mon),
            make_col_band("col-tue-1", 1, shiftplan_rust::models::time::DayType::Tue),
        ],
        plain_settings(),
    );
    let (normalized, _) = normalize(doc.clone());

    let response = solve(doc, "2026-01-05", "2026-01-06");
    for assignment in &response.assignments {
        let clinician = normalized
            .clinician_by_id(&assignment.clinician_id)
            .expect("clinician exists");
        assert!(!clinician.is_on_vacation(&assignment.date_iso));
        let (_, slot) = normalized
            .find_slot(&assignment.row_id)
            .expect("slot exists");
        let block = normalized.block_by_id(&slot.block_id).expect("block");
        assert!(clinician
            .qualified_section_ids
            .contains(&block.section_id));
    }
    // No same-clinician same-date overlap.
    for (i, a) in response.assignments.iter().enumerate() {
        for b in response.assignments.iter().skip(i + 1) {
            if a.clinician_id == b.clinician_id && a.date_iso == b.date_iso {
                assert_ne!(a.row_id, b.row_id);
                let overlap = (a.row_id == "slot-1" && b.row_id == "slot-2")
                    || (a.row_id == "slot-2" && b.row_id == "slot-1");
                assert!(!overlap, "overlapping slots assigned to one clinician");
            }
        }
    }
}
