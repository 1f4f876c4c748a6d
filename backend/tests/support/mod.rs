//! Shared builders for integration tests.

#![allow(dead_code)]

use std::collections::BTreeMap;

use shiftplan_rust::models::state::*;
use shiftplan_rust::models::time::DayType;

pub fn make_location(id: &str, name: &str) -> Location {
    Location {
        id: id.to_string(),
        name: name.to_string(),
    }
}

pub fn make_class_row(id: &str, name: &str, location_id: &str) -> WorkplaceRow {
    WorkplaceRow {
        id: id.to_string(),
        name: name.to_string(),
        kind: RowKind::Class,
        block_color: Some("#E8E1F5".to_string()),
        location_id: Some(location_id.to_string()),
        sub_shifts: Vec::new(),
    }
}

pub fn make_pool_row(id: &str, name: &str) -> WorkplaceRow {
    WorkplaceRow {
        id: id.to_string(),
        name: name.to_string(),
        kind: RowKind::Pool,
        block_color: None,
        location_id: None,
        sub_shifts: Vec::new(),
    }
}

pub fn make_clinician(id: &str, qualified: &[&str]) -> Clinician {
    Clinician {
        id: id.to_string(),
        name: format!("Dr. {id}"),
        qualified_section_ids: qualified.iter().map(|s| s.to_string()).collect(),
        preferred_section_ids: Vec::new(),
        vacations: Vec::new(),
        preferred_working_times: BTreeMap::new(),
        working_hours_per_week: None,
        working_hours_tolerance_hours: None,
    }
}

pub fn working_time(start: &str, end: &str, requirement: WorkingTimeRequirement) -> PreferredWorkingTime {
    PreferredWorkingTime {
        start_time: Some(start.to_string()),
        end_time: Some(end.to_string()),
        requirement,
    }
}

pub fn make_col_band(id: &str, order: i64, day_type: DayType) -> TemplateColBand {
    TemplateColBand {
        id: id.to_string(),
        label: Some(String::new()),
        order,
        day_type,
    }
}

pub fn make_slot(
    slot_id: &str,
    col_band_id: &str,
    required_slots: i64,
    start_time: &str,
    end_time: &str,
) -> TemplateSlot {
    make_slot_with_offset(slot_id, col_band_id, required_slots, start_time, end_time, 0)
}

pub fn make_slot_with_offset(
    slot_id: &str,
    col_band_id: &str,
    required_slots: i64,
    start_time: &str,
    end_time: &str,
    end_day_offset: i64,
) -> TemplateSlot {
    TemplateSlot {
        id: slot_id.to_string(),
        location_id: "loc-default".to_string(),
        row_band_id: "row-1".to_string(),
        col_band_id: col_band_id.to_string(),
        block_id: "block-a".to_string(),
        required_slots: Some(required_slots),
        start_time: Some(start_time.to_string()),
        end_time: Some(end_time.to_string()),
        end_day_offset: Some(end_day_offset),
        section_id: None,
        label: None,
        enabled_by_day_type: None,
        required_by_day_type: None,
    }
}

pub fn manual_assignment(id: &str, row_id: &str, date_iso: &str, clinician_id: &str) -> Assignment {
    Assignment {
        id: id.to_string(),
        row_id: row_id.to_string(),
        date_iso: date_iso.to_string(),
        clinician_id: clinician_id.to_string(),
        source: Some(AssignmentSource::Manual),
    }
}

/// Complete document with one class section (`section-a`) at the default
/// location, a row band `row-1`, and the supplied col bands and slots.
pub fn build_solver_doc(
    clinicians: Vec<Clinician>,
    slots: Vec<TemplateSlot>,
    col_bands: Vec<TemplateColBand>,
    settings: SolverSettings,
) -> ScheduleDocument {
    let rows = vec![
        make_class_row("section-a", "Section A", "loc-default"),
        make_pool_row("pool-rest-day", "Rest Day"),
        make_pool_row("pool-vacation", "Vacation"),
    ];
    build_solver_doc_with_rows(clinicians, slots, col_bands, settings, rows)
}

pub fn build_solver_doc_with_rows(
    clinicians: Vec<Clinician>,
    slots: Vec<TemplateSlot>,
    col_bands: Vec<TemplateColBand>,
    settings: SolverSettings,
    rows: Vec<WorkplaceRow>,
) -> ScheduleDocument {
    let template = WeeklyTemplate {
        version: TEMPLATE_VERSION,
        blocks: vec![TemplateBlock {
            id: "block-a".to_string(),
            section_id: "section-a".to_string(),
            label: None,
            required_slots: 0,
            color: None,
        }],
        locations: vec![WeeklyTemplateLocation {
            location_id: "loc-default".to_string(),
            row_bands: vec![TemplateRowBand {
                id: "row-1".to_string(),
                order: 1,
                label: Some("Row 1".to_string()),
            }],
            col_bands,
            slots,
        }],
    };
    ScheduleDocument {
        locations: vec![make_location("loc-default", "Berlin")],
        locations_enabled: true,
        rows,
        clinicians,
        assignments: Vec::new(),
        min_slots_by_row_id: BTreeMap::new(),
        slot_overrides_by_key: BTreeMap::new(),
        weekly_template: Some(template),
        holidays: Vec::new(),
        published_week_start_isos: Vec::new(),
        solver_settings: settings,
        solver_rules: Vec::new(),
    }
}

/// Solver settings with the constraints under test switched off by default.
pub fn plain_settings() -> SolverSettings {
    SolverSettings {
        enforce_same_location_per_day: false,
        on_call_rest_enabled: false,
        prefer_continuous_shifts: false,
        ..SolverSettings::default()
    }
}

pub fn mon_col_band() -> TemplateColBand {
    make_col_band("col-mon-1", 1, DayType::Mon)
}

pub fn all_day_col_bands() -> Vec<TemplateColBand> {
    DayType::ALL
        .iter()
        .map(|day_type| make_col_band(&format!("col-{}-1", day_type.as_str()), 1, *day_type))
        .collect()
}
