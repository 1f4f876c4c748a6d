//! Document store: load, validate, normalize, persist.
//!
//! Every read path goes through [`load_document`], which upgrades whatever
//! shape was persisted into the canonical schema and writes it back only when
//! normalization changed something. First access seeds the default document.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};

use crate::models::state::{
    build_shift_row_id, Clinician, Location, MinSlots, RowKind, ScheduleDocument, SolverSettings,
    SubShift, TemplateBlock, TemplateColBand, TemplateRowBand, TemplateSlot, WeeklyTemplate,
    WeeklyTemplateLocation, WorkplaceRow, DEFAULT_LOCATION_ID, TEMPLATE_VERSION,
};
use crate::models::time::DayType;
use crate::normalize::normalize;

use super::repository::{FullRepository, RepositoryError, RepositoryResult, StateRepository};

/// Load the owner's document, normalizing and re-persisting when the stored
/// shape was not canonical. Missing documents are seeded with the default.
pub async fn load_document(
    repo: &dyn FullRepository,
    owner: &str,
) -> RepositoryResult<(ScheduleDocument, DateTime<Utc>)> {
    match repo.load_state(owner).await? {
        None => {
            let (doc, _) = normalize(default_document());
            let updated_at = persist(repo, owner, &doc).await?;
            Ok((doc, updated_at))
        }
        Some(stored) => {
            let parsed: ScheduleDocument = serde_json::from_str(&stored.data)
                .map_err(|e| RepositoryError::Validation(format!("invalid schedule document: {e}")))?;
            let (doc, changed) = normalize(parsed);
            let updated_at = if changed {
                persist(repo, owner, &doc).await?
            } else {
                stored.updated_at
            };
            Ok((doc, updated_at))
        }
    }
}

/// Normalize and persist a document supplied by the owner.
pub async fn save_document(
    repo: &dyn FullRepository,
    owner: &str,
    doc: ScheduleDocument,
) -> RepositoryResult<(ScheduleDocument, DateTime<Utc>)> {
    let (doc, _) = normalize(doc);
    let updated_at = persist(repo, owner, &doc).await?;
    Ok((doc, updated_at))
}

async fn persist(
    repo: &dyn FullRepository,
    owner: &str,
    doc: &ScheduleDocument,
) -> RepositoryResult<DateTime<Utc>> {
    let data = serde_json::to_string(doc)
        .map_err(|e| RepositoryError::Storage(format!("serialize schedule document: {e}")))?;
    repo.save_state(owner, &data).await
}

/// Seed document for a new owner: one section with a single Monday slot, the
/// bookkeeping pools, and one clinician.
pub fn default_document() -> ScheduleDocument {
    let section_color = "#FDE2E4".to_string();
    let sub_shift = SubShift {
        id: "s1".to_string(),
        name: "Shift 1".to_string(),
        order: 1,
        start_time: Some("08:00".to_string()),
        end_time: Some("16:00".to_string()),
        end_day_offset: Some(0),
        hours: None,
    };
    let rows = vec![
        WorkplaceRow {
            id: "mri".to_string(),
            name: "MRI".to_string(),
            kind: RowKind::Class,
            block_color: Some(section_color.clone()),
            location_id: Some(DEFAULT_LOCATION_ID.to_string()),
            sub_shifts: vec![sub_shift],
        },
        pool_row("pool-not-allocated", "Distribution Pool"),
        pool_row("pool-manual", "Reserve Pool"),
        pool_row("pool-rest-day", "Rest Day"),
        pool_row("pool-vacation", "Vacation"),
    ];

    let clinicians = vec![Clinician {
        id: "alex-hartmann".to_string(),
        name: "Alex Hartmann".to_string(),
        qualified_section_ids: vec!["mri".to_string()],
        preferred_section_ids: vec!["mri".to_string()],
        vacations: Vec::new(),
        preferred_working_times: BTreeMap::new(),
        working_hours_per_week: Some(38.0),
        working_hours_tolerance_hours: None,
    }];

    let mut min_slots = BTreeMap::new();
    min_slots.insert(
        build_shift_row_id("mri", "s1"),
        MinSlots {
            weekday: 1,
            weekend: 1,
        },
    );

    let block_id = "block-mri-1".to_string();
    let col_bands: Vec<TemplateColBand> = DayType::ALL
        .iter()
        .map(|day_type| TemplateColBand {
            id: format!("{DEFAULT_LOCATION_ID}-col-{}-1", day_type.as_str()),
            label: Some(String::new()),
            order: 1,
            day_type: *day_type,
        })
        .collect();
    let monday_col = col_bands[0].id.clone();
    let weekly_template = WeeklyTemplate {
        version: TEMPLATE_VERSION,
        blocks: vec![TemplateBlock {
            id: block_id.clone(),
            section_id: "mri".to_string(),
            label: None,
            required_slots: 0,
            color: Some(section_color),
        }],
        locations: vec![WeeklyTemplateLocation {
            location_id: DEFAULT_LOCATION_ID.to_string(),
            row_bands: vec![TemplateRowBand {
                id: "row-1".to_string(),
                order: 1,
                label: Some("Row 1".to_string()),
            }],
            col_bands,
            slots: vec![TemplateSlot {
                id: "slot-mri-mon-1".to_string(),
                location_id: DEFAULT_LOCATION_ID.to_string(),
                row_band_id: "row-1".to_string(),
                col_band_id: monday_col,
                block_id,
                required_slots: Some(1),
                start_time: Some("08:00".to_string()),
                end_time: Some("16:00".to_string()),
                end_day_offset: Some(0),
                section_id: None,
                label: None,
                enabled_by_day_type: None,
                required_by_day_type: None,
            }],
        }],
    };

    ScheduleDocument {
        locations: vec![Location {
            id: DEFAULT_LOCATION_ID.to_string(),
            name: "Berlin".to_string(),
        }],
        locations_enabled: true,
        rows,
        clinicians,
        assignments: Vec::new(),
        min_slots_by_row_id: min_slots,
        slot_overrides_by_key: BTreeMap::new(),
        weekly_template: Some(weekly_template),
        holidays: Vec::new(),
        published_week_start_isos: Vec::new(),
        solver_settings: SolverSettings {
            on_call_rest_section_id: Some("mri".to_string()),
            ..SolverSettings::default()
        },
        solver_rules: Vec::new(),
    }
}

fn pool_row(id: &str, name: &str) -> WorkplaceRow {
    WorkplaceRow {
        id: id.to_string(),
        name: name.to_string(),
        kind: RowKind::Pool,
        block_color: None,
        location_id: None,
        sub_shifts: Vec::new(),
    }
}
