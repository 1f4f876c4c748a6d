//! Weekly-template migration.
//!
//! Two paths: documents at the current template version get a referential
//! cleanup pass, everything older (or missing blocks entirely) is rebuilt
//! from the legacy `enabledByDayType` / `requiredByDayType` shapes into one
//! block and one slot per day type. Both paths return the id map legacy
//! assignments and overrides need to land on today's slot ids.

use std::collections::{BTreeMap, BTreeSet};

use crate::models::state::{
    build_shift_row_id, Location, MinSlots, TemplateBlock, TemplateColBand, TemplateRowBand,
    TemplateSlot, WeeklyTemplate, WeeklyTemplateLocation, WorkplaceRow, DEFAULT_LOCATION_ID,
    DEFAULT_SUB_SHIFT_MINUTES, DEFAULT_SUB_SHIFT_START_MINUTES, TEMPLATE_VERSION,
};
use crate::models::time::{format_minutes, parse_time_minutes, DayType};

/// Map from a legacy slot/base id to the synthesized per-day-type slot ids.
pub type LegacySlotIdMap = BTreeMap<String, BTreeMap<DayType, String>>;

const DEFAULT_ROW_BAND_LABELS: [&str; 5] = ["Früh", "Morgen", "Mittag", "Nachmittag", "Spät"];

fn day_type_bools(
    source: Option<&BTreeMap<String, bool>>,
    fallback: bool,
) -> BTreeMap<DayType, bool> {
    let mut record: BTreeMap<DayType, bool> =
        DayType::ALL.iter().map(|d| (*d, fallback)).collect();
    if let Some(source) = source {
        for day_type in DayType::ALL {
            if let Some(value) = source.get(day_type.as_str()) {
                record.insert(day_type, *value);
            }
        }
    }
    record
}

fn day_type_numbers(source: Option<&BTreeMap<String, i64>>) -> BTreeMap<DayType, i64> {
    let mut record: BTreeMap<DayType, i64> = DayType::ALL.iter().map(|d| (*d, 0)).collect();
    if let Some(source) = source {
        for day_type in DayType::ALL {
            if let Some(value) = source.get(day_type.as_str()) {
                record.insert(day_type, (*value).max(0));
            }
        }
    }
    record
}

fn normalize_row_bands(row_bands: &[TemplateRowBand]) -> Vec<TemplateRowBand> {
    let mut bands: Vec<&TemplateRowBand> = row_bands.iter().filter(|b| !b.id.is_empty()).collect();
    bands.sort_by_key(|b| b.order);
    bands
        .into_iter()
        .enumerate()
        .map(|(index, band)| TemplateRowBand {
            id: band.id.clone(),
            order: index as i64 + 1,
            label: band.label.clone().filter(|l| !l.is_empty()),
        })
        .collect()
}

fn normalize_col_bands(col_bands: &[TemplateColBand]) -> Vec<TemplateColBand> {
    let mut normalized = Vec::new();
    for day_type in DayType::ALL {
        let mut bands: Vec<&TemplateColBand> = col_bands
            .iter()
            .filter(|b| !b.id.is_empty() && b.day_type == day_type)
            .collect();
        bands.sort_by_key(|b| b.order);
        for (index, band) in bands.into_iter().enumerate() {
            normalized.push(TemplateColBand {
                id: band.id.clone(),
                label: Some(band.label.clone().unwrap_or_default()),
                order: index as i64 + 1,
                day_type,
            });
        }
    }
    normalized
}

fn default_template_location(location_id: &str) -> WeeklyTemplateLocation {
    WeeklyTemplateLocation {
        location_id: location_id.to_string(),
        row_bands: DEFAULT_ROW_BAND_LABELS
            .iter()
            .enumerate()
            .map(|(index, label)| TemplateRowBand {
                id: format!("{location_id}-row-{}", index + 1),
                order: index as i64 + 1,
                label: Some((*label).to_string()),
            })
            .collect(),
        col_bands: DayType::ALL
            .iter()
            .map(|day_type| TemplateColBand {
                id: format!("{location_id}-col-{}-1", day_type.as_str()),
                label: Some(String::new()),
                order: 1,
                day_type: *day_type,
            })
            .collect(),
        slots: Vec::new(),
    }
}

fn normalize_slot_time(slot: &TemplateSlot) -> (Option<String>, Option<String>, i64) {
    let start = slot.start_time.as_deref().and_then(parse_time_minutes);
    let end = slot.end_time.as_deref().and_then(parse_time_minutes);
    let offset = slot.end_day_offset.unwrap_or(0).clamp(0, 3);
    (start.map(format_minutes), end.map(format_minutes), offset)
}

/// Build a complete template location (plus its blocks) from a class row's
/// historical sub-shifts, used when a location has no template at all.
fn build_default_template_for_location(
    location_id: &str,
    class_rows: &[&WorkplaceRow],
    min_slots_by_row_id: &BTreeMap<String, MinSlots>,
) -> (WeeklyTemplateLocation, Vec<TemplateBlock>) {
    let col_bands: Vec<TemplateColBand> = DayType::ALL
        .iter()
        .map(|day_type| TemplateColBand {
            id: format!("{location_id}-col-{}-1", day_type.as_str()),
            label: Some(String::new()),
            order: 1,
            day_type: *day_type,
        })
        .collect();
    let col_band_by_day: BTreeMap<DayType, String> = col_bands
        .iter()
        .map(|band| (band.day_type, band.id.clone()))
        .collect();

    let mut row_bands = Vec::new();
    let mut slots = Vec::new();
    let mut blocks = Vec::new();
    let mut row_index = 1i64;

    for row in class_rows {
        for shift in &row.sub_shifts {
            let row_band_id = format!("{location_id}-row-{row_index}");
            row_bands.push(TemplateRowBand {
                id: row_band_id.clone(),
                order: row_index,
                label: Some(shift.name.clone()),
            });
            row_index += 1;

            let shift_row_id = build_shift_row_id(&row.id, &shift.id);
            let min_slots = min_slots_by_row_id
                .get(&shift_row_id)
                .copied()
                .unwrap_or(MinSlots {
                    weekday: 0,
                    weekend: 0,
                });
            let required_for = |day_type: DayType| match day_type {
                DayType::Sat | DayType::Sun | DayType::Holiday => min_slots.weekend,
                _ => min_slots.weekday,
            };

            let start_time = shift
                .start_time
                .clone()
                .unwrap_or_else(|| format_minutes(DEFAULT_SUB_SHIFT_START_MINUTES));
            let end_time = shift.end_time.clone().unwrap_or_else(|| {
                format_minutes(DEFAULT_SUB_SHIFT_START_MINUTES + DEFAULT_SUB_SHIFT_MINUTES)
            });

            for day_type in DayType::ALL {
                let block_id = format!("block-{shift_row_id}-{}", day_type.as_str());
                blocks.push(TemplateBlock {
                    id: block_id.clone(),
                    section_id: row.id.clone(),
                    label: Some(shift.name.clone()),
                    required_slots: required_for(day_type),
                    color: row.block_color.clone(),
                });
                slots.push(TemplateSlot {
                    id: format!("{shift_row_id}__{}", day_type.as_str()),
                    location_id: location_id.to_string(),
                    row_band_id: row_band_id.clone(),
                    col_band_id: col_band_by_day.get(&day_type).cloned().unwrap_or_default(),
                    block_id,
                    required_slots: Some(required_for(day_type)),
                    start_time: Some(start_time.clone()),
                    end_time: Some(end_time.clone()),
                    end_day_offset: Some(shift.end_day_offset.unwrap_or(0)),
                    section_id: None,
                    label: None,
                    enabled_by_day_type: None,
                    required_by_day_type: None,
                });
            }
        }
    }

    if row_bands.is_empty() {
        return (default_template_location(location_id), Vec::new());
    }
    (
        WeeklyTemplateLocation {
            location_id: location_id.to_string(),
            row_bands,
            col_bands,
            slots,
        },
        blocks,
    )
}

/// Upgrade a pre-v4 template: one legacy slot fans out into one block and one
/// slot per enabled day type, and each legacy col band into one band per day
/// type.
fn upgrade_legacy_template(
    template: Option<&WeeklyTemplate>,
    locations: &[Location],
    class_rows: &[&WorkplaceRow],
    section_color_by_id: &BTreeMap<String, String>,
    min_slots_by_row_id: &BTreeMap<String, MinSlots>,
) -> (WeeklyTemplate, LegacySlotIdMap) {
    let class_ids: BTreeSet<&str> = class_rows.iter().map(|r| r.id.as_str()).collect();
    let mut blocks = Vec::new();
    let mut next_locations = Vec::new();
    let mut legacy_map = LegacySlotIdMap::new();

    for loc in locations {
        let existing = template.and_then(|t| {
            t.locations
                .iter()
                .find(|item| item.location_id == loc.id)
        });
        let Some(existing) = existing else {
            let loc_rows: Vec<&WorkplaceRow> = class_rows
                .iter()
                .filter(|row| {
                    row.location_id.as_deref().unwrap_or(DEFAULT_LOCATION_ID) == loc.id
                })
                .copied()
                .collect();
            let (built_location, built_blocks) =
                build_default_template_for_location(&loc.id, &loc_rows, min_slots_by_row_id);
            next_locations.push(built_location);
            blocks.extend(built_blocks);
            continue;
        };

        let mut row_bands = normalize_row_bands(&existing.row_bands);
        if row_bands.is_empty() {
            row_bands = default_template_location(&loc.id).row_bands;
        }

        // Legacy col bands are day-agnostic; reindex them in order.
        let mut legacy_col_bands: Vec<TemplateColBand> = existing
            .col_bands
            .iter()
            .filter(|b| !b.id.is_empty())
            .cloned()
            .collect();
        legacy_col_bands.sort_by_key(|b| b.order);
        if legacy_col_bands.is_empty() {
            legacy_col_bands.push(TemplateColBand {
                id: format!("{}-col-1", loc.id),
                label: Some(String::new()),
                order: 1,
                day_type: DayType::Mon,
            });
        }

        let mut col_bands = Vec::new();
        let mut col_band_ids_by_legacy: BTreeMap<String, BTreeMap<DayType, String>> =
            BTreeMap::new();
        for (index, band) in legacy_col_bands.iter().enumerate() {
            let mut mapping = BTreeMap::new();
            for day_type in DayType::ALL {
                let col_id = format!("{}-{}", band.id, day_type.as_str());
                mapping.insert(day_type, col_id.clone());
                col_bands.push(TemplateColBand {
                    id: col_id,
                    label: Some(band.label.clone().unwrap_or_default()),
                    order: index as i64 + 1,
                    day_type,
                });
            }
            col_band_ids_by_legacy.insert(band.id.clone(), mapping);
        }

        let row_band_ids: BTreeSet<&str> = row_bands.iter().map(|b| b.id.as_str()).collect();
        let mut slots = Vec::new();
        for slot in &existing.slots {
            if slot.id.is_empty() || !row_band_ids.contains(slot.row_band_id.as_str()) {
                continue;
            }
            let Some(section_id) = slot.section_id.as_deref() else {
                continue;
            };
            if !class_ids.contains(section_id) {
                continue;
            }
            let enabled = day_type_bools(slot.enabled_by_day_type.as_ref(), true);
            let required = day_type_numbers(slot.required_by_day_type.as_ref());
            let start_minutes = slot
                .start_time
                .as_deref()
                .and_then(parse_time_minutes)
                .unwrap_or(DEFAULT_SUB_SHIFT_START_MINUTES);
            let end_minutes = slot
                .end_time
                .as_deref()
                .and_then(parse_time_minutes)
                .unwrap_or(start_minutes + DEFAULT_SUB_SHIFT_MINUTES);
            let end_day_offset = slot.end_day_offset.unwrap_or(0).clamp(0, 3);

            for day_type in DayType::ALL {
                if !enabled.get(&day_type).copied().unwrap_or(false) {
                    continue;
                }
                let block_id = format!("block-{}-{}", slot.id, day_type.as_str());
                blocks.push(TemplateBlock {
                    id: block_id.clone(),
                    section_id: section_id.to_string(),
                    label: slot.label.clone(),
                    required_slots: required.get(&day_type).copied().unwrap_or(0),
                    color: section_color_by_id.get(section_id).cloned(),
                });
                let col_band_id = col_band_ids_by_legacy
                    .get(slot.col_band_id.as_str())
                    .and_then(|mapping| mapping.get(&day_type).cloned())
                    .unwrap_or_else(|| format!("{}-col-{}-1", loc.id, day_type.as_str()));
                let slot_id = format!("{}__{}", slot.id, day_type.as_str());
                legacy_map
                    .entry(slot.id.clone())
                    .or_default()
                    .insert(day_type, slot_id.clone());
                slots.push(TemplateSlot {
                    id: slot_id,
                    location_id: loc.id.clone(),
                    row_band_id: slot.row_band_id.clone(),
                    col_band_id,
                    block_id,
                    required_slots: Some(required.get(&day_type).copied().unwrap_or(0)),
                    start_time: Some(format_minutes(start_minutes)),
                    end_time: Some(format_minutes(end_minutes)),
                    end_day_offset: Some(end_day_offset),
                    section_id: None,
                    label: None,
                    enabled_by_day_type: None,
                    required_by_day_type: None,
                });
            }
        }

        next_locations.push(WeeklyTemplateLocation {
            location_id: loc.id.clone(),
            row_bands,
            col_bands,
            slots,
        });
    }

    (
        WeeklyTemplate {
            version: TEMPLATE_VERSION,
            blocks,
            locations: next_locations,
        },
        legacy_map,
    )
}

/// Referential cleanup for a current-version template: drop dangling slots,
/// guarantee one col band per day type per location, clamp required counts.
fn clean_current_template(
    template: &WeeklyTemplate,
    locations: &[Location],
    class_rows: &[&WorkplaceRow],
    section_color_by_id: &BTreeMap<String, String>,
) -> WeeklyTemplate {
    let class_ids: BTreeSet<&str> = class_rows.iter().map(|r| r.id.as_str()).collect();

    let mut blocks = Vec::new();
    for block in &template.blocks {
        if block.id.is_empty() || !class_ids.contains(block.section_id.as_str()) {
            continue;
        }
        let mut color = block
            .color
            .as_deref()
            .map(str::trim)
            .filter(|c| !c.is_empty())
            .map(str::to_string);
        if let Some(section_color) = section_color_by_id.get(&block.section_id) {
            color = Some(section_color.clone());
        }
        blocks.push(TemplateBlock {
            id: block.id.clone(),
            section_id: block.section_id.clone(),
            label: block.label.clone(),
            required_slots: block.required_slots.max(0),
            color,
        });
    }
    let block_by_id: BTreeMap<&str, &TemplateBlock> =
        blocks.iter().map(|b| (b.id.as_str(), b)).collect();

    let mut next_locations = Vec::new();
    for loc in locations {
        let existing = template
            .locations
            .iter()
            .find(|item| item.location_id == loc.id);
        let Some(existing) = existing else {
            next_locations.push(default_template_location(&loc.id));
            continue;
        };

        let mut row_bands = normalize_row_bands(&existing.row_bands);
        if row_bands.is_empty() {
            row_bands = default_template_location(&loc.id).row_bands;
        }

        let mut col_bands = normalize_col_bands(&existing.col_bands);
        for day_type in DayType::ALL {
            if !col_bands.iter().any(|b| b.day_type == day_type) {
                col_bands.push(TemplateColBand {
                    id: format!("{}-col-{}-1", loc.id, day_type.as_str()),
                    label: Some(String::new()),
                    order: 1,
                    day_type,
                });
            }
        }
        let col_bands = normalize_col_bands(&col_bands);

        let row_band_ids: BTreeSet<&str> = row_bands.iter().map(|b| b.id.as_str()).collect();
        let col_band_ids: BTreeSet<&str> = col_bands.iter().map(|b| b.id.as_str()).collect();

        let mut slots = Vec::new();
        for slot in &existing.slots {
            if slot.id.is_empty()
                || !row_band_ids.contains(slot.row_band_id.as_str())
                || !col_band_ids.contains(slot.col_band_id.as_str())
            {
                continue;
            }
            let Some(block) = block_by_id.get(slot.block_id.as_str()) else {
                continue;
            };
            let (start_time, end_time, end_day_offset) = normalize_slot_time(slot);
            let required_slots = slot
                .required_slots
                .map(|r| r.max(0))
                .unwrap_or_else(|| block.required_slots.max(0));
            slots.push(TemplateSlot {
                id: slot.id.clone(),
                location_id: loc.id.clone(),
                row_band_id: slot.row_band_id.clone(),
                col_band_id: slot.col_band_id.clone(),
                block_id: slot.block_id.clone(),
                required_slots: Some(required_slots),
                start_time,
                end_time,
                end_day_offset: Some(end_day_offset),
                section_id: None,
                label: None,
                enabled_by_day_type: None,
                required_by_day_type: None,
            });
        }

        next_locations.push(WeeklyTemplateLocation {
            location_id: loc.id.clone(),
            row_bands,
            col_bands,
            slots,
        });
    }

    WeeklyTemplate {
        version: TEMPLATE_VERSION,
        blocks,
        locations: next_locations,
    }
}

/// Normalize the weekly template, upgrading legacy shapes where needed.
/// Returns the canonical template and the legacy slot-id map for assignment
/// and override rewriting.
pub fn normalize_weekly_template(
    template: Option<&WeeklyTemplate>,
    locations: &[Location],
    rows: &[WorkplaceRow],
    min_slots_by_row_id: &BTreeMap<String, MinSlots>,
) -> (WeeklyTemplate, LegacySlotIdMap) {
    let class_rows: Vec<&WorkplaceRow> = rows
        .iter()
        .filter(|r| r.kind == crate::models::state::RowKind::Class)
        .collect();
    let section_color_by_id: BTreeMap<String, String> = class_rows
        .iter()
        .filter_map(|r| r.block_color.clone().map(|c| (r.id.clone(), c)))
        .collect();

    let is_legacy = match template {
        None => true,
        Some(t) => t.version < TEMPLATE_VERSION || t.blocks.is_empty(),
    };

    if is_legacy {
        upgrade_legacy_template(
            template,
            locations,
            &class_rows,
            &section_color_by_id,
            min_slots_by_row_id,
        )
    } else {
        let cleaned = clean_current_template(
            template.expect("non-legacy template present"),
            locations,
            &class_rows,
            &section_color_by_id,
        );
        (cleaned, LegacySlotIdMap::new())
    }
}
