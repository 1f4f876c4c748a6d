//! State normalization.
//!
//! [`normalize`] upgrades any previously persisted document shape to the
//! canonical schema and enforces referential integrity. It is a pipeline of
//! pure passes over the document; the reported `changed` flag is computed by
//! comparing the result against the input, so normalizing an already
//! canonical document returns it unchanged and reports no change.

mod template;

pub use template::{normalize_weekly_template, LegacySlotIdMap};

use std::collections::{BTreeMap, BTreeSet};

use crate::models::state::{
    build_shift_row_id, parse_shift_row_id, AssignmentSource, Location, MinSlots,
    PreferredWorkingTime, RowKind, ScheduleDocument, SubShift, ThenType, WorkingTimeRequirement,
    DEFAULT_LOCATION_ID, DEFAULT_LOCATION_NAME, DEFAULT_SUB_SHIFT_MINUTES,
    DEFAULT_SUB_SHIFT_START_MINUTES, SHIFT_ROW_SEPARATOR,
};
use crate::models::time::{day_type_for, format_minutes, parse_date_iso, parse_time_minutes, DayType};

/// Block colors cycled over class rows that carry none.
const SECTION_BLOCK_COLORS: [&str; 11] = [
    "#FDE2E4", "#FFD9C9", "#FFE8D6", "#FFEFD1", "#FFF4C1", "#EEF6C8", "#E6F7D9", "#DDF6EE",
    "#D9F0FF", "#DEE8FF", "#E8E1F5",
];

const DEFAULT_WINDOW_START_MINUTES: u32 = 7 * 60;
const DEFAULT_WINDOW_END_MINUTES: u32 = 17 * 60;

/// Normalize a schedule document into canonical form. Returns the canonical
/// document and whether anything was rewritten.
pub fn normalize(doc: ScheduleDocument) -> (ScheduleDocument, bool) {
    let original = doc.clone();
    let doc = normalize_document(doc);
    let changed = doc != original;
    (doc, changed)
}

fn normalize_document(mut doc: ScheduleDocument) -> ScheduleDocument {
    doc.locations = ensure_locations(std::mem::take(&mut doc.locations));
    let location_ids: BTreeSet<String> = doc.locations.iter().map(|l| l.id.clone()).collect();

    for clinician in &mut doc.clinicians {
        clinician.preferred_working_times =
            normalize_preferred_working_times(&clinician.preferred_working_times);
        for vacation in &mut clinician.vacations {
            if vacation.end_iso < vacation.start_iso {
                std::mem::swap(&mut vacation.start_iso, &mut vacation.end_iso);
            }
        }
    }

    // Class rows: sub-shifts, block colors, location references.
    let mut class_index = 0usize;
    for row in &mut doc.rows {
        if row.kind != RowKind::Class {
            continue;
        }
        row.sub_shifts = normalize_sub_shifts(&row.sub_shifts);
        let trimmed_color = row
            .block_color
            .as_deref()
            .map(str::trim)
            .filter(|c| !c.is_empty())
            .map(str::to_string);
        row.block_color = Some(trimmed_color.unwrap_or_else(|| {
            SECTION_BLOCK_COLORS[class_index % SECTION_BLOCK_COLORS.len()].to_string()
        }));
        let location_ok = row
            .location_id
            .as_ref()
            .map(|id| location_ids.contains(id))
            .unwrap_or(false);
        if !location_ok || !doc.locations_enabled {
            row.location_id = Some(DEFAULT_LOCATION_ID.to_string());
        }
        class_index += 1;
    }

    let class_row_ids: BTreeSet<String> = doc
        .rows
        .iter()
        .filter(|r| r.kind == RowKind::Class)
        .map(|r| r.id.clone())
        .collect();
    let row_ids: BTreeSet<String> = doc.rows.iter().map(|r| r.id.clone()).collect();
    let sub_shift_ids_by_class: BTreeMap<String, Vec<String>> = doc
        .rows
        .iter()
        .filter(|r| r.kind == RowKind::Class)
        .map(|r| {
            (
                r.id.clone(),
                r.sub_shifts.iter().map(|s| s.id.clone()).collect(),
            )
        })
        .collect();
    let fallback_shift_id_by_class: BTreeMap<String, String> = doc
        .rows
        .iter()
        .filter(|r| r.kind == RowKind::Class)
        .map(|r| {
            (
                r.id.clone(),
                r.sub_shifts
                    .first()
                    .map(|s| s.id.clone())
                    .unwrap_or_else(|| "s1".to_string()),
            )
        })
        .collect();

    let raw_slot_ids: BTreeSet<String> = doc
        .weekly_template
        .iter()
        .flat_map(|t| t.locations.iter())
        .flat_map(|loc| loc.slots.iter())
        .map(|s| s.id.clone())
        .collect();

    // Legacy row-id upgrade for assignments (rule 6, first half).
    let assignments = std::mem::take(&mut doc.assignments);
    let mut next_assignments = Vec::with_capacity(assignments.len());
    for mut assignment in assignments {
        // Canonical slot references are left untouched.
        if raw_slot_ids.contains(&assignment.row_id) {
            next_assignments.push(assignment);
            continue;
        }
        if class_row_ids.contains(&assignment.row_id)
            && !assignment.row_id.contains(SHIFT_ROW_SEPARATOR)
        {
            let fallback = fallback_shift_id_by_class
                .get(&assignment.row_id)
                .cloned()
                .unwrap_or_else(|| "s1".to_string());
            assignment.row_id = build_shift_row_id(&assignment.row_id, &fallback);
        }
        if assignment.row_id.contains(SHIFT_ROW_SEPARATOR) {
            let (class_id, sub_shift_id) = parse_shift_row_id(&assignment.row_id);
            let class_id = class_id.to_string();
            if !class_row_ids.contains(&class_id) {
                continue;
            }
            let known = sub_shift_id
                .map(|sub| {
                    sub_shift_ids_by_class
                        .get(&class_id)
                        .map(|ids| ids.iter().any(|id| id == sub))
                        .unwrap_or(false)
                })
                .unwrap_or(false);
            if !known {
                let Some(fallback) = fallback_shift_id_by_class.get(&class_id) else {
                    continue;
                };
                assignment.row_id = build_shift_row_id(&class_id, fallback);
            }
            next_assignments.push(assignment);
            continue;
        }
        if assignment.row_id.starts_with("pool-") || row_ids.contains(&assignment.row_id) {
            next_assignments.push(assignment);
        }
    }
    doc.assignments = next_assignments;

    // minSlotsByRowId migration (rule 3 support data).
    let mut min_slots = std::mem::take(&mut doc.min_slots_by_row_id);
    for row in doc.rows.iter().filter(|r| r.kind == RowKind::Class) {
        let base = min_slots.remove(&row.id);
        for shift in &row.sub_shifts {
            let key = build_shift_row_id(&row.id, &shift.id);
            min_slots.entry(key).or_insert_with(|| {
                if shift.id == "s1" {
                    base.unwrap_or(MinSlots {
                        weekday: 0,
                        weekend: 0,
                    })
                } else {
                    MinSlots {
                        weekday: 0,
                        weekend: 0,
                    }
                }
            });
        }
    }
    min_slots.retain(|key, _| {
        if !key.contains(SHIFT_ROW_SEPARATOR) {
            return true;
        }
        let (class_id, sub_shift_id) = parse_shift_row_id(key);
        match sub_shift_id {
            None => false,
            Some(sub) => sub_shift_ids_by_class
                .get(class_id)
                .map(|ids| ids.iter().any(|id| id == sub))
                .unwrap_or(false),
        }
    });
    doc.min_slots_by_row_id = min_slots;

    // Legacy row-id upgrade for overrides (rule 7, first half).
    let overrides = std::mem::take(&mut doc.slot_overrides_by_key);
    let mut next_overrides: BTreeMap<String, i64> = BTreeMap::new();
    for (key, value) in overrides {
        let Some((row_id, date_iso)) = split_override_key(&key) else {
            continue;
        };
        let mut next_row_id = row_id.to_string();
        if !raw_slot_ids.contains(&next_row_id) {
            if class_row_ids.contains(&next_row_id) && !next_row_id.contains(SHIFT_ROW_SEPARATOR)
            {
                next_row_id = build_shift_row_id(&next_row_id, "s1");
            } else if next_row_id.contains(SHIFT_ROW_SEPARATOR) {
                let (class_id, sub_shift_id) = parse_shift_row_id(&next_row_id);
                let class_id = class_id.to_string();
                let Some(shift_ids) = sub_shift_ids_by_class.get(&class_id) else {
                    continue;
                };
                let Some(sub) = sub_shift_id else {
                    continue;
                };
                if !shift_ids.iter().any(|id| id == sub) {
                    let Some(fallback) = fallback_shift_id_by_class.get(&class_id) else {
                        continue;
                    };
                    next_row_id = build_shift_row_id(&class_id, fallback);
                }
            }
        }
        *next_overrides
            .entry(format!("{next_row_id}__{date_iso}"))
            .or_insert(0) += value;
    }
    doc.slot_overrides_by_key = next_overrides;

    // Template migration (rules 3-5).
    let (weekly_template, legacy_map) = normalize_weekly_template(
        doc.weekly_template.as_ref(),
        &doc.locations,
        &doc.rows,
        &doc.min_slots_by_row_id,
    );
    doc.weekly_template = Some(weekly_template);

    let slot_ids: BTreeSet<String> = doc
        .weekly_template
        .iter()
        .flat_map(|t| t.locations.iter())
        .flat_map(|loc| loc.slots.iter())
        .map(|s| s.id.clone())
        .collect();
    let pool_row_ids: BTreeSet<String> = doc
        .rows
        .iter()
        .filter(|r| r.kind == RowKind::Pool)
        .map(|r| r.id.clone())
        .collect();

    // Combined legacy map: template-provided entries win, then ids derived
    // from the `{base}__{dayType}` shape of today's slot ids.
    let mut slot_id_map = legacy_map;
    for slot_id in &slot_ids {
        let parts: Vec<&str> = slot_id.split("__").collect();
        if parts.len() != 2 {
            continue;
        }
        let Some(day_type) = DayType::parse(parts[1]) else {
            continue;
        };
        if parts[0].is_empty() {
            continue;
        }
        slot_id_map
            .entry(parts[0].to_string())
            .or_default()
            .entry(day_type)
            .or_insert_with(|| slot_id.clone());
    }

    let resolve_legacy = |row_id: &str, date_iso: &str| -> Option<String> {
        match slot_id_map.get(row_id) {
            None => Some(row_id.to_string()),
            Some(mapping) => {
                let day_type = day_type_for(date_iso, &doc.holidays);
                mapping.get(&day_type).cloned()
            }
        }
    };

    // Rewrite assignments onto today's slot ids (rule 6, second half).
    let assignments = std::mem::take(&mut doc.assignments);
    let mut mapped_assignments = Vec::with_capacity(assignments.len());
    for mut assignment in assignments {
        if pool_row_ids.contains(&assignment.row_id) {
            if assignment.source.is_none() {
                assignment.source = Some(AssignmentSource::Manual);
            }
            mapped_assignments.push(assignment);
            continue;
        }
        if !slot_ids.contains(&assignment.row_id) {
            let Some(mapped) = resolve_legacy(&assignment.row_id, &assignment.date_iso) else {
                continue;
            };
            assignment.row_id = mapped;
        }
        if !slot_ids.contains(&assignment.row_id) {
            continue;
        }
        if assignment.source.is_none() {
            assignment.source = Some(AssignmentSource::Manual);
        }
        mapped_assignments.push(assignment);
    }
    doc.assignments = mapped_assignments;

    // Rewrite overrides, merging keys that collapse (rule 7, second half).
    let overrides = std::mem::take(&mut doc.slot_overrides_by_key);
    let mut mapped_overrides: BTreeMap<String, i64> = BTreeMap::new();
    for (key, value) in overrides {
        let Some((row_id, date_iso)) = split_override_key(&key) else {
            continue;
        };
        let mut next_row_id = row_id.to_string();
        if !slot_ids.contains(&next_row_id) {
            let Some(mapped) = resolve_legacy(&next_row_id, date_iso) else {
                continue;
            };
            next_row_id = mapped;
        }
        if !slot_ids.contains(&next_row_id) {
            continue;
        }
        *mapped_overrides
            .entry(format!("{next_row_id}__{date_iso}"))
            .or_insert(0) += value;
    }
    doc.slot_overrides_by_key = mapped_overrides;

    // Solver settings (rule 8).
    let settings = &mut doc.solver_settings;
    settings.on_call_rest_days_before = settings.on_call_rest_days_before.clamp(0, 7);
    settings.on_call_rest_days_after = settings.on_call_rest_days_after.clamp(0, 7);
    settings.working_hours_tolerance_hours = settings.working_hours_tolerance_hours.clamp(0, 40);
    let section_valid = settings
        .on_call_rest_section_id
        .as_ref()
        .map(|id| class_row_ids.contains(id))
        .unwrap_or(false);
    if !section_valid {
        settings.on_call_rest_section_id = doc
            .rows
            .iter()
            .find(|r| r.kind == RowKind::Class)
            .map(|r| r.id.clone());
    }

    // Solver rules (rule 9).
    for rule in &mut doc.solver_rules {
        if !slot_ids.contains(&rule.if_shift_row_id) {
            rule.enabled = false;
        }
        if rule.then_type == ThenType::ShiftRow {
            let target_valid = rule
                .then_shift_row_id
                .as_ref()
                .map(|id| slot_ids.contains(id))
                .unwrap_or(false);
            if !target_valid {
                rule.enabled = false;
            }
        }
    }

    doc
}

/// Deduplicate locations by id (first occurrence wins the position, later
/// entries replace the value) and guarantee the default location exists.
fn ensure_locations(locations: Vec<Location>) -> Vec<Location> {
    let mut result: Vec<Location> = Vec::with_capacity(locations.len());
    let mut index_by_id: BTreeMap<String, usize> = BTreeMap::new();
    for location in locations {
        if location.id.is_empty() {
            continue;
        }
        match index_by_id.get(&location.id) {
            Some(&index) => result[index] = location,
            None => {
                index_by_id.insert(location.id.clone(), result.len());
                result.push(location);
            }
        }
    }
    if !index_by_id.contains_key(DEFAULT_LOCATION_ID) {
        result.push(Location {
            id: DEFAULT_LOCATION_ID.to_string(),
            name: DEFAULT_LOCATION_NAME.to_string(),
        });
    }
    result
}

/// Split an override key `{rowId}__{dateISO}` on its *last* `__` so slot ids
/// that themselves contain `__` survive. Keys without a parseable date are
/// discarded by the caller.
fn split_override_key(key: &str) -> Option<(&str, &str)> {
    let (row_id, date_iso) = key.rsplit_once("__")?;
    if row_id.is_empty() || parse_date_iso(date_iso).is_none() {
        return None;
    }
    Some((row_id, date_iso))
}

fn normalize_preferred_entry(entry: Option<&PreferredWorkingTime>) -> PreferredWorkingTime {
    let (start_raw, end_raw, requirement_raw) = match entry {
        Some(e) => (
            e.start_time.as_deref().and_then(parse_time_minutes),
            e.end_time.as_deref().and_then(parse_time_minutes),
            e.requirement,
        ),
        None => (None, None, WorkingTimeRequirement::None),
    };
    let invalid = match (start_raw, end_raw) {
        (Some(start), Some(end)) => end <= start,
        _ => true,
    };
    let (start, end, requirement) = if invalid {
        (None, None, WorkingTimeRequirement::None)
    } else {
        (start_raw, end_raw, requirement_raw)
    };
    PreferredWorkingTime {
        start_time: Some(format_minutes(start.unwrap_or(DEFAULT_WINDOW_START_MINUTES))),
        end_time: Some(format_minutes(end.unwrap_or(DEFAULT_WINDOW_END_MINUTES))),
        requirement,
    }
}

/// Rebuild the preferred-working-time map with exactly the seven weekday
/// keys; entries failing the window invariant lose their requirement.
fn normalize_preferred_working_times(
    raw: &BTreeMap<String, PreferredWorkingTime>,
) -> BTreeMap<String, PreferredWorkingTime> {
    DayType::WEEKDAYS
        .iter()
        .map(|day| {
            (
                day.as_str().to_string(),
                normalize_preferred_entry(raw.get(day.as_str())),
            )
        })
        .collect()
}

/// Normalize a class row's sub-shifts: at most three, orders 1..3, ids and
/// times filled from defaults, legacy `hours` converted to an end time.
fn normalize_sub_shifts(sub_shifts: &[SubShift]) -> Vec<SubShift> {
    let default_shift = || SubShift {
        id: "s1".to_string(),
        name: "Shift 1".to_string(),
        order: 1,
        start_time: Some(format_minutes(DEFAULT_SUB_SHIFT_START_MINUTES)),
        end_time: Some(format_minutes(
            DEFAULT_SUB_SHIFT_START_MINUTES + DEFAULT_SUB_SHIFT_MINUTES,
        )),
        end_day_offset: Some(0),
        hours: None,
    };
    if sub_shifts.is_empty() {
        return vec![default_shift()];
    }

    let mut used_orders: BTreeSet<i64> = BTreeSet::new();
    let mut normalized = Vec::new();
    for shift in sub_shifts {
        let mut order = if (1..=3).contains(&shift.order) {
            Some(shift.order)
        } else {
            None
        };
        if order.map(|o| used_orders.contains(&o)).unwrap_or(true) {
            order = (1..=3).find(|candidate| !used_orders.contains(candidate));
        }
        let Some(order) = order else {
            continue;
        };
        used_orders.insert(order);

        let shift_id = if shift.id.is_empty() {
            format!("s{order}")
        } else {
            shift.id.clone()
        };
        let shift_name = if shift.name.is_empty() {
            format!("Shift {order}")
        } else {
            shift.name.clone()
        };
        let start_minutes = shift
            .start_time
            .as_deref()
            .and_then(parse_time_minutes)
            .unwrap_or(DEFAULT_SUB_SHIFT_START_MINUTES + DEFAULT_SUB_SHIFT_MINUTES * (order as u32 - 1));
        let duration_minutes = shift
            .hours
            .map(|h| (h.max(0.0) * 60.0) as u32)
            .unwrap_or(DEFAULT_SUB_SHIFT_MINUTES);
        let end_minutes = shift
            .end_time
            .as_deref()
            .and_then(parse_time_minutes)
            .unwrap_or(start_minutes + duration_minutes);
        let end_day_offset = shift.end_day_offset.unwrap_or(0).clamp(0, 3);

        normalized.push(SubShift {
            id: shift_id,
            name: shift_name,
            order,
            start_time: Some(format_minutes(start_minutes)),
            end_time: Some(format_minutes(end_minutes)),
            end_day_offset: Some(end_day_offset),
            hours: None,
        });
    }

    if normalized.is_empty() {
        return vec![default_shift()];
    }
    normalized.sort_by_key(|s| s.order);
    normalized.truncate(3);
    normalized
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ensure_locations_adds_default() {
        let locations = ensure_locations(vec![Location {
            id: "loc-1".to_string(),
            name: "Berlin".to_string(),
        }]);
        assert_eq!(locations.len(), 2);
        assert_eq!(locations[1].id, DEFAULT_LOCATION_ID);
    }

    #[test]
    fn test_ensure_locations_dedupes_by_id() {
        let locations = ensure_locations(vec![
            Location {
                id: DEFAULT_LOCATION_ID.to_string(),
                name: "First".to_string(),
            },
            Location {
                id: DEFAULT_LOCATION_ID.to_string(),
                name: "Second".to_string(),
            },
        ]);
        assert_eq!(locations.len(), 1);
        assert_eq!(locations[0].name, "Second");
    }

    #[test]
    fn test_split_override_key_uses_last_separator() {
        assert_eq!(
            split_override_key("slot-a__mon__2026-01-05"),
            Some(("slot-a__mon", "2026-01-05"))
        );
        assert_eq!(
            split_override_key("legacy__2026-01-05"),
            Some(("legacy", "2026-01-05"))
        );
        assert_eq!(split_override_key("no-date"), None);
        assert_eq!(split_override_key("row__not-a-date"), None);
    }

    #[test]
    fn test_normalize_sub_shifts_fills_defaults() {
        let shifts = normalize_sub_shifts(&[]);
        assert_eq!(shifts.len(), 1);
        assert_eq!(shifts[0].id, "s1");
        assert_eq!(shifts[0].start_time.as_deref(), Some("08:00"));
        assert_eq!(shifts[0].end_time.as_deref(), Some("16:00"));
    }

    #[test]
    fn test_normalize_sub_shifts_reassigns_duplicate_orders() {
        let shifts = normalize_sub_shifts(&[
            SubShift {
                id: "a".to_string(),
                name: "A".to_string(),
                order: 1,
                start_time: None,
                end_time: None,
                end_day_offset: None,
                hours: None,
            },
            SubShift {
                id: "b".to_string(),
                name: "B".to_string(),
                order: 1,
                start_time: None,
                end_time: None,
                end_day_offset: None,
                hours: None,
            },
        ]);
        assert_eq!(shifts.len(), 2);
        assert_eq!(shifts[0].order, 1);
        assert_eq!(shifts[1].order, 2);
    }

    #[test]
    fn test_normalize_sub_shifts_honors_legacy_hours() {
        let shifts = normalize_sub_shifts(&[SubShift {
            id: "s1".to_string(),
            name: "Early".to_string(),
            order: 1,
            start_time: Some("06:00".to_string()),
            end_time: None,
            end_day_offset: None,
            hours: Some(6.0),
        }]);
        assert_eq!(shifts[0].end_time.as_deref(), Some("12:00"));
        assert_eq!(shifts[0].hours, None);
    }

    #[test]
    fn test_normalize_preferred_entry_clears_invalid_window() {
        let entry = PreferredWorkingTime {
            start_time: Some("12:00".to_string()),
            end_time: Some("09:00".to_string()),
            requirement: WorkingTimeRequirement::Mandatory,
        };
        let normalized = normalize_preferred_entry(Some(&entry));
        assert_eq!(normalized.requirement, WorkingTimeRequirement::None);
        assert_eq!(normalized.start_time.as_deref(), Some("07:00"));
        assert_eq!(normalized.end_time.as_deref(), Some("17:00"));
    }
}
