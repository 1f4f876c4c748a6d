//! Slot-context collection.
//!
//! Flattens the weekly template into one entry per slot, carrying everything
//! the model builder needs: section, interval in minutes, effective location,
//! and the stable ordering that drives slot-priority weighting.

use crate::models::state::{ScheduleDocument, DEFAULT_LOCATION_ID, DEFAULT_SUB_SHIFT_MINUTES, DEFAULT_SUB_SHIFT_START_MINUTES};
use crate::models::time::{parse_time_minutes, DayType, MINUTES_PER_DAY};

#[derive(Debug, Clone)]
pub struct SlotContext {
    pub slot_id: String,
    pub section_id: String,
    /// Location used for interval comparisons: the slot's location when
    /// locations are enabled, the default location otherwise.
    pub location_id: String,
    pub day_type: DayType,
    pub block_id: String,
    pub block_label: Option<String>,
    /// Minutes since midnight of the slot's date.
    pub start_minutes: u32,
    /// End in minutes, including `endDayOffset` days. `end == start` marks a
    /// zero-length interval the solver treats as inactive.
    pub end_minutes: u32,
    pub required_slots: i64,
}

impl SlotContext {
    pub fn is_zero_length(&self) -> bool {
        self.end_minutes == self.start_minutes
    }

    pub fn duration_minutes(&self) -> u32 {
        self.end_minutes - self.start_minutes
    }
}

/// Build the slot interval: missing start defaults to 08:00, missing end to
/// start + 8h, then the clamped day offset is applied. An end at or before
/// the start collapses to a zero-length interval.
fn build_interval(start_time: Option<&str>, end_time: Option<&str>, end_day_offset: i64) -> (u32, u32) {
    let start = start_time
        .and_then(parse_time_minutes)
        .unwrap_or(DEFAULT_SUB_SHIFT_START_MINUTES);
    let end = end_time
        .and_then(parse_time_minutes)
        .unwrap_or(start + DEFAULT_SUB_SHIFT_MINUTES);
    let offset = end_day_offset.clamp(0, 3) as u32;
    let total_end = end + offset * MINUTES_PER_DAY;
    if total_end <= start {
        (start, start)
    } else {
        (start, total_end)
    }
}

/// Collect slot contexts in the stable solver order:
/// (blockOrder, locationOrder, rowBandOrder, dayOrder, colBandOrder).
pub fn collect_slot_contexts(doc: &ScheduleDocument) -> Vec<SlotContext> {
    let Some(template) = &doc.weekly_template else {
        return Vec::new();
    };

    let location_order = |location_id: &str| -> usize {
        doc.locations
            .iter()
            .position(|l| l.id == location_id)
            .unwrap_or(0)
    };
    let block_order = |block_id: &str| -> usize {
        template
            .blocks
            .iter()
            .position(|b| b.id == block_id)
            .unwrap_or(template.blocks.len())
    };

    let mut keyed: Vec<((usize, usize, i64, usize, i64), SlotContext)> = Vec::new();
    for template_location in &template.locations {
        let effective_location = if doc.locations_enabled {
            template_location.location_id.clone()
        } else {
            DEFAULT_LOCATION_ID.to_string()
        };
        for slot in &template_location.slots {
            let Some(block) = template.blocks.iter().find(|b| b.id == slot.block_id) else {
                continue;
            };
            let Some(col_band) = template_location
                .col_bands
                .iter()
                .find(|b| b.id == slot.col_band_id)
            else {
                continue;
            };
            let row_order = template_location
                .row_bands
                .iter()
                .find(|b| b.id == slot.row_band_id)
                .map(|b| b.order)
                .unwrap_or(0);
            let (start_minutes, end_minutes) = build_interval(
                slot.start_time.as_deref(),
                slot.end_time.as_deref(),
                slot.end_day_offset.unwrap_or(0),
            );
            keyed.push((
                (
                    block_order(&block.id),
                    location_order(&template_location.location_id),
                    row_order,
                    col_band.day_type.order(),
                    col_band.order,
                ),
                SlotContext {
                    slot_id: slot.id.clone(),
                    section_id: block.section_id.clone(),
                    location_id: effective_location.clone(),
                    day_type: col_band.day_type,
                    block_id: block.id.clone(),
                    block_label: block.label.clone(),
                    start_minutes,
                    end_minutes,
                    required_slots: slot.required_slots.unwrap_or(0).max(0),
                },
            ));
        }
    }

    keyed.sort_by(|a, b| a.0.cmp(&b.0));
    keyed.into_iter().map(|(_, ctx)| ctx).collect()
}
