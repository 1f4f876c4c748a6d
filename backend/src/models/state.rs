//! Canonical schedule document.
//!
//! One `ScheduleDocument` is persisted per owner as a single JSON blob. The
//! serde contract below is the canonical (version 4) schema; older persisted
//! shapes deserialize through the same types via field defaults and are
//! upgraded by [`crate::normalize`]. Entities reference each other by id
//! only; lookups resolve lazily through the helper methods at the bottom.

use std::collections::BTreeMap;

use serde::{Deserialize, Deserializer, Serialize};

use super::time::{parse_time_minutes, DayType};

pub const DEFAULT_LOCATION_ID: &str = "loc-default";
pub const DEFAULT_LOCATION_NAME: &str = "Default";
/// Separator in legacy `{classId}::{subShiftId}` row identifiers.
pub const SHIFT_ROW_SEPARATOR: &str = "::";
/// Current weekly-template schema version.
pub const TEMPLATE_VERSION: i64 = 4;

pub const DEFAULT_SUB_SHIFT_START_MINUTES: u32 = 8 * 60;
pub const DEFAULT_SUB_SHIFT_MINUTES: u32 = 8 * 60;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Location {
    pub id: String,
    pub name: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RowKind {
    Class,
    Pool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubShift {
    pub id: String,
    pub name: String,
    pub order: i64,
    #[serde(default)]
    pub start_time: Option<String>,
    #[serde(default)]
    pub end_time: Option<String>,
    #[serde(default)]
    pub end_day_offset: Option<i64>,
    /// Legacy duration field, superseded by explicit end times.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hours: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkplaceRow {
    pub id: String,
    pub name: String,
    pub kind: RowKind,
    #[serde(default)]
    pub block_color: Option<String>,
    #[serde(default)]
    pub location_id: Option<String>,
    #[serde(default)]
    pub sub_shifts: Vec<SubShift>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VacationRange {
    pub id: String,
    #[serde(rename = "startISO")]
    pub start_iso: String,
    #[serde(rename = "endISO")]
    pub end_iso: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Holiday {
    #[serde(rename = "dateISO")]
    pub date_iso: String,
    pub name: String,
}

/// Requirement level of a preferred-working-time entry. Legacy documents used
/// `preferred` as a synonym for `preference`; unknown values collapse to
/// `none` during deserialization.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkingTimeRequirement {
    #[default]
    None,
    Preference,
    Mandatory,
}

impl WorkingTimeRequirement {
    pub fn coerce(raw: &str) -> WorkingTimeRequirement {
        match raw.trim().to_ascii_lowercase().as_str() {
            "preference" | "preferred" => WorkingTimeRequirement::Preference,
            "mandatory" => WorkingTimeRequirement::Mandatory,
            _ => WorkingTimeRequirement::None,
        }
    }
}

impl<'de> Deserialize<'de> for WorkingTimeRequirement {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = Option::<String>::deserialize(deserializer)?;
        Ok(raw
            .map(|s| WorkingTimeRequirement::coerce(&s))
            .unwrap_or_default())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PreferredWorkingTime {
    #[serde(default)]
    pub start_time: Option<String>,
    #[serde(default)]
    pub end_time: Option<String>,
    #[serde(default)]
    pub requirement: WorkingTimeRequirement,
}

/// Validated working-time window for one weekday. An entry only constrains or
/// rewards the solver when its window parses and satisfies `end > start`;
/// everything else degrades to `None`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkingWindow {
    None,
    Preference { start: u32, end: u32 },
    Mandatory { start: u32, end: u32 },
}

impl WorkingWindow {
    pub fn from_entry(entry: &PreferredWorkingTime) -> WorkingWindow {
        let start = entry.start_time.as_deref().and_then(parse_time_minutes);
        let end = entry.end_time.as_deref().and_then(parse_time_minutes);
        match (entry.requirement, start, end) {
            (WorkingTimeRequirement::Preference, Some(start), Some(end)) if end > start => {
                WorkingWindow::Preference { start, end }
            }
            (WorkingTimeRequirement::Mandatory, Some(start), Some(end)) if end > start => {
                WorkingWindow::Mandatory { start, end }
            }
            _ => WorkingWindow::None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Clinician {
    pub id: String,
    pub name: String,
    pub qualified_section_ids: Vec<String>,
    #[serde(default)]
    pub preferred_section_ids: Vec<String>,
    #[serde(default)]
    pub vacations: Vec<VacationRange>,
    #[serde(default)]
    pub preferred_working_times: BTreeMap<String, PreferredWorkingTime>,
    #[serde(default)]
    pub working_hours_per_week: Option<f64>,
    #[serde(default)]
    pub working_hours_tolerance_hours: Option<i64>,
}

impl Clinician {
    pub fn is_on_vacation(&self, date_iso: &str) -> bool {
        self.vacations
            .iter()
            .any(|v| v.start_iso.as_str() <= date_iso && date_iso <= v.end_iso.as_str())
    }

    /// Validated window for a weekday key, `None` when no entry exists.
    pub fn working_window(&self, weekday: DayType) -> WorkingWindow {
        self.preferred_working_times
            .get(weekday.as_str())
            .map(WorkingWindow::from_entry)
            .unwrap_or(WorkingWindow::None)
    }
}

/// Legacy per-row minimum staffing record, still used when synthesizing
/// templates from pre-v4 documents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MinSlots {
    pub weekday: i64,
    pub weekend: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TemplateRowBand {
    pub id: String,
    pub order: i64,
    #[serde(default)]
    pub label: Option<String>,
}

fn default_day_type() -> DayType {
    DayType::Mon
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TemplateColBand {
    pub id: String,
    #[serde(default)]
    pub label: Option<String>,
    pub order: i64,
    #[serde(default = "default_day_type")]
    pub day_type: DayType,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TemplateBlock {
    pub id: String,
    pub section_id: String,
    #[serde(default)]
    pub label: Option<String>,
    #[serde(default)]
    pub required_slots: i64,
    #[serde(default)]
    pub color: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TemplateSlot {
    pub id: String,
    #[serde(default)]
    pub location_id: String,
    #[serde(default)]
    pub row_band_id: String,
    #[serde(default)]
    pub col_band_id: String,
    #[serde(default)]
    pub block_id: String,
    #[serde(default)]
    pub required_slots: Option<i64>,
    #[serde(default)]
    pub start_time: Option<String>,
    #[serde(default)]
    pub end_time: Option<String>,
    #[serde(default)]
    pub end_day_offset: Option<i64>,
    /// Pre-v4 fields, consumed by the template upgrade and dropped from the
    /// canonical form.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub section_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enabled_by_day_type: Option<BTreeMap<String, bool>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub required_by_day_type: Option<BTreeMap<String, i64>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WeeklyTemplateLocation {
    pub location_id: String,
    #[serde(default)]
    pub row_bands: Vec<TemplateRowBand>,
    #[serde(default)]
    pub col_bands: Vec<TemplateColBand>,
    #[serde(default)]
    pub slots: Vec<TemplateSlot>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WeeklyTemplate {
    #[serde(default)]
    pub version: i64,
    #[serde(default)]
    pub blocks: Vec<TemplateBlock>,
    #[serde(default)]
    pub locations: Vec<WeeklyTemplateLocation>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AssignmentSource {
    Manual,
    Solver,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Assignment {
    pub id: String,
    pub row_id: String,
    #[serde(rename = "dateISO")]
    pub date_iso: String,
    pub clinician_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<AssignmentSource>,
}

impl Assignment {
    /// Assignments created before the solver existed carry no source tag and
    /// count as manual.
    pub fn is_manual(&self) -> bool {
        !matches!(self.source, Some(AssignmentSource::Solver))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ThenType {
    ShiftRow,
    Off,
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SolverRule {
    pub id: String,
    pub name: String,
    #[serde(default = "default_true")]
    pub enabled: bool,
    pub if_shift_row_id: String,
    pub day_delta: i64,
    pub then_type: ThenType,
    #[serde(default)]
    pub then_shift_row_id: Option<String>,
}

fn default_rest_days() -> i64 {
    1
}

fn default_tolerance_hours() -> i64 {
    5
}

fn default_weight_coverage() -> i64 {
    1000
}

fn default_weight_slack() -> i64 {
    1000
}

fn default_weight_total_assignments() -> i64 {
    100
}

fn default_weight_slot_priority() -> i64 {
    10
}

fn default_weight_time_window() -> i64 {
    5
}

fn default_weight_gap_penalty() -> i64 {
    50
}

fn default_weight_one() -> i64 {
    1
}

/// Solver tuning knobs. Every field has a default so partially persisted
/// settings deserialize fully populated; normalization clamps numeric ranges
/// and validates the rest-section reference.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SolverSettings {
    #[serde(default = "default_true")]
    pub enforce_same_location_per_day: bool,
    #[serde(default)]
    pub on_call_rest_enabled: bool,
    #[serde(default)]
    pub on_call_rest_section_id: Option<String>,
    #[serde(default = "default_rest_days")]
    pub on_call_rest_days_before: i64,
    #[serde(default = "default_rest_days")]
    pub on_call_rest_days_after: i64,
    #[serde(default = "default_true")]
    pub prefer_continuous_shifts: bool,
    #[serde(default = "default_tolerance_hours")]
    pub working_hours_tolerance_hours: i64,
    #[serde(default = "default_weight_coverage")]
    pub weight_coverage: i64,
    #[serde(default = "default_weight_slack")]
    pub weight_slack: i64,
    #[serde(default = "default_weight_total_assignments")]
    pub weight_total_assignments: i64,
    #[serde(default = "default_weight_slot_priority")]
    pub weight_slot_priority: i64,
    #[serde(default = "default_weight_time_window")]
    pub weight_time_window: i64,
    #[serde(default = "default_weight_gap_penalty")]
    pub weight_gap_penalty: i64,
    #[serde(default = "default_weight_one")]
    pub weight_section_preference: i64,
    #[serde(default = "default_weight_one")]
    pub weight_working_hours: i64,
}

impl Default for SolverSettings {
    fn default() -> Self {
        SolverSettings {
            enforce_same_location_per_day: true,
            on_call_rest_enabled: false,
            on_call_rest_section_id: None,
            on_call_rest_days_before: 1,
            on_call_rest_days_after: 1,
            prefer_continuous_shifts: true,
            working_hours_tolerance_hours: 5,
            weight_coverage: 1000,
            weight_slack: 1000,
            weight_total_assignments: 100,
            weight_slot_priority: 10,
            weight_time_window: 5,
            weight_gap_penalty: 50,
            weight_section_preference: 1,
            weight_working_hours: 1,
        }
    }
}

/// The per-owner schedule document. Created on first access, mutated by owner
/// writes, read-only inside a solve.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScheduleDocument {
    #[serde(default)]
    pub locations: Vec<Location>,
    #[serde(default = "default_true")]
    pub locations_enabled: bool,
    pub rows: Vec<WorkplaceRow>,
    pub clinicians: Vec<Clinician>,
    pub assignments: Vec<Assignment>,
    #[serde(default)]
    pub min_slots_by_row_id: BTreeMap<String, MinSlots>,
    #[serde(default)]
    pub slot_overrides_by_key: BTreeMap<String, i64>,
    #[serde(default)]
    pub weekly_template: Option<WeeklyTemplate>,
    #[serde(default)]
    pub holidays: Vec<Holiday>,
    #[serde(default, rename = "publishedWeekStartISOs")]
    pub published_week_start_isos: Vec<String>,
    #[serde(default)]
    pub solver_settings: SolverSettings,
    #[serde(default)]
    pub solver_rules: Vec<SolverRule>,
}

impl ScheduleDocument {
    pub fn row_by_id(&self, id: &str) -> Option<&WorkplaceRow> {
        self.rows.iter().find(|r| r.id == id)
    }

    pub fn class_rows(&self) -> impl Iterator<Item = &WorkplaceRow> {
        self.rows.iter().filter(|r| r.kind == RowKind::Class)
    }

    pub fn pool_row_ids(&self) -> impl Iterator<Item = &str> {
        self.rows
            .iter()
            .filter(|r| r.kind == RowKind::Pool)
            .map(|r| r.id.as_str())
    }

    pub fn clinician_by_id(&self, id: &str) -> Option<&Clinician> {
        self.clinicians.iter().find(|c| c.id == id)
    }

    pub fn template_slots(&self) -> impl Iterator<Item = (&WeeklyTemplateLocation, &TemplateSlot)> {
        self.weekly_template
            .iter()
            .flat_map(|t| t.locations.iter())
            .flat_map(|loc| loc.slots.iter().map(move |slot| (loc, slot)))
    }

    pub fn find_slot(&self, slot_id: &str) -> Option<(&WeeklyTemplateLocation, &TemplateSlot)> {
        self.template_slots().find(|(_, slot)| slot.id == slot_id)
    }

    pub fn block_by_id(&self, block_id: &str) -> Option<&TemplateBlock> {
        self.weekly_template
            .as_ref()
            .and_then(|t| t.blocks.iter().find(|b| b.id == block_id))
    }
}

/// Split a legacy `{classId}::{subShiftId}` row id.
pub fn parse_shift_row_id(row_id: &str) -> (&str, Option<&str>) {
    match row_id.split_once(SHIFT_ROW_SEPARATOR) {
        Some((class_id, sub_shift_id)) if !sub_shift_id.is_empty() => {
            (class_id, Some(sub_shift_id))
        }
        Some((class_id, _)) => (class_id, None),
        None => (row_id, None),
    }
}

pub fn build_shift_row_id(class_id: &str, sub_shift_id: &str) -> String {
    format!("{class_id}{SHIFT_ROW_SEPARATOR}{sub_shift_id}")
}
