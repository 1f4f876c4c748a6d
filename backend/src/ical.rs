//! iCalendar feed generation.
//!
//! Strict RFC 5545 serializer for published assignments. Text values are
//! escaped byte-for-byte, physical lines are folded at 75 octets on UTF-8
//! character boundaries, and every line ends with CRLF.

use chrono::{DateTime, Duration, Utc};

use crate::models::state::{RowKind, ScheduleDocument};
use crate::models::time::{format_date_iso, parse_date_iso, week_start_monday};

/// Escape a text value per RFC 5545: backslash, newlines, comma, semicolon.
fn escape_text(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    let normalized = value.replace("\r\n", "\n").replace('\r', "\n");
    for ch in normalized.chars() {
        match ch {
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            ',' => out.push_str("\\,"),
            ';' => out.push_str("\\;"),
            other => out.push(other),
        }
    }
    out
}

fn format_dtstamp(dt: DateTime<Utc>) -> String {
    dt.format("%Y%m%dT%H%M%SZ").to_string()
}

fn iso_to_yyyymmdd(date_iso: &str) -> String {
    date_iso.replace('-', "")
}

/// Fold one logical line into physical lines of at most 75 octets; each
/// continuation starts with a single space and may carry 74 octets of
/// content. Splits only on character boundaries.
fn fold_line(line: &str) -> String {
    const FIRST_LIMIT: usize = 75;
    const NEXT_LIMIT: usize = 74;

    let mut segments: Vec<String> = Vec::new();
    let mut current = String::new();
    let mut current_limit = FIRST_LIMIT;
    for ch in line.chars() {
        if !current.is_empty() && current.len() + ch.len_utf8() > current_limit {
            segments.push(std::mem::take(&mut current));
            current_limit = NEXT_LIMIT;
        }
        current.push(ch);
    }
    if !current.is_empty() {
        segments.push(current);
    }
    if segments.is_empty() {
        return line.to_string();
    }

    let mut out = segments[0].clone();
    for segment in &segments[1..] {
        out.push_str("\r\n ");
        out.push_str(segment);
    }
    out
}

fn fold_lines(lines: &[String]) -> String {
    let mut out = String::new();
    for (index, line) in lines.iter().enumerate() {
        if index > 0 {
            out.push_str("\r\n");
        }
        out.push_str(&fold_line(line));
    }
    out.push_str("\r\n");
    out
}

/// Render the published schedule as a `VCALENDAR`.
///
/// An assignment becomes a `VEVENT` when its row resolves to a template slot
/// whose block section is a class row, its date falls in a published week,
/// it survives the optional clinician filter, and the clinician is not on
/// vacation that day.
pub fn generate_ics(
    doc: &ScheduleDocument,
    published_week_start_isos: &[String],
    cal_name: &str,
    filter_clinician_id: Option<&str>,
    dtstamp: DateTime<Utc>,
) -> String {
    let mut lines: Vec<String> = vec![
        "BEGIN:VCALENDAR".to_string(),
        "VERSION:2.0".to_string(),
        "PRODID:-//ShiftSchedule//EN".to_string(),
        "CALSCALE:GREGORIAN".to_string(),
        "METHOD:PUBLISH".to_string(),
        format!("X-WR-CALNAME:{}", escape_text(cal_name)),
    ];

    for assignment in &doc.assignments {
        let Some((_, slot)) = doc.find_slot(&assignment.row_id) else {
            continue;
        };
        let Some(block) = doc.block_by_id(&slot.block_id) else {
            continue;
        };
        let Some(section_row) = doc.row_by_id(&block.section_id) else {
            continue;
        };
        if section_row.kind != RowKind::Class {
            continue;
        }

        let Some(date) = parse_date_iso(&assignment.date_iso) else {
            continue;
        };
        let week_start = format_date_iso(week_start_monday(date));
        if !published_week_start_isos.contains(&week_start) {
            continue;
        }

        if let Some(filter) = filter_clinician_id {
            if assignment.clinician_id != filter {
                continue;
            }
        }

        let clinician = doc.clinician_by_id(&assignment.clinician_id);
        if let Some(clinician) = clinician {
            if clinician.is_on_vacation(&assignment.date_iso) {
                continue;
            }
        }
        let clinician_name = clinician
            .map(|c| c.name.as_str())
            .unwrap_or(assignment.clinician_id.as_str());

        let slot_label = block.label.as_deref().filter(|l| !l.is_empty());
        let summary = match slot_label {
            Some(label) => format!("{} ({label}) - {clinician_name}", section_row.name),
            None => format!("{} - {clinician_name}", section_row.name),
        };

        let start = iso_to_yyyymmdd(&assignment.date_iso);
        let end = iso_to_yyyymmdd(&format_date_iso(date + Duration::days(1)));
        let uid = format!("{}@shiftschedule", assignment.id);

        lines.push("BEGIN:VEVENT".to_string());
        lines.push(format!("UID:{}", escape_text(&uid)));
        lines.push(format!("DTSTAMP:{}", format_dtstamp(dtstamp)));
        lines.push(format!("DTSTART;VALUE=DATE:{start}"));
        lines.push(format!("DTEND;VALUE=DATE:{end}"));
        lines.push(format!("SUMMARY:{}", escape_text(&summary)));
        lines.push("END:VEVENT".to_string());
    }

    lines.push("END:VCALENDAR".to_string());
    fold_lines(&lines)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_escape_text() {
        assert_eq!(escape_text("a,b;c\\d"), "a\\,b\\;c\\\\d");
        assert_eq!(escape_text("line1\r\nline2"), "line1\\nline2");
        assert_eq!(escape_text("line1\rline2"), "line1\\nline2");
    }

    #[test]
    fn test_fold_short_line_untouched() {
        assert_eq!(fold_line("SUMMARY:short"), "SUMMARY:short");
    }

    #[test]
    fn test_fold_long_line_limits() {
        let line = format!("SUMMARY:{}", "x".repeat(200));
        let folded = fold_line(&line);
        for (index, physical) in folded.split("\r\n").enumerate() {
            let limit = 75;
            let length = if index == 0 {
                physical.len()
            } else {
                // Continuation lines carry their leading space.
                assert!(physical.starts_with(' '));
                physical.len()
            };
            assert!(length <= limit, "physical line over limit: {length}");
        }
        // Unfolding restores the logical line.
        let unfolded = folded.replace("\r\n ", "");
        assert_eq!(unfolded, line);
    }

    #[test]
    fn test_fold_respects_multibyte_boundaries() {
        let line = format!("SUMMARY:{}", "ä".repeat(100));
        let folded = fold_line(&line);
        for physical in folded.split("\r\n") {
            assert!(physical.len() <= 75);
            // Each segment must be valid UTF-8 by construction; check the
            // content survives unfolding.
        }
        assert_eq!(folded.replace("\r\n ", ""), line);
    }

    #[test]
    fn test_dtstamp_format() {
        let dt = DateTime::parse_from_rfc3339("2026-01-05T08:30:00Z")
            .unwrap()
            .with_timezone(&Utc);
        assert_eq!(format_dtstamp(dt), "20260105T083000Z");
    }
}
