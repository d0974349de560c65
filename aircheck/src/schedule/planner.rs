//! Turns raw provider records into concrete, deduplicated timeslots.

use std::collections::{BTreeSet, HashSet};

use chrono::{DateTime, Utc};
use tracing::warn;

use super::RawShow;
use crate::domain::Timeslot;

/// Map raw records to new timeslots.
///
/// Drops records whose category matches `excluded_category`, records already
/// planned (`known_ids`), and records that start at or before `now`. The
/// result is sorted by start time; records sharing a start keep their source
/// order.
pub fn plan(
    raw: Vec<RawShow>,
    known_ids: &HashSet<u64>,
    now: DateTime<Utc>,
    excluded_category: &str,
) -> Vec<Timeslot> {
    let mut slots = Vec::new();
    let mut planned_ids = HashSet::new();

    for record in raw {
        if record
            .category
            .as_deref()
            .is_some_and(|c| c.eq_ignore_ascii_case(excluded_category))
        {
            continue;
        }
        if known_ids.contains(&record.id) || !planned_ids.insert(record.id) {
            continue;
        }
        if record.start <= now {
            warn!(
                id = record.id,
                show = %record.title,
                start = %record.start,
                "show start is in the past, skipping"
            );
            continue;
        }
        if record.end <= record.start {
            warn!(
                id = record.id,
                show = %record.title,
                "show ends before it starts, skipping"
            );
            continue;
        }

        let recipients: BTreeSet<String> = record
            .recipient_emails
            .iter()
            .map(|e| e.trim().to_string())
            .filter(|e| !e.is_empty())
            .collect();

        slots.push(Timeslot {
            id: record.id,
            show_name: record.title,
            start: record.start,
            end: record.end,
            recipients,
        });
    }

    // Stable: ties keep source order.
    slots.sort_by_key(|s| s.start);
    slots
}

/// Render the plan as an aligned table for the log.
pub fn render_schedule_table(slots: &[Timeslot]) -> String {
    if slots.is_empty() {
        return "no shows planned".to_string();
    }

    let headers = ["Start", "End", "Show", "Recipients"];
    let rows: Vec<[String; 4]> = slots
        .iter()
        .map(|s| {
            [
                s.start.format("%Y-%m-%d %H:%M").to_string(),
                s.end.format("%Y-%m-%d %H:%M").to_string(),
                s.show_name.clone(),
                if s.recipients.is_empty() {
                    "(none)".to_string()
                } else {
                    s.recipients.iter().cloned().collect::<Vec<_>>().join(", ")
                },
            ]
        })
        .collect();

    let mut widths = headers.map(str::len);
    for row in &rows {
        for (w, cell) in widths.iter_mut().zip(row.iter()) {
            *w = (*w).max(cell.len());
        }
    }

    let mut table = String::new();
    let fmt_row = |cells: [&str; 4], widths: &[usize; 4]| {
        let mut line = String::from("|");
        for (cell, w) in cells.iter().zip(widths.iter()) {
            line.push_str(&format!(" {:<width$} |", cell, width = *w));
        }
        line
    };

    table.push_str(&fmt_row(headers, &widths));
    table.push('\n');
    table.push_str(&"-".repeat(widths.iter().sum::<usize>() + 3 * widths.len() + 1));
    for row in &rows {
        table.push('\n');
        table.push_str(&fmt_row(
            [&row[0], &row[1], &row[2], &row[3]],
            &widths,
        ));
    }
    table
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 8, 30, 12, 0, 0).unwrap()
    }

    fn raw(id: u64, title: &str, start_offset_min: i64, end_offset_min: i64) -> RawShow {
        RawShow {
            id,
            title: title.to_string(),
            start: now() + chrono::Duration::minutes(start_offset_min),
            end: now() + chrono::Duration::minutes(end_offset_min),
            category: Some("Music".to_string()),
            recipient_emails: vec!["dj@example.org".to_string()],
        }
    }

    #[test]
    fn excluded_category_is_dropped() {
        let mut show = raw(1, "Robot Radio", 30, 90);
        show.category = Some("Automation".to_string());
        let slots = plan(vec![show, raw(2, "Live Show", 30, 90)], &HashSet::new(), now(), "Automation");
        assert_eq!(slots.len(), 1);
        assert_eq!(slots[0].id, 2);
    }

    #[test]
    fn known_ids_are_dropped() {
        let known: HashSet<u64> = [1].into();
        let slots = plan(vec![raw(1, "A", 30, 90), raw(2, "B", 40, 100)], &known, now(), "Automation");
        assert_eq!(slots.len(), 1);
        assert_eq!(slots[0].id, 2);
    }

    #[test]
    fn replanning_with_all_ids_known_is_empty() {
        let raw_records = vec![raw(1, "A", 30, 90), raw(2, "B", 40, 100)];
        let first = plan(raw_records.clone(), &HashSet::new(), now(), "Automation");
        let known: HashSet<u64> = first.iter().map(|s| s.id).collect();
        let second = plan(raw_records, &known, now(), "Automation");
        assert!(second.is_empty());
    }

    #[test]
    fn never_emits_duplicate_ids() {
        let slots = plan(
            vec![raw(1, "A", 30, 90), raw(1, "A again", 30, 90)],
            &HashSet::new(),
            now(),
            "Automation",
        );
        assert_eq!(slots.len(), 1);
    }

    #[test]
    fn past_start_is_dropped() {
        let slots = plan(
            vec![raw(1, "Already started", -10, 50), raw(2, "Upcoming", 10, 70)],
            &HashSet::new(),
            now(),
            "Automation",
        );
        assert_eq!(slots.len(), 1);
        assert_eq!(slots[0].id, 2);
        assert!(slots.iter().all(|s| s.start > now()));
    }

    #[test]
    fn sorted_by_start_with_stable_ties() {
        let slots = plan(
            vec![raw(3, "Late", 120, 180), raw(1, "TieA", 30, 90), raw(2, "TieB", 30, 90)],
            &HashSet::new(),
            now(),
            "Automation",
        );
        let ids: Vec<u64> = slots.iter().map(|s| s.id).collect();
        assert_eq!(ids, vec![1, 2, 3]);
    }

    #[test]
    fn recipients_are_deduplicated_and_trimmed() {
        let mut show = raw(1, "A", 30, 90);
        show.recipient_emails = vec![
            " dj@example.org ".to_string(),
            "dj@example.org".to_string(),
            "".to_string(),
        ];
        let slots = plan(vec![show], &HashSet::new(), now(), "Automation");
        assert_eq!(slots[0].recipients.len(), 1);
        assert!(slots[0].recipients.contains("dj@example.org"));
    }

    #[test]
    fn schedule_table_lists_every_slot() {
        let slots = plan(
            vec![raw(1, "Morning Jazz", 30, 90), raw(2, "Afternoon Rock", 120, 180)],
            &HashSet::new(),
            now(),
            "Automation",
        );
        let table = render_schedule_table(&slots);
        assert!(table.contains("Morning Jazz"));
        assert!(table.contains("Afternoon Rock"));
        assert!(table.contains("dj@example.org"));
    }
}
