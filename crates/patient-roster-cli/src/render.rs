//! Plain-text rendering of rosters and live status.

use chrono::{Local, NaiveDate};
use patient_roster_core::models::Roster;
use patient_roster_core::sync::{RosterView, UpdateSource};

const HEADERS: [&str; 6] = ["ID", "First name", "Last name", "Date of birth", "Age", "Registered"];

/// Roster as an aligned table. Ages are computed for `today`.
pub fn roster_table(roster: &Roster, today: NaiveDate) -> String {
    if roster.is_empty() {
        return "No registered patients\n".to_string();
    }

    let rows: Vec<[String; 6]> = roster
        .iter()
        .map(|p| {
            [
                p.id.to_string(),
                p.first_name.clone(),
                p.last_name.clone(),
                p.date_of_birth.format("%Y-%m-%d").to_string(),
                p.age_on(today).to_string(),
                p.created_at
                    .map(|t| t.format("%Y-%m-%d %H:%M").to_string())
                    .unwrap_or_else(|| "-".to_string()),
            ]
        })
        .collect();

    let mut widths = HEADERS.map(|h| h.chars().count());
    for row in &rows {
        for (width, cell) in widths.iter_mut().zip(row) {
            *width = (*width).max(cell.chars().count());
        }
    }

    let mut out = String::new();
    push_row(&mut out, &HEADERS.map(String::from), &widths);
    let rule: Vec<String> = widths.iter().map(|w| "-".repeat(*w)).collect();
    out.push_str(rule.join("-+-").as_str());
    out.push('\n');
    for row in &rows {
        push_row(&mut out, row, &widths);
    }
    out
}

fn push_row(out: &mut String, cells: &[String; 6], widths: &[usize; 6]) {
    let padded: Vec<String> = cells
        .iter()
        .zip(widths)
        .map(|(cell, &width)| format!("{cell:<width$}"))
        .collect();
    out.push_str(padded.join(" | ").trim_end());
    out.push('\n');
}

/// One-line summary: patient count, connection, last update.
pub fn status_line(view: &RosterView) -> String {
    let updated = match &view.last_update {
        Some(update) => {
            let source = match update.source {
                UpdateSource::Stream => "live",
                UpdateSource::Fetch(_) => "fetch",
            };
            format!("{} ({source})", update.at.with_timezone(&Local).format("%H:%M:%S"))
        }
        None => "never".to_string(),
    };

    let mut line = format!(
        "Patients: {} | Connection: {} | Last update: {updated}",
        view.roster.len(),
        view.connection
    );
    if let Some(error) = &view.last_error {
        line.push_str(&format!(" | Errors: {} (last: {error})", view.error_count));
    }
    line
}

/// Full dashboard screen, starting with a clear-screen sequence.
pub fn dashboard(view: &RosterView, today: NaiveDate) -> String {
    format!(
        "\x1b[2J\x1b[HHospital chief dashboard\n\n{}\n{}",
        status_line(view),
        roster_table(&view.roster, today)
    )
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use patient_roster_core::sync::{ConnectionState, RosterSync, RosterUpdate};

    use super::*;

    const TWO: &str = r#"[{"id":1,"firstName":"Anna","lastName":"Ivanova","dateOfBirth":"1990-05-17","createdAt":"2024-01-15T09:30:00"},
                         {"id":12,"firstName":"Petr","lastName":"Sidorov","dateOfBirth":"1975-03-09"}]"#;

    fn today() -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 3, 9).unwrap()
    }

    #[test]
    fn test_table_columns_and_ages() {
        let roster = Roster::from_json(TWO).unwrap();
        let table = roster_table(&roster, today());
        let lines: Vec<&str> = table.lines().collect();

        assert_eq!(lines.len(), 4);
        assert!(lines[0].starts_with("ID | First name | Last name | Date of birth | Age | Registered"));
        assert!(lines[2].contains("Anna"));
        assert!(lines[2].contains("| 34 "));
        assert!(lines[2].ends_with("2024-01-15 09:30"));
        // Birthday today
        assert!(lines[3].contains("| 50 "));
        assert!(lines[3].ends_with("-"));
    }

    #[test]
    fn test_empty_table() {
        assert_eq!(roster_table(&Roster::empty(), today()), "No registered patients\n");
    }

    #[test]
    fn test_status_line() {
        let mut view = RosterSync::default().view();
        assert_eq!(
            status_line(&view),
            "Patients: 0 | Connection: disconnected | Last update: never"
        );

        view.roster = Roster::from_json(TWO).unwrap();
        view.connection = ConnectionState::Connected;
        view.last_update = Some(RosterUpdate {
            at: Utc::now(),
            source: UpdateSource::Stream,
        });
        view.error_count = 2;
        view.last_error = Some("Discarded malformed roster message".into());

        let line = status_line(&view);
        assert!(line.starts_with("Patients: 2 | Connection: connected | Last update: "));
        assert!(line.contains("(live)"));
        assert!(line.ends_with("Errors: 2 (last: Discarded malformed roster message)"));
    }
}
