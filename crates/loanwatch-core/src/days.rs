// # Days Remaining
//
// Converts the service's raw due-date strings into a signed whole-day
// distance from "today".
//
// Two formats show up in practice:
// - `DD/MM/YYYY` on the HTML pages
// - ISO-8601 in the JSON endpoints (plain date, naive datetime, or a
//   datetime with offset)
//
// Both sides are reduced to a local calendar date before subtracting, so
// the result does not depend on the time of day the refresh runs.
// Anything unparseable counts as 0 days remaining.

use chrono::{DateTime, Local, NaiveDate, NaiveDateTime};

/// Parse a raw due date into a local calendar date
pub fn parse_due_date(raw: &str) -> Option<NaiveDate> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }

    if let Ok(date) = NaiveDate::parse_from_str(raw, "%d/%m/%Y") {
        return Some(date);
    }
    if let Ok(date) = NaiveDate::parse_from_str(raw, "%Y-%m-%d") {
        return Some(date);
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(&Local).date_naive());
    }
    for format in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S", "%Y-%m-%d %H:%M:%S"] {
        if let Ok(dt) = NaiveDateTime::parse_from_str(raw, format) {
            return Some(dt.date());
        }
    }

    None
}

/// Days between `today` and the due date; negative when overdue
pub fn days_remaining(raw: &str, today: NaiveDate) -> i64 {
    match parse_due_date(raw) {
        Some(due) => due.signed_duration_since(today).num_days(),
        None => 0,
    }
}

/// [`days_remaining`] against the local calendar date right now
pub fn days_remaining_from_now(raw: &str) -> i64 {
    days_remaining(raw, today())
}

/// The local calendar date
pub fn today() -> NaiveDate {
    Local::now().date_naive()
}
