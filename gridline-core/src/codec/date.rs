//! Date parsing and display for date-like cells.

use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime};

use crate::cell::{DateFormat, DatePattern};

const NAIVE_DATETIME_FORMATS: [&str; 3] = [
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M",
];

/// Parse a wire date string. The wire offset is kept; no zone conversion.
pub fn parse_wire_date(raw: &str) -> Option<(NaiveDate, Option<NaiveTime>)> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        let local = dt.naive_local();
        return Some((local.date(), Some(local.time())));
    }
    for fmt in NAIVE_DATETIME_FORMATS {
        if let Ok(dt) = NaiveDateTime::parse_from_str(raw, fmt) {
            return Some((dt.date(), Some(dt.time())));
        }
    }
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .map(|d| (d, None))
}

/// Display string for a wire date, or empty when it does not parse.
pub fn format_wire_date(raw: &str, format: &DateFormat, force_time: bool) -> String {
    let Some((date, time)) = parse_wire_date(raw) else {
        return String::new();
    };

    let sep = &format.separator;
    let day = date.format("%d");
    let month = date.format("%m");
    let year = date.format("%Y");
    let mut out = match format.format {
        DatePattern::DayMonthYear => format!("{day}{sep}{month}{sep}{year}"),
        DatePattern::MonthDayYear => format!("{month}{sep}{day}{sep}{year}"),
        DatePattern::YearMonthDay => format!("{year}{sep}{month}{sep}{day}"),
    };

    if format.include_time || force_time {
        if let Some(time) = time {
            let clock = if format.is_twenty_four_hour {
                time.format("%H:%M")
            } else {
                time.format("%I:%M %p")
            };
            out.push(' ');
            out.push_str(&clock.to_string());
        }
    }
    out
}

/// Parse a bare time of day (`HH:MM`, optionally with seconds).
pub fn parse_time_of_day(raw: &str) -> Option<NaiveTime> {
    let raw = raw.trim();
    NaiveTime::parse_from_str(raw, "%H:%M")
        .or_else(|_| NaiveTime::parse_from_str(raw, "%H:%M:%S"))
        .ok()
}
