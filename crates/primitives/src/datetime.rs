//! Excel serial date helpers.
//!
//! Excel counts days from 1900-01-01 (serial 1) and keeps the phantom
//! 1900-02-29 (serial 60), so serials below 61 are shifted by one day
//! relative to the 1899-12-30 epoch used for everything after it.

use chrono::{Duration, NaiveDate, NaiveDateTime, Timelike};

const SECONDS_PER_DAY: i64 = 86_400;
/// First serial past 9999-12-31.
const MAX_SERIAL: f64 = 2_958_466.0;

fn epoch() -> Option<NaiveDateTime> {
    NaiveDate::from_ymd_opt(1899, 12, 30)?.and_hms_opt(0, 0, 0)
}

/// Convert an Excel serial number to a calendar date-time.
pub fn serial_to_datetime(serial: f64) -> Option<NaiveDateTime> {
    if !serial.is_finite() || !(0.0..MAX_SERIAL).contains(&serial) {
        return None;
    }
    let mut days = serial.floor() as i64;
    let mut seconds = ((serial - serial.floor()) * SECONDS_PER_DAY as f64).round() as i64;
    if seconds >= SECONDS_PER_DAY {
        days += 1;
        seconds -= SECONDS_PER_DAY;
    }
    if days < 60 {
        days += 1;
    }
    Some(epoch()? + Duration::days(days) + Duration::seconds(seconds))
}

/// Convert a calendar date-time to an Excel serial number.
pub fn datetime_to_serial(dt: NaiveDateTime) -> Option<f64> {
    let delta = dt - epoch()?;
    let mut days = delta.num_days();
    let seconds = delta.num_seconds() - days * SECONDS_PER_DAY;
    if days < 61 {
        days -= 1;
    }
    let serial = days as f64 + seconds as f64 / SECONDS_PER_DAY as f64;
    (0.0..MAX_SERIAL).contains(&serial).then_some(serial)
}

/// Render a serial as `YYYY-MM-DD`, or `YYYY-MM-DD HH:MM:SS` when it carries a time.
pub fn format_serial(serial: f64) -> Option<String> {
    let dt = serial_to_datetime(serial)?;
    if dt.num_seconds_from_midnight() == 0 {
        Some(dt.format("%Y-%m-%d").to_string())
    } else {
        Some(dt.format("%Y-%m-%d %H:%M:%S").to_string())
    }
}

/// Parse ISO-style date text (`2024-03-01`, `2024-03-01 12:30:00`, `2024-03-01T12:30:00`).
pub fn parse_date_text(text: &str) -> Option<NaiveDateTime> {
    let text = text.trim();
    for pattern in ["%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S", "%Y-%m-%d %H:%M"] {
        if let Ok(dt) = NaiveDateTime::parse_from_str(text, pattern) {
            return Some(dt);
        }
    }
    NaiveDate::parse_from_str(text, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
}
