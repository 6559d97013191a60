//! Submission creation time -> epoch seconds.

use chrono::{DateTime, NaiveDateTime, TimeZone};
use chrono_tz::Tz;

const NAIVE_FORMATS: &[&str] = &[
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%d %H:%M:%S",
];

/// Normalize a submission `created` value to epoch seconds.
///
/// A timestamp carrying an offset maps to its absolute instant. One without
/// an offset is wall-clock time in `zone`; for a wall-clock time that occurs
/// twice (DST fall-back) the earlier instant wins.
pub fn epoch_seconds(created: &str, zone: Tz) -> Option<i64> {
    let s = created.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.timestamp());
    }

    let naive = NAIVE_FORMATS
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(s, fmt).ok())?;
    zone.from_local_datetime(&naive)
        .earliest()
        .map(|dt| dt.timestamp())
}
