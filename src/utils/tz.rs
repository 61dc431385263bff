// src/utils/tz.rs
use chrono::{
    DateTime, Duration, NaiveDate, NaiveDateTime, NaiveTime, Offset, TimeZone, Utc,
};
use chrono::{FixedOffset, LocalResult};
use chrono_tz::Tz;

use crate::error::{Result, StatsError};

// Longest known local-time gap is a whole skipped day (Pacific/Apia, 2011-12-30).
const GAP_PROBE_STEP_MINUTES: i64 = 15;
const GAP_PROBE_LIMIT: i64 = 2 * 24 * 60 / GAP_PROBE_STEP_MINUTES;

pub fn parse_tz(name: &str) -> Result<Tz> {
    name.trim()
        .parse::<Tz>()
        .map_err(|_| StatsError::UnknownTimezone(name.to_string()))
}

/// Local midnight of `date` in `tz`.
///
/// Ambiguous midnights resolve to the earlier instant. A midnight that falls
/// into a DST gap resolves to the first local instant that exists after it.
pub fn local_midnight(date: NaiveDate, tz: &Tz) -> DateTime<Tz> {
    resolve_local(date.and_time(NaiveTime::MIN), tz)
}

pub fn resolve_local(naive: NaiveDateTime, tz: &Tz) -> DateTime<Tz> {
    match tz.from_local_datetime(&naive) {
        LocalResult::Single(dt) => dt,
        LocalResult::Ambiguous(earliest, _) => earliest,
        LocalResult::None => (1..=GAP_PROBE_LIMIT)
            .find_map(|step| {
                let probe = naive + Duration::minutes(step * GAP_PROBE_STEP_MINUTES);
                tz.from_local_datetime(&probe).earliest()
            })
            .unwrap_or_else(|| tz.from_utc_datetime(&naive)),
    }
}

/// Absolute instant used for source-range comparisons.
pub fn to_neutral<T: TimeZone>(dt: &DateTime<T>) -> DateTime<Utc> {
    dt.with_timezone(&Utc)
}

/// Parses RFC 3339 or a zone-less ISO timestamp. Zone-less input is UTC.
pub fn parse_instant(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(&Utc));
    }
    ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"]
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(raw, fmt).ok())
        .map(|naive| Utc.from_utc_datetime(&naive))
}

/// Drops the zone rules and keeps the offset in effect, for serialization.
pub fn fixed<T: TimeZone>(dt: &DateTime<T>) -> DateTime<FixedOffset> {
    dt.with_timezone(&dt.offset().fix())
}
