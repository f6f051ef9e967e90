//! Timestamps in the service's reporting time zone (JST, UTC+09:00).

use time::format_description::well_known::Rfc3339;
use time::macros::{format_description, offset};
use time::{OffsetDateTime, UtcOffset};

/// Offset applied to every persisted timestamp.
pub const REPORTING_OFFSET: UtcOffset = offset!(+9);

/// Current instant expressed in the reporting offset.
pub fn now() -> OffsetDateTime {
    OffsetDateTime::now_utc().to_offset(REPORTING_OFFSET)
}

/// Format an instant as an offset-qualified ISO-8601 string.
pub fn iso_timestamp(instant: OffsetDateTime) -> String {
    instant
        .to_offset(REPORTING_OFFSET)
        .format(&Rfc3339)
        .unwrap_or_else(|_| "1970-01-01T09:00:00+09:00".to_string())
}

/// Current instant as an offset-qualified ISO-8601 string.
pub fn now_iso() -> String {
    iso_timestamp(now())
}

/// Sortable job identifier (`YYYYMMDDhhmmss`) for the given instant.
pub fn job_id_at(instant: OffsetDateTime) -> String {
    let format = format_description!("[year][month][day][hour][minute][second]");
    instant
        .to_offset(REPORTING_OFFSET)
        .format(&format)
        .unwrap_or_else(|_| instant.unix_timestamp().to_string())
}

/// Render the wall-clock portion (`HH:MM:SS`) of an ISO-8601 timestamp.
pub fn clock_time(iso: &str) -> Option<String> {
    let parsed = OffsetDateTime::parse(iso, &Rfc3339).ok()?;
    let format = format_description!("[hour]:[minute]:[second]");
    parsed.to_offset(REPORTING_OFFSET).format(&format).ok()
}

/// Parse an ISO-8601 timestamp produced by [`iso_timestamp`].
pub fn parse_iso(iso: &str) -> Option<OffsetDateTime> {
    OffsetDateTime::parse(iso, &Rfc3339).ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::datetime;

    #[test]
    fn job_ids_are_sortable_local_timestamps() {
        let instant = datetime!(2025-03-01 01:02:03 UTC);
        assert_eq!(job_id_at(instant), "20250301100203");
    }

    #[test]
    fn iso_timestamps_carry_the_reporting_offset() {
        let instant = datetime!(2025-03-01 01:02:03 UTC);
        assert_eq!(iso_timestamp(instant), "2025-03-01T10:02:03+09:00");
    }

    #[test]
    fn clock_time_extracts_hours_minutes_seconds() {
        assert_eq!(
            clock_time("2025-03-01T10:02:03.123456+09:00").as_deref(),
            Some("10:02:03")
        );
        assert_eq!(clock_time("not a timestamp"), None);
    }
}
