//! Timestamp utilities

use chrono::{Local, NaiveDateTime};

/// Format of `DetectionEvent::timestamp` (`DD/MM/YYYY HH:MM:SS`)
pub const EVENT_TIMESTAMP_FORMAT: &str = "%d/%m/%Y %H:%M:%S";

/// Current local time rendered in the event timestamp format
pub fn event_timestamp_now() -> String {
    Local::now().format(EVENT_TIMESTAMP_FORMAT).to_string()
}

/// Parse an event timestamp back into a calendar time
///
/// Returns `None` for anything not in `DD/MM/YYYY HH:MM:SS` form.
pub fn parse_event_timestamp(value: &str) -> Option<NaiveDateTime> {
    NaiveDateTime::parse_from_str(value, EVENT_TIMESTAMP_FORMAT).ok()
}

/// Convert milliseconds to duration
pub fn millis_to_duration(millis: u64) -> std::time::Duration {
    std::time::Duration::from_millis(millis)
}
