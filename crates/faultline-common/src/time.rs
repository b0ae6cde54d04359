//! ---
//! flt_section: "01-core-functionality"
//! flt_subsection: "module"
//! flt_type: "source"
//! flt_scope: "code"
//! flt_description: "Shared primitives and utilities for the control plane."
//! flt_version: "v0.0.0-prealpha"
//! flt_owner: "tbd"
//! ---
use chrono::{DateTime, SecondsFormat, Utc};

/// Capture the current wall-clock time for lifecycle comparisons.
pub fn utc_now() -> DateTime<Utc> {
    Utc::now()
}

/// Render a timestamp for property lists and log fields.
pub fn display_timestamp(value: DateTime<Utc>) -> String {
    value.to_rfc3339_opts(SecondsFormat::Secs, true)
}

/// Render an optional timestamp, using a dash for absent values.
pub fn display_optional_timestamp(value: Option<DateTime<Utc>>) -> String {
    match value {
        Some(ts) => display_timestamp(ts),
        None => "-".to_owned(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn renders_optional_timestamps() {
        let ts = Utc.with_ymd_and_hms(2026, 3, 1, 12, 30, 0).unwrap();
        assert_eq!(display_timestamp(ts), "2026-03-01T12:30:00Z");
        assert_eq!(display_optional_timestamp(Some(ts)), "2026-03-01T12:30:00Z");
        assert_eq!(display_optional_timestamp(None), "-");
    }
}
