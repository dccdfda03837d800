use serde::Serializer;
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;

/// Formats an optional signal strength for terminal output.
pub(crate) fn format_signal(signal_strength: Option<i16>) -> String {
    match signal_strength {
        Some(value) => format!("{value} dBm"),
        None => "-".to_string(),
    }
}

/// Formats a timestamp as RFC 3339, falling back to the Unix timestamp.
pub(crate) fn format_rfc3339(timestamp: OffsetDateTime) -> String {
    timestamp
        .format(&Rfc3339)
        .unwrap_or_else(|_error| timestamp.unix_timestamp().to_string())
}

/// Parses an RFC 3339 timestamp.
pub(crate) fn parse_rfc3339(raw: &str) -> Option<OffsetDateTime> {
    OffsetDateTime::parse(raw, &Rfc3339).ok()
}

/// Milliseconds since the Unix epoch.
pub(crate) fn epoch_millis(timestamp: OffsetDateTime) -> i64 {
    i64::try_from(timestamp.unix_timestamp_nanos() / 1_000_000).unwrap_or(i64::MAX)
}

/// `serialize_with` adapter rendering timestamps as RFC 3339 strings.
pub(crate) fn serialize_rfc3339<S>(timestamp: &OffsetDateTime, serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    serializer.serialize_str(&format_rfc3339(*timestamp))
}
