pub mod inspect;
pub mod summary;
pub mod timeline;
pub mod verify;

/// RFC 3339 rendering for second-resolution timestamps.
pub(crate) fn format_ts(secs: u64) -> String {
    chrono::DateTime::from_timestamp(secs as i64, 0)
        .unwrap_or_default()
        .to_rfc3339_opts(chrono::SecondsFormat::Secs, true)
}
