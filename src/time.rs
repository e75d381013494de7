use chrono::{DateTime, SecondsFormat, Utc};

pub fn now_ms() -> i64 {
    Utc::now().timestamp_millis()
}

/// Render an instant the way stores persist server-assigned timestamps.
pub fn to_timestamp_string(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Timestamp a store substitutes for a `ServerTimestamp` field transform.
pub fn server_timestamp() -> String {
    to_timestamp_string(Utc::now())
}
