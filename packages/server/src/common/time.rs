//! Timestamp helpers.
//!
//! All persisted timestamps are ISO-8601 UTC strings with millisecond
//! precision and a `Z` suffix. The fixed width keeps lexicographic order
//! equal to chronological order, which the lease and requeue sweeps rely on
//! when comparing timestamps in SQL.

use chrono::{DateTime, SecondsFormat, Utc};

pub fn now_iso() -> String {
    to_iso(Utc::now())
}

pub fn to_iso(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Millis, true)
}
