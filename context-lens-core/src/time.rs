//! ISO-8601 UTC timestamp helpers shared by every component that writes
//! a record to the store or to an export file.

use chrono::{DateTime, Utc};

/// Returns the current instant formatted the way every timestamp field in
/// the data model is stored: `2026-07-27T12:34:56.789Z`.
pub fn now_iso8601() -> String {
	Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Millis, true)
}

/// Parses a timestamp previously produced by [`now_iso8601`]. Used when
/// replaying the state file and when sorting LHAR entries by
/// `(timestamp, id)`.
pub fn parse_iso8601(s: &str) -> Option<DateTime<Utc>> {
	DateTime::parse_from_rfc3339(s).ok().map(|dt| dt.with_timezone(&Utc))
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn round_trips() {
		let s = now_iso8601();
		assert!(parse_iso8601(&s).is_some());
	}
}
