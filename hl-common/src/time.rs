//! Timestamp utilities

use chrono::{DateTime, Local, Utc};

/// Date format used in evaluation history lines
pub const HISTORY_DATE_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Date format used in public comment footers
pub const COMMENT_DATE_FORMAT: &str = "%Y-%m-%d";

/// Get current UTC timestamp
pub fn now() -> DateTime<Utc> {
    Utc::now()
}

/// Render a timestamp in local time with the given strftime pattern
pub fn format_local(ts: DateTime<Utc>, pattern: &str) -> String {
    ts.with_timezone(&Local).format(pattern).to_string()
}
