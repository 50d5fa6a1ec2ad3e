//! Wall-clock helpers.

use std::time::{SystemTime, UNIX_EPOCH};

/// Sentinel for "never expires" and "use the current time".
pub const UNSET_TIME: i64 = -1;

/// The current time in milliseconds since the epoch.
pub fn now_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

/// Replaces a negative time stamp with the current time.
pub fn or_now(time: i64) -> i64 {
    if time < 0 {
        now_millis()
    } else {
        time
    }
}
