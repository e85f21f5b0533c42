//! Human-readable elapsed-time formatting for log lines.

use std::time::Duration;
use tokio::time::Instant;

/// Formats the time elapsed since `since` the way the relay's log lines expect:
/// sub-second precision under 10 minutes, minutes under an hour, hours and
/// minutes under 12 hours, bare hours beyond that.
pub fn format_elapsed(since: Instant) -> String {
    format_duration(since.elapsed())
}

fn format_duration(elapsed: Duration) -> String {
    let secs = elapsed.as_secs();
    if secs < 600 {
        format!("{}.{:03}s", secs, elapsed.subsec_millis())
    } else if secs < 3600 {
        format!("{}m", secs / 60)
    } else if secs < 12 * 3600 {
        format!("{}h {}m", secs / 3600, (secs / 60) % 60)
    } else {
        format!("{}h", secs / 3600)
    }
}
