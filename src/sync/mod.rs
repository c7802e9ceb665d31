//! Clock synchronization and time helpers

pub mod clock;

pub use clock::SyncClock;

use std::time::Duration;

/// Render a duration as `[hh:]mm:ss.mmm` for log output
pub fn format_duration(d: Duration) -> String {
    let total_ms = d.as_millis();
    let hours = total_ms / 3_600_000;
    let minutes = (total_ms % 3_600_000) / 60_000;
    let seconds = (total_ms % 60_000) / 1_000;
    let millis = total_ms % 1_000;

    if hours > 0 {
        format!("{hours:02}h:{minutes:02}m:{seconds:02}s.{millis:03}")
    } else {
        format!("{minutes:02}m:{seconds:02}s.{millis:03}")
    }
}
