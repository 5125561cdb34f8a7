use crate::CompletionAverage;
use std::time::Duration;

const MS_PER_SECOND: u128 = 1_000;
const MS_PER_MINUTE: u128 = 60 * MS_PER_SECOND;
const MS_PER_HOUR: u128 = 60 * MS_PER_MINUTE;
const MS_PER_DAY: u128 = 24 * MS_PER_HOUR;

pub const NO_DATA_LABEL: &str = "N/A";

/// Renders an elapsed time as `1d 2h 3m 4s`, skipping zero units.
///
/// Sub-second values are shown in milliseconds and values under a minute keep
/// one decimal of seconds.
pub fn format_elapsed(elapsed: Duration) -> String {
    let total_ms = elapsed.as_millis();
    if total_ms < MS_PER_SECOND {
        return format!("{total_ms}ms");
    }

    let mut parts = Vec::new();
    let days = total_ms / MS_PER_DAY;
    let hours = (total_ms % MS_PER_DAY) / MS_PER_HOUR;
    let minutes = (total_ms % MS_PER_HOUR) / MS_PER_MINUTE;
    if days > 0 {
        parts.push(format!("{days}d"));
    }
    if hours > 0 {
        parts.push(format!("{hours}h"));
    }
    if minutes > 0 {
        parts.push(format!("{minutes}m"));
    }

    if total_ms < MS_PER_MINUTE {
        let tenths = total_ms / 100;
        let (whole, frac) = (tenths / 10, tenths % 10);
        if frac == 0 {
            parts.push(format!("{whole}s"));
        } else {
            parts.push(format!("{whole}.{frac}s"));
        }
    } else {
        let seconds = (total_ms % MS_PER_MINUTE) / MS_PER_SECOND;
        if seconds > 0 {
            parts.push(format!("{seconds}s"));
        }
    }

    parts.join(" ")
}

pub fn format_average(average: &CompletionAverage) -> String {
    match average.mean() {
        Some(mean) => format_elapsed(mean),
        None => NO_DATA_LABEL.to_string(),
    }
}
