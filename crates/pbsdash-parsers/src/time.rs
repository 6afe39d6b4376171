//! Duration parsing for PBS output.

use crate::UnitError;
use std::time::Duration;

/// Split `s` on ':' into non-negative integers.
fn clock_fields(s: &str) -> Option<Vec<u64>> {
    s.trim()
        .split(':')
        .map(|p| {
            if p.is_empty() || !p.bytes().all(|b| b.is_ascii_digit()) {
                None
            } else {
                p.parse().ok()
            }
        })
        .collect()
}

/// Parse an `H:MM` duration, as used by the listing's "Req'd Time" column.
pub fn hhmm_to_duration(s: &str) -> Result<Duration, UnitError> {
    match clock_fields(s).as_deref() {
        Some(&[hours, mins]) if mins < 60 => Ok(Duration::from_secs(hours * 3600 + mins * 60)),
        _ => Err(UnitError::format("HH:MM duration", s)),
    }
}

/// Parse a duration in either `H:MM` or `H:MM:SS` form.
///
/// `resources_used.cput` and `resources_used.walltime` use the latter.
pub fn parse_duration(s: &str) -> Result<Duration, UnitError> {
    match clock_fields(s).as_deref() {
        Some(&[hours, mins]) if mins < 60 => Ok(Duration::from_secs(hours * 3600 + mins * 60)),
        Some(&[hours, mins, secs]) if mins < 60 && secs < 60 => {
            Ok(Duration::from_secs(hours * 3600 + mins * 60 + secs))
        }
        _ => Err(UnitError::format("duration", s)),
    }
}

/// Parse the listing's "Elap Time" column.
///
/// PBS prints a dash sentinel ("--") for jobs that have not started, which
/// maps to `None` rather than a zero duration.
pub fn elapsed_to_duration(s: &str) -> Result<Option<Duration>, UnitError> {
    if s.contains('-') {
        return Ok(None);
    }
    parse_duration(s).map(Some)
}

/// Format seconds as human-readable duration (e.g., "1d 02:30:00", "01:30:00", "05:30").
pub fn format_duration(seconds: u64) -> String {
    let hours = seconds / 3600;
    let mins = (seconds % 3600) / 60;
    let secs = seconds % 60;

    if hours > 24 {
        let days = hours / 24;
        let hours = hours % 24;
        format!("{}d {:02}:{:02}:{:02}", days, hours, mins, secs)
    } else if hours > 0 {
        format!("{:02}:{:02}:{:02}", hours, mins, secs)
    } else {
        format!("{:02}:{:02}", mins, secs)
    }
}

/// Format seconds the way PBS prints requested walltime (H:MM).
pub fn format_duration_pbs(seconds: u64) -> String {
    let hours = seconds / 3600;
    let mins = (seconds % 3600) / 60;
    format!("{}:{:02}", hours, mins)
}
