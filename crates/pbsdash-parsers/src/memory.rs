//! Memory parsing for PBS output.
//!
//! PBS reports sizes as an integer followed by a two-letter unit, e.g.
//! "190gb" for a request or "5242880kb" for `resources_used.mem`.

use crate::UnitError;
use once_cell::sync::Lazy;
use regex::Regex;

static MEMORY_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^(\d+)([A-Za-z]{2})$").unwrap());

/// Bytes per unit, keyed by lowercase suffix.
const UNITS: [(&str, u64); 4] = [
    ("kb", 1 << 10),
    ("mb", 1 << 20),
    ("gb", 1 << 30),
    ("tb", 1 << 40),
];

/// Parse a PBS memory string ("4gb", "512mb") to bytes.
pub fn memory_to_bytes(s: &str) -> Result<u64, UnitError> {
    let s = s.trim();
    let caps = MEMORY_RE
        .captures(s)
        .ok_or_else(|| UnitError::format("memory", s))?;

    let value: u64 = caps[1]
        .parse()
        .map_err(|_| UnitError::format("memory", s))?;
    let suffix = caps[2].to_ascii_lowercase();
    let scale = UNITS
        .iter()
        .find(|(unit, _)| *unit == suffix)
        .map(|(_, scale)| *scale)
        .ok_or_else(|| UnitError::format("memory unit", s))?;

    value
        .checked_mul(scale)
        .ok_or_else(|| UnitError::format("memory", s))
}
