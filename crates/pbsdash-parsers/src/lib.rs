//! Shared parsing utilities for PBS command output.
//!
//! Holds the command runners used to reach the scheduler and the unit
//! conversions applied to its output.

pub mod command;
pub mod memory;
pub mod time;

pub use command::{CommandError, CommandRunner, LocalShell, SshSession};
pub use memory::memory_to_bytes;
pub use time::{
    elapsed_to_duration, format_duration, format_duration_pbs, hhmm_to_duration, parse_duration,
};

use thiserror::Error;

/// Error type for unit conversion.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum UnitError {
    #[error("Invalid {kind}: {value:?}")]
    Format { kind: &'static str, value: String },
}

impl UnitError {
    pub(crate) fn format(kind: &'static str, value: &str) -> Self {
        Self::Format {
            kind,
            value: value.to_string(),
        }
    }
}

/// Filter helper for optional string fields.
/// Returns None if the string is empty or a placeholder value.
pub fn non_empty_string(s: &str) -> Option<String> {
    let trimmed = s.trim();
    if trimmed.is_empty() || trimmed.chars().all(|c| c == '-') {
        None
    } else {
        Some(trimmed.to_string())
    }
}
