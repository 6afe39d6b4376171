//! Unified job state for pbsdash.
//!
//! Merges the `qstat -w` listing with `qstat -f` details into one record
//! per job.

pub mod merge;
pub mod types;

pub use merge::{DROPPED_DETAIL_FIELDS, cpu_efficiency, merge_jobs};
pub use types::{CanonicalJobRecord, JobCounts, PollState, Snapshot};
