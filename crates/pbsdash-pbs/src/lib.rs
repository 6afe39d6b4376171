//! PBS Pro integration for pbsdash.
//!
//! Query job status via `qstat -w` and `qstat -f`, and group membership
//! via `getent`.

pub mod directory;
pub mod qstat;
pub mod qstat_full;
pub mod types;

pub use directory::{DirectoryError, GroupMembership, resolve_names, resolve_users, validate_name};
pub use qstat::{QstatError, query_qstat};
pub use qstat_full::query_qstat_full;
pub use types::{JobDetail, JobState, JobSummary, QstatRow, ResourceUsage, UserDirectory};
