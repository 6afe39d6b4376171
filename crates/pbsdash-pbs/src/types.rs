//! PBS job types.

use pbsdash_parsers::{
    UnitError, elapsed_to_duration, hhmm_to_duration, memory_to_bytes, non_empty_string,
    parse_duration,
};
use serde::{Serialize, Serializer};
use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

/// Raw `qstat -f` attributes for one job, keyed by dotted attribute path
/// (e.g. `resources_used.cput`).
pub type JobDetail = BTreeMap<String, String>;

/// Username to display name, from `getent passwd`.
pub type UserDirectory = BTreeMap<String, String>;

/// PBS job state, as printed in the single-letter `S` column.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum JobState {
    Queued,
    Running,
    Held,
    Exiting,
    /// Array job with at least one subjob started
    Begun,
    Finished,
    Moved,
    Suspended,
    Transit,
    /// Suspended because the workstation became busy
    UserSuspended,
    Waiting,
    /// Subjob that is no longer running
    Expired,
    Unknown(String),
}

impl JobState {
    /// Decode a state letter.
    pub fn from_code(s: &str) -> Self {
        match s {
            "Q" => Self::Queued,
            "R" => Self::Running,
            "H" => Self::Held,
            "E" => Self::Exiting,
            "B" => Self::Begun,
            "F" => Self::Finished,
            "M" => Self::Moved,
            "S" => Self::Suspended,
            "T" => Self::Transit,
            "U" => Self::UserSuspended,
            "W" => Self::Waiting,
            "X" => Self::Expired,
            other => Self::Unknown(other.to_string()),
        }
    }

    /// The letter PBS uses for this state.
    pub fn code(&self) -> &str {
        match self {
            Self::Queued => "Q",
            Self::Running => "R",
            Self::Held => "H",
            Self::Exiting => "E",
            Self::Begun => "B",
            Self::Finished => "F",
            Self::Moved => "M",
            Self::Suspended => "S",
            Self::Transit => "T",
            Self::UserSuspended => "U",
            Self::Waiting => "W",
            Self::Expired => "X",
            Self::Unknown(code) => code.as_str(),
        }
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

impl Serialize for JobState {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.code())
    }
}

/// One row of `qstat -w`, with the memory and time columns still raw.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QstatRow {
    pub jobid: String,
    pub username: String,
    pub queue: String,
    pub jobname: String,
    pub session_id: String,
    pub nodes: u32,
    pub tasks: u32,
    pub reqd_mem: String,
    pub reqd_time: String,
    pub state: JobState,
    pub elap_time: String,
}

/// A `qstat -w` row with units normalized.
#[derive(Debug, Clone, PartialEq)]
pub struct JobSummary {
    /// PBS job ID, e.g. "123.gadi-pbs"
    pub jobid: String,

    pub username: String,

    pub queue: String,

    pub jobname: String,

    /// None until the job starts
    pub session_id: Option<String>,

    pub nodes: u32,

    pub tasks: u32,

    /// Requested memory in bytes
    pub reqd_mem: Option<u64>,

    /// Requested walltime
    pub reqd_time: Option<Duration>,

    pub state: JobState,

    /// None when the job has not started, never zero for that case
    pub elap_time: Option<Duration>,
}

impl TryFrom<QstatRow> for JobSummary {
    type Error = UnitError;

    fn try_from(row: QstatRow) -> Result<Self, Self::Error> {
        let reqd_mem = non_empty_string(&row.reqd_mem)
            .map(|s| memory_to_bytes(&s))
            .transpose()?;
        let reqd_time = non_empty_string(&row.reqd_time)
            .map(|s| hhmm_to_duration(&s))
            .transpose()?;
        let elap_time = elapsed_to_duration(&row.elap_time)?;

        Ok(Self {
            jobid: row.jobid,
            username: row.username,
            queue: row.queue,
            jobname: row.jobname,
            session_id: non_empty_string(&row.session_id),
            nodes: row.nodes,
            tasks: row.tasks,
            reqd_mem,
            reqd_time,
            state: row.state,
            elap_time,
        })
    }
}

pub const CPUT: &str = "resources_used.cput";
pub const WALLTIME: &str = "resources_used.walltime";
pub const NCPUS: &str = "resources_used.ncpus";
pub const CPUPERCENT: &str = "resources_used.cpupercent";
pub const MEM: &str = "resources_used.mem";
pub const VMEM: &str = "resources_used.vmem";

/// Detail attributes that `ResourceUsage` takes over.
pub const NORMALIZED_DETAIL_FIELDS: [&str; 6] = [CPUT, WALLTIME, NCPUS, CPUPERCENT, MEM, VMEM];

/// Normalized `resources_used.*` attributes of a running job.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResourceUsage {
    pub cput: Option<Duration>,
    pub walltime: Option<Duration>,
    pub ncpus: Option<u32>,
    pub cpupercent: Option<f64>,
    /// Resident memory in bytes
    pub mem: Option<u64>,
    /// Virtual memory in bytes
    pub vmem: Option<u64>,
}

impl ResourceUsage {
    /// Normalize the usage attributes of one detail record.
    ///
    /// Missing attributes stay `None`. A present but unparseable value is
    /// logged and also treated as missing.
    pub fn from_detail(jobid: &str, detail: &JobDetail) -> Self {
        Self {
            cput: field(jobid, detail, CPUT, parse_duration),
            walltime: field(jobid, detail, WALLTIME, parse_duration),
            ncpus: field(jobid, detail, NCPUS, |s| s.trim().parse::<u32>()),
            cpupercent: field(jobid, detail, CPUPERCENT, |s| s.trim().parse::<f64>())
                .filter(|v| v.is_finite()),
            mem: field(jobid, detail, MEM, memory_to_bytes),
            vmem: field(jobid, detail, VMEM, memory_to_bytes),
        }
    }

    /// True if no usage attribute was present.
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

fn field<T, E: fmt::Display>(
    jobid: &str,
    detail: &JobDetail,
    key: &str,
    parse: impl Fn(&str) -> Result<T, E>,
) -> Option<T> {
    let raw = detail.get(key)?;
    match parse(raw) {
        Ok(value) => Some(value),
        Err(e) => {
            tracing::warn!("Ignoring {} of job {}: {}", key, jobid, e);
            None
        }
    }
}
