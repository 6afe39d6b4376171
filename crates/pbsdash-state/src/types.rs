//! Canonical job records and per-cycle snapshots.

use chrono::{DateTime, Utc};
use pbsdash_pbs::{JobState, JobSummary, ResourceUsage};
use serde::{Serialize, Serializer};
use std::collections::BTreeMap;
use std::time::Duration;

/// One job as seen by a single poll cycle.
///
/// Built fresh every cycle and never modified afterwards.
#[derive(Debug, Clone, PartialEq)]
pub struct CanonicalJobRecord {
    /// Listing columns
    pub summary: JobSummary,

    /// Normalized `resources_used.*`, None when no detail was fetched
    pub usage: Option<ResourceUsage>,

    /// cput / walltime / ncpus, as a fraction of the allocated CPUs
    pub cpu_efficiency: Option<f64>,

    /// Display name of the job owner
    pub full_name: Option<String>,

    /// Remaining raw `qstat -f` attributes
    pub attributes: BTreeMap<String, String>,
}

impl CanonicalJobRecord {
    pub fn jobid(&self) -> &str {
        &self.summary.jobid
    }

    pub fn is_running(&self) -> bool {
        self.summary.state == JobState::Running
    }

    /// CPUs in use, falling back to the requested task count.
    pub fn cpus(&self) -> u32 {
        self.usage
            .as_ref()
            .and_then(|u| u.ncpus)
            .unwrap_or(self.summary.tasks)
    }
}

fn secs(d: Option<Duration>) -> Option<u64> {
    d.map(|d| d.as_secs())
}

fn finite(v: Option<f64>) -> Option<f64> {
    v.filter(|v| v.is_finite())
}

/// Flat document layout shipped to the search sink and printed by `once`.
///
/// Durations are whole seconds and every missing value is `null`.
#[derive(Serialize)]
struct RecordDocument<'a> {
    jobid: &'a str,
    username: &'a str,
    queue: &'a str,
    jobname: &'a str,
    session_id: Option<&'a str>,
    nodes: u32,
    tasks: u32,
    reqd_mem: Option<u64>,
    reqd_time: Option<u64>,
    state: &'a JobState,
    elap_time: Option<u64>,
    #[serde(rename = "resources_used.cput")]
    cput: Option<u64>,
    #[serde(rename = "resources_used.walltime")]
    walltime: Option<u64>,
    #[serde(rename = "resources_used.ncpus")]
    ncpus: Option<u32>,
    #[serde(rename = "resources_used.cpupercent")]
    cpupercent: Option<f64>,
    #[serde(rename = "resources_used.mem")]
    mem: Option<u64>,
    #[serde(rename = "resources_used.vmem")]
    vmem: Option<u64>,
    cpu_efficiency: Option<f64>,
    full_name: Option<&'a str>,
    #[serde(flatten)]
    attributes: &'a BTreeMap<String, String>,
}

impl Serialize for CanonicalJobRecord {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let summary = &self.summary;
        let usage = self.usage.clone().unwrap_or_default();

        RecordDocument {
            jobid: &summary.jobid,
            username: &summary.username,
            queue: &summary.queue,
            jobname: &summary.jobname,
            session_id: summary.session_id.as_deref(),
            nodes: summary.nodes,
            tasks: summary.tasks,
            reqd_mem: summary.reqd_mem,
            reqd_time: secs(summary.reqd_time),
            state: &summary.state,
            elap_time: secs(summary.elap_time),
            cput: secs(usage.cput),
            walltime: secs(usage.walltime),
            ncpus: usage.ncpus,
            cpupercent: finite(usage.cpupercent),
            mem: usage.mem,
            vmem: usage.vmem,
            cpu_efficiency: finite(self.cpu_efficiency),
            full_name: self.full_name.as_deref(),
            attributes: &self.attributes,
        }
        .serialize(serializer)
    }
}

/// Whether the poller is waiting for its next tick or running a cycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum PollState {
    #[default]
    Idle,
    Polling,
}

/// The merged dataset of one poll cycle.
#[derive(Debug, Clone, PartialEq)]
pub struct Snapshot {
    pub taken_at: DateTime<Utc>,
    pub records: Vec<CanonicalJobRecord>,
}

impl Snapshot {
    pub fn new(taken_at: DateTime<Utc>, records: Vec<CanonicalJobRecord>) -> Self {
        Self { taken_at, records }
    }

    /// CPUs held by running jobs.
    pub fn active_cpus(&self) -> u64 {
        self.records
            .iter()
            .filter(|r| r.is_running())
            .map(|r| u64::from(r.cpus()))
            .sum()
    }

    pub fn job_counts(&self) -> JobCounts {
        let mut counts = JobCounts::default();
        for record in &self.records {
            match record.summary.state {
                JobState::Running => counts.running += 1,
                JobState::Queued => counts.queued += 1,
                JobState::Held => counts.held += 1,
                JobState::Exiting => counts.exiting += 1,
                _ => counts.other += 1,
            }
        }
        counts.total = self.records.len();
        counts
    }

    /// Mean efficiency of running jobs that report one.
    pub fn mean_efficiency(&self) -> Option<f64> {
        let values: Vec<f64> = self
            .records
            .iter()
            .filter_map(|r| r.cpu_efficiency)
            .collect();
        if values.is_empty() {
            None
        } else {
            Some(values.iter().sum::<f64>() / values.len() as f64)
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct JobCounts {
    pub total: usize,
    pub running: usize,
    pub queued: usize,
    pub held: usize,
    pub exiting: usize,
    pub other: usize,
}
