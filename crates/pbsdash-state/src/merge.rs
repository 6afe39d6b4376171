//! Join `qstat -w` summaries with `qstat -f` details.

use crate::types::CanonicalJobRecord;
use pbsdash_pbs::types::NORMALIZED_DETAIL_FIELDS;
use pbsdash_pbs::{JobDetail, JobSummary, ResourceUsage, UserDirectory};
use std::collections::BTreeMap;

/// Detail attributes that duplicate a listing column.
///
/// The listing's value wins: `qstat -f` reports the execution queue (e.g.
/// "normal-exec") where the listing shows the queue the user submitted to.
pub const DROPPED_DETAIL_FIELDS: [&str; 4] = ["Job_Name", "job_state", "queue", "session_id"];

/// CPU time per CPU per second of walltime.
///
/// 1.0 means every allocated CPU was busy for the whole walltime. Undefined
/// unless cput, walltime and ncpus are all known and non-zero.
pub fn cpu_efficiency(usage: &ResourceUsage) -> Option<f64> {
    let cput = usage.cput?.as_secs_f64();
    let walltime = usage.walltime?.as_secs_f64();
    let ncpus = usage.ncpus?;

    if walltime == 0.0 || ncpus == 0 {
        return None;
    }

    Some(cput / walltime / f64::from(ncpus)).filter(|v| v.is_finite())
}

/// Raw attributes that are neither normalized nor duplicated.
fn remaining_attributes(detail: &JobDetail) -> BTreeMap<String, String> {
    detail
        .iter()
        .filter(|(key, _)| {
            !DROPPED_DETAIL_FIELDS.contains(&key.as_str())
                && !NORMALIZED_DETAIL_FIELDS.contains(&key.as_str())
        })
        .map(|(key, value)| (key.clone(), value.clone()))
        .collect()
}

fn build_record(
    summary: JobSummary,
    detail: Option<&JobDetail>,
    directory: &UserDirectory,
) -> CanonicalJobRecord {
    let usage = detail.map(|d| ResourceUsage::from_detail(&summary.jobid, d));
    let cpu_efficiency = usage.as_ref().and_then(cpu_efficiency);
    let attributes = detail.map(remaining_attributes).unwrap_or_default();
    let full_name = directory.get(&summary.username).cloned();

    CanonicalJobRecord {
        summary,
        usage,
        cpu_efficiency,
        full_name,
        attributes,
    }
}

/// Left outer join of summaries with details, keyed by job ID.
///
/// Every summary yields exactly one record, in input order. Summaries
/// without a detail entry keep their usage fields empty.
pub fn merge_jobs(
    summaries: Vec<JobSummary>,
    details: &BTreeMap<String, JobDetail>,
    directory: &UserDirectory,
) -> Vec<CanonicalJobRecord> {
    summaries
        .into_iter()
        .map(|summary| {
            let detail = details.get(&summary.jobid);
            build_record(summary, detail, directory)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pbsdash_pbs::JobState;
    use std::time::Duration;

    fn summary(jobid: &str, state: JobState) -> JobSummary {
        JobSummary {
            jobid: jobid.to_string(),
            username: "abc123".to_string(),
            queue: "normal".to_string(),
            jobname: "job.sh".to_string(),
            session_id: None,
            nodes: 1,
            tasks: 48,
            reqd_mem: Some(190 * (1u64 << 30)),
            reqd_time: Some(Duration::from_secs(48 * 3600)),
            state,
            elap_time: None,
        }
    }

    fn detail(pairs: &[(&str, &str)]) -> JobDetail {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    fn usage(cput: u64, walltime: u64, ncpus: u32) -> ResourceUsage {
        ResourceUsage {
            cput: Some(Duration::from_secs(cput)),
            walltime: Some(Duration::from_secs(walltime)),
            ncpus: Some(ncpus),
            ..Default::default()
        }
    }

    #[test]
    fn test_cpu_efficiency() {
        assert_eq!(cpu_efficiency(&usage(7200, 3600, 4)), Some(0.5));
        assert_eq!(cpu_efficiency(&usage(14400, 3600, 4)), Some(1.0));
    }

    #[test]
    fn test_cpu_efficiency_undefined() {
        assert_eq!(cpu_efficiency(&usage(7200, 0, 4)), None);
        assert_eq!(cpu_efficiency(&usage(7200, 3600, 0)), None);
        assert_eq!(cpu_efficiency(&ResourceUsage::default()), None);

        let mut partial = usage(7200, 3600, 4);
        partial.ncpus = None;
        assert_eq!(cpu_efficiency(&partial), None);
    }

    #[test]
    fn test_merge_is_stable_left_join() {
        let summaries = vec![
            summary("3.gadi", JobState::Queued),
            summary("1.gadi", JobState::Running),
            summary("2.gadi", JobState::Held),
        ];
        let mut details = BTreeMap::new();
        details.insert(
            "1.gadi".to_string(),
            detail(&[
                ("resources_used.cput", "02:00:00"),
                ("resources_used.walltime", "01:00:00"),
                ("resources_used.ncpus", "4"),
            ]),
        );
        details.insert("9.gadi".to_string(), detail(&[("queue", "normal")]));

        let records = merge_jobs(summaries, &details, &UserDirectory::new());
        let ids: Vec<_> = records.iter().map(|r| r.jobid()).collect();
        assert_eq!(ids, vec!["3.gadi", "1.gadi", "2.gadi"]);

        assert!(records[0].usage.is_none());
        assert_eq!(records[0].cpu_efficiency, None);
        assert_eq!(records[1].cpu_efficiency, Some(0.5));
        assert_eq!(
            records[1].usage.as_ref().and_then(|u| u.ncpus),
            Some(4)
        );
        assert!(records[2].usage.is_none());
    }

    #[test]
    fn test_merge_drops_overlapping_fields() {
        let mut details = BTreeMap::new();
        details.insert(
            "1.gadi".to_string(),
            detail(&[
                ("queue", "normal-exec"),
                ("session_id", "999"),
                ("Job_Name", "job.sh"),
                ("job_state", "R"),
                ("resources_used.cput", "00:10:00"),
                ("project", "v10"),
                ("exec_host", "gadi-cpu-clx-0001/0*48"),
            ]),
        );

        let records = merge_jobs(
            vec![summary("1.gadi", JobState::Running)],
            &details,
            &UserDirectory::new(),
        );
        let record = &records[0];
        assert_eq!(record.summary.queue, "normal");
        assert_eq!(
            record.attributes.keys().collect::<Vec<_>>(),
            vec!["exec_host", "project"]
        );
    }

    #[test]
    fn test_dropped_fields_constant() {
        assert_eq!(
            DROPPED_DETAIL_FIELDS,
            ["Job_Name", "job_state", "queue", "session_id"]
        );
    }

    #[test]
    fn test_merge_attaches_full_name() {
        let mut directory = UserDirectory::new();
        directory.insert("abc123".to_string(), "Alice Example".to_string());

        let records = merge_jobs(
            vec![summary("1.gadi", JobState::Queued)],
            &BTreeMap::new(),
            &directory,
        );
        assert_eq!(records[0].full_name.as_deref(), Some("Alice Example"));
    }

    #[test]
    fn test_record_document_layout() {
        let mut details = BTreeMap::new();
        details.insert(
            "1.gadi".to_string(),
            detail(&[
                ("resources_used.cput", "02:00:00"),
                ("resources_used.walltime", "01:00:00"),
                ("resources_used.ncpus", "4"),
                ("project", "v10"),
            ]),
        );
        let records = merge_jobs(
            vec![
                summary("1.gadi", JobState::Running),
                summary("2.gadi", JobState::Queued),
            ],
            &details,
            &UserDirectory::new(),
        );

        let running = serde_json::to_value(&records[0]).unwrap();
        assert_eq!(running["jobid"], "1.gadi");
        assert_eq!(running["state"], "R");
        assert_eq!(running["reqd_time"], 48 * 3600);
        assert_eq!(running["resources_used.cput"], 7200);
        assert_eq!(running["cpu_efficiency"], 0.5);
        assert_eq!(running["project"], "v10");

        let queued = serde_json::to_value(&records[1]).unwrap();
        assert!(queued["elap_time"].is_null());
        assert!(queued["cpu_efficiency"].is_null());
        assert!(queued["resources_used.ncpus"].is_null());
    }
}
