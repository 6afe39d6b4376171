//! Query per-job attributes via `qstat -f`.
//!
//! The output is one block per job, separated by blank lines:
//!
//! ```text
//! Job Id: 123.gadi-pbs
//!     Job_Name = ingest.sh
//!     resources_used.cput = 95:12:40
//!     Variable_List = PBS_O_HOME=/home/abc123,PBS_O_LANG=en_AU.UTF-8,PBS_O_LO
//! 	GNAME=abc123
//! ```
//!
//! Long values wrap onto lines starting with a tab, which must be glued back
//! before splitting on `" = "`.

use crate::qstat::QstatError;
use crate::types::JobDetail;
use once_cell::sync::Lazy;
use pbsdash_parsers::CommandRunner;
use regex::Regex;
use std::collections::BTreeMap;

static JOBID_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z0-9][A-Za-z0-9_.\[\]-]*$").unwrap());

/// Undo the scheduler's line wrapping.
pub fn join_continuations(output: &str) -> String {
    output.replace("\r\n", "\n").replace("\n\t", "")
}

/// Group lines into blank-line separated blocks.
fn split_blocks(text: &str) -> Vec<Vec<&str>> {
    let mut blocks = Vec::new();
    let mut current = Vec::new();

    for line in text.lines() {
        if line.trim().is_empty() {
            if !current.is_empty() {
                blocks.push(std::mem::take(&mut current));
            }
        } else {
            current.push(line);
        }
    }
    if !current.is_empty() {
        blocks.push(current);
    }

    blocks
}

/// Parse one job block.
///
/// Returns `Ok(None)` for a block without any content. A block needs a
/// job ID line and at least one attribute line.
pub fn parse_block(lines: &[&str]) -> Result<Option<(String, JobDetail)>, QstatError> {
    let Some((header, attributes)) = lines.split_first() else {
        return Ok(None);
    };

    let jobid = header
        .split_whitespace()
        .last()
        .ok_or_else(|| QstatError::MalformedBlock {
            jobid: String::new(),
            reason: "empty header line".to_string(),
        })?
        .to_string();

    if attributes.is_empty() {
        return Err(QstatError::MalformedBlock {
            jobid,
            reason: "no attributes".to_string(),
        });
    }

    let mut detail = JobDetail::new();
    for line in attributes {
        let line = line.trim();
        let Some((key, value)) = line.split_once(" = ") else {
            return Err(QstatError::ParseError {
                jobid,
                line: line.to_string(),
            });
        };
        detail.insert(key.trim().to_string(), value.trim_end().to_string());
    }

    Ok(Some((jobid, detail)))
}

/// Parse the full `qstat -f` output into per-job attribute maps.
///
/// Blocks that fail to parse are logged and skipped.
pub fn parse_qstat_full(output: &str) -> BTreeMap<String, JobDetail> {
    let text = join_continuations(output);
    let mut jobs = BTreeMap::new();

    for block in split_blocks(&text) {
        match parse_block(&block) {
            Ok(Some((jobid, detail))) => {
                jobs.insert(jobid, detail);
            }
            Ok(None) => {}
            Err(e) => tracing::warn!("Skipping qstat -f block: {}", e),
        }
    }

    jobs
}

/// Build the detail command for the given job IDs, each single-quoted.
pub fn qstat_full_command(jobids: &[String]) -> Result<String, QstatError> {
    if let Some(bad) = jobids.iter().find(|id| !JOBID_RE.is_match(id)) {
        return Err(QstatError::InvalidArgument(bad.clone()));
    }
    let quoted: Vec<String> = jobids.iter().map(|id| format!("'{}'", id)).collect();
    Ok(format!("qstat -f {}", quoted.join(" ")))
}

/// Query attributes of the given jobs with `qstat -f`.
///
/// Jobs that finished since the listing make qstat exit non-zero while it
/// still reports the rest, so the exit status is ignored here.
pub async fn query_qstat_full(
    runner: &dyn CommandRunner,
    jobids: &[String],
) -> Result<BTreeMap<String, JobDetail>, QstatError> {
    if jobids.is_empty() {
        return Ok(BTreeMap::new());
    }

    let command = qstat_full_command(jobids)?;
    let stdout = runner.execute_allow_failure(&command).await?;

    Ok(parse_qstat_full(&stdout))
}
