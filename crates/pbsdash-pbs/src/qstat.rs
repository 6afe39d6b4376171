//! Query the job listing via `qstat -w`.

use crate::directory::validate_name;
use crate::types::{JobState, JobSummary, QstatRow};
use pbsdash_parsers::{CommandError, CommandRunner};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum QstatError {
    #[error("Failed to execute qstat: {0}")]
    ExecutionError(#[from] CommandError),
    #[error("Expected 11 fields, got {fields}: {line}")]
    RowError { fields: usize, line: String },
    #[error("Invalid {column} {value:?} in row: {line}")]
    ColumnError {
        column: &'static str,
        value: String,
        line: String,
    },
    #[error("Malformed qstat -f block for {jobid}: {reason}")]
    MalformedBlock { jobid: String, reason: String },
    #[error("Failed to parse qstat -f attribute for {jobid}: {line:?}")]
    ParseError { jobid: String, line: String },
    #[error("Refusing to pass {0:?} to qstat")]
    InvalidArgument(String),
}

/// `qstat -w` prints a blank line, the server name, two header lines and a
/// ruler before the first job.
const BANNER_LINES: usize = 5;

/// Job ID, Username, Queue, Jobname, SessID, NDS, TSK, Req'd Memory,
/// Req'd Time, S, Elap Time
const QSTAT_COLUMNS: usize = 11;

/// Parse a single row of `qstat -w` output.
///
/// A row must have exactly 11 columns; anything else would shift values
/// into the wrong fields.
pub fn parse_qstat_line(line: &str) -> Result<QstatRow, QstatError> {
    let fields: Vec<&str> = line.split_whitespace().collect();
    if fields.len() != QSTAT_COLUMNS {
        return Err(QstatError::RowError {
            fields: fields.len(),
            line: line.to_string(),
        });
    }

    let count = |column: &'static str, value: &str| {
        value.parse::<u32>().map_err(|_| QstatError::ColumnError {
            column,
            value: value.to_string(),
            line: line.to_string(),
        })
    };

    Ok(QstatRow {
        jobid: fields[0].to_string(),
        username: fields[1].to_string(),
        queue: fields[2].to_string(),
        jobname: fields[3].to_string(),
        session_id: fields[4].to_string(),
        nodes: count("node count", fields[5])?,
        tasks: count("task count", fields[6])?,
        reqd_mem: fields[7].to_string(),
        reqd_time: fields[8].to_string(),
        state: JobState::from_code(fields[9]),
        elap_time: fields[10].to_string(),
    })
}

/// Parse the full `qstat -w` output, skipping the banner.
///
/// Malformed rows are logged and dropped; row order is preserved.
pub fn parse_qstat_wide(output: &str) -> Vec<QstatRow> {
    let mut rows = Vec::new();

    for line in output.lines().skip(BANNER_LINES) {
        if line.trim().is_empty() {
            continue;
        }
        match parse_qstat_line(line) {
            Ok(row) => rows.push(row),
            Err(e) => tracing::warn!("Skipping qstat row: {}", e),
        }
    }

    rows
}

/// Normalize units of parsed rows, dropping rows that fail.
pub fn summarize(rows: Vec<QstatRow>) -> Vec<JobSummary> {
    rows.into_iter()
        .filter_map(|row| {
            let jobid = row.jobid.clone();
            match JobSummary::try_from(row) {
                Ok(summary) => Some(summary),
                Err(e) => {
                    tracing::warn!("Skipping job {}: {}", jobid, e);
                    None
                }
            }
        })
        .collect()
}

/// Build the listing command for the given users.
pub fn qstat_command(users: &[String]) -> Result<String, QstatError> {
    for user in users {
        validate_name(user).map_err(|_| QstatError::InvalidArgument(user.clone()))?;
    }
    Ok(format!("qstat -w -u {}", users.join(",")))
}

/// Query the jobs of `users` with `qstat -w`.
pub async fn query_qstat(
    runner: &dyn CommandRunner,
    users: &[String],
) -> Result<Vec<JobSummary>, QstatError> {
    if users.is_empty() {
        return Ok(Vec::new());
    }

    let command = qstat_command(users)?;
    let stdout = runner.execute(&command).await?;

    Ok(summarize(parse_qstat_wide(&stdout)))
}
