//! Group membership and display names via `getent`.

use crate::types::UserDirectory;
use once_cell::sync::Lazy;
use pbsdash_parsers::{CommandError, CommandRunner};
use regex::Regex;
use std::collections::BTreeSet;
use thiserror::Error;

static NAME_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[A-Za-z0-9][A-Za-z0-9._-]*$").unwrap());

/// Fields in a passwd record: name, password, uid, gid, gecos, home, shell.
const PASSWD_FIELDS: usize = 7;

#[derive(Error, Debug)]
pub enum DirectoryError {
    #[error("Failed to query directory: {0}")]
    ExecutionError(#[from] CommandError),
    #[error("Expected {expected} fields, got {fields}: {line}")]
    FormatError {
        expected: usize,
        fields: usize,
        line: String,
    },
    #[error("Invalid user or group name {0:?}")]
    InvalidName(String),
    #[error("Unknown group {0:?}")]
    UnknownGroup(String),
}

/// Groups found by `getent group` and the union of their members.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GroupMembership {
    pub groups: BTreeSet<String>,
    pub members: BTreeSet<String>,
}

impl GroupMembership {
    /// Requested groups that `getent` did not report.
    pub fn missing<'a, S: AsRef<str>>(&self, requested: &'a [S]) -> Vec<&'a str> {
        requested
            .iter()
            .map(|name| name.as_ref())
            .filter(|name| !self.groups.contains(*name))
            .collect()
    }

    /// Fail on the first requested group that was not reported.
    pub fn require<S: AsRef<str>>(&self, requested: &[S]) -> Result<(), DirectoryError> {
        match self.missing(requested).first() {
            Some(name) => Err(DirectoryError::UnknownGroup(name.to_string())),
            None => Ok(()),
        }
    }
}

/// Check that `name` is safe to interpolate into a shell command.
pub fn validate_name(name: &str) -> Result<(), DirectoryError> {
    if NAME_RE.is_match(name) {
        Ok(())
    } else {
        Err(DirectoryError::InvalidName(name.to_string()))
    }
}

/// Collect groups and members from `getent group` output.
///
/// Each line is `name:password:gid:member,member,...`. Lines without a
/// member field are ignored.
pub fn parse_group_members(output: &str) -> GroupMembership {
    let mut membership = GroupMembership::default();

    for line in output.lines() {
        let fields: Vec<&str> = line.split(':').collect();
        let (Some(name), Some(members)) = (fields.first(), fields.get(3)) else {
            continue;
        };
        membership.groups.insert(name.trim().to_string());
        membership.members.extend(
            members
                .split(',')
                .map(str::trim)
                .filter(|member| !member.is_empty())
                .map(str::to_string),
        );
    }

    membership
}

/// Parse one `getent passwd` record into (username, display name).
pub fn parse_passwd_line(line: &str) -> Result<(String, String), DirectoryError> {
    let fields: Vec<&str> = line.split(':').collect();
    if fields.len() != PASSWD_FIELDS {
        return Err(DirectoryError::FormatError {
            expected: PASSWD_FIELDS,
            fields: fields.len(),
            line: line.to_string(),
        });
    }
    Ok((fields[0].to_string(), fields[4].to_string()))
}

/// Parse `getent passwd` output. Malformed lines are logged and skipped.
pub fn parse_passwd(output: &str) -> UserDirectory {
    let mut users = UserDirectory::new();

    for line in output.lines() {
        if line.trim().is_empty() {
            continue;
        }
        match parse_passwd_line(line) {
            Ok((username, full_name)) => {
                users.insert(username, full_name);
            }
            Err(e) => tracing::warn!("Skipping passwd record: {}", e),
        }
    }

    users
}

fn getent_command(database: &str, names: &[&str]) -> Result<String, DirectoryError> {
    for name in names {
        validate_name(name)?;
    }
    Ok(format!("getent {} {}", database, names.join(" ")))
}

/// Resolve the members of `groups`.
///
/// getent exits non-zero when some of the keys are unknown but still prints
/// the rest, so its exit status is not treated as a failure. Callers check
/// [`GroupMembership::missing`] for groups that were not found.
pub async fn resolve_users<S: AsRef<str>>(
    runner: &dyn CommandRunner,
    groups: &[S],
) -> Result<GroupMembership, DirectoryError> {
    if groups.is_empty() {
        return Ok(GroupMembership::default());
    }

    let names: Vec<&str> = groups.iter().map(|name| name.as_ref()).collect();
    let command = getent_command("group", &names)?;
    let stdout = runner.execute_allow_failure(&command).await?;

    Ok(parse_group_members(&stdout))
}

/// Look up display names for `usernames`.
pub async fn resolve_names<S: AsRef<str>>(
    runner: &dyn CommandRunner,
    usernames: &[S],
) -> Result<UserDirectory, DirectoryError> {
    if usernames.is_empty() {
        return Ok(UserDirectory::new());
    }

    let names: Vec<&str> = usernames.iter().map(|name| name.as_ref()).collect();
    let command = getent_command("passwd", &names)?;
    let stdout = runner.execute_allow_failure(&command).await?;

    Ok(parse_passwd(&stdout))
}
