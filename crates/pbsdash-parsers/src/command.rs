//! Command execution for scheduler queries.
//!
//! Commands run either on the local machine or on a cluster login node
//! through the system `ssh` client. Authentication is left to ssh itself
//! (agent, keys, `~/.ssh/config`).

use async_trait::async_trait;
use camino::Utf8PathBuf;
use std::process::{Output, Stdio};
use std::string::FromUtf8Error;
use std::time::Duration;
use thiserror::Error;
use tokio::process::Command;
use tokio::sync::Mutex;

/// ssh reserves this exit status for its own failures.
const SSH_FAILURE_STATUS: i32 = 255;

/// Error type for command execution.
#[derive(Error, Debug)]
pub enum CommandError {
    #[error("Failed to reach {target}: {error}")]
    Connection { target: String, error: String },
    #[error("Command `{command}` exited with status {status}: {stderr}")]
    Execution {
        command: String,
        status: i32,
        stderr: String,
    },
    #[error("Output of `{command}` is not valid UTF-8: {error}")]
    Encoding {
        command: String,
        error: FromUtf8Error,
    },
}

/// Something that can run a shell command and hand back its stdout.
///
/// Implementations do not retry; the caller owns the retry policy.
#[async_trait]
pub trait CommandRunner: Send + Sync {
    /// Where commands run, for log lines.
    fn target(&self) -> &str;

    /// Run `command` and return stdout. A non-zero exit status is an error.
    async fn execute(&self, command: &str) -> Result<String, CommandError>;

    /// Run `command` and return stdout, treating non-zero exit as OK.
    ///
    /// `qstat -f` exits non-zero when one of the requested jobs finished in
    /// the meantime, but still prints the others.
    async fn execute_allow_failure(&self, command: &str) -> Result<String, CommandError>;
}

/// Spawn `cmd` and collect its output.
///
/// The child owns all three pipes and is killed if the returned future is
/// dropped, so nothing leaks when a cycle is cancelled mid-read.
async fn capture(cmd: &mut Command, target: &str) -> Result<Output, CommandError> {
    cmd.stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let child = cmd.spawn().map_err(|e| CommandError::Connection {
        target: target.to_string(),
        error: e.to_string(),
    })?;

    child
        .wait_with_output()
        .await
        .map_err(|e| CommandError::Connection {
            target: target.to_string(),
            error: e.to_string(),
        })
}

/// Check the exit status and decode stdout.
fn finish(command: &str, output: Output, allow_failure: bool) -> Result<String, CommandError> {
    if !allow_failure && !output.status.success() {
        return Err(CommandError::Execution {
            command: command.to_string(),
            status: output.status.code().unwrap_or(-1),
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        });
    }

    String::from_utf8(output.stdout).map_err(|error| CommandError::Encoding {
        command: command.to_string(),
        error,
    })
}

/// Runs commands with `sh -c` on this machine.
///
/// Useful when pbsdash itself runs on a login node.
#[derive(Debug, Default, Clone)]
pub struct LocalShell;

impl LocalShell {
    async fn run(&self, command: &str, allow_failure: bool) -> Result<String, CommandError> {
        tracing::debug!("executing `{}` locally", command);
        let mut cmd = Command::new("sh");
        cmd.arg("-c").arg(command);
        let output = capture(&mut cmd, self.target()).await?;
        finish(command, output, allow_failure)
    }
}

#[async_trait]
impl CommandRunner for LocalShell {
    fn target(&self) -> &str {
        "localhost"
    }

    async fn execute(&self, command: &str) -> Result<String, CommandError> {
        self.run(command, false).await
    }

    async fn execute_allow_failure(&self, command: &str) -> Result<String, CommandError> {
        self.run(command, true).await
    }
}

/// A login-node session backed by the system ssh client.
///
/// Each command opens its own channel; the session serialises them so at
/// most one command is in flight at a time.
#[derive(Debug)]
pub struct SshSession {
    destination: String,
    identity: Option<Utf8PathBuf>,
    connect_timeout: Duration,
    in_flight: Mutex<()>,
}

impl SshSession {
    /// Create a session without contacting the host.
    pub fn new(host: &str, user: Option<&str>, identity: Option<Utf8PathBuf>) -> Self {
        let destination = match user {
            Some(user) => format!("{}@{}", user, host),
            None => host.to_string(),
        };
        Self {
            destination,
            identity,
            connect_timeout: Duration::from_secs(15),
            in_flight: Mutex::new(()),
        }
    }

    /// Create a session and make sure the host accepts us.
    pub async fn connect(
        host: &str,
        user: Option<&str>,
        identity: Option<Utf8PathBuf>,
    ) -> Result<Self, CommandError> {
        let session = Self::new(host, user, identity);
        match session.execute("true").await {
            Ok(_) => Ok(session),
            Err(CommandError::Execution { stderr, .. }) => Err(CommandError::Connection {
                target: session.destination.clone(),
                error: stderr,
            }),
            Err(e) => Err(e),
        }
    }

    fn command(&self, remote: &str) -> Command {
        let mut cmd = Command::new("ssh");
        cmd.args(["-o", "BatchMode=yes", "-o"])
            .arg(format!("ConnectTimeout={}", self.connect_timeout.as_secs()));
        if let Some(identity) = &self.identity {
            cmd.arg("-i").arg(identity.as_str());
        }
        cmd.arg(&self.destination).arg("--").arg(remote);
        cmd
    }

    async fn run(&self, command: &str, allow_failure: bool) -> Result<String, CommandError> {
        let _guard = self.in_flight.lock().await;
        tracing::debug!(host = %self.destination, "executing `{}`", command);

        let output = capture(&mut self.command(command), &self.destination).await?;
        if output.status.code() == Some(SSH_FAILURE_STATUS) {
            return Err(CommandError::Connection {
                target: self.destination.clone(),
                error: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        finish(command, output, allow_failure)
    }
}

#[async_trait]
impl CommandRunner for SshSession {
    fn target(&self) -> &str {
        &self.destination
    }

    async fn execute(&self, command: &str) -> Result<String, CommandError> {
        self.run(command, false).await
    }

    async fn execute_allow_failure(&self, command: &str) -> Result<String, CommandError> {
        self.run(command, true).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_local_execute_success() {
        let result = LocalShell.execute("echo hello").await.unwrap();
        assert_eq!(result.trim(), "hello");
    }

    #[tokio::test]
    async fn test_local_execute_failure_carries_status() {
        let result = LocalShell.execute("echo oops >&2; exit 3").await;
        match result {
            Err(CommandError::Execution { status, stderr, .. }) => {
                assert_eq!(status, 3);
                assert_eq!(stderr, "oops");
            }
            other => panic!("expected execution error, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_local_execute_allow_failure_keeps_stdout() {
        let result = LocalShell
            .execute_allow_failure("echo partial; exit 1")
            .await
            .unwrap();
        assert_eq!(result, "partial\n");
    }

    #[tokio::test]
    async fn test_local_execute_rejects_invalid_utf8() {
        let result = LocalShell.execute("printf '\\377\\376'").await;
        assert!(matches!(result, Err(CommandError::Encoding { .. })));
    }

    #[test]
    fn test_ssh_command_line() {
        let session = SshSession::new(
            "gadi.nci.org.au",
            Some("abc123"),
            Some(Utf8PathBuf::from("/home/me/.ssh/id_ed25519")),
        );
        assert_eq!(session.target(), "abc123@gadi.nci.org.au");

        let cmd = session.command("qstat -w");
        let args: Vec<_> = cmd
            .as_std()
            .get_args()
            .map(|a| a.to_string_lossy().into_owned())
            .collect();
        assert_eq!(
            args,
            vec![
                "-o",
                "BatchMode=yes",
                "-o",
                "ConnectTimeout=15",
                "-i",
                "/home/me/.ssh/id_ed25519",
                "abc123@gadi.nci.org.au",
                "--",
                "qstat -w",
            ]
        );
    }

    #[test]
    fn test_ssh_destination_without_user() {
        let session = SshSession::new("gadi.nci.org.au", None, None);
        assert_eq!(session.target(), "gadi.nci.org.au");
    }
}
