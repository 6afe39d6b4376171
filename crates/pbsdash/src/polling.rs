//! Background polling service for the PBS queue.

use chrono::Utc;
use pbsdash_parsers::CommandRunner;
use pbsdash_pbs::{
    DirectoryError, JobState, QstatError, UserDirectory, query_qstat, query_qstat_full,
    resolve_names, resolve_users,
};
use pbsdash_sink::{Sink, SinkError, index_name};
use pbsdash_state::{PollState, Snapshot, merge_jobs};
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::watch;
use tokio::time::{MissedTickBehavior, interval};
use tokio_util::sync::CancellationToken;

/// Everything that can abort a single cycle.
#[derive(Error, Debug)]
pub enum PollError {
    #[error(transparent)]
    Qstat(#[from] QstatError),
    #[error(transparent)]
    Directory(#[from] DirectoryError),
    #[error("Failed to publish snapshot: {0}")]
    Sink(#[from] SinkError),
}

/// Configuration for the polling service.
#[derive(Debug, Clone)]
pub struct PollingConfig {
    /// Interval between poll cycles.
    pub poll_interval: Duration,
    /// Interval between group membership refreshes.
    pub directory_refresh: Duration,
    /// Groups whose members are monitored.
    pub groups: Vec<String>,
    /// Users monitored regardless of group membership.
    pub extra_users: Vec<String>,
    /// Prefix of the dated sink indices.
    pub index_prefix: String,
}

impl Default for PollingConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(60),
            directory_refresh: Duration::from_secs(3600),
            groups: Vec::new(),
            extra_users: Vec::new(),
            index_prefix: "pbs-jobs".to_string(),
        }
    }
}

/// Polls the queue on a fixed cadence and fans each snapshot out to the
/// presentation channel and the optional sink.
pub struct PollingService {
    runner: Arc<dyn CommandRunner>,
    sink: Option<Arc<dyn Sink>>,
    config: PollingConfig,
    users: Vec<String>,
    directory: UserDirectory,
    state: watch::Sender<PollState>,
    snapshots: watch::Sender<Option<Arc<Snapshot>>>,
}

impl PollingService {
    /// Create the service and resolve the monitored users.
    ///
    /// Failing to resolve users here is fatal, unlike later refreshes.
    pub async fn new(
        runner: Arc<dyn CommandRunner>,
        sink: Option<Arc<dyn Sink>>,
        config: PollingConfig,
    ) -> Result<Self, PollError> {
        let (state, _) = watch::channel(PollState::Idle);
        let (snapshots, _) = watch::channel(None);
        let mut service = Self {
            runner,
            sink,
            config,
            users: Vec::new(),
            directory: UserDirectory::new(),
            state,
            snapshots,
        };

        let (users, directory) = service.lookup_users(true).await?;
        service.users = users;
        service.directory = directory;
        tracing::info!(
            "Monitoring {} users on {}",
            service.users.len(),
            service.runner.target()
        );

        Ok(service)
    }

    pub fn subscribe_state(&self) -> watch::Receiver<PollState> {
        self.state.subscribe()
    }

    pub fn subscribe_snapshots(&self) -> watch::Receiver<Option<Arc<Snapshot>>> {
        self.snapshots.subscribe()
    }

    pub fn state(&self) -> PollState {
        *self.state.borrow()
    }

    pub fn users(&self) -> &[String] {
        &self.users
    }

    /// Resolve group members plus extra users and their display names.
    ///
    /// With `require_groups`, a configured group that getent does not know
    /// is an error. Otherwise it is only logged.
    async fn lookup_users(
        &self,
        require_groups: bool,
    ) -> Result<(Vec<String>, UserDirectory), PollError> {
        let membership = resolve_users(self.runner.as_ref(), &self.config.groups).await?;
        if require_groups {
            membership.require(&self.config.groups)?;
        } else {
            for group in membership.missing(&self.config.groups) {
                tracing::warn!("Group {} not found", group);
            }
        }

        let mut users: BTreeSet<String> = membership.members;
        users.extend(self.config.extra_users.iter().cloned());

        let users: Vec<String> = users.into_iter().collect();
        let directory = resolve_names(self.runner.as_ref(), &users).await?;
        Ok((users, directory))
    }

    /// Re-resolve group membership and display names.
    ///
    /// On failure the previous user list and directory stay in place.
    pub async fn refresh_users(&mut self) {
        match self.lookup_users(false).await {
            Ok((users, directory)) => {
                if users != self.users {
                    tracing::info!("User list changed: {} users", users.len());
                }
                self.users = users;
                self.directory = directory;
            }
            Err(e) => tracing::warn!("Keeping previous user list: {}", e),
        }
    }

    /// Run a single poll cycle.
    pub async fn poll_once(&self) -> Result<Arc<Snapshot>, PollError> {
        self.state.send_replace(PollState::Polling);
        let result = self.cycle().await;
        self.state.send_replace(PollState::Idle);
        result
    }

    async fn cycle(&self) -> Result<Arc<Snapshot>, PollError> {
        let taken_at = Utc::now();
        let summaries = query_qstat(self.runner.as_ref(), &self.users).await?;

        let running: Vec<String> = summaries
            .iter()
            .filter(|s| s.state == JobState::Running)
            .map(|s| s.jobid.clone())
            .collect();
        let details = query_qstat_full(self.runner.as_ref(), &running).await?;

        let records = merge_jobs(summaries, &details, &self.directory);
        let snapshot = Arc::new(Snapshot::new(taken_at, records));
        tracing::info!(
            "Polled {} jobs ({} running, {} active CPUs)",
            snapshot.records.len(),
            running.len(),
            snapshot.active_cpus()
        );

        self.snapshots.send_replace(Some(Arc::clone(&snapshot)));

        if let Some(sink) = &self.sink {
            let index = index_name(&self.config.index_prefix, taken_at);
            let summary = sink.bulk_upsert(&snapshot, &index).await?;
            if summary.failed > 0 {
                tracing::warn!(
                    "{} of {} documents rejected by {}",
                    summary.failed,
                    summary.indexed + summary.failed,
                    index
                );
            } else {
                tracing::debug!("Indexed {} documents into {}", summary.indexed, index);
            }
        }

        Ok(snapshot)
    }

    /// Poll until `cancel` fires.
    ///
    /// The first cycle runs immediately. A cycle that is still waiting on
    /// the remote host when `cancel` fires is dropped, which kills the
    /// remote command.
    pub async fn run(mut self, cancel: CancellationToken) {
        let mut poll_ticker = interval(self.config.poll_interval);
        poll_ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut refresh_ticker = interval(self.config.directory_refresh);
        refresh_ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        // Users were resolved at construction
        refresh_ticker.tick().await;

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = poll_ticker.tick() => {
                    tokio::select! {
                        _ = cancel.cancelled() => break,
                        result = self.poll_once() => {
                            if let Err(e) = result {
                                tracing::error!("Poll cycle failed: {}", e);
                            }
                        }
                    }
                }
                _ = refresh_ticker.tick() => {
                    tokio::select! {
                        _ = cancel.cancelled() => break,
                        _ = self.refresh_users() => {}
                    }
                }
            }
        }

        self.state.send_replace(PollState::Idle);
        tracing::info!("Polling stopped");
    }

    /// Start the polling service in the background.
    pub fn start(self, cancel: CancellationToken) -> tokio::task::JoinHandle<()> {
        tokio::spawn(self.run(cancel))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use pbsdash_parsers::CommandError;
    use pbsdash_sink::BulkSummary;
    use std::sync::Mutex;

    const QSTAT_W: &str = "
gadi-pbs:
                                                                                                   Req'd  Req'd   Elap
Job ID                         Username        Queue           Jobname         SessID   NDS  TSK   Memory Time  S Time
------------------------------ --------------- --------------- --------------- -------- ---- ----- ------ ----- - -----
123.gadi                       abc123          normal          ingest.sh       1234567     1    48  190gb 48:00 R 01:00
456.gadi                       xyz789          normal          stats             --        1    48  190gb 10:00 Q   --
";

    const QSTAT_F: &str = "Job Id: 123.gadi
    Job_Name = ingest.sh
    queue = normal-exec
    resources_used.cput = 24:00:00
    resources_used.ncpus = 48
    resources_used.walltime = 01:00:00
    project = v10
";

    /// Answers each command by its prefix and records what it was asked.
    #[derive(Default)]
    struct FakeCluster {
        commands: Mutex<Vec<String>>,
        fail_qstat: bool,
        /// Number of upcoming `qstat -w` calls that fail.
        qstat_failures: Mutex<usize>,
        fail_getent: Mutex<bool>,
        group_output: Option<&'static str>,
    }

    impl FakeCluster {
        fn commands(&self) -> Vec<String> {
            self.commands.lock().unwrap().clone()
        }

        fn respond(&self, command: &str) -> Result<String, CommandError> {
            self.commands.lock().unwrap().push(command.to_string());

            if command.starts_with("getent") && *self.fail_getent.lock().unwrap() {
                return Err(CommandError::Connection {
                    target: "fake".to_string(),
                    error: "connection reset".to_string(),
                });
            }
            if command.starts_with("getent group") {
                Ok(self
                    .group_output
                    .unwrap_or("v10:*:5010:abc123,xyz789\n")
                    .to_string())
            } else if command.starts_with("getent passwd") {
                Ok("abc123:x:1:1:Alice Example:/home/abc123:/bin/bash\n".to_string())
            } else if command.starts_with("qstat -w") {
                let mut failures = self.qstat_failures.lock().unwrap();
                if self.fail_qstat || *failures > 0 {
                    *failures = failures.saturating_sub(1);
                    Err(CommandError::Execution {
                        command: command.to_string(),
                        status: 1,
                        stderr: "qstat: cannot connect to server".to_string(),
                    })
                } else {
                    Ok(QSTAT_W.to_string())
                }
            } else if command.starts_with("qstat -f") {
                Ok(QSTAT_F.to_string())
            } else {
                Ok(String::new())
            }
        }
    }

    #[async_trait]
    impl CommandRunner for FakeCluster {
        fn target(&self) -> &str {
            "fake"
        }

        async fn execute(&self, command: &str) -> Result<String, CommandError> {
            self.respond(command)
        }

        async fn execute_allow_failure(&self, command: &str) -> Result<String, CommandError> {
            self.respond(command)
        }
    }

    #[derive(Default)]
    struct RecordingSink {
        indices: Mutex<Vec<(String, usize)>>,
    }

    #[async_trait]
    impl Sink for RecordingSink {
        async fn bulk_upsert(
            &self,
            snapshot: &Snapshot,
            index: &str,
        ) -> Result<BulkSummary, SinkError> {
            self.indices
                .lock()
                .unwrap()
                .push((index.to_string(), snapshot.records.len()));
            Ok(BulkSummary {
                indexed: snapshot.records.len(),
                failed: 0,
            })
        }
    }

    /// Never answers, like a login node that stopped responding.
    struct Hung;

    #[async_trait]
    impl CommandRunner for Hung {
        fn target(&self) -> &str {
            "hung"
        }

        async fn execute(&self, command: &str) -> Result<String, CommandError> {
            if command.starts_with("qstat") {
                std::future::pending::<()>().await;
            }
            Ok(String::new())
        }

        async fn execute_allow_failure(&self, command: &str) -> Result<String, CommandError> {
            self.execute(command).await
        }
    }

    fn config() -> PollingConfig {
        PollingConfig {
            groups: vec!["v10".to_string()],
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_poll_once_end_to_end() {
        let cluster = Arc::new(FakeCluster::default());
        let sink = Arc::new(RecordingSink::default());
        let service = PollingService::new(cluster.clone(), Some(sink.clone()), config())
            .await
            .unwrap();
        assert_eq!(service.users(), ["abc123", "xyz789"]);

        let mut snapshots = service.subscribe_snapshots();
        let snapshot = service.poll_once().await.unwrap();

        assert_eq!(
            cluster.commands(),
            vec![
                "getent group v10",
                "getent passwd abc123 xyz789",
                "qstat -w -u abc123,xyz789",
                "qstat -f '123.gadi'",
            ]
        );

        assert_eq!(snapshot.records.len(), 2);
        let running = &snapshot.records[0];
        assert_eq!(running.jobid(), "123.gadi");
        assert_eq!(running.summary.queue, "normal");
        assert_eq!(running.cpu_efficiency, Some(0.5));
        assert_eq!(running.full_name.as_deref(), Some("Alice Example"));

        let queued = &snapshot.records[1];
        assert_eq!(queued.jobid(), "456.gadi");
        assert!(queued.usage.is_none());
        assert_eq!(queued.cpu_efficiency, None);

        assert!(snapshots.has_changed().unwrap());
        let published = snapshots.borrow_and_update().clone().unwrap();
        assert_eq!(published.records.len(), 2);

        let indices = sink.indices.lock().unwrap();
        assert_eq!(indices.len(), 1);
        assert!(indices[0].0.starts_with("pbs-jobs-"));
        assert_eq!(indices[0].1, 2);
        assert_eq!(service.state(), PollState::Idle);
    }

    #[tokio::test]
    async fn test_failed_cycle_returns_to_idle() {
        let cluster = Arc::new(FakeCluster {
            fail_qstat: true,
            ..Default::default()
        });
        let service = PollingService::new(cluster, None, config()).await.unwrap();
        let snapshots = service.subscribe_snapshots();

        let result = service.poll_once().await;
        assert!(matches!(
            result,
            Err(PollError::Qstat(QstatError::ExecutionError(
                CommandError::Execution { status: 1, .. }
            )))
        ));
        assert_eq!(service.state(), PollState::Idle);
        assert!(snapshots.borrow().is_none());

        // The next cycle is attempted as usual
        assert!(service.poll_once().await.is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_loop_continues_after_failed_cycle() {
        let cluster = Arc::new(FakeCluster {
            qstat_failures: Mutex::new(1),
            ..Default::default()
        });
        let config = PollingConfig {
            poll_interval: Duration::from_secs(1),
            ..config()
        };
        let service = PollingService::new(cluster.clone(), None, config)
            .await
            .unwrap();
        let mut snapshots = service.subscribe_snapshots();
        let mut state = service.subscribe_state();

        let cancel = CancellationToken::new();
        let handle = service.start(cancel.clone());

        tokio::time::timeout(Duration::from_secs(300), snapshots.changed())
            .await
            .unwrap()
            .unwrap();
        let snapshot = snapshots.borrow_and_update().clone().unwrap();
        assert_eq!(snapshot.records.len(), 2);

        let listings = cluster
            .commands()
            .iter()
            .filter(|c| c.starts_with("qstat -w"))
            .count();
        assert!(listings >= 2);

        state.wait_for(|s| *s == PollState::Idle).await.unwrap();
        cancel.cancel();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn test_unknown_group_fails_startup() {
        let cluster = Arc::new(FakeCluster {
            group_output: Some("v10:*:5010:abc123\n"),
            ..Default::default()
        });
        let result = PollingService::new(
            cluster.clone(),
            None,
            PollingConfig {
                groups: vec!["v10".to_string(), "v1O".to_string()],
                ..Default::default()
            },
        )
        .await;

        assert!(matches!(
            result,
            Err(PollError::Directory(DirectoryError::UnknownGroup(name))) if name == "v1O"
        ));
        assert_eq!(cluster.commands(), vec!["getent group v10 v1O"]);
    }

    #[tokio::test]
    async fn test_refresh_tolerates_vanished_group() {
        let cluster = Arc::new(FakeCluster::default());
        let mut service = PollingService::new(cluster.clone(), None, config())
            .await
            .unwrap();

        // getent only knows v10
        service.config.groups.push("u46".to_string());
        service.refresh_users().await;
        assert_eq!(service.users(), ["abc123", "xyz789"]);
        assert_eq!(
            cluster.commands().last().map(String::as_str),
            Some("getent passwd abc123 xyz789")
        );
    }

    #[tokio::test]
    async fn test_refresh_failure_keeps_previous_users() {
        let cluster = Arc::new(FakeCluster::default());
        let mut service = PollingService::new(cluster.clone(), None, config())
            .await
            .unwrap();

        *cluster.fail_getent.lock().unwrap() = true;
        service.refresh_users().await;
        assert_eq!(service.users(), ["abc123", "xyz789"]);
        assert_eq!(service.directory["abc123"], "Alice Example");
    }

    #[tokio::test]
    async fn test_extra_users_without_groups() {
        let cluster = Arc::new(FakeCluster::default());
        let service = PollingService::new(
            cluster.clone(),
            None,
            PollingConfig {
                extra_users: vec!["ghi000".to_string()],
                ..Default::default()
            },
        )
        .await
        .unwrap();

        assert_eq!(service.users(), ["ghi000"]);
        assert_eq!(cluster.commands(), vec!["getent passwd ghi000"]);
    }

    #[tokio::test]
    async fn test_cancel_interrupts_blocked_cycle() {
        let service = PollingService::new(
            Arc::new(Hung),
            None,
            PollingConfig {
                extra_users: vec!["abc123".to_string()],
                ..Default::default()
            },
        )
        .await
        .unwrap();
        let mut state = service.subscribe_state();

        let cancel = CancellationToken::new();
        let handle = service.start(cancel.clone());

        state
            .wait_for(|s| *s == PollState::Polling)
            .await
            .unwrap();
        cancel.cancel();

        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(*state.borrow(), PollState::Idle);
    }
}
