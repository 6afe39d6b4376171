//! CLI argument parsing for pbsdash.

use camino::Utf8PathBuf;
use clap::{Args as ClapArgs, Parser, Subcommand};
use pbsdash_pbs::validate_name;
use std::time::Duration;
use thiserror::Error;

#[derive(Parser, Debug)]
#[command(name = "pbsdash")]
#[command(version)]
#[command(about = "Monitor the PBS jobs of a project group")]
pub struct Args {
    #[command(subcommand)]
    pub command: Option<Command>,

    /// Login node to run qstat on
    #[arg(long, global = true, env = "PBSDASH_HOST")]
    pub host: Option<String>,

    /// Remote username (defaults to ssh's choice)
    #[arg(long, global = true)]
    pub user: Option<String>,

    /// Private key passed to ssh -i
    #[arg(long, global = true)]
    pub identity: Option<Utf8PathBuf>,

    /// Run commands on this machine instead of over ssh
    #[arg(long, global = true, conflicts_with = "host")]
    pub local: bool,

    /// Unix group whose members are monitored (repeatable)
    #[arg(long = "group", global = true)]
    pub groups: Vec<String>,

    /// Additional user to monitor (repeatable)
    #[arg(long = "extra-user", global = true)]
    pub extra_users: Vec<String>,

    /// Seconds between poll cycles
    #[arg(long, global = true, default_value = "60")]
    pub poll_interval: u64,

    /// Seconds between group membership refreshes
    #[arg(long, global = true, default_value = "3600")]
    pub directory_refresh: u64,

    /// Log level when RUST_LOG is unset
    #[arg(long, global = true, default_value = "info")]
    pub log_level: String,

    /// Write logs here (the monitor discards them otherwise)
    #[arg(long, global = true)]
    pub log_file: Option<Utf8PathBuf>,
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Interactive terminal dashboard (default)
    Monitor {
        #[command(flatten)]
        sink: SinkArgs,
    },
    /// Poll headless and publish every cycle to Elasticsearch
    Publish {
        #[command(flatten)]
        sink: SinkArgs,
    },
    /// Run a single cycle and print records as JSON lines
    Once,
}

#[derive(ClapArgs, Debug, Clone, Default, PartialEq, Eq)]
pub struct SinkArgs {
    /// Elasticsearch base URL
    #[arg(long, env = "PBSDASH_ES_URL")]
    pub es_url: Option<String>,

    /// Prefix of the dated indices
    #[arg(long, default_value = "pbs-jobs")]
    pub index_prefix: String,

    /// Install the index template before the first cycle
    #[arg(long)]
    pub install_template: bool,
}

#[derive(Error, Debug, PartialEq, Eq)]
pub enum ConfigError {
    #[error("No users to monitor: pass --group or --extra-user")]
    NoUsers,
    #[error("Invalid user or group name {0:?}")]
    InvalidName(String),
    #[error("Either --host or --local is required")]
    MissingHost,
    #[error("publish requires --es-url")]
    MissingSinkUrl,
    #[error("--{0} must be at least one second")]
    ZeroInterval(&'static str),
}

impl Args {
    /// The subcommand, defaulting to the monitor.
    pub fn command(&self) -> Command {
        self.command.clone().unwrap_or(Command::Monitor {
            sink: SinkArgs {
                index_prefix: "pbs-jobs".to_string(),
                ..Default::default()
            },
        })
    }

    /// Sink options of the chosen subcommand, if it has any.
    pub fn sink(&self) -> Option<SinkArgs> {
        match self.command() {
            Command::Monitor { sink } | Command::Publish { sink } => Some(sink),
            Command::Once => None,
        }
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval)
    }

    pub fn directory_refresh(&self) -> Duration {
        Duration::from_secs(self.directory_refresh)
    }

    /// Check the assembled configuration before anything is contacted.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.groups.is_empty() && self.extra_users.is_empty() {
            return Err(ConfigError::NoUsers);
        }
        for name in self.groups.iter().chain(&self.extra_users) {
            validate_name(name).map_err(|_| ConfigError::InvalidName(name.clone()))?;
        }
        if !self.local && self.host.is_none() {
            return Err(ConfigError::MissingHost);
        }
        if self.poll_interval == 0 {
            return Err(ConfigError::ZeroInterval("poll-interval"));
        }
        if self.directory_refresh == 0 {
            return Err(ConfigError::ZeroInterval("directory-refresh"));
        }
        if let Command::Publish { sink } = self.command()
            && sink.es_url.is_none()
        {
            return Err(ConfigError::MissingSinkUrl);
        }
        Ok(())
    }
}
