//! pbsdash - PBS job monitor for a project group.

mod logging;
mod polling;

use crate::polling::{PollingConfig, PollingService};
use clap::Parser;
use crossterm::{
    event::{DisableMouseCapture, EnableMouseCapture},
    execute,
    terminal::{EnterAlternateScreen, LeaveAlternateScreen, disable_raw_mode, enable_raw_mode},
};
use miette::{IntoDiagnostic, Result, miette};
use pbsdash_cli::{Args, Command, SinkArgs};
use pbsdash_monitor::App;
use pbsdash_parsers::{CommandRunner, LocalShell, SshSession};
use pbsdash_sink::{ElasticsearchSink, Sink};
use ratatui::prelude::*;
use std::io::{self, Write};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let command = args.command();

    logging::init(
        &args.log_level,
        args.log_file.as_deref(),
        matches!(command, Command::Monitor { .. }),
    )?;
    args.validate().into_diagnostic()?;

    let runner = connect(&args).await?;
    let sink = match args.sink() {
        Some(sink_args) => build_sink(&sink_args).await?,
        None => None,
    };

    let config = PollingConfig {
        poll_interval: args.poll_interval(),
        directory_refresh: args.directory_refresh(),
        groups: args.groups.clone(),
        extra_users: args.extra_users.clone(),
        index_prefix: args
            .sink()
            .map(|s| s.index_prefix)
            .unwrap_or_else(|| PollingConfig::default().index_prefix),
    };
    let target = runner.target().to_string();
    let service = PollingService::new(runner, sink, config)
        .await
        .into_diagnostic()?;
    if service.users().is_empty() {
        return Err(miette!("The configured groups have no members"));
    }

    match command {
        Command::Once => run_once(service).await,
        Command::Publish { .. } => run_headless(service).await,
        Command::Monitor { .. } => run_monitor(service, target).await,
    }
}

async fn connect(args: &Args) -> Result<Arc<dyn CommandRunner>> {
    if args.local {
        return Ok(Arc::new(LocalShell));
    }

    let host = args
        .host
        .as_deref()
        .ok_or_else(|| miette!("Either --host or --local is required"))?;
    let session = SshSession::connect(host, args.user.as_deref(), args.identity.clone())
        .await
        .into_diagnostic()?;
    tracing::info!("Connected to {}", session.target());
    Ok(Arc::new(session))
}

async fn build_sink(sink_args: &SinkArgs) -> Result<Option<Arc<dyn Sink>>> {
    let Some(url) = &sink_args.es_url else {
        return Ok(None);
    };

    let sink = ElasticsearchSink::new(url).into_diagnostic()?;
    if sink_args.install_template {
        sink.install_template(&sink_args.index_prefix)
            .await
            .into_diagnostic()?;
    }
    Ok(Some(Arc::new(sink)))
}

/// Cancel `token` on Ctrl-C.
fn cancel_on_ctrl_c(token: CancellationToken) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("Interrupted, shutting down");
        }
        token.cancel();
    });
}

/// Run one cycle and print each record as a JSON line.
async fn run_once(service: PollingService) -> Result<()> {
    let snapshot = service.poll_once().await.into_diagnostic()?;

    let mut stdout = io::stdout().lock();
    for record in &snapshot.records {
        let line = serde_json::to_string(record).into_diagnostic()?;
        writeln!(stdout, "{}", line).into_diagnostic()?;
    }
    Ok(())
}

async fn run_headless(service: PollingService) -> Result<()> {
    let cancel = CancellationToken::new();
    cancel_on_ctrl_c(cancel.clone());
    service.run(cancel).await;
    Ok(())
}

async fn run_monitor(service: PollingService, target: String) -> Result<()> {
    let cancel = CancellationToken::new();
    cancel_on_ctrl_c(cancel.clone());

    let app = App::new(
        target,
        service.subscribe_snapshots(),
        service.subscribe_state(),
    );
    let poller = service.start(cancel.clone());

    // Terminal I/O blocks, keep it off the runtime workers
    let ui_cancel = cancel.clone();
    let res = tokio::task::spawn_blocking(move || run_terminal(app, ui_cancel))
        .await
        .into_diagnostic()?;

    cancel.cancel();
    poller.await.into_diagnostic()?;
    res.into_diagnostic()
}

fn run_terminal(mut app: App, cancel: CancellationToken) -> io::Result<()> {
    enable_raw_mode()?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen, EnableMouseCapture)?;
    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend)?;

    let res = run_app(&mut terminal, &mut app, &cancel);

    // Restore terminal
    disable_raw_mode()?;
    execute!(
        terminal.backend_mut(),
        LeaveAlternateScreen,
        DisableMouseCapture
    )?;
    terminal.show_cursor()?;

    res
}

/// Main application loop.
fn run_app(
    terminal: &mut Terminal<CrosstermBackend<io::Stdout>>,
    app: &mut App,
    cancel: &CancellationToken,
) -> io::Result<()> {
    let tick_rate = Duration::from_millis(250);

    loop {
        app.refresh();
        terminal.draw(|frame| app.render(frame))?;

        app.poll_events(tick_rate)?;

        if app.should_quit || cancel.is_cancelled() {
            return Ok(());
        }
    }
}
