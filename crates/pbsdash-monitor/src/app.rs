//! Main TUI application.

use crate::components::{CpuHistory, Footer, Header, JobDetail, JobList};
use crate::ui::Theme;
use crossterm::event::{self, Event, KeyCode, KeyEvent, KeyEventKind, KeyModifiers};
use pbsdash_pbs::JobState;
use pbsdash_state::{CanonicalJobRecord, PollState, Snapshot};
use ratatui::{
    Frame,
    layout::{Constraint, Direction, Layout, Rect},
    widgets::Clear,
};
use std::cmp::Ordering;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::watch;

/// Cycles of active-CPU history kept for the sparkline.
pub const HISTORY_LEN: usize = 240;

/// How long a status message stays in the footer.
const STATUS_TIMEOUT: Duration = Duration::from_secs(5);

/// Filter mode for job list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FilterMode {
    #[default]
    All,
    Running,
    Queued,
    Held,
}

impl FilterMode {
    pub fn next(self) -> Self {
        match self {
            Self::All => Self::Running,
            Self::Running => Self::Queued,
            Self::Queued => Self::Held,
            Self::Held => Self::All,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::All => "All",
            Self::Running => "Running",
            Self::Queued => "Queued",
            Self::Held => "Held",
        }
    }

    pub fn matches(&self, state: &JobState) -> bool {
        match self {
            Self::All => true,
            Self::Running => matches!(state, JobState::Running | JobState::Begun),
            Self::Queued => matches!(state, JobState::Queued | JobState::Waiting),
            Self::Held => matches!(
                state,
                JobState::Held | JobState::Suspended | JobState::UserSuspended
            ),
        }
    }
}

/// Sort mode for job list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SortMode {
    /// Order reported by qstat
    #[default]
    Listing,
    /// Least efficient first, jobs without a value last
    Efficiency,
    /// Most CPUs first
    Cpus,
    /// Longest running first
    Elapsed,
    User,
}

impl SortMode {
    pub fn next(self) -> Self {
        match self {
            Self::Listing => Self::Efficiency,
            Self::Efficiency => Self::Cpus,
            Self::Cpus => Self::Elapsed,
            Self::Elapsed => Self::User,
            Self::User => Self::Listing,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::Listing => "qstat",
            Self::Efficiency => "Efficiency",
            Self::Cpus => "CPUs",
            Self::Elapsed => "Elapsed",
            Self::User => "User",
        }
    }

    fn compare(&self, a: &CanonicalJobRecord, b: &CanonicalJobRecord) -> Ordering {
        match self {
            Self::Listing => Ordering::Equal,
            Self::Efficiency => match (a.cpu_efficiency, b.cpu_efficiency) {
                (Some(x), Some(y)) => x.total_cmp(&y),
                (Some(_), None) => Ordering::Less,
                (None, Some(_)) => Ordering::Greater,
                (None, None) => Ordering::Equal,
            },
            Self::Cpus => b.cpus().cmp(&a.cpus()),
            Self::Elapsed => b.summary.elap_time.cmp(&a.summary.elap_time),
            Self::User => a.summary.username.cmp(&b.summary.username),
        }
    }
}

/// Main application state.
pub struct App {
    pub should_quit: bool,
    pub selected_index: usize,
    pub filter_mode: FilterMode,
    pub sort_mode: SortMode,
    pub show_help: bool,
    pub theme: Theme,
    target: String,
    updates: watch::Receiver<Option<Arc<Snapshot>>>,
    poll_state: watch::Receiver<PollState>,
    snapshot: Option<Arc<Snapshot>>,
    cpu_history: VecDeque<u64>,
    visible: Vec<usize>, // Indices into snapshot.records, filtered and sorted
    status_message: Option<(String, Instant)>,
}

impl App {
    pub fn new(
        target: impl Into<String>,
        mut updates: watch::Receiver<Option<Arc<Snapshot>>>,
        poll_state: watch::Receiver<PollState>,
    ) -> Self {
        let initial = updates.borrow_and_update().clone();
        let mut app = Self {
            should_quit: false,
            selected_index: 0,
            filter_mode: FilterMode::default(),
            sort_mode: SortMode::default(),
            show_help: false,
            theme: Theme::dark(),
            target: target.into(),
            updates,
            poll_state,
            snapshot: None,
            cpu_history: VecDeque::with_capacity(HISTORY_LEN),
            visible: Vec::new(),
            status_message: None,
        };
        if let Some(snapshot) = initial {
            app.apply_snapshot(snapshot);
        }
        app
    }

    /// Pick up a new snapshot from the polling service, if one arrived.
    ///
    /// Returns true when the view changed.
    pub fn refresh(&mut self) -> bool {
        // An error means the poller is gone; keep showing the last snapshot
        if !self.updates.has_changed().unwrap_or(false) {
            return false;
        }
        let latest = self.updates.borrow_and_update().clone();
        match latest {
            Some(snapshot) => {
                self.apply_snapshot(snapshot);
                true
            }
            None => false,
        }
    }

    /// Replace the displayed snapshot, keeping the selected job if it
    /// still exists.
    pub fn apply_snapshot(&mut self, snapshot: Arc<Snapshot>) {
        let selected = self.selected_job().map(|r| r.jobid().to_string());

        if self.cpu_history.len() == HISTORY_LEN {
            self.cpu_history.pop_front();
        }
        self.cpu_history.push_back(snapshot.active_cpus());
        self.snapshot = Some(snapshot);
        self.update_job_list();

        if let Some(jobid) = selected {
            if let Some(index) = self.position_of(&jobid) {
                self.selected_index = index;
            } else {
                self.set_status(format!("{} left the queue", jobid));
            }
        }
    }

    /// True while the poller is running a cycle.
    pub fn is_polling(&self) -> bool {
        *self.poll_state.borrow() == PollState::Polling
    }

    fn records(&self) -> &[CanonicalJobRecord] {
        self.snapshot
            .as_deref()
            .map(|s| s.records.as_slice())
            .unwrap_or(&[])
    }

    fn position_of(&self, jobid: &str) -> Option<usize> {
        let records = self.records();
        self.visible
            .iter()
            .position(|&i| records[i].jobid() == jobid)
    }

    /// Update cached job list based on filter and sort.
    pub fn update_job_list(&mut self) {
        let records = self.snapshot.as_deref().map(|s| s.records.as_slice()).unwrap_or(&[]);

        let mut visible: Vec<usize> = records
            .iter()
            .enumerate()
            .filter(|(_, r)| self.filter_mode.matches(&r.summary.state))
            .map(|(i, _)| i)
            .collect();
        // Stable, so ties keep qstat order
        visible.sort_by(|&a, &b| self.sort_mode.compare(&records[a], &records[b]));
        self.visible = visible;

        if self.visible.is_empty() {
            self.selected_index = 0;
        } else {
            self.selected_index = self.selected_index.min(self.visible.len() - 1);
        }
    }

    /// Records currently shown, in display order.
    pub fn visible_jobs(&self) -> Vec<&CanonicalJobRecord> {
        let records = self.records();
        self.visible.iter().map(|&i| &records[i]).collect()
    }

    pub fn selected_job(&self) -> Option<&CanonicalJobRecord> {
        let index = *self.visible.get(self.selected_index)?;
        self.records().get(index)
    }

    pub fn cpu_history(&self) -> Vec<u64> {
        self.cpu_history.iter().copied().collect()
    }

    pub fn quit(&mut self) {
        self.should_quit = true;
    }

    pub fn select_next(&mut self) {
        let len = self.visible.len();
        if len > 0 {
            self.selected_index = (self.selected_index + 1) % len;
        }
    }

    pub fn select_previous(&mut self) {
        let len = self.visible.len();
        if len > 0 {
            self.selected_index = self.selected_index.checked_sub(1).unwrap_or(len - 1);
        }
    }

    pub fn select_first(&mut self) {
        self.selected_index = 0;
    }

    pub fn select_last(&mut self) {
        self.selected_index = self.visible.len().saturating_sub(1);
    }

    pub fn cycle_filter(&mut self) {
        self.filter_mode = self.filter_mode.next();
        self.update_job_list();
    }

    pub fn cycle_sort(&mut self) {
        self.sort_mode = self.sort_mode.next();
        self.update_job_list();
    }

    pub fn toggle_help(&mut self) {
        self.show_help = !self.show_help;
    }

    fn set_status(&mut self, message: String) {
        self.status_message = Some((message, Instant::now()));
    }

    fn status(&self) -> Option<&str> {
        self.status_message
            .as_ref()
            .filter(|(_, at)| at.elapsed() < STATUS_TIMEOUT)
            .map(|(msg, _)| msg.as_str())
    }

    pub fn handle_key(&mut self, key: KeyEvent) {
        if key.kind != KeyEventKind::Press {
            return;
        }

        // If help is showing, any key closes it
        if self.show_help {
            self.show_help = false;
            return;
        }

        match key.code {
            KeyCode::Char('q') | KeyCode::Esc => self.quit(),
            KeyCode::Char('c') if key.modifiers.contains(KeyModifiers::CONTROL) => self.quit(),
            KeyCode::Char('j') | KeyCode::Down => self.select_next(),
            KeyCode::Char('k') | KeyCode::Up => self.select_previous(),
            KeyCode::Char('g') | KeyCode::Home => self.select_first(),
            KeyCode::Char('G') | KeyCode::End => self.select_last(),
            KeyCode::Char('f') => self.cycle_filter(),
            KeyCode::Char('s') => self.cycle_sort(),
            KeyCode::Char('?') => self.toggle_help(),
            _ => {}
        }
    }

    /// Poll for events and handle them.
    pub fn poll_events(&mut self, timeout: Duration) -> std::io::Result<bool> {
        if event::poll(timeout)?
            && let Event::Key(key) = event::read()?
        {
            self.handle_key(key);
            return Ok(true);
        }
        Ok(false)
    }

    /// Render the UI.
    pub fn render(&self, frame: &mut Frame) {
        let area = frame.area();

        let chunks = Layout::default()
            .direction(Direction::Vertical)
            .constraints([
                Constraint::Length(3), // Header
                Constraint::Min(10),   // Main content
                Constraint::Length(7), // CPU history
                Constraint::Length(1), // Footer
            ])
            .split(area);

        Header::render(
            frame,
            chunks[0],
            &self.target,
            self.snapshot.as_deref(),
            self.is_polling(),
            &self.theme,
        );

        let main_chunks = Layout::default()
            .direction(Direction::Horizontal)
            .constraints([Constraint::Percentage(65), Constraint::Percentage(35)])
            .split(chunks[1]);

        let jobs = self.visible_jobs();
        let selected = (!jobs.is_empty()).then_some(self.selected_index);
        JobList::render(
            frame,
            main_chunks[0],
            &jobs,
            selected,
            self.filter_mode.label(),
            self.sort_mode.label(),
            &self.theme,
        );
        JobDetail::render(frame, main_chunks[1], self.selected_job(), &self.theme);

        CpuHistory::render(frame, chunks[2], &self.cpu_history(), &self.theme);
        Footer::render(frame, chunks[3], self.status());

        if self.show_help {
            self.render_help_overlay(frame);
        }
    }

    fn render_help_overlay(&self, frame: &mut Frame) {
        use ratatui::style::{Color, Style};
        use ratatui::widgets::{Block, Borders, Paragraph};

        let area = centered_rect(50, 50, frame.area());

        let help_text = r#"
  Keyboard Shortcuts
  ──────────────────

  j/k / ↑↓   Navigate jobs
  g / G      Go to first/last job
  f          Cycle state filter
  s          Cycle sort order
  ?          This help
  q / Ctrl+C Quit

  Efficiency is CPU time / walltime / CPUs.

  Press any key to close
"#;

        frame.render_widget(Clear, area);
        let paragraph = Paragraph::new(help_text)
            .block(
                Block::default()
                    .borders(Borders::ALL)
                    .title(" Help ")
                    .style(Style::default().bg(Color::DarkGray)),
            )
            .style(Style::default().fg(Color::White).bg(Color::DarkGray));

        frame.render_widget(paragraph, area);
    }
}

/// Create a centered rectangle.
fn centered_rect(percent_x: u16, percent_y: u16, area: Rect) -> Rect {
    let popup_layout = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Percentage((100 - percent_y) / 2),
            Constraint::Percentage(percent_y),
            Constraint::Percentage((100 - percent_y) / 2),
        ])
        .split(area);

    Layout::default()
        .direction(Direction::Horizontal)
        .constraints([
            Constraint::Percentage((100 - percent_x) / 2),
            Constraint::Percentage(percent_x),
            Constraint::Percentage((100 - percent_x) / 2),
        ])
        .split(popup_layout[1])[1]
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use pbsdash_pbs::{JobSummary, ResourceUsage};
    use ratatui::{Terminal, backend::TestBackend};
    use std::collections::BTreeMap;

    fn record(jobid: &str, user: &str, state: JobState, efficiency: Option<f64>) -> CanonicalJobRecord {
        let running = state == JobState::Running;
        CanonicalJobRecord {
            summary: JobSummary {
                jobid: jobid.to_string(),
                username: user.to_string(),
                queue: "normal".to_string(),
                jobname: "job.sh".to_string(),
                session_id: None,
                nodes: 1,
                tasks: 48,
                reqd_mem: None,
                reqd_time: None,
                state,
                elap_time: None,
            },
            usage: running.then(|| ResourceUsage {
                ncpus: Some(48),
                ..Default::default()
            }),
            cpu_efficiency: efficiency,
            full_name: None,
            attributes: BTreeMap::new(),
        }
    }

    fn snapshot(records: Vec<CanonicalJobRecord>) -> Arc<Snapshot> {
        Arc::new(Snapshot::new(Utc::now(), records))
    }

    fn sample() -> Arc<Snapshot> {
        snapshot(vec![
            record("1.gadi", "zed", JobState::Running, Some(0.9)),
            record("2.gadi", "amy", JobState::Queued, None),
            record("3.gadi", "bob", JobState::Running, Some(0.2)),
            record("4.gadi", "amy", JobState::Held, None),
        ])
    }

    fn idle() -> watch::Receiver<PollState> {
        watch::channel(PollState::Idle).1
    }

    fn ids(app: &App) -> Vec<&str> {
        app.visible_jobs().iter().map(|r| r.jobid()).collect()
    }

    #[test]
    fn test_refresh_reads_latest_snapshot() {
        let (tx, rx) = watch::channel(None);
        let mut app = App::new("gadi", rx, idle());
        assert!(ids(&app).is_empty());
        assert!(!app.refresh());

        tx.send_replace(Some(sample()));
        assert!(app.refresh());
        assert_eq!(ids(&app), vec!["1.gadi", "2.gadi", "3.gadi", "4.gadi"]);
        assert!(!app.refresh());

        // Poller gone: keep what we have
        drop(tx);
        assert!(!app.refresh());
        assert_eq!(ids(&app).len(), 4);
    }

    #[test]
    fn test_filter_modes() {
        let (_tx, rx) = watch::channel(Some(sample()));
        let mut app = App::new("gadi", rx, idle());

        app.cycle_filter();
        assert_eq!(app.filter_mode, FilterMode::Running);
        assert_eq!(ids(&app), vec!["1.gadi", "3.gadi"]);

        app.cycle_filter();
        assert_eq!(ids(&app), vec!["2.gadi"]);

        app.cycle_filter();
        assert_eq!(ids(&app), vec!["4.gadi"]);

        app.cycle_filter();
        assert_eq!(app.filter_mode, FilterMode::All);
        assert_eq!(ids(&app).len(), 4);
    }

    #[test]
    fn test_sort_modes() {
        let (_tx, rx) = watch::channel(Some(sample()));
        let mut app = App::new("gadi", rx, idle());

        app.cycle_sort();
        assert_eq!(app.sort_mode, SortMode::Efficiency);
        assert_eq!(ids(&app), vec!["3.gadi", "1.gadi", "2.gadi", "4.gadi"]);

        app.cycle_sort();
        assert_eq!(app.sort_mode, SortMode::Cpus);
        // Running jobs report 48 CPUs, others fall back to 48 tasks: ties keep order
        assert_eq!(ids(&app), vec!["1.gadi", "2.gadi", "3.gadi", "4.gadi"]);

        app.cycle_sort();
        app.cycle_sort();
        assert_eq!(app.sort_mode, SortMode::User);
        assert_eq!(ids(&app), vec!["2.gadi", "4.gadi", "3.gadi", "1.gadi"]);
    }

    #[test]
    fn test_selection_follows_job_across_snapshots() {
        let (tx, rx) = watch::channel(Some(sample()));
        let mut app = App::new("gadi", rx, idle());
        app.select_last();
        assert_eq!(app.selected_job().map(|r| r.jobid()), Some("4.gadi"));

        tx.send_replace(Some(snapshot(vec![
            record("4.gadi", "amy", JobState::Held, None),
            record("5.gadi", "amy", JobState::Queued, None),
        ])));
        app.refresh();
        assert_eq!(app.selected_index, 0);
        assert_eq!(app.selected_job().map(|r| r.jobid()), Some("4.gadi"));

        tx.send_replace(Some(snapshot(vec![record(
            "5.gadi",
            "amy",
            JobState::Queued,
            None,
        )])));
        app.refresh();
        assert_eq!(app.selected_job().map(|r| r.jobid()), Some("5.gadi"));
        assert_eq!(app.status(), Some("4.gadi left the queue"));
    }

    #[test]
    fn test_cpu_history_is_bounded() {
        let (_tx, rx) = watch::channel(None);
        let mut app = App::new("gadi", rx, idle());
        for _ in 0..HISTORY_LEN + 10 {
            app.apply_snapshot(sample());
        }
        let history = app.cpu_history();
        assert_eq!(history.len(), HISTORY_LEN);
        assert!(history.iter().all(|&cpus| cpus == 96));
    }

    #[test]
    fn test_navigation_wraps() {
        let (_tx, rx) = watch::channel(Some(sample()));
        let mut app = App::new("gadi", rx, idle());
        app.select_previous();
        assert_eq!(app.selected_index, 3);
        app.select_next();
        assert_eq!(app.selected_index, 0);

        app.handle_key(KeyEvent::from(KeyCode::Char('q')));
        assert!(app.should_quit);
    }

    #[test]
    fn test_render_smoke() {
        let (_tx, rx) = watch::channel(Some(sample()));
        let mut app = App::new("gadi.nci.org.au", rx, idle());
        app.toggle_help();

        let mut terminal = Terminal::new(TestBackend::new(160, 40)).unwrap();
        terminal.draw(|frame| app.render(frame)).unwrap();

        let buffer = terminal.backend().buffer();
        let screen: String = buffer.content.iter().map(|c| c.symbol()).collect();
        assert!(screen.contains("gadi.nci.org.au"));
        assert!(screen.contains("1.gadi"));
        assert!(screen.contains("Keyboard Shortcuts"));
    }
}
