//! Job table component.

use crate::components::{format_bytes, format_efficiency};
use crate::ui::Theme;
use pbsdash_parsers::{format_duration, format_duration_pbs};
use pbsdash_state::CanonicalJobRecord;
use ratatui::{
    Frame,
    layout::{Constraint, Rect},
    style::{Modifier, Style},
    text::{Line, Span},
    widgets::{Block, Borders, Cell, Row, Table, TableState},
};

const COLUMNS: [&str; 12] = [
    "Job ID", "User", "Name", "Queue", "Job name", "NDS", "TSK", "Mem", "Time", "S", "Elapsed",
    "Eff",
];

pub struct JobList;

impl JobList {
    pub fn render(
        frame: &mut Frame,
        area: Rect,
        records: &[&CanonicalJobRecord],
        selected: Option<usize>,
        filter_label: &str,
        sort_label: &str,
        theme: &Theme,
    ) {
        let rows: Vec<Row> = records.iter().map(|record| job_row(record, theme)).collect();

        let header = Row::new(COLUMNS.iter().map(|c| {
            Cell::from(*c).style(
                Style::default()
                    .fg(theme.foreground)
                    .add_modifier(Modifier::BOLD),
            )
        }))
        .style(Style::default().add_modifier(Modifier::UNDERLINED));

        let title = Line::from(vec![
            Span::styled(" Jobs ", Style::default().fg(theme.foreground)),
            Span::styled(
                format!("({}) ", records.len()),
                Style::default().fg(theme.muted),
            ),
            Span::styled(
                format!("[filter: {}] [sort: {}] ", filter_label, sort_label),
                Style::default().fg(theme.muted),
            ),
        ]);

        let table = Table::new(
            rows,
            [
                Constraint::Length(16), // Job ID
                Constraint::Length(9),  // User
                Constraint::Min(12),    // Name
                Constraint::Length(12), // Queue
                Constraint::Min(12),    // Job name
                Constraint::Length(4),  // Nodes
                Constraint::Length(5),  // Tasks
                Constraint::Length(7),  // Memory
                Constraint::Length(6),  // Walltime
                Constraint::Length(1),  // State
                Constraint::Length(9),  // Elapsed
                Constraint::Length(5),  // Efficiency
            ],
        )
        .header(header)
        .block(Block::default().borders(Borders::ALL).title(title))
        .row_highlight_style(Style::default().add_modifier(Modifier::REVERSED));

        let mut table_state = TableState::default();
        table_state.select(selected);

        frame.render_stateful_widget(table, area, &mut table_state);
    }
}

fn job_row<'a>(record: &'a CanonicalJobRecord, theme: &Theme) -> Row<'a> {
    let job = &record.summary;
    let dash = || "-".to_string();

    Row::new(vec![
        Cell::from(job.jobid.as_str()).style(Style::default().fg(theme.highlight)),
        Cell::from(job.username.as_str()),
        Cell::from(record.full_name.as_deref().unwrap_or("")),
        Cell::from(job.queue.as_str()),
        Cell::from(job.jobname.as_str()),
        Cell::from(job.nodes.to_string()),
        Cell::from(job.tasks.to_string()),
        Cell::from(job.reqd_mem.map(format_bytes).unwrap_or_else(dash)),
        Cell::from(
            job.reqd_time
                .map(|d| format_duration_pbs(d.as_secs()))
                .unwrap_or_else(dash),
        ),
        Cell::from(job.state.code()).style(theme.state_style(&job.state)),
        Cell::from(
            job.elap_time
                .map(|d| format_duration(d.as_secs()))
                .unwrap_or_else(dash),
        ),
        Cell::from(format_efficiency(record.cpu_efficiency))
            .style(Style::default().fg(theme.efficiency_color(record.cpu_efficiency))),
    ])
}
