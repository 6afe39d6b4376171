//! Header component with job counts and last update time.

use crate::components::format_efficiency;
use crate::ui::Theme;
use chrono::Local;
use pbsdash_state::Snapshot;
use ratatui::{
    Frame,
    layout::{Alignment, Rect},
    style::{Color, Modifier, Style},
    text::{Line, Span},
    widgets::{Block, Borders, Paragraph},
};

pub struct Header;

impl Header {
    pub fn render(
        frame: &mut Frame,
        area: Rect,
        target: &str,
        snapshot: Option<&Snapshot>,
        polling: bool,
        theme: &Theme,
    ) {
        let title = Line::from(vec![
            Span::styled(
                " pbsdash",
                Style::default()
                    .fg(theme.foreground)
                    .add_modifier(Modifier::BOLD),
            ),
            Span::styled(" │ ", Style::default().fg(theme.muted)),
            Span::styled(format!("{} ", target), Style::default().fg(theme.highlight)),
        ]);

        let updated = match snapshot {
            _ if polling => " polling… ".to_string(),
            Some(snapshot) => snapshot
                .taken_at
                .with_timezone(&Local)
                .format(" updated %H:%M:%S ")
                .to_string(),
            None => " waiting for first poll ".to_string(),
        };
        let updated_line = Line::from(Span::styled(updated, Style::default().fg(Color::Yellow)))
            .alignment(Alignment::Right);

        let summary = match snapshot {
            Some(snapshot) => summary_line(snapshot, theme),
            None => Line::from(Span::styled("…", Style::default().fg(theme.muted))),
        };

        let paragraph = Paragraph::new(summary).block(
            Block::default()
                .borders(Borders::ALL)
                .title(title)
                .title_top(updated_line),
        );

        frame.render_widget(paragraph, area);
    }
}

fn summary_line(snapshot: &Snapshot, theme: &Theme) -> Line<'static> {
    let counts = snapshot.job_counts();
    let mean = snapshot.mean_efficiency();

    Line::from(vec![
        Span::styled(
            format!("{} jobs  ", counts.total),
            Style::default().fg(theme.foreground),
        ),
        Span::styled(
            format!("{}R ", counts.running),
            Style::default()
                .fg(theme.running)
                .add_modifier(Modifier::BOLD),
        ),
        Span::styled(
            format!("{}Q ", counts.queued),
            Style::default().fg(theme.queued),
        ),
        Span::styled(format!("{}H ", counts.held), Style::default().fg(theme.held)),
        Span::styled(
            format!("{}E ", counts.exiting),
            Style::default().fg(theme.good),
        ),
        Span::styled(
            format!("{}other", counts.other),
            Style::default().fg(theme.muted),
        ),
        Span::styled(" │ ", Style::default().fg(theme.muted)),
        Span::styled(
            format!("{} CPUs busy", snapshot.active_cpus()),
            Style::default().fg(theme.highlight),
        ),
        Span::styled(" │ ", Style::default().fg(theme.muted)),
        Span::styled(
            format!("mean efficiency {}", format_efficiency(mean)),
            Style::default().fg(theme.efficiency_color(mean)),
        ),
    ])
}
