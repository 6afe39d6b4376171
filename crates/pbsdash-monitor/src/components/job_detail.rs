//! Detail pane for the selected job.

use crate::components::{format_bytes, format_efficiency};
use crate::ui::Theme;
use pbsdash_parsers::{format_duration, format_duration_pbs};
use pbsdash_state::CanonicalJobRecord;
use ratatui::{
    Frame,
    layout::Rect,
    style::{Modifier, Style},
    text::{Line, Span},
    widgets::{Block, Borders, Paragraph, Wrap},
};
use std::time::Duration;

/// Attributes worth showing before the rest, in this order.
const PROMINENT_ATTRIBUTES: [&str; 4] = ["project", "exec_host", "Resource_List.select", "comment"];

pub struct JobDetail;

impl JobDetail {
    pub fn render(
        frame: &mut Frame,
        area: Rect,
        record: Option<&CanonicalJobRecord>,
        theme: &Theme,
    ) {
        let content = match record {
            Some(record) => build_detail_lines(record, theme),
            None => vec![Line::from(Span::styled(
                "No job selected",
                Style::default().fg(theme.muted),
            ))],
        };

        let paragraph = Paragraph::new(content)
            .wrap(Wrap { trim: false })
            .block(
                Block::default()
                    .borders(Borders::ALL)
                    .title(" Job Details "),
            );

        frame.render_widget(paragraph, area);
    }
}

fn field<'a>(label: &'a str, value: String, theme: &Theme) -> Line<'a> {
    Line::from(vec![
        Span::styled(format!("{:<12}", label), Style::default().fg(theme.muted)),
        Span::styled(value, Style::default().fg(theme.foreground)),
    ])
}

fn or_dash<T>(value: Option<T>, format: impl Fn(T) -> String) -> String {
    value.map(format).unwrap_or_else(|| "-".to_string())
}

fn clock(d: Duration) -> String {
    format_duration(d.as_secs())
}

pub fn build_detail_lines<'a>(record: &'a CanonicalJobRecord, theme: &Theme) -> Vec<Line<'a>> {
    let job = &record.summary;
    let mut lines = vec![
        Line::from(vec![
            Span::styled(
                job.jobid.as_str(),
                Style::default()
                    .fg(theme.highlight)
                    .add_modifier(Modifier::BOLD),
            ),
            Span::raw("  "),
            Span::styled(job.jobname.as_str(), Style::default().fg(theme.foreground)),
        ]),
        Line::from(""),
    ];

    let owner = match &record.full_name {
        Some(name) if !name.is_empty() => format!("{} ({})", job.username, name),
        _ => job.username.clone(),
    };
    lines.push(field("Owner", owner, theme));
    lines.push(Line::from(vec![
        Span::styled(format!("{:<12}", "State"), Style::default().fg(theme.muted)),
        Span::styled(job.state.code(), theme.state_style(&job.state)),
    ]));
    lines.push(field("Queue", job.queue.clone(), theme));
    lines.push(field(
        "Session",
        job.session_id.clone().unwrap_or_else(|| "-".to_string()),
        theme,
    ));
    lines.push(field(
        "Nodes/tasks",
        format!("{} / {}", job.nodes, job.tasks),
        theme,
    ));
    lines.push(field("Req'd mem", or_dash(job.reqd_mem, format_bytes), theme));
    lines.push(field(
        "Req'd time",
        or_dash(job.reqd_time, |d| format_duration_pbs(d.as_secs())),
        theme,
    ));
    lines.push(field("Elapsed", or_dash(job.elap_time, clock), theme));

    if let Some(usage) = &record.usage {
        lines.push(Line::from(""));
        lines.push(Line::from(Span::styled(
            "Resources used",
            Style::default()
                .fg(theme.foreground)
                .add_modifier(Modifier::BOLD),
        )));
        lines.push(field("CPU time", or_dash(usage.cput, clock), theme));
        lines.push(field("Walltime", or_dash(usage.walltime, clock), theme));
        lines.push(field("CPUs", or_dash(usage.ncpus, |n| n.to_string()), theme));
        lines.push(field(
            "CPU percent",
            or_dash(usage.cpupercent, |p| format!("{:.0}%", p)),
            theme,
        ));
        lines.push(field("Memory", or_dash(usage.mem, format_bytes), theme));
        lines.push(field("Virtual mem", or_dash(usage.vmem, format_bytes), theme));
    }

    lines.push(Line::from(vec![
        Span::styled(
            format!("{:<12}", "Efficiency"),
            Style::default().fg(theme.muted),
        ),
        Span::styled(
            format_efficiency(record.cpu_efficiency),
            Style::default()
                .fg(theme.efficiency_color(record.cpu_efficiency))
                .add_modifier(Modifier::BOLD),
        ),
    ]));

    if !record.attributes.is_empty() {
        lines.push(Line::from(""));
        lines.push(Line::from(Span::styled(
            "Attributes",
            Style::default()
                .fg(theme.foreground)
                .add_modifier(Modifier::BOLD),
        )));

        let prominent = PROMINENT_ATTRIBUTES
            .iter()
            .filter_map(|key| record.attributes.get_key_value(*key));
        let rest = record
            .attributes
            .iter()
            .filter(|(key, _)| !PROMINENT_ATTRIBUTES.contains(&key.as_str()));

        for (key, value) in prominent.chain(rest) {
            lines.push(Line::from(vec![
                Span::styled(key.as_str(), Style::default().fg(theme.muted)),
                Span::raw(" = "),
                Span::raw(value.as_str()),
            ]));
        }
    }

    lines
}
