//! Sparkline of CPUs held by running jobs over recent cycles.

use crate::ui::Theme;
use ratatui::{
    Frame,
    layout::Rect,
    style::Style,
    widgets::{Block, Borders, Sparkline},
};

pub struct CpuHistory;

impl CpuHistory {
    pub fn render(frame: &mut Frame, area: Rect, history: &[u64], theme: &Theme) {
        let peak = history.iter().copied().max().unwrap_or(0);
        let current = history.last().copied().unwrap_or(0);

        // Newest samples on the right edge
        let width = area.width.saturating_sub(2) as usize;
        let visible = &history[history.len().saturating_sub(width)..];

        let sparkline = Sparkline::default()
            .block(Block::default().borders(Borders::ALL).title(format!(
                " Active CPUs: {} (peak {}) ",
                current, peak
            )))
            .data(visible)
            .style(Style::default().fg(theme.running));

        frame.render_widget(sparkline, area);
    }
}
