//! Footer component with keyboard shortcuts and status messages.

use ratatui::{
    Frame,
    layout::{Constraint, Direction, Layout, Rect},
    style::{Color, Modifier, Style},
    text::{Line, Span},
    widgets::Paragraph,
};

/// Version from Cargo.toml
const VERSION: &str = env!("CARGO_PKG_VERSION");

pub struct Footer;

impl Footer {
    pub fn render(frame: &mut Frame, area: Rect, status_message: Option<&str>) {
        let help = "j/k:nav  g/G:first/last  f:filter  s:sort  ?:help  q:quit";
        let version = format!("v{}", VERSION);

        let chunks = Layout::default()
            .direction(Direction::Horizontal)
            .constraints([
                Constraint::Min(1),
                Constraint::Length(version.len() as u16 + 1),
            ])
            .split(area);

        let left_content = match status_message {
            Some(msg) => Line::from(Span::styled(
                msg.to_string(),
                Style::default()
                    .fg(Color::Magenta)
                    .add_modifier(Modifier::BOLD),
            )),
            None => Line::from(Span::styled(help, Style::default().fg(Color::Gray))),
        };

        frame.render_widget(Paragraph::new(left_content), chunks[0]);
        frame.render_widget(
            Paragraph::new(Line::from(Span::styled(
                version,
                Style::default().fg(Color::Gray),
            ))),
            chunks[1],
        );
    }
}
