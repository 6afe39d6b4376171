//! Color themes.

use pbsdash_pbs::JobState;
use ratatui::style::{Color, Style};

pub struct Theme {
    pub foreground: Color,
    pub muted: Color,
    pub highlight: Color,
    pub running: Color,
    pub queued: Color,
    pub held: Color,
    pub good: Color,
    pub warning: Color,
    pub bad: Color,
}

impl Theme {
    pub fn dark() -> Self {
        Self {
            foreground: Color::White,
            muted: Color::DarkGray,
            highlight: Color::Cyan,
            running: Color::Yellow,
            queued: Color::Blue,
            held: Color::Magenta,
            good: Color::Green,
            warning: Color::Yellow,
            bad: Color::Red,
        }
    }

    pub fn state_style(&self, state: &JobState) -> Style {
        let color = match state {
            JobState::Running | JobState::Begun => self.running,
            JobState::Queued | JobState::Waiting | JobState::Transit => self.queued,
            JobState::Held | JobState::Suspended | JobState::UserSuspended => self.held,
            JobState::Exiting | JobState::Finished | JobState::Expired => self.good,
            JobState::Moved | JobState::Unknown(_) => self.muted,
        };
        Style::default().fg(color)
    }

    /// Green above 80% of allocated CPUs busy, red below 25%.
    pub fn efficiency_color(&self, efficiency: Option<f64>) -> Color {
        match efficiency {
            Some(e) if e >= 0.8 => self.good,
            Some(e) if e >= 0.25 => self.warning,
            Some(_) => self.bad,
            None => self.muted,
        }
    }
}

impl Default for Theme {
    fn default() -> Self {
        Self::dark()
    }
}
