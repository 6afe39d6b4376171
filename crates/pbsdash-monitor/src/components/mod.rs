//! TUI components.

pub mod cpu_history;
pub mod footer;
pub mod header;
pub mod job_detail;
pub mod job_list;

pub use cpu_history::CpuHistory;
pub use footer::Footer;
pub use header::Header;
pub use job_detail::JobDetail;
pub use job_list::JobList;

/// Format a byte count with a binary unit, e.g. "190.0G".
pub fn format_bytes(bytes: u64) -> String {
    const UNITS: [&str; 5] = ["B", "K", "M", "G", "T"];

    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }

    if unit == 0 {
        format!("{}B", bytes)
    } else {
        format!("{:.1}{}", value, UNITS[unit])
    }
}

/// Efficiency as a percentage of allocated CPUs.
pub fn format_efficiency(efficiency: Option<f64>) -> String {
    match efficiency {
        Some(e) => format!("{:.0}%", e * 100.0),
        None => "-".to_string(),
    }
}
