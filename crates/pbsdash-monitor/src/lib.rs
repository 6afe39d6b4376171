//! Terminal dashboard for pbsdash.
//!
//! Reads the latest snapshot from the polling service and never talks to
//! the cluster itself.

pub mod app;
pub mod components;
pub mod ui;

pub use app::App;
