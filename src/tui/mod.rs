//! Terminal User Interface (TUI) module.
//!
//! An interactive provider picker built on `ratatui`. It drives a
//! [`SessionController`](crate::session::SessionController) over channels.

mod app;

pub use app::App;
