//! Utility functions

pub mod interactive_log;
mod sanitize;

pub use interactive_log::{InteractiveGuard, QuietWhenInteractive};
pub use sanitize::sanitize_filename;
