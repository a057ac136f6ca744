use std::time::Duration;

use crossterm::style::{Color, Stylize};
use indicatif::{ProgressBar, ProgressStyle};

/// Prints a banner shown at program start.
pub fn banner() {
    println!("{}", "=== Auditcraft ===".with(Color::Cyan).bold());
}

pub fn print(msg: &str) {
    println!("{}", msg);
}

/// Prints an informational message in cyan.
pub fn info(msg: &str) {
    println!("{}", msg.with(Color::Cyan));
}

/// Prints a success message in green.
pub fn success(msg: &str) {
    println!("{}", msg.with(Color::Green));
}

/// Prints an error message in red (to stderr).
pub fn error(msg: &str) {
    eprintln!("{}", msg.with(Color::Red));
}

/// Returns a spinner progress bar with the given message.
pub fn spinner(message: &str) -> ProgressBar {
    let pb = ProgressBar::new_spinner();
    pb.set_message(message.to_string());
    pb.enable_steady_tick(Duration::from_millis(100));
    pb.set_style(
        ProgressStyle::default_spinner()
            .template("{spinner} {msg}")
            .unwrap(),
    );
    pb
}
