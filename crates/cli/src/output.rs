//! Terminal output helpers for command summaries.
//!
//! Colored status lines, aligned stat rows and human-readable sizes and
//! durations.

use std::time::Duration;

use anyhow::Context;
use owo_colors::{OwoColorize, Stream};

pub mod symbols {
  pub const SUCCESS: &str = "✓";
  pub const WARNING: &str = "⚠";
  pub const INFO: &str = "•";
}

/// Shorten an image digest for display, tolerating an algorithm prefix.
pub fn short_digest(digest: &str) -> &str {
  let bare = digest.strip_prefix("sha256:").unwrap_or(digest);
  bare.get(..12).unwrap_or(bare)
}

pub fn format_bytes(bytes: u64) -> String {
  const UNITS: [&str; 4] = ["B", "KB", "MB", "GB"];
  let mut scaled = bytes as f64;
  let mut unit = 0;
  while scaled >= 1024.0 && unit + 1 < UNITS.len() {
    scaled /= 1024.0;
    unit += 1;
  }
  if unit == 0 {
    format!("{bytes} B")
  } else {
    format!("{scaled:.1} {}", UNITS[unit])
  }
}

// Library builds under emulation can run for hours, so the formatter goes
// one unit higher than sub-minute precision.
pub fn format_duration(duration: Duration) -> String {
  let secs = duration.as_secs();
  let millis = duration.subsec_millis();

  if secs >= 3600 {
    format!("{}h {}m", secs / 3600, (secs % 3600) / 60)
  } else if secs >= 60 {
    format!("{}m {}s", secs / 60, secs % 60)
  } else if secs > 0 {
    format!("{}.{:02}s", secs, millis / 10)
  } else {
    format!("{}ms", millis)
  }
}

pub fn print_success(message: &str) {
  let mark = symbols::SUCCESS;
  println!("{} {message}", mark.if_supports_color(Stream::Stdout, |s| s.green()));
}

pub fn print_warning(message: &str) {
  let line = format!("{} {message}", symbols::WARNING);
  eprintln!("{}", line.if_supports_color(Stream::Stderr, |s| s.yellow()));
}

pub fn print_info(message: &str) {
  let mark = symbols::INFO;
  println!("{} {message}", mark.if_supports_color(Stream::Stdout, |s| s.blue()));
}

/// Indented label/value row. Labels pad to a common column before styling,
/// since escape codes would otherwise count into the width.
pub fn print_stat(label: &str, value: &str) {
  let head = format!("{:<10}", format!("{label}:"));
  println!("  {} {value}", head.if_supports_color(Stream::Stdout, |s| s.dimmed()));
}

pub fn print_json(value: &serde_json::Value) -> anyhow::Result<()> {
  let json = serde_json::to_string_pretty(value).context("Could not render JSON output")?;
  println!("{}", json);
  Ok(())
}
