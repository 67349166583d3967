//! Terminal output for starforge.
//!
//! Status lines, per-asset progress lines for `build` and `watch`, and the
//! archive table printed by `inspect`. Addresses are shown the way linker
//! maps show them: zero-padded upper-case hex.

use std::fmt::Display;
use std::path::Path;
use std::time::Duration;

use anyhow::Context;
use clap::ValueEnum;
use owo_colors::{OwoColorize, Stream};

#[derive(Debug, Clone, Copy, Default, ValueEnum)]
pub enum OutputFormat {
  #[default]
  Text,
  Json,
}

impl OutputFormat {
  pub fn is_json(self) -> bool {
    matches!(self, OutputFormat::Json)
  }
}

pub mod symbols {
  pub const SUCCESS: &str = "✓";
  pub const ERROR: &str = "✗";
  pub const WARNING: &str = "⚠";
  pub const INFO: &str = "•";
  pub const ARROW: &str = "→";
}

/// Engine shas are shown in git's short form.
pub fn short_sha(sha: &str) -> &str {
  sha.get(..8).unwrap_or(sha)
}

pub fn format_address(address: usize) -> String {
  format!("0x{address:08X}")
}

pub fn format_bytes(bytes: u64) -> String {
  const KB: u64 = 1024;
  const MB: u64 = KB * 1024;

  match bytes {
    b if b >= MB => format!("{:.1} MB", b as f64 / MB as f64),
    b if b >= KB => format!("{:.1} KB", b as f64 / KB as f64),
    b => format!("{b} B"),
  }
}

/// Stored size of an archive entry, with the unpacked size when it is
/// compressed.
pub fn format_entry_size(compressed: u32, decompressed: u32) -> String {
  if compressed == decompressed {
    return format_bytes(decompressed as u64);
  }
  format!(
    "{} {} {}",
    format_bytes(compressed as u64),
    symbols::ARROW,
    format_bytes(decompressed as u64)
  )
}

/// Builds take milliseconds to seconds; anything longer is shown in seconds.
pub fn format_elapsed(elapsed: Duration) -> String {
  if elapsed < Duration::from_secs(1) {
    format!("{}ms", elapsed.as_millis())
  } else {
    format!("{:.2}s", elapsed.as_secs_f64())
  }
}

pub fn print_success(message: &str) {
  println!(
    "{} {}",
    symbols::SUCCESS.if_supports_color(Stream::Stdout, |s| s.green()),
    message
  );
}

pub fn print_error(message: &str) {
  eprintln!(
    "{} {}",
    symbols::ERROR.if_supports_color(Stream::Stderr, |s| s.red()),
    message.if_supports_color(Stream::Stderr, |s| s.red())
  );
}

pub fn print_warning(message: &str) {
  eprintln!(
    "{} {}",
    symbols::WARNING.if_supports_color(Stream::Stderr, |s| s.yellow()),
    message.if_supports_color(Stream::Stderr, |s| s.yellow())
  );
}

pub fn print_info(message: &str) {
  println!(
    "{} {}",
    symbols::INFO.if_supports_color(Stream::Stdout, |s| s.blue()),
    message
  );
}

pub fn print_stat(label: &str, value: &str) {
  println!(
    "  {}: {}",
    label.if_supports_color(Stream::Stdout, |s| s.dimmed()),
    value
  );
}

/// `[ 3/12] area/kmr/kmr_00.shape`, counter padded to the width of `total`.
pub fn progress_line(done: usize, total: usize, asset: impl Display) -> String {
  let width = total.to_string().len();
  format!("[{done:>width$}/{total}] {asset}")
}

pub fn print_asset_built(done: usize, total: usize, asset: impl Display) {
  println!(
    "  {}",
    progress_line(done, total, asset).if_supports_color(Stream::Stdout, |s| s.dimmed())
  );
}

pub fn print_asset_failed(asset: &Path, error: impl Display) {
  eprintln!(
    "  {} {}: {}",
    symbols::ERROR.if_supports_color(Stream::Stderr, |s| s.red()),
    asset.display(),
    error
  );
}

/// Heading for one node of an archive chain.
pub fn print_node(address: usize, project: &str, next: u32) {
  let next = match next {
    0 => "end of chain".to_string(),
    next => format!("next {}", format_address(next as usize)),
  };
  println!(
    "{} {} {}",
    format_address(address).if_supports_color(Stream::Stdout, |s| s.cyan()),
    project.if_supports_color(Stream::Stdout, |s| s.bold()),
    format!("({next})").if_supports_color(Stream::Stdout, |s| s.dimmed())
  );
}

/// One row of the `inspect` table: data offset, size, name.
pub fn entry_row(name: &str, offset: u32, compressed: u32, decompressed: u32) -> String {
  format!(
    "    {:>10}  {:<22}  {name}",
    format_address(offset as usize),
    format_entry_size(compressed, decompressed)
  )
}

pub fn print_json<T: serde::Serialize>(value: &T) -> anyhow::Result<()> {
  let json = serde_json::to_string_pretty(value).context("Failed to serialize to JSON")?;
  println!("{json}");
  Ok(())
}
