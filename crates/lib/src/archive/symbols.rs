//! Linker symbol file reader.
//!
//! The engine build emits a linker script fragment with one assignment per
//! line:
//!
//! ```text
//! mapfs_ROM_START = 0x01E40000; /* assets archive */
//! ```

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::debug;

use crate::consts::ARCHIVE_ROM_START_SYMBOL;

#[derive(Debug, Error)]
pub enum SymbolError {
  #[error("failed to read symbol file {path}: {source}")]
  Read {
    path: PathBuf,
    #[source]
    source: io::Error,
  },

  #[error("symbol {symbol} not found in {path}")]
  NotFound { symbol: String, path: PathBuf },
}

/// Look up `symbol` in a linker symbol file.
///
/// Returns `Ok(None)` if the file does not exist or has no such symbol.
pub fn read_symbol_address(path: &Path, symbol: &str) -> Result<Option<u32>, SymbolError> {
  let content = match fs::read_to_string(path) {
    Ok(content) => content,
    Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
    Err(source) => {
      return Err(SymbolError::Read {
        path: path.to_path_buf(),
        source,
      });
    }
  };

  let address = content.lines().find_map(|line| parse_assignment(line, symbol));
  debug!(symbol, path = %path.display(), found = address.is_some(), "looked up linker symbol");
  Ok(address)
}

/// Chain start of the assets archive, from `mapfs_ROM_START`.
pub fn read_archive_rom_start(path: &Path) -> Result<u32, SymbolError> {
  read_symbol_address(path, ARCHIVE_ROM_START_SYMBOL)?.ok_or_else(|| SymbolError::NotFound {
    symbol: ARCHIVE_ROM_START_SYMBOL.to_string(),
    path: path.to_path_buf(),
  })
}

/// Parse `<symbol> = 0x<hex>;` and return the value.
fn parse_assignment(line: &str, symbol: &str) -> Option<u32> {
  let rest = line.trim_start().strip_prefix(symbol)?;
  let rest = rest.trim_start().strip_prefix('=')?;
  let rest = rest.trim_start();
  let hex = rest.strip_prefix("0x").or_else(|| rest.strip_prefix("0X"))?;

  let digits_end = hex.find(|c: char| !c.is_ascii_hexdigit()).unwrap_or(hex.len());
  let (digits, tail) = hex.split_at(digits_end);
  if digits.is_empty() || !tail.trim_start().starts_with(';') {
    return None;
  }
  u32::from_str_radix(digits, 16).ok()
}

/// Parse an address given on the command line, hex with `0x` or decimal.
pub fn parse_address(value: &str) -> Option<u32> {
  let value = value.trim();
  match value.strip_prefix("0x").or_else(|| value.strip_prefix("0X")) {
    Some(hex) => u32::from_str_radix(hex, 16).ok(),
    None => value.parse().ok(),
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn parses_assignment_lines() {
    assert_eq!(parse_assignment("mapfs_ROM_START = 0x1E40000;", "mapfs_ROM_START"), Some(0x1E40000));
    assert_eq!(
      parse_assignment("  mapfs_ROM_START=0x00ABCDEF ; /* note */", "mapfs_ROM_START"),
      Some(0xABCDEF)
    );
    assert_eq!(parse_assignment("mapfs_ROM_START = 0x10", "mapfs_ROM_START"), None);
    assert_eq!(parse_assignment("mapfs_ROM_START = 16;", "mapfs_ROM_START"), None);
  }

  #[test]
  fn prefix_of_another_symbol_does_not_match() {
    assert_eq!(parse_assignment("mapfs_ROM_START_END = 0x10;", "mapfs_ROM_START"), None);
  }

  #[test]
  fn reads_archive_rom_start_from_file() {
    let dir = tempfile::tempdir().unwrap();
    let syms = dir.path().join("syms.ld");
    fs::write(
      &syms,
      "engine_ROM_START = 0x1000;\nmapfs_ROM_START = 0x01E40000; /* assets */\n",
    )
    .unwrap();

    assert_eq!(read_archive_rom_start(&syms).unwrap(), 0x1E40000);
    assert_eq!(read_symbol_address(&syms, "engine_ROM_START").unwrap(), Some(0x1000));
    assert_eq!(read_symbol_address(&syms, "missing").unwrap(), None);
  }

  #[test]
  fn missing_file_is_none_but_required_symbol_errors() {
    let dir = tempfile::tempdir().unwrap();
    let syms = dir.path().join("nope.ld");

    assert_eq!(read_symbol_address(&syms, "x").unwrap(), None);
    assert!(matches!(
      read_archive_rom_start(&syms),
      Err(SymbolError::NotFound { .. })
    ));
  }

  #[test]
  fn parses_cli_addresses() {
    assert_eq!(parse_address("0x1E40000"), Some(0x1E40000));
    assert_eq!(parse_address("256"), Some(256));
    assert_eq!(parse_address("0xZZ"), None);
  }
}
