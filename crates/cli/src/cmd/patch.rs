//! Implementation of the `starforge patch` command.

use std::path::Path;

use anyhow::{Context, Result};
use tracing::debug;

use starforge_lib::archive::{PatchOutcome, patch_rom_file, read_archive_rom_start};
use starforge_lib::consts::DEFAULT_ROM_START;
use starforge_lib::package::patch_rom_from_package;

use crate::output::{format_address, format_bytes, print_stat, print_success};

/// Resolve the chain start: explicit address, then the symbol file, then the default.
pub(super) fn chain_start(start: Option<u32>, syms: Option<&Path>) -> Result<u32> {
  let start = match (start, syms) {
    (Some(start), _) => start,
    (None, Some(syms)) => read_archive_rom_start(syms).context("Failed to resolve the archive ROM start")?,
    (None, None) => DEFAULT_ROM_START,
  };
  debug!(start = %format_address(start as usize), "resolved chain start");
  Ok(start)
}

/// Insert `archive` into `rom` in place.
pub fn cmd_patch(rom: &Path, archive: &Path, start: Option<u32>, syms: Option<&Path>) -> Result<()> {
  let start = chain_start(start, syms)?;
  let outcome = patch_rom_file(rom, archive, start as usize)
    .with_context(|| format!("Failed to patch {}", rom.display()))?;
  print_outcome(rom, &outcome);
  Ok(())
}

/// Insert the archive carried by `package` into `rom` at the package's address.
pub fn cmd_patch_package(rom: &Path, package: &Path) -> Result<()> {
  let outcome = patch_rom_from_package(rom, package)
    .with_context(|| format!("Failed to apply {} to {}", package.display(), rom.display()))?;
  print_outcome(rom, &outcome);
  Ok(())
}

fn print_outcome(rom: &Path, outcome: &PatchOutcome) {
  print_success(&format!("Patched {}", rom.display()));
  print_stat("Action", &outcome.action.to_string());
  print_stat("Address", &format_address(outcome.address));
  print_stat("Size", &format_bytes(outcome.image.len() as u64));
}
