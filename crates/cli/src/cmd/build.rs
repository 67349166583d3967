//! Implementation of the `starforge build` command.

use std::path::Path;
use std::time::Instant;

use anyhow::{Context, Result, bail};

use starforge_lib::build::{BuildOptions, BuildReport};

use super::{orchestrator, runtime};
use crate::output::{
  format_elapsed, print_asset_failed, print_error, print_info, print_stat, print_success, print_warning, short_sha,
};

/// Build the project's dirty assets, optionally packing the archive and the
/// distribution package. Fails if any asset failed.
pub fn cmd_build(dir: &Path, force: bool, archive: bool, package: bool) -> Result<()> {
  let (project, orchestrator) = orchestrator(dir)?;
  let options = BuildOptions { force, archive, package };

  let started = Instant::now();
  let report = runtime()?.block_on(orchestrator.execute(options)).context("Build failed")?;
  print_report(project.name(), &report, started.elapsed());

  if !report.summary.success() {
    if archive || package {
      print_warning("Archive not written while assets fail to build");
    }
    bail!("{} asset(s) failed to build", report.summary.error_count);
  }
  Ok(())
}

pub(super) fn print_report(name: &str, report: &BuildReport, elapsed: std::time::Duration) {
  let summary = &report.summary;
  println!();
  if summary.scheduled == 0 {
    print_info(&format!("{name}: all assets up to date"));
  } else if summary.success() {
    print_success(&format!("Built {name} in {}", format_elapsed(elapsed)));
  } else {
    print_error(&format!("Build of {name} finished with errors"));
    for failure in &summary.errors {
      print_asset_failed(&failure.path, &failure.error);
    }
  }
  print_stat("Engine", short_sha(&summary.engine_sha));
  print_stat("Assets", &summary.discovered.to_string());
  print_stat("Rebuilt", &format!("{}/{}", summary.built_count, summary.scheduled));
  if let Some(archive) = &report.archive {
    print_stat("Archive", &archive.display().to_string());
  }
  if let Some(package) = &report.package {
    print_stat("Package", &package.display().to_string());
  }
}
