//! Implementation of the `starforge package` command.

use std::path::Path;
use std::time::Instant;

use anyhow::{Context, Result, bail};

use starforge_lib::build::BuildOptions;
use starforge_lib::consts::DEFAULT_ROM_START;
use starforge_lib::package::{TargetDescriptor, package};

use super::build::print_report;
use super::{orchestrator, runtime};
use crate::output::print_success;

/// Build the project and write its distribution package, to `output` when
/// given.
pub fn cmd_package(dir: &Path, output: Option<&Path>) -> Result<()> {
  let (project, orchestrator) = orchestrator(dir)?;
  let options = BuildOptions {
    force: false,
    archive: true,
    package: output.is_none(),
  };

  let started = Instant::now();
  let report = runtime()?.block_on(orchestrator.execute(options)).context("Build failed")?;
  print_report(project.name(), &report, started.elapsed());

  if !report.summary.success() {
    bail!("not packaging: {} asset(s) failed to build", report.summary.error_count);
  }

  let written = match output {
    Some(output) => {
      let archive = report.archive.as_deref().context("Build produced no archive")?;
      let target = TargetDescriptor::new(&report.summary.engine_sha, DEFAULT_ROM_START);
      package(&project.manifest_path(), &target, archive, output)
        .with_context(|| format!("Failed to write package {}", output.display()))?;
      output.to_path_buf()
    }
    None => report.package.context("Build produced no package")?,
  };

  print_success(&format!("Package written to {}", written.display()));
  Ok(())
}
