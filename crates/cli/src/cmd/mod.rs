mod build;
mod inspect;
mod package;
mod patch;
mod watch;

pub use build::cmd_build;
pub use inspect::cmd_inspect;
pub use package::cmd_package;
pub use patch::{cmd_patch, cmd_patch_package};
pub use watch::cmd_watch;

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};

use starforge_lib::asset::AssetRegistry;
use starforge_lib::build::Orchestrator;
use starforge_lib::config::BuildConfig;
use starforge_lib::project::Project;

/// Load the project at `dir` and an orchestrator for it using the built-in
/// asset kinds and environment config.
fn orchestrator(dir: &Path) -> Result<(Arc<Project>, Orchestrator)> {
  let project = Arc::new(Project::load(dir).with_context(|| format!("Failed to load project at {}", dir.display()))?);
  let registry = Arc::new(AssetRegistry::with_builtins());
  let orchestrator = Orchestrator::new(project.clone(), registry, BuildConfig::from_env());
  Ok((project, orchestrator))
}

fn runtime() -> Result<tokio::runtime::Runtime> {
  tokio::runtime::Runtime::new().context("Failed to create async runtime")
}
