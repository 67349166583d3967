//! Implementation of the `starforge watch` command.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};

use starforge_lib::asset::{Asset, AssetError, AssetRegistry};
use starforge_lib::config::BuildConfig;
use starforge_lib::manager::{BuildManager, BuildProgressListener};
use starforge_lib::project::Project;

use super::runtime;
use crate::output::{print_asset_built, print_asset_failed, print_error, print_info, print_success};

/// Prints progress lines as builds run.
struct TerminalProgress;

impl BuildProgressListener for TerminalProgress {
  fn on_build_started(&self, total: usize) {
    print_info(&format!("Building {total} asset(s)"));
  }

  fn on_asset_built(&self, asset: &Asset, success_count: usize, total: usize) {
    print_asset_built(success_count, total, asset);
  }

  fn on_asset_failed(&self, asset: &Asset, error: &AssetError) {
    print_asset_failed(asset.relative_path(), error);
  }

  fn on_build_complete(&self, success_count: usize, error_count: usize) {
    if error_count == 0 {
      print_success(&format!("Build complete, {success_count} asset(s) rebuilt"));
    } else {
      print_error(&format!("Build finished with {error_count} error(s)"));
    }
  }
}

/// Build once, then rebuild on every change to the asset tree until Ctrl+C.
pub fn cmd_watch(dir: &Path, debounce: Option<Duration>) -> Result<()> {
  let project = Arc::new(Project::load(dir).with_context(|| format!("Failed to load project at {}", dir.display()))?);
  let mut config = BuildConfig::from_env();
  if let Some(debounce) = debounce {
    config.debounce = debounce;
  }

  let rt = runtime()?;
  rt.block_on(async {
    let mut manager = BuildManager::new(project.clone(), Arc::new(AssetRegistry::with_builtins()), config);
    manager.add_listener(Arc::new(TerminalProgress));
    manager.start().context("Failed to start watching")?;
    print_info(&format!(
      "Watching {} (Ctrl+C to stop)",
      project.assets_dir().display()
    ));

    tokio::signal::ctrl_c().await.context("Failed to listen for Ctrl+C")?;
    println!();
    print_info("Shutting down...");
    manager.stop();
    Ok::<(), anyhow::Error>(())
  })
}
