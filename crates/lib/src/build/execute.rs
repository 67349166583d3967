//! Build orchestration.
//!
//! A run discovers every asset in the project's owned tree, keeps the ones the
//! build state marks dirty, then works through two phases, each fully joined
//! before the next starts:
//!
//! 1. header generation, best effort
//! 2. compilation, collecting artifacts and per-asset errors
//!
//! Both phases run at most `parallelism` assets at once. A failing asset never
//! stops its siblings; it is reported and its timestamp is dropped from the
//! state so the next run retries it. The build state is saved after the
//! compile phase, unless the run was cancelled.
//!
//! Assets that disappeared since the last run lose their state entries, and
//! the outputs recorded for them are deleted from the build directory. Only
//! outputs recorded for live assets are packed into the archive.

use std::collections::HashSet;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use walkdir::WalkDir;

use super::state::{BuildState, relative_key};
use super::types::{
  AssetFailure, BuildArtifact, BuildCtx, BuildError, BuildOutcome, BuildSummary, NoProgress, ProgressSink,
};
use crate::archive::ArchiveBuilder;
use crate::asset::{Asset, AssetError, AssetRegistry, discover_assets};
use crate::build::types::ArtifactType;
use crate::config::BuildConfig;
use crate::consts::DEFAULT_ROM_START;
use crate::package::{TargetDescriptor, package};
use crate::project::Project;

/// What to produce after the assets are built.
#[derive(Debug, Clone, Copy, Default)]
pub struct BuildOptions {
  /// Discard the build state so every asset rebuilds.
  pub force: bool,
  /// Pack the artifacts into the archive.
  pub archive: bool,
  /// Wrap the archive into a distribution package. Implies `archive`.
  pub package: bool,
}

/// Everything a full build produced.
#[derive(Debug)]
pub struct BuildReport {
  pub summary: BuildSummary,
  pub archive: Option<PathBuf>,
  pub package: Option<PathBuf>,
}

/// Mutable state shared by compile tasks.
struct Shared {
  state: BuildState,
  success_count: usize,
  artifacts: Vec<BuildArtifact>,
  errors: Vec<AssetFailure>,
}

/// Runs builds for one project.
pub struct Orchestrator {
  project: Arc<Project>,
  registry: Arc<AssetRegistry>,
  config: BuildConfig,
  progress: Arc<dyn ProgressSink>,
  cancel: CancellationToken,
}

impl Orchestrator {
  pub fn new(project: Arc<Project>, registry: Arc<AssetRegistry>, config: BuildConfig) -> Self {
    Self {
      project,
      registry,
      config,
      progress: Arc::new(NoProgress),
      cancel: CancellationToken::new(),
    }
  }

  pub fn with_progress(mut self, progress: Arc<dyn ProgressSink>) -> Self {
    self.progress = progress;
    self
  }

  pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
    self.cancel = cancel;
    self
  }

  /// Token that cancels this orchestrator's runs.
  pub fn cancellation_token(&self) -> CancellationToken {
    self.cancel.clone()
  }

  /// Build every dirty asset.
  ///
  /// Per-asset failures are reported in the summary, not as an error. Errors
  /// are returned for problems that stop the run as a whole, including
  /// cancellation.
  pub async fn run(&self, force: bool) -> Result<BuildSummary, BuildError> {
    let project = &self.project;
    let build_dir = project.build_dir();
    let headers_dir = project.headers_dir();
    let state_file = project.state_file();

    fs::create_dir_all(&build_dir).map_err(|e| BuildError::create_dir(&build_dir, e))?;
    fs::create_dir_all(&headers_dir).map_err(|e| BuildError::create_dir(&headers_dir, e))?;

    let engine_sha = project.engine_sha(&self.config).await;
    info!(project = %project.name(), engine_sha = %engine_sha, force, "starting build");

    if force {
      BuildState::remove(&state_file)?;
    }
    let mut state = match BuildState::load(&state_file, &engine_sha) {
      Some(state) => state,
      None => {
        info!("build state invalidated or missing, rebuilding all assets");
        BuildState::new(&engine_sha)
      }
    };

    let assets = discover_assets(&self.registry, project.asset_stack().owned_dir())?;
    let live: HashSet<String> = assets.iter().map(Asset::state_key).collect();
    let pruned = prune_removed(&mut state, &live, &build_dir);
    let dirty: Vec<Asset> = assets.iter().filter(|a| state.needs_rebuild(a)).cloned().collect();
    info!(discovered = assets.len(), dirty = dirty.len(), "scanned assets");

    let mut summary = BuildSummary {
      discovered: assets.len(),
      scheduled: dirty.len(),
      engine_sha: engine_sha.clone(),
      ..BuildSummary::default()
    };

    if dirty.is_empty() {
      if pruned > 0 {
        state.save(&state_file)?;
      }
      self.progress.on_build_complete(0, 0);
      info!("all assets up to date");
      return Ok(summary);
    }
    if self.cancel.is_cancelled() {
      return Err(BuildError::Cancelled);
    }

    let total = dirty.len();
    self.progress.on_build_started(total);
    let semaphore = Arc::new(Semaphore::new(self.config.parallelism.max(1)));
    let ctx = Arc::new(BuildCtx::new(build_dir, engine_sha));

    self.generate_headers(&dirty, &ctx, &semaphore).await?;

    let shared = Arc::new(Mutex::new(Shared {
      state,
      success_count: 0,
      artifacts: Vec::new(),
      errors: Vec::new(),
    }));
    self.compile(dirty, &ctx, &semaphore, &shared, total).await?;

    {
      let mut shared = shared.lock().unwrap_or_else(PoisonError::into_inner);
      shared.state.save(&state_file)?;
      summary.built_count = shared.success_count;
      summary.artifacts = std::mem::take(&mut shared.artifacts);
      summary.errors = std::mem::take(&mut shared.errors);
      summary.error_count = summary.errors.len();
    }

    self.progress.on_build_complete(summary.built_count, summary.error_count);
    if summary.success() {
      info!(built = summary.built_count, "build completed successfully");
    } else {
      for failure in &summary.errors {
        error!(asset = %failure.path.display(), error = %failure.error, "asset failed to build");
      }
      error!(errors = summary.error_count, "build completed with errors");
    }
    Ok(summary)
  }

  /// Build, then optionally pack the archive and the distribution package.
  ///
  /// Packing is skipped when any asset failed.
  pub async fn execute(&self, options: BuildOptions) -> Result<BuildReport, BuildError> {
    let summary = self.run(options.force).await?;
    let mut report = BuildReport {
      summary,
      archive: None,
      package: None,
    };

    if !report.summary.success() || !(options.archive || options.package) {
      return Ok(report);
    }

    let project = self.project.clone();
    let engine_sha = report.summary.engine_sha.clone();
    let archive = tokio::task::spawn_blocking(move || {
      let state = BuildState::load(&project.state_file(), &engine_sha).unwrap_or_else(|| BuildState::new(&engine_sha));
      let artifacts = collect_artifacts(&project.build_dir(), &state)?;
      generate_archive(&project, &artifacts)
    })
    .await
    .map_err(|e| BuildError::Task(e.to_string()))??;
    report.archive = Some(archive.clone());

    if options.package {
      let project = self.project.clone();
      let target = TargetDescriptor::new(&report.summary.engine_sha, DEFAULT_ROM_START);
      let output = tokio::task::spawn_blocking(move || {
        let output = project.package_path();
        package(&project.manifest_path(), &target, &archive, &output).map(|()| output)
      })
      .await
      .map_err(|e| BuildError::Task(e.to_string()))??;
      report.package = Some(output);
    }

    Ok(report)
  }

  async fn generate_headers(
    &self,
    assets: &[Asset],
    ctx: &Arc<BuildCtx>,
    semaphore: &Arc<Semaphore>,
  ) -> Result<(), BuildError> {
    info!(count = assets.len(), "generating headers");
    let mut join_set = JoinSet::new();

    for asset in assets {
      let asset = asset.clone();
      let ctx = ctx.clone();
      let semaphore = semaphore.clone();

      join_set.spawn(async move {
        let Ok(_permit) = semaphore.acquire_owned().await else {
          return;
        };
        let path = ctx.header_path(&asset);
        let name = asset.to_string();
        let result = tokio::task::spawn_blocking(move || asset.write_header(&path)).await;

        match result {
          Ok(Ok(true)) => debug!(asset = %name, "wrote header"),
          Ok(Ok(false)) => {}
          Ok(Err(e)) => error!(asset = %name, error = %e, "failed to generate header"),
          Err(e) => error!(asset = %name, error = %e, "header task panicked"),
        }
      });
    }

    self.join_phase(join_set, "headers").await
  }

  async fn compile(
    &self,
    assets: Vec<Asset>,
    ctx: &Arc<BuildCtx>,
    semaphore: &Arc<Semaphore>,
    shared: &Arc<Mutex<Shared>>,
    total: usize,
  ) -> Result<(), BuildError> {
    info!(count = assets.len(), parallelism = self.config.parallelism, "compiling assets");
    let mut join_set = JoinSet::new();

    for asset in assets {
      let ctx = ctx.clone();
      let semaphore = semaphore.clone();
      let shared = shared.clone();
      let progress = self.progress.clone();

      join_set.spawn(async move {
        let Ok(_permit) = semaphore.acquire_owned().await else {
          return;
        };

        let task_asset = asset.clone();
        let build_dir = ctx.build_dir.clone();
        let outcome = match tokio::task::spawn_blocking(move || task_asset.build(&ctx)).await {
          Ok(outcome) => outcome,
          Err(e) => BuildOutcome::Failed(AssetError::Invalid(format!("build panicked: {e}"))),
        };

        let mut shared = shared.lock().unwrap_or_else(PoisonError::into_inner);
        match outcome {
          BuildOutcome::NoOp => {
            debug!(asset = %asset, "nothing to build");
            shared.state.mark_built(&asset, &[], &build_dir);
          }
          BuildOutcome::Success(artifacts) => {
            debug!(asset = %asset, artifacts = artifacts.len(), "built asset");
            shared.state.mark_built(&asset, &artifacts, &build_dir);
            shared.artifacts.extend(artifacts);
            shared.success_count += 1;
            progress.on_asset_built(&asset, shared.success_count, total);
          }
          BuildOutcome::Failed(error) => {
            warn!(asset = %asset, error = %error, "asset build failed");
            shared.state.forget(&asset);
            progress.on_asset_failed(&asset, &error);
            shared.errors.push(AssetFailure {
              path: asset.relative_path().to_path_buf(),
              error,
            });
          }
        }
      });
    }

    self.join_phase(join_set, "compile").await
  }

  /// Wait for every task in the phase, or abandon them all on cancellation.
  async fn join_phase(&self, mut join_set: JoinSet<()>, phase: &str) -> Result<(), BuildError> {
    loop {
      tokio::select! {
        biased;
        _ = self.cancel.cancelled() => {
          join_set.abort_all();
          info!(phase, "build cancelled");
          return Err(BuildError::Cancelled);
        }
        next = join_set.join_next() => match next {
          None => return Ok(()),
          Some(Ok(())) => {}
          Some(Err(e)) if e.is_cancelled() => {}
          Some(Err(e)) => error!(phase, error = %e, "asset task panicked"),
        },
      }
    }
  }
}

/// Drop state entries of assets that no longer exist and delete the outputs
/// recorded for them. Returns the number of entries removed.
fn prune_removed(state: &mut BuildState, live: &HashSet<String>, build_dir: &Path) -> usize {
  let removed = state.prune(live);
  if removed.is_empty() {
    return 0;
  }

  let still_recorded = state.recorded_outputs();
  for (asset, outputs) in &removed {
    info!(asset = %asset, "asset removed since last build");
    for output in outputs.iter().filter(|o| !still_recorded.contains(o.as_str())) {
      let path = build_dir.join(output);
      match fs::remove_file(&path) {
        Ok(()) => debug!(path = %path.display(), "deleted stale artifact"),
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => warn!(path = %path.display(), error = %e, "failed to delete stale artifact"),
      }
    }
  }
  removed.len()
}

/// Archive-bound artifacts in the build directory, sorted by path.
///
/// Only files `state` records as the output of a live asset are collected, so
/// generated headers, the archive itself and leftovers of removed assets are
/// skipped.
pub fn collect_artifacts(build_dir: &Path, state: &BuildState) -> Result<Vec<BuildArtifact>, BuildError> {
  if !build_dir.is_dir() {
    return Ok(Vec::new());
  }
  let recorded = state.recorded_outputs();

  let mut artifacts = Vec::new();
  for entry in WalkDir::new(build_dir).sort_by_file_name() {
    let entry = entry.map_err(|source| BuildError::Walk {
      path: build_dir.to_path_buf(),
      source,
    })?;
    let path = entry.path();
    if !entry.file_type().is_file() {
      continue;
    }
    let Some(key) = relative_key(build_dir, path) else {
      continue;
    };
    if !recorded.contains(key.as_str()) {
      continue;
    }

    let extension = path.extension().and_then(|e| e.to_str()).unwrap_or_default();
    if let Some(artifact_type) = ArtifactType::from_extension(extension) {
      artifacts.push(BuildArtifact::new(path.to_path_buf(), artifact_type));
    }
  }

  debug!(count = artifacts.len(), "collected artifacts");
  Ok(artifacts)
}

/// Pack `artifacts` into the project's archive file and return its path.
pub fn generate_archive(project: &Project, artifacts: &[BuildArtifact]) -> Result<PathBuf, BuildError> {
  info!(count = artifacts.len(), "generating archive");
  let mut builder = ArchiveBuilder::new(project.name());
  let mut seen = HashSet::new();

  for artifact in artifacts {
    let name = artifact
      .path
      .file_name()
      .map(|n| n.to_string_lossy().into_owned())
      .unwrap_or_default();
    if !seen.insert(name.clone()) {
      warn!(name = %name, path = %artifact.path.display(), "duplicate archive entry name");
    }

    let data = fs::read(&artifact.path).map_err(|source| BuildError::Read {
      path: artifact.path.clone(),
      source,
    })?;
    builder.add_entry(&name, data, artifact.artifact_type.should_compress())?;
  }

  let bytes = builder.build()?;
  let output = project.archive_path();
  if let Some(parent) = output.parent() {
    fs::create_dir_all(parent).map_err(|e| BuildError::create_dir(parent, e))?;
  }
  fs::write(&output, &bytes).map_err(|source| BuildError::Write {
    path: output.clone(),
    source,
  })?;

  info!(path = %output.display(), size = bytes.len(), "generated archive");
  Ok(output)
}
