//! Build lifecycle: initial build, watch-triggered rebuilds and progress fan-out.

use std::collections::BTreeSet;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::asset::{Asset, AssetError, AssetRegistry};
use crate::build::{BuildError, BuildOptions, Orchestrator, ProgressSink};
use crate::config::BuildConfig;
use crate::project::Project;
use crate::watch::{ChangeCallback, FileWatcher, WatchError};

/// Observer of build progress.
pub trait BuildProgressListener: Send + Sync {
  fn on_build_started(&self, total: usize);

  fn on_asset_built(&self, asset: &Asset, success_count: usize, total: usize);

  fn on_asset_failed(&self, asset: &Asset, error: &AssetError);

  /// Called when a run finishes, with or without errors. A run that aborts
  /// as a whole reports `(0, 1)`.
  fn on_build_complete(&self, success_count: usize, error_count: usize);
}

/// Handle returned by [`BuildManager::add_listener`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

/// Snapshot of the current (or last) build.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BuildProgress {
  pub total: usize,
  pub built: usize,
  pub failed: usize,
  pub complete: bool,
}

impl BuildProgress {
  pub fn idle() -> Self {
    Self {
      total: 0,
      built: 0,
      failed: 0,
      complete: true,
    }
  }

  /// Built share of the total in whole percent; 0 when there is nothing to build.
  pub fn percentage(&self) -> u32 {
    if self.total == 0 {
      return 0;
    }
    (self.built * 100 / self.total) as u32
  }
}

impl Default for BuildProgress {
  fn default() -> Self {
    Self::idle()
  }
}

struct Inner {
  project: Arc<Project>,
  registry: Arc<AssetRegistry>,
  config: BuildConfig,
  building: AtomicBool,
  /// Rebuild requested while building, with its `force` flag.
  pending: Mutex<Option<bool>>,
  progress: Mutex<BuildProgress>,
  listeners: Mutex<Vec<(ListenerId, Arc<dyn BuildProgressListener>)>>,
  next_listener: AtomicU64,
  current: Mutex<Option<CancellationToken>>,
  shutdown: CancellationToken,
}

impl Inner {
  fn listeners(&self) -> Vec<Arc<dyn BuildProgressListener>> {
    match self.listeners.lock() {
      Ok(listeners) => listeners.iter().map(|(_, l)| Arc::clone(l)).collect(),
      Err(_) => Vec::new(),
    }
  }

  fn update(&self, f: impl FnOnce(&mut BuildProgress)) {
    if let Ok(mut progress) = self.progress.lock() {
      f(&mut progress);
    }
  }

  /// Spawn a build unless one is running, in which case the request is queued
  /// and runs once the current build finishes. Requests queued during one
  /// build collapse into a single rebuild. Returns the build task if started.
  fn rebuild(self: &Arc<Self>, force: bool) -> Option<JoinHandle<()>> {
    if self.shutdown.is_cancelled() {
      warn!("build manager stopped, ignoring rebuild request");
      return None;
    }
    if self
      .building
      .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
      .is_err()
    {
      if let Ok(mut pending) = self.pending.lock() {
        let force = pending.unwrap_or(false) || force;
        *pending = Some(force);
      }
      info!("build already in progress, queueing rebuild");
      return None;
    }

    let cancel = self.shutdown.child_token();
    if let Ok(mut current) = self.current.lock() {
      *current = Some(cancel.clone());
    }

    let inner = Arc::clone(self);
    Some(tokio::spawn(async move {
      inner.run(force, cancel).await;
      if let Ok(mut current) = inner.current.lock() {
        *current = None;
      }
      inner.building.store(false, Ordering::Release);

      let queued = inner.pending.lock().ok().and_then(|mut pending| pending.take());
      if let Some(force) = queued {
        info!(force, "starting queued rebuild");
        inner.rebuild(force);
      }
    }))
  }

  async fn run(self: &Arc<Self>, force: bool, cancel: CancellationToken) {
    let sink: Arc<dyn ProgressSink> = Arc::clone(self) as Arc<dyn ProgressSink>;
    let orchestrator = Orchestrator::new(Arc::clone(&self.project), Arc::clone(&self.registry), self.config.clone())
      .with_progress(sink)
      .with_cancellation(cancel);

    let options = BuildOptions {
      force,
      archive: true,
      package: false,
    };
    match orchestrator.execute(options).await {
      Ok(report) => {
        if let Some(archive) = &report.archive {
          info!(archive = %archive.display(), "archive updated");
        }
      }
      Err(BuildError::Cancelled) => info!("build cancelled"),
      Err(e) => {
        error!(error = %e, "build failed");
        self.on_build_complete(0, 1);
      }
    }
  }
}

impl ProgressSink for Inner {
  fn on_build_started(&self, total: usize) {
    self.update(|p| {
      *p = BuildProgress {
        total,
        built: 0,
        failed: 0,
        complete: false,
      }
    });
    for listener in self.listeners() {
      listener.on_build_started(total);
    }
  }

  fn on_asset_built(&self, asset: &Asset, success_count: usize, total: usize) {
    self.update(|p| {
      p.built = success_count;
      p.total = total;
    });
    for listener in self.listeners() {
      listener.on_asset_built(asset, success_count, total);
    }
  }

  fn on_asset_failed(&self, asset: &Asset, error: &AssetError) {
    self.update(|p| p.failed += 1);
    for listener in self.listeners() {
      listener.on_asset_failed(asset, error);
    }
  }

  fn on_build_complete(&self, success_count: usize, error_count: usize) {
    self.update(|p| {
      p.built = success_count;
      p.failed = error_count;
      p.complete = true;
    });
    for listener in self.listeners() {
      listener.on_build_complete(success_count, error_count);
    }
  }
}

/// Owns the watcher and the build loop of one project.
pub struct BuildManager {
  inner: Arc<Inner>,
  watcher: Option<FileWatcher>,
}

impl BuildManager {
  pub fn new(project: Arc<Project>, registry: Arc<AssetRegistry>, config: BuildConfig) -> Self {
    Self {
      inner: Arc::new(Inner {
        project,
        registry,
        config,
        building: AtomicBool::new(false),
        pending: Mutex::new(None),
        progress: Mutex::new(BuildProgress::idle()),
        listeners: Mutex::new(Vec::new()),
        next_listener: AtomicU64::new(0),
        current: Mutex::new(None),
        shutdown: CancellationToken::new(),
      }),
      watcher: None,
    }
  }

  /// Kick off an initial build and start watching the owned asset tree.
  /// Every debounced batch of changes triggers a non-forced rebuild.
  pub fn start(&mut self) -> Result<(), WatchError> {
    info!(project = %self.inner.project.name(), "starting build manager");
    self.inner.rebuild(false);

    let inner = Arc::clone(&self.inner);
    let on_change: ChangeCallback = Arc::new(move |changed: BTreeSet<PathBuf>| {
      info!(count = changed.len(), "file changes detected, triggering rebuild");
      inner.rebuild(false);
    });
    let mut watcher = FileWatcher::new(self.inner.project.assets_dir(), self.inner.config.debounce, on_change);
    watcher.start()?;
    self.watcher = Some(watcher);
    Ok(())
  }

  /// Stop watching and cancel the running build. A stopped manager ignores
  /// further rebuild requests.
  pub fn stop(&mut self) {
    if self.inner.shutdown.is_cancelled() {
      return;
    }
    info!("stopping build manager");
    if let Some(mut watcher) = self.watcher.take() {
      watcher.stop();
    }
    if let Ok(mut current) = self.inner.current.lock()
      && let Some(cancel) = current.take()
    {
      cancel.cancel();
    }
    self.inner.shutdown.cancel();
  }

  /// Start a build, or queue one if a build is already running. Returns the
  /// task of the build that was started.
  pub fn rebuild(&self, force: bool) -> Option<JoinHandle<()>> {
    self.inner.rebuild(force)
  }

  pub fn is_building(&self) -> bool {
    self.inner.building.load(Ordering::Acquire)
  }

  pub fn progress(&self) -> BuildProgress {
    self.inner.progress.lock().map(|p| *p).unwrap_or_default()
  }

  pub fn add_listener(&self, listener: Arc<dyn BuildProgressListener>) -> ListenerId {
    let id = ListenerId(self.inner.next_listener.fetch_add(1, Ordering::Relaxed));
    if let Ok(mut listeners) = self.inner.listeners.lock() {
      listeners.push((id, listener));
    }
    id
  }

  /// Returns whether the listener was registered.
  pub fn remove_listener(&self, id: ListenerId) -> bool {
    let Ok(mut listeners) = self.inner.listeners.lock() else {
      return false;
    };
    let before = listeners.len();
    listeners.retain(|(other, _)| *other != id);
    listeners.len() != before
  }
}

impl Drop for BuildManager {
  fn drop(&mut self) {
    self.stop();
  }
}
