//! Debounced file watching for the owned asset tree.
//!
//! The root is watched recursively, so directories created later are covered
//! without registering them. Filesystem events are forwarded from the
//! `notify` thread into a tokio task. The task holds a fixed window open after
//! the first event of a burst, drains everything that arrived in the meantime,
//! and reports the whole burst as one set of changed paths.

use std::collections::BTreeSet;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Capacity of the event channel between the notify thread and the debounce task.
const EVENT_BUFFER: usize = 256;

/// Called once per burst with every path that changed during it.
///
/// Runs on the watcher task, so it must hand off any long work.
pub type ChangeCallback = Arc<dyn Fn(BTreeSet<PathBuf>) + Send + Sync>;

#[derive(Debug, Error)]
pub enum WatchError {
  #[error("failed to create watched directory {path}: {source}")]
  CreateDir {
    path: PathBuf,
    #[source]
    source: io::Error,
  },

  #[error("failed to watch {path}: {source}")]
  Notify {
    path: PathBuf,
    #[source]
    source: notify::Error,
  },
}

struct Running {
  watcher: RecommendedWatcher,
  cancel: CancellationToken,
  task: JoinHandle<()>,
}

/// Watches a directory tree and reports debounced batches of changes.
pub struct FileWatcher {
  root: PathBuf,
  debounce: Duration,
  on_change: ChangeCallback,
  running: Option<Running>,
}

impl FileWatcher {
  pub fn new(root: impl Into<PathBuf>, debounce: Duration, on_change: ChangeCallback) -> Self {
    Self {
      root: root.into(),
      debounce,
      on_change,
      running: None,
    }
  }

  pub fn root(&self) -> &Path {
    &self.root
  }

  pub fn is_running(&self) -> bool {
    self.running.is_some()
  }

  /// Start watching. Must be called from within a tokio runtime.
  ///
  /// The root is created if missing. Starting a running watcher does nothing.
  pub fn start(&mut self) -> Result<(), WatchError> {
    if self.running.is_some() {
      debug!(root = %self.root.display(), "watcher already running");
      return Ok(());
    }

    fs::create_dir_all(&self.root).map_err(|source| WatchError::CreateDir {
      path: self.root.clone(),
      source,
    })?;

    let (tx, rx) = mpsc::channel(EVENT_BUFFER);
    let mut watcher = RecommendedWatcher::new(
      move |res: notify::Result<Event>| match res {
        Ok(event) => {
          let _ = tx.blocking_send(event);
        }
        Err(e) => warn!(error = %e, "file watcher error"),
      },
      notify::Config::default(),
    )
    .map_err(|source| WatchError::Notify {
      path: self.root.clone(),
      source,
    })?;

    watcher
      .watch(&self.root, RecursiveMode::Recursive)
      .map_err(|source| WatchError::Notify {
        path: self.root.clone(),
        source,
      })?;

    let cancel = CancellationToken::new();
    let task = tokio::spawn(debounce_events(
      rx,
      self.debounce,
      cancel.clone(),
      Arc::clone(&self.on_change),
    ));

    info!(root = %self.root.display(), debounce_ms = self.debounce.as_millis() as u64, "file watcher started");
    self.running = Some(Running { watcher, cancel, task });
    Ok(())
  }

  /// Stop watching. Pending events are discarded.
  pub fn stop(&mut self) {
    let Some(mut running) = self.running.take() else {
      return;
    };
    info!(root = %self.root.display(), "stopping file watcher");
    running.cancel.cancel();
    if let Err(e) = running.watcher.unwatch(&self.root) {
      debug!(root = %self.root.display(), error = %e, "failed to unwatch root");
    }
    running.task.abort();
  }
}

impl Drop for FileWatcher {
  fn drop(&mut self) {
    self.stop();
  }
}

/// Event loop of the debounce task.
async fn debounce_events(
  mut rx: mpsc::Receiver<Event>,
  window: Duration,
  cancel: CancellationToken,
  on_change: ChangeCallback,
) {
  loop {
    let first = tokio::select! {
      biased;
      _ = cancel.cancelled() => break,
      event = rx.recv() => match event {
        Some(event) => event,
        None => break,
      },
    };

    let mut batch = BTreeSet::new();
    absorb(first, &mut batch);

    tokio::select! {
      biased;
      _ = cancel.cancelled() => break,
      _ = tokio::time::sleep(window) => {}
    }
    while let Ok(event) = rx.try_recv() {
      absorb(event, &mut batch);
    }

    if batch.is_empty() {
      continue;
    }
    info!(count = batch.len(), "detected file changes");
    on_change(batch);
  }
  debug!("file watcher task exiting");
}

fn absorb(event: Event, batch: &mut BTreeSet<PathBuf>) {
  if matches!(event.kind, EventKind::Create(_) | EventKind::Modify(_) | EventKind::Remove(_)) {
    batch.extend(event.paths);
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use notify::event::{AccessKind, CreateKind, ModifyKind};
  use std::sync::Mutex;

  fn recorder() -> (ChangeCallback, Arc<Mutex<Vec<BTreeSet<PathBuf>>>>) {
    let batches = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&batches);
    let callback: ChangeCallback = Arc::new(move |changed| sink.lock().unwrap().push(changed));
    (callback, batches)
  }

  fn event(kind: EventKind, path: &str) -> Event {
    Event::new(kind).add_path(PathBuf::from(path))
  }

  #[tokio::test]
  async fn burst_is_delivered_once() {
    let (tx, rx) = mpsc::channel(16);
    let (callback, batches) = recorder();
    let cancel = CancellationToken::new();
    let task = tokio::spawn(debounce_events(
      rx,
      Duration::from_millis(200),
      cancel.clone(),
      callback,
    ));

    for i in 0..5 {
      tx.send(event(EventKind::Modify(ModifyKind::Any), &format!("/a/{i}.bin")))
        .await
        .unwrap();
      tokio::time::sleep(Duration::from_millis(20)).await;
    }
    tokio::time::sleep(Duration::from_millis(400)).await;

    {
      let batches = batches.lock().unwrap();
      assert_eq!(batches.len(), 1);
      assert_eq!(batches[0].len(), 5);
      assert!(batches[0].contains(Path::new("/a/4.bin")));
    }

    cancel.cancel();
    task.await.unwrap();
  }

  #[tokio::test]
  async fn separate_bursts_are_separate_batches() {
    let (tx, rx) = mpsc::channel(16);
    let (callback, batches) = recorder();
    let cancel = CancellationToken::new();
    let task = tokio::spawn(debounce_events(
      rx,
      Duration::from_millis(50),
      cancel.clone(),
      callback,
    ));

    tx.send(event(EventKind::Create(CreateKind::File), "/a/x.bin"))
      .await
      .unwrap();
    tokio::time::sleep(Duration::from_millis(200)).await;
    tx.send(event(EventKind::Remove(notify::event::RemoveKind::File), "/a/x.bin"))
      .await
      .unwrap();
    tokio::time::sleep(Duration::from_millis(200)).await;

    assert_eq!(batches.lock().unwrap().len(), 2);
    drop(tx);
    task.await.unwrap();
    assert!(!cancel.is_cancelled());
  }

  #[tokio::test]
  async fn access_events_are_ignored() {
    let (tx, rx) = mpsc::channel(16);
    let (callback, batches) = recorder();
    let task = tokio::spawn(debounce_events(
      rx,
      Duration::from_millis(20),
      CancellationToken::new(),
      callback,
    ));

    tx.send(event(EventKind::Access(AccessKind::Any), "/a/x.bin"))
      .await
      .unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;
    drop(tx);
    task.await.unwrap();

    assert!(batches.lock().unwrap().is_empty());
  }

  #[tokio::test(flavor = "multi_thread")]
  async fn files_in_new_subdirectories_are_reported() {
    let temp = tempfile::tempdir().unwrap();
    let root = dunce::canonicalize(temp.path()).unwrap();
    let (callback, batches) = recorder();
    let mut watcher = FileWatcher::new(&root, Duration::from_millis(200), callback);
    watcher.start().unwrap();

    let area = root.join("area/kmr");
    fs::create_dir_all(&area).unwrap();
    tokio::time::sleep(Duration::from_millis(500)).await;
    let asset = area.join("kmr_00.shape");
    fs::write(&asset, b"shape").unwrap();
    tokio::time::sleep(Duration::from_millis(800)).await;
    watcher.stop();

    let batches = batches.lock().unwrap();
    assert!(
      batches.iter().any(|batch| batch.contains(&asset)),
      "batches: {batches:?}"
    );
  }

  #[tokio::test(flavor = "multi_thread")]
  async fn watches_real_filesystem_changes() {
    let temp = tempfile::tempdir().unwrap();
    let root = dunce::canonicalize(temp.path()).unwrap();
    let (callback, batches) = recorder();
    let mut watcher = FileWatcher::new(&root, Duration::from_millis(500), callback);
    watcher.start().unwrap();
    assert!(watcher.is_running());

    let paths: Vec<PathBuf> = (0..5).map(|i| root.join(format!("asset_{i}.bin"))).collect();
    for path in &paths {
      fs::write(path, b"data").unwrap();
      tokio::time::sleep(Duration::from_millis(20)).await;
    }
    tokio::time::sleep(Duration::from_millis(1500)).await;
    watcher.stop();
    assert!(!watcher.is_running());

    let batches = batches.lock().unwrap();
    assert_eq!(batches.len(), 1);
    for path in &paths {
      assert!(batches[0].contains(path), "missing {}", path.display());
    }
  }
}
