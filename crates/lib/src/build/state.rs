//! Incremental build state.
//!
//! Records, per asset, the modification time it had when it was last built
//! and the build-directory files that build produced, and per asset kind, the
//! build-logic version that built it. An asset is dirty when its timestamp or
//! its kind's version moved on.
//!
//! # Storage Layout
//!
//! ```text
//! <project>/.starforge/build-state/
//! └── state.json
//! ```
//!
//! # Example State File
//!
//! ```json
//! {
//!   "engine_sha": "3f2a9c1e",
//!   "version": 1,
//!   "asset_timestamps": {
//!     "maps/kmr_00.shape": 1717430400000
//!   },
//!   "kind_versions": {
//!     "shape": 1
//!   },
//!   "artifacts": {
//!     "maps/kmr_00.shape": ["maps/kmr_00.shape"]
//!   }
//! }
//! ```
//!
//! A state written for another engine sha or another format version is
//! discarded on load, as is one that fails to parse.

use std::collections::{BTreeMap, HashSet};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use super::types::BuildArtifact;
use crate::asset::Asset;

/// Format version of the state file.
pub const CURRENT_VERSION: u32 = 1;

#[derive(Debug, Error)]
pub enum StateError {
  #[error("failed to create build state directory {path}: {source}")]
  CreateDir {
    path: PathBuf,
    #[source]
    source: io::Error,
  },

  #[error("failed to write build state: {0}")]
  Write(#[source] io::Error),

  #[error("failed to serialize build state: {0}")]
  Serialize(#[source] serde_json::Error),

  #[error("failed to remove build state: {0}")]
  Remove(#[source] io::Error),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildState {
  pub engine_sha: String,
  pub version: u32,
  /// Relative asset path (`/`-separated) to modification time in ms.
  #[serde(default)]
  pub asset_timestamps: BTreeMap<String, u64>,
  /// Asset kind name to the build-logic version last used.
  #[serde(default)]
  pub kind_versions: BTreeMap<String, u32>,
  /// Relative asset path to the build-directory files (`/`-separated,
  /// relative to the build directory) its last build produced.
  #[serde(default)]
  pub artifacts: BTreeMap<String, Vec<String>>,
}

impl BuildState {
  /// A fresh, empty state.
  pub fn new(engine_sha: &str) -> Self {
    Self {
      engine_sha: engine_sha.to_string(),
      version: CURRENT_VERSION,
      asset_timestamps: BTreeMap::new(),
      kind_versions: BTreeMap::new(),
      artifacts: BTreeMap::new(),
    }
  }

  /// Whether `asset` must be rebuilt.
  pub fn needs_rebuild(&self, asset: &Asset) -> bool {
    if self.kind_versions.get(asset.kind_name()) != Some(&asset.logic_version()) {
      return true;
    }
    match self.asset_timestamps.get(&asset.state_key()) {
      Some(&built) => modification_time(&asset.path()) > built,
      None => true,
    }
  }

  /// Record that `asset` is up to date as of now, having produced `outputs`
  /// under `build_dir`.
  pub fn mark_built(&mut self, asset: &Asset, outputs: &[BuildArtifact], build_dir: &Path) {
    let key = asset.state_key();
    self.asset_timestamps.insert(key.clone(), modification_time(&asset.path()));
    self
      .kind_versions
      .insert(asset.kind_name().to_string(), asset.logic_version());

    let outputs = outputs
      .iter()
      .filter_map(|artifact| match relative_key(build_dir, &artifact.path) {
        Some(rel) => Some(rel),
        None => {
          warn!(asset = %key, path = %artifact.path.display(), "artifact outside the build directory");
          None
        }
      })
      .collect();
    self.artifacts.insert(key, outputs);
  }

  /// Drop the timestamp of `asset` so the next run rebuilds it, whatever the
  /// recorded kind version says.
  pub fn forget(&mut self, asset: &Asset) {
    self.asset_timestamps.remove(&asset.state_key());
  }

  /// Remove every entry whose asset is not in `live`. Returns the removed
  /// asset keys with their recorded outputs.
  pub fn prune(&mut self, live: &HashSet<String>) -> BTreeMap<String, Vec<String>> {
    let mut removed = BTreeMap::new();
    self.asset_timestamps.retain(|key, _| {
      let keep = live.contains(key);
      if !keep {
        removed.insert(key.clone(), Vec::new());
      }
      keep
    });
    self.artifacts.retain(|key, outputs| {
      if live.contains(key) {
        return true;
      }
      removed.insert(key.clone(), std::mem::take(outputs));
      false
    });
    removed
  }

  /// Every recorded output, relative to the build directory.
  pub fn recorded_outputs(&self) -> HashSet<&str> {
    self.artifacts.values().flatten().map(String::as_str).collect()
  }

  /// Load the state at `path`.
  ///
  /// Returns `None` if the file is missing, unreadable, unparseable, or was
  /// written for a different engine sha or format version.
  pub fn load(path: &Path, engine_sha: &str) -> Option<Self> {
    let content = match fs::read_to_string(path) {
      Ok(content) => content,
      Err(e) if e.kind() == io::ErrorKind::NotFound => {
        debug!(path = %path.display(), "no build state file");
        return None;
      }
      Err(e) => {
        warn!(path = %path.display(), error = %e, "failed to read build state, discarding");
        return None;
      }
    };

    let state: BuildState = match serde_json::from_str(&content) {
      Ok(state) => state,
      Err(e) => {
        warn!(path = %path.display(), error = %e, "corrupt build state, discarding");
        return None;
      }
    };

    if state.version != CURRENT_VERSION {
      info!(found = state.version, current = CURRENT_VERSION, "build state version changed");
      return None;
    }
    if state.engine_sha != engine_sha {
      info!(found = %state.engine_sha, current = %engine_sha, "engine changed since last build");
      return None;
    }

    debug!(assets = state.asset_timestamps.len(), "loaded build state");
    Some(state)
  }

  /// Save atomically: write to a temp file, then rename.
  pub fn save(&self, path: &Path) -> Result<(), StateError> {
    if let Some(dir) = path.parent() {
      fs::create_dir_all(dir).map_err(|source| StateError::CreateDir {
        path: dir.to_path_buf(),
        source,
      })?;
    }

    let content = serde_json::to_string_pretty(self).map_err(StateError::Serialize)?;
    let temp_path = path.with_extension("json.tmp");
    fs::write(&temp_path, &content).map_err(StateError::Write)?;
    fs::rename(&temp_path, path).map_err(StateError::Write)?;

    debug!(path = %path.display(), assets = self.asset_timestamps.len(), "saved build state");
    Ok(())
  }

  /// Delete the state file. Succeeds if it does not exist.
  pub fn remove(path: &Path) -> Result<(), StateError> {
    match fs::remove_file(path) {
      Ok(()) => {
        info!(path = %path.display(), "removed build state");
        Ok(())
      }
      Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
      Err(e) => Err(StateError::Remove(e)),
    }
  }
}

/// Modification time of `path` in ms since the epoch. For a directory, the
/// newest regular file beneath it. 0 if nothing can be read.
pub fn modification_time(path: &Path) -> u64 {
  if path.is_dir() {
    return WalkDir::new(path)
      .into_iter()
      .filter_map(Result::ok)
      .filter(|e| e.file_type().is_file())
      .map(|e| file_mtime(e.path()))
      .max()
      .unwrap_or(0);
  }
  file_mtime(path)
}

/// `path` relative to `root`, `/`-separated.
pub fn relative_key(root: &Path, path: &Path) -> Option<String> {
  let rel = path.strip_prefix(root).ok()?;
  Some(
    rel
      .components()
      .map(|c| c.as_os_str().to_string_lossy())
      .collect::<Vec<_>>()
      .join("/"),
  )
}

fn file_mtime(path: &Path) -> u64 {
  fs::metadata(path)
    .and_then(|m| m.modified())
    .ok()
    .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
    .map_or(0, |d| d.as_millis() as u64)
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::asset::{AssetRegistry, AssetsDir};
  use crate::build::types::ArtifactType;
  use std::fs::File;
  use std::time::{Duration, SystemTime};
  use tempfile::TempDir;

  fn set_mtime(path: &Path, time: SystemTime) {
    File::options().write(true).open(path).unwrap().set_modified(time).unwrap();
  }

  fn asset(temp: &TempDir, name: &str) -> Asset {
    let path = temp.path().join(name);
    fs::write(&path, b"data").unwrap();
    set_mtime(&path, UNIX_EPOCH + Duration::from_secs(1_000));
    AssetRegistry::with_builtins()
      .create(&AssetsDir::owned(temp.path()), Path::new(name))
      .unwrap()
  }

  #[test]
  fn new_assets_need_rebuild() {
    let temp = TempDir::new().unwrap();
    let state = BuildState::new("sha");
    assert!(state.needs_rebuild(&asset(&temp, "a.bin")));
  }

  #[test]
  fn built_asset_is_clean_until_modified() {
    let temp = TempDir::new().unwrap();
    let asset = asset(&temp, "a.bin");
    let mut state = BuildState::new("sha");

    state.mark_built(&asset, &[], temp.path());
    assert!(!state.needs_rebuild(&asset));
    assert_eq!(state.asset_timestamps["a.bin"], 1_000_000);

    set_mtime(&asset.path(), UNIX_EPOCH + Duration::from_secs(2_000));
    assert!(state.needs_rebuild(&asset));
  }

  #[test]
  fn kind_version_change_dirties_asset() {
    let temp = TempDir::new().unwrap();
    let asset = asset(&temp, "a.bin");
    let mut state = BuildState::new("sha");
    state.mark_built(&asset, &[], temp.path());

    state.kind_versions.insert("binary".to_string(), 0);
    assert!(state.needs_rebuild(&asset));
  }

  #[test]
  fn forgotten_asset_is_dirty_despite_matching_kind_version() {
    let temp = TempDir::new().unwrap();
    let asset = asset(&temp, "a.bin");
    let mut state = BuildState::new("sha");
    state.mark_built(&asset, &[], temp.path());

    state.forget(&asset);

    assert_eq!(state.kind_versions.get("binary"), Some(&1));
    assert!(state.needs_rebuild(&asset));
  }

  #[test]
  fn mark_built_records_outputs_relative_to_build_dir() {
    let temp = TempDir::new().unwrap();
    let asset = asset(&temp, "a.bin");
    let build = temp.path().join("build");
    let outputs = vec![
      BuildArtifact::new(build.join("maps/a.bin"), ArtifactType::Binary),
      BuildArtifact::new(temp.path().join("elsewhere.bin"), ArtifactType::Binary),
    ];
    let mut state = BuildState::new("sha");

    state.mark_built(&asset, &outputs, &build);

    assert_eq!(state.artifacts["a.bin"], vec!["maps/a.bin".to_string()]);
    assert!(state.recorded_outputs().contains("maps/a.bin"));
  }

  #[test]
  fn prune_drops_removed_assets_and_returns_their_outputs() {
    let mut state = BuildState::new("sha");
    for key in ["kept.bin", "gone.bin"] {
      state.asset_timestamps.insert(key.to_string(), 1);
      state.artifacts.insert(key.to_string(), vec![format!("out/{key}")]);
    }

    let live = HashSet::from(["kept.bin".to_string()]);
    let removed = state.prune(&live);

    assert_eq!(removed.len(), 1);
    assert_eq!(removed["gone.bin"], vec!["out/gone.bin".to_string()]);
    assert!(state.asset_timestamps.contains_key("kept.bin"));
    assert!(!state.asset_timestamps.contains_key("gone.bin"));
    assert!(!state.artifacts.contains_key("gone.bin"));
    assert!(state.prune(&live).is_empty());
  }

  #[test]
  fn directory_mtime_is_newest_file() {
    let temp = TempDir::new().unwrap();
    let dir = temp.path().join("pack.bin");
    fs::create_dir_all(dir.join("nested")).unwrap();
    fs::write(dir.join("one"), b"1").unwrap();
    fs::write(dir.join("nested/two"), b"2").unwrap();
    set_mtime(&dir.join("one"), UNIX_EPOCH + Duration::from_secs(10));
    set_mtime(&dir.join("nested/two"), UNIX_EPOCH + Duration::from_secs(20));

    assert_eq!(modification_time(&dir), 20_000);
    assert_eq!(modification_time(&temp.path().join("missing")), 0);
  }

  #[test]
  fn save_and_load() {
    let temp = TempDir::new().unwrap();
    let path = temp.path().join("build-state/state.json");
    let mut state = BuildState::new("sha-1");
    state.asset_timestamps.insert("maps/a.bin".to_string(), 42);
    state.kind_versions.insert("binary".to_string(), 1);
    state
      .artifacts
      .insert("maps/a.bin".to_string(), vec!["maps/a.bin".to_string()]);

    state.save(&path).unwrap();

    assert_eq!(BuildState::load(&path, "sha-1"), Some(state));
    assert!(!temp.path().join("build-state/state.json.tmp").exists());
  }

  #[test]
  fn load_discards_mismatched_engine_sha() {
    let temp = TempDir::new().unwrap();
    let path = temp.path().join("state.json");
    BuildState::new("old").save(&path).unwrap();

    assert_eq!(BuildState::load(&path, "new"), None);
  }

  #[test]
  fn load_discards_old_format_version() {
    let temp = TempDir::new().unwrap();
    let path = temp.path().join("state.json");
    fs::write(
      &path,
      r#"{"engine_sha":"sha","version":0,"asset_timestamps":{"a.bin":5},"kind_versions":{}}"#,
    )
    .unwrap();

    assert_eq!(BuildState::load(&path, "sha"), None);
  }

  #[test]
  fn load_discards_corrupt_file() {
    let temp = TempDir::new().unwrap();
    let path = temp.path().join("state.json");
    fs::write(&path, "{ not json").unwrap();

    assert_eq!(BuildState::load(&path, "sha"), None);
    assert_eq!(BuildState::load(&temp.path().join("missing.json"), "sha"), None);
  }

  #[test]
  fn remove_tolerates_missing_file() {
    let temp = TempDir::new().unwrap();
    let path = temp.path().join("state.json");
    BuildState::remove(&path).unwrap();

    BuildState::new("sha").save(&path).unwrap();
    BuildState::remove(&path).unwrap();
    assert!(!path.exists());
  }
}
