//! Types shared by the build orchestrator and asset kinds.

use std::fmt;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use thiserror::Error;

use super::state::{CURRENT_VERSION, StateError};
use crate::archive::ArchiveError;
use crate::asset::{Asset, AssetError};

/// What a build artifact contains. Decides whether it is compressed when
/// packed into the archive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ArtifactType {
  Header,
  Object,
  Binary,
  Shape,
  Collision,
  Other,
}

impl ArtifactType {
  pub fn should_compress(self) -> bool {
    matches!(self, ArtifactType::Binary | ArtifactType::Shape | ArtifactType::Collision)
  }

  /// Archive artifact type for a file extension, if it belongs in the archive.
  pub fn from_extension(extension: &str) -> Option<Self> {
    match extension {
      "bin" => Some(ArtifactType::Binary),
      "shape" => Some(ArtifactType::Shape),
      "collision" => Some(ArtifactType::Collision),
      _ => None,
    }
  }
}

/// A file produced by building an asset.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildArtifact {
  pub path: PathBuf,
  pub artifact_type: ArtifactType,
}

impl BuildArtifact {
  pub fn new(path: PathBuf, artifact_type: ArtifactType) -> Self {
    Self { path, artifact_type }
  }
}

/// Result of building one asset.
#[derive(Debug)]
pub enum BuildOutcome {
  /// Nothing to do; the asset still counts as visited.
  NoOp,
  Success(Vec<BuildArtifact>),
  Failed(AssetError),
}

/// Immutable context handed to asset builds.
#[derive(Debug, Clone)]
pub struct BuildCtx {
  pub build_dir: PathBuf,
  pub headers_dir: PathBuf,
  pub engine_sha: String,
  pub state_version: u32,
}

impl BuildCtx {
  pub fn new(build_dir: PathBuf, engine_sha: String) -> Self {
    Self {
      headers_dir: build_dir.join(crate::consts::HEADERS_DIR),
      build_dir,
      engine_sha,
      state_version: CURRENT_VERSION,
    }
  }

  /// Path of the usual artifact for `asset`: mirrors the asset's directory
  /// under the build dir, named after the asset plus `suffix`. The parent
  /// directory is created.
  pub fn artifact(&self, asset: &Asset, suffix: &str) -> Result<PathBuf, AssetError> {
    let dir = match asset.relative_path().parent() {
      Some(parent) => self.build_dir.join(parent),
      None => self.build_dir.clone(),
    };
    fs::create_dir_all(&dir).map_err(|source| AssetError::Write {
      path: dir.clone(),
      source,
    })?;
    Ok(dir.join(format!("{}{suffix}", asset.name())))
  }

  /// Header location for `asset`.
  pub fn header_path(&self, asset: &Asset) -> PathBuf {
    self.headers_dir.join(format!("{}.h", asset.name()))
  }
}

/// Receives progress notifications from a build run.
///
/// Callbacks may arrive from several tasks at once.
pub trait ProgressSink: Send + Sync {
  fn on_build_started(&self, _total: usize) {}

  fn on_asset_built(&self, _asset: &Asset, _success_count: usize, _total: usize) {}

  fn on_asset_failed(&self, _asset: &Asset, _error: &AssetError) {}

  fn on_build_complete(&self, _success_count: usize, _error_count: usize) {}
}

/// A sink that ignores everything.
pub struct NoProgress;

impl ProgressSink for NoProgress {}

/// An asset that failed to build.
#[derive(Debug)]
pub struct AssetFailure {
  pub path: PathBuf,
  pub error: AssetError,
}

impl fmt::Display for AssetFailure {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}: {}", self.path.display(), self.error)
  }
}

/// Outcome of a whole build run.
#[derive(Debug, Default)]
pub struct BuildSummary {
  /// Assets found under the owned tree.
  pub discovered: usize,
  /// Assets that were dirty and got scheduled.
  pub scheduled: usize,
  /// Assets that built successfully (no-ops excluded).
  pub built_count: usize,
  pub error_count: usize,
  /// Engine sha the run was keyed on.
  pub engine_sha: String,
  pub artifacts: Vec<BuildArtifact>,
  pub errors: Vec<AssetFailure>,
}

impl BuildSummary {
  pub fn success(&self) -> bool {
    self.error_count == 0
  }
}

/// Errors that abort a build run as a whole.
#[derive(Debug, Error)]
pub enum BuildError {
  #[error("build cancelled")]
  Cancelled,

  #[error("failed to create {path}: {source}")]
  CreateDir {
    path: PathBuf,
    #[source]
    source: io::Error,
  },

  #[error("failed to read {path}: {source}")]
  Read {
    path: PathBuf,
    #[source]
    source: io::Error,
  },

  #[error("failed to write {path}: {source}")]
  Write {
    path: PathBuf,
    #[source]
    source: io::Error,
  },

  #[error("failed to walk {path}: {source}")]
  Walk {
    path: PathBuf,
    #[source]
    source: walkdir::Error,
  },

  #[error("asset discovery failed: {0}")]
  Discover(#[from] AssetError),

  #[error(transparent)]
  State(#[from] StateError),

  #[error("archive generation failed: {0}")]
  Archive(#[from] ArchiveError),

  #[error("build task failed: {0}")]
  Task(String),

  #[error(transparent)]
  Package(#[from] crate::package::PackageError),
}

impl BuildError {
  pub(crate) fn create_dir(path: &Path, source: io::Error) -> Self {
    BuildError::CreateDir {
      path: path.to_path_buf(),
      source,
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::asset::{AssetRegistry, AssetsDir};

  #[test]
  fn compression_follows_artifact_type() {
    assert!(ArtifactType::Binary.should_compress());
    assert!(ArtifactType::Shape.should_compress());
    assert!(ArtifactType::Collision.should_compress());
    assert!(!ArtifactType::Header.should_compress());
    assert!(!ArtifactType::Other.should_compress());
  }

  #[test]
  fn artifact_mirrors_asset_directory() {
    let temp = tempfile::tempdir().unwrap();
    let ctx = BuildCtx::new(temp.path().join("build"), "sha".to_string());
    let registry = AssetRegistry::with_builtins();
    let asset = registry
      .create(&AssetsDir::owned("/unused"), Path::new("area/kmr/kmr_00.shape"))
      .unwrap();

    let path = ctx.artifact(&asset, "_hit.collision").unwrap();
    assert_eq!(path, temp.path().join("build/area/kmr/kmr_00_hit.collision"));
    assert!(path.parent().unwrap().is_dir());
    assert_eq!(ctx.header_path(&asset), temp.path().join("build/headers/kmr_00.h"));
  }
}
