//! Assets: source files or directories that compile into build artifacts.
//!
//! An asset is identified by the directory layer it lives in and its path
//! relative to that layer. Its kind is looked up by extension in the
//! [`AssetRegistry`]; assets with no registered kind are still discovered but
//! build to nothing.

pub mod discover;
pub mod dirs;
pub mod kinds;
pub mod registry;

use std::fmt;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use thiserror::Error;

use crate::build::types::{BuildCtx, BuildOutcome};

pub use dirs::{AssetStack, AssetsDir};
pub use discover::discover_assets;
pub use registry::AssetRegistry;

/// Kind name reported for assets without a registered kind.
pub const PLAIN_KIND: &str = "asset";

/// Errors raised by asset operations and asset builds.
#[derive(Debug, Error)]
pub enum AssetError {
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

  #[error("asset path must be relative: {0}")]
  NotRelative(PathBuf),

  #[error("{0}")]
  Invalid(String),
}

/// The contract every asset kind implements.
///
/// Methods are synchronous; the orchestrator runs them on blocking threads.
pub trait AssetKind: Send + Sync {
  /// Stable identifier, used to key the build-logic version in the build state.
  fn name(&self) -> &str;

  /// Bump when the build logic changes so existing assets of this kind rebuild.
  fn logic_version(&self) -> u32;

  /// Write a header for `asset` to `path`. Returns whether one was written.
  fn write_header(&self, _asset: &Asset, _path: &Path) -> Result<bool, AssetError> {
    Ok(false)
  }

  fn build(&self, asset: &Asset, ctx: &BuildCtx) -> BuildOutcome;
}

/// A discovered asset. Cheap to clone.
#[derive(Clone)]
pub struct Asset {
  dir: AssetsDir,
  relative_path: PathBuf,
  name: String,
  extension: String,
  kind: Option<Arc<dyn AssetKind>>,
}

impl Asset {
  pub(crate) fn new(
    dir: AssetsDir,
    relative_path: PathBuf,
    extension: String,
    kind: Option<Arc<dyn AssetKind>>,
  ) -> Result<Self, AssetError> {
    if relative_path.is_absolute() {
      return Err(AssetError::NotRelative(relative_path));
    }
    let name = name_without_extension(&relative_path, &extension);
    Ok(Self {
      dir,
      relative_path,
      name,
      extension,
      kind,
    })
  }

  pub fn dir(&self) -> &AssetsDir {
    &self.dir
  }

  pub fn root(&self) -> &Path {
    self.dir.path()
  }

  pub fn is_owned(&self) -> bool {
    self.dir.is_owned()
  }

  pub fn relative_path(&self) -> &Path {
    &self.relative_path
  }

  /// Full path on disk. May be a directory.
  pub fn path(&self) -> PathBuf {
    self.dir.path().join(&self.relative_path)
  }

  /// File name without the asset extension.
  pub fn name(&self) -> &str {
    &self.name
  }

  /// Registered extension, empty for plain assets.
  pub fn extension(&self) -> &str {
    &self.extension
  }

  pub fn is_dir(&self) -> bool {
    self.path().is_dir()
  }

  pub fn exists(&self) -> bool {
    self.path().exists()
  }

  pub fn kind_name(&self) -> &str {
    self.kind.as_deref().map_or(PLAIN_KIND, |k| k.name())
  }

  pub fn logic_version(&self) -> u32 {
    self.kind.as_deref().map_or(0, |k| k.logic_version())
  }

  /// Key under which this asset is tracked in the build state.
  pub fn state_key(&self) -> String {
    self
      .relative_path
      .components()
      .map(|c| c.as_os_str().to_string_lossy())
      .collect::<Vec<_>>()
      .join("/")
  }

  pub fn write_header(&self, path: &Path) -> Result<bool, AssetError> {
    match &self.kind {
      Some(kind) => kind.write_header(self, path),
      None => Ok(false),
    }
  }

  pub fn build(&self, ctx: &BuildCtx) -> BuildOutcome {
    match &self.kind {
      Some(kind) => kind.build(self, ctx),
      None => BuildOutcome::NoOp,
    }
  }

  pub(crate) fn set_dir(&mut self, dir: AssetsDir) {
    self.dir = dir;
  }
}

impl fmt::Debug for Asset {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("Asset")
      .field("dir", &self.dir)
      .field("relative_path", &self.relative_path)
      .field("kind", &self.kind_name())
      .finish()
  }
}

impl fmt::Display for Asset {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}", self.relative_path.display())
  }
}

/// `foo.bg.png` with extension `bg.png` is `foo`; with no registered extension
/// the last dot-suffix is dropped.
fn name_without_extension(path: &Path, extension: &str) -> String {
  let file_name = path.file_name().map(|n| n.to_string_lossy().into_owned()).unwrap_or_default();
  if !extension.is_empty()
    && let Some(stripped) = file_name.strip_suffix(&format!(".{extension}"))
  {
    return stripped.to_string();
  }
  path
    .file_stem()
    .map(|s| s.to_string_lossy().into_owned())
    .unwrap_or(file_name)
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn name_strips_registered_extension() {
    assert_eq!(name_without_extension(Path::new("maps/foo.bg.png"), "bg.png"), "foo");
    assert_eq!(name_without_extension(Path::new("bar.map"), "map"), "bar");
    assert_eq!(name_without_extension(Path::new("notes.txt"), ""), "notes");
    assert_eq!(name_without_extension(Path::new("README"), ""), "README");
  }

  #[test]
  fn rejects_absolute_paths() {
    let dir = AssetsDir::owned("/tmp/assets");
    let err = Asset::new(dir, PathBuf::from("/etc/passwd"), String::new(), None).unwrap_err();
    assert!(matches!(err, AssetError::NotRelative(_)));
  }

  #[test]
  fn plain_assets_build_to_nothing() {
    let dir = AssetsDir::owned("/tmp/assets");
    let asset = Asset::new(dir, PathBuf::from("sub/readme.txt"), String::new(), None).unwrap();

    assert_eq!(asset.kind_name(), PLAIN_KIND);
    assert_eq!(asset.logic_version(), 0);
    assert_eq!(asset.state_key(), "sub/readme.txt");
    assert!(!asset.write_header(Path::new("/tmp/never.h")).unwrap());
  }
}
