//! Layered asset directories.
//!
//! A project sees its assets through a stack of directories: the project's
//! own `assets/` directory first, then read-only layers such as the engine's
//! assets. Lookups take the first layer that has the path. Mutating an asset
//! from a read-only layer first copies it up into the owned layer.

use std::fs;
use std::path::{Path, PathBuf};

use tracing::{debug, info};
use walkdir::WalkDir;

use super::{Asset, AssetError};

/// One layer of the asset stack.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssetsDir {
  path: PathBuf,
  owned: bool,
}

impl AssetsDir {
  /// A layer belonging to the project, freely modifiable.
  pub fn owned(path: impl Into<PathBuf>) -> Self {
    Self {
      path: path.into(),
      owned: true,
    }
  }

  /// A read-only base layer.
  pub fn base(path: impl Into<PathBuf>) -> Self {
    Self {
      path: path.into(),
      owned: false,
    }
  }

  pub fn path(&self) -> &Path {
    &self.path
  }

  pub fn is_owned(&self) -> bool {
    self.owned
  }
}

/// Ordered asset layers, owned layer first.
#[derive(Debug, Clone)]
pub struct AssetStack {
  dirs: Vec<AssetsDir>,
}

impl AssetStack {
  pub fn new(owned: impl Into<PathBuf>, base: impl IntoIterator<Item = PathBuf>) -> Self {
    let mut dirs = vec![AssetsDir::owned(owned)];
    dirs.extend(base.into_iter().map(AssetsDir::base));
    Self { dirs }
  }

  pub fn owned_dir(&self) -> &AssetsDir {
    &self.dirs[0]
  }

  pub fn dirs(&self) -> &[AssetsDir] {
    &self.dirs
  }

  /// First layer containing `relative`.
  pub fn resolve(&self, relative: &Path) -> Option<&AssetsDir> {
    self.dirs.iter().find(|dir| dir.path().join(relative).exists())
  }

  /// Copy `asset` into the owned layer if it lives in a read-only one, and
  /// point it at the copy. An existing owned copy is kept as is.
  pub fn ensure_owned(&self, asset: &mut Asset) -> Result<(), AssetError> {
    if asset.is_owned() {
      return Ok(());
    }

    let owned = self.owned_dir();
    let source = asset.path();
    let target = owned.path().join(asset.relative_path());

    if !target.exists() {
      info!(
        from = %source.display(),
        to = %target.display(),
        "copying asset into project"
      );
      if source.is_dir() {
        copy_dir(&source, &target)?;
      } else {
        copy_file(&source, &target)?;
      }
    } else {
      debug!(path = %target.display(), "owned copy already exists");
    }

    asset.set_dir(owned.clone());
    Ok(())
  }
}

fn copy_file(from: &Path, to: &Path) -> Result<(), AssetError> {
  if let Some(parent) = to.parent() {
    fs::create_dir_all(parent).map_err(|source| AssetError::Write {
      path: parent.to_path_buf(),
      source,
    })?;
  }
  fs::copy(from, to).map_err(|source| AssetError::Write {
    path: to.to_path_buf(),
    source,
  })?;
  Ok(())
}

fn copy_dir(from: &Path, to: &Path) -> Result<(), AssetError> {
  for entry in WalkDir::new(from) {
    let entry = entry.map_err(|source| AssetError::Walk {
      path: from.to_path_buf(),
      source,
    })?;
    let Ok(relative) = entry.path().strip_prefix(from) else {
      continue;
    };
    let dest = to.join(relative);

    if entry.file_type().is_dir() {
      fs::create_dir_all(&dest).map_err(|source| AssetError::Write { path: dest, source })?;
    } else if entry.file_type().is_file() {
      copy_file(entry.path(), &dest)?;
    }
  }
  Ok(())
}
