//! Built-in asset kinds.

use std::fs;
use std::path::Path;

use tracing::debug;
use walkdir::WalkDir;

use super::{Asset, AssetError, AssetKind};
use crate::build::types::{ArtifactType, BuildArtifact, BuildCtx, BuildOutcome};

/// Pre-compiled data copied verbatim into the build directory.
///
/// A file asset is copied as is. A directory asset is packed by concatenating
/// its files in path order.
pub struct CopyKind {
  name: &'static str,
  suffix: &'static str,
  artifact_type: ArtifactType,
}

impl CopyKind {
  pub const LOGIC_VERSION: u32 = 1;

  pub fn new(name: &'static str, suffix: &'static str, artifact_type: ArtifactType) -> Self {
    Self {
      name,
      suffix,
      artifact_type,
    }
  }

  fn read(&self, asset: &Asset) -> Result<Vec<u8>, AssetError> {
    let path = asset.path();
    if !path.is_dir() {
      return fs::read(&path).map_err(|source| AssetError::Read { path, source });
    }

    let mut data = Vec::new();
    for entry in WalkDir::new(&path).sort_by_file_name() {
      let entry = entry.map_err(|source| AssetError::Walk {
        path: path.clone(),
        source,
      })?;
      if entry.file_type().is_file() {
        let bytes = fs::read(entry.path()).map_err(|source| AssetError::Read {
          path: entry.path().to_path_buf(),
          source,
        })?;
        data.extend_from_slice(&bytes);
      }
    }
    Ok(data)
  }
}

impl AssetKind for CopyKind {
  fn name(&self) -> &str {
    self.name
  }

  fn logic_version(&self) -> u32 {
    Self::LOGIC_VERSION
  }

  fn write_header(&self, asset: &Asset, path: &Path) -> Result<bool, AssetError> {
    let size = self.read(asset)?.len();
    let symbol = header_symbol(asset.name());
    let content = format!("#pragma once\n\n#define {symbol}_SIZE 0x{size:X}\n");

    fs::write(path, content).map_err(|source| AssetError::Write {
      path: path.to_path_buf(),
      source,
    })?;
    Ok(true)
  }

  fn build(&self, asset: &Asset, ctx: &BuildCtx) -> BuildOutcome {
    let result = (|| {
      let data = self.read(asset)?;
      let out = ctx.artifact(asset, &format!(".{}", self.suffix))?;
      fs::write(&out, &data).map_err(|source| AssetError::Write {
        path: out.clone(),
        source,
      })?;
      debug!(asset = %asset, out = %out.display(), size = data.len(), "copied asset");
      Ok::<_, AssetError>(out)
    })();

    match result {
      Ok(path) => BuildOutcome::Success(vec![BuildArtifact::new(path, self.artifact_type)]),
      Err(e) => BuildOutcome::Failed(e),
    }
  }
}

/// Upper-case C identifier for an asset name.
pub fn header_symbol(name: &str) -> String {
  name
    .chars()
    .map(|c| if c.is_ascii_alphanumeric() { c.to_ascii_uppercase() } else { '_' })
    .collect()
}
