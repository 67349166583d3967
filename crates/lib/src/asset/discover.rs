//! Asset discovery.

use tracing::{debug, info};
use walkdir::WalkDir;

use super::{Asset, AssetError, AssetRegistry, AssetsDir};

/// Find every asset under `dir`.
///
/// Regular files become assets whether or not their extension is registered.
/// A directory whose name carries a registered extension is a single asset and
/// is not descended into. Results are sorted by relative path. A missing root
/// yields no assets.
pub fn discover_assets(registry: &AssetRegistry, dir: &AssetsDir) -> Result<Vec<Asset>, AssetError> {
  let root = dir.path();
  if !root.is_dir() {
    debug!(root = %root.display(), "asset root does not exist");
    return Ok(Vec::new());
  }

  let mut assets = Vec::new();
  let mut walker = WalkDir::new(root).min_depth(1).sort_by_file_name().into_iter();

  while let Some(entry) = walker.next() {
    let entry = entry.map_err(|source| AssetError::Walk {
      path: root.to_path_buf(),
      source,
    })?;
    let Ok(relative) = entry.path().strip_prefix(root) else {
      continue;
    };

    if entry.file_type().is_dir() {
      if registry.asset_extension(relative).is_empty() {
        continue;
      }
      walker.skip_current_dir();
    } else if !entry.file_type().is_file() {
      continue;
    }

    assets.push(registry.create(dir, relative)?);
  }

  info!(root = %root.display(), count = assets.len(), "discovered assets");
  Ok(assets)
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::fs;
  use std::path::Path;
  use tempfile::TempDir;

  #[test]
  fn discovers_files_and_asset_directories() {
    let temp = TempDir::new().unwrap();
    let root = temp.path();
    fs::create_dir_all(root.join("maps/kmr_00.bin")).unwrap();
    fs::write(root.join("maps/kmr_00.bin/part0"), b"0").unwrap();
    fs::write(root.join("maps/kmr_00.bin/part1"), b"1").unwrap();
    fs::write(root.join("maps/kmr_00.shape"), b"s").unwrap();
    fs::write(root.join("readme.txt"), b"hi").unwrap();

    let registry = AssetRegistry::with_builtins();
    let assets = discover_assets(&registry, &AssetsDir::owned(root)).unwrap();
    let paths: Vec<&Path> = assets.iter().map(|a| a.relative_path()).collect();

    assert_eq!(
      paths,
      vec![
        Path::new("maps/kmr_00.bin"),
        Path::new("maps/kmr_00.shape"),
        Path::new("readme.txt"),
      ]
    );
    assert_eq!(assets[0].kind_name(), "binary");
    assert_eq!(assets[2].kind_name(), "asset");
    assert!(assets.iter().all(|a| a.is_owned()));
  }

  #[test]
  fn missing_root_is_empty() {
    let temp = TempDir::new().unwrap();
    let registry = AssetRegistry::with_builtins();
    let dir = AssetsDir::owned(temp.path().join("nope"));
    assert!(discover_assets(&registry, &dir).unwrap().is_empty());
  }
}
