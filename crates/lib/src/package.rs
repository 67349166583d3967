//! Distribution packages.
//!
//! A package is a gzip-compressed tar holding, in order:
//!
//! ```text
//! project.toml    project manifest
//! target.json     {"engine":{"sha":"…","assets_archive_ROM_START":31719424}}
//! assets.bin      the archive
//! ```

use std::fs::{self, File};
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use flate2::Compression;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use serde::{Deserialize, Serialize};
use tar::{Archive, Builder, Header};
use thiserror::Error;
use tracing::{debug, info};

use crate::archive::patcher::{PatchError, PatchOutcome, apply_archive, write_image};
use crate::consts::{ARCHIVE_FILENAME, MANIFEST_FILENAME, TARGET_FILENAME};

#[derive(Debug, Error)]
pub enum PackageError {
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

  #[error("invalid target descriptor: {0}")]
  Target(#[source] serde_json::Error),

  #[error("package {path} is missing {entry}")]
  MissingEntry { path: PathBuf, entry: &'static str },

  #[error(transparent)]
  Patch(#[from] PatchError),
}

/// Where a package's archive goes in the base image.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetDescriptor {
  pub engine: EngineTarget,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineTarget {
  /// Engine build the archive was made for.
  pub sha: String,
  #[serde(rename = "assets_archive_ROM_START")]
  pub assets_archive_rom_start: u32,
}

impl TargetDescriptor {
  pub fn new(engine_sha: &str, rom_start: u32) -> Self {
    Self {
      engine: EngineTarget {
        sha: engine_sha.to_string(),
        assets_archive_rom_start: rom_start,
      },
    }
  }

  pub fn rom_start(&self) -> u32 {
    self.engine.assets_archive_rom_start
  }
}

/// The parts of a package needed to apply it.
#[derive(Debug)]
pub struct Package {
  pub target: TargetDescriptor,
  pub archive: Vec<u8>,
}

/// Write a package to `output`.
pub fn package(manifest: &Path, target: &TargetDescriptor, archive: &Path, output: &Path) -> Result<(), PackageError> {
  info!(output = %output.display(), "creating package");

  let manifest_bytes = read(manifest)?;
  let archive_bytes = read(archive)?;
  let target_bytes = serde_json::to_vec(target).map_err(PackageError::Target)?;

  if let Some(parent) = output.parent() {
    fs::create_dir_all(parent).map_err(|source| PackageError::Write {
      path: parent.to_path_buf(),
      source,
    })?;
  }

  let write_err = |source| PackageError::Write {
    path: output.to_path_buf(),
    source,
  };
  let file = File::create(output).map_err(write_err)?;
  let encoder = GzEncoder::new(BufWriter::new(file), Compression::default());
  let mut tar = Builder::new(encoder);

  append(&mut tar, MANIFEST_FILENAME, &manifest_bytes).map_err(write_err)?;
  append(&mut tar, TARGET_FILENAME, &target_bytes).map_err(write_err)?;
  append(&mut tar, ARCHIVE_FILENAME, &archive_bytes).map_err(write_err)?;

  let encoder = tar.into_inner().map_err(write_err)?;
  let mut writer = encoder.finish().map_err(write_err)?;
  writer.flush().map_err(write_err)?;

  info!(
    output = %output.display(),
    engine_sha = %target.engine.sha,
    archive_size = archive_bytes.len(),
    "package created"
  );
  Ok(())
}

/// Read the target descriptor and archive out of a package.
pub fn read_package(path: &Path) -> Result<Package, PackageError> {
  let read_err = |source| PackageError::Read {
    path: path.to_path_buf(),
    source,
  };
  let file = File::open(path).map_err(read_err)?;
  let mut tar = Archive::new(GzDecoder::new(BufReader::new(file)));

  let mut target = None;
  let mut archive = None;
  for entry in tar.entries().map_err(read_err)? {
    let mut entry = entry.map_err(read_err)?;
    let name = entry.path().map_err(read_err)?.to_string_lossy().into_owned();
    debug!(entry = %name, size = entry.header().size().unwrap_or_default(), "package entry");

    if name == TARGET_FILENAME {
      let mut bytes = Vec::new();
      entry.read_to_end(&mut bytes).map_err(read_err)?;
      target = Some(serde_json::from_slice::<TargetDescriptor>(&bytes).map_err(PackageError::Target)?);
    } else if name == ARCHIVE_FILENAME {
      let mut bytes = Vec::new();
      entry.read_to_end(&mut bytes).map_err(read_err)?;
      archive = Some(bytes);
    }
  }

  let missing = |entry| PackageError::MissingEntry {
    path: path.to_path_buf(),
    entry,
  };
  Ok(Package {
    target: target.ok_or_else(|| missing(TARGET_FILENAME))?,
    archive: archive.ok_or_else(|| missing(ARCHIVE_FILENAME))?,
  })
}

/// Apply the archive in `package` to `rom` at the address the package names.
/// The ROM is only rewritten after a successful patch.
pub fn patch_rom_from_package(rom: &Path, package: &Path) -> Result<PatchOutcome, PackageError> {
  let Package { target, archive } = read_package(package)?;
  let image = read(rom)?;
  info!(
    rom = %rom.display(),
    start = format!("{:#x}", target.rom_start()),
    "applying package"
  );

  let outcome = apply_archive(&image, &archive, target.rom_start() as usize)?;
  write_image(rom, &outcome.image)?;
  info!(rom = %rom.display(), action = %outcome.action, size = outcome.image.len(), "ROM patched");
  Ok(outcome)
}

fn read(path: &Path) -> Result<Vec<u8>, PackageError> {
  fs::read(path).map_err(|source| PackageError::Read {
    path: path.to_path_buf(),
    source,
  })
}

fn append<W: Write>(tar: &mut Builder<W>, name: &str, data: &[u8]) -> io::Result<()> {
  let mut header = Header::new_gnu();
  header.set_size(data.len() as u64);
  header.set_mode(0o644);
  header.set_cksum();
  tar.append_data(&mut header, name, data)
}
