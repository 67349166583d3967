//! Merges a freshly built archive into the node chain of a host image.
//!
//! The host image carries a singly linked list of mapfs nodes starting at a
//! fixed address. Each node's `END DATA` sentinel holds the address of the
//! next node. A patch does one of three things:
//!
//! - **replace**: a node with the same project name exists and the new archive
//!   fits in its footprint; the bytes are overwritten in place.
//! - **append**: no node matches; the archive is appended at the next 16-byte
//!   boundary past the end of the image and linked from the last node.
//! - **evict and append**: the matching node is too small; it is unlinked and
//!   the archive is appended.
//!
//! The chain start is fixed, so evicting the first node leaves an empty
//! placeholder node there that links to the rest of the chain.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::{debug, info};

use super::format::{FormatError, MAGIC, TocEntry, align_up, encode_header, read_project_name, write_u32};
use super::parser::{parse_chain, parse_node};
use super::types::{ArchiveNode, ParseError};

#[derive(Debug, Error)]
pub enum PatchError {
  /// The image holds no valid chain at the given address.
  #[error("not a compatible host image: no valid archive chain at 0x{start:x}: {source}")]
  InvalidImage {
    start: usize,
    #[source]
    source: ParseError,
  },

  #[error("archive is malformed: {0}")]
  InvalidArchive(#[source] ParseError),

  #[error("archive does not start with the MAPFS magic")]
  NotAnArchive,

  #[error("patched image of {0} bytes exceeds the 32-bit address range")]
  ImageTooLarge(usize),

  #[error(transparent)]
  Format(#[from] FormatError),

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
}

/// What a patch did to the chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PatchAction {
  Replaced,
  Appended,
  EvictedAndAppended,
}

impl std::fmt::Display for PatchAction {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    match self {
      PatchAction::Replaced => write!(f, "replaced in place"),
      PatchAction::Appended => write!(f, "appended"),
      PatchAction::EvictedAndAppended => write!(f, "evicted and appended"),
    }
  }
}

#[derive(Debug)]
pub struct PatchOutcome {
  pub image: Vec<u8>,
  pub action: PatchAction,
  /// Address the archive now lives at.
  pub address: usize,
}

/// Merge `archive` into the chain of `image` starting at `chain_start`.
///
/// Returns a new buffer; `image` is never modified. Fails before producing any
/// output if the chain cannot be validated.
pub fn apply_archive(image: &[u8], archive: &[u8], chain_start: usize) -> Result<PatchOutcome, PatchError> {
  let nodes = parse_chain(image, chain_start).map_err(|source| PatchError::InvalidImage {
    start: chain_start,
    source,
  })?;
  info!(
    start = format_args!("0x{chain_start:x}"),
    nodes = nodes.len(),
    "found valid archive chain"
  );

  if !archive.starts_with(MAGIC) {
    return Err(PatchError::NotAnArchive);
  }
  let incoming = parse_node(archive, 0).map_err(PatchError::InvalidArchive)?;
  let name = read_project_name(archive, 0)?;
  info!(project = %name, size = archive.len(), "applying archive");

  let mut found = None;
  for (index, node) in nodes.iter().enumerate() {
    if read_project_name(image, node.address)? == name {
      found = Some(index);
      break;
    }
  }

  let Some(index) = found else {
    info!(project = %name, "project not in chain, appending");
    let (image, address) = append(image.to_vec(), &nodes, archive, &incoming)?;
    return Ok(PatchOutcome {
      image,
      action: PatchAction::Appended,
      address,
    });
  };

  let existing = &nodes[index];
  let footprint = existing.footprint();

  if archive.len() <= footprint {
    info!(
      address = format_args!("0x{:x}", existing.address),
      size = archive.len(),
      footprint,
      "replacing in place"
    );
    let next = nodes.get(index + 1).map_or(0, |n| n.address);
    let image = replace(image.to_vec(), existing, archive, &incoming, next)?;
    return Ok(PatchOutcome {
      image,
      action: PatchAction::Replaced,
      address: existing.address,
    });
  }

  info!(
    address = format_args!("0x{:x}", existing.address),
    size = archive.len(),
    footprint,
    "archive no longer fits, evicting node"
  );
  let (image, remaining) = evict(image.to_vec(), &nodes, index)?;
  let (image, address) = append(image, &remaining, archive, &incoming)?;
  Ok(PatchOutcome {
    image,
    action: PatchAction::EvictedAndAppended,
    address,
  })
}

/// Patch a ROM file on disk. The file is only rewritten after a successful
/// patch.
pub fn patch_rom_file(rom: &Path, archive: &Path, chain_start: usize) -> Result<PatchOutcome, PatchError> {
  let image = fs::read(rom).map_err(|source| PatchError::Read {
    path: rom.to_path_buf(),
    source,
  })?;
  let archive_bytes = fs::read(archive).map_err(|source| PatchError::Read {
    path: archive.to_path_buf(),
    source,
  })?;

  let outcome = apply_archive(&image, &archive_bytes, chain_start)?;
  write_image(rom, &outcome.image)?;
  info!(path = %rom.display(), size = outcome.image.len(), action = %outcome.action, "ROM patched");
  Ok(outcome)
}

/// Write atomically: temp file next to the target, then rename.
pub(crate) fn write_image(path: &Path, bytes: &[u8]) -> Result<(), PatchError> {
  let mut temp_path = path.as_os_str().to_owned();
  temp_path.push(".tmp");
  let temp_path = PathBuf::from(temp_path);

  let write_err = |source| PatchError::Write {
    path: path.to_path_buf(),
    source,
  };
  fs::write(&temp_path, bytes).map_err(write_err)?;
  fs::rename(&temp_path, path).map_err(write_err)
}

fn write_pointer(image: &mut [u8], at: usize, target: usize) -> Result<(), PatchError> {
  let value = u32::try_from(target).map_err(|_| PatchError::ImageTooLarge(target))?;
  write_u32(image, at, value)?;
  debug!(
    at = format_args!("0x{at:x}"),
    target = format_args!("0x{target:x}"),
    "rewrote next pointer"
  );
  Ok(())
}

fn replace(
  mut image: Vec<u8>,
  existing: &ArchiveNode,
  archive: &[u8],
  incoming: &ArchiveNode,
  next: usize,
) -> Result<Vec<u8>, PatchError> {
  let start = existing.address;
  let footprint = existing.footprint();
  let end = start + footprint;
  if end > image.len() {
    return Err(FormatError::OutOfBounds {
      offset: start,
      len: footprint,
      size: image.len(),
    }
    .into());
  }

  image[start..start + archive.len()].copy_from_slice(archive);
  image[start + archive.len()..end].fill(0);
  debug!(
    zeroed = footprint - archive.len(),
    "cleared remainder of old node"
  );

  let at = super::format::next_pointer_offset(start, incoming.entries.len());
  write_pointer(&mut image, at, next)?;
  Ok(image)
}

fn append(
  mut image: Vec<u8>,
  chain: &[ArchiveNode],
  archive: &[u8],
  incoming: &ArchiveNode,
) -> Result<(Vec<u8>, usize), PatchError> {
  let address = align_up(image.len());
  let total = address + archive.len();
  if total > u32::MAX as usize {
    return Err(PatchError::ImageTooLarge(total));
  }

  image.resize(address, 0);
  image.extend_from_slice(archive);

  if let Some(last) = chain.last() {
    write_pointer(&mut image, last.next_pointer_offset(), address)?;
  }
  let own = super::format::next_pointer_offset(address, incoming.entries.len());
  write_pointer(&mut image, own, 0)?;

  info!(address = format_args!("0x{address:x}"), size = archive.len(), "appended node");
  Ok((image, address))
}

/// Unlink `nodes[index]` and return the chain that remains.
fn evict(mut image: Vec<u8>, nodes: &[ArchiveNode], index: usize) -> Result<(Vec<u8>, Vec<ArchiveNode>), PatchError> {
  let removed = &nodes[index];
  let next = nodes.get(index + 1).map_or(0, |n| n.address);

  if index > 0 {
    write_pointer(&mut image, nodes[index - 1].next_pointer_offset(), next)?;
    let remaining = nodes
      .iter()
      .enumerate()
      .filter(|(i, _)| *i != index)
      .map(|(_, n)| n.clone())
      .collect();
    return Ok((image, remaining));
  }

  // The head stays at the chain start: swap it for an empty node.
  let mut placeholder = Vec::new();
  encode_header("", &mut placeholder);
  TocEntry::sentinel(0).encode_into(&mut placeholder);

  let start = removed.address;
  let end = start + removed.footprint();
  if end > image.len() {
    return Err(FormatError::OutOfBounds {
      offset: start,
      len: removed.footprint(),
      size: image.len(),
    }
    .into());
  }
  image[start..start + placeholder.len()].copy_from_slice(&placeholder);
  image[start + placeholder.len()..end].fill(0);

  let head = ArchiveNode {
    address: start,
    entries: vec![TocEntry::sentinel(next as u32)],
    next: next as u32,
  };
  write_pointer(&mut image, head.next_pointer_offset(), next)?;
  debug!(address = format_args!("0x{start:x}"), "left placeholder at chain start");

  let mut remaining = vec![head];
  remaining.extend(nodes[1..].iter().cloned());
  Ok((image, remaining))
}
