use thiserror::Error;

use super::compress::CompressError;
use super::format::{ENTRY_NAME_MAX, FormatError, HEADER_SIZE, SENTINEL_NAME, TOC_ENTRY_SIZE, TocEntry};

/// Errors raised while assembling an archive.
#[derive(Debug, Error)]
pub enum ArchiveError {
  #[error("entry name must not be empty")]
  EmptyName,

  #[error("entry name {name:?} is {len} bytes, the limit is {ENTRY_NAME_MAX}")]
  NameTooLong { name: String, len: usize },

  #[error("entry name {0:?} is reserved")]
  ReservedName(String),

  #[error("archive of {0} bytes exceeds the 32-bit offset range")]
  TooLarge(usize),

  #[error("decompression failed: {0}")]
  Decompress(#[from] CompressError),
}

/// Structural problems found while walking a node chain.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ParseError {
  #[error("node address 0x{address:x} is outside the image (0x{size:x} bytes)")]
  InvalidNodeAddress { address: usize, size: usize },

  #[error("incomplete TOC record at 0x{0:x}")]
  IncompleteToc(usize),

  #[error("node at 0x{0:x} has no END DATA sentinel")]
  MissingSentinel(usize),

  #[error("node chain loops back to 0x{0:x}")]
  Cycle(usize),

  #[error(transparent)]
  Format(#[from] FormatError),
}

/// A named payload ready to be laid out in an archive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveEntry {
  pub name: String,
  pub data: Vec<u8>,
  pub compressed: bool,
  pub decompressed_size: usize,
}

impl ArchiveEntry {
  pub fn new(name: &str, data: Vec<u8>, compressed: bool, decompressed_size: usize) -> Result<Self, ArchiveError> {
    validate_entry_name(name)?;
    Ok(Self {
      name: name.to_string(),
      data,
      compressed,
      decompressed_size,
    })
  }

  pub fn compressed_size(&self) -> usize {
    self.data.len()
  }
}

pub fn validate_entry_name(name: &str) -> Result<(), ArchiveError> {
  if name.is_empty() {
    return Err(ArchiveError::EmptyName);
  }
  if name.len() > ENTRY_NAME_MAX {
    return Err(ArchiveError::NameTooLong {
      name: name.to_string(),
      len: name.len(),
    });
  }
  if name.starts_with(SENTINEL_NAME) {
    return Err(ArchiveError::ReservedName(name.to_string()));
  }
  Ok(())
}

/// A container located inside a host image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveNode {
  pub address: usize,
  /// TOC records in order, the sentinel last.
  pub entries: Vec<TocEntry>,
  /// Address of the next node, 0 terminates the chain.
  pub next: u32,
}

impl ArchiveNode {
  /// Bytes occupied by this node: header, TOC and payload, derived from its TOC.
  pub fn footprint(&self) -> usize {
    let toc = self.entries.len() * TOC_ENTRY_SIZE;
    let payload: usize = self
      .entries
      .iter()
      .filter(|e| !e.is_sentinel())
      .map(|e| e.compressed_size as usize)
      .sum();
    HEADER_SIZE + toc + payload
  }

  pub fn is_last(&self) -> bool {
    self.next == 0
  }

  /// Location of the sentinel's next pointer.
  pub fn next_pointer_offset(&self) -> usize {
    super::format::next_pointer_offset(self.address, self.entries.len())
  }

  /// Entries excluding the sentinel.
  pub fn files(&self) -> impl Iterator<Item = &TocEntry> {
    self.entries.iter().filter(|e| !e.is_sentinel())
  }
}
