//! Serializes entries into a single mapfs container.

use std::sync::Arc;

use tracing::{debug, warn};

use super::compress::{Compressor, Yay0};
use super::format::{HEADER_SIZE, TOC_ENTRY_SIZE, TocEntry, encode_header};
use super::types::{ArchiveEntry, ArchiveError};

/// Entries smaller than this are always stored raw.
pub const MIN_COMPRESS_SIZE: usize = 64;

/// Collects entries and lays them out as header, TOC and payload.
pub struct ArchiveBuilder {
  project_name: String,
  compressor: Arc<dyn Compressor>,
  entries: Vec<ArchiveEntry>,
}

impl ArchiveBuilder {
  pub fn new(project_name: &str) -> Self {
    Self::with_compressor(project_name, Arc::new(Yay0))
  }

  pub fn with_compressor(project_name: &str, compressor: Arc<dyn Compressor>) -> Self {
    Self {
      project_name: project_name.to_string(),
      compressor,
      entries: Vec::new(),
    }
  }

  pub fn entries(&self) -> &[ArchiveEntry] {
    &self.entries
  }

  /// Add an entry, compressing it when `compress` is set and it pays off.
  ///
  /// Compression failures are not fatal: the entry is stored uncompressed.
  pub fn add_entry(&mut self, name: &str, data: Vec<u8>, compress: bool) -> Result<(), ArchiveError> {
    let decompressed_size = data.len();

    let entry = if compress && data.len() >= MIN_COMPRESS_SIZE {
      match self.compressor.compress(&data) {
        Ok(packed) if packed.len() < data.len() => {
          debug!(name, raw = data.len(), packed = packed.len(), "compressed entry");
          ArchiveEntry::new(name, packed, true, decompressed_size)?
        }
        Ok(_) => {
          debug!(name, size = data.len(), "compression did not shrink entry, storing raw");
          ArchiveEntry::new(name, data, false, decompressed_size)?
        }
        Err(e) => {
          warn!(name, error = %e, "compression failed, storing uncompressed");
          ArchiveEntry::new(name, data, false, decompressed_size)?
        }
      }
    } else {
      ArchiveEntry::new(name, data, false, decompressed_size)?
    };

    self.entries.push(entry);
    Ok(())
  }

  /// Size the built archive will have.
  pub fn total_size(&self) -> usize {
    toc_end(self.entries.len()) + self.entries.iter().map(|e| e.data.len()).sum::<usize>()
  }

  pub fn build(&self) -> Result<Vec<u8>, ArchiveError> {
    let total = self.total_size();
    if total > u32::MAX as usize {
      return Err(ArchiveError::TooLarge(total));
    }

    let mut out = Vec::with_capacity(total);
    encode_header(&self.project_name, &mut out);

    let mut offset = toc_end(self.entries.len());
    for entry in &self.entries {
      TocEntry {
        name: entry.name.clone(),
        offset: offset as u32,
        compressed_size: entry.compressed_size() as u32,
        decompressed_size: entry.decompressed_size as u32,
      }
      .encode_into(&mut out);
      offset += entry.compressed_size();
    }
    TocEntry::sentinel(0).encode_into(&mut out);

    for entry in &self.entries {
      out.extend_from_slice(&entry.data);
    }

    debug_assert_eq!(out.len(), total);
    Ok(out)
  }

  /// Recover the uncompressed bytes of an entry.
  pub fn decompress(&self, entry: &ArchiveEntry) -> Result<Vec<u8>, ArchiveError> {
    if !entry.compressed {
      return Ok(entry.data.clone());
    }
    Ok(self.compressor.decompress(&entry.data, entry.decompressed_size)?)
  }
}

/// Offset where payload starts for an archive with `entry_count` entries.
fn toc_end(entry_count: usize) -> usize {
  HEADER_SIZE + (entry_count + 1) * TOC_ENTRY_SIZE
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::archive::compress::CompressError;
  use crate::archive::format::{MAGIC, read_project_name};
  use crate::archive::parser::parse_chain;
  use tracing_test::traced_test;

  struct FailingCompressor;

  impl Compressor for FailingCompressor {
    fn compress(&self, data: &[u8]) -> Result<Vec<u8>, CompressError> {
      Err(CompressError::TooLarge(data.len()))
    }

    fn decompress(&self, _data: &[u8], _size: usize) -> Result<Vec<u8>, CompressError> {
      unreachable!()
    }
  }

  #[test]
  fn small_and_large_entries() {
    let mut builder = ArchiveBuilder::new("test");
    builder.add_entry("small", vec![1u8; 10], true).unwrap();
    builder.add_entry("large", vec![0u8; 200], true).unwrap();

    let small = &builder.entries()[0];
    assert!(!small.compressed);
    assert_eq!(small.compressed_size(), small.decompressed_size);

    let large = &builder.entries()[1];
    assert!(large.compressed);
    assert!(large.compressed_size() < 200);
    assert_eq!(builder.decompress(large).unwrap(), vec![0u8; 200]);

    let bytes = builder.build().unwrap();
    let nodes = parse_chain(&bytes, 0).unwrap();
    assert_eq!(nodes.len(), 1);
    assert_eq!(nodes[0].entries.len(), 3);
    assert!(nodes[0].entries[2].is_sentinel());
  }

  #[test]
  fn offsets_follow_cumulative_sizes() {
    let mut builder = ArchiveBuilder::new("offsets");
    for (i, len) in [64usize, 100, 300, 90].into_iter().enumerate() {
      let data: Vec<u8> = (0..len).map(|b| (b * 31 + i) as u8).collect();
      builder.add_entry(&format!("entry{i}"), data, true).unwrap();
    }
    let bytes = builder.build().unwrap();
    let node = &parse_chain(&bytes, 0).unwrap()[0];

    let mut expected = HEADER_SIZE + 5 * TOC_ENTRY_SIZE;
    let mut previous = 0;
    for entry in node.entries.iter().filter(|e| !e.is_sentinel()) {
      assert_eq!(entry.offset as usize, expected);
      assert!(entry.offset > previous);
      previous = entry.offset;
      expected += entry.compressed_size as usize;
    }
    assert_eq!(bytes.len(), expected);
  }

  #[test]
  fn entries_below_threshold_never_compress() {
    let mut builder = ArchiveBuilder::new("tiny");
    builder.add_entry("zeros", vec![0u8; 63], true).unwrap();

    let entry = &builder.entries()[0];
    assert!(!entry.compressed);
    assert_eq!(entry.compressed_size(), 63);
    assert_eq!(entry.decompressed_size, 63);
  }

  #[test]
  fn compress_flag_off_stores_raw() {
    let mut builder = ArchiveBuilder::new("raw");
    builder.add_entry("big", vec![0u8; 500], false).unwrap();
    assert!(!builder.entries()[0].compressed);
    assert_eq!(builder.decompress(&builder.entries()[0]).unwrap(), vec![0u8; 500]);
  }

  #[test]
  #[traced_test]
  fn compression_failure_falls_back_to_raw() {
    let mut builder = ArchiveBuilder::with_compressor("fallback", Arc::new(FailingCompressor));
    builder.add_entry("data", vec![9u8; 128], true).unwrap();

    let entry = &builder.entries()[0];
    assert!(!entry.compressed);
    assert_eq!(entry.data, vec![9u8; 128]);
    assert!(logs_contain("compression failed"));
  }

  #[test]
  fn header_and_sentinel_layout() {
    let builder = ArchiveBuilder::new("empty-mod");
    let bytes = builder.build().unwrap();

    assert_eq!(bytes.len(), HEADER_SIZE + TOC_ENTRY_SIZE);
    assert_eq!(&bytes[..6], MAGIC);
    assert_eq!(read_project_name(&bytes, 0).unwrap(), "empty-mod");
    assert_eq!(&bytes[HEADER_SIZE..HEADER_SIZE + 8], b"END DATA");
    assert!(bytes[HEADER_SIZE + 64..].iter().all(|b| *b == 0));
  }

  #[test]
  fn rejects_invalid_names() {
    let mut builder = ArchiveBuilder::new("names");
    assert!(builder.add_entry("", vec![], false).is_err());
    assert!(builder.add_entry("END DATA", vec![], false).is_err());
    assert!(builder.add_entry(&"x".repeat(64), vec![], false).is_err());
    assert!(builder.add_entry(&"x".repeat(63), vec![], false).is_ok());
  }
}
