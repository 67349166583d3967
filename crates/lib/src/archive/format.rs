//! Fixed-width layout of the mapfs container.
//!
//! ```text
//! +--------------------+ 0
//! | "MAPFS " magic     |   6 bytes
//! | project name       |  16 bytes, NUL padded
//! | reserved           |  10 bytes, zero
//! +--------------------+ 32
//! | TOC record * N     |  76 bytes each
//! | "END DATA" record  |  76 bytes, offset field = next node address
//! +--------------------+ 32 + (N + 1) * 76
//! | payload            |  entry data in TOC order
//! +--------------------+
//! ```
//!
//! All integers are big-endian `u32`.

use thiserror::Error;

pub const MAGIC: &[u8; 6] = b"MAPFS ";
pub const HEADER_SIZE: usize = 32;
pub const PROJECT_NAME_OFFSET: usize = 6;
pub const PROJECT_NAME_SIZE: usize = 16;
pub const PROJECT_NAME_MAX: usize = PROJECT_NAME_SIZE - 1;
pub const TOC_ENTRY_SIZE: usize = 76;
pub const TOC_NAME_SIZE: usize = 64;
pub const ENTRY_NAME_MAX: usize = TOC_NAME_SIZE - 1;
pub const SENTINEL_NAME: &str = "END DATA";

/// Alignment of nodes appended to a host image.
pub const NODE_ALIGNMENT: usize = 16;

/// Errors produced by bounds-checked buffer access.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum FormatError {
  #[error("read of {len} bytes at 0x{offset:x} exceeds buffer length 0x{size:x}")]
  OutOfBounds { offset: usize, len: usize, size: usize },
}

/// One 76-byte table-of-contents record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TocEntry {
  pub name: String,
  /// Absolute data offset, or the next-node address for the sentinel.
  pub offset: u32,
  pub compressed_size: u32,
  pub decompressed_size: u32,
}

impl TocEntry {
  pub fn sentinel(next: u32) -> Self {
    Self {
      name: SENTINEL_NAME.to_string(),
      offset: next,
      compressed_size: 0,
      decompressed_size: 0,
    }
  }

  pub fn is_sentinel(&self) -> bool {
    self.name.starts_with(SENTINEL_NAME)
  }

  /// Decode a record from exactly [`TOC_ENTRY_SIZE`] bytes.
  pub fn decode(record: &[u8]) -> Self {
    debug_assert_eq!(record.len(), TOC_ENTRY_SIZE);
    Self {
      name: nul_terminated(&record[..TOC_NAME_SIZE]),
      offset: be_u32(&record[64..68]),
      compressed_size: be_u32(&record[68..72]),
      decompressed_size: be_u32(&record[72..76]),
    }
  }

  pub fn encode_into(&self, out: &mut Vec<u8>) {
    put_padded(out, self.name.as_bytes(), TOC_NAME_SIZE);
    out.extend_from_slice(&self.offset.to_be_bytes());
    out.extend_from_slice(&self.compressed_size.to_be_bytes());
    out.extend_from_slice(&self.decompressed_size.to_be_bytes());
  }
}

/// Round `value` up to the next multiple of [`NODE_ALIGNMENT`].
pub fn align_up(value: usize) -> usize {
  (value + NODE_ALIGNMENT - 1) & !(NODE_ALIGNMENT - 1)
}

/// Location of the sentinel's next pointer in a node with `entry_count`
/// records (sentinel included).
pub fn next_pointer_offset(node_address: usize, entry_count: usize) -> usize {
  node_address + HEADER_SIZE + (entry_count - 1) * TOC_ENTRY_SIZE + TOC_NAME_SIZE
}

pub fn slice_at(buf: &[u8], offset: usize, len: usize) -> Result<&[u8], FormatError> {
  offset
    .checked_add(len)
    .filter(|end| *end <= buf.len())
    .map(|end| &buf[offset..end])
    .ok_or(FormatError::OutOfBounds {
      offset,
      len,
      size: buf.len(),
    })
}

pub fn read_u32(buf: &[u8], offset: usize) -> Result<u32, FormatError> {
  slice_at(buf, offset, 4).map(be_u32)
}

/// Bounds-checked in-place big-endian write.
pub fn write_u32(buf: &mut [u8], offset: usize, value: u32) -> Result<(), FormatError> {
  let size = buf.len();
  match offset.checked_add(4).filter(|end| *end <= size) {
    Some(end) => {
      buf[offset..end].copy_from_slice(&value.to_be_bytes());
      Ok(())
    }
    None => Err(FormatError::OutOfBounds { offset, len: 4, size }),
  }
}

/// Project name stored in the header of the node at `address`.
pub fn read_project_name(buf: &[u8], address: usize) -> Result<String, FormatError> {
  let raw = slice_at(buf, address + PROJECT_NAME_OFFSET, PROJECT_NAME_SIZE)?;
  Ok(nul_terminated(raw).trim().to_string())
}

/// Encode a 32-byte header for `project_name`.
pub fn encode_header(project_name: &str, out: &mut Vec<u8>) {
  out.extend_from_slice(MAGIC);
  let name = truncate_bytes(project_name, PROJECT_NAME_MAX);
  put_padded(out, name, PROJECT_NAME_SIZE);
  out.extend_from_slice(&[0u8; HEADER_SIZE - PROJECT_NAME_OFFSET - PROJECT_NAME_SIZE]);
}

fn truncate_bytes(s: &str, max: usize) -> &[u8] {
  let bytes = s.as_bytes();
  &bytes[..bytes.len().min(max)]
}

fn put_padded(out: &mut Vec<u8>, bytes: &[u8], width: usize) {
  let len = bytes.len().min(width);
  out.extend_from_slice(&bytes[..len]);
  out.resize(out.len() + (width - len), 0);
}

fn nul_terminated(raw: &[u8]) -> String {
  let end = raw.iter().position(|b| *b == 0).unwrap_or(raw.len());
  String::from_utf8_lossy(&raw[..end]).into_owned()
}

fn be_u32(bytes: &[u8]) -> u32 {
  u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]])
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn align_up_rounds_to_sixteen() {
    assert_eq!(align_up(0), 0);
    assert_eq!(align_up(1), 16);
    assert_eq!(align_up(16), 16);
    assert_eq!(align_up(17), 32);
  }

  #[test]
  fn header_truncates_project_name_to_fifteen_bytes() {
    let mut out = Vec::new();
    encode_header("an-extremely-long-project-name", &mut out);

    assert_eq!(out.len(), HEADER_SIZE);
    assert_eq!(&out[..6], MAGIC);
    assert_eq!(read_project_name(&out, 0).unwrap(), "an-extremely-lo");
    assert_eq!(out[6 + 15], 0);
  }

  #[test]
  fn toc_entry_encodes_to_fixed_width() {
    let entry = TocEntry {
      name: "kmr_00_shape".to_string(),
      offset: 0x1234,
      compressed_size: 10,
      decompressed_size: 20,
    };
    let mut out = Vec::new();
    entry.encode_into(&mut out);

    assert_eq!(out.len(), TOC_ENTRY_SIZE);
    assert_eq!(TocEntry::decode(&out), entry);
  }

  #[test]
  fn write_u32_rejects_out_of_bounds() {
    let mut buf = [0u8; 6];
    assert!(write_u32(&mut buf, 2, 7).is_ok());
    assert_eq!(&buf[2..6], &[0, 0, 0, 7]);
    assert_eq!(
      write_u32(&mut buf, 3, 7),
      Err(FormatError::OutOfBounds {
        offset: 3,
        len: 4,
        size: 6
      })
    );
  }

  #[test]
  fn next_pointer_offset_points_into_sentinel() {
    // one entry + sentinel
    assert_eq!(next_pointer_offset(0x100, 2), 0x100 + 32 + 76 + 64);
  }
}
