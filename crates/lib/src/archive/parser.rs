//! Walks the linked list of containers embedded in a host image.

use std::collections::HashSet;

use tracing::debug;

use super::format::{HEADER_SIZE, TOC_ENTRY_SIZE, TocEntry, slice_at};
use super::types::{ArchiveNode, ParseError};

/// Parse every node reachable from `start`.
///
/// The node at `start` is always parsed; after that the sentinel pointers are
/// followed until one is 0. Terminates on any image: each address is visited
/// at most once and every read is bounds-checked.
pub fn parse_chain(image: &[u8], start: usize) -> Result<Vec<ArchiveNode>, ParseError> {
  let mut nodes = Vec::new();
  let mut visited = HashSet::new();
  let mut address = start;

  loop {
    if !visited.insert(address) {
      return Err(ParseError::Cycle(address));
    }

    let node = parse_node(image, address)?;
    debug!(
      address = format_args!("0x{:x}", node.address),
      entries = node.entries.len() - 1,
      next = format_args!("0x{:x}", node.next),
      "parsed archive node"
    );

    let next = node.next as usize;
    nodes.push(node);

    if next == 0 {
      break;
    }
    address = next;
  }

  Ok(nodes)
}

/// Parse a single node at `address`.
pub fn parse_node(image: &[u8], address: usize) -> Result<ArchiveNode, ParseError> {
  if address.checked_add(HEADER_SIZE).is_none_or(|end| end > image.len()) {
    return Err(ParseError::InvalidNodeAddress {
      address,
      size: image.len(),
    });
  }

  let mut entries = Vec::new();
  let mut pos = address + HEADER_SIZE;

  loop {
    if pos == image.len() {
      return Err(ParseError::MissingSentinel(address));
    }
    let record = slice_at(image, pos, TOC_ENTRY_SIZE).map_err(|_| ParseError::IncompleteToc(pos))?;
    let entry = TocEntry::decode(record);
    pos += TOC_ENTRY_SIZE;

    if entry.is_sentinel() {
      let next = entry.offset;
      entries.push(entry);
      return Ok(ArchiveNode { address, entries, next });
    }
    entries.push(entry);
  }
}
