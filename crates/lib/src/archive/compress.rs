//! Entry compression.
//!
//! The archive stores compressed entries in Yay0, the LZ77 variant the target
//! runtime decodes natively. Yay0 splits the stream into three parts:
//!
//! ```text
//! 0x00 "Yay0"
//! 0x04 decompressed size
//! 0x08 link table offset
//! 0x0C chunk offset
//! 0x10 mask words      (1 bit per op, MSB first: 1 = literal, 0 = back-reference)
//!      link table      (u16: high nibble = length - 2, or 0 for a long match;
//!                       low 12 bits = distance - 1)
//!      chunk stream    (literal bytes, plus one extra length byte per long match)
//! ```

use std::collections::HashMap;

use thiserror::Error;

const YAY0_MAGIC: &[u8; 4] = b"Yay0";
const YAY0_HEADER_SIZE: usize = 16;
const WINDOW: usize = 0x1000;
const MIN_MATCH: usize = 3;
const MAX_SHORT_MATCH: usize = 0x11;
const MAX_MATCH: usize = 0xFF + 0x12;
const MAX_CANDIDATES: usize = 128;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CompressError {
  #[error("input of {0} bytes is too large to compress")]
  TooLarge(usize),

  #[error("not a Yay0 stream")]
  BadMagic,

  #[error("truncated Yay0 stream at offset 0x{0:x}")]
  Truncated(usize),

  #[error("back-reference distance {distance} exceeds output length {written}")]
  BadReference { distance: usize, written: usize },

  #[error("decompressed size mismatch: header says {expected}, entry says {actual}")]
  SizeMismatch { expected: usize, actual: usize },
}

/// A reversible entry codec.
pub trait Compressor: Send + Sync {
  fn compress(&self, data: &[u8]) -> Result<Vec<u8>, CompressError>;

  fn decompress(&self, data: &[u8], decompressed_size: usize) -> Result<Vec<u8>, CompressError>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct Yay0;

impl Compressor for Yay0 {
  fn compress(&self, data: &[u8]) -> Result<Vec<u8>, CompressError> {
    if data.len() > u32::MAX as usize {
      return Err(CompressError::TooLarge(data.len()));
    }

    let mut masks: Vec<u32> = Vec::new();
    let mut mask = 0u32;
    let mut mask_bits = 0u32;
    let mut links: Vec<u16> = Vec::new();
    let mut chunks: Vec<u8> = Vec::new();

    let mut push_bit = |bit: bool, masks: &mut Vec<u32>| {
      mask = (mask << 1) | bit as u32;
      mask_bits += 1;
      if mask_bits == 32 {
        masks.push(mask);
        mask = 0;
        mask_bits = 0;
      }
    };

    let mut index: HashMap<[u8; 3], Vec<usize>> = HashMap::new();
    let mut pos = 0;

    while pos < data.len() {
      let (length, distance) = find_match(data, pos, &index);

      if length >= MIN_MATCH {
        push_bit(false, &mut masks);
        let dist = (distance - 1) as u16;
        if length <= MAX_SHORT_MATCH {
          links.push((((length - 2) as u16) << 12) | dist);
        } else {
          links.push(dist);
          chunks.push((length - 0x12) as u8);
        }
        for p in pos..pos + length {
          remember(data, p, &mut index);
        }
        pos += length;
      } else {
        push_bit(true, &mut masks);
        chunks.push(data[pos]);
        remember(data, pos, &mut index);
        pos += 1;
      }
    }

    if mask_bits > 0 {
      masks.push(mask << (32 - mask_bits));
    }

    let link_offset = YAY0_HEADER_SIZE + masks.len() * 4;
    let chunk_offset = link_offset + links.len() * 2;

    let mut out = Vec::with_capacity(chunk_offset + chunks.len());
    out.extend_from_slice(YAY0_MAGIC);
    out.extend_from_slice(&(data.len() as u32).to_be_bytes());
    out.extend_from_slice(&(link_offset as u32).to_be_bytes());
    out.extend_from_slice(&(chunk_offset as u32).to_be_bytes());
    for m in &masks {
      out.extend_from_slice(&m.to_be_bytes());
    }
    for l in &links {
      out.extend_from_slice(&l.to_be_bytes());
    }
    out.extend_from_slice(&chunks);
    Ok(out)
  }

  fn decompress(&self, data: &[u8], decompressed_size: usize) -> Result<Vec<u8>, CompressError> {
    if data.len() < YAY0_HEADER_SIZE {
      return Err(CompressError::Truncated(data.len()));
    }
    if &data[..4] != YAY0_MAGIC {
      return Err(CompressError::BadMagic);
    }

    let size = be_u32(data, 4)? as usize;
    if size != decompressed_size {
      return Err(CompressError::SizeMismatch {
        expected: size,
        actual: decompressed_size,
      });
    }

    let mut link_pos = be_u32(data, 8)? as usize;
    let mut chunk_pos = be_u32(data, 12)? as usize;
    let mut mask_pos = YAY0_HEADER_SIZE;
    let mut mask = 0u32;
    let mut mask_bits = 0u32;
    let mut out = Vec::with_capacity(size);

    while out.len() < size {
      if mask_bits == 0 {
        mask = be_u32(data, mask_pos)?;
        mask_pos += 4;
        mask_bits = 32;
      }

      if mask & 0x8000_0000 != 0 {
        out.push(byte_at(data, chunk_pos)?);
        chunk_pos += 1;
      } else {
        let link = be_u16(data, link_pos)?;
        link_pos += 2;

        let distance = (link & 0x0FFF) as usize + 1;
        let length = match link >> 12 {
          0 => {
            let extra = byte_at(data, chunk_pos)? as usize;
            chunk_pos += 1;
            extra + 0x12
          }
          n => n as usize + 2,
        };

        if distance > out.len() {
          return Err(CompressError::BadReference {
            distance,
            written: out.len(),
          });
        }
        let start = out.len() - distance;
        for i in 0..length {
          let b = out[start + i];
          out.push(b);
        }
      }

      mask <<= 1;
      mask_bits -= 1;
    }

    out.truncate(size);
    Ok(out)
  }
}

fn find_match(data: &[u8], pos: usize, index: &HashMap<[u8; 3], Vec<usize>>) -> (usize, usize) {
  if pos + MIN_MATCH > data.len() {
    return (0, 0);
  }
  let key = [data[pos], data[pos + 1], data[pos + 2]];
  let Some(candidates) = index.get(&key) else {
    return (0, 0);
  };

  let max_len = MAX_MATCH.min(data.len() - pos);
  let mut best = (0, 0);

  for &start in candidates.iter().rev().take(MAX_CANDIDATES) {
    let distance = pos - start;
    if distance > WINDOW {
      break;
    }
    let mut len = 0;
    while len < max_len && data[start + len] == data[pos + len] {
      len += 1;
    }
    if len > best.0 {
      best = (len, distance);
      if len == max_len {
        break;
      }
    }
  }

  best
}

fn remember(data: &[u8], pos: usize, index: &mut HashMap<[u8; 3], Vec<usize>>) {
  if pos + MIN_MATCH <= data.len() {
    index.entry([data[pos], data[pos + 1], data[pos + 2]]).or_default().push(pos);
  }
}

fn byte_at(data: &[u8], pos: usize) -> Result<u8, CompressError> {
  data.get(pos).copied().ok_or(CompressError::Truncated(pos))
}

fn be_u16(data: &[u8], pos: usize) -> Result<u16, CompressError> {
  match data.get(pos..pos + 2) {
    Some(b) => Ok(u16::from_be_bytes([b[0], b[1]])),
    None => Err(CompressError::Truncated(pos)),
  }
}

fn be_u32(data: &[u8], pos: usize) -> Result<u32, CompressError> {
  match data.get(pos..pos + 4) {
    Some(b) => Ok(u32::from_be_bytes([b[0], b[1], b[2], b[3]])),
    None => Err(CompressError::Truncated(pos)),
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn repetitive(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i % 7) as u8).collect()
  }

  #[test]
  fn compresses_repetitive_data() {
    let data = repetitive(4096);
    let packed = Yay0.compress(&data).unwrap();

    assert!(packed.len() < data.len() / 4);
    assert_eq!(&packed[..4], b"Yay0");
    assert_eq!(Yay0.decompress(&packed, data.len()).unwrap(), data);
  }

  #[test]
  fn handles_long_matches() {
    // a run far longer than the short-match limit exercises the extra length byte
    let mut data = vec![0xAB; 1000];
    data.extend_from_slice(b"tail");
    let packed = Yay0.compress(&data).unwrap();

    assert_eq!(Yay0.decompress(&packed, data.len()).unwrap(), data);
  }

  #[test]
  fn incompressible_data_survives() {
    let mut state = 0x1234_5678u32;
    let data: Vec<u8> = (0..300)
      .map(|_| {
        state ^= state << 13;
        state ^= state >> 17;
        state ^= state << 5;
        state as u8
      })
      .collect();
    let packed = Yay0.compress(&data).unwrap();

    assert_eq!(Yay0.decompress(&packed, data.len()).unwrap(), data);
  }

  #[test]
  fn decompress_rejects_bad_magic() {
    let err = Yay0.decompress(b"Yaz0\0\0\0\x01\0\0\0\x10\0\0\0\x10", 1).unwrap_err();
    assert_eq!(err, CompressError::BadMagic);
  }

  #[test]
  fn decompress_rejects_size_mismatch() {
    let packed = Yay0.compress(&repetitive(100)).unwrap();
    let err = Yay0.decompress(&packed, 99).unwrap_err();
    assert!(matches!(err, CompressError::SizeMismatch { expected: 100, actual: 99 }));
  }
}
