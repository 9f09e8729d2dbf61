//! Payload compression.
//!
//! Blocks are stored either raw or as a zlib stream. Before spending time in
//! the compressor, [`encode`] runs a cheap order-1 predictability probe over
//! the input; inputs that look incompressible are stored raw outright. A
//! compression attempt that expands the data (or merely breaks even) is also
//! discarded in favour of a raw copy, so the encoded form is never larger
//! than the input.

use std::io::{Read, Write};

use flate2::read::ZlibDecoder;
use flate2::write::ZlibEncoder;
use flate2::Compression;

use crate::error::{Error, Result};

/// Fraction of bytes the order-1 model must predict for an input to be
/// considered worth compressing.
pub const COMPRESSIBILITY_THRESHOLD: f32 = 0.20;

/// Fast zlib level, used when blocks are written in bulk.
pub const FAST_LEVEL: u32 = 1;
/// Best zlib level, used when a block is compressed exactly once.
pub const BEST_LEVEL: u32 = 9;

/// How a stored payload is encoded on disk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Encoding {
    Raw,
    Zlib,
}

impl Encoding {
    /// 8-byte packfile encoding tag.
    pub fn tag64(self) -> u64 {
        match self {
            Encoding::Raw => 0,
            Encoding::Zlib => 0x0000_0000_5A4C_4942, // "\0\0\0\0ZLIB"
        }
    }

    /// 4-byte append-only record encoding tag.
    pub fn tag32(self) -> u32 {
        match self {
            Encoding::Raw => 0,
            Encoding::Zlib => 0x5A4C_4942, // "ZLIB"
        }
    }

    pub fn from_tag64(tag: u64) -> Option<Encoding> {
        match tag {
            0 => Some(Encoding::Raw),
            0x0000_0000_5A4C_4942 => Some(Encoding::Zlib),
            _ => None,
        }
    }

    pub fn from_tag32(tag: u32) -> Option<Encoding> {
        match tag {
            0 => Some(Encoding::Raw),
            0x5A4C_4942 => Some(Encoding::Zlib),
            _ => None,
        }
    }
}

/// Guess whether `data` is compressible by predicting each byte from the one
/// that last followed the same context byte. A false result does not prove
/// the data is incompressible, only that it is not worth the attempt.
pub fn likely_compressible(data: &[u8], threshold: f32) -> bool {
    if data.is_empty() {
        return false;
    }
    let mut prediction = [0u8; 256];
    let mut context: u8 = 0;
    let mut hits = 0usize;
    for &input in data {
        if prediction[context as usize] == input {
            hits += 1;
        }
        prediction[context as usize] = input;
        context = input;
    }
    hits as f32 / data.len() as f32 >= threshold
}

/// Encode `data` for storage. Returns the encoding actually used and the
/// encoded bytes. The result is raw whenever the probe vetoes the attempt,
/// the compressor fails, or zlib fails to shrink the input.
pub fn encode(level: u32, data: &[u8]) -> (Encoding, Vec<u8>) {
    if !likely_compressible(data, COMPRESSIBILITY_THRESHOLD) {
        return (Encoding::Raw, data.to_vec());
    }
    let mut encoder = ZlibEncoder::new(Vec::with_capacity(data.len()), Compression::new(level));
    let compressed = encoder.write_all(data).and_then(|_| encoder.finish());
    match compressed {
        Ok(out) if out.len() < data.len() => (Encoding::Zlib, out),
        _ => (Encoding::Raw, data.to_vec()),
    }
}

/// Inflate a complete zlib stream that must decode to exactly `raw_length`
/// bytes. Malformed input and any length mismatch fail with a recoverable
/// [`Error::NotDecodable`].
pub fn decode(data: &[u8], raw_length: usize) -> Result<Vec<u8>> {
    let mut out = Vec::with_capacity(raw_length);
    let mut decoder = ZlibDecoder::new(data).take(raw_length as u64 + 1);
    decoder
        .read_to_end(&mut out)
        .map_err(|e| Error::NotDecodable(format!("zlib inflate failed: {e}")))?;
    if out.len() != raw_length {
        return Err(Error::NotDecodable(format!(
            "decoded {} bytes, expected {}",
            out.len(),
            raw_length
        )));
    }
    Ok(out)
}
