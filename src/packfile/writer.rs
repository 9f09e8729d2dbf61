//! Packfile assembly.

use std::collections::BTreeMap;
use std::fs::OpenOptions;
use std::io::{BufWriter, Write};
use std::path::Path;

use byteorder::{BigEndian, WriteBytesExt};

use crate::codec;
use crate::error::{Error, Result};
use crate::hash::{self, Hash};
use crate::packfile::{round_up64, PackEntry, HEADER_MAGIC, HEADER_SIZE, MAX_BLOCK_SIZE};
use crate::stream::BlockSink;

/// Accumulates deduplicated blocks in memory and serializes them to a new
/// packfile. Blocks are compressed on the way in; identical payloads share
/// one on-disk copy. Single-threaded by design.
///
/// ```no_run
/// use hoard::PackfileWriter;
///
/// let mut writer = PackfileWriter::new();
/// let hash = writer.write(b"Hello, world!")?;
/// writer.dump("blocks.hdb".as_ref())?;
/// # let _ = hash;
/// # Ok::<(), hoard::Error>(())
/// ```
#[derive(Debug, Default)]
pub struct PackfileWriter {
    /// Digest-ordered so serialization emits a sorted block table directly.
    entries: BTreeMap<Hash, PackEntry>,
    /// Encoded payloads, laid out exactly as the data area will be.
    data: Vec<u8>,
}

impl PackfileWriter {
    pub fn new() -> PackfileWriter {
        PackfileWriter { entries: BTreeMap::new(), data: Vec::new() }
    }

    /// Number of distinct blocks accumulated.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains(&self, hash: &Hash) -> bool {
        self.entries.contains_key(hash)
    }

    /// Write a block, returning its digest. A block already present is not
    /// stored again; the digest is returned without reserving payload space.
    pub fn write(&mut self, data: &[u8]) -> Result<Hash> {
        if data.len() > MAX_BLOCK_SIZE {
            return Err(Error::InvalidState("block larger than 65535 bytes"));
        }
        let hash = hash::digest(data);
        if self.entries.contains_key(&hash) {
            return Ok(hash);
        }
        let payload_offset = self.data.len() as u64;
        let (encoding, encoded) = codec::encode(codec::FAST_LEVEL, data);
        let entry = PackEntry {
            hash,
            encoding_tag: encoding.tag64(),
            raw_length: data.len() as u32,
            encoded_length: encoded.len() as u32,
            payload_offset,
        };
        self.data.extend_from_slice(&encoded);
        self.entries.insert(hash, entry);
        Ok(hash)
    }

    /// Serialize to a new file at `path`. Fails if the file already exists;
    /// the writer is left intact either way.
    pub fn dump(&self, path: &Path) -> Result<()> {
        if self.entries.len() as u64 > i32::MAX as u64 {
            return Err(Error::BackendLimit);
        }
        let file = OpenOptions::new().write(true).create_new(true).open(path)?;
        let mut out = BufWriter::new(file);

        let blocktable_start = round_up64(HEADER_SIZE + self.data.len() as u64);

        // header
        out.write_all(&HEADER_MAGIC)?;
        out.write_i64::<BigEndian>(blocktable_start as i64)?;
        out.write_i32::<BigEndian>(self.entries.len() as i32)?;
        out.write_all(&[0u8; 44])?;

        // data area, zero-padded to the 64-byte boundary the table sits on
        out.write_all(&self.data)?;
        let padding = blocktable_start - HEADER_SIZE - self.data.len() as u64;
        out.write_all(&[0u8; 64][..padding as usize])?;

        // block table, ascending by digest
        for entry in self.entries.values() {
            entry.write_to(&mut out)?;
        }
        out.flush()?;
        Ok(())
    }
}

impl BlockSink for PackfileWriter {
    fn put_block(&mut self, data: &[u8]) -> Result<Hash> {
        self.write(data)
    }
}
