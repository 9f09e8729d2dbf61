//! Packfiles: immutable containers bundling many deduplicated blocks.
//!
//! On-disk layout, all integers big-endian:
//!
//! ```text
//! File
//! {
//!     // Header, 64 bytes
//!     byte[8]  magic = "Hoard v1";
//!     int64    blocktable_start;     // absolute offset of the block table
//!     int32    blocktable_length;    // number of entries
//!     byte[44] reserved = 0;
//!     // Data area: concatenated encoded payloads, zero-padded to the next
//!     // 64-byte boundary. Entry payload offsets are relative to offset 64.
//!     byte[]   data_area;
//!     // Block table: blocktable_length entries sorted ascending by digest,
//!     // ending exactly at end of file.
//!     Entry[blocktable_length] blocktable;
//! }
//!
//! Entry, 64 bytes
//! {
//!     byte[32] digest;
//!     byte[8]  encoding;             // 0 = raw, 0x..5A4C4942 = "ZLIB"
//!     int32    raw_length;
//!     int32    encoded_length;       // must be <= raw_length
//!     int64    payload_offset;       // from the end of the header
//!     byte[8]  reserved = 0;
//! }
//! ```

pub mod collection;
pub mod reader;
pub mod writer;

pub use collection::PackfileCollection;
pub use reader::PackfileReader;
pub use writer::PackfileWriter;

use std::io::{Read, Write};
use std::path::Path;

use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};

use crate::codec::Encoding;
use crate::error::{Error, Result};
use crate::hash::{Hash, HASH_SIZE};

/// Magic at offset 0 of every packfile.
pub const HEADER_MAGIC: [u8; 8] = *b"Hoard v1";
/// Header size in bytes; the data area starts here.
pub const HEADER_SIZE: u64 = 64;
/// Size of one block table entry.
pub const ENTRY_SIZE: u64 = 64;
/// Largest block a packfile will accept.
pub const MAX_BLOCK_SIZE: usize = 65_535;

/// Round up to the next multiple of 64.
pub fn round_up64(n: u64) -> u64 {
    (n + 63) & !63
}

/// A parsed block table entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackEntry {
    pub hash: Hash,
    /// Raw 8-byte encoding tag. Unknown tags survive parsing so callers can
    /// skip or report them; [`PackEntry::encoding`] resolves the known ones.
    pub encoding_tag: u64,
    pub raw_length: u32,
    pub encoded_length: u32,
    pub payload_offset: u64,
}

impl PackEntry {
    pub fn encoding(&self) -> Option<Encoding> {
        Encoding::from_tag64(self.encoding_tag)
    }

    /// Parse a 64-byte entry, validating the length and offset invariants.
    pub fn read_from<R: Read>(reader: &mut R) -> Result<PackEntry> {
        let mut hash = [0u8; HASH_SIZE];
        reader.read_exact(&mut hash)?;
        let encoding_tag = reader.read_u64::<BigEndian>()?;
        let raw_length = reader.read_i32::<BigEndian>()?;
        let encoded_length = reader.read_i32::<BigEndian>()?;
        let payload_offset = reader.read_i64::<BigEndian>()?;
        let mut reserved = [0u8; 8];
        reader.read_exact(&mut reserved)?;

        if raw_length < 0 || encoded_length < 0 {
            return Err(Error::format("entry length is negative"));
        }
        if encoded_length > raw_length {
            return Err(Error::format("encoded length exceeds raw length"));
        }
        if payload_offset < 0 {
            return Err(Error::format("payload offset is negative"));
        }
        Ok(PackEntry {
            hash,
            encoding_tag,
            raw_length: raw_length as u32,
            encoded_length: encoded_length as u32,
            payload_offset: payload_offset as u64,
        })
    }

    /// Serialize as a 64-byte entry.
    pub fn write_to<W: Write>(&self, writer: &mut W) -> Result<()> {
        writer.write_all(&self.hash)?;
        writer.write_u64::<BigEndian>(self.encoding_tag)?;
        writer.write_i32::<BigEndian>(self.raw_length as i32)?;
        writer.write_i32::<BigEndian>(self.encoded_length as i32)?;
        writer.write_i64::<BigEndian>(self.payload_offset as i64)?;
        writer.write_all(&[0u8; 8])?;
        Ok(())
    }
}

/// Merge the packfiles at `sources` into a single new packfile at `dest`.
///
/// Every decodable block from every source is re-encoded through a fresh
/// writer, so duplicates across sources collapse to one copy. Enough memory
/// to hold all encoded payloads is required. On failure the partially
/// written destination is removed.
pub fn merge<P: AsRef<Path>>(dest: &Path, sources: &[P]) -> Result<()> {
    let outcome = (|| {
        let mut writer = PackfileWriter::new();
        for source in sources {
            let reader = PackfileReader::open(source.as_ref())?;
            for entry in reader.enumerate() {
                let entry = entry?;
                let payload = reader.read_entry_payload(&entry, true)?;
                writer.write(&payload)?;
            }
        }
        writer.dump(dest)
    })();
    if outcome.is_err() {
        let _ = std::fs::remove_file(dest);
    }
    outcome
}
