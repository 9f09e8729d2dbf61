//! Packfile lookup and decoding.

use std::cell::RefCell;
use std::cmp::Ordering;
use std::collections::HashMap;
use std::fs::File;
use std::io;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};

use byteorder::{BigEndian, ReadBytesExt};

use crate::codec::{self, Encoding};
use crate::error::{Error, Result};
use crate::hash::{self, Hash};
use crate::packfile::{PackEntry, ENTRY_SIZE, HEADER_MAGIC, HEADER_SIZE};
use crate::stream::BlockSource;

/// Slots in the per-thread direct-mapped entry cache.
const CACHE_SLOTS: usize = 1 << 16;
const CACHE_MASK: u64 = CACHE_SLOTS as u64 - 1;

type CacheSlots = Box<[Option<(u64, PackEntry)>]>;

thread_local! {
    /// Entry caches for every reader this thread has probed, keyed by reader
    /// id. Never shared across threads; a reader drops its own thread's
    /// slots on drop, the rest go when their threads exit.
    static ENTRY_CACHES: RefCell<HashMap<u64, CacheSlots>> = RefCell::new(HashMap::new());
}

static NEXT_READER_ID: AtomicU64 = AtomicU64::new(0);

/// A reader over one packfile. Blocks may be requested by digest or
/// enumerated. All operations use positional reads and the only mutable
/// state is per-thread, so instances are safe for concurrent use.
pub struct PackfileReader {
    file: File,
    file_size: u64,
    blocktable_start: u64,
    blocktable_length: u64,
    cache_id: u64,
}

impl PackfileReader {
    /// Open and validate a packfile. Checks are basic for speed: magic,
    /// non-negative header fields, and a block table ending exactly at end
    /// of file.
    pub fn open(path: &Path) -> Result<PackfileReader> {
        let file = File::open(path).map_err(|e| match e.kind() {
            io::ErrorKind::NotFound => Error::NotFound(path.display().to_string()),
            _ => Error::Io(e),
        })?;
        let file_size = file.metadata()?.len();
        if file_size < HEADER_SIZE {
            return Err(Error::format("file too small to hold a packfile header"));
        }
        let mut header = [0u8; HEADER_SIZE as usize];
        read_exact_at(&file, &mut header, 0)?;
        if header[..8] != HEADER_MAGIC {
            return Err(Error::format("incorrect magic value"));
        }
        let mut fields = &header[8..];
        let blocktable_start = fields.read_i64::<BigEndian>()?;
        let blocktable_length = fields.read_i32::<BigEndian>()?;
        if blocktable_start < 0 {
            return Err(Error::format("block table offset is negative"));
        }
        if blocktable_length < 0 {
            return Err(Error::format("block table length is negative"));
        }
        let blocktable_start = blocktable_start as u64;
        let blocktable_length = blocktable_length as u64;
        if blocktable_start < HEADER_SIZE
            || blocktable_start + blocktable_length * ENTRY_SIZE != file_size
        {
            return Err(Error::format("block table does not end at end of file"));
        }
        Ok(PackfileReader {
            file,
            file_size,
            blocktable_start,
            blocktable_length,
            cache_id: NEXT_READER_ID.fetch_add(1, AtomicOrdering::Relaxed),
        })
    }

    /// Number of entries in the block table.
    pub fn blocktable_length(&self) -> u64 {
        self.blocktable_length
    }

    /// Read the block with the given digest, decoding the payload. The data
    /// is trusted as stored; it is not re-hashed on the way out.
    pub fn read(&self, hash: &Hash) -> Result<Option<Vec<u8>>> {
        match self.find_entry(hash)? {
            None => Ok(None),
            Some(entry) => self.read_entry_payload(&entry, true).map(Some),
        }
    }

    /// True if the block table holds the digest.
    pub fn contains(&self, hash: &Hash) -> bool {
        matches!(self.find_entry(hash), Ok(Some(_)))
    }

    /// Binary-search the block table for a digest.
    pub fn find_entry(&self, hash: &Hash) -> Result<Option<PackEntry>> {
        if self.blocktable_length == 0 {
            return Ok(None);
        }
        // Classical binary search, bounds inclusive. The exits sit in the
        // comparison arms so neither bound can leave the table.
        let mut low = 0u64;
        let mut high = self.blocktable_length - 1;
        loop {
            let mid = low + (high - low) / 2;
            let mid_entry = self.entry_at(mid)?;
            match hash::compare(hash, &mid_entry.hash) {
                Ordering::Greater => {
                    if mid == high {
                        return Ok(None);
                    }
                    low = mid + 1;
                }
                Ordering::Less => {
                    if mid == low {
                        return Ok(None);
                    }
                    high = mid - 1;
                }
                Ordering::Equal => return Ok(Some(mid_entry)),
            }
        }
    }

    /// Sequentially yield the block table. Entries with an encoding this
    /// implementation does not understand are skipped.
    pub fn enumerate(&self) -> Entries<'_> {
        Entries { reader: self, index: 0 }
    }

    /// Fetch the payload for an entry. With `decode` false the encoded bytes
    /// are returned as stored.
    pub fn read_entry_payload(&self, entry: &PackEntry, decode: bool) -> Result<Vec<u8>> {
        let position = HEADER_SIZE + entry.payload_offset;
        if position + entry.encoded_length as u64 > self.file_size {
            return Err(Error::format("payload offset exceeds size of file"));
        }
        let mut encoded = vec![0u8; entry.encoded_length as usize];
        read_exact_at(&self.file, &mut encoded, position)?;
        if !decode {
            return Ok(encoded);
        }
        match entry.encoding() {
            Some(Encoding::Raw) => Ok(encoded),
            Some(Encoding::Zlib) => codec::decode(&encoded, entry.raw_length as usize),
            None => Err(Error::NotDecodable(format!(
                "unknown encoding tag {:#018X} for block {}",
                entry.encoding_tag,
                hash::to_hex(&entry.hash)
            ))),
        }
    }

    /// Load the entry at a table index, through this thread's cache. The
    /// cache is direct-mapped on the low 16 index bits and allocated lazily
    /// on a thread's first probe.
    fn entry_at(&self, index: u64) -> Result<PackEntry> {
        let slot = (index & CACHE_MASK) as usize;
        let cached = ENTRY_CACHES.with(|caches| {
            let caches = caches.borrow();
            caches.get(&self.cache_id).and_then(|slots| match &slots[slot] {
                Some((cached_index, entry)) if *cached_index == index => Some(entry.clone()),
                _ => None,
            })
        });
        if let Some(entry) = cached {
            return Ok(entry);
        }

        let mut buf = [0u8; ENTRY_SIZE as usize];
        read_exact_at(&self.file, &mut buf, self.blocktable_start + index * ENTRY_SIZE)?;
        let entry = PackEntry::read_from(&mut buf.as_slice())?;

        ENTRY_CACHES.with(|caches| {
            let mut caches = caches.borrow_mut();
            let slots = caches
                .entry(self.cache_id)
                .or_insert_with(|| vec![None; CACHE_SLOTS].into_boxed_slice());
            slots[slot] = Some((index, entry.clone()));
        });
        Ok(entry)
    }
}

impl Drop for PackfileReader {
    fn drop(&mut self) {
        // Frees this thread's slots; other threads reclaim theirs on exit.
        let _ = ENTRY_CACHES.try_with(|caches| {
            caches.borrow_mut().remove(&self.cache_id);
        });
    }
}

impl std::fmt::Debug for PackfileReader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PackfileReader")
            .field("file_size", &self.file_size)
            .field("blocktable_length", &self.blocktable_length)
            .finish()
    }
}

impl BlockSource for PackfileReader {
    fn get_block(&mut self, hash: &Hash) -> Result<Option<Vec<u8>>> {
        self.read(hash)
    }
}

impl BlockSource for &PackfileReader {
    fn get_block(&mut self, hash: &Hash) -> Result<Option<Vec<u8>>> {
        self.read(hash)
    }
}

/// Iterator over a packfile's block table.
pub struct Entries<'a> {
    reader: &'a PackfileReader,
    index: u64,
}

impl Iterator for Entries<'_> {
    type Item = Result<PackEntry>;

    fn next(&mut self) -> Option<Self::Item> {
        while self.index < self.reader.blocktable_length {
            let index = self.index;
            self.index += 1;
            match self.reader.entry_at(index) {
                Ok(entry) if entry.encoding().is_some() => return Some(Ok(entry)),
                Ok(_) => continue, // unknown encoding, skip
                Err(e) => return Some(Err(e)),
            }
        }
        None
    }
}

#[cfg(unix)]
fn read_exact_at(file: &File, buf: &mut [u8], offset: u64) -> io::Result<()> {
    use std::os::unix::fs::FileExt;
    file.read_exact_at(buf, offset)
}

#[cfg(windows)]
fn read_exact_at(file: &File, mut buf: &mut [u8], mut offset: u64) -> io::Result<()> {
    use std::os::windows::fs::FileExt;
    while !buf.is_empty() {
        match file.seek_read(buf, offset) {
            Ok(0) => {
                return Err(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    "unexpected end of file",
                ))
            }
            Ok(n) => {
                let rest = buf;
                buf = &mut rest[n..];
                offset += n as u64;
            }
            Err(ref e) if e.kind() == io::ErrorKind::Interrupted => {}
            Err(e) => return Err(e),
        }
    }
    Ok(())
}
