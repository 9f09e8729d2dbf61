//! Append-only single-file block repository.
//!
//! Blocks are appended to one file as they arrive and located through an
//! in-memory index rebuilt on every open. Durability is marked by explicit
//! commit records:
//!
//! ```text
//! BlockRecord
//! {
//!     byte[8]  magic = "BLOCKHDR";
//!     byte[32] digest;            // SHA3-256 of the payload
//!     byte[4]  encoding;          // 0 = raw, "ZLIB" = zlib
//!     uint16   raw_length;
//!     uint16   encoded_length;    // must be <= raw_length
//!     byte[encoded_length] payload;
//! }
//! CommitRecord
//! {
//!     byte[8]  magic = "FSYNCEND";
//! }
//! ```
//!
//! A repository file is any concatenation of these records that ends with a
//! commit record. Blocks written after the last commit record are not yet
//! durable: the recovery scan on open indexes a block only once a commit
//! record follows it, and a writable open truncates everything past the
//! last commit. Records in an encoding this implementation does not
//! understand are left in place but not indexed, as if absent.
//!
//! Every public operation takes the one operation lock, so nothing proceeds
//! concurrently within a single instance.

use std::fs::{File, OpenOptions};
use std::io::{self, BufReader, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use byteorder::{BigEndian, ReadBytesExt};
use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::codec::{self, Encoding};
use crate::error::{Error, Result};
use crate::hash::{self, Hash, HASH_SIZE};
use crate::index::ByteTrie;
use crate::stream::{BlockSink, BlockSource};

/// Magic opening every block record.
pub const BLOCK_MAGIC: [u8; 8] = *b"BLOCKHDR";
/// Magic of a commit record.
pub const COMMIT_MAGIC: [u8; 8] = *b"FSYNCEND";
/// Size of a block record header; the payload starts here.
pub const BLOCK_HEADER_SIZE: u64 = 48;
/// Largest payload one block record can carry.
pub const MAX_BLOCK_SIZE: usize = 65_535;

/// Where a committed block's payload lives in the file.
#[derive(Debug, Clone, Copy)]
struct BlockLocation {
    payload_offset: u64,
    encoding: Encoding,
    raw_length: u16,
    encoded_length: u16,
}

#[derive(Debug)]
struct Inner {
    /// `None` once the repository is closed, by request or by a failed write.
    file: Option<File>,
    index: ByteTrie<BlockLocation>,
    /// File offset just past the last commit record. Data after it is not
    /// yet durable; new commit records land at the file's end.
    last_commit: u64,
}

/// A file-backed repository for content-addressed blocks. Safe for use from
/// multiple threads; operations are serialized by a single mutex and never
/// proceed concurrently.
#[derive(Debug)]
pub struct Repository {
    inner: Mutex<Inner>,
    path: PathBuf,
    read_only: bool,
}

impl Repository {
    /// Open a repository file, creating it when `writable` and absent. On a
    /// writable open, anything after the last commit record is truncated
    /// away before the repository is handed out.
    pub fn open(path: &Path, writable: bool) -> Result<Repository> {
        let not_found = |e: io::Error| match e.kind() {
            io::ErrorKind::NotFound => Error::NotFound(path.display().to_string()),
            _ => Error::Io(e),
        };
        let mut file = if writable {
            OpenOptions::new()
                .read(true)
                .write(true)
                .create(true)
                .open(path)
                .map_err(not_found)?
        } else {
            File::open(path).map_err(not_found)?
        };
        let (index, last_commit) = recover(&mut file)?;
        if writable {
            file.set_len(last_commit)?;
            file.sync_data()?;
        }
        debug!(
            path = %path.display(),
            blocks = index.len(),
            committed_bytes = last_commit,
            writable,
            "repository opened"
        );
        Ok(Repository {
            inner: Mutex::new(Inner { file: Some(file), index, last_commit }),
            path: path.to_path_buf(),
            read_only: !writable,
        })
    }

    /// Write a block of at most 65 535 bytes and return its digest. A block
    /// already present is not written again. The data is not durable until
    /// a later [`Repository::sync`]; if writing fails the repository closes
    /// and the failure is surfaced, since its state is then indeterminate.
    pub fn write(&self, data: &[u8]) -> Result<Hash> {
        if data.len() > MAX_BLOCK_SIZE {
            return Err(Error::InvalidState("block larger than 65535 bytes"));
        }
        if self.read_only {
            return Err(Error::InvalidState("repository is read-only"));
        }
        let hash = hash::digest(data);
        let mut guard = self.inner.lock();
        let inner = &mut *guard;
        let file = match inner.file.as_mut() {
            Some(file) => file,
            None => return Err(Error::InvalidState("repository is closed")),
        };
        if inner.index.contains_key(&hash) {
            // already in index and file, nothing to write
            return Ok(hash);
        }

        // compressed exactly once, so spend the effort
        let (encoding, encoded) = codec::encode(codec::BEST_LEVEL, data);
        let mut record = Vec::with_capacity(BLOCK_HEADER_SIZE as usize + encoded.len());
        record.extend_from_slice(&BLOCK_MAGIC);
        record.extend_from_slice(&hash);
        record.extend_from_slice(&encoding.tag32().to_be_bytes());
        record.extend_from_slice(&(data.len() as u16).to_be_bytes());
        record.extend_from_slice(&(encoded.len() as u16).to_be_bytes());
        record.extend_from_slice(&encoded);

        let outcome = (|| -> io::Result<u64> {
            let end = file.seek(SeekFrom::End(0))?;
            file.write_all(&record)?;
            Ok(end + BLOCK_HEADER_SIZE)
        })();
        match outcome {
            Ok(payload_offset) => {
                let location = BlockLocation {
                    payload_offset,
                    encoding,
                    raw_length: data.len() as u16,
                    encoded_length: encoded.len() as u16,
                };
                inner.index.insert(&hash, location);
                Ok(hash)
            }
            Err(e) => {
                inner.file = None;
                Err(self.classify_write_error(e))
            }
        }
    }

    /// Read a block by digest, `None` if it is not indexed. A payload that
    /// fails to decode surfaces a recoverable error and leaves the
    /// repository open.
    pub fn read(&self, hash: &Hash) -> Result<Option<Vec<u8>>> {
        let mut guard = self.inner.lock();
        let inner = &mut *guard;
        let location = match inner.index.get(hash) {
            Some(location) => *location,
            None => return Ok(None),
        };
        let file = match inner.file.as_mut() {
            Some(file) => file,
            None => return Err(Error::InvalidState("repository is closed")),
        };
        let mut encoded = vec![0u8; location.encoded_length as usize];
        let outcome = (|| -> io::Result<()> {
            file.seek(SeekFrom::Start(location.payload_offset))?;
            file.read_exact(&mut encoded)
        })();
        if let Err(e) = outcome {
            inner.file = None;
            return Err(Error::Io(e));
        }
        match location.encoding {
            Encoding::Raw => Ok(Some(encoded)),
            Encoding::Zlib => codec::decode(&encoded, location.raw_length as usize)
                .map(Some)
                .map_err(|e| match e {
                    Error::NotDecodable(msg) => {
                        Error::NotDecodable(format!("block {}: {msg}", hash::to_hex(hash)))
                    }
                    other => other,
                }),
        }
    }

    /// True if the digest is indexed.
    pub fn contains(&self, hash: &Hash) -> bool {
        self.inner.lock().index.contains_key(hash)
    }

    /// Number of indexed blocks.
    pub fn len(&self) -> usize {
        self.inner.lock().index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Persist all written blocks: a commit record is appended and the file
    /// forced to non-volatile storage. No-op when nothing was written since
    /// the last commit.
    pub fn sync(&self) -> Result<()> {
        if self.read_only {
            return Err(Error::InvalidState("repository is read-only"));
        }
        let mut guard = self.inner.lock();
        let inner = &mut *guard;
        let file = match inner.file.as_mut() {
            Some(file) => file,
            None => return Err(Error::InvalidState("repository is closed")),
        };
        match commit(file, &mut inner.last_commit) {
            Ok(()) => Ok(()),
            Err(e) => {
                inner.file = None;
                Err(self.classify_write_error(e))
            }
        }
    }

    /// Close the repository. A writable repository commits written data
    /// first, so everything accepted so far becomes durable.
    pub fn close(&self) -> Result<()> {
        let mut guard = self.inner.lock();
        let inner = &mut *guard;
        let outcome = match inner.file.as_mut() {
            None => return Ok(()),
            Some(_) if self.read_only => Ok(()),
            Some(file) => commit(file, &mut inner.last_commit),
        };
        inner.file = None;
        outcome.map_err(|e| self.classify_write_error(e))
    }

    /// Probe the environment for why a write-side operation failed. A full
    /// device is the common cause; anything else while space remains is
    /// attributed to a backend limit, the best reason available.
    fn classify_write_error(&self, cause: io::Error) -> Error {
        warn!(path = %self.path.display(), error = %cause, "repository write failed, closing");
        if !self.path.exists() {
            return Error::NotFound(self.path.display().to_string());
        }
        match fs4::available_space(&self.path) {
            Ok(space) if space < MAX_BLOCK_SIZE as u64 => Error::NoSpace,
            Ok(_) => Error::BackendLimit,
            Err(_) => Error::Io(cause),
        }
    }
}

/// Append a commit record and force durability. Skips the write when the
/// file already ends at the last commit.
fn commit(file: &mut File, last_commit: &mut u64) -> io::Result<()> {
    let end = file.seek(SeekFrom::End(0))?;
    if end == *last_commit {
        return Ok(());
    }
    file.write_all(&COMMIT_MAGIC)?;
    file.sync_data()?;
    *last_commit = end + COMMIT_MAGIC.len() as u64;
    Ok(())
}

/// Scan the file record by record, building the index. Blocks enter the
/// index only when a commit record follows them; the scan stops at the
/// first byte that is neither record type, at an implausible header, or at
/// end of file. Returns the index and the offset just past the last commit
/// record.
fn recover(file: &mut File) -> Result<(ByteTrie<BlockLocation>, u64)> {
    let size = file.metadata()?.len();
    let mut index = ByteTrie::new();
    let mut pending: Vec<(Hash, BlockLocation)> = Vec::new();
    let mut last_commit = 0u64;
    let mut pos = 0u64;

    file.seek(SeekFrom::Start(0))?;
    let mut reader = BufReader::new(file);

    while pos + 8 <= size {
        let mut magic = [0u8; 8];
        reader.read_exact(&mut magic)?;

        if magic == COMMIT_MAGIC {
            for (hash, location) in pending.drain(..) {
                index.insert(&hash, location);
            }
            pos += 8;
            last_commit = pos;
            continue;
        }

        if magic == BLOCK_MAGIC && pos + BLOCK_HEADER_SIZE <= size {
            let mut hash = [0u8; HASH_SIZE];
            reader.read_exact(&mut hash)?;
            let encoding_tag = reader.read_u32::<BigEndian>()?;
            let raw_length = reader.read_u16::<BigEndian>()?;
            let encoded_length = reader.read_u16::<BigEndian>()?;
            if raw_length < encoded_length {
                // lengths are not sensible, treat as tail corruption
                break;
            }
            match Encoding::from_tag32(encoding_tag) {
                Some(encoding) => pending.push((
                    hash,
                    BlockLocation {
                        payload_offset: pos + BLOCK_HEADER_SIZE,
                        encoding,
                        raw_length,
                        encoded_length,
                    },
                )),
                // not an error, but the block is not indexed and will be
                // rewritten in a known encoding if requested again
                None => debug!(
                    block = %hash::to_hex(&hash),
                    tag = encoding_tag,
                    "unknown encoding during recovery, block skipped"
                ),
            }
            pos += BLOCK_HEADER_SIZE + encoded_length as u64;
            if pos > size {
                break;
            }
            reader.seek(SeekFrom::Start(pos))?;
            continue;
        }

        // data here isn't known
        break;
    }
    // anything still pending was never committed and is discarded
    Ok((index, last_commit))
}

impl BlockSink for Repository {
    fn put_block(&mut self, data: &[u8]) -> Result<Hash> {
        self.write(data)
    }
}

impl BlockSink for &Repository {
    fn put_block(&mut self, data: &[u8]) -> Result<Hash> {
        self.write(data)
    }
}

impl BlockSource for Repository {
    fn get_block(&mut self, hash: &Hash) -> Result<Option<Vec<u8>>> {
        self.read(hash)
    }
}

impl BlockSource for &Repository {
    fn get_block(&mut self, hash: &Hash) -> Result<Option<Vec<u8>>> {
        self.read(hash)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn write_read_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("blocks.repo");
        let repo = Repository::open(&path, true).unwrap();
        let hash = repo.write(b"some block data").unwrap();
        assert_eq!(repo.read(&hash).unwrap().unwrap(), b"some block data");
        assert!(repo.contains(&hash));
        repo.close().unwrap();
    }

    #[test]
    fn duplicate_write_returns_same_hash_without_growth() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("blocks.repo");
        let repo = Repository::open(&path, true).unwrap();
        let first = repo.write(b"dup").unwrap();
        repo.sync().unwrap();
        let len_after_first = std::fs::metadata(&path).unwrap().len();
        let second = repo.write(b"dup").unwrap();
        repo.sync().unwrap();
        assert_eq!(first, second);
        assert_eq!(std::fs::metadata(&path).unwrap().len(), len_after_first);
        repo.close().unwrap();
    }

    #[test]
    fn oversize_block_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("blocks.repo");
        let repo = Repository::open(&path, true).unwrap();
        assert!(repo.write(&vec![0u8; MAX_BLOCK_SIZE]).is_ok());
        let err = repo.write(&vec![0u8; MAX_BLOCK_SIZE + 1]).unwrap_err();
        assert!(matches!(err, Error::InvalidState(_)));
        repo.close().unwrap();
    }

    #[test]
    fn read_only_rejects_writes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("blocks.repo");
        {
            let repo = Repository::open(&path, true).unwrap();
            repo.write(b"seed").unwrap();
            repo.close().unwrap();
        }
        let repo = Repository::open(&path, false).unwrap();
        assert!(matches!(repo.write(b"nope"), Err(Error::InvalidState(_))));
        assert!(matches!(repo.sync(), Err(Error::InvalidState(_))));
        repo.close().unwrap();
    }

    #[test]
    fn closed_repository_rejects_operations() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("blocks.repo");
        let repo = Repository::open(&path, true).unwrap();
        let hash = repo.write(b"data").unwrap();
        repo.close().unwrap();
        assert!(matches!(repo.write(b"more"), Err(Error::InvalidState(_))));
        assert!(matches!(repo.read(&hash), Err(Error::InvalidState(_))));
    }

    #[test]
    fn sync_without_new_data_is_a_noop() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("blocks.repo");
        let repo = Repository::open(&path, true).unwrap();
        repo.write(b"x").unwrap();
        repo.sync().unwrap();
        let len = std::fs::metadata(&path).unwrap().len();
        repo.sync().unwrap();
        assert_eq!(std::fs::metadata(&path).unwrap().len(), len);
        repo.close().unwrap();
    }

    #[test]
    fn empty_repository_opens_and_finds_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("blocks.repo");
        let repo = Repository::open(&path, true).unwrap();
        assert!(repo.is_empty());
        assert_eq!(repo.read(&hash::digest(b"anything")).unwrap(), None);
        repo.close().unwrap();
        assert_eq!(std::fs::metadata(&path).unwrap().len(), 0);
    }
}
