//! Reading across many packfiles at once.

use std::path::{Path, PathBuf};

use tracing::debug;

use crate::error::{Error, Result};
use crate::hash::Hash;
use crate::packfile::PackfileReader;
use crate::stream::BlockSource;

/// An ordered union of open packfile readers. Lookups probe the readers in
/// the order they were added and return the first hit. Not mutated after
/// construction; the readers inside are independently safe for concurrent
/// use.
#[derive(Debug, Default)]
pub struct PackfileCollection {
    readers: Vec<PackfileReader>,
}

impl PackfileCollection {
    pub fn new() -> PackfileCollection {
        PackfileCollection { readers: Vec::new() }
    }

    /// Add an already opened reader.
    pub fn add_reader(&mut self, reader: PackfileReader) {
        self.readers.push(reader);
    }

    /// If `path` is a valid packfile, add it. If it is a directory, every
    /// entry is considered recursively. Files that fail to open as packfiles
    /// are skipped silently.
    pub fn add_path(&mut self, path: &Path) {
        if path.is_dir() {
            let entries = match std::fs::read_dir(path) {
                Ok(entries) => entries,
                Err(e) => {
                    debug!(path = %path.display(), error = %e, "skipping unreadable directory");
                    return;
                }
            };
            // visit in name order so collection contents are deterministic
            let mut children: Vec<PathBuf> = entries.flatten().map(|e| e.path()).collect();
            children.sort();
            for child in children {
                self.add_path(&child);
            }
        } else if path.is_file() {
            match PackfileReader::open(path) {
                Ok(reader) => self.readers.push(reader),
                Err(e) => debug!(path = %path.display(), error = %e, "not a packfile, skipped"),
            }
        }
    }

    /// Number of open packfiles.
    pub fn len(&self) -> usize {
        self.readers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.readers.is_empty()
    }

    /// Read a block by digest, trying every packfile in order until one
    /// returns data.
    pub fn read(&self, hash: &Hash) -> Result<Option<Vec<u8>>> {
        for reader in &self.readers {
            if let Some(data) = reader.read(hash)? {
                return Ok(Some(data));
            }
        }
        Ok(None)
    }

    /// True if any packfile holds the digest.
    pub fn contains(&self, hash: &Hash) -> Result<bool> {
        for reader in &self.readers {
            if reader.find_entry(hash)?.is_some() {
                return Ok(true);
            }
        }
        Ok(false)
    }

    /// First unused path of the form `packNNNN.hdb` in `folder`, counting up
    /// from zero.
    pub fn unused_pack_path(folder: &Path) -> Result<PathBuf> {
        if !folder.is_dir() {
            return Err(Error::InvalidState("provided path is not a folder"));
        }
        let mut pack = 0u32;
        loop {
            let candidate = folder.join(format!("pack{pack:04}.hdb"));
            if !candidate.exists() {
                return Ok(candidate);
            }
            pack += 1;
        }
    }
}

impl BlockSource for PackfileCollection {
    fn get_block(&mut self, hash: &Hash) -> Result<Option<Vec<u8>>> {
        self.read(hash)
    }
}

impl BlockSource for &PackfileCollection {
    fn get_block(&mut self, hash: &Hash) -> Result<Option<Vec<u8>>> {
        self.read(hash)
    }
}
