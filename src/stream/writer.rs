//! Superblock tree construction over a byte stream.

use std::io::{self, Write};

use crate::chunker::Chunker;
use crate::error::{Error, Result};
use crate::hash::Hash;
use crate::stream::{BlockSink, MAX_FANOUT, MAX_LEVELS, SUPERBLOCK_HEADER_SIZE, SUPERBLOCK_MAGIC};

/// Smallest leaf the chunker is allowed to cut.
const MIN_LEAF_SIZE: usize = 4096;
/// Leaves never exceed the block size cap.
const MAX_LEAF_SIZE: usize = 65_535;

/// Writes a byte stream into a block store as a tree of superblocks.
///
/// Incoming bytes accumulate in a leaf buffer; a leaf is cut when the
/// rolling-sum chunker marks a boundary past 4 KiB, or unconditionally at
/// 64 KiB. Leaf digests collect in level 0. Whenever a level reaches 1024
/// digests it is emitted as a superblock whose digest is promoted one level
/// up, keeping the tree balanced as the stream grows. [`StreamWriter::finish`]
/// consolidates whatever remains into a single root digest.
///
/// Content-defined boundaries mean a byte inserted near the start of a
/// re-written stream only perturbs nearby leaves, so most block digests are
/// shared with the previous tree and dedupe in the store.
pub struct StreamWriter<S: BlockSink> {
    store: S,
    leaf: Vec<u8>,
    levels: Vec<Vec<Hash>>,
    chunker: Chunker,
    wrote_any: bool,
    /// Set when level 23 fills; the tree cannot grow further and writes fail.
    top_full: bool,
}

impl<S: BlockSink> StreamWriter<S> {
    pub fn new(store: S) -> StreamWriter<S> {
        StreamWriter {
            store,
            leaf: Vec::with_capacity(MAX_LEAF_SIZE),
            levels: vec![Vec::new(); MAX_LEVELS],
            chunker: Chunker::new(10, 12),
            wrote_any: false,
            top_full: false,
        }
    }

    /// Append one byte to the stream.
    pub fn write_byte(&mut self, b: u8) -> Result<()> {
        if self.top_full {
            return Err(Error::InvalidState("superblock tree is full"));
        }
        self.leaf.push(b);
        self.chunker.update(b);
        self.wrote_any = true;
        if (self.leaf.len() >= MIN_LEAF_SIZE && self.chunker.is_marker())
            || self.leaf.len() == MAX_LEAF_SIZE
        {
            self.flush_leaf()?;
        }
        Ok(())
    }

    /// Finish the stream and return the root digest of the tree. A stream
    /// that never saw a byte still produces a valid root referring to one
    /// empty data block.
    pub fn finish(mut self) -> Result<Hash> {
        if !self.leaf.is_empty() || !self.wrote_any {
            self.flush_leaf()?;
        }

        let max_level = match (0..MAX_LEVELS).rev().find(|&l| !self.levels[l].is_empty()) {
            Some(level) => level,
            None => 0,
        };
        if max_level == 0 {
            return self.emit_level(0);
        }

        // A lone digest at the top with nothing below it already names a
        // superblock; wrapping it again would add a pointless level.
        let below: usize = self.levels[..max_level].iter().map(Vec::len).sum();
        if below == 0 && self.levels[max_level].len() == 1 {
            return Ok(self.levels[max_level][0]);
        }

        for level in 0..max_level {
            if self.levels[level].is_empty() {
                continue;
            }
            let hash = self.emit_level(level)?;
            self.levels[level].clear();
            self.levels[level + 1].push(hash);
        }
        self.emit_level(max_level)
    }

    /// Write the current leaf as a data block and account for its digest.
    fn flush_leaf(&mut self) -> Result<()> {
        let hash = self.store.put_block(&self.leaf)?;
        self.leaf.clear();
        self.levels[0].push(hash);
        self.promote()
    }

    /// Emit every full level bottom-up, pushing each emitted superblock's
    /// digest one level higher. Filling the top level latches the writer
    /// shut instead of overflowing the tree.
    fn promote(&mut self) -> Result<()> {
        let mut level = 0;
        while self.levels[level].len() == MAX_FANOUT {
            if level + 1 == MAX_LEVELS {
                self.top_full = true;
                return Ok(());
            }
            let hash = self.emit_level(level)?;
            self.levels[level].clear();
            self.levels[level + 1].push(hash);
            level += 1;
        }
        Ok(())
    }

    /// Serialize one level's digest list as a superblock and store it.
    fn emit_level(&mut self, level: usize) -> Result<Hash> {
        let hashes = &self.levels[level];
        let mut block = Vec::with_capacity(SUPERBLOCK_HEADER_SIZE + 32 * hashes.len());
        block.extend_from_slice(&SUPERBLOCK_MAGIC);
        block.push(level as u8);
        block.push(0);
        block.extend_from_slice(&(hashes.len() as u16).to_be_bytes());
        for hash in hashes {
            block.extend_from_slice(hash);
        }
        self.store.put_block(&block)
    }
}

impl<S: BlockSink> Write for StreamWriter<S> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        for &b in buf {
            self.write_byte(b).map_err(io::Error::from)?;
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}
