//! Superblock tree traversal.

use std::io::{self, Read};

use crate::error::{Error, Result};
use crate::hash::{self, Hash, HASH_SIZE};
use crate::stream::{BlockSource, MAX_FANOUT, SUPERBLOCK_HEADER_SIZE, SUPERBLOCK_MAGIC};

/// A superblock being walked: its bytes, the cursor into its digest list,
/// and where that list ends.
struct Frame {
    data: Vec<u8>,
    cursor: usize,
    end: usize,
    level: u8,
}

impl Frame {
    fn exhausted(&self) -> bool {
        self.cursor >= self.end
    }

    fn take_hash(&mut self) -> Hash {
        let mut hash = [0u8; HASH_SIZE];
        hash.copy_from_slice(&self.data[self.cursor..self.cursor + HASH_SIZE]);
        self.cursor += HASH_SIZE;
        hash
    }
}

/// Streams the bytes of a superblock tree rooted at a digest, depth-first,
/// concatenating the data blocks the level-0 superblocks point at. A
/// missing child, short block, or absent magic is a hard error: the tree is
/// malformed or the store inconsistent.
///
/// Implements [`std::io::Read`]; wrap in a `BufReader` for byte-at-a-time
/// consumption.
pub struct StreamReader<S: BlockSource> {
    store: S,
    root: Hash,
    stack: Vec<Frame>,
    current: Option<(Vec<u8>, usize)>,
    started: bool,
}

impl<S: BlockSource> StreamReader<S> {
    pub fn new(store: S, root: Hash) -> StreamReader<S> {
        StreamReader { store, root, stack: Vec::new(), current: None, started: false }
    }

    /// Advance to the next data block. False when the stream is exhausted.
    fn next_block(&mut self) -> Result<bool> {
        if !self.started {
            let root = self.root;
            let frame = self.fetch_superblock(&root)?;
            self.stack.push(frame);
            self.started = true;
        }
        loop {
            // drop superblocks whose digest lists are spent
            while self.stack.last().map_or(false, Frame::exhausted) {
                self.stack.pop();
            }
            let top = match self.stack.last_mut() {
                Some(top) => top,
                None => return Ok(false),
            };
            if top.level > 0 {
                // descend one step; an empty child is popped next round
                let child = top.take_hash();
                let frame = self.fetch_superblock(&child)?;
                self.stack.push(frame);
                continue;
            }
            let data_hash = top.take_hash();
            let data = match self.store.get_block(&data_hash)? {
                Some(data) => data,
                None => return Err(Error::MissingBlock(hash::to_hex(&data_hash))),
            };
            self.current = Some((data, 0));
            return Ok(true);
        }
    }

    /// Fetch a block that must be a well-formed superblock.
    fn fetch_superblock(&mut self, hash: &Hash) -> Result<Frame> {
        let data = match self.store.get_block(hash)? {
            Some(data) => data,
            None => return Err(Error::MissingBlock(hash::to_hex(hash))),
        };
        if data.len() < SUPERBLOCK_HEADER_SIZE {
            return Err(Error::format(format!("block {} too short", hash::to_hex(hash))));
        }
        if data[..8] != SUPERBLOCK_MAGIC {
            return Err(Error::format(format!(
                "block {} lacks superblock magic",
                hash::to_hex(hash)
            )));
        }
        let level = data[8];
        let count = u16::from_be_bytes([data[10], data[11]]) as usize;
        if count > MAX_FANOUT {
            return Err(Error::format(format!(
                "block {} claims {count} children",
                hash::to_hex(hash)
            )));
        }
        let end = SUPERBLOCK_HEADER_SIZE + HASH_SIZE * count;
        if data.len() < end {
            return Err(Error::format(format!(
                "block {} truncated: {} bytes for {count} children",
                hash::to_hex(hash),
                data.len()
            )));
        }
        Ok(Frame { data, cursor: SUPERBLOCK_HEADER_SIZE, end, level })
    }
}

impl<S: BlockSource> Read for StreamReader<S> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        loop {
            if let Some((data, cursor)) = &mut self.current {
                if *cursor < data.len() {
                    let n = (data.len() - *cursor).min(buf.len());
                    buf[..n].copy_from_slice(&data[*cursor..*cursor + n]);
                    *cursor += n;
                    return Ok(n);
                }
            }
            match self.next_block() {
                Ok(true) => continue,
                Ok(false) => return Ok(0),
                Err(e) => return Err(e.into()),
            }
        }
    }
}
