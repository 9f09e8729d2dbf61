//! Streaming arbitrarily long data through a block store.
//!
//! A byte stream is chunked into data blocks of 4 KiB to 64 KiB at
//! content-defined boundaries. The digests of those blocks are coalesced
//! into superblocks, pointer blocks holding up to 1024 digests each, which
//! stack into a tree up to 24 levels deep. The root digest identifies the
//! whole stream.
//!
//! Superblock layout, big-endian:
//!
//! ```text
//! byte[8] magic = "SUPERBLK";
//! uint8   level;      // 0 points at data blocks, n at level n-1 superblocks
//! uint8   reserved = 0;
//! uint16  count;      // 0..=1024 digests follow
//! byte[32 * count] digests;
//! ```

pub mod reader;
pub mod writer;

pub use reader::StreamReader;
pub use writer::StreamWriter;

use crate::error::Result;
use crate::hash::Hash;

/// Magic for every superblock.
pub const SUPERBLOCK_MAGIC: [u8; 8] = *b"SUPERBLK";
/// Superblock header size; the digest list starts here.
pub const SUPERBLOCK_HEADER_SIZE: usize = 12;
/// Most digests one superblock can point at.
pub const MAX_FANOUT: usize = 1024;
/// Levels the tree can stack to. 24 levels of 1024-way fan-out over 4 KiB
/// leaves holds on the order of 2^252 bytes, practically unlimited.
pub const MAX_LEVELS: usize = 24;

/// Destination for blocks produced by a stream writer.
pub trait BlockSink {
    /// Store a block, returning its digest.
    fn put_block(&mut self, data: &[u8]) -> Result<Hash>;
}

/// Source of blocks for a stream reader.
pub trait BlockSource {
    /// Fetch a block by digest, `None` if the store does not hold it.
    fn get_block(&mut self, hash: &Hash) -> Result<Option<Vec<u8>>>;
}

impl<T: BlockSink + ?Sized> BlockSink for &mut T {
    fn put_block(&mut self, data: &[u8]) -> Result<Hash> {
        (**self).put_block(data)
    }
}

impl<T: BlockSource + ?Sized> BlockSource for &mut T {
    fn get_block(&mut self, hash: &Hash) -> Result<Option<Vec<u8>>> {
        (**self).get_block(hash)
    }
}
