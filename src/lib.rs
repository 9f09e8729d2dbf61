//! Hoard: a content-addressed block store.
//!
//! Byte payloads up to 64 KiB are persisted under the SHA3-256 digest of
//! their contents, in one of two backing stores: immutable packfiles with a
//! sorted lookup table ([`PackfileWriter`], [`PackfileReader`]), or an
//! append-only repository file with commit markers and crash recovery
//! ([`Repository`]). Streams of unbounded length go through a superblock
//! tree ([`StreamWriter`], [`StreamReader`]) that chunks the data at
//! content-defined boundaries and addresses the whole stream by one root
//! digest.
//!
//! ```no_run
//! use hoard::{PackfileReader, PackfileWriter};
//!
//! let mut writer = PackfileWriter::new();
//! let hash = writer.write(b"Hello, world!")?;
//! writer.dump("blocks.hdb".as_ref())?;
//!
//! let reader = PackfileReader::open("blocks.hdb".as_ref())?;
//! assert_eq!(reader.read(&hash)?.unwrap(), b"Hello, world!");
//! # Ok::<(), hoard::Error>(())
//! ```

pub mod chunker;
pub mod codec;
pub mod error;
pub mod hash;
pub mod index;
pub mod packfile;
pub mod repo;
pub mod stream;

pub use chunker::Chunker;
pub use codec::Encoding;
pub use error::{Error, Result};
pub use hash::Hash;
pub use index::ByteTrie;
pub use packfile::{PackEntry, PackfileCollection, PackfileReader, PackfileWriter};
pub use repo::Repository;
pub use stream::{BlockSink, BlockSource, StreamReader, StreamWriter};
