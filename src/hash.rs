//! Block digests: SHA3-256 hashing, ordering, and hex conversion.

use std::cmp::Ordering;

use sha3::{Digest, Sha3_256};

use crate::error::{Error, Result};

/// Byte width of a digest.
pub const HASH_SIZE: usize = 32;

/// A block digest. Equality is bytewise; ordering is unsigned lexicographic.
pub type Hash = [u8; HASH_SIZE];

/// Hash a byte slice.
pub fn digest(data: &[u8]) -> Hash {
    Sha3_256::digest(data).into()
}

/// Unsigned lexicographic comparison of two digests.
pub fn compare(a: &Hash, b: &Hash) -> Ordering {
    a.cmp(b)
}

/// Hex-encode a digest (lowercase).
pub fn to_hex(hash: &Hash) -> String {
    hex::encode(hash)
}

/// Parse a hex digest. Accepts upper and lower case; the input must decode
/// to exactly [`HASH_SIZE`] bytes.
pub fn from_hex(text: &str) -> Result<Hash> {
    let bytes = hex::decode(text).map_err(|e| Error::format(format!("bad hex digest: {e}")))?;
    bytes
        .try_into()
        .map_err(|_| Error::format(format!("digest must be {} hex digits", HASH_SIZE * 2)))
}
