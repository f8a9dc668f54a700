use std::io::{Error, ErrorKind};

use zerocopy::little_endian::U64;
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout, Unaligned};

use crate::word::WORD_BITS;

/// Bytes at the start of a stored bitmap kept free for a magic number. They are
/// written as zeros and never checked when loading.
pub const RESERVED_LEN: usize = 40;

/// Size of the header preceding the Low tier words in a backing store.
pub const HEADER_LEN: u64 = 48;

/// Size in bytes of one stored Low tier word.
pub const WORD_LEN: u64 = 8;

/// Leading bytes of a stored bitmap, found at the caller's base offset.
///
/// # Layout
/// ==========================================================
/// | reserved (40 bytes) | capacity (8 bytes) | low words.. |
/// ==========================================================
///
/// Integers are little endian.
#[repr(C)]
#[derive(Clone, Copy, FromBytes, IntoBytes, Immutable, KnownLayout, Unaligned)]
pub struct Header {
    reserved: [u8; RESERVED_LEN],
    /// Number of blocks tracked by the Low tier.
    capacity: U64,
}

impl Header {
    pub fn new(capacity: u64) -> Self {
        Self {
            reserved: [0; RESERVED_LEN],
            capacity: U64::new(capacity),
        }
    }

    /// Reads a header from a buffer of exactly `HEADER_LEN` bytes.
    pub fn parse(buf: &[u8]) -> std::io::Result<Self> {
        Header::read_from_bytes(buf).map_err(|_| {
            Error::new(
                ErrorKind::InvalidData,
                format!("bitmap header must be {} bytes, got {}", HEADER_LEN, buf.len()),
            )
        })
    }

    pub fn serialize(&self) -> &[u8] {
        self.as_bytes()
    }

    pub fn capacity(&self) -> u64 {
        self.capacity.get()
    }

    /// Number of Low tier words following the header.
    ///
    /// # Errors
    ///
    /// A capacity that is zero or not a whole number of words can't have been
    /// written by this crate and is rejected as corrupt.
    pub fn low_words(&self) -> std::io::Result<u64> {
        let capacity = self.capacity();
        if capacity == 0 || capacity % WORD_BITS != 0 {
            return Err(Error::new(
                ErrorKind::InvalidData,
                format!("stored capacity {} is not a positive multiple of 64", capacity),
            ));
        }
        Ok(capacity / WORD_BITS)
    }
}

/// Byte position, relative to the start of the store, of Low word `index` of
/// a bitmap stored at `base`.
pub fn word_offset(base: u64, index: usize) -> u64 {
    base + HEADER_LEN + index as u64 * WORD_LEN
}
