//! A three tier allocation bitmap.
//!
//! Each block of a fixed size address space is tracked by one bit of the Low
//! tier. Groups of 16 Low words (1024 blocks) are summarized by one bit of the
//! Mid tier, and groups of 16 Mid words by one bit of the Top tier, so finding
//! the first free block skips over fully allocated regions instead of scanning
//! them.
//!
//! A bitmap can be mirrored into a file (or any other `BackingStore`), in which
//! case every change to a Low word is written through before the call returns.
//!
//! ```
//! use tiermap::HierarchicalBitmap;
//!
//! let mut bitmap = HierarchicalBitmap::in_memory(64 * 1024).unwrap();
//! assert_eq!(bitmap.find_first_free_and_allocate().unwrap(), 0);
//! assert_eq!(bitmap.find_first_free_and_allocate().unwrap(), 1);
//! bitmap.clear(0).unwrap();
//! assert_eq!(bitmap.find_first_free_and_allocate().unwrap(), 0);
//! ```
mod bitmap;
mod error;
mod header;
pub mod io;
mod tier;
mod word;

pub use crate::bitmap::{BitmapBuilder, HierarchicalBitmap};
pub use crate::error::{BitmapError, Result};
pub use crate::header::{HEADER_LEN, RESERVED_LEN};
pub use crate::tier::{Tier, TierKind, MAX_TIERS};
pub use crate::word::{GROUP_WORDS, WORD_BITS};
