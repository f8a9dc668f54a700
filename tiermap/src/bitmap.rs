use std::convert::TryFrom;
use std::io::{Error, ErrorKind};
use std::path::{Path, PathBuf};

use log::{debug, info, trace};
use zerocopy::little_endian::U64;
use zerocopy::{FromBytes, IntoBytes};

use crate::error::{BitmapError, Result};
use crate::header::{word_offset, Header, HEADER_LEN, WORD_LEN};
use crate::io::{BackingStore, FileStore};
use crate::tier::{Tier, TierKind, TierStack};
use crate::word::{bit_number, bit_offset_of, word_index_of, WORD_BITS};

/// Where, and into what, a persistent bitmap mirrors its Low tier.
#[derive(Debug)]
struct Backing<S> {
    store: S,
    /// Byte offset of the header inside `store`.
    base: u64,
}

/// Tracks which of `capacity` blocks are allocated, answering "first free
/// block" without scanning saturated regions.
///
/// Blocks are recorded one bit each in the Low tier. When the Low tier spans
/// more than one group of 16 words a Mid tier summarizes it, and a Top tier
/// summarizes the Mid tier in turn once that spans more than one group.
///
/// A bitmap created with a backing store writes every changed Low word to the
/// store before the call that changed it returns. Only the header and the Low
/// tier are stored; summary tiers are rebuilt when the bitmap is opened.
#[derive(Debug)]
pub struct HierarchicalBitmap<S: BackingStore = FileStore> {
    capacity: u64,
    tiers: TierStack,
    backing: Option<Backing<S>>,
}

impl HierarchicalBitmap<FileStore> {
    /// Creates a bitmap of `capacity` free blocks. When `path` is given the
    /// bitmap is written to that file at byte `offset`, creating the file if
    /// it does not exist.
    ///
    /// # Layout
    /// ===========================================================
    /// | .. offset .. | reserved | capacity | low word 0 | .. |
    /// ===========================================================
    pub fn create<P: AsRef<Path>>(capacity: u64, path: Option<P>, offset: u64) -> Result<Self> {
        let store = path.map(FileStore::create).transpose()?;
        Self::create_on(capacity, store, offset)
    }

    /// Creates a bitmap that lives only in memory.
    pub fn in_memory(capacity: u64) -> Result<Self> {
        Self::create_on(capacity, None, 0)
    }

    /// Loads a bitmap previously created at `offset` in the file at `path`.
    pub fn open<P: AsRef<Path>>(path: P, offset: u64) -> Result<Self> {
        Self::open_on(FileStore::open(path)?, offset)
    }
}

impl<S: BackingStore> HierarchicalBitmap<S> {
    /// Creates a bitmap of `capacity` free blocks, optionally writing its
    /// header and zeroed Low tier into `store` at byte `offset`.
    ///
    /// # Errors
    ///
    /// `capacity` must be a positive multiple of 64. Any failure writing the
    /// initial image is returned and no bitmap is built.
    pub fn create_on(capacity: u64, store: Option<S>, offset: u64) -> Result<Self> {
        if capacity == 0 || capacity % WORD_BITS != 0 {
            return Err(BitmapError::InvalidCapacity(capacity));
        }
        let low_words = usize::try_from(capacity / WORD_BITS)
            .map_err(|_| BitmapError::InvalidCapacity(capacity))?;
        let tiers = TierStack::new(low_words);

        let backing = match store {
            Some(mut store) => {
                store.write_at(offset, Header::new(capacity).serialize())?;
                store.write_at(word_offset(offset, 0), &encode_words(tiers.low().words()))?;
                info!(
                    "created persistent bitmap of {} blocks at offset {}",
                    capacity, offset
                );
                Some(Backing {
                    store,
                    base: offset,
                })
            }
            None => {
                debug!("created in-memory bitmap of {} blocks", capacity);
                None
            }
        };

        Ok(Self {
            capacity,
            tiers,
            backing,
        })
    }

    /// Loads a bitmap stored at byte `offset` of `store` and rebuilds its
    /// summary tiers from the restored Low tier.
    ///
    /// # Errors
    ///
    /// Fails if the header can't be read, if the stored capacity is not a
    /// positive multiple of 64, or if the store is too short to hold the Low
    /// tier the header describes.
    pub fn open_on(mut store: S, offset: u64) -> Result<Self> {
        let mut block_buf = [0; HEADER_LEN as usize];
        store.read_at(offset, &mut block_buf)?;
        let header = Header::parse(&block_buf)?;
        let capacity = header.capacity();
        let low_words = header.low_words()?;

        let end = low_words
            .checked_mul(WORD_LEN)
            .and_then(|len| len.checked_add(offset))
            .and_then(|len| len.checked_add(HEADER_LEN))
            .ok_or_else(|| Error::new(ErrorKind::InvalidData, "stored capacity overflows"))?;
        let available = store.len()?;
        if available < end {
            return Err(Error::new(
                ErrorKind::UnexpectedEof,
                format!(
                    "stored capacity {} needs {} bytes but the store holds {}",
                    capacity, end, available
                ),
            )
            .into());
        }

        let byte_len = usize::try_from(low_words * WORD_LEN)
            .map_err(|_| Error::new(ErrorKind::InvalidData, "stored capacity too large"))?;
        let mut bytes = vec![0; byte_len];
        store.read_at(word_offset(offset, 0), &mut bytes)?;
        let words = <[U64]>::ref_from_bytes(&bytes)
            .map_err(|_| Error::new(ErrorKind::InvalidData, "misaligned low tier"))?
            .iter()
            .map(|word| word.get())
            .collect();

        let tiers = TierStack::from_low(Tier::from_words(words));
        info!(
            "opened persistent bitmap of {} blocks at offset {} ({} tier(s))",
            capacity,
            offset,
            tiers.depth()
        );

        Ok(Self {
            capacity,
            tiers,
            backing: Some(Backing {
                store,
                base: offset,
            }),
        })
    }

    /// Number of blocks tracked.
    pub fn capacity(&self) -> u64 {
        self.capacity
    }

    pub fn is_persistent(&self) -> bool {
        self.backing.is_some()
    }

    /// Bytes the bitmap occupies in a backing store, header included.
    pub fn size_on_disk(&self) -> u64 {
        HEADER_LEN + self.tiers.low().len() as u64 * WORD_LEN
    }

    /// Read access to one tier, or `None` if the bitmap is too small to have it.
    pub fn tier(&self, kind: TierKind) -> Option<&Tier> {
        self.tiers.tier(kind)
    }

    pub fn word_count(&self, kind: TierKind) -> Option<usize> {
        self.tier(kind).map(Tier::len)
    }

    /// Number of allocated blocks.
    pub fn count_allocated(&self) -> u64 {
        self.tiers
            .low()
            .words()
            .iter()
            .map(|word| u64::from(word.count_ones()))
            .sum()
    }

    /// Reports whether `bit` is allocated.
    pub fn test(&self, bit: u64) -> Result<bool> {
        self.check_range(bit)?;
        Ok(self
            .tiers
            .low()
            .is_set(word_index_of(bit), bit_offset_of(bit)))
    }

    /// Marks `bit` allocated. Setting an allocated bit changes nothing.
    pub fn set(&mut self, bit: u64) -> Result<()> {
        self.check_range(bit)?;
        let (index, offset) = (word_index_of(bit), bit_offset_of(bit));
        if self.tiers.low().is_set(index, offset) {
            return Ok(());
        }
        self.allocate(index, offset)
    }

    /// Marks `bit` free.
    pub fn clear(&mut self, bit: u64) -> Result<()> {
        self.check_range(bit)?;
        let (index, offset) = (word_index_of(bit), bit_offset_of(bit));
        let word = self.tiers.low().word(index) & !(1_u64 << offset);
        self.write_through(index, word)?;
        self.tiers.release(index, offset);
        Ok(())
    }

    /// Lowest free block, without allocating it.
    pub fn find_first_free(&self) -> Option<u64> {
        self.tiers
            .locate_free()
            .map(|(index, offset)| bit_number(index, offset))
    }

    /// Allocates the lowest free block and returns its number.
    ///
    /// # Errors
    ///
    /// Returns `BitmapError::Full` when every block is allocated.
    pub fn find_first_free_and_allocate(&mut self) -> Result<u64> {
        let (index, offset) = self.tiers.locate_free().ok_or(BitmapError::Full)?;
        self.allocate(index, offset)?;
        Ok(bit_number(index, offset))
    }

    /// Makes every write already handed to the backing store durable. Does
    /// nothing for an in-memory bitmap.
    pub fn flush(&mut self) -> Result<()> {
        if let Some(backing) = self.backing.as_mut() {
            backing.store.sync()?;
        }
        Ok(())
    }

    /// Releases the bitmap and its store handle. The stored image is left in
    /// place and can be loaded again with `open`.
    pub fn close(self) {
        debug!("closing bitmap of {} blocks", self.capacity);
    }

    /// Returns the backing store, if any, to the caller.
    pub fn into_store(self) -> Option<S> {
        self.backing.map(|backing| backing.store)
    }

    fn check_range(&self, bit: u64) -> Result<()> {
        if bit >= self.capacity {
            return Err(BitmapError::OutOfRange {
                bit,
                capacity: self.capacity,
            });
        }
        Ok(())
    }

    fn allocate(&mut self, index: usize, offset: u32) -> Result<()> {
        let word = self.tiers.low().word(index) | (1_u64 << offset);
        self.write_through(index, word)?;
        self.tiers.allocate(index, offset);
        Ok(())
    }

    /// Writes the new value of Low word `index` to the backing store. Called
    /// before the in-memory word changes so that a failed write leaves both
    /// copies as they were.
    fn write_through(&mut self, index: usize, word: u64) -> Result<()> {
        if let Some(backing) = self.backing.as_mut() {
            let at = word_offset(backing.base, index);
            trace!("writing low word {} ({:#018x}) at byte {}", index, word, at);
            backing.store.write_at(at, U64::new(word).as_bytes())?;
        }
        Ok(())
    }
}

fn encode_words(words: &[u64]) -> Vec<u8> {
    let encoded: Vec<U64> = words.iter().map(|&word| U64::new(word)).collect();
    encoded.as_bytes().to_vec()
}

/// Configures and creates a bitmap.
///
/// ```no_run
/// use tiermap::BitmapBuilder;
///
/// let mut bitmap = BitmapBuilder::new(64 * 1024)
///     .with_backing("blocks.map")
///     .at_offset(4096)
///     .build()
///     .unwrap();
/// assert_eq!(bitmap.find_first_free_and_allocate().unwrap(), 0);
/// ```
#[derive(Debug, Clone)]
pub struct BitmapBuilder {
    capacity: u64,
    path: Option<PathBuf>,
    offset: u64,
}

impl From<u64> for BitmapBuilder {
    fn from(capacity: u64) -> Self {
        BitmapBuilder::new(capacity)
    }
}

impl BitmapBuilder {
    pub fn new(capacity: u64) -> Self {
        Self {
            capacity,
            path: None,
            offset: 0,
        }
    }

    /// Mirrors the bitmap into the file at `path`. Without this the bitmap
    /// only lives in memory.
    pub fn with_backing<P: AsRef<Path>>(mut self, path: P) -> Self {
        self.path = Some(path.as_ref().to_path_buf());
        self
    }

    /// Byte offset inside the backing file where the bitmap starts.
    pub fn at_offset(mut self, offset: u64) -> Self {
        self.offset = offset;
        self
    }

    pub fn build(self) -> Result<HierarchicalBitmap<FileStore>> {
        HierarchicalBitmap::create(self.capacity, self.path, self.offset)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::MemoryStore;
    use std::cell::Cell;
    use std::rc::Rc;

    /// Memory store whose writes start failing once `broken` is set.
    struct FlakyStore {
        inner: MemoryStore,
        broken: Rc<Cell<bool>>,
    }

    impl BackingStore for FlakyStore {
        fn read_at(&mut self, offset: u64, buf: &mut [u8]) -> std::io::Result<()> {
            self.inner.read_at(offset, buf)
        }

        fn write_at(&mut self, offset: u64, buf: &[u8]) -> std::io::Result<()> {
            if self.broken.get() {
                return Err(Error::new(ErrorKind::Other, "disk unplugged"));
            }
            self.inner.write_at(offset, buf)
        }

        fn len(&mut self) -> std::io::Result<u64> {
            self.inner.len()
        }

        fn sync(&mut self) -> std::io::Result<()> {
            self.inner.sync()
        }
    }

    fn stored_word(store: &MemoryStore, base: u64, index: usize) -> u64 {
        let at = word_offset(base, index) as usize;
        let mut word = [0; 8];
        word.copy_from_slice(&store.as_bytes()[at..at + 8]);
        u64::from_le_bytes(word)
    }

    #[test]
    fn new_bitmap_is_all_free() {
        let bitmap = HierarchicalBitmap::in_memory(64 * 40).unwrap();
        for bit in 0..bitmap.capacity() {
            assert!(!bitmap.test(bit).unwrap());
        }
        assert_eq!(bitmap.count_allocated(), 0);
    }

    #[test]
    fn capacity_must_be_whole_words() {
        match HierarchicalBitmap::in_memory(100).unwrap_err() {
            BitmapError::InvalidCapacity(100) => (),
            err => panic!("unexpected error {:?}", err),
        }
        assert!(HierarchicalBitmap::in_memory(0).is_err());
    }

    #[test]
    fn bits_past_capacity_are_out_of_range() {
        let mut bitmap = HierarchicalBitmap::in_memory(128).unwrap();

        assert!(bitmap.test(127).is_ok());
        match bitmap.test(128).unwrap_err() {
            BitmapError::OutOfRange {
                bit: 128,
                capacity: 128,
            } => (),
            err => panic!("unexpected error {:?}", err),
        }
        assert!(bitmap.clear(128).is_err());
        assert!(bitmap.set(1 << 40).is_err());
    }

    #[test]
    fn allocations_increase_until_full() {
        let mut bitmap = HierarchicalBitmap::in_memory(64 * 20).unwrap();
        for expected in 0..bitmap.capacity() {
            assert_eq!(bitmap.find_first_free_and_allocate().unwrap(), expected);
        }

        assert_eq!(bitmap.find_first_free(), None);
        match bitmap.find_first_free_and_allocate().unwrap_err() {
            BitmapError::Full => (),
            err => panic!("unexpected error {:?}", err),
        }
    }

    #[test]
    fn cleared_bit_is_reused_first() {
        let mut bitmap = HierarchicalBitmap::in_memory(64 * 64).unwrap();
        for _ in 0..2048 {
            bitmap.find_first_free_and_allocate().unwrap();
        }
        bitmap.clear(1500).unwrap();
        bitmap.clear(700).unwrap();

        assert!(!bitmap.test(700).unwrap());
        assert_eq!(bitmap.find_first_free(), Some(700));
        assert_eq!(bitmap.find_first_free_and_allocate().unwrap(), 700);
        assert_eq!(bitmap.find_first_free_and_allocate().unwrap(), 1500);
        assert_eq!(bitmap.find_first_free_and_allocate().unwrap(), 2048);
    }

    #[test]
    fn set_is_idempotent_and_updates_summaries() {
        let mut bitmap = HierarchicalBitmap::in_memory(64 * 32).unwrap();
        for bit in 0..1024 {
            bitmap.set(bit).unwrap();
        }
        bitmap.set(3).unwrap();

        assert_eq!(bitmap.count_allocated(), 1024);
        assert!(bitmap.tier(TierKind::Mid).unwrap().is_set(0, 0));
        assert_eq!(bitmap.find_first_free(), Some(1024));
    }

    #[test]
    fn mutations_write_through_to_store() {
        let mut bitmap =
            HierarchicalBitmap::create_on(64 * 4, Some(MemoryStore::new()), 16).unwrap();
        bitmap.set(65).unwrap();
        bitmap.set(70).unwrap();
        bitmap.clear(65).unwrap();

        let store = bitmap.into_store().unwrap();
        assert_eq!(store.as_bytes().len() as u64, 16 + HEADER_LEN + 4 * 8);
        assert_eq!(stored_word(&store, 16, 0), 0);
        assert_eq!(stored_word(&store, 16, 1), 1 << 6);
    }

    #[test]
    fn open_rebuilds_summary_tiers() {
        let mut bitmap =
            HierarchicalBitmap::create_on(64 * 64, Some(MemoryStore::new()), 0).unwrap();
        for _ in 0..1024 {
            bitmap.find_first_free_and_allocate().unwrap();
        }
        let store = bitmap.into_store().unwrap();

        let mut reopened = HierarchicalBitmap::open_on(store, 0).unwrap();
        assert_eq!(reopened.capacity(), 64 * 64);
        assert!(reopened.tier(TierKind::Mid).unwrap().is_set(0, 0));
        assert_eq!(reopened.find_first_free_and_allocate().unwrap(), 1024);
    }

    #[test]
    fn open_rejects_truncated_store() {
        let bitmap = HierarchicalBitmap::create_on(64 * 8, Some(MemoryStore::new()), 0).unwrap();
        let mut bytes = bitmap.into_store().unwrap().into_inner();
        bytes.truncate(bytes.len() - 1);

        match HierarchicalBitmap::open_on(MemoryStore::from(bytes), 0).unwrap_err() {
            BitmapError::Io(err) => assert_eq!(err.kind(), ErrorKind::UnexpectedEof),
            err => panic!("unexpected error {:?}", err),
        }
    }

    #[test]
    fn open_rejects_corrupt_capacity() {
        let mut bytes = vec![0; 1024];
        bytes[40..48].copy_from_slice(&100_u64.to_le_bytes());

        match HierarchicalBitmap::open_on(MemoryStore::from(bytes), 0).unwrap_err() {
            BitmapError::Io(err) => assert_eq!(err.kind(), ErrorKind::InvalidData),
            err => panic!("unexpected error {:?}", err),
        }
    }

    #[test]
    fn failed_write_leaves_bitmap_unchanged() {
        let broken = Rc::new(Cell::new(false));
        let store = FlakyStore {
            inner: MemoryStore::new(),
            broken: Rc::clone(&broken),
        };
        let mut bitmap = HierarchicalBitmap::create_on(64 * 2, Some(store), 0).unwrap();
        bitmap.set(5).unwrap();

        broken.set(true);
        assert!(matches!(
            bitmap.find_first_free_and_allocate(),
            Err(BitmapError::Io(_))
        ));
        assert!(matches!(bitmap.clear(5), Err(BitmapError::Io(_))));
        assert!(!bitmap.test(0).unwrap());
        assert!(bitmap.test(5).unwrap());

        broken.set(false);
        assert_eq!(bitmap.find_first_free_and_allocate().unwrap(), 0);
    }

    #[test]
    fn size_on_disk_counts_header_and_low_words() {
        let bitmap = HierarchicalBitmap::in_memory(64 * 1024).unwrap();
        assert_eq!(bitmap.size_on_disk(), 48 + 1024 * 8);
        assert!(!bitmap.is_persistent());
        assert_eq!(bitmap.word_count(TierKind::Low), Some(1024));
        assert_eq!(bitmap.word_count(TierKind::Mid), Some(1));
        assert_eq!(bitmap.word_count(TierKind::Top), None);
    }
}
