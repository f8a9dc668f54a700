/// Byte-addressed storage a bitmap can mirror its Low tier into.
///
/// Calls are synchronous and complete before returning. Implementations are
/// not expected to buffer: a successful `write_at` is visible to a following
/// `read_at`, and `sync` makes earlier writes durable.
pub trait BackingStore {
    /// Fills `buf` with the bytes starting at `offset`.
    ///
    /// # Errors
    ///
    /// Reading past the end of the store returns an error rather than a short
    /// read.
    fn read_at(&mut self, offset: u64, buf: &mut [u8]) -> std::io::Result<()>;
    /// Writes all of `buf` starting at `offset`, growing the store if needed.
    fn write_at(&mut self, offset: u64, buf: &[u8]) -> std::io::Result<()>;
    /// Current size of the store in bytes.
    fn len(&mut self) -> std::io::Result<u64>;
    /// Flush any buffered IO to the underlying medium. No data is written
    /// besides what earlier calls already handed over.
    fn sync(&mut self) -> std::io::Result<()>;
}
