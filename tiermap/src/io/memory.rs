use super::BackingStore;
use std::convert::TryFrom;
use std::io::{Error, ErrorKind};

/// Keeps the stored bitmap in a growable buffer. Useful for tests and for
/// embedding a bitmap image inside a larger in-memory structure.
#[derive(Debug, Default, Clone)]
pub struct MemoryStore {
    bytes: Vec<u8>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the stored bytes to the caller.
    pub fn into_inner(self) -> Vec<u8> {
        self.bytes
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }
}

impl From<Vec<u8>> for MemoryStore {
    fn from(bytes: Vec<u8>) -> Self {
        Self { bytes }
    }
}

fn range_of(offset: u64, len: usize) -> std::io::Result<(usize, usize)> {
    let start = usize::try_from(offset)
        .map_err(|_| Error::new(ErrorKind::InvalidInput, "offset exceeds address space"))?;
    let end = start
        .checked_add(len)
        .ok_or_else(|| Error::new(ErrorKind::InvalidInput, "offset exceeds address space"))?;
    Ok((start, end))
}

impl BackingStore for MemoryStore {
    fn read_at(&mut self, offset: u64, buf: &mut [u8]) -> std::io::Result<()> {
        let (start, end) = range_of(offset, buf.len())?;
        if end > self.bytes.len() {
            return Err(Error::new(ErrorKind::UnexpectedEof, "read past end of store"));
        }
        buf.copy_from_slice(&self.bytes[start..end]);
        Ok(())
    }

    fn write_at(&mut self, offset: u64, buf: &[u8]) -> std::io::Result<()> {
        let (start, end) = range_of(offset, buf.len())?;
        if end > self.bytes.len() {
            self.bytes.resize(end, 0);
        }
        self.bytes[start..end].copy_from_slice(buf);
        Ok(())
    }

    fn len(&mut self) -> std::io::Result<u64> {
        Ok(self.bytes.len() as u64)
    }

    fn sync(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}
