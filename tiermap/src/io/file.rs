use super::BackingStore;
use std::fs::{File, OpenOptions};
use std::io::prelude::*;
use std::io::SeekFrom;
use std::path::Path;

/// Mirrors a bitmap into a regular file. The bitmap may share the file with
/// other data as long as it owns the bytes from its base offset onwards.
#[derive(Debug)]
pub struct FileStore {
    fd: File,
}

impl FileStore {
    /// Opens `path` for reading and writing, creating it if it does not exist.
    /// Existing contents are left in place.
    pub fn create<P: AsRef<Path>>(path: P) -> std::io::Result<Self> {
        let fd = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)?;
        Ok(Self { fd })
    }

    /// Opens an existing file for reading and writing. This method does not
    /// validate the contents, it is up to the bitmap loader to check them.
    pub fn open<P: AsRef<Path>>(path: P) -> std::io::Result<Self> {
        let fd = OpenOptions::new().read(true).write(true).open(path)?;
        Ok(Self { fd })
    }

    /// Returns ownership of the underlying file descriptor to the caller.
    pub fn into_file(self) -> File {
        self.fd
    }
}

impl From<File> for FileStore {
    fn from(fd: File) -> Self {
        Self { fd }
    }
}

impl BackingStore for FileStore {
    fn read_at(&mut self, offset: u64, buf: &mut [u8]) -> std::io::Result<()> {
        self.fd.seek(SeekFrom::Start(offset))?;
        self.fd.read_exact(buf)
    }

    fn write_at(&mut self, offset: u64, buf: &[u8]) -> std::io::Result<()> {
        self.fd.seek(SeekFrom::Start(offset))?;
        self.fd.write_all(buf)
    }

    fn len(&mut self) -> std::io::Result<u64> {
        Ok(self.fd.metadata()?.len())
    }

    fn sync(&mut self) -> std::io::Result<()> {
        self.fd.sync_all()
    }
}
