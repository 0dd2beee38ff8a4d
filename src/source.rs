//! Acquire a read-only byte view of an `.mmdb` file, either by memory
//! mapping it or by reading it into a heap buffer.

use std::fs::File;
use std::path::Path;

use memmap2::Mmap;
use tracing::debug;

use crate::error::{Error, Result};

/// Owns either a memory map or a heap buffer, exposing both as a single
/// contiguous byte slice with the file's exact length.
pub enum MappedSource {
    Mapped(Mmap),
    Owned(Vec<u8>),
}

impl MappedSource {
    /// Read the file into a heap buffer, bounded by `max_size` bytes (0
    /// means unbounded).
    pub fn open(path: &Path, max_size: u64) -> Result<Self> {
        let file = open_nonempty(path)?;
        let len = file.metadata()?.len();
        if max_size != 0 && len > max_size {
            return Err(Error::FileTooLarge(format!(
                "{} ({len} > {max_size})",
                path.display()
            )));
        }
        debug!(path = %path.display(), len, "reading mmdb file into heap buffer");
        let buf = std::fs::read(path)?;
        Ok(MappedSource::Owned(buf))
    }

    /// Memory-map the file read-only.
    pub fn mmap(path: &Path) -> Result<Self> {
        let file = open_nonempty(path)?;
        debug!(path = %path.display(), "memory-mapping mmdb file");
        // SAFETY: the file is not expected to be mutated concurrently by
        // another process for the lifetime of this mapping; the caller
        // accepts the platform-level hazard inherent to any mmap of a file
        // outside this process's exclusive control.
        let mmap = unsafe { Mmap::map(&file)? };
        Ok(MappedSource::Mapped(mmap))
    }

    pub fn as_bytes(&self) -> &[u8] {
        match self {
            MappedSource::Mapped(m) => &m[..],
            MappedSource::Owned(b) => &b[..],
        }
    }

    pub fn len(&self) -> usize {
        self.as_bytes().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn open_nonempty(path: &Path) -> Result<File> {
    let file = File::open(path)?;
    let metadata = file.metadata()?;
    if !metadata.is_file() {
        return Err(Error::NotFile(path.display().to_string()));
    }
    if metadata.len() == 0 {
        return Err(Error::FileEmpty(path.display().to_string()));
    }
    Ok(file)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn open_rejects_missing_file() {
        let path = Path::new("/nonexistent/path/to/file.mmdb");
        let err = MappedSource::open(path, 0).unwrap_err();
        assert!(matches!(err, Error::Io(_)));
    }

    #[test]
    fn open_rejects_empty_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("empty.mmdb");
        File::create(&path).unwrap();
        let err = MappedSource::open(&path, 0).unwrap_err();
        assert!(matches!(err, Error::FileEmpty(_)));
    }

    #[test]
    fn open_reads_file_contents() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("data.mmdb");
        let mut file = File::create(&path).unwrap();
        file.write_all(b"hello world").unwrap();
        drop(file);

        let source = MappedSource::open(&path, 0).unwrap();
        assert_eq!(source.as_bytes(), b"hello world");
    }

    #[test]
    fn open_enforces_max_size() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("data.mmdb");
        let mut file = File::create(&path).unwrap();
        file.write_all(b"hello world").unwrap();
        drop(file);

        let err = MappedSource::open(&path, 4).unwrap_err();
        assert!(matches!(err, Error::FileTooLarge(_)));
    }

    #[test]
    fn mmap_reads_file_contents() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("data.mmdb");
        let mut file = File::create(&path).unwrap();
        file.write_all(b"hello world").unwrap();
        drop(file);

        let source = MappedSource::mmap(&path).unwrap();
        assert_eq!(source.as_bytes(), b"hello world");
    }
}
