use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom};
use std::path::Path;
use std::sync::Mutex;

use bytes::Bytes;

/// Random access byte source an archive can be read from.
///
/// Readers only ever ask for ranges they know the size of, short reads are
/// errors.
pub trait ArchiveSource: Send + Sync {
    fn size(&self) -> io::Result<u64>;
    fn read_at(&self, offset: u64, buf: &mut [u8]) -> io::Result<()>;
}

fn out_of_bounds(offset: u64, len: usize, size: u64) -> io::Error {
    io::Error::new(
        io::ErrorKind::UnexpectedEof,
        format!("range {}+{} is past the end of a {} byte source", offset, len, size),
    )
}

impl ArchiveSource for Bytes {
    fn size(&self) -> io::Result<u64> {
        Ok(self.len() as u64)
    }

    fn read_at(&self, offset: u64, buf: &mut [u8]) -> io::Result<()> {
        let start = usize::try_from(offset).map_err(|_| out_of_bounds(offset, buf.len(), self.len() as u64))?;
        let end = start
            .checked_add(buf.len())
            .filter(|end| *end <= self.len())
            .ok_or_else(|| out_of_bounds(offset, buf.len(), self.len() as u64))?;

        buf.copy_from_slice(&self[start..end]);
        Ok(())
    }
}

pub struct FileSource {
    file: Mutex<File>,
    size: u64,
}

impl FileSource {
    pub fn open<P: AsRef<Path>>(path: P) -> io::Result<Self> {
        FileSource::new(File::open(path)?)
    }

    pub fn new(file: File) -> io::Result<Self> {
        let size = file.metadata()?.len();
        Ok(FileSource {
            file: Mutex::new(file),
            size,
        })
    }
}

impl ArchiveSource for FileSource {
    fn size(&self) -> io::Result<u64> {
        Ok(self.size)
    }

    fn read_at(&self, offset: u64, buf: &mut [u8]) -> io::Result<()> {
        if offset.saturating_add(buf.len() as u64) > self.size {
            return Err(out_of_bounds(offset, buf.len(), self.size));
        }

        let mut file = self
            .file
            .lock()
            .map_err(|_| io::Error::new(io::ErrorKind::Other, "file source lock poisoned"))?;
        file.seek(SeekFrom::Start(offset))?;
        file.read_exact(buf)
    }
}

/// Reads `len` bytes at `offset` into a new buffer.
pub fn read_range(source: &dyn ArchiveSource, offset: u64, len: usize) -> io::Result<Bytes> {
    let mut buf = vec![0; len];
    source.read_at(offset, &mut buf)?;
    Ok(Bytes::from(buf))
}

pub fn read_all(source: &dyn ArchiveSource) -> io::Result<Bytes> {
    let size = source.size()?;
    let len = usize::try_from(size)
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "source does not fit in memory"))?;
    read_range(source, 0, len)
}

#[cfg(test)]
mod test_archive_source {
    use super::*;
    use std::io::Write;

    #[test]
    fn bytes_ranges() {
        let source = Bytes::from_static(b"Hello World!");
        let mut buf = [0; 5];
        source.read_at(6, &mut buf).unwrap();

        assert_eq!(&buf, b"World");
        assert_eq!(source.size().unwrap(), 12);
        assert!(source.read_at(8, &mut buf).is_err());
        assert!(source.read_at(u64::MAX, &mut buf).is_err());
    }

    #[test]
    fn file_ranges() {
        let mut file = tempfile::tempfile().unwrap();
        file.write_all(b"Hello World!").unwrap();
        let source = FileSource::new(file).unwrap();

        assert_eq!(read_range(&source, 0, 5).unwrap(), Bytes::from_static(b"Hello"));
        assert_eq!(read_all(&source).unwrap(), Bytes::from_static(b"Hello World!"));
        assert_eq!(
            source.read_at(10, &mut [0; 4]).unwrap_err().kind(),
            io::ErrorKind::UnexpectedEof
        );
    }

    #[test]
    fn file_by_path() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(&[1, 2, 3]).unwrap();
        file.flush().unwrap();

        let source = FileSource::open(file.path()).unwrap();
        assert_eq!(read_all(&source).unwrap(), Bytes::from_static(&[1, 2, 3]));
    }
}
