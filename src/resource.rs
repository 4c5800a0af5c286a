//! Random-access byte sources the decoder reads from.
//!
//! Decoding never loads a resource as a whole: the splitter scans windows
//! through a `ResourceCursor` and leaf values are read by exact range.
use std::cell::{Cell, RefCell};
use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom};
use std::path::Path;

use crate::error::{Error, Result};

pub const CHUNK_SIZE: usize = 8 * 1024;

pub trait Resource {
    fn len(&self) -> u64;

    /// Fill `buf` from `offset`; returns the number of bytes read (0 at end).
    fn read_at(&self, offset: u64, buf: &mut [u8]) -> io::Result<usize>;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Read exactly `length` bytes at `offset`.
pub fn read_range(resource: &dyn Resource, offset: u64, length: u64) -> Result<Vec<u8>> {
    let mut buf = vec![0u8; length as usize];
    let mut filled = 0;
    while filled < buf.len() {
        let n = resource.read_at(offset + filled as u64, &mut buf[filled..])?;
        if n == 0 {
            return Err(Error::invalid_resource(offset + filled as u64, "unexpected end of input"));
        }
        filled += n;
    }
    Ok(buf)
}

// ————————————————————————————————————————————————————————————————————————————
// MEMORY
// ————————————————————————————————————————————————————————————————————————————

/// In-memory input. Counts `read_at` calls so tests can assert laziness.
#[derive(Debug, Default)]
pub struct MemoryResource {
    data: Vec<u8>,
    reads: Cell<usize>,
}

impl MemoryResource {
    pub fn new(data: impl Into<Vec<u8>>) -> Self {
        Self { data: data.into(), reads: Cell::new(0) }
    }

    pub fn reads(&self) -> usize {
        self.reads.get()
    }
}

impl From<&str> for MemoryResource {
    fn from(s: &str) -> Self {
        Self::new(s.as_bytes())
    }
}

impl Resource for MemoryResource {
    fn len(&self) -> u64 {
        self.data.len() as u64
    }

    fn read_at(&self, offset: u64, buf: &mut [u8]) -> io::Result<usize> {
        self.reads.set(self.reads.get() + 1);
        let start = (offset as usize).min(self.data.len());
        let n = buf.len().min(self.data.len() - start);
        buf[..n].copy_from_slice(&self.data[start..start + n]);
        Ok(n)
    }
}

// ————————————————————————————————————————————————————————————————————————————
// FILE
// ————————————————————————————————————————————————————————————————————————————

#[derive(Debug)]
pub struct FileResource {
    file: RefCell<File>,
    len: u64,
}

impl FileResource {
    pub fn open(path: impl AsRef<Path>) -> io::Result<Self> {
        let file = File::open(path)?;
        let len = file.metadata()?.len();
        Ok(Self { file: RefCell::new(file), len })
    }
}

impl Resource for FileResource {
    fn len(&self) -> u64 {
        self.len
    }

    fn read_at(&self, offset: u64, buf: &mut [u8]) -> io::Result<usize> {
        let mut file = self.file.borrow_mut();
        file.seek(SeekFrom::Start(offset))?;
        file.read(buf)
    }
}

// ————————————————————————————————————————————————————————————————————————————
// CURSOR
// ————————————————————————————————————————————————————————————————————————————

/// Forward byte cursor over `[start, end)` reading `CHUNK_SIZE` windows.
pub struct ResourceCursor<'a> {
    resource: &'a dyn Resource,
    position: u64,
    end: u64,
    chunk: Vec<u8>,
    chunk_start: u64,
}

impl<'a> ResourceCursor<'a> {
    pub fn new(resource: &'a dyn Resource, start: u64, end: u64) -> Self {
        Self { resource, position: start, end: end.min(resource.len()), chunk: Vec::new(), chunk_start: start }
    }

    /// Offset of the next byte.
    pub fn position(&self) -> u64 {
        self.position
    }

    pub fn end(&self) -> u64 {
        self.end
    }

    pub fn peek(&mut self) -> Result<Option<u8>> {
        if self.position >= self.end {
            return Ok(None);
        }
        let in_chunk = self.position >= self.chunk_start
            && self.position < self.chunk_start + self.chunk.len() as u64;
        if !in_chunk {
            self.fill()?;
        }
        Ok(Some(self.chunk[(self.position - self.chunk_start) as usize]))
    }

    pub fn next_byte(&mut self) -> Result<Option<u8>> {
        let byte = self.peek()?;
        if byte.is_some() {
            self.position += 1;
        }
        Ok(byte)
    }

    /// Next byte that is not JSON whitespace, without consuming it.
    pub fn peek_non_ws(&mut self) -> Result<Option<u8>> {
        while let Some(b) = self.peek()? {
            if !matches!(b, b' ' | b'\t' | b'\n' | b'\r') {
                return Ok(Some(b));
            }
            self.position += 1;
        }
        Ok(None)
    }

    fn fill(&mut self) -> Result<()> {
        let want = CHUNK_SIZE.min((self.end - self.position) as usize);
        self.chunk.resize(want, 0);
        let n = self.resource.read_at(self.position, &mut self.chunk)?;
        if n == 0 {
            return Err(Error::invalid_resource(self.position, "unexpected end of input"));
        }
        self.chunk.truncate(n);
        self.chunk_start = self.position;
        Ok(())
    }
}

// ------------------------------- Tests ------------------------------------ //

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn memory_reads_are_counted() {
        let r = MemoryResource::from("hello");
        assert_eq!(r.reads(), 0);
        assert_eq!(read_range(&r, 1, 3).unwrap(), b"ell");
        assert_eq!(r.reads(), 1);
        assert!(read_range(&r, 3, 5).is_err());
    }

    #[test]
    fn cursor_reads_in_chunks() {
        let data = "x".repeat(CHUNK_SIZE * 2 + 10);
        let r = MemoryResource::from(data.as_str());
        let mut cursor = ResourceCursor::new(&r, 0, r.len());
        let mut count = 0;
        while cursor.next_byte().unwrap().is_some() {
            count += 1;
        }
        assert_eq!(count, data.len());
        assert_eq!(r.reads(), 3);
    }

    #[test]
    fn cursor_skips_whitespace_within_window() {
        let r = MemoryResource::from("  \n [1]");
        let mut cursor = ResourceCursor::new(&r, 0, 4);
        assert_eq!(cursor.peek_non_ws().unwrap(), None);
        let mut cursor = ResourceCursor::new(&r, 0, r.len());
        assert_eq!(cursor.peek_non_ws().unwrap(), Some(b'['));
        assert_eq!(cursor.position(), 4);
    }

    #[test]
    fn file_resource_reads_ranges() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(br#"{"k":[10]}"#).unwrap();
        let r = FileResource::open(file.path()).unwrap();
        assert_eq!(r.len(), 10);
        assert_eq!(read_range(&r, 5, 4).unwrap(), b"[10]");
    }
}
