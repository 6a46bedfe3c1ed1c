//! Byte range readers over the input file.
use std::collections::{HashMap, VecDeque};
use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::Path;
use std::sync::Mutex;

use memmap::Mmap;

use crate::errors::{Error, Result};

/// The longest C string `read_cstring` will scan for.
const MAX_CSTRING_LEN: usize = 0x10000;

/// A read-only source of bytes.
pub trait FileSource: Send + Sync {
    /// Total length of the source in bytes.
    fn len(&self) -> u64;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Read exactly `length` bytes at `offset`.
    fn read(&self, offset: u64, length: usize) -> Result<Vec<u8>>;

    /// Read a NUL terminated string starting at `offset`.
    fn read_cstring(&self, offset: u64) -> Result<String> {
        let mut v = Vec::new();
        let mut pos = offset;

        while pos < self.len() && v.len() < MAX_CSTRING_LEN {
            let chunk = (self.len() - pos).min(256) as usize;
            let bytes = self.read(pos, chunk)?;

            if let Some(end) = bytes.iter().position(|&b| b == 0) {
                v.extend_from_slice(&bytes[..end]);

                return Ok(String::from_utf8(v)?);
            }

            v.extend_from_slice(&bytes);
            pos += chunk as u64;
        }

        Err(Error::truncated(offset, v.len() + 1, v.len()))
    }
}

fn check_range(offset: u64, length: usize, len: u64) -> Result<()> {
    match offset.checked_add(length as u64) {
        Some(end) if end <= len => Ok(()),
        _ => Err(Error::truncated(offset, length, len.saturating_sub(offset) as usize)),
    }
}

/// A source held entirely in memory.
#[derive(Clone, Debug, Default)]
pub struct MemorySource {
    data: Vec<u8>,
}

impl MemorySource {
    pub fn new(data: Vec<u8>) -> Self {
        MemorySource { data }
    }

    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut data = Vec::new();

        File::open(path)?.read_to_end(&mut data)?;

        Ok(MemorySource { data })
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }
}

impl From<Vec<u8>> for MemorySource {
    fn from(data: Vec<u8>) -> Self {
        MemorySource::new(data)
    }
}

impl FileSource for MemorySource {
    fn len(&self) -> u64 {
        self.data.len() as u64
    }

    fn read(&self, offset: u64, length: usize) -> Result<Vec<u8>> {
        check_range(offset, length, self.len())?;

        let start = offset as usize;

        Ok(self.data[start..start + length].to_vec())
    }
}

/// A file mapped into memory once and read by range.
#[derive(Debug)]
pub struct MmapSource {
    // an empty file can't be mapped
    mmap: Option<Mmap>,
}

impl MmapSource {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = File::open(path)?;
        let mmap = if file.metadata()?.len() == 0 {
            None
        } else {
            Some(unsafe { Mmap::map(&file) }?)
        };

        Ok(MmapSource { mmap })
    }

    pub fn as_bytes(&self) -> &[u8] {
        self.mmap.as_deref().unwrap_or(&[])
    }
}

impl FileSource for MmapSource {
    fn len(&self) -> u64 {
        self.as_bytes().len() as u64
    }

    fn read(&self, offset: u64, length: usize) -> Result<Vec<u8>> {
        check_range(offset, length, self.len())?;

        let start = offset as usize;

        Ok(self.as_bytes()[start..start + length].to_vec())
    }
}

#[derive(Debug)]
struct PageCache {
    file: File,
    pages: HashMap<u64, Vec<u8>>,
    lru: VecDeque<u64>,
}

/// A file reader backed by a bounded cache of pages, for inputs
/// too large to hold in memory or address space, such as a shared cache.
///
/// At most `max_pages * DEFAULT_PAGE_SIZE` bytes are resident.
#[derive(Debug)]
pub struct PagedFileSource {
    len: u64,
    page_size: u64,
    max_pages: usize,
    cache: Mutex<PageCache>,
}

impl PagedFileSource {
    pub const DEFAULT_PAGE_SIZE: u64 = 0x4000;

    pub fn open<P: AsRef<Path>>(path: P, max_pages: usize) -> Result<Self> {
        let file = File::open(path)?;
        let len = file.metadata()?.len();

        Ok(PagedFileSource {
            len,
            page_size: Self::DEFAULT_PAGE_SIZE,
            max_pages: max_pages.max(1),
            cache: Mutex::new(PageCache {
                file,
                pages: HashMap::new(),
                lru: VecDeque::new(),
            }),
        })
    }

    fn with_page<F>(&self, cache: &mut PageCache, page: u64, f: F) -> Result<()>
    where
        F: FnOnce(&[u8]),
    {
        if cache.pages.contains_key(&page) {
            if let Some(pos) = cache.lru.iter().position(|&p| p == page) {
                cache.lru.remove(pos);
            }
        } else {
            let start = page * self.page_size;
            let size = (self.len - start).min(self.page_size) as usize;
            let mut buf = vec![0; size];

            cache.file.seek(SeekFrom::Start(start))?;
            cache.file.read_exact(&mut buf)?;

            trace!("load page #{} at 0x{:x} with {} bytes", page, start, size);

            if cache.pages.len() >= self.max_pages {
                if let Some(evicted) = cache.lru.pop_front() {
                    cache.pages.remove(&evicted);
                }
            }

            cache.pages.insert(page, buf);
        }

        cache.lru.push_back(page);

        if let Some(buf) = cache.pages.get(&page) {
            f(buf);
        }

        Ok(())
    }
}

impl FileSource for PagedFileSource {
    fn len(&self) -> u64 {
        self.len
    }

    fn read(&self, offset: u64, length: usize) -> Result<Vec<u8>> {
        check_range(offset, length, self.len)?;

        let mut cache = self
            .cache
            .lock()
            .map_err(|_| Error::LoadError("page cache lock poisoned".to_owned()))?;
        let mut out = Vec::with_capacity(length);
        let end = offset + length as u64;
        let mut pos = offset;

        while pos < end {
            let page = pos / self.page_size;
            let page_off = (pos % self.page_size) as usize;
            let want = (end - pos).min(self.page_size - page_off as u64) as usize;

            self.with_page(&mut cache, page, |buf| {
                out.extend_from_slice(&buf[page_off..page_off + want]);
            })?;

            pos += want as u64;
        }

        Ok(out)
    }
}
