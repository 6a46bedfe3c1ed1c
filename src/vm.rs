//! Translation between virtual addresses and file offsets.
//!
//! Two mappings share the `AddressSpace` contract: a page table, usable only
//! when every segment starts on a common page boundary, and a linear scan
//! over arbitrary ranges. `VirtualMemory` picks the page table when it can
//! and always keeps the linear map as the fallback.
use std::cell::RefCell;
use std::collections::HashMap;

use crate::consts::*;
use crate::errors::{Error, Result};

/// Page sizes probed for the page table mapping, largest first.
pub const PAGE_SIZES: [u64; 2] = [0x4000, 0x1000];

const CACHE_SLOTS: usize = 256;
const LINEAR_CACHE_LIMIT: usize = 0x1000;

/// How high tag bits are stripped from an address before lookup.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Detag {
    None,
    /// pick one from the cpu type and file type of the image
    Auto,
    /// keep the low 36 bits, dropping pointer authentication and tag bits
    Mask64,
    /// set the kernel high bits
    Kernel,
}

impl Default for Detag {
    fn default() -> Self {
        Detag::None
    }
}

impl Detag {
    /// Replace `Auto` with the policy for the given image.
    pub fn resolve(self, cputype: cpu_type_t, filetype: u32) -> Self {
        match self {
            Detag::Auto => Self::for_image(cputype, filetype),
            policy => policy,
        }
    }

    /// The policy a loader would pick for the given image.
    pub fn for_image(cputype: cpu_type_t, filetype: u32) -> Self {
        match (cputype, filetype) {
            (_, MH_KEXT_BUNDLE) | (_, MH_FILESET) if cputype & CPU_ARCH_ABI64 != 0 => Detag::Kernel,
            (CPU_TYPE_ARM64, _) => Detag::Mask64,
            _ => Detag::None,
        }
    }

    pub fn apply(self, address: u64) -> u64 {
        match self {
            Detag::None | Detag::Auto => address,
            Detag::Mask64 => address & 0xF_FFFF_FFFF,
            Detag::Kernel => address | 0xFFFF_0000_0000_0000,
        }
    }
}

/// A contiguous run of virtual memory backed by the file.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct MappedRange {
    pub vm_start: u64,
    pub vm_end: u64,
    pub file_start: u64,
}

impl MappedRange {
    pub fn contains(&self, vm: u64) -> bool {
        self.vm_start <= vm && vm < self.vm_end
    }

    pub fn contains_file(&self, offset: u64) -> bool {
        let file_end = self.file_start.saturating_add(self.vm_end - self.vm_start);

        self.file_start <= offset && offset < file_end
    }
}

pub trait AddressSpace {
    /// Register `size` bytes at `vm_start` backed by the file at `file_start`.
    fn map(&mut self, vm_start: u64, size: u64, file_start: u64) -> Result<()>;

    /// Translate a virtual address to a file offset.
    fn translate(&self, vm: u64) -> Result<u64>;

    /// Translate a file offset back to a virtual address.
    fn reverse(&self, offset: u64) -> Result<u64>;
}

/// A page table entry: the other side's page and how many bytes of it are mapped.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
struct PageEntry {
    page: u64,
    valid: u64,
}

/// Page table mapping with a direct-mapped translation cache.
///
/// The last page of a range may be mapped partially, lookups past its valid
/// bytes are unmapped.
#[derive(Debug)]
pub struct PagedVm {
    page_size: u64,
    detag: Detag,
    pages: HashMap<u64, PageEntry>,
    file_pages: HashMap<u64, PageEntry>,
    cache: RefCell<Vec<Option<(u64, u64)>>>,
}

impl PagedVm {
    pub fn new(page_size: u64, detag: Detag) -> Self {
        PagedVm {
            page_size,
            detag,
            pages: HashMap::new(),
            file_pages: HashMap::new(),
            cache: RefCell::new(vec![None; CACHE_SLOTS]),
        }
    }

    pub fn page_size(&self) -> u64 {
        self.page_size
    }

    fn slot(&self, vm: u64) -> usize {
        ((vm >> 3) as usize) % CACHE_SLOTS
    }
}

impl AddressSpace for PagedVm {
    fn map(&mut self, vm_start: u64, size: u64, file_start: u64) -> Result<()> {
        let vm_start = self.detag.apply(vm_start);

        for &value in &[vm_start, file_start] {
            if value % self.page_size != 0 {
                return Err(Error::AlignmentError {
                    address: vm_start,
                    size,
                    page_size: self.page_size,
                });
            }
        }

        let vm_page = vm_start / self.page_size;
        let file_page = file_start / self.page_size;

        let pages = size / self.page_size + if size % self.page_size == 0 { 0 } else { 1 };

        for i in 0..pages {
            let valid = (size - i * self.page_size).min(self.page_size);

            self.pages.insert(
                vm_page + i,
                PageEntry {
                    page: file_page + i,
                    valid,
                },
            );
            self.file_pages.entry(file_page + i).or_insert(PageEntry {
                page: vm_page + i,
                valid,
            });
        }

        self.cache.borrow_mut().iter_mut().for_each(|slot| *slot = None);

        Ok(())
    }

    fn translate(&self, vm: u64) -> Result<u64> {
        let vm = self.detag.apply(vm);
        let slot = self.slot(vm);

        if let Some((addr, offset)) = self.cache.borrow()[slot] {
            if addr == vm {
                return Ok(offset);
            }
        }

        let delta = vm % self.page_size;
        let entry = self
            .pages
            .get(&(vm / self.page_size))
            .filter(|entry| delta < entry.valid)
            .ok_or(Error::UnmappedAddress(vm))?;
        let offset = entry.page * self.page_size + delta;

        self.cache.borrow_mut()[slot] = Some((vm, offset));

        Ok(offset)
    }

    fn reverse(&self, offset: u64) -> Result<u64> {
        let delta = offset % self.page_size;

        self.file_pages
            .get(&(offset / self.page_size))
            .filter(|entry| delta < entry.valid)
            .map(|entry| self.detag.apply(entry.page * self.page_size + delta))
            .ok_or(Error::UnmappedAddress(offset))
    }
}

/// Unordered set of ranges, scanned until one contains the address.
#[derive(Debug, Default)]
pub struct LinearVm {
    detag: Detag,
    ranges: Vec<MappedRange>,
    cache: RefCell<HashMap<u64, u64>>,
}

impl LinearVm {
    pub fn new(detag: Detag) -> Self {
        LinearVm {
            detag,
            ..Default::default()
        }
    }

    pub fn ranges(&self) -> &[MappedRange] {
        &self.ranges
    }
}

impl AddressSpace for LinearVm {
    fn map(&mut self, vm_start: u64, size: u64, file_start: u64) -> Result<()> {
        let vm_start = self.detag.apply(vm_start);

        self.ranges.push(MappedRange {
            vm_start,
            vm_end: vm_start.saturating_add(size),
            file_start,
        });

        Ok(())
    }

    fn translate(&self, vm: u64) -> Result<u64> {
        let vm = self.detag.apply(vm);

        if let Some(&offset) = self.cache.borrow().get(&vm) {
            return Ok(offset);
        }

        let offset = self
            .ranges
            .iter()
            .find(|range| range.contains(vm))
            .map(|range| range.file_start + (vm - range.vm_start))
            .ok_or(Error::UnmappedAddress(vm))?;

        let mut cache = self.cache.borrow_mut();

        if cache.len() >= LINEAR_CACHE_LIMIT {
            cache.clear();
        }

        cache.insert(vm, offset);

        Ok(offset)
    }

    fn reverse(&self, offset: u64) -> Result<u64> {
        self.ranges
            .iter()
            .find(|range| range.contains_file(offset))
            .map(|range| self.detag.apply(range.vm_start + (offset - range.file_start)))
            .ok_or(Error::UnmappedAddress(offset))
    }
}

/// Pick the page size every segment starts on, given their `(vm, file)` starts.
///
/// Only 16 KiB and 4 KiB are tried; other CPU families fall back to the linear map.
pub fn probe_page_size<I>(segments: I) -> Option<u64>
where
    I: IntoIterator<Item = (u64, u64)> + Clone,
{
    PAGE_SIZES.iter().cloned().find(|&page_size| {
        segments
            .clone()
            .into_iter()
            .all(|(vm, file)| vm % page_size == 0 && file % page_size == 0)
    })
}

/// The address space of one image.
#[derive(Debug)]
pub struct VirtualMemory {
    detag: Detag,
    paged: Option<PagedVm>,
    linear: LinearVm,
}

impl VirtualMemory {
    pub fn new(page_size: Option<u64>, detag: Detag) -> Self {
        debug!(
            "use {} address space, detag={:?}",
            page_size.map_or("linear".to_owned(), |size| format!("0x{:x} paged", size)),
            detag
        );

        VirtualMemory {
            detag,
            paged: page_size.map(|size| PagedVm::new(size, detag)),
            linear: LinearVm::new(detag),
        }
    }

    pub fn detag(&self) -> Detag {
        self.detag
    }

    pub fn is_paged(&self) -> bool {
        self.paged.is_some()
    }

    pub fn ranges(&self) -> &[MappedRange] {
        self.linear.ranges()
    }

    /// Register a segment, in both the page table (when in use) and the linear map.
    pub fn map_segment(&mut self, vm_start: u64, size: u64, file_start: u64) -> Result<()> {
        if let Some(ref mut paged) = self.paged {
            paged.map(vm_start, size, file_start)?;
        }

        self.linear.map(vm_start, size, file_start)
    }

    /// Register a section in the linear map only.
    pub fn map_section(&mut self, vm_start: u64, size: u64, file_start: u64) -> Result<()> {
        self.linear.map(vm_start, size, file_start)
    }
}

impl AddressSpace for VirtualMemory {
    fn map(&mut self, vm_start: u64, size: u64, file_start: u64) -> Result<()> {
        self.map_segment(vm_start, size, file_start)
    }

    fn translate(&self, vm: u64) -> Result<u64> {
        match self.paged {
            Some(ref paged) => paged.translate(vm).or_else(|_| {
                trace!("page table miss for 0x{:x}, fall back to linear scan", vm);

                self.linear.translate(vm)
            }),
            None => self.linear.translate(vm),
        }
    }

    fn reverse(&self, offset: u64) -> Result<u64> {
        match self.paged {
            Some(ref paged) => paged.reverse(offset).or_else(|_| self.linear.reverse(offset)),
            None => self.linear.reverse(offset),
        }
    }
}
