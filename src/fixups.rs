//! The chained fixups of `LC_DYLD_CHAINED_FIXUPS`.
//!
//! The fixups blob starts with a header pointing at three tables: the chain
//! starts of each segment, the imports and the symbol names. Rebases and binds
//! are not listed anywhere, they live in the pointer slots themselves, each slot
//! holding the distance to the next slot of its page.
use std::fmt;

use crate::consts::*;
use crate::errors::{Diagnostic, Error, Result};
use crate::image::Segment;
use crate::layout::{fixed_size_string, Layouts};
use crate::loader::Slice;
use crate::opcode::{BindKind, BindRecord, BindSymbolFlags, SymbolType};

/// The fixed part of `dyld_chained_starts_in_segment`, before the page starts.
const STARTS_IN_SEGMENT_SIZE: usize = 22;

/// The encoding of the pointer slots of a segment.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PointerFormat(pub u16);

impl PointerFormat {
    pub fn is_arm64e(self) -> bool {
        match self.0 {
            DYLD_CHAINED_PTR_ARM64E
            | DYLD_CHAINED_PTR_ARM64E_KERNEL
            | DYLD_CHAINED_PTR_ARM64E_USERLAND
            | DYLD_CHAINED_PTR_ARM64E_FIRMWARE
            | DYLD_CHAINED_PTR_ARM64E_USERLAND24 => true,
            _ => false,
        }
    }

    /// The unit of the `next` field, in bytes.
    pub fn stride(self) -> Option<u64> {
        match self.0 {
            DYLD_CHAINED_PTR_ARM64E | DYLD_CHAINED_PTR_ARM64E_USERLAND | DYLD_CHAINED_PTR_ARM64E_USERLAND24 => Some(8),
            DYLD_CHAINED_PTR_ARM64E_KERNEL
            | DYLD_CHAINED_PTR_ARM64E_FIRMWARE
            | DYLD_CHAINED_PTR_64
            | DYLD_CHAINED_PTR_64_OFFSET
            | DYLD_CHAINED_PTR_64_KERNEL_CACHE
            | DYLD_CHAINED_PTR_32
            | DYLD_CHAINED_PTR_32_CACHE
            | DYLD_CHAINED_PTR_32_FIRMWARE => Some(4),
            DYLD_CHAINED_PTR_X86_64_KERNEL_CACHE => Some(1),
            _ => None,
        }
    }

    /// The size of a pointer slot, in bytes.
    pub fn width(self) -> usize {
        match self.0 {
            DYLD_CHAINED_PTR_32 | DYLD_CHAINED_PTR_32_CACHE | DYLD_CHAINED_PTR_32_FIRMWARE => 4,
            _ => 8,
        }
    }

    /// Decode one pointer slot.
    ///
    /// Targets stored as an offset from the image are rebased on `image_base`.
    pub fn decode(self, layouts: &Layouts, raw: &[u8], image_base: u64) -> Result<ChainedPointer> {
        let width = self.width();
        let value = layouts.uint_at(raw, 0, width)?;

        if self.is_arm64e() {
            let auth = (value >> 63) & 1 == 1;
            let bind = (value >> 62) & 1 == 1;
            let bind24 = self.0 == DYLD_CHAINED_PTR_ARM64E_USERLAND24;
            let name = match (bind, auth, bind24) {
                (true, true, true) => "dyld_chained_ptr_arm64e_auth_bind24",
                (true, true, false) => "dyld_chained_ptr_arm64e_auth_bind",
                (true, false, true) => "dyld_chained_ptr_arm64e_bind24",
                (true, false, false) => "dyld_chained_ptr_arm64e_bind",
                (false, true, _) => "dyld_chained_ptr_arm64e_auth_rebase",
                (false, false, _) => "dyld_chained_ptr_arm64e_rebase",
            };
            let ptr = layouts.decode(name, raw, 0, width)?;
            let next = ptr.u64("next")?;

            return Ok(if bind {
                let addend = if auth {
                    0
                } else {
                    // 19 bits, signed
                    ((ptr.u64("addend")? << 45) as i64) >> 45
                };

                ChainedPointer::Bind {
                    ordinal: ptr.u64("ordinal")?,
                    addend,
                    next,
                }
            } else if auth {
                ChainedPointer::Rebase {
                    target: image_base.wrapping_add(ptr.u64("target")?),
                    next,
                }
            } else {
                let target = ptr.u64("target")?;
                let target = match self.0 {
                    DYLD_CHAINED_PTR_ARM64E | DYLD_CHAINED_PTR_ARM64E_FIRMWARE => target,
                    _ => image_base.wrapping_add(target),
                };

                ChainedPointer::Rebase {
                    target: target | (ptr.u64("high8")? << 56),
                    next,
                }
            });
        }

        Ok(match self.0 {
            DYLD_CHAINED_PTR_64 | DYLD_CHAINED_PTR_64_OFFSET if (value >> 63) & 1 == 1 => {
                let ptr = layouts.decode("dyld_chained_ptr_64_bind", raw, 0, width)?;

                ChainedPointer::Bind {
                    ordinal: ptr.u64("ordinal")?,
                    addend: ptr.u64("addend")? as i64,
                    next: ptr.u64("next")?,
                }
            }
            DYLD_CHAINED_PTR_64 | DYLD_CHAINED_PTR_64_OFFSET => {
                let ptr = layouts.decode("dyld_chained_ptr_64_rebase", raw, 0, width)?;
                let target = ptr.u64("target")?;
                let target = if self.0 == DYLD_CHAINED_PTR_64_OFFSET {
                    image_base.wrapping_add(target)
                } else {
                    target
                };

                ChainedPointer::Rebase {
                    target: target | (ptr.u64("high8")? << 56),
                    next: ptr.u64("next")?,
                }
            }
            DYLD_CHAINED_PTR_64_KERNEL_CACHE | DYLD_CHAINED_PTR_X86_64_KERNEL_CACHE => {
                let ptr = layouts.decode("dyld_chained_ptr_64_kernel_cache_rebase", raw, 0, width)?;

                ChainedPointer::Rebase {
                    target: image_base.wrapping_add(ptr.u64("target")?),
                    next: ptr.u64("next")?,
                }
            }
            DYLD_CHAINED_PTR_32 if (value >> 31) & 1 == 1 => {
                let ptr = layouts.decode("dyld_chained_ptr_32_bind", raw, 0, width)?;

                ChainedPointer::Bind {
                    ordinal: ptr.u64("ordinal")?,
                    addend: ptr.u64("addend")? as i64,
                    next: ptr.u64("next")?,
                }
            }
            DYLD_CHAINED_PTR_32 => {
                let ptr = layouts.decode("dyld_chained_ptr_32_rebase", raw, 0, width)?;

                ChainedPointer::Rebase {
                    target: ptr.u64("target")?,
                    next: ptr.u64("next")?,
                }
            }
            DYLD_CHAINED_PTR_32_CACHE => {
                let ptr = layouts.decode("dyld_chained_ptr_32_cache_rebase", raw, 0, width)?;

                ChainedPointer::Rebase {
                    target: image_base.wrapping_add(ptr.u64("target")?),
                    next: ptr.u64("next")?,
                }
            }
            DYLD_CHAINED_PTR_32_FIRMWARE => {
                let ptr = layouts.decode("dyld_chained_ptr_32_firmware_rebase", raw, 0, width)?;

                ChainedPointer::Rebase {
                    target: ptr.u64("target")?,
                    next: ptr.u64("next")?,
                }
            }
            format => return Err(Error::LoadError(format!("unknown chained pointer format {}", format))),
        })
    }
}

impl fmt::Display for PointerFormat {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(match self.0 {
            DYLD_CHAINED_PTR_ARM64E => "arm64e",
            DYLD_CHAINED_PTR_64 => "generic64",
            DYLD_CHAINED_PTR_32 => "generic32",
            DYLD_CHAINED_PTR_32_CACHE => "cache32",
            DYLD_CHAINED_PTR_32_FIRMWARE => "firmware32",
            DYLD_CHAINED_PTR_64_OFFSET => "offset64",
            DYLD_CHAINED_PTR_ARM64E_KERNEL => "arm64e-kernel",
            DYLD_CHAINED_PTR_64_KERNEL_CACHE => "kernel-cache64",
            DYLD_CHAINED_PTR_ARM64E_USERLAND => "arm64e-userland",
            DYLD_CHAINED_PTR_ARM64E_FIRMWARE => "arm64e-firmware",
            DYLD_CHAINED_PTR_X86_64_KERNEL_CACHE => "x86_64-kernel-cache",
            DYLD_CHAINED_PTR_ARM64E_USERLAND24 => "arm64e-userland24",
            _ => "unknown",
        })
    }
}

/// A decoded pointer slot.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ChainedPointer {
    Rebase { target: u64, next: u64 },
    Bind { ordinal: u64, addend: i64, next: u64 },
}

impl ChainedPointer {
    pub fn next(&self) -> u64 {
        match *self {
            ChainedPointer::Rebase { next, .. } | ChainedPointer::Bind { next, .. } => next,
        }
    }
}

/// An entry of the imports table.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ChainedImport {
    pub ordinal: i64,
    pub weak: bool,
    pub name: String,
    pub addend: i64,
}

/// A rebase found in a pointer chain.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ChainedRebase {
    pub segment_index: usize,
    pub segment_offset: u64,
    pub address: u64,
    /// the unslid pointer value
    pub target: u64,
}

/// What the walker needs to know about the image.
pub struct FixupTarget<'a> {
    pub layouts: &'a Layouts,
    pub slice: &'a Slice,
    pub segments: &'a [Segment],
    /// address of the mach header, base of the offset encoded targets
    pub image_base: u64,
    pub max_chain_steps: usize,
}

/// The decoded `LC_DYLD_CHAINED_FIXUPS` payload.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ChainedFixups {
    pub version: u32,
    pub imports: Vec<ChainedImport>,
    pub binds: Vec<BindRecord>,
    pub rebases: Vec<ChainedRebase>,
}

impl ChainedFixups {
    /// Decode the fixups blob and walk every chain of every segment.
    ///
    /// Bad imports and binds are reported to `diagnostics`, as are chains that
    /// fail, such as one longer than `max_chain_steps`: the fixups of that chain
    /// are dropped and the walk goes on with the next one. A malformed blob
    /// fails the whole walk.
    pub fn parse<F>(
        blob: &[u8],
        target: &FixupTarget,
        library_name: F,
        diagnostics: &mut Vec<Diagnostic>,
    ) -> Result<ChainedFixups>
    where
        F: Fn(i64) -> String,
    {
        let layouts = target.layouts;
        let header = layouts.decode("dyld_chained_fixups_header", blob, 0, 8)?;
        let version = header.u32("fixups_version")?;

        if version != 0 {
            return Err(Error::LoadError(format!("unknown chained fixups version {}", version)));
        }

        if header.u32("symbols_format")? != 0 {
            return Err(Error::LoadError("compressed chained fixups symbols".to_owned()));
        }

        debug!(
            "chained fixups with {} imports of format {}, starts @ 0x{:x}",
            header.u32("imports_count")?,
            header.u32("imports_format")?,
            header.u32("starts_offset")?
        );

        let imports = Self::parse_imports(
            layouts,
            blob,
            header.u32("imports_format")?,
            header.u32("imports_offset")? as usize,
            header.u32("imports_count")? as usize,
            header.u32("symbols_offset")? as usize,
            diagnostics,
        )?;

        let mut fixups = ChainedFixups {
            version,
            imports,
            binds: vec![],
            rebases: vec![],
        };

        let starts_offset = header.u32("starts_offset")? as usize;

        if starts_offset == 0 {
            return Ok(fixups);
        }

        let seg_count = layouts.uint_at(blob, starts_offset, 4)? as usize;

        for seg_idx in 0..seg_count {
            let seg_info_offset = layouts.uint_at(blob, starts_offset + 4 + seg_idx * 4, 4)? as usize;

            if seg_info_offset == 0 {
                continue;
            }

            let segment = match target.segments.get(seg_idx) {
                Some(segment) => segment,
                None => {
                    let msg = format!("chain starts for missing segment #{}", seg_idx);

                    warn!("{}", msg);
                    diagnostics.push(Diagnostic::new("chained-fixups", msg));

                    continue;
                }
            };

            fixups.walk_segment(
                blob,
                starts_offset + seg_info_offset,
                seg_idx,
                segment,
                target,
                &library_name,
                diagnostics,
            )?;
        }

        debug!(
            "chained fixups yield {} binds and {} rebases",
            fixups.binds.len(),
            fixups.rebases.len()
        );

        Ok(fixups)
    }

    fn parse_imports(
        layouts: &Layouts,
        blob: &[u8],
        format: u32,
        offset: usize,
        count: usize,
        symbols_offset: usize,
        diagnostics: &mut Vec<Diagnostic>,
    ) -> Result<Vec<ChainedImport>> {
        let (name, ordinal_bits) = match format {
            DYLD_CHAINED_IMPORT => ("dyld_chained_import", 8),
            DYLD_CHAINED_IMPORT_ADDEND => ("dyld_chained_import_addend", 8),
            DYLD_CHAINED_IMPORT_ADDEND64 => ("dyld_chained_import_addend64", 16),
            _ => return Err(Error::LoadError(format!("unknown chained imports format {}", format))),
        };
        let size = layouts.size_of(name, 8)?;

        (0..count)
            .map(|i| {
                let record = layouts.decode(name, blob, offset + i * size, 8)?;
                let name_offset = record.u64("name_offset")? as usize;
                let name = match symbols_offset
                    .checked_add(name_offset)
                    .and_then(|start| blob.get(start..))
                    .filter(|bytes| bytes.contains(&0))
                {
                    Some(bytes) => fixed_size_string(bytes),
                    None => {
                        let msg = format!("import #{} name offset 0x{:x} is out of the symbols", i, name_offset);

                        warn!("{}", msg);
                        diagnostics.push(Diagnostic::new("chained-fixups", msg));

                        format!("<symbol 0x{:x}>", name_offset)
                    }
                };
                let addend = match format {
                    DYLD_CHAINED_IMPORT => 0,
                    _ => record.i64("addend")?,
                };

                Ok(ChainedImport {
                    ordinal: import_ordinal(record.u64("lib_ordinal")?, ordinal_bits),
                    weak: record.u64("weak_import")? != 0,
                    name,
                    addend,
                })
            })
            .collect()
    }

    #[allow(clippy::too_many_arguments)]
    fn walk_segment<F>(
        &mut self,
        blob: &[u8],
        offset: usize,
        seg_idx: usize,
        segment: &Segment,
        target: &FixupTarget,
        library_name: &F,
        diagnostics: &mut Vec<Diagnostic>,
    ) -> Result<()>
    where
        F: Fn(i64) -> String,
    {
        let layouts = target.layouts;
        let starts = layouts.decode("dyld_chained_starts_in_segment", blob, offset, 8)?;
        let format = PointerFormat(starts.u64("pointer_format")? as u16);
        let page_size = starts.u64("page_size")?;
        let page_count = starts.u64("page_count")? as usize;
        // the page starts may be followed by the overflow starts of multi chain pages
        let entries = ((starts.u64("size")? as usize).saturating_sub(STARTS_IN_SEGMENT_SIZE) / 2).max(page_count);
        let page_starts = (0..entries)
            .map(|i| layouts.uint_at(blob, offset + STARTS_IN_SEGMENT_SIZE + i * 2, 2).map(|v| v as u16))
            .collect::<Result<Vec<u16>>>()?;

        let stride = match format.stride() {
            Some(stride) => stride,
            None => {
                let msg = format!("segment {} uses unknown pointer format {}", segment.name, format.0);

                warn!("{}", msg);
                diagnostics.push(Diagnostic::new("chained-fixups", msg));

                return Ok(());
            }
        };

        debug!(
            "segment #{} {}: {} pointers, page size 0x{:x}, {} pages",
            seg_idx, segment.name, format, page_size, page_count
        );

        for page_idx in 0..page_count {
            let start = page_starts[page_idx];

            if start == DYLD_CHAINED_PTR_START_NONE {
                continue;
            }

            if format.width() == 4 && start & DYLD_CHAINED_PTR_START_MULTI != 0 {
                let mut i = usize::from(start & !DYLD_CHAINED_PTR_START_MULTI);

                loop {
                    let start = match page_starts.get(i) {
                        Some(&start) => start,
                        None => {
                            let msg = format!(
                                "page #{} of segment #{} refers to missing chain start #{}",
                                page_idx, seg_idx, i
                            );

                            warn!("{}", msg);
                            diagnostics.push(Diagnostic::new("chained-fixups", msg));

                            break;
                        }
                    };

                    self.walk_page(
                        seg_idx,
                        segment,
                        page_idx as u64 * page_size + u64::from(start & !DYLD_CHAINED_PTR_START_LAST),
                        page_idx,
                        format,
                        stride,
                        target,
                        library_name,
                        diagnostics,
                    );

                    if start & DYLD_CHAINED_PTR_START_LAST != 0 {
                        break;
                    }

                    i += 1;
                }
            } else {
                self.walk_page(
                    seg_idx,
                    segment,
                    page_idx as u64 * page_size + u64::from(start),
                    page_idx,
                    format,
                    stride,
                    target,
                    library_name,
                    diagnostics,
                );
            }
        }

        Ok(())
    }

    /// Walk one chain, dropping the fixups it produced when it fails.
    #[allow(clippy::too_many_arguments)]
    fn walk_page<F>(
        &mut self,
        seg_idx: usize,
        segment: &Segment,
        segment_offset: u64,
        page_idx: usize,
        format: PointerFormat,
        stride: u64,
        target: &FixupTarget,
        library_name: &F,
        diagnostics: &mut Vec<Diagnostic>,
    ) where
        F: Fn(i64) -> String,
    {
        let (binds, rebases) = (self.binds.len(), self.rebases.len());

        if let Err(err) = self.walk_chain(
            seg_idx,
            segment,
            segment_offset,
            page_idx,
            format,
            stride,
            target,
            library_name,
            diagnostics,
        ) {
            warn!("{}", err);
            diagnostics.push(Diagnostic::new("chained-fixups", err.to_string()));

            self.binds.truncate(binds);
            self.rebases.truncate(rebases);
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn walk_chain<F>(
        &mut self,
        seg_idx: usize,
        segment: &Segment,
        mut segment_offset: u64,
        page_idx: usize,
        format: PointerFormat,
        stride: u64,
        target: &FixupTarget,
        library_name: &F,
        diagnostics: &mut Vec<Diagnostic>,
    ) -> Result<()>
    where
        F: Fn(i64) -> String,
    {
        let width = format.width();

        for _ in 0..target.max_chain_steps {
            if segment_offset + width as u64 > segment.filesize {
                let msg = format!(
                    "chain of page #{} leaves segment {} at offset 0x{:x}",
                    page_idx, segment.name, segment_offset
                );

                warn!("{}", msg);
                diagnostics.push(Diagnostic::new("chained-fixups", msg));

                return Ok(());
            }

            let raw = target.slice.read(segment.fileoff + segment_offset, width)?;
            let ptr = format.decode(target.layouts, &raw, target.image_base)?;
            let address = segment.vmaddr + segment_offset;

            trace!("chained slot @ 0x{:x}: {:?}", address, ptr);

            match ptr {
                ChainedPointer::Rebase { target, .. } => self.rebases.push(ChainedRebase {
                    segment_index: seg_idx,
                    segment_offset,
                    address,
                    target,
                }),
                ChainedPointer::Bind { ordinal, addend, .. } => match self.imports.get(ordinal as usize) {
                    Some(import) => self.binds.push(BindRecord {
                        kind: BindKind::Chained,
                        segment_index: seg_idx,
                        segment_offset,
                        address,
                        ordinal: import.ordinal,
                        library: library_name(import.ordinal),
                        symbol: import.name.clone(),
                        flags: if import.weak {
                            BindSymbolFlags::WEAK_IMPORT
                        } else {
                            BindSymbolFlags::empty()
                        },
                        bind_type: SymbolType::Pointer,
                        addend: import.addend.wrapping_add(addend),
                    }),
                    None => {
                        let msg = format!(
                            "bind @ 0x{:x} refers to import #{} of {}",
                            address,
                            ordinal,
                            self.imports.len()
                        );

                        warn!("{}", msg);
                        diagnostics.push(Diagnostic::new("chained-fixups", msg));
                    }
                },
            }

            match ptr.next() {
                0 => return Ok(()),
                next => segment_offset += next * stride,
            }
        }

        Err(Error::UnterminatedChain {
            segment: seg_idx,
            page: page_idx,
            steps: target.max_chain_steps,
        })
    }
}

/// Library ordinals near the top of the field are the negative special ordinals.
fn import_ordinal(raw: u64, bits: u32) -> i64 {
    let limit = (1u64 << bits) - 0x10;

    if raw > limit {
        raw as i64 - (1i64 << bits)
    } else {
        raw as i64
    }
}

#[cfg(test)]
pub mod tests {
    use std::sync::Arc;

    use byteorder::{LittleEndian, WriteBytesExt};

    use super::*;
    use crate::layout::Endian;
    use crate::source::MemorySource;

    const DATA_FILEOFF: u64 = 0x4000;
    const DATA_VMADDR: u64 = 0x100004000;

    fn segments() -> Vec<Segment> {
        vec![
            Segment {
                name: SEG_TEXT.to_owned(),
                vmaddr: 0x100000000,
                vmsize: 0x4000,
                fileoff: 0,
                filesize: 0x4000,
                ..Default::default()
            },
            Segment {
                name: SEG_DATA_CONST.to_owned(),
                vmaddr: DATA_VMADDR,
                vmsize: 0x4000,
                fileoff: DATA_FILEOFF,
                filesize: 0x4000,
                ..Default::default()
            },
        ]
    }

    fn fixups_blob(pointer_format: u16, page_starts: &[u16]) -> Vec<u8> {
        paged_fixups_blob(pointer_format, 0x4000, page_starts)
    }

    /// A fixups blob with one import `_puts` from ordinal 1 and chains in the second segment.
    fn paged_fixups_blob(pointer_format: u16, page_size: u16, page_starts: &[u16]) -> Vec<u8> {
        let mut blob = Vec::new();
        let starts_offset = 28u32;
        let seg_starts = 4 + 2 * 4;
        let seg_size = STARTS_IN_SEGMENT_SIZE + 2 * page_starts.len();
        let imports_offset = starts_offset + seg_starts + seg_size as u32;
        let symbols_offset = imports_offset + 4;

        for &v in &[0, starts_offset, imports_offset, symbols_offset, 1, DYLD_CHAINED_IMPORT, 0] {
            blob.write_u32::<LittleEndian>(v).unwrap();
        }

        // starts in image: two segments, only the second has chains
        blob.write_u32::<LittleEndian>(2).unwrap();
        blob.write_u32::<LittleEndian>(0).unwrap();
        blob.write_u32::<LittleEndian>(seg_starts).unwrap();

        // starts in segment
        blob.write_u32::<LittleEndian>(seg_size as u32).unwrap();
        blob.write_u16::<LittleEndian>(page_size).unwrap();
        blob.write_u16::<LittleEndian>(pointer_format).unwrap();
        blob.write_u64::<LittleEndian>(0x4000).unwrap();
        blob.write_u32::<LittleEndian>(0).unwrap();
        blob.write_u16::<LittleEndian>(page_starts.len() as u16).unwrap();
        for &start in page_starts {
            blob.write_u16::<LittleEndian>(start).unwrap();
        }

        // import: lib_ordinal 1, name_offset 1
        blob.write_u32::<LittleEndian>(1 | (1 << 9)).unwrap();
        blob.extend_from_slice(b"\0_puts\0");
        blob
    }

    fn image_with_slots(slots: &[(u64, u64)]) -> Slice {
        let mut data = vec![0u8; 0x8000];

        for &(offset, value) in slots {
            let pos = (DATA_FILEOFF + offset) as usize;

            data[pos..pos + 8].copy_from_slice(&value.to_le_bytes());
        }

        Slice::new(Arc::new(MemorySource::new(data)), 0, 0x8000, CPU_TYPE_ARM64, 0)
    }

    fn library_name(ordinal: i64) -> String {
        format!("lib{}", ordinal)
    }

    fn rebase64(target: u64, next: u64) -> u64 {
        target | (next << 51)
    }

    fn bind64(ordinal: u64, next: u64) -> u64 {
        ordinal | (next << 51) | (1 << 63)
    }

    #[test]
    fn test_walk_generic64_chain() {
        let layouts = Layouts::macho(Endian::Little);
        let segments = segments();
        let slice = image_with_slots(&[
            (0x10, rebase64(0x100000f00, 2)),
            (0x18, bind64(0, 2)),
            (0x20, rebase64(0x100000f80, 0)),
        ]);
        let target = FixupTarget {
            layouts: &layouts,
            slice: &slice,
            segments: &segments,
            image_base: 0x100000000,
            max_chain_steps: 16,
        };
        let mut diagnostics = vec![];
        let fixups = ChainedFixups::parse(
            &fixups_blob(DYLD_CHAINED_PTR_64, &[0x10]),
            &target,
            library_name,
            &mut diagnostics,
        )
        .unwrap();

        assert!(diagnostics.is_empty(), "{:?}", diagnostics);
        assert_eq!(
            fixups.imports,
            vec![ChainedImport {
                ordinal: 1,
                weak: false,
                name: "_puts".to_owned(),
                addend: 0,
            }]
        );
        assert_eq!(
            fixups
                .rebases
                .iter()
                .map(|rebase| (rebase.address, rebase.target))
                .collect::<Vec<_>>(),
            vec![(DATA_VMADDR + 0x10, 0x100000f00), (DATA_VMADDR + 0x20, 0x100000f80)]
        );
        assert_eq!(fixups.binds.len(), 1);
        assert_eq!(fixups.binds[0].symbol, "_puts");
        assert_eq!(fixups.binds[0].library, "lib1");
        assert_eq!(fixups.binds[0].address, DATA_VMADDR + 0x18);
        assert_eq!(fixups.binds[0].segment_index, 1);
        assert_eq!(fixups.binds[0].kind, BindKind::Chained);
    }

    #[test]
    fn test_walk_arm64e_chain() {
        let layouts = Layouts::macho(Endian::Little);
        let segments = segments();
        // plain rebase to offset 0xf00, then an auth bind of import #0
        let rebase = 0xf00u64 | (1 << 51);
        let auth_bind = (1u64 << 62) | (1 << 63);
        let slice = image_with_slots(&[(0x20, rebase), (0x28, auth_bind)]);
        let target = FixupTarget {
            layouts: &layouts,
            slice: &slice,
            segments: &segments,
            image_base: 0x100000000,
            max_chain_steps: 16,
        };
        let mut diagnostics = vec![];
        let fixups = ChainedFixups::parse(
            &fixups_blob(DYLD_CHAINED_PTR_ARM64E_USERLAND, &[DYLD_CHAINED_PTR_START_NONE, 0x20]),
            &target,
            library_name,
            &mut diagnostics,
        );

        // the second page is past the segment
        assert!(fixups.is_ok());
        assert_eq!(diagnostics.len(), 1);

        let mut diagnostics = vec![];
        let fixups = ChainedFixups::parse(
            &fixups_blob(DYLD_CHAINED_PTR_ARM64E_USERLAND, &[0x20]),
            &target,
            library_name,
            &mut diagnostics,
        )
        .unwrap();

        assert!(diagnostics.is_empty(), "{:?}", diagnostics);
        assert_eq!(fixups.rebases.len(), 1);
        assert_eq!(fixups.rebases[0].target, 0x100000f00);
        assert_eq!(fixups.binds.len(), 1);
        assert_eq!(fixups.binds[0].address, DATA_VMADDR + 0x28);
    }

    #[test]
    fn test_unterminated_chain() {
        let layouts = Layouts::macho(Endian::Little);
        let segments = segments();
        // page #0 never ends, page #1 holds a rebase and a bind
        let mut slots = (0..64).map(|i| (i * 8, rebase64(0x100000000, 2))).collect::<Vec<_>>();
        slots.push((0x1000, rebase64(0x100000f00, 2)));
        slots.push((0x1008, bind64(0, 0)));
        let slice = image_with_slots(&slots);
        let target = FixupTarget {
            layouts: &layouts,
            slice: &slice,
            segments: &segments,
            image_base: 0x100000000,
            max_chain_steps: 8,
        };
        let mut diagnostics = vec![];
        let fixups = ChainedFixups::parse(
            &paged_fixups_blob(DYLD_CHAINED_PTR_64, 0x1000, &[0, 0]),
            &target,
            library_name,
            &mut diagnostics,
        )
        .unwrap();

        assert_eq!(fixups.imports.len(), 1);
        assert_eq!(
            fixups.rebases.iter().map(|rebase| rebase.address).collect::<Vec<_>>(),
            vec![DATA_VMADDR + 0x1000]
        );
        assert_eq!(fixups.binds.len(), 1);
        assert_eq!(fixups.binds[0].address, DATA_VMADDR + 0x1008);
        assert_eq!(
            diagnostics,
            vec![Diagnostic::new(
                "chained-fixups",
                Error::UnterminatedChain {
                    segment: 1,
                    page: 0,
                    steps: 8
                }
                .to_string()
            )]
        );
    }

    #[test]
    fn test_bad_bind_ordinal() {
        let layouts = Layouts::macho(Endian::Little);
        let segments = segments();
        let slice = image_with_slots(&[(0, bind64(5, 0))]);
        let target = FixupTarget {
            layouts: &layouts,
            slice: &slice,
            segments: &segments,
            image_base: 0x100000000,
            max_chain_steps: 8,
        };
        let mut diagnostics = vec![];
        let fixups = ChainedFixups::parse(
            &fixups_blob(DYLD_CHAINED_PTR_64, &[0]),
            &target,
            library_name,
            &mut diagnostics,
        )
        .unwrap();

        assert!(fixups.binds.is_empty());
        assert_eq!(diagnostics.len(), 1);
    }

    #[test]
    fn test_truncated_blob() {
        let layouts = Layouts::macho(Endian::Little);
        let segments = segments();
        let slice = image_with_slots(&[]);
        let target = FixupTarget {
            layouts: &layouts,
            slice: &slice,
            segments: &segments,
            image_base: 0x100000000,
            max_chain_steps: 8,
        };
        let blob = fixups_blob(DYLD_CHAINED_PTR_64, &[0]);

        for len in &[0, 27, 40, 60] {
            assert!(
                matches!(
                    ChainedFixups::parse(&blob[..*len], &target, library_name, &mut vec![]),
                    Err(Error::TruncatedInput { .. })
                ),
                "truncated at {}",
                len
            );
        }
    }

    #[test]
    fn test_pointer_formats() {
        let layouts = Layouts::macho(Endian::Little);

        assert_eq!(PointerFormat(DYLD_CHAINED_PTR_ARM64E).stride(), Some(8));
        assert_eq!(PointerFormat(DYLD_CHAINED_PTR_64).stride(), Some(4));
        assert_eq!(PointerFormat(DYLD_CHAINED_PTR_X86_64_KERNEL_CACHE).stride(), Some(1));
        assert_eq!(PointerFormat(0x77).stride(), None);

        let raw = (0x1000u32 | (3 << 26)).to_le_bytes();

        assert_eq!(
            PointerFormat(DYLD_CHAINED_PTR_32).decode(&layouts, &raw, 0).unwrap(),
            ChainedPointer::Rebase { target: 0x1000, next: 3 }
        );

        let raw = (2u32 | (4 << 20) | (1 << 26) | (1 << 31)).to_le_bytes();

        assert_eq!(
            PointerFormat(DYLD_CHAINED_PTR_32).decode(&layouts, &raw, 0).unwrap(),
            ChainedPointer::Bind {
                ordinal: 2,
                addend: 4,
                next: 1
            }
        );

        // arm64e plain bind with a negative addend
        let raw = (3u64 | (0x7ffff << 32) | (1 << 62)).to_le_bytes();

        assert_eq!(
            PointerFormat(DYLD_CHAINED_PTR_ARM64E).decode(&layouts, &raw, 0).unwrap(),
            ChainedPointer::Bind {
                ordinal: 3,
                addend: -1,
                next: 0
            }
        );

        let raw = (0x1234u64 | (0x80 << 36)).to_le_bytes();

        assert_eq!(
            PointerFormat(DYLD_CHAINED_PTR_64_OFFSET)
                .decode(&layouts, &raw, 0x100000000)
                .unwrap(),
            ChainedPointer::Rebase {
                target: 0x8000_0001_0000_1234,
                next: 0
            }
        );
    }

    #[test]
    fn test_import_ordinal() {
        assert_eq!(import_ordinal(1, 8), 1);
        assert_eq!(import_ordinal(0xff, 8), -1);
        assert_eq!(import_ordinal(0xfd, 8), -3);
        assert_eq!(import_ordinal(0xfffe, 16), -2);
        assert_eq!(import_ordinal(0xf0, 8), 0xf0);
    }
}
