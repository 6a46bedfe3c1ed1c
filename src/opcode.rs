//! Interpreters for the rebase and bind opcode streams of `LC_DYLD_INFO`.
//!
//! Decoding is split in two: an iterator turns the byte stream into opcodes
//! with their operands, and a small state struct is stepped with each opcode,
//! returning the run of slots an emitting opcode touches.
use std::fmt;
use std::io::Cursor;

use byteorder::ReadBytesExt;

use crate::commands::CursorExt;
use crate::consts::*;
use crate::errors::{Diagnostic, Error, Result};
use crate::image::Segment;

/// Bind or rebase symbol type
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SymbolType {
    Pointer,
    TextAbsolute32,
    TextRelative32,
}

impl Default for SymbolType {
    fn default() -> Self {
        SymbolType::Pointer
    }
}

impl SymbolType {
    fn from_imm(imm: u8) -> Result<SymbolType> {
        match imm {
            BIND_TYPE_POINTER => Ok(SymbolType::Pointer),
            BIND_TYPE_TEXT_ABSOLUTE32 => Ok(SymbolType::TextAbsolute32),
            BIND_TYPE_TEXT_PCREL32 => Ok(SymbolType::TextRelative32),
            _ => Err(Error::LoadError(format!("unknown symbol type {}", imm))),
        }
    }
}

impl fmt::Display for SymbolType {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "{}",
            match *self {
                SymbolType::Pointer => "pointer",
                SymbolType::TextAbsolute32 => "text abs32",
                SymbolType::TextRelative32 => "text rel32",
            }
        )
    }
}

bitflags! {
    /// Flags for bind symbol
    #[derive(Default)]
    pub struct BindSymbolFlags: u8 {
        const WEAK_IMPORT = BIND_SYMBOL_FLAGS_WEAK_IMPORT;
        const NON_WEAK_DEFINITION = BIND_SYMBOL_FLAGS_NON_WEAK_DEFINITION;
    }
}

/// Which of the bind tables a record comes from.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum BindKind {
    Bind,
    WeakBind,
    LazyBind,
    Chained,
}

impl fmt::Display for BindKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(match self {
            BindKind::Bind => "bind",
            BindKind::WeakBind => "weak-bind",
            BindKind::LazyBind => "lazy-bind",
            BindKind::Chained => "chained-fixups",
        })
    }
}

/// OpCode for the binding symbol
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum BindOpCode {
    Done,
    SetDyLibrary(i64),
    SetDyLibrarySpecial(i64),
    SetSymbol {
        name: String,
        flags: BindSymbolFlags,
    },
    SetSymbolType(SymbolType),
    SetAddend(i64),
    SetSegmentOffset {
        segment_index: u8,
        segment_offset: u64,
    },
    AddAddress {
        offset: u64,
    },
    Bind,
    BindAndAddAddress {
        offset: u64,
    },
    BindAndAddAddressScaled {
        scale: u8,
    },
    BindAndSkipping {
        times: u64,
        skip: u64,
    },
    SetBindOrdinalTableSize(u64),
    ThreadedApply,
}

/// An iterator over the `BindOpCode`, with the stream offset of each opcode.
///
/// Iteration stops after the first error.
pub struct BindOpCodes<'a> {
    cur: Cursor<&'a [u8]>,
    failed: bool,
}

impl<'a> BindOpCodes<'a> {
    pub fn new(payload: &'a [u8]) -> Self {
        BindOpCodes {
            cur: Cursor::new(payload),
            failed: false,
        }
    }

    fn parse(&mut self) -> Result<BindOpCode> {
        let b = self.cur.read_u8()?;
        let imm = b & BIND_IMMEDIATE_MASK;

        Ok(match b & BIND_OPCODE_MASK {
            BIND_OPCODE_DONE => BindOpCode::Done,
            BIND_OPCODE_SET_DYLIB_ORDINAL_IMM => BindOpCode::SetDyLibrary(i64::from(imm)),
            BIND_OPCODE_SET_DYLIB_ORDINAL_ULEB => BindOpCode::SetDyLibrary(self.cur.read_uleb128()? as i64),
            BIND_OPCODE_SET_DYLIB_SPECIAL_IMM => {
                // the immediate is a sign extended nibble
                let ordinal = if imm == 0 {
                    0
                } else {
                    i64::from((imm | BIND_OPCODE_MASK) as i8)
                };

                BindOpCode::SetDyLibrarySpecial(ordinal)
            }
            BIND_OPCODE_SET_SYMBOL_TRAILING_FLAGS_IMM => BindOpCode::SetSymbol {
                name: self.cur.read_cstr()?,
                flags: BindSymbolFlags::from_bits_truncate(imm),
            },
            BIND_OPCODE_SET_TYPE_IMM => BindOpCode::SetSymbolType(SymbolType::from_imm(imm)?),
            BIND_OPCODE_SET_ADDEND_SLEB => BindOpCode::SetAddend(self.cur.read_sleb128()?),
            BIND_OPCODE_SET_SEGMENT_AND_OFFSET_ULEB => BindOpCode::SetSegmentOffset {
                segment_index: imm,
                segment_offset: self.cur.read_uleb128()?,
            },
            BIND_OPCODE_ADD_ADDR_ULEB => BindOpCode::AddAddress {
                offset: self.cur.read_uleb128()?,
            },
            BIND_OPCODE_DO_BIND => BindOpCode::Bind,
            BIND_OPCODE_DO_BIND_ADD_ADDR_ULEB => BindOpCode::BindAndAddAddress {
                offset: self.cur.read_uleb128()?,
            },
            BIND_OPCODE_DO_BIND_ADD_ADDR_IMM_SCALED => BindOpCode::BindAndAddAddressScaled { scale: imm },
            BIND_OPCODE_DO_BIND_ULEB_TIMES_SKIPPING_ULEB => BindOpCode::BindAndSkipping {
                times: self.cur.read_uleb128()?,
                skip: self.cur.read_uleb128()?,
            },
            BIND_OPCODE_THREADED => match imm {
                BIND_SUBOPCODE_THREADED_SET_BIND_ORDINAL_TABLE_SIZE_ULEB => {
                    BindOpCode::SetBindOrdinalTableSize(self.cur.read_uleb128()?)
                }
                BIND_SUBOPCODE_THREADED_APPLY => BindOpCode::ThreadedApply,
                _ => return Err(Error::LoadError(format!("unknown threaded bind subopcode 0x{:x}", imm))),
            },
            opcode => return Err(Error::LoadError(format!("unknown bind opcode 0x{:02x}", opcode))),
        })
    }
}

impl<'a> Iterator for BindOpCodes<'a> {
    type Item = Result<(usize, BindOpCode)>;

    fn next(&mut self) -> Option<Self::Item> {
        let pos = self.cur.position() as usize;

        if self.failed || pos >= self.cur.get_ref().len() {
            return None;
        }

        let res = self.parse().map(|opcode| (pos, opcode)).map_err(|err| {
            Error::LoadError(format!("malformed opcode at offset {}, {}", pos, err))
        });

        self.failed = res.is_err();

        Some(res)
    }
}

/// A run of `count` slots starting at a segment relative offset, `stride` bytes apart.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Emitted {
    pub segment_index: usize,
    pub segment_offset: u64,
    pub count: u64,
    pub stride: u64,
}

impl Emitted {
    pub fn offsets(&self) -> impl Iterator<Item = u64> {
        let Emitted {
            segment_offset, stride, ..
        } = *self;

        (0..self.count).map(move |i| segment_offset.wrapping_add(i.wrapping_mul(stride)))
    }
}

/// The registers of the bind interpreter.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct BindState {
    pub segment_index: usize,
    pub segment_offset: u64,
    pub ordinal: i64,
    pub special: bool,
    pub symbol: Option<String>,
    pub flags: BindSymbolFlags,
    pub bind_type: SymbolType,
    pub addend: i64,
}

impl BindState {
    /// Apply one opcode, returning the slots bound by it, if any.
    pub fn step(&mut self, opcode: &BindOpCode, ptr_size: u64) -> Option<Emitted> {
        match *opcode {
            BindOpCode::Done => {
                *self = BindState::default();
                None
            }
            BindOpCode::SetDyLibrary(ordinal) => {
                self.ordinal = ordinal;
                self.special = false;
                None
            }
            BindOpCode::SetDyLibrarySpecial(ordinal) => {
                self.ordinal = ordinal;
                self.special = true;
                None
            }
            BindOpCode::SetSymbol { ref name, flags } => {
                self.symbol = Some(name.clone());
                self.flags = flags;
                None
            }
            BindOpCode::SetSymbolType(bind_type) => {
                self.bind_type = bind_type;
                None
            }
            BindOpCode::SetAddend(addend) => {
                self.addend = addend;
                None
            }
            BindOpCode::SetSegmentOffset {
                segment_index,
                segment_offset,
            } => {
                self.segment_index = segment_index as usize;
                self.segment_offset = segment_offset;
                None
            }
            BindOpCode::AddAddress { offset } => {
                self.segment_offset = self.segment_offset.wrapping_add(offset);
                None
            }
            BindOpCode::Bind => Some(self.emit(1, ptr_size, ptr_size)),
            BindOpCode::BindAndAddAddress { offset } => Some(self.emit(1, ptr_size, ptr_size.wrapping_add(offset))),
            BindOpCode::BindAndAddAddressScaled { scale } => {
                Some(self.emit(1, ptr_size, u64::from(scale) * ptr_size + ptr_size))
            }
            BindOpCode::BindAndSkipping { times, skip } => {
                // an overflowing skip leaves a zero stride, rejected when expanded
                let stride = skip.checked_add(ptr_size).unwrap_or(0);

                Some(self.emit(times, stride, times.wrapping_mul(stride)))
            }
            BindOpCode::SetBindOrdinalTableSize(_) | BindOpCode::ThreadedApply => None,
        }
    }

    fn emit(&mut self, count: u64, stride: u64, advance: u64) -> Emitted {
        let emitted = Emitted {
            segment_index: self.segment_index,
            segment_offset: self.segment_offset,
            count,
            stride,
        };

        self.segment_offset = self.segment_offset.wrapping_add(advance);

        emitted
    }
}

/// A decoded bind action.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BindRecord {
    pub kind: BindKind,
    pub segment_index: usize,
    pub segment_offset: u64,
    /// `segments[segment_index].vmaddr + segment_offset`
    pub address: u64,
    pub ordinal: i64,
    /// install name of the library, or a placeholder
    pub library: String,
    pub symbol: String,
    pub flags: BindSymbolFlags,
    pub bind_type: SymbolType,
    pub addend: i64,
}

/// Check a run of slots against the segment list, returning the usable addresses.
fn expand(
    context: &str,
    emitted: &Emitted,
    segments: &[Segment],
    diagnostics: &mut Vec<Diagnostic>,
) -> Vec<(u64, u64)> {
    let segment = match segments.get(emitted.segment_index) {
        Some(segment) => segment,
        None => {
            let msg = format!("segment index {} out of range", emitted.segment_index);

            warn!("{}: {}", context, msg);
            diagnostics.push(Diagnostic::new(context, msg));

            return vec![];
        }
    };

    let mut report = |msg: String| {
        warn!("{}: {}", context, msg);
        diagnostics.push(Diagnostic::new(context, msg));
    };

    if emitted.count > 1 && emitted.stride == 0 {
        report(format!(
            "run of {} slots at offset 0x{:x} has a zero stride",
            emitted.count, emitted.segment_offset
        ));

        return vec![];
    }

    if emitted.segment_offset >= segment.vmsize {
        report(format!(
            "offset 0x{:x} past the end of segment {} (0 of {} slots emitted)",
            emitted.segment_offset, segment.name, emitted.count
        ));

        return vec![];
    }

    let room = (segment.vmsize - emitted.segment_offset - 1) / emitted.stride.max(1) + 1;
    let count = if emitted.count > room {
        report(format!(
            "run of {} slots at offset 0x{:x} overruns segment {} ({} of {} slots emitted)",
            emitted.count, emitted.segment_offset, segment.name, room, emitted.count
        ));

        room
    } else {
        emitted.count
    };

    emitted
        .offsets()
        .take(count as usize)
        .map(|offset| (offset, segment.vmaddr + offset))
        .collect()
}

/// Run the bind interpreter over a whole table.
///
/// The table may hold several `DONE` terminated runs. Bad records are
/// reported to `diagnostics` and skipped; a malformed opcode ends the table.
pub fn interpret_binds<F>(
    payload: &[u8],
    kind: BindKind,
    ptr_size: usize,
    segments: &[Segment],
    library_name: F,
    diagnostics: &mut Vec<Diagnostic>,
) -> Vec<BindRecord>
where
    F: Fn(i64) -> String,
{
    let context = kind.to_string();
    let mut state = BindState::default();
    let mut records = Vec::new();

    for res in BindOpCodes::new(payload) {
        let (pos, opcode) = match res {
            Ok(opcode) => opcode,
            Err(err) => {
                warn!("{}: {}", context, err);
                diagnostics.push(Diagnostic::new(context.as_str(), err.to_string()));
                break;
            }
        };

        trace!("{} opcode @ {}: {:?}", context, pos, opcode);

        if let BindOpCode::SetBindOrdinalTableSize(_) | BindOpCode::ThreadedApply = opcode {
            diagnostics.push(Diagnostic::new(
                context.as_str(),
                format!("threaded bind opcode at offset {} is not decoded", pos),
            ));
        }

        let emitted = match state.step(&opcode, ptr_size as u64) {
            Some(emitted) => emitted,
            None => continue,
        };

        let symbol = match state.symbol {
            Some(ref symbol) => symbol.clone(),
            None => {
                let msg = format!("bind without symbol name at offset {}", pos);

                warn!("{}: {}", context, msg);
                diagnostics.push(Diagnostic::new(context.as_str(), msg));

                continue;
            }
        };

        let library = library_name(state.ordinal);

        for (segment_offset, address) in expand(&context, &emitted, segments, diagnostics) {
            records.push(BindRecord {
                kind,
                segment_index: emitted.segment_index,
                segment_offset,
                address,
                ordinal: state.ordinal,
                library: library.clone(),
                symbol: symbol.clone(),
                flags: state.flags,
                bind_type: state.bind_type,
                addend: state.addend,
            });
        }
    }

    debug!("{} table of {} bytes yields {} records", context, payload.len(), records.len());

    records
}

/// OpCode for the rebasing
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RebaseOpCode {
    Done,
    SetSymbolType(SymbolType),
    SetSegmentOffset {
        segment_index: u8,
        segment_offset: u64,
    },
    AddAddress {
        offset: u64,
    },
    AddAddressScaled {
        scale: u8,
    },
    Rebase {
        times: u64,
    },
    RebaseAndAddAddress {
        offset: u64,
    },
    RebaseAndSkipping {
        times: u64,
        skip: u64,
    },
}

/// An iterator over the `RebaseOpCode`, with the stream offset of each opcode.
pub struct RebaseOpCodes<'a> {
    cur: Cursor<&'a [u8]>,
    failed: bool,
}

impl<'a> RebaseOpCodes<'a> {
    pub fn new(payload: &'a [u8]) -> Self {
        RebaseOpCodes {
            cur: Cursor::new(payload),
            failed: false,
        }
    }

    fn parse(&mut self) -> Result<RebaseOpCode> {
        let b = self.cur.read_u8()?;
        let imm = b & REBASE_IMMEDIATE_MASK;

        Ok(match b & REBASE_OPCODE_MASK {
            REBASE_OPCODE_DONE => RebaseOpCode::Done,
            REBASE_OPCODE_SET_TYPE_IMM => RebaseOpCode::SetSymbolType(SymbolType::from_imm(imm)?),
            REBASE_OPCODE_SET_SEGMENT_AND_OFFSET_ULEB => RebaseOpCode::SetSegmentOffset {
                segment_index: imm,
                segment_offset: self.cur.read_uleb128()?,
            },
            REBASE_OPCODE_ADD_ADDR_ULEB => RebaseOpCode::AddAddress {
                offset: self.cur.read_uleb128()?,
            },
            REBASE_OPCODE_ADD_ADDR_IMM_SCALED => RebaseOpCode::AddAddressScaled { scale: imm },
            REBASE_OPCODE_DO_REBASE_IMM_TIMES => RebaseOpCode::Rebase { times: u64::from(imm) },
            REBASE_OPCODE_DO_REBASE_ULEB_TIMES => RebaseOpCode::Rebase {
                times: self.cur.read_uleb128()?,
            },
            REBASE_OPCODE_DO_REBASE_ADD_ADDR_ULEB => RebaseOpCode::RebaseAndAddAddress {
                offset: self.cur.read_uleb128()?,
            },
            REBASE_OPCODE_DO_REBASE_ULEB_TIMES_SKIPPING_ULEB => RebaseOpCode::RebaseAndSkipping {
                times: self.cur.read_uleb128()?,
                skip: self.cur.read_uleb128()?,
            },
            opcode => return Err(Error::LoadError(format!("unknown rebase opcode 0x{:02x}", opcode))),
        })
    }
}

impl<'a> Iterator for RebaseOpCodes<'a> {
    type Item = Result<(usize, RebaseOpCode)>;

    fn next(&mut self) -> Option<Self::Item> {
        let pos = self.cur.position() as usize;

        if self.failed || pos >= self.cur.get_ref().len() {
            return None;
        }

        let res = self.parse().map(|opcode| (pos, opcode)).map_err(|err| {
            Error::LoadError(format!("malformed opcode at offset {}, {}", pos, err))
        });

        self.failed = res.is_err();

        Some(res)
    }
}

/// The registers of the rebase interpreter.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RebaseState {
    pub segment_index: usize,
    pub segment_offset: u64,
    pub rebase_type: SymbolType,
}

impl RebaseState {
    pub fn step(&mut self, opcode: &RebaseOpCode, ptr_size: u64) -> Option<Emitted> {
        match *opcode {
            RebaseOpCode::Done => {
                *self = RebaseState::default();
                None
            }
            RebaseOpCode::SetSymbolType(rebase_type) => {
                self.rebase_type = rebase_type;
                None
            }
            RebaseOpCode::SetSegmentOffset {
                segment_index,
                segment_offset,
            } => {
                self.segment_index = segment_index as usize;
                self.segment_offset = segment_offset;
                None
            }
            RebaseOpCode::AddAddress { offset } => {
                self.segment_offset = self.segment_offset.wrapping_add(offset);
                None
            }
            RebaseOpCode::AddAddressScaled { scale } => {
                self.segment_offset = self.segment_offset.wrapping_add(u64::from(scale) * ptr_size);
                None
            }
            RebaseOpCode::Rebase { times } => Some(self.emit(times, ptr_size)),
            RebaseOpCode::RebaseAndAddAddress { offset } => {
                let emitted = self.emit(1, ptr_size);

                self.segment_offset = self.segment_offset.wrapping_add(offset);

                Some(emitted)
            }
            RebaseOpCode::RebaseAndSkipping { times, skip } => {
                Some(self.emit(times, skip.checked_add(ptr_size).unwrap_or(0)))
            }
        }
    }

    fn emit(&mut self, count: u64, stride: u64) -> Emitted {
        let emitted = Emitted {
            segment_index: self.segment_index,
            segment_offset: self.segment_offset,
            count,
            stride,
        };

        self.segment_offset = self.segment_offset.wrapping_add(count.wrapping_mul(stride));

        emitted
    }
}

/// A decoded rebase action.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RebaseRecord {
    pub segment_index: usize,
    pub segment_offset: u64,
    pub address: u64,
    pub rebase_type: SymbolType,
}

/// Run the rebase interpreter over a whole table.
pub fn interpret_rebases(
    payload: &[u8],
    ptr_size: usize,
    segments: &[Segment],
    diagnostics: &mut Vec<Diagnostic>,
) -> Vec<RebaseRecord> {
    let context = "rebase";
    let mut state = RebaseState::default();
    let mut records = Vec::new();

    for res in RebaseOpCodes::new(payload) {
        let (pos, opcode) = match res {
            Ok(opcode) => opcode,
            Err(err) => {
                warn!("{}: {}", context, err);
                diagnostics.push(Diagnostic::new(context, err.to_string()));
                break;
            }
        };

        trace!("{} opcode @ {}: {:?}", context, pos, opcode);

        if let Some(emitted) = state.step(&opcode, ptr_size as u64) {
            for (segment_offset, address) in expand(context, &emitted, segments, diagnostics) {
                records.push(RebaseRecord {
                    segment_index: emitted.segment_index,
                    segment_offset,
                    address,
                    rebase_type: state.rebase_type,
                });
            }
        }
    }

    debug!("rebase table of {} bytes yields {} records", payload.len(), records.len());

    records
}
