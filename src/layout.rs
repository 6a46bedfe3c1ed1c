//! Declarative descriptions of the on-disk records.
//!
//! A `Layout` is an ordered list of typed fields. Layouts are kept in a
//! `Layouts` registry, which resolves nested layouts by name, memoizes the
//! record sizes per pointer width and decodes/encodes records from/to plain
//! byte slices. The registry has no I/O of its own.
use std::cell::RefCell;
use std::collections::HashMap;
use std::fmt;

use byteorder::{BigEndian, ByteOrder, LittleEndian};

use crate::errors::{Error, Result};

/// Byte order of the integers in a record.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Endian {
    Little,
    Big,
}

/// The type of a field in a layout.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FieldType {
    U8,
    U16,
    U32,
    U64,
    I8,
    I16,
    I32,
    I64,
    /// NUL padded character array
    Chars(usize),
    /// raw byte array
    Bytes(usize),
    /// packed bit fields in a backing integer of the given byte width,
    /// declared from the least significant bit upward
    Bits(usize, &'static [(&'static str, u32)]),
    /// a nested layout, resolved by name
    Struct(&'static str),
    /// an unsigned integer as wide as the target pointer
    Pointer,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Field {
    pub name: &'static str,
    pub ty: FieldType,
}

impl Field {
    pub fn new(name: &'static str, ty: FieldType) -> Self {
        Field { name, ty }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Layout {
    pub name: &'static str,
    pub fields: Vec<Field>,
}

impl Layout {
    pub fn new(name: &'static str, fields: Vec<Field>) -> Self {
        Layout { name, fields }
    }
}

macro_rules! layout {
    ($name:expr => { $($field:ident : $ty:expr),* $(,)? }) => {
        Layout::new($name, vec![$(Field::new(stringify!($field), $ty)),*])
    };
}

/// A decoded field value.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Value {
    Unsigned(u64),
    Signed(i64),
    Str(String),
    Bytes(Vec<u8>),
    Record(Record),
}

/// A decoded record, fields kept in declaration order.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Record {
    pub layout: &'static str,
    pub fields: Vec<(&'static str, Value)>,
}

impl Record {
    pub fn new(layout: &'static str) -> Self {
        Record {
            layout,
            fields: Vec::new(),
        }
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.fields.iter().find(|(n, _)| *n == name).map(|(_, v)| v)
    }

    pub fn set(&mut self, name: &'static str, value: Value) {
        match self.fields.iter_mut().find(|(n, _)| *n == name) {
            Some(field) => field.1 = value,
            None => self.fields.push((name, value)),
        }
    }

    fn field(&self, name: &str) -> Result<&Value> {
        self.get(name).ok_or_else(|| Error::MissingField {
            layout: self.layout.to_owned(),
            field: name.to_owned(),
        })
    }

    pub fn u64(&self, name: &str) -> Result<u64> {
        match self.field(name)? {
            Value::Unsigned(v) => Ok(*v),
            Value::Signed(v) => Ok(*v as u64),
            _ => Err(Error::FieldType(name.to_owned())),
        }
    }

    pub fn u32(&self, name: &str) -> Result<u32> {
        self.u64(name).map(|v| v as u32)
    }

    pub fn i64(&self, name: &str) -> Result<i64> {
        match self.field(name)? {
            Value::Signed(v) => Ok(*v),
            Value::Unsigned(v) => Ok(*v as i64),
            _ => Err(Error::FieldType(name.to_owned())),
        }
    }

    pub fn str(&self, name: &str) -> Result<&str> {
        match self.field(name)? {
            Value::Str(s) => Ok(s.as_str()),
            _ => Err(Error::FieldType(name.to_owned())),
        }
    }

    pub fn bytes(&self, name: &str) -> Result<&[u8]> {
        match self.field(name)? {
            Value::Bytes(b) => Ok(b.as_slice()),
            _ => Err(Error::FieldType(name.to_owned())),
        }
    }

    pub fn record(&self, name: &str) -> Result<&Record> {
        match self.field(name)? {
            Value::Record(r) => Ok(r),
            _ => Err(Error::FieldType(name.to_owned())),
        }
    }
}

impl fmt::Display for Record {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{} {{", self.layout)?;
        for (i, (name, value)) in self.fields.iter().enumerate() {
            if i > 0 {
                write!(f, ",")?;
            }
            match value {
                Value::Unsigned(v) => write!(f, " {}: 0x{:x}", name, v)?,
                Value::Signed(v) => write!(f, " {}: {}", name, v)?,
                Value::Str(s) => write!(f, " {}: {:?}", name, s)?,
                Value::Bytes(b) => write!(f, " {}: {:02x?}", name, b)?,
                Value::Record(r) => write!(f, " {}: {}", name, r)?,
            }
        }
        write!(f, " }}")
    }
}

/// A registry of layouts with a private size cache.
#[derive(Debug)]
pub struct Layouts {
    endian: Endian,
    defs: HashMap<&'static str, Layout>,
    sizes: RefCell<HashMap<(&'static str, usize), usize>>,
}

impl Layouts {
    pub fn new(endian: Endian) -> Self {
        Layouts {
            endian,
            defs: HashMap::new(),
            sizes: RefCell::new(HashMap::new()),
        }
    }

    pub fn endian(&self) -> Endian {
        self.endian
    }

    pub fn define(&mut self, layout: Layout) {
        self.sizes.borrow_mut().clear();
        self.defs.insert(layout.name, layout);
    }

    pub fn get(&self, name: &str) -> Result<&Layout> {
        self.defs.get(name).ok_or_else(|| Error::UnknownLayout(name.to_owned()))
    }

    /// The byte size of a record, memoized per pointer width.
    pub fn size_of(&self, name: &str, ptr_size: usize) -> Result<usize> {
        let layout = self.get(name)?;

        if let Some(&size) = self.sizes.borrow().get(&(layout.name, ptr_size)) {
            return Ok(size);
        }

        let mut visiting = Vec::new();
        let size = self.compute_size(layout, ptr_size, &mut visiting)?;

        self.sizes.borrow_mut().insert((layout.name, ptr_size), size);

        Ok(size)
    }

    fn compute_size(&self, layout: &Layout, ptr_size: usize, visiting: &mut Vec<&'static str>) -> Result<usize> {
        if visiting.contains(&layout.name) {
            return Err(Error::RecursiveLayout(layout.name.to_owned()));
        }

        visiting.push(layout.name);

        let mut size = 0;

        for field in &layout.fields {
            size += match field.ty {
                FieldType::Struct(nested) => {
                    let nested = self.get(nested)?;

                    match self.sizes.borrow().get(&(nested.name, ptr_size)) {
                        Some(&size) => size,
                        None => self.compute_size(nested, ptr_size, visiting)?,
                    }
                }
                ty => Self::primitive_size(field.name, ty, ptr_size)?,
            };
        }

        visiting.pop();

        Ok(size)
    }

    fn primitive_size(name: &str, ty: FieldType, ptr_size: usize) -> Result<usize> {
        Ok(match ty {
            FieldType::U8 | FieldType::I8 => 1,
            FieldType::U16 | FieldType::I16 => 2,
            FieldType::U32 | FieldType::I32 => 4,
            FieldType::U64 | FieldType::I64 => 8,
            FieldType::Chars(n) | FieldType::Bytes(n) => n,
            FieldType::Bits(width, _) => width,
            FieldType::Pointer => match ptr_size {
                4 | 8 => ptr_size,
                _ => return Err(Error::FieldType(format!("{} needs a pointer size, got {}", name, ptr_size))),
            },
            FieldType::Struct(_) => unreachable!(),
        })
    }

    /// Decode a record of the named layout at `offset` in `buf`.
    pub fn decode(&self, name: &str, buf: &[u8], offset: usize, ptr_size: usize) -> Result<Record> {
        let size = self.size_of(name, ptr_size)?;
        let available = buf.len().saturating_sub(offset);

        if available < size {
            return Err(Error::truncated(offset as u64, size, available));
        }

        let layout = self.get(name)?;
        let (record, _) = self.decode_layout(layout, &buf[offset..offset + size], ptr_size)?;

        Ok(record)
    }

    fn decode_layout(&self, layout: &Layout, buf: &[u8], ptr_size: usize) -> Result<(Record, usize)> {
        let mut record = Record::new(layout.name);
        let mut pos = 0;

        for field in &layout.fields {
            match field.ty {
                FieldType::Struct(nested) => {
                    let nested = self.get(nested)?;
                    let (value, used) = self.decode_layout(nested, &buf[pos..], ptr_size)?;

                    record.fields.push((field.name, Value::Record(value)));
                    pos += used;
                }
                FieldType::Bits(width, bits) => {
                    let mut backing = self.read_uint(&buf[pos..], width);
                    for &(bit_name, bit_width) in bits {
                        record.fields.push((bit_name, Value::Unsigned(backing & mask(bit_width))));
                        backing = if bit_width >= 64 { 0 } else { backing >> bit_width };
                    }
                    pos += width;
                }
                ty => {
                    let size = Self::primitive_size(field.name, ty, ptr_size)?;
                    let bytes = &buf[pos..pos + size];
                    let value = match ty {
                        FieldType::U8 | FieldType::U16 | FieldType::U32 | FieldType::U64 | FieldType::Pointer => {
                            Value::Unsigned(self.read_uint(bytes, size))
                        }
                        FieldType::I8 | FieldType::I16 | FieldType::I32 | FieldType::I64 => {
                            Value::Signed(sign_extend(self.read_uint(bytes, size), size * 8))
                        }
                        FieldType::Chars(_) => Value::Str(fixed_size_string(bytes)),
                        FieldType::Bytes(_) => Value::Bytes(bytes.to_vec()),
                        FieldType::Bits(..) | FieldType::Struct(_) => unreachable!(),
                    };

                    record.fields.push((field.name, value));
                    pos += size;
                }
            }
        }

        Ok((record, pos))
    }

    /// Encode a record back into its on-disk bytes.
    pub fn encode(&self, record: &Record, ptr_size: usize) -> Result<Vec<u8>> {
        let size = self.size_of(record.layout, ptr_size)?;
        let mut buf = vec![0u8; size];
        let layout = self.get(record.layout)?;

        self.encode_layout(layout, record, &mut buf, ptr_size)?;

        Ok(buf)
    }

    fn encode_layout(&self, layout: &Layout, record: &Record, buf: &mut [u8], ptr_size: usize) -> Result<usize> {
        let mut pos = 0;

        for field in &layout.fields {
            match field.ty {
                FieldType::Struct(nested) => {
                    let nested = self.get(nested)?;
                    pos += self.encode_layout(nested, record.record(field.name)?, &mut buf[pos..], ptr_size)?;
                }
                FieldType::Bits(width, bits) => {
                    let mut backing = 0u64;
                    let mut shift = 0;
                    for &(bit_name, bit_width) in bits {
                        backing |= (record.u64(bit_name)? & mask(bit_width)) << shift;
                        shift += bit_width;
                    }
                    self.write_uint(&mut buf[pos..pos + width], backing);
                    pos += width;
                }
                ty => {
                    let size = Self::primitive_size(field.name, ty, ptr_size)?;
                    let bytes = &mut buf[pos..pos + size];

                    match ty {
                        FieldType::Chars(_) => {
                            let s = record.str(field.name)?.as_bytes();
                            let n = s.len().min(size);
                            bytes[..n].copy_from_slice(&s[..n]);
                        }
                        FieldType::Bytes(_) => {
                            let b = record.bytes(field.name)?;
                            let n = b.len().min(size);
                            bytes[..n].copy_from_slice(&b[..n]);
                        }
                        _ => self.write_uint(bytes, record.u64(field.name)?),
                    }

                    pos += size;
                }
            }
        }

        Ok(pos)
    }

    /// Read a `size` bytes unsigned integer at `offset` in the registry's byte order.
    pub fn uint_at(&self, buf: &[u8], offset: usize, size: usize) -> Result<u64> {
        if size == 0 || size > 8 {
            return Err(Error::FieldType(format!("integer of {} bytes", size)));
        }

        match offset.checked_add(size) {
            Some(end) if end <= buf.len() => Ok(self.read_uint(&buf[offset..end], size)),
            _ => Err(Error::truncated(offset as u64, size, buf.len().saturating_sub(offset))),
        }
    }

    fn read_uint(&self, buf: &[u8], size: usize) -> u64 {
        match self.endian {
            Endian::Little => LittleEndian::read_uint(buf, size),
            Endian::Big => BigEndian::read_uint(buf, size),
        }
    }

    fn write_uint(&self, buf: &mut [u8], value: u64) {
        let size = buf.len();
        let value = value & mask(size as u32 * 8);

        match self.endian {
            Endian::Little => LittleEndian::write_uint(buf, value, size),
            Endian::Big => BigEndian::write_uint(buf, value, size),
        }
    }

    /// The layouts of the Mach-O ABI structures.
    pub fn macho(endian: Endian) -> Self {
        use self::FieldType::*;

        let mut layouts = Layouts::new(endian);

        layouts.define(layout!("fat_header" => { magic: U32, nfat_arch: U32 }));
        layouts.define(layout!("fat_arch" => {
            cputype: I32, cpusubtype: I32, offset: U32, size: U32, align: U32,
        }));
        layouts.define(layout!("fat_arch_64" => {
            cputype: I32, cpusubtype: I32, offset: U64, size: U64, align: U32, reserved: U32,
        }));
        layouts.define(layout!("mach_header" => {
            magic: U32, cputype: I32, cpusubtype: I32, filetype: U32, ncmds: U32, sizeofcmds: U32, flags: U32,
        }));
        layouts.define(layout!("mach_header_64" => {
            magic: U32, cputype: I32, cpusubtype: I32, filetype: U32, ncmds: U32, sizeofcmds: U32, flags: U32,
            reserved: U32,
        }));
        layouts.define(layout!("load_command" => { cmd: U32, cmdsize: U32 }));
        layouts.define(layout!("segment_command" => {
            cmd: U32, cmdsize: U32, segname: Chars(16), vmaddr: U32, vmsize: U32, fileoff: U32, filesize: U32,
            maxprot: I32, initprot: I32, nsects: U32, flags: U32,
        }));
        layouts.define(layout!("segment_command_64" => {
            cmd: U32, cmdsize: U32, segname: Chars(16), vmaddr: U64, vmsize: U64, fileoff: U64, filesize: U64,
            maxprot: I32, initprot: I32, nsects: U32, flags: U32,
        }));
        layouts.define(layout!("section" => {
            sectname: Chars(16), segname: Chars(16), addr: U32, size: U32, offset: U32, align: U32,
            reloff: U32, nreloc: U32, flags: U32, reserved1: U32, reserved2: U32,
        }));
        layouts.define(layout!("section_64" => {
            sectname: Chars(16), segname: Chars(16), addr: U64, size: U64, offset: U32, align: U32,
            reloff: U32, nreloc: U32, flags: U32, reserved1: U32, reserved2: U32, reserved3: U32,
        }));
        layouts.define(layout!("symtab_command" => {
            cmd: U32, cmdsize: U32, symoff: U32, nsyms: U32, stroff: U32, strsize: U32,
        }));
        layouts.define(layout!("dysymtab_command" => {
            cmd: U32, cmdsize: U32, ilocalsym: U32, nlocalsym: U32, iextdefsym: U32, nextdefsym: U32,
            iundefsym: U32, nundefsym: U32, tocoff: U32, ntoc: U32, modtaboff: U32, nmodtab: U32,
            extrefsymoff: U32, nextrefsyms: U32, indirectsymoff: U32, nindirectsyms: U32,
            extreloff: U32, nextrel: U32, locreloff: U32, nlocrel: U32,
        }));
        layouts.define(layout!("dylib" => {
            name: U32, timestamp: U32, current_version: U32, compatibility_version: U32,
        }));
        layouts.define(layout!("dylib_command" => { cmd: U32, cmdsize: U32, dylib: Struct("dylib") }));
        layouts.define(layout!("lc_str_command" => { cmd: U32, cmdsize: U32, offset: U32 }));
        layouts.define(layout!("uuid_command" => { cmd: U32, cmdsize: U32, uuid: Bytes(16) }));
        layouts.define(layout!("linkedit_data_command" => { cmd: U32, cmdsize: U32, dataoff: U32, datasize: U32 }));
        layouts.define(layout!("dyld_info_command" => {
            cmd: U32, cmdsize: U32, rebase_off: U32, rebase_size: U32, bind_off: U32, bind_size: U32,
            weak_bind_off: U32, weak_bind_size: U32, lazy_bind_off: U32, lazy_bind_size: U32,
            export_off: U32, export_size: U32,
        }));
        layouts.define(layout!("entry_point_command" => { cmd: U32, cmdsize: U32, entryoff: U64, stacksize: U64 }));
        layouts.define(layout!("source_version_command" => { cmd: U32, cmdsize: U32, version: U64 }));
        layouts.define(layout!("version_min_command" => { cmd: U32, cmdsize: U32, version: U32, sdk: U32 }));
        layouts.define(layout!("build_version_command" => {
            cmd: U32, cmdsize: U32, platform: U32, minos: U32, sdk: U32, ntools: U32,
        }));
        layouts.define(layout!("build_tool_version" => { tool: U32, version: U32 }));
        layouts.define(layout!("thread_command" => { cmd: U32, cmdsize: U32, flavor: U32, count: U32 }));
        layouts.define(layout!("encryption_info_command" => {
            cmd: U32, cmdsize: U32, cryptoff: U32, cryptsize: U32, cryptid: U32,
        }));
        layouts.define(layout!("encryption_info_command_64" => {
            cmd: U32, cmdsize: U32, cryptoff: U32, cryptsize: U32, cryptid: U32, pad: U32,
        }));
        layouts.define(layout!("nlist" => { n_strx: U32, n_type: U8, n_sect: U8, n_desc: U16, n_value: Pointer }));

        layouts.define(layout!("dyld_chained_fixups_header" => {
            fixups_version: U32, starts_offset: U32, imports_offset: U32, symbols_offset: U32,
            imports_count: U32, imports_format: U32, symbols_format: U32,
        }));
        layouts.define(layout!("dyld_chained_starts_in_segment" => {
            size: U32, page_size: U16, pointer_format: U16, segment_offset: U64, max_valid_pointer: U32,
            page_count: U16,
        }));
        layouts.define(layout!("dyld_chained_import" => {
            import: Bits(4, &[("lib_ordinal", 8), ("weak_import", 1), ("name_offset", 23)]),
        }));
        layouts.define(layout!("dyld_chained_import_addend" => {
            import: Bits(4, &[("lib_ordinal", 8), ("weak_import", 1), ("name_offset", 23)]),
            addend: I32,
        }));
        layouts.define(layout!("dyld_chained_import_addend64" => {
            import: Bits(8, &[("lib_ordinal", 16), ("weak_import", 1), ("reserved", 15), ("name_offset", 32)]),
            addend: U64,
        }));
        layouts.define(layout!("dyld_chained_ptr_arm64e_rebase" => {
            ptr: Bits(8, &[("target", 43), ("high8", 8), ("next", 11), ("bind", 1), ("auth", 1)]),
        }));
        layouts.define(layout!("dyld_chained_ptr_arm64e_bind" => {
            ptr: Bits(8, &[("ordinal", 16), ("zero", 16), ("addend", 19), ("next", 11), ("bind", 1), ("auth", 1)]),
        }));
        layouts.define(layout!("dyld_chained_ptr_arm64e_auth_rebase" => {
            ptr: Bits(8, &[
                ("target", 32), ("diversity", 16), ("addr_div", 1), ("key", 2), ("next", 11), ("bind", 1),
                ("auth", 1),
            ]),
        }));
        layouts.define(layout!("dyld_chained_ptr_arm64e_auth_bind" => {
            ptr: Bits(8, &[
                ("ordinal", 16), ("zero", 16), ("diversity", 16), ("addr_div", 1), ("key", 2), ("next", 11),
                ("bind", 1), ("auth", 1),
            ]),
        }));
        layouts.define(layout!("dyld_chained_ptr_arm64e_bind24" => {
            ptr: Bits(8, &[("ordinal", 24), ("zero", 8), ("addend", 19), ("next", 11), ("bind", 1), ("auth", 1)]),
        }));
        layouts.define(layout!("dyld_chained_ptr_arm64e_auth_bind24" => {
            ptr: Bits(8, &[
                ("ordinal", 24), ("zero", 8), ("diversity", 16), ("addr_div", 1), ("key", 2), ("next", 11),
                ("bind", 1), ("auth", 1),
            ]),
        }));
        layouts.define(layout!("dyld_chained_ptr_64_rebase" => {
            ptr: Bits(8, &[("target", 36), ("high8", 8), ("reserved", 7), ("next", 12), ("bind", 1)]),
        }));
        layouts.define(layout!("dyld_chained_ptr_64_bind" => {
            ptr: Bits(8, &[("ordinal", 24), ("addend", 8), ("reserved", 19), ("next", 12), ("bind", 1)]),
        }));
        layouts.define(layout!("dyld_chained_ptr_64_kernel_cache_rebase" => {
            ptr: Bits(8, &[
                ("target", 30), ("cache_level", 2), ("diversity", 16), ("addr_div", 1), ("key", 2), ("next", 12),
                ("is_auth", 1),
            ]),
        }));
        layouts.define(layout!("dyld_chained_ptr_32_rebase" => {
            ptr: Bits(4, &[("target", 26), ("next", 5), ("bind", 1)]),
        }));
        layouts.define(layout!("dyld_chained_ptr_32_bind" => {
            ptr: Bits(4, &[("ordinal", 20), ("addend", 6), ("next", 5), ("bind", 1)]),
        }));
        layouts.define(layout!("dyld_chained_ptr_32_cache_rebase" => {
            ptr: Bits(4, &[("target", 30), ("next", 2)]),
        }));
        layouts.define(layout!("dyld_chained_ptr_32_firmware_rebase" => {
            ptr: Bits(4, &[("target", 26), ("next", 6)]),
        }));

        layouts
    }
}

fn mask(bits: u32) -> u64 {
    if bits >= 64 {
        u64::max_value()
    } else {
        (1u64 << bits) - 1
    }
}

fn sign_extend(value: u64, bits: usize) -> i64 {
    let shift = 64 - bits;

    ((value << shift) as i64) >> shift
}

/// Read a NUL padded fixed size string, dropping anything after the first NUL.
pub fn fixed_size_string(bytes: &[u8]) -> String {
    let end = bytes.iter().position(|&b| b == 0).unwrap_or(bytes.len());

    String::from_utf8_lossy(&bytes[..end]).into_owned()
}
