//! A tiny Mach-O writer for building test images.
#![allow(dead_code)]

use std::sync::Arc;

use byteorder::{BigEndian, ByteOrder, LittleEndian, WriteBytesExt};

use mach_linkedit::*;

pub const TEXT_VMADDR: u64 = 0x1_0000_0000;

pub struct SectionSpec {
    pub sectname: &'static str,
    pub addr: u64,
    pub size: u64,
    pub offset: u32,
    pub flags: u32,
}

pub struct SegmentSpec {
    pub name: &'static str,
    pub vmaddr: u64,
    pub vmsize: u64,
    pub fileoff: u64,
    pub filesize: u64,
    pub sections: Vec<SectionSpec>,
}

/// A little endian 64-bit image under construction.
pub struct Builder {
    cputype: cpu_type_t,
    filetype: u32,
    commands: Vec<Vec<u8>>,
    size: usize,
    data: Vec<(usize, Vec<u8>)>,
}

fn fixed_name(name: &str) -> [u8; 16] {
    let mut buf = [0u8; 16];

    buf[..name.len()].copy_from_slice(name.as_bytes());
    buf
}

impl Builder {
    pub fn new(cputype: cpu_type_t, filetype: u32) -> Self {
        Builder {
            cputype,
            filetype,
            commands: vec![],
            size: 0,
            data: vec![],
        }
    }

    /// Total size of the image, the file is zero filled up to it.
    pub fn size(mut self, size: usize) -> Self {
        self.size = size;
        self
    }

    /// Place raw bytes at a file offset.
    pub fn data(mut self, offset: usize, bytes: &[u8]) -> Self {
        self.data.push((offset, bytes.to_vec()));
        self
    }

    pub fn command(mut self, cmd: Vec<u8>) -> Self {
        self.commands.push(cmd);
        self
    }

    pub fn segment(self, segment: SegmentSpec) -> Self {
        let mut buf = Vec::new();

        buf.write_u32::<LittleEndian>(LC_SEGMENT_64).unwrap();
        buf.write_u32::<LittleEndian>(72 + 80 * segment.sections.len() as u32).unwrap();
        buf.extend_from_slice(&fixed_name(segment.name));
        for &v in &[segment.vmaddr, segment.vmsize, segment.fileoff, segment.filesize] {
            buf.write_u64::<LittleEndian>(v).unwrap();
        }
        for &v in &[7u32, 5, segment.sections.len() as u32, 0] {
            buf.write_u32::<LittleEndian>(v).unwrap();
        }

        for section in &segment.sections {
            buf.extend_from_slice(&fixed_name(section.sectname));
            buf.extend_from_slice(&fixed_name(segment.name));
            buf.write_u64::<LittleEndian>(section.addr).unwrap();
            buf.write_u64::<LittleEndian>(section.size).unwrap();
            for &v in &[section.offset, 4, 0, 0, section.flags, 0, 0, 0] {
                buf.write_u32::<LittleEndian>(v).unwrap();
            }
        }

        self.command(buf)
    }

    pub fn dylib(self, cmd: u32, name: &str) -> Self {
        let size = (24 + name.len() + 1 + 7) & !7;
        let mut buf = Vec::new();

        for &v in &[cmd, size as u32, 24, 2, 0x10000, 0x10000] {
            buf.write_u32::<LittleEndian>(v).unwrap();
        }
        buf.extend_from_slice(name.as_bytes());
        buf.resize(size, 0);

        self.command(buf)
    }

    pub fn symtab(self, symoff: u32, nsyms: u32, stroff: u32, strsize: u32) -> Self {
        self.words(&[LC_SYMTAB, 24, symoff, nsyms, stroff, strsize])
    }

    pub fn dyld_info(self, bind: (u32, u32), lazy_bind: (u32, u32), export: (u32, u32)) -> Self {
        self.words(&[
            LC_DYLD_INFO_ONLY,
            48,
            0,
            0,
            bind.0,
            bind.1,
            0,
            0,
            lazy_bind.0,
            lazy_bind.1,
            export.0,
            export.1,
        ])
    }

    pub fn linkedit(self, cmd: u32, off: u32, size: u32) -> Self {
        self.words(&[cmd, 16, off, size])
    }

    pub fn uuid(self, uuid: [u8; 16]) -> Self {
        let mut buf = Vec::new();

        buf.write_u32::<LittleEndian>(LC_UUID).unwrap();
        buf.write_u32::<LittleEndian>(24).unwrap();
        buf.extend_from_slice(&uuid);

        self.command(buf)
    }

    pub fn main(self, entryoff: u64) -> Self {
        let mut buf = Vec::new();

        buf.write_u32::<LittleEndian>(LC_MAIN).unwrap();
        buf.write_u32::<LittleEndian>(24).unwrap();
        buf.write_u64::<LittleEndian>(entryoff).unwrap();
        buf.write_u64::<LittleEndian>(0).unwrap();

        self.command(buf)
    }

    fn words(self, words: &[u32]) -> Self {
        let mut buf = Vec::new();

        for &v in words {
            buf.write_u32::<LittleEndian>(v).unwrap();
        }

        self.command(buf)
    }

    pub fn build(self) -> Vec<u8> {
        let mut buf = Vec::new();

        buf.write_u32::<LittleEndian>(MH_MAGIC_64).unwrap();
        buf.write_i32::<LittleEndian>(self.cputype).unwrap();
        buf.write_i32::<LittleEndian>(0).unwrap();
        buf.write_u32::<LittleEndian>(self.filetype).unwrap();
        buf.write_u32::<LittleEndian>(self.commands.len() as u32).unwrap();
        buf.write_u32::<LittleEndian>(self.commands.iter().map(|cmd| cmd.len() as u32).sum())
            .unwrap();
        buf.write_u32::<LittleEndian>(0).unwrap();
        buf.write_u32::<LittleEndian>(0).unwrap();
        for cmd in &self.commands {
            buf.extend_from_slice(cmd);
        }

        buf.resize(buf.len().max(self.size), 0);

        for (offset, bytes) in self.data {
            if buf.len() < offset + bytes.len() {
                buf.resize(offset + bytes.len(), 0);
            }
            buf[offset..offset + bytes.len()].copy_from_slice(&bytes);
        }

        buf
    }
}

pub fn nlist(strx: u32, n_type: u8, n_sect: u8, n_desc: u16, value: u64) -> Vec<u8> {
    let mut buf = Vec::new();

    buf.write_u32::<LittleEndian>(strx).unwrap();
    buf.write_u8(n_type).unwrap();
    buf.write_u8(n_sect).unwrap();
    buf.write_u16::<LittleEndian>(n_desc).unwrap();
    buf.write_u64::<LittleEndian>(value).unwrap();
    buf
}

pub fn uleb(mut v: u64, out: &mut Vec<u8>) {
    loop {
        let b = (v & 0x7f) as u8;
        v >>= 7;
        if v == 0 {
            out.push(b);
            break;
        }
        out.push(b | 0x80);
    }
}

/// Wrap thin images into a fat file, each slice aligned to 16 KiB.
pub fn fat(slices: &[(cpu_type_t, &[u8])]) -> Vec<u8> {
    let mut header = vec![0u8; 8 + 20 * slices.len()];
    let mut body = Vec::new();
    let mut offset = 0x4000usize;

    BigEndian::write_u32(&mut header[0..4], FAT_MAGIC);
    BigEndian::write_u32(&mut header[4..8], slices.len() as u32);

    for (i, &(cputype, data)) in slices.iter().enumerate() {
        let arch = &mut header[8 + 20 * i..8 + 20 * (i + 1)];

        BigEndian::write_i32(&mut arch[0..4], cputype);
        BigEndian::write_i32(&mut arch[4..8], 0);
        BigEndian::write_u32(&mut arch[8..12], offset as u32);
        BigEndian::write_u32(&mut arch[12..16], data.len() as u32);
        BigEndian::write_u32(&mut arch[16..20], 14);

        body.resize(offset - 0x4000, 0);
        body.extend_from_slice(data);
        offset = 0x4000 + ((body.len() + 0x3fff) & !0x3fff);
    }

    header.resize(0x4000, 0);
    header.extend_from_slice(&body);
    header
}

pub fn thin_slice(data: Vec<u8>) -> Slice {
    let len = data.len() as u64;

    Slice::new(Arc::new(MemorySource::new(data)), 0, len, 0, 0)
}

/// A hello world executable: `_main` in `__text`, `_puts` bound from libSystem.
pub fn hello_world() -> Vec<u8> {
    let mut symtab = nlist(1, N_SECT | N_EXT, 1, 0, TEXT_VMADDR + 0xf00);
    symtab.extend(nlist(7, N_UNDF | N_EXT, NO_SECT, 0x0100, 0));
    let strtab = b"\0_main\0_puts\0\0\0\0";
    // bind _puts from ordinal 1 at __DATA+0x10, ordinal 1 lazy bind of _exit at __DATA+0x18
    let binds = [0x11, 0x40, b'_', b'p', b'u', b't', b's', 0x00, 0x72, 0x10, 0x90, 0x00];
    let lazy = [0x72, 0x18, 0x11, 0x40, b'_', b'e', b'x', b'i', b't', 0x00, 0x90, 0x00];
    // "_main" exported at offset 0xf00
    let exports = [
        0x00, 0x01, b'_', b'm', b'a', b'i', b'n', 0x00, 0x09, 0x03, 0x00, 0x80, 0x1e, 0x00,
    ];

    Builder::new(CPU_TYPE_X86_64, MH_EXECUTE)
        .segment(SegmentSpec {
            name: SEG_PAGEZERO,
            vmaddr: 0,
            vmsize: TEXT_VMADDR,
            fileoff: 0,
            filesize: 0,
            sections: vec![],
        })
        .segment(SegmentSpec {
            name: SEG_TEXT,
            vmaddr: TEXT_VMADDR,
            vmsize: 0x4000,
            fileoff: 0,
            filesize: 0x4000,
            sections: vec![SectionSpec {
                sectname: SECT_TEXT,
                addr: TEXT_VMADDR + 0xf00,
                size: 0x100,
                offset: 0xf00,
                flags: 0x8000_0400,
            }],
        })
        .segment(SegmentSpec {
            name: SEG_DATA,
            vmaddr: TEXT_VMADDR + 0x4000,
            vmsize: 0x4000,
            fileoff: 0x4000,
            filesize: 0x4000,
            sections: vec![],
        })
        .segment(SegmentSpec {
            name: SEG_LINKEDIT,
            vmaddr: TEXT_VMADDR + 0x8000,
            vmsize: 0x4000,
            fileoff: 0x8000,
            filesize: 0x200,
            sections: vec![],
        })
        .dylib(LC_LOAD_DYLIB, "/usr/lib/libSystem.B.dylib")
        .uuid([0x5a; 16])
        .symtab(0x8000, 2, 0x8080, strtab.len() as u32)
        .dyld_info(
            (0x8100, binds.len() as u32),
            (0x8120, lazy.len() as u32),
            (0x8140, exports.len() as u32),
        )
        .main(0xf00)
        .size(0x8200)
        .data(0xf00, &[0x55, 0x48, 0x89, 0xe5])
        .data(0x8000, &symtab)
        .data(0x8080, strtab)
        .data(0x8100, &binds)
        .data(0x8120, &lazy)
        .data(0x8140, &exports)
        .build()
}
