use std::fmt;
use std::io::Cursor;
use std::path::Path;
use std::sync::Arc;

use crate::commands::{CursorExt, LoadCommand};
use crate::consts::*;
use crate::errors::{Error, Result};
use crate::layout::{Endian, Layouts};
use crate::source::{FileSource, MmapSource, PagedFileSource};

/// The longest ULEB128 a 64-bit value can take.
const MAX_ULEB128_LEN: usize = 10;

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct MachHeader {
    pub magic: u32,
    pub cputype: cpu_type_t,
    pub cpusubtype: cpu_subtype_t,
    pub filetype: u32,
    pub ncmds: u32,
    pub sizeofcmds: u32,
    pub flags: u32,
}

impl MachHeader {
    pub fn is_64bit(&self) -> bool {
        self.magic == MH_MAGIC_64 || self.magic == MH_CIGAM_64
    }

    pub fn is_bigend(&self) -> bool {
        self.magic == MH_CIGAM || self.magic == MH_CIGAM_64
    }

    /// The pointer width of the image, in bytes.
    pub fn ptr_size(&self) -> usize {
        if self.is_64bit() {
            8
        } else {
            4
        }
    }

    fn layout_name(&self) -> &'static str {
        if self.is_64bit() {
            "mach_header_64"
        } else {
            "mach_header"
        }
    }

    pub fn arch_name(&self) -> &'static str {
        get_arch_name(self.cputype, self.cpusubtype)
    }
}

/// A load command and its declared `cmdsize`.
#[derive(Debug, Clone)]
pub struct MachCommand(pub LoadCommand, pub usize);

impl MachCommand {
    pub fn command(&self) -> &LoadCommand {
        &self.0
    }

    pub fn size(&self) -> usize {
        self.1
    }
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct FatArch {
    /// cpu specifier (int)
    pub cputype: cpu_type_t,
    /// machine specifier (int)
    pub cpusubtype: cpu_subtype_t,
    /// file offset to this object file
    pub offset: u64,
    /// size of this object file
    pub size: u64,
    /// alignment as a power of 2
    pub align: u32,
}

impl FatArch {
    pub fn arch_name(&self) -> &'static str {
        get_arch_name(self.cputype, self.cpusubtype)
    }
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct FatHeader {
    pub magic: u32,
    pub archs: Vec<FatArch>,
}

impl FatHeader {
    /// Decode the fat header and its architecture directory.
    ///
    /// Every slice must lie within the file.
    pub fn parse(source: &dyn FileSource) -> Result<FatHeader> {
        let magic = read_magic(&source.read(0, 4)?)?;
        let (endian, is_64bit) = match u32::from_be_bytes(magic) {
            FAT_MAGIC => (Endian::Big, false),
            FAT_MAGIC_64 => (Endian::Big, true),
            FAT_CIGAM => (Endian::Little, false),
            other => return Err(Error::UnsupportedFiletype(other)),
        };
        let layouts = Layouts::macho(endian);
        let header_size = layouts.size_of("fat_header", 4)?;
        let header = layouts.decode("fat_header", &source.read(0, header_size)?, 0, 4)?;
        let nfat_arch = header.u32("nfat_arch")? as usize;
        let arch_layout = if is_64bit { "fat_arch_64" } else { "fat_arch" };
        let arch_size = layouts.size_of(arch_layout, 4)?;
        let table = source.read(header_size as u64, nfat_arch * arch_size)?;

        debug!(
            "parsing fat header with {} archs, magic=0x{:x}",
            nfat_arch,
            header.u32("magic")?
        );

        let mut archs = Vec::with_capacity(nfat_arch);

        for i in 0..nfat_arch {
            let record = layouts.decode(arch_layout, &table, i * arch_size, 4)?;
            let arch = FatArch {
                cputype: record.i64("cputype")? as cpu_type_t,
                cpusubtype: record.i64("cpusubtype")? as cpu_subtype_t,
                offset: record.u64("offset")?,
                size: record.u64("size")?,
                align: record.u32("align")?,
            };

            debug!("fat header arch#{}, arch={:?}", i, arch);

            match arch.offset.checked_add(arch.size) {
                Some(end) if end <= source.len() => {}
                _ => {
                    return Err(Error::truncated(
                        arch.offset,
                        arch.size as usize,
                        source.len().saturating_sub(arch.offset) as usize,
                    ))
                }
            }

            archs.push(arch);
        }

        Ok(FatHeader {
            magic: header.u32("magic")?,
            archs,
        })
    }
}

fn read_magic(bytes: &[u8]) -> Result<[u8; 4]> {
    let mut magic = [0; 4];

    if bytes.len() < magic.len() {
        return Err(Error::truncated(0, magic.len(), bytes.len()));
    }

    magic.copy_from_slice(&bytes[..4]);

    Ok(magic)
}

/// One architecture of a Mach-O file.
///
/// All offsets given to a slice are relative to the start of the slice.
#[derive(Clone)]
pub struct Slice {
    source: Arc<dyn FileSource>,
    base: u64,
    size: u64,
    pub cputype: cpu_type_t,
    pub cpusubtype: cpu_subtype_t,
}

impl fmt::Debug for Slice {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("Slice")
            .field("base", &self.base)
            .field("size", &self.size)
            .field("cputype", &self.cputype)
            .field("cpusubtype", &self.cpusubtype)
            .finish()
    }
}

impl Slice {
    pub fn new(source: Arc<dyn FileSource>, base: u64, size: u64, cputype: cpu_type_t, cpusubtype: cpu_subtype_t) -> Self {
        Slice {
            source,
            base,
            size,
            cputype,
            cpusubtype,
        }
    }

    pub fn base(&self) -> u64 {
        self.base
    }

    pub fn len(&self) -> u64 {
        self.size
    }

    pub fn is_empty(&self) -> bool {
        self.size == 0
    }

    pub fn arch_name(&self) -> &'static str {
        get_arch_name(self.cputype, self.cpusubtype)
    }

    fn check(&self, offset: u64, length: usize) -> Result<()> {
        match offset.checked_add(length as u64) {
            Some(end) if end <= self.size => Ok(()),
            _ => Err(Error::truncated(offset, length, self.size.saturating_sub(offset) as usize)),
        }
    }

    pub fn read(&self, offset: u64, length: usize) -> Result<Vec<u8>> {
        self.check(offset, length)?;

        self.source.read(self.base + offset, length)
    }

    pub fn read_cstring(&self, offset: u64) -> Result<String> {
        self.check(offset, 1)?;

        let s = self.source.read_cstring(self.base + offset)?;

        self.check(offset, s.len() + 1)?;

        Ok(s)
    }

    /// Decode a ULEB128 at `offset`, returning the value and its encoded length.
    pub fn read_uleb128(&self, offset: u64) -> Result<(u64, usize)> {
        self.check(offset, 1)?;

        let available = (self.size - offset).min(MAX_ULEB128_LEN as u64) as usize;
        let mut cur = Cursor::new(self.read(offset, available)?);
        let value = cur.read_uleb128().map_err(|err| match err {
            Error::TruncatedInput { needed, available, .. } => Error::truncated(offset, needed, available),
            err => err,
        })?;

        Ok((value, cur.position() as usize))
    }
}

/// Progress of decoding one image.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum LoadState {
    Start,
    HeaderParsed,
    CommandsEnumerated,
    Finalized,
}

/// The mach header and the decoded load commands of one slice.
#[derive(Debug)]
pub struct ImageHeader {
    pub header: MachHeader,
    pub commands: Vec<MachCommand>,
    pub state: LoadState,
    layouts: Layouts,
}

impl ImageHeader {
    pub fn parse(slice: &Slice) -> Result<ImageHeader> {
        let mut state = LoadState::Start;
        let magic = read_magic(&slice.read(0, 4)?)?;

        let endian = match u32::from_le_bytes(magic) {
            MH_MAGIC | MH_MAGIC_64 => Endian::Little,
            MH_CIGAM | MH_CIGAM_64 => Endian::Big,
            _ => return Err(Error::UnsupportedFiletype(u32::from_be_bytes(magic))),
        };
        let layouts = Layouts::macho(endian);

        trace!("{:?}: magic {:02x?}, {:?} endian", state, magic, endian);

        let header = {
            let name = match u32::from_le_bytes(magic) {
                MH_MAGIC_64 | MH_CIGAM_64 => "mach_header_64",
                _ => "mach_header",
            };
            let size = layouts.size_of(name, 4)?;
            let record = layouts.decode(name, &slice.read(0, size)?, 0, 4)?;

            MachHeader {
                // as stored, so that the byte order stays visible
                magic: u32::from_le_bytes(magic),
                cputype: record.i64("cputype")? as cpu_type_t,
                cpusubtype: record.i64("cpusubtype")? as cpu_subtype_t,
                filetype: record.u32("filetype")?,
                ncmds: record.u32("ncmds")?,
                sizeofcmds: record.u32("sizeofcmds")?,
                flags: record.u32("flags")?,
            }
        };

        state = LoadState::HeaderParsed;

        debug!("{:?}: {:?}", state, header);

        let header_size = layouts.size_of(header.layout_name(), header.ptr_size())?;
        let buf = slice.read(header_size as u64, header.sizeofcmds as usize)?;
        let commands = Self::parse_commands(&layouts, &header, &buf)?;

        state = LoadState::CommandsEnumerated;

        debug!("{:?}: {} load commands", state, commands.len());

        Ok(ImageHeader {
            header,
            commands,
            state,
            layouts,
        })
    }

    fn parse_commands(layouts: &Layouts, header: &MachHeader, buf: &[u8]) -> Result<Vec<MachCommand>> {
        let mut commands = Vec::with_capacity(header.ncmds.min(0x1000) as usize);
        let mut pos = 0usize;

        for i in 0..header.ncmds {
            let prefix = layouts
                .decode("load_command", buf, pos, header.ptr_size())
                .map_err(|_| {
                    Error::MalformedLoadCommands(format!(
                        "load command #{} at offset {} overruns sizeofcmds {}",
                        i, pos, header.sizeofcmds
                    ))
                })?;
            let cmdsize = prefix.u32("cmdsize")? as usize;

            if cmdsize < LOAD_COMMAND_MIN_SIZE {
                return Err(Error::MalformedLoadCommands(format!(
                    "load command #{} has size {}",
                    i, cmdsize
                )));
            }

            if pos + cmdsize > buf.len() {
                return Err(Error::MalformedLoadCommands(format!(
                    "load command #{} of {} bytes at offset {} overruns sizeofcmds {}",
                    i, cmdsize, pos, header.sizeofcmds
                )));
            }

            let cmd = LoadCommand::parse(layouts, header, &buf[pos..pos + cmdsize])?;

            commands.push(MachCommand(cmd, cmdsize));

            pos += cmdsize;
        }

        if pos != buf.len() {
            return Err(Error::MalformedLoadCommands(format!(
                "{} load commands use {} bytes, but sizeofcmds is {}",
                header.ncmds, pos, header.sizeofcmds
            )));
        }

        Ok(commands)
    }

    pub fn layouts(&self) -> &Layouts {
        &self.layouts
    }

    pub(crate) fn into_parts(self) -> (MachHeader, Vec<MachCommand>, Layouts) {
        (self.header, self.commands, self.layouts)
    }
}

const LOAD_COMMAND_MIN_SIZE: usize = 8;

/// A thin or fat Mach-O file, split into its slices.
#[derive(Debug)]
pub struct MachFile {
    pub fat: Option<FatHeader>,
    pub slices: Vec<Slice>,
}

impl MachFile {
    pub fn parse(source: Arc<dyn FileSource>) -> Result<MachFile> {
        let magic = u32::from_be_bytes(read_magic(&source.read(0, 4)?)?);

        match magic {
            FAT_MAGIC | FAT_MAGIC_64 | FAT_CIGAM => {
                let fat = FatHeader::parse(source.as_ref())?;
                let slices = fat
                    .archs
                    .iter()
                    .map(|arch| Slice::new(source.clone(), arch.offset, arch.size, arch.cputype, arch.cpusubtype))
                    .collect();

                Ok(MachFile { fat: Some(fat), slices })
            }
            _ => {
                let len = source.len();
                let slice = Slice::new(source, 0, len, 0, 0);
                let header = ImageHeader::parse(&slice)?.header;

                Ok(MachFile {
                    fat: None,
                    slices: vec![Slice {
                        cputype: header.cputype,
                        cpusubtype: header.cpusubtype,
                        ..slice
                    }],
                })
            }
        }
    }

    /// Map the file into memory and split it.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<MachFile> {
        Self::parse(Arc::new(MmapSource::open(path)?))
    }

    /// Split a file read on demand through a bounded page cache.
    pub fn open_paged<P: AsRef<Path>>(path: P, max_pages: usize) -> Result<MachFile> {
        Self::parse(Arc::new(PagedFileSource::open(path, max_pages)?))
    }

    pub fn is_fat(&self) -> bool {
        self.fat.is_some()
    }
}

#[cfg(test)]
pub mod tests {
    use byteorder::{BigEndian, LittleEndian, WriteBytesExt};

    use super::*;
    use crate::source::MemorySource;

    /**
    Mach header
          magic cputype cpusubtype  caps    filetype ncmds sizeofcmds      flags
     0xfeedfacf 16777223          3  0x80           2    15       2080 0x00a18085
    **/
    const MACH_HEADER_64_DATA: [u8; 32] = [
        0xcf, 0xfa, 0xed, 0xfe, 0x7, 0x0, 0x0, 0x1, 0x3, 0x0, 0x0, 0x80, 0x2, 0x0, 0x0, 0x0, 0xf, 0x0, 0x0, 0x0, 0x20,
        0x8, 0x0, 0x0, 0x85, 0x80, 0xa1, 0x0, 0x0, 0x0, 0x0, 0x0,
    ];

    fn slice_of(data: Vec<u8>) -> Slice {
        let len = data.len() as u64;

        Slice::new(Arc::new(MemorySource::new(data)), 0, len, 0, 0)
    }

    fn thin_image(commands: &[Vec<u8>], sizeofcmds: Option<u32>) -> Vec<u8> {
        let mut buf = Vec::new();
        let total: usize = commands.iter().map(|cmd| cmd.len()).sum();

        buf.write_u32::<LittleEndian>(MH_MAGIC_64).unwrap();
        buf.write_i32::<LittleEndian>(CPU_TYPE_X86_64).unwrap();
        buf.write_i32::<LittleEndian>(CPU_SUBTYPE_X86_64_ALL).unwrap();
        buf.write_u32::<LittleEndian>(MH_EXECUTE).unwrap();
        buf.write_u32::<LittleEndian>(commands.len() as u32).unwrap();
        buf.write_u32::<LittleEndian>(sizeofcmds.unwrap_or(total as u32)).unwrap();
        buf.write_u32::<LittleEndian>(0).unwrap();
        buf.write_u32::<LittleEndian>(0).unwrap();

        for cmd in commands {
            buf.extend_from_slice(cmd);
        }

        buf.resize(buf.len() + 64, 0);
        buf
    }

    fn uuid_command() -> Vec<u8> {
        let mut buf = Vec::new();

        buf.write_u32::<LittleEndian>(LC_UUID).unwrap();
        buf.write_u32::<LittleEndian>(24).unwrap();
        buf.extend_from_slice(&[0x11; 16]);
        buf
    }

    #[test]
    fn test_parse_mach_header() {
        let mut data = MACH_HEADER_64_DATA.to_vec();

        // no load commands
        data[16] = 0;
        data[20] = 0;
        data[21] = 0;

        let image = ImageHeader::parse(&slice_of(data)).unwrap();
        let header = &image.header;

        assert_eq!(header.magic, MH_MAGIC_64);
        assert_eq!(header.cputype, CPU_TYPE_X86_64);
        assert_eq!(header.cpusubtype, 0x80000003u64 as i32);
        assert_eq!(header.filetype, MH_EXECUTE);
        assert_eq!(header.ncmds, 0);
        assert_eq!(header.flags, 0x00a18085);
        assert_eq!(header.ptr_size(), 8);
        assert!(!header.is_bigend());
        assert_eq!(image.state, LoadState::CommandsEnumerated);
    }

    #[test]
    fn test_truncated_header() {
        match ImageHeader::parse(&slice_of(MACH_HEADER_64_DATA[..20].to_vec())) {
            Err(Error::TruncatedInput { .. }) => {}
            res => panic!("unexpected {:?}", res),
        }

        // header claims 2080 bytes of commands
        assert!(matches!(
            ImageHeader::parse(&slice_of(MACH_HEADER_64_DATA.to_vec())),
            Err(Error::TruncatedInput { .. })
        ));
    }

    #[test]
    fn test_magic_stays_within_slice() {
        let mut data = vec![0u8; 4];

        data.extend_from_slice(&MACH_HEADER_64_DATA);

        let source: Arc<dyn FileSource> = Arc::new(MemorySource::new(data));

        for size in 0..4 {
            match ImageHeader::parse(&Slice::new(source.clone(), 4, size, 0, 0)) {
                Err(Error::TruncatedInput { needed: 4, .. }) => {}
                res => panic!("slice of {} bytes, unexpected {:?}", size, res),
            }
        }

        // the magic itself is readable, the header is not
        assert!(matches!(
            ImageHeader::parse(&Slice::new(source, 4, 8, 0, 0)),
            Err(Error::TruncatedInput { .. })
        ));
    }

    #[test]
    fn test_unsupported_magic() {
        assert!(matches!(
            ImageHeader::parse(&slice_of(b"\x7fELF\x02\x01\x01\x00".to_vec())),
            Err(Error::UnsupportedFiletype(0x7f454c46))
        ));
    }

    #[test]
    fn test_parse_load_commands() {
        let image = ImageHeader::parse(&slice_of(thin_image(&[uuid_command(), uuid_command()], None))).unwrap();

        assert_eq!(image.commands.len(), 2);
        assert!(image.commands.iter().all(|cmd| cmd.command().cmd() == LC_UUID && cmd.size() == 24));
    }

    #[test]
    fn test_sizeofcmds_mismatch() {
        let data = thin_image(&[uuid_command()], Some(32));

        assert!(matches!(
            ImageHeader::parse(&slice_of(data)),
            Err(Error::MalformedLoadCommands(_))
        ));

        let data = thin_image(&[uuid_command()], Some(16));

        assert!(matches!(
            ImageHeader::parse(&slice_of(data)),
            Err(Error::MalformedLoadCommands(_))
        ));
    }

    #[test]
    fn test_zero_cmdsize() {
        let mut cmd = uuid_command();

        cmd[4] = 0;

        assert!(matches!(
            ImageHeader::parse(&slice_of(thin_image(&[cmd], Some(24)))),
            Err(Error::MalformedLoadCommands(_))
        ));
    }

    #[test]
    fn test_parse_fat_file() {
        let thin = thin_image(&[uuid_command()], None);
        let mut buf = Vec::new();

        buf.write_u32::<BigEndian>(FAT_MAGIC).unwrap();
        buf.write_u32::<BigEndian>(2).unwrap();
        for &(cputype, offset) in &[(CPU_TYPE_X86_64, 0x1000u32), (CPU_TYPE_ARM64, 0x2000)] {
            buf.write_i32::<BigEndian>(cputype).unwrap();
            buf.write_i32::<BigEndian>(0).unwrap();
            buf.write_u32::<BigEndian>(offset).unwrap();
            buf.write_u32::<BigEndian>(thin.len() as u32).unwrap();
            buf.write_u32::<BigEndian>(12).unwrap();
        }
        buf.resize(0x1000, 0);
        buf.extend_from_slice(&thin);
        buf.resize(0x2000, 0);
        buf.extend_from_slice(&thin);

        let file = MachFile::parse(Arc::new(MemorySource::new(buf.clone()))).unwrap();

        assert!(file.is_fat());
        assert_eq!(file.slices.len(), 2);
        assert_eq!(file.slices[1].base(), 0x2000);
        assert_eq!(file.slices[1].arch_name(), "arm64");
        assert_eq!(file.slices[0].read(0, 4).unwrap(), MH_MAGIC_64.to_le_bytes());
        assert!(file.slices[0].read(thin.len() as u64 - 2, 4).is_err());

        // the second slice runs past the end of the file
        buf.truncate(0x2000 + thin.len() - 1);

        assert!(matches!(
            MachFile::parse(Arc::new(MemorySource::new(buf))),
            Err(Error::TruncatedInput { .. })
        ));
    }

    #[test]
    fn test_slice_uleb128() {
        let slice = slice_of(vec![0x00, 0xe5, 0x8e, 0x26, 0x80]);

        assert_eq!(slice.read_uleb128(1).unwrap(), (624485, 3));
        assert_eq!(slice.read_uleb128(0).unwrap(), (0, 1));
        assert!(matches!(slice.read_uleb128(4), Err(Error::TruncatedInput { offset: 4, .. })));
        assert!(slice.read_uleb128(5).is_err());
    }
}
