use std::fmt;
use std::io::Cursor;
use std::ops::Deref;

use byteorder::{ByteOrder, ReadBytesExt};
use uuid::Uuid;

use crate::consts::*;
use crate::errors::{Error, Result};
use crate::layout::{fixed_size_string, Endian, Layouts, Record};
use crate::loader::MachHeader;

/// The encoded version.
///
///  X.Y.Z is encoded in nibbles xxxx.yy.zz
///
#[derive(Debug, Default, Copy, Clone, PartialEq, Eq)]
pub struct VersionTag(pub u32);

impl VersionTag {
    pub fn major(self) -> u32 {
        self.0 >> 16
    }

    pub fn minor(self) -> u32 {
        (self.0 >> 8) & 0xFF
    }

    pub fn release(self) -> u32 {
        self.0 & 0xFF
    }
}

impl From<VersionTag> for u32 {
    fn from(tag: VersionTag) -> u32 {
        tag.0
    }
}

impl fmt::Display for VersionTag {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        if self.release() == 0 {
            write!(f, "{}.{}", self.major(), self.minor())
        } else {
            write!(f, "{}.{}.{}", self.major(), self.minor(), self.release())
        }
    }
}

/// The packed version.
///
/// A.B.C.D.E packed as a24.b10.c10.d10.e10
///
#[derive(Debug, Default, Copy, Clone, PartialEq, Eq)]
pub struct SourceVersionTag(pub u64);

impl SourceVersionTag {
    pub fn components(self) -> (u32, u32, u32, u32, u32) {
        (
            ((self.0 >> 40) & 0xFF_FFFF) as u32,
            ((self.0 >> 30) & 0x3FF) as u32,
            ((self.0 >> 20) & 0x3FF) as u32,
            ((self.0 >> 10) & 0x3FF) as u32,
            (self.0 & 0x3FF) as u32,
        )
    }
}

impl fmt::Display for SourceVersionTag {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let (a, b, c, d, e) = self.components();

        if e != 0 {
            write!(f, "{}.{}.{}.{}.{}", a, b, c, d, e)
        } else if d != 0 {
            write!(f, "{}.{}.{}.{}", a, b, c, d)
        } else if c != 0 {
            write!(f, "{}.{}.{}", a, b, c)
        } else {
            write!(f, "{}.{}", a, b)
        }
    }
}

/// The min OS version on which this binary was built to run.
///
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum BuildTarget {
    MacOsX,
    IPhoneOs,
    WatchOs,
    TvOs,
}

impl BuildTarget {
    pub fn from_cmd(cmd: u32) -> Option<Self> {
        match cmd {
            LC_VERSION_MIN_MACOSX => Some(BuildTarget::MacOsX),
            LC_VERSION_MIN_IPHONEOS => Some(BuildTarget::IPhoneOs),
            LC_VERSION_MIN_WATCHOS => Some(BuildTarget::WatchOs),
            LC_VERSION_MIN_TVOS => Some(BuildTarget::TvOs),
            _ => None,
        }
    }

    pub fn cmd(self) -> u32 {
        match self {
            BuildTarget::MacOsX => LC_VERSION_MIN_MACOSX,
            BuildTarget::IPhoneOs => LC_VERSION_MIN_IPHONEOS,
            BuildTarget::WatchOs => LC_VERSION_MIN_WATCHOS,
            BuildTarget::TvOs => LC_VERSION_MIN_TVOS,
        }
    }

    pub fn platform(self) -> u32 {
        match self {
            BuildTarget::MacOsX => PLATFORM_MACOS,
            BuildTarget::IPhoneOs => PLATFORM_IOS,
            BuildTarget::WatchOs => PLATFORM_WATCHOS,
            BuildTarget::TvOs => PLATFORM_TVOS,
        }
    }
}

pub fn platform_name(platform: u32) -> &'static str {
    match platform {
        PLATFORM_MACOS => "macos",
        PLATFORM_IOS => "ios",
        PLATFORM_TVOS => "tvos",
        PLATFORM_WATCHOS => "watchos",
        PLATFORM_BRIDGEOS => "bridgeos",
        PLATFORM_MACCATALYST => "maccatalyst",
        PLATFORM_IOSSIMULATOR => "iossimulator",
        PLATFORM_TVOSSIMULATOR => "tvossimulator",
        PLATFORM_WATCHOSSIMULATOR => "watchossimulator",
        PLATFORM_DRIVERKIT => "driverkit",
        _ => "unknown",
    }
}

/// A variable length string in a load command.
///
/// The string is stored after the fixed part of the command, the first
/// field is its offset from the start of the command.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct LcString(pub usize, pub String);

impl LcString {
    pub fn offset(&self) -> usize {
        self.0
    }

    pub fn as_str(&self) -> &str {
        self.1.as_str()
    }
}

impl fmt::Display for LcString {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.1)
    }
}

impl Deref for LcString {
    type Target = str;

    fn deref(&self) -> &Self::Target {
        self.1.as_str()
    }
}

/// A dynamically linked shared library, identified by its install name and
/// compatibility version.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct DyLib {
    /// library's path name
    pub name: LcString,
    /// library's build time stamp
    pub timestamp: u32,
    /// library's current version number
    pub current_version: VersionTag,
    /// library's compatibility vers number
    pub compatibility_version: VersionTag,
}

/// The offset and size of a blob of data in the __LINKEDIT segment.
///
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct LinkEditData {
    /// file offset of data in __LINKEDIT segment
    pub off: u32,
    /// file size of data in __LINKEDIT segment
    pub size: u32,
}

/// A tool used to build the binary, from `LC_BUILD_VERSION`.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct BuildTool {
    pub tool: u32,
    pub version: VersionTag,
}

/// Register state of the initial thread, as stored by `LC_THREAD`/`LC_UNIXTHREAD`.
#[derive(Debug, Clone, PartialEq)]
pub enum ThreadState {
    I386 {
        /// eax, ebx, ecx, edx, edi, esi, ebp, esp, ss, eflags, eip, cs, ds, es, fs, gs
        regs: [u32; 16],
    },
    X86_64 {
        /// rax .. r15, rip, rflags, cs, fs, gs
        regs: [u64; 21],
    },
    Arm {
        /// General purpose register r0-r12
        __r: [u32; 13],
        /// Stack pointer r13
        __sp: u32,
        /// Link register r14
        __lr: u32,
        /// Program counter r15
        __pc: u32,
        /// Current program status register
        __cpsr: u32,
    },
    Arm64 {
        /// General purpose registers x0-x28
        __x: [u64; 29],
        /// Frame pointer x29
        __fp: u64,
        /// Link register x30
        __lr: u64,
        /// Stack pointer x31
        __sp: u64,
        /// Program counter
        __pc: u64,
        /// Current program status register
        __cpsr: u32,
    },
    Unknown(Vec<u8>),
}

impl ThreadState {
    fn parse<O: ByteOrder>(cputype: cpu_type_t, flavor: u32, payload: &[u8]) -> Result<ThreadState> {
        let mut buf = Cursor::new(payload);

        let state = match (cputype, flavor) {
            (CPU_TYPE_I386, x86_THREAD_STATE32) => {
                let mut regs = [0u32; 16];
                buf.read_u32_into::<O>(&mut regs)?;
                ThreadState::I386 { regs }
            }
            (CPU_TYPE_X86_64, x86_THREAD_STATE64) => {
                let mut regs = [0u64; 21];
                buf.read_u64_into::<O>(&mut regs)?;
                ThreadState::X86_64 { regs }
            }
            (CPU_TYPE_ARM, ARM_THREAD_STATE) => {
                let mut __r = [0u32; 13];
                buf.read_u32_into::<O>(&mut __r)?;
                ThreadState::Arm {
                    __r,
                    __sp: buf.read_u32::<O>()?,
                    __lr: buf.read_u32::<O>()?,
                    __pc: buf.read_u32::<O>()?,
                    __cpsr: buf.read_u32::<O>()?,
                }
            }
            (CPU_TYPE_ARM64, ARM_THREAD_STATE64) => {
                let mut __x = [0u64; 29];
                buf.read_u64_into::<O>(&mut __x)?;
                ThreadState::Arm64 {
                    __x,
                    __fp: buf.read_u64::<O>()?,
                    __lr: buf.read_u64::<O>()?,
                    __sp: buf.read_u64::<O>()?,
                    __pc: buf.read_u64::<O>()?,
                    __cpsr: buf.read_u32::<O>()?,
                }
            }
            _ => ThreadState::Unknown(payload.to_vec()),
        };

        Ok(state)
    }

    /// The initial program counter.
    pub fn pc(&self) -> Option<u64> {
        match self {
            ThreadState::I386 { regs } => Some(u64::from(regs[10])),
            ThreadState::X86_64 { regs } => Some(regs[16]),
            ThreadState::Arm { __pc, .. } => Some(u64::from(*__pc)),
            ThreadState::Arm64 { __pc, .. } => Some(*__pc),
            ThreadState::Unknown(_) => None,
        }
    }
}

/// The flags field of a section, a section type and section attributes.
#[derive(Debug, Default, Copy, Clone, PartialEq, Eq)]
pub struct SectionFlags(pub u32);

impl SectionFlags {
    pub fn sect_type(self) -> u32 {
        self.0 & SECTION_TYPE
    }

    pub fn sect_attrs(self) -> SectionAttributes {
        SectionAttributes::from_bits_truncate(self.0 & SECTION_ATTRIBUTES)
    }
}

impl From<SectionFlags> for u32 {
    fn from(flags: SectionFlags) -> u32 {
        flags.0
    }
}

/// A section of a segment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Section {
    /// name of this section
    pub sectname: String,
    /// segment this section goes in
    pub segname: String,
    /// memory address of this section
    pub addr: u64,
    /// size in bytes of this section
    pub size: u64,
    /// file offset of this section
    pub offset: u32,
    /// section alignment (power of 2)
    pub align: u32,
    /// file offset of relocation entries
    pub reloff: u32,
    /// number of relocation entries
    pub nreloc: u32,
    // flags (section type and attributes)
    pub flags: SectionFlags,
    /// reserved (for offset or index)
    pub reserved1: u32,
    /// reserved (for count or sizeof)
    pub reserved2: u32,
    /// reserved
    pub reserved3: u32,
}

impl Section {
    fn from_record(record: &Record) -> Result<Section> {
        Ok(Section {
            sectname: record.str("sectname")?.to_owned(),
            segname: record.str("segname")?.to_owned(),
            addr: record.u64("addr")?,
            size: record.u64("size")?,
            offset: record.u32("offset")?,
            align: record.u32("align")?,
            reloff: record.u32("reloff")?,
            nreloc: record.u32("nreloc")?,
            flags: SectionFlags(record.u32("flags")?),
            reserved1: record.u32("reserved1")?,
            reserved2: record.u32("reserved2")?,
            reserved3: record.get("reserved3").map_or(Ok(0), |_| record.u32("reserved3"))?,
        })
    }

    pub fn contains(&self, addr: u64) -> bool {
        self.addr <= addr && addr < self.addr + self.size
    }
}

/// The load commands directly follow the mach header.
///
#[derive(Debug, Clone)]
pub enum LoadCommand {
    /// The segment load command indicates that a part of this file is to be
    /// mapped into the task's address space.
    ///
    /// If the segment has sections then the section structures directly follow
    /// the segment command and their size is reflected in cmdsize.
    Segment {
        /// segment name
        segname: String,
        /// memory address of this segment
        vmaddr: u64,
        /// memory size of this segment
        vmsize: u64,
        /// file offset of this segment
        fileoff: u64,
        /// amount to map from the file
        filesize: u64,
        /// maximum VM protection
        maxprot: vm_prot_t,
        /// initial VM protection
        initprot: vm_prot_t,
        flags: SegmentFlags,
        sections: Vec<Section>,
    },
    /// The 64-bit segment load command, fields as in `Segment`.
    Segment64 {
        segname: String,
        vmaddr: u64,
        vmsize: u64,
        fileoff: u64,
        filesize: u64,
        maxprot: vm_prot_t,
        initprot: vm_prot_t,
        flags: SegmentFlags,
        sections: Vec<Section>,
    },

    /// dynamically linked shared lib ident
    IdDyLib(DyLib),
    /// load a dynamically linked shared library
    LoadDyLib(DyLib),
    /// load a dynamically linked shared library
    /// that is allowed to be missing (all symbols are weak imported).
    LoadWeakDyLib(DyLib),
    /// load and re-export dylib
    ReexportDyLib(DyLib),
    /// load upward dylib
    LoadUpwardDylib(DyLib),
    /// delay load of dylib until first use
    LazyLoadDylib(DyLib),
    /// add a runtime search path for shared libraries
    Rpath(LcString),
    /// a client allowed to link against this umbrella's sub framework
    SubClient(LcString),
    /// the umbrella framework this image is a part of
    SubFramework(LcString),
    /// a sub umbrella of this umbrella framework
    SubUmbrella(LcString),
    /// a sub library of this umbrella framework
    SubLibrary(LcString),

    /// dynamic linker identification
    IdDyLinker(LcString),
    /// load a dynamic linker
    LoadDyLinker(LcString),
    /// string for dyld to treat like environment variable
    DyLdEnv(LcString),

    /// The offsets and sizes of the link-edit 4.3BSD "stab" style symbol table.
    SymTab {
        /// symbol table offset
        symoff: u32,
        /// number of symbol table entries
        nsyms: u32,
        /// string table offset
        stroff: u32,
        /// string table size in bytes
        strsize: u32,
    },

    /// The symbol table partitions and the tables used by the dynamic linker.
    DySymTab {
        // (index, count) of the local, external and undefined symbol groups
        ilocalsym: u32,
        nlocalsym: u32,
        iextdefsym: u32,
        nextdefsym: u32,
        iundefsym: u32,
        nundefsym: u32,
        // (file offset, count) of the tables below, unused by linked images
        tocoff: u32,
        ntoc: u32,
        modtaboff: u32,
        nmodtab: u32,
        extrefsymoff: u32,
        nextrefsyms: u32,
        /// indirect symbol table, one u32 symbol index per stub or pointer slot
        indirectsymoff: u32,
        nindirectsyms: u32,
        extreloff: u32,
        nextrel: u32,
        locreloff: u32,
        nlocrel: u32,
    },

    /// The 128-bit identifier of the link editor output.
    Uuid(Uuid),

    /// local of code signature
    CodeSignature(LinkEditData),
    /// local of info to split segments
    SegmentSplitInfo(LinkEditData),
    /// compressed table of function start addresses
    FunctionStarts(LinkEditData),
    /// table of non-instructions in __text
    DataInCode(LinkEditData),
    /// Code signing DRs copied from linked dylibs
    DylibCodeSignDrs(LinkEditData),
    /// optimization hints in MH_OBJECT files
    LinkerOptimizationHint(LinkEditData),
    /// export trie without the rest of the dyld info
    DyldExportsTrie(LinkEditData),
    /// chained fixups
    DyldChainedFixups(LinkEditData),

    /// The min OS version on which this binary was built to run.
    VersionMin {
        target: BuildTarget,
        version: VersionTag,
        sdk: VersionTag,
    },

    /// The platform, min OS version, sdk and tools the binary was built with.
    BuildVersion {
        platform: u32,
        minos: VersionTag,
        sdk: VersionTag,
        tools: Vec<BuildTool>,
    },

    /// The file offsets and sizes of the compressed dyld information:
    /// rebase, bind, weak bind and lazy bind opcode streams plus the export trie.
    DyldInfo {
        rebase_off: u32,
        rebase_size: u32,
        bind_off: u32,
        bind_size: u32,
        weak_bind_off: u32,
        weak_bind_size: u32,
        lazy_bind_off: u32,
        lazy_bind_size: u32,
        export_off: u32,
        export_size: u32,
    },

    /// The location (file offset) of main().
    EntryPoint {
        /// file (__TEXT) offset of main()
        entryoff: u64,
        /// if not zero, initial stack size
        stacksize: u64,
    },
    /// the version of the sources used to build the binary.
    SourceVersion(SourceVersionTag),

    /// The initial thread state of a program, including a stack.
    UnixThread {
        /// flavor of thread state
        flavor: u32,
        /// count of longs in thread state
        count: u32,
        /// thread state for this flavor
        state: ThreadState,
    },
    /// The initial thread state, without a stack.
    Thread {
        flavor: u32,
        count: u32,
        state: ThreadState,
    },

    /// encrypted segment information
    EncryptionInfo {
        /// file offset of encrypted range
        cryptoff: u32,
        /// file size of encrypted range
        cryptsize: u32,
        /// which enryption system, 0 means not-encrypted yet
        cryptid: u32,
    },
    /// 64-bit encrypted segment information
    EncryptionInfo64 {
        cryptoff: u32,
        cryptsize: u32,
        cryptid: u32,
    },

    /// A load command this crate does not decode.
    Command {
        /// type of load command
        cmd: u32,
        /// command in bytes, after the `cmd` and `cmdsize` fields
        payload: Vec<u8>,
    },
}

pub const LOAD_COMMAND_HEADER_SIZE: usize = 8; // cmd + cmdsize

impl LoadCommand {
    /// The layout of the fixed part of a command, `None` for unknown commands.
    fn layout_name(cmd: u32) -> Option<&'static str> {
        Some(match cmd {
            LC_SEGMENT => "segment_command",
            LC_SEGMENT_64 => "segment_command_64",
            LC_SYMTAB => "symtab_command",
            LC_DYSYMTAB => "dysymtab_command",
            LC_ID_DYLIB | LC_LOAD_DYLIB | LC_LOAD_WEAK_DYLIB | LC_REEXPORT_DYLIB | LC_LOAD_UPWARD_DYLIB
            | LC_LAZY_LOAD_DYLIB => "dylib_command",
            LC_RPATH | LC_SUB_CLIENT | LC_SUB_FRAMEWORK | LC_SUB_UMBRELLA | LC_SUB_LIBRARY | LC_ID_DYLINKER
            | LC_LOAD_DYLINKER | LC_DYLD_ENVIRONMENT => "lc_str_command",
            LC_UUID => "uuid_command",
            LC_CODE_SIGNATURE | LC_SEGMENT_SPLIT_INFO | LC_FUNCTION_STARTS | LC_DATA_IN_CODE
            | LC_DYLIB_CODE_SIGN_DRS | LC_LINKER_OPTIMIZATION_HINT | LC_DYLD_EXPORTS_TRIE
            | LC_DYLD_CHAINED_FIXUPS => "linkedit_data_command",
            LC_VERSION_MIN_MACOSX | LC_VERSION_MIN_IPHONEOS | LC_VERSION_MIN_WATCHOS | LC_VERSION_MIN_TVOS => {
                "version_min_command"
            }
            LC_BUILD_VERSION => "build_version_command",
            LC_DYLD_INFO | LC_DYLD_INFO_ONLY => "dyld_info_command",
            LC_MAIN => "entry_point_command",
            LC_SOURCE_VERSION => "source_version_command",
            LC_THREAD | LC_UNIXTHREAD => "thread_command",
            LC_ENCRYPTION_INFO => "encryption_info_command",
            LC_ENCRYPTION_INFO_64 => "encryption_info_command_64",
            _ => return None,
        })
    }

    /// Decode one command from its `cmdsize` bytes.
    pub fn parse(layouts: &Layouts, header: &MachHeader, buf: &[u8]) -> Result<LoadCommand> {
        let ptr_size = header.ptr_size();
        let prefix = layouts.decode("load_command", buf, 0, ptr_size)?;
        let cmd = prefix.u32("cmd")?;
        let cmdsize = buf.len();

        let name = match Self::layout_name(cmd) {
            Some(name) => name,
            None => {
                debug!(
                    "load unsupported {} command with {} bytes payload",
                    Self::cmd_name(cmd),
                    cmdsize - LOAD_COMMAND_HEADER_SIZE
                );

                return Ok(LoadCommand::Command {
                    cmd,
                    payload: buf[LOAD_COMMAND_HEADER_SIZE..].to_vec(),
                });
            }
        };

        let min_size = layouts.size_of(name, ptr_size)?;

        if cmdsize < min_size {
            return Err(Error::MalformedLoadCommands(format!(
                "{} command size {} is smaller than {}",
                Self::cmd_name(cmd),
                cmdsize,
                min_size
            )));
        }

        let record = layouts.decode(name, buf, 0, ptr_size)?;

        let cmd = match cmd {
            LC_SEGMENT | LC_SEGMENT_64 => {
                let (sect_layout, is_64bit) = if cmd == LC_SEGMENT_64 {
                    ("section_64", true)
                } else {
                    ("section", false)
                };
                let sect_size = layouts.size_of(sect_layout, ptr_size)?;
                let nsects = record.u32("nsects")? as usize;

                if min_size + nsects * sect_size > cmdsize {
                    return Err(Error::MalformedLoadCommands(format!(
                        "{} sections overflow the segment command of {} bytes",
                        nsects, cmdsize
                    )));
                }

                let sections = (0..nsects)
                    .map(|i| {
                        layouts
                            .decode(sect_layout, buf, min_size + i * sect_size, ptr_size)
                            .and_then(|record| Section::from_record(&record))
                    })
                    .collect::<Result<Vec<Section>>>()?;

                let segname = record.str("segname")?.to_owned();
                let vmaddr = record.u64("vmaddr")?;
                let vmsize = record.u64("vmsize")?;
                let fileoff = record.u64("fileoff")?;
                let filesize = record.u64("filesize")?;
                let maxprot = record.i64("maxprot")? as vm_prot_t;
                let initprot = record.i64("initprot")? as vm_prot_t;
                let flags = SegmentFlags::from_bits_truncate(record.u32("flags")?);

                if is_64bit {
                    LoadCommand::Segment64 {
                        segname,
                        vmaddr,
                        vmsize,
                        fileoff,
                        filesize,
                        maxprot,
                        initprot,
                        flags,
                        sections,
                    }
                } else {
                    LoadCommand::Segment {
                        segname,
                        vmaddr,
                        vmsize,
                        fileoff,
                        filesize,
                        maxprot,
                        initprot,
                        flags,
                        sections,
                    }
                }
            }

            LC_ID_DYLIB => LoadCommand::IdDyLib(Self::read_dylib(&record, buf)?),
            LC_LOAD_DYLIB => LoadCommand::LoadDyLib(Self::read_dylib(&record, buf)?),
            LC_LOAD_WEAK_DYLIB => LoadCommand::LoadWeakDyLib(Self::read_dylib(&record, buf)?),
            LC_REEXPORT_DYLIB => LoadCommand::ReexportDyLib(Self::read_dylib(&record, buf)?),
            LC_LOAD_UPWARD_DYLIB => LoadCommand::LoadUpwardDylib(Self::read_dylib(&record, buf)?),
            LC_LAZY_LOAD_DYLIB => LoadCommand::LazyLoadDylib(Self::read_dylib(&record, buf)?),

            LC_RPATH => LoadCommand::Rpath(Self::read_lc_str(&record, "offset", buf)?),
            LC_SUB_CLIENT => LoadCommand::SubClient(Self::read_lc_str(&record, "offset", buf)?),
            LC_SUB_FRAMEWORK => LoadCommand::SubFramework(Self::read_lc_str(&record, "offset", buf)?),
            LC_SUB_UMBRELLA => LoadCommand::SubUmbrella(Self::read_lc_str(&record, "offset", buf)?),
            LC_SUB_LIBRARY => LoadCommand::SubLibrary(Self::read_lc_str(&record, "offset", buf)?),
            LC_ID_DYLINKER => LoadCommand::IdDyLinker(Self::read_lc_str(&record, "offset", buf)?),
            LC_LOAD_DYLINKER => LoadCommand::LoadDyLinker(Self::read_lc_str(&record, "offset", buf)?),
            LC_DYLD_ENVIRONMENT => LoadCommand::DyLdEnv(Self::read_lc_str(&record, "offset", buf)?),

            LC_SYMTAB => LoadCommand::SymTab {
                symoff: record.u32("symoff")?,
                nsyms: record.u32("nsyms")?,
                stroff: record.u32("stroff")?,
                strsize: record.u32("strsize")?,
            },
            LC_DYSYMTAB => LoadCommand::DySymTab {
                ilocalsym: record.u32("ilocalsym")?,
                nlocalsym: record.u32("nlocalsym")?,
                iextdefsym: record.u32("iextdefsym")?,
                nextdefsym: record.u32("nextdefsym")?,
                iundefsym: record.u32("iundefsym")?,
                nundefsym: record.u32("nundefsym")?,
                tocoff: record.u32("tocoff")?,
                ntoc: record.u32("ntoc")?,
                modtaboff: record.u32("modtaboff")?,
                nmodtab: record.u32("nmodtab")?,
                extrefsymoff: record.u32("extrefsymoff")?,
                nextrefsyms: record.u32("nextrefsyms")?,
                indirectsymoff: record.u32("indirectsymoff")?,
                nindirectsyms: record.u32("nindirectsyms")?,
                extreloff: record.u32("extreloff")?,
                nextrel: record.u32("nextrel")?,
                locreloff: record.u32("locreloff")?,
                nlocrel: record.u32("nlocrel")?,
            },
            LC_UUID => LoadCommand::Uuid(Uuid::from_slice(record.bytes("uuid")?)?),

            LC_CODE_SIGNATURE => LoadCommand::CodeSignature(Self::read_linkedit_data(&record)?),
            LC_SEGMENT_SPLIT_INFO => LoadCommand::SegmentSplitInfo(Self::read_linkedit_data(&record)?),
            LC_FUNCTION_STARTS => LoadCommand::FunctionStarts(Self::read_linkedit_data(&record)?),
            LC_DATA_IN_CODE => LoadCommand::DataInCode(Self::read_linkedit_data(&record)?),
            LC_DYLIB_CODE_SIGN_DRS => LoadCommand::DylibCodeSignDrs(Self::read_linkedit_data(&record)?),
            LC_LINKER_OPTIMIZATION_HINT => LoadCommand::LinkerOptimizationHint(Self::read_linkedit_data(&record)?),
            LC_DYLD_EXPORTS_TRIE => LoadCommand::DyldExportsTrie(Self::read_linkedit_data(&record)?),
            LC_DYLD_CHAINED_FIXUPS => LoadCommand::DyldChainedFixups(Self::read_linkedit_data(&record)?),

            LC_VERSION_MIN_MACOSX | LC_VERSION_MIN_IPHONEOS | LC_VERSION_MIN_WATCHOS | LC_VERSION_MIN_TVOS => {
                LoadCommand::VersionMin {
                    target: BuildTarget::from_cmd(cmd).unwrap_or(BuildTarget::MacOsX),
                    version: VersionTag(record.u32("version")?),
                    sdk: VersionTag(record.u32("sdk")?),
                }
            }
            LC_BUILD_VERSION => {
                let ntools = record.u32("ntools")? as usize;
                let tool_size = layouts.size_of("build_tool_version", ptr_size)?;

                if min_size + ntools * tool_size > cmdsize {
                    return Err(Error::MalformedLoadCommands(format!(
                        "{} build tools overflow the build version command of {} bytes",
                        ntools, cmdsize
                    )));
                }

                let tools = (0..ntools)
                    .map(|i| {
                        let tool = layouts.decode("build_tool_version", buf, min_size + i * tool_size, ptr_size)?;

                        Ok(BuildTool {
                            tool: tool.u32("tool")?,
                            version: VersionTag(tool.u32("version")?),
                        })
                    })
                    .collect::<Result<Vec<BuildTool>>>()?;

                LoadCommand::BuildVersion {
                    platform: record.u32("platform")?,
                    minos: VersionTag(record.u32("minos")?),
                    sdk: VersionTag(record.u32("sdk")?),
                    tools,
                }
            }
            LC_DYLD_INFO | LC_DYLD_INFO_ONLY => LoadCommand::DyldInfo {
                rebase_off: record.u32("rebase_off")?,
                rebase_size: record.u32("rebase_size")?,
                bind_off: record.u32("bind_off")?,
                bind_size: record.u32("bind_size")?,
                weak_bind_off: record.u32("weak_bind_off")?,
                weak_bind_size: record.u32("weak_bind_size")?,
                lazy_bind_off: record.u32("lazy_bind_off")?,
                lazy_bind_size: record.u32("lazy_bind_size")?,
                export_off: record.u32("export_off")?,
                export_size: record.u32("export_size")?,
            },
            LC_MAIN => LoadCommand::EntryPoint {
                entryoff: record.u64("entryoff")?,
                stacksize: record.u64("stacksize")?,
            },
            LC_SOURCE_VERSION => LoadCommand::SourceVersion(SourceVersionTag(record.u64("version")?)),
            LC_THREAD | LC_UNIXTHREAD => {
                let flavor = record.u32("flavor")?;
                let count = record.u32("count")?;
                let end = (min_size + count as usize * 4).min(cmdsize);
                let payload = &buf[min_size..end];
                let state = match layouts.endian() {
                    Endian::Little => ThreadState::parse::<byteorder::LittleEndian>(header.cputype, flavor, payload),
                    Endian::Big => ThreadState::parse::<byteorder::BigEndian>(header.cputype, flavor, payload),
                }
                .map_err(|_| {
                    Error::MalformedLoadCommands(format!("thread state of flavor {} is truncated", flavor))
                })?;

                if cmd == LC_UNIXTHREAD {
                    LoadCommand::UnixThread { flavor, count, state }
                } else {
                    LoadCommand::Thread { flavor, count, state }
                }
            }
            LC_ENCRYPTION_INFO => LoadCommand::EncryptionInfo {
                cryptoff: record.u32("cryptoff")?,
                cryptsize: record.u32("cryptsize")?,
                cryptid: record.u32("cryptid")?,
            },
            LC_ENCRYPTION_INFO_64 => LoadCommand::EncryptionInfo64 {
                cryptoff: record.u32("cryptoff")?,
                cryptsize: record.u32("cryptsize")?,
                cryptid: record.u32("cryptid")?,
            },
            _ => unreachable!(),
        };

        trace!("parsed {} command with {} bytes: {:?}", cmd.name(), cmdsize, cmd);

        Ok(cmd)
    }

    fn read_lc_str(record: &Record, field: &str, buf: &[u8]) -> Result<LcString> {
        let off = record.u32(field)? as usize;

        if off >= buf.len() {
            return Err(Error::MalformedLoadCommands(format!(
                "string offset {} out of the {} bytes command",
                off,
                buf.len()
            )));
        }

        Ok(LcString(off, fixed_size_string(&buf[off..])))
    }

    fn read_dylib(record: &Record, buf: &[u8]) -> Result<DyLib> {
        let dylib = record.record("dylib")?;

        Ok(DyLib {
            name: Self::read_lc_str(dylib, "name", buf)?,
            timestamp: dylib.u32("timestamp")?,
            current_version: VersionTag(dylib.u32("current_version")?),
            compatibility_version: VersionTag(dylib.u32("compatibility_version")?),
        })
    }

    fn read_linkedit_data(record: &Record) -> Result<LinkEditData> {
        Ok(LinkEditData {
            off: record.u32("dataoff")?,
            size: record.u32("datasize")?,
        })
    }

    pub fn cmd(&self) -> u32 {
        match *self {
            LoadCommand::Segment { .. } => LC_SEGMENT,
            LoadCommand::Segment64 { .. } => LC_SEGMENT_64,
            LoadCommand::IdDyLib(_) => LC_ID_DYLIB,
            LoadCommand::LoadDyLib(_) => LC_LOAD_DYLIB,
            LoadCommand::LoadWeakDyLib(_) => LC_LOAD_WEAK_DYLIB,
            LoadCommand::ReexportDyLib(_) => LC_REEXPORT_DYLIB,
            LoadCommand::LoadUpwardDylib(_) => LC_LOAD_UPWARD_DYLIB,
            LoadCommand::LazyLoadDylib(_) => LC_LAZY_LOAD_DYLIB,
            LoadCommand::Rpath(_) => LC_RPATH,
            LoadCommand::SubClient(_) => LC_SUB_CLIENT,
            LoadCommand::SubFramework(_) => LC_SUB_FRAMEWORK,
            LoadCommand::SubUmbrella(_) => LC_SUB_UMBRELLA,
            LoadCommand::SubLibrary(_) => LC_SUB_LIBRARY,
            LoadCommand::IdDyLinker(_) => LC_ID_DYLINKER,
            LoadCommand::LoadDyLinker(_) => LC_LOAD_DYLINKER,
            LoadCommand::DyLdEnv(_) => LC_DYLD_ENVIRONMENT,
            LoadCommand::SymTab { .. } => LC_SYMTAB,
            LoadCommand::DySymTab { .. } => LC_DYSYMTAB,
            LoadCommand::Uuid(_) => LC_UUID,
            LoadCommand::CodeSignature(_) => LC_CODE_SIGNATURE,
            LoadCommand::SegmentSplitInfo(_) => LC_SEGMENT_SPLIT_INFO,
            LoadCommand::FunctionStarts(_) => LC_FUNCTION_STARTS,
            LoadCommand::DataInCode(_) => LC_DATA_IN_CODE,
            LoadCommand::DylibCodeSignDrs(_) => LC_DYLIB_CODE_SIGN_DRS,
            LoadCommand::LinkerOptimizationHint(_) => LC_LINKER_OPTIMIZATION_HINT,
            LoadCommand::DyldExportsTrie(_) => LC_DYLD_EXPORTS_TRIE,
            LoadCommand::DyldChainedFixups(_) => LC_DYLD_CHAINED_FIXUPS,
            LoadCommand::VersionMin { target, .. } => target.cmd(),
            LoadCommand::BuildVersion { .. } => LC_BUILD_VERSION,
            LoadCommand::DyldInfo { .. } => LC_DYLD_INFO_ONLY,
            LoadCommand::EntryPoint { .. } => LC_MAIN,
            LoadCommand::SourceVersion(_) => LC_SOURCE_VERSION,
            LoadCommand::UnixThread { .. } => LC_UNIXTHREAD,
            LoadCommand::Thread { .. } => LC_THREAD,
            LoadCommand::EncryptionInfo { .. } => LC_ENCRYPTION_INFO,
            LoadCommand::EncryptionInfo64 { .. } => LC_ENCRYPTION_INFO_64,
            LoadCommand::Command { cmd, .. } => cmd,
        }
    }

    pub fn name(&self) -> &'static str {
        Self::cmd_name(self.cmd())
    }

    pub fn cmd_name(cmd: u32) -> &'static str {
        match cmd {
            LC_SEGMENT => "LC_SEGMENT",
            LC_SYMTAB => "LC_SYMTAB",
            LC_SYMSEG => "LC_SYMSEG",
            LC_THREAD => "LC_THREAD",
            LC_UNIXTHREAD => "LC_UNIXTHREAD",
            LC_LOADFVMLIB => "LC_LOADFVMLIB",
            LC_IDFVMLIB => "LC_IDFVMLIB",
            LC_IDENT => "LC_IDENT",
            LC_FVMFILE => "LC_FVMFILE",
            LC_PREPAGE => "LC_PREPAGE",
            LC_DYSYMTAB => "LC_DYSYMTAB",
            LC_LOAD_DYLIB => "LC_LOAD_DYLIB",
            LC_ID_DYLIB => "LC_ID_DYLIB",
            LC_LOAD_DYLINKER => "LC_LOAD_DYLINKER",
            LC_ID_DYLINKER => "LC_ID_DYLINKER",
            LC_PREBOUND_DYLIB => "LC_PREBOUND_DYLIB",
            LC_ROUTINES => "LC_ROUTINES",
            LC_SUB_FRAMEWORK => "LC_SUB_FRAMEWORK",
            LC_SUB_UMBRELLA => "LC_SUB_UMBRELLA",
            LC_SUB_CLIENT => "LC_SUB_CLIENT",
            LC_SUB_LIBRARY => "LC_SUB_LIBRARY",
            LC_TWOLEVEL_HINTS => "LC_TWOLEVEL_HINTS",
            LC_PREBIND_CKSUM => "LC_PREBIND_CKSUM",
            LC_LOAD_WEAK_DYLIB => "LC_LOAD_WEAK_DYLIB",
            LC_SEGMENT_64 => "LC_SEGMENT_64",
            LC_ROUTINES_64 => "LC_ROUTINES_64",
            LC_UUID => "LC_UUID",
            LC_RPATH => "LC_RPATH",
            LC_CODE_SIGNATURE => "LC_CODE_SIGNATURE",
            LC_SEGMENT_SPLIT_INFO => "LC_SEGMENT_SPLIT_INFO",
            LC_REEXPORT_DYLIB => "LC_REEXPORT_DYLIB",
            LC_LAZY_LOAD_DYLIB => "LC_LAZY_LOAD_DYLIB",
            LC_ENCRYPTION_INFO => "LC_ENCRYPTION_INFO",
            LC_DYLD_INFO => "LC_DYLD_INFO",
            LC_DYLD_INFO_ONLY => "LC_DYLD_INFO_ONLY",
            LC_LOAD_UPWARD_DYLIB => "LC_LOAD_UPWARD_DYLIB",
            LC_VERSION_MIN_MACOSX => "LC_VERSION_MIN_MACOSX",
            LC_VERSION_MIN_IPHONEOS => "LC_VERSION_MIN_IPHONEOS",
            LC_FUNCTION_STARTS => "LC_FUNCTION_STARTS",
            LC_DYLD_ENVIRONMENT => "LC_DYLD_ENVIRONMENT",
            LC_MAIN => "LC_MAIN",
            LC_DATA_IN_CODE => "LC_DATA_IN_CODE",
            LC_SOURCE_VERSION => "LC_SOURCE_VERSION",
            LC_DYLIB_CODE_SIGN_DRS => "LC_DYLIB_CODE_SIGN_DRS",
            LC_ENCRYPTION_INFO_64 => "LC_ENCRYPTION_INFO_64",
            LC_LINKER_OPTION => "LC_LINKER_OPTION",
            LC_LINKER_OPTIMIZATION_HINT => "LC_LINKER_OPTIMIZATION_HINT",
            LC_VERSION_MIN_TVOS => "LC_VERSION_MIN_TVOS",
            LC_VERSION_MIN_WATCHOS => "LC_VERSION_MIN_WATCHOS",
            LC_NOTE => "LC_NOTE",
            LC_BUILD_VERSION => "LC_BUILD_VERSION",
            LC_DYLD_EXPORTS_TRIE => "LC_DYLD_EXPORTS_TRIE",
            LC_DYLD_CHAINED_FIXUPS => "LC_DYLD_CHAINED_FIXUPS",
            LC_FILESET_ENTRY => "LC_FILESET_ENTRY",
            _ => "LC_COMMAND",
        }
    }
}

pub trait CursorExt<T: AsRef<[u8]>> {
    fn read_uleb128(&mut self) -> Result<u64>;

    fn read_sleb128(&mut self) -> Result<i64>;

    fn read_cstr(&mut self) -> Result<String>;
}

impl<T> CursorExt<T> for Cursor<T>
where
    T: AsRef<[u8]>,
{
    fn read_uleb128(&mut self) -> Result<u64> {
        let start = self.position();
        let buf = self.get_ref().as_ref();
        let mut pos = start as usize;
        let mut v = 0u64;
        let mut bits = 0;

        loop {
            let b = *buf
                .get(pos)
                .ok_or_else(|| Error::truncated(start, pos - start as usize + 1, pos - start as usize))?;
            pos += 1;

            if bits > 63 {
                return Err(Error::NumberOverflow);
            }

            v |= u64::from(b & 0x7F) << bits;
            bits += 7;

            if (b & 0x80) == 0 {
                break;
            }
        }

        self.set_position(pos as u64);

        Ok(v)
    }

    fn read_sleb128(&mut self) -> Result<i64> {
        let start = self.position();
        let buf = self.get_ref().as_ref();
        let mut pos = start as usize;
        let mut v = 0i64;
        let mut bits = 0;

        loop {
            let b = *buf
                .get(pos)
                .ok_or_else(|| Error::truncated(start, pos - start as usize + 1, pos - start as usize))?;
            pos += 1;

            if bits > 63 {
                return Err(Error::NumberOverflow);
            }

            v |= i64::from(b & 0x7F) << bits;
            bits += 7;

            if (b & 0x80) == 0 {
                if bits < 64 && (b & 0x40) != 0 {
                    v |= -1i64 << bits;
                }
                break;
            }
        }

        self.set_position(pos as u64);

        Ok(v)
    }

    fn read_cstr(&mut self) -> Result<String> {
        let start = self.position() as usize;
        let buf = self.get_ref().as_ref();
        let rest = buf.get(start..).unwrap_or(&[]);
        let len = rest
            .iter()
            .position(|&b| b == 0)
            .ok_or_else(|| Error::truncated(start as u64, rest.len() + 1, rest.len()))?;
        let s = String::from_utf8(rest[..len].to_vec())?;

        self.set_position((start + len + 1) as u64);

        Ok(s)
    }
}

#[cfg(test)]
pub mod tests {
    use byteorder::{LittleEndian, WriteBytesExt};

    use super::*;
    use crate::layout::Endian;

    fn header64() -> MachHeader {
        MachHeader {
            magic: MH_MAGIC_64,
            cputype: CPU_TYPE_X86_64,
            cpusubtype: CPU_SUBTYPE_X86_64_ALL,
            filetype: MH_EXECUTE,
            ..Default::default()
        }
    }

    macro_rules! parse_command {
        ($buf:expr) => {{
            let layouts = Layouts::macho(Endian::Little);

            LoadCommand::parse(&layouts, &header64(), &$buf[..])
        }};
    }

    fn fixed_name(name: &str) -> Vec<u8> {
        let mut v = name.as_bytes().to_vec();
        v.resize(16, 0);
        v
    }

    fn segment64(segname: &str, vmaddr: u64, vmsize: u64, sections: &[(&str, u64, u64, u32)]) -> Vec<u8> {
        let mut buf = Vec::new();

        buf.write_u32::<LittleEndian>(LC_SEGMENT_64).unwrap();
        buf.write_u32::<LittleEndian>(72 + 80 * sections.len() as u32).unwrap();
        buf.extend_from_slice(&fixed_name(segname));
        buf.write_u64::<LittleEndian>(vmaddr).unwrap();
        buf.write_u64::<LittleEndian>(vmsize).unwrap();
        buf.write_u64::<LittleEndian>(0).unwrap();
        buf.write_u64::<LittleEndian>(vmsize).unwrap();
        buf.write_i32::<LittleEndian>(7).unwrap();
        buf.write_i32::<LittleEndian>(5).unwrap();
        buf.write_u32::<LittleEndian>(sections.len() as u32).unwrap();
        buf.write_u32::<LittleEndian>(0).unwrap();

        for &(sectname, addr, size, offset) in sections {
            buf.extend_from_slice(&fixed_name(sectname));
            buf.extend_from_slice(&fixed_name(segname));
            buf.write_u64::<LittleEndian>(addr).unwrap();
            buf.write_u64::<LittleEndian>(size).unwrap();
            buf.write_u32::<LittleEndian>(offset).unwrap();
            buf.write_u32::<LittleEndian>(4).unwrap();
            buf.extend_from_slice(&[0; 8]);
            buf.write_u32::<LittleEndian>(S_ATTR_PURE_INSTRUCTIONS_BITS).unwrap();
            buf.extend_from_slice(&[0; 12]);
        }

        buf
    }

    const S_ATTR_PURE_INSTRUCTIONS_BITS: u32 = 0x80000400;

    fn lc_str(cmd: u32, s: &str) -> Vec<u8> {
        let mut buf = Vec::new();
        let cmdsize = (12 + s.len() + 1 + 7) & !7;

        buf.write_u32::<LittleEndian>(cmd).unwrap();
        buf.write_u32::<LittleEndian>(cmdsize as u32).unwrap();
        buf.write_u32::<LittleEndian>(12).unwrap();
        buf.extend_from_slice(s.as_bytes());
        buf.resize(cmdsize, 0);
        buf
    }

    #[test]
    fn test_parse_segments() {
        let buf = segment64(
            SEG_TEXT,
            0x100000000,
            0x4000,
            &[("__text", 0x100000f00, 0x80, 0xf00), ("__cstring", 0x100000f80, 0x20, 0xf80)],
        );

        if let LoadCommand::Segment64 {
            ref segname,
            vmaddr,
            vmsize,
            fileoff,
            filesize,
            maxprot,
            initprot,
            flags,
            ref sections,
        } = parse_command!(buf).unwrap()
        {
            assert_eq!(segname, SEG_TEXT);
            assert_eq!(vmaddr, 0x100000000);
            assert_eq!(vmsize, 0x4000);
            assert_eq!(fileoff, 0);
            assert_eq!(filesize, 0x4000);
            assert_eq!(maxprot, 7);
            assert_eq!(initprot, 5);
            assert!(flags.is_empty());
            assert_eq!(
                sections.iter().map(|sec| sec.sectname.as_str()).collect::<Vec<&str>>(),
                vec![SECT_TEXT, "__cstring"]
            );
            assert_eq!(sections[0].addr, 0x100000f00);
            assert_eq!(sections[0].offset, 0xf00);
            assert_eq!(sections[0].align, 4);
            assert!(sections[0]
                .flags
                .sect_attrs()
                .contains(SectionAttributes::S_ATTR_PURE_INSTRUCTIONS));
            assert!(sections[1].contains(0x100000f9f));
            assert!(!sections[1].contains(0x100000fa0));
        } else {
            panic!();
        }
    }

    #[test]
    fn test_parse_segment_with_too_many_sections() {
        let mut buf = segment64(SEG_TEXT, 0x100000000, 0x4000, &[("__text", 0x100000f00, 0x80, 0xf00)]);

        // claim two sections in a command that holds one
        buf[64] = 2;

        assert!(matches!(parse_command!(buf), Err(Error::MalformedLoadCommands(_))));
    }

    #[test]
    fn test_parse_dyld_info_command() {
        let mut buf = Vec::new();

        buf.write_u32::<LittleEndian>(LC_DYLD_INFO_ONLY).unwrap();
        buf.write_u32::<LittleEndian>(48).unwrap();
        for v in &[0x1f5000u32, 3368, 0x1f5d28, 80, 0x1f5d78, 24, 0x1f5d90, 1688, 0x1f6428, 34856] {
            buf.write_u32::<LittleEndian>(*v).unwrap();
        }

        if let LoadCommand::DyldInfo {
            rebase_off,
            rebase_size,
            bind_off,
            bind_size,
            weak_bind_off,
            weak_bind_size,
            lazy_bind_off,
            lazy_bind_size,
            export_off,
            export_size,
        } = parse_command!(buf).unwrap()
        {
            assert_eq!(rebase_off, 0x1f5000);
            assert_eq!(rebase_size, 3368);
            assert_eq!(bind_off, 0x1f5d28);
            assert_eq!(bind_size, 80);
            assert_eq!(weak_bind_off, 0x1f5d78);
            assert_eq!(weak_bind_size, 24);
            assert_eq!(lazy_bind_off, 0x1f5d90);
            assert_eq!(lazy_bind_size, 1688);
            assert_eq!(export_off, 0x1f6428);
            assert_eq!(export_size, 34856);
        } else {
            panic!();
        }
    }

    #[test]
    fn test_parse_too_small_command() {
        let mut buf = Vec::new();

        buf.write_u32::<LittleEndian>(LC_SYMTAB).unwrap();
        buf.write_u32::<LittleEndian>(16).unwrap();
        buf.extend_from_slice(&[0; 8]);

        assert!(matches!(parse_command!(buf), Err(Error::MalformedLoadCommands(_))));
    }

    #[test]
    fn test_parse_load_dylinker_command() {
        if let LoadCommand::LoadDyLinker(LcString(off, ref name)) =
            parse_command!(lc_str(LC_LOAD_DYLINKER, "/usr/lib/dyld")).unwrap()
        {
            assert_eq!(off, 12);
            assert_eq!(name, "/usr/lib/dyld");
        } else {
            panic!();
        }
    }

    #[test]
    fn test_parse_rpath_command() {
        if let LoadCommand::Rpath(path) = parse_command!(lc_str(LC_RPATH, "@executable_path/../Frameworks")).unwrap() {
            assert_eq!(path.as_str(), "@executable_path/../Frameworks");
        } else {
            panic!();
        }
    }

    #[test]
    fn test_parse_uuid_command() {
        let mut buf = Vec::new();

        buf.write_u32::<LittleEndian>(LC_UUID).unwrap();
        buf.write_u32::<LittleEndian>(24).unwrap();
        buf.extend_from_slice(&[
            0x92, 0xe3, 0xcf, 0x1f, 0x20, 0xda, 0x33, 0x73, 0xa9, 0x8c, 0x85, 0x13, 0x66, 0xd3, 0x53, 0xbf,
        ]);

        if let LoadCommand::Uuid(ref uuid) = parse_command!(buf).unwrap() {
            assert_eq!(uuid.hyphenated().to_string(), "92e3cf1f-20da-3373-a98c-851366d353bf");
        } else {
            panic!();
        }
    }

    #[test]
    fn test_load_dylib_command() {
        let mut buf = Vec::new();
        let name = "/usr/lib/libSystem.B.dylib";

        buf.write_u32::<LittleEndian>(LC_LOAD_DYLIB).unwrap();
        buf.write_u32::<LittleEndian>(56).unwrap();
        buf.write_u32::<LittleEndian>(24).unwrap();
        buf.write_u32::<LittleEndian>(2).unwrap();
        buf.write_u32::<LittleEndian>(0x04ca0a01).unwrap();
        buf.write_u32::<LittleEndian>(0x00010000).unwrap();
        buf.extend_from_slice(name.as_bytes());
        buf.resize(56, 0);

        if let LoadCommand::LoadDyLib(ref dylib) = parse_command!(buf).unwrap() {
            assert_eq!(dylib.name, LcString(24, String::from(name)));
            assert_eq!(dylib.timestamp, 2);
            assert_eq!(dylib.current_version.to_string(), "1226.10.1");
            assert_eq!(dylib.compatibility_version.to_string(), "1.0");
        } else {
            panic!();
        }
    }

    #[test]
    fn test_parse_build_version_command() {
        let mut buf = Vec::new();

        buf.write_u32::<LittleEndian>(LC_BUILD_VERSION).unwrap();
        buf.write_u32::<LittleEndian>(32).unwrap();
        buf.write_u32::<LittleEndian>(PLATFORM_MACOS).unwrap();
        buf.write_u32::<LittleEndian>(0x000b0000).unwrap();
        buf.write_u32::<LittleEndian>(0x000c0100).unwrap();
        buf.write_u32::<LittleEndian>(1).unwrap();
        buf.write_u32::<LittleEndian>(3).unwrap();
        buf.write_u32::<LittleEndian>(0x03590100).unwrap();

        if let LoadCommand::BuildVersion {
            platform,
            minos,
            sdk,
            ref tools,
        } = parse_command!(buf).unwrap()
        {
            assert_eq!(platform_name(platform), "macos");
            assert_eq!(minos.to_string(), "11.0");
            assert_eq!(sdk.to_string(), "12.1");
            assert_eq!(tools.len(), 1);
            assert_eq!(tools[0].tool, 3);
            assert_eq!(tools[0].version.to_string(), "857.1");
        } else {
            panic!();
        }
    }

    #[test]
    fn test_parse_unixthread_command() {
        let mut buf = Vec::new();

        buf.write_u32::<LittleEndian>(LC_UNIXTHREAD).unwrap();
        buf.write_u32::<LittleEndian>(16 + 21 * 8).unwrap();
        buf.write_u32::<LittleEndian>(x86_THREAD_STATE64).unwrap();
        buf.write_u32::<LittleEndian>(42).unwrap();
        for i in 0..21u64 {
            buf.write_u64::<LittleEndian>(if i == 16 { 0x100000f00 } else { 0 }).unwrap();
        }

        if let LoadCommand::UnixThread { flavor, ref state, .. } = parse_command!(buf).unwrap() {
            assert_eq!(flavor, x86_THREAD_STATE64);
            assert_eq!(state.pc(), Some(0x100000f00));
        } else {
            panic!();
        }
    }

    #[test]
    fn test_parse_unknown_command() {
        let mut buf = Vec::new();

        buf.write_u32::<LittleEndian>(LC_NOTE).unwrap();
        buf.write_u32::<LittleEndian>(40).unwrap();
        buf.resize(40, 0xaa);

        if let LoadCommand::Command { cmd, ref payload } = parse_command!(buf).unwrap() {
            assert_eq!(cmd, LC_NOTE);
            assert_eq!(payload.len(), 32);
        } else {
            panic!();
        }
    }

    #[test]
    fn test_layout_name() {
        assert_eq!(LoadCommand::layout_name(LC_SEGMENT), Some("segment_command"));
        assert_eq!(LoadCommand::layout_name(LC_SEGMENT_64), Some("segment_command_64"));
        assert_eq!(LoadCommand::layout_name(LC_DYLD_CHAINED_FIXUPS), Some("linkedit_data_command"));
        assert_eq!(LoadCommand::layout_name(LC_NOTE), None);
        assert_eq!(LoadCommand::layout_name(0xdead), None);
    }

    #[test]
    fn test_leb128() {
        let mut cur = Cursor::new(vec![0xe5, 0x8e, 0x26, 0x7f, 0x80, 0x7f, 0x80]);

        assert_eq!(cur.read_uleb128().unwrap(), 624485);
        assert_eq!(cur.read_sleb128().unwrap(), -1);
        assert_eq!(cur.read_sleb128().unwrap(), -128);
        assert!(matches!(cur.read_uleb128(), Err(Error::TruncatedInput { .. })));

        let mut cur = Cursor::new(vec![0xff; 11]);

        assert!(matches!(cur.read_uleb128(), Err(Error::NumberOverflow)));

        let mut cur = Cursor::new(b"_foo\0_bar".to_vec());

        assert_eq!(cur.read_cstr().unwrap(), "_foo");
        assert_eq!(cur.position(), 5);
        assert!(matches!(cur.read_cstr(), Err(Error::TruncatedInput { .. })));
    }
}
