#![allow(dead_code)]
#![allow(non_camel_case_types)]
#![allow(non_upper_case_globals)]

pub type cpu_type_t = i32;
pub type cpu_subtype_t = i32;
pub type vm_prot_t = i32;

// Capability bits used in the definition of cpu_type.
//

/// mask for architecture bits
pub const CPU_ARCH_MASK: cpu_type_t = 0xff000000u64 as cpu_type_t;
/// 64 bit ABI
pub const CPU_ARCH_ABI64: cpu_type_t = 0x01000000;
/// ABI for 64-bit hardware with 32-bit types; LP32
pub const CPU_ARCH_ABI64_32: cpu_type_t = 0x02000000;

//  Machine types known by all.
//

pub const CPU_TYPE_ANY: cpu_type_t = -1;

pub const CPU_TYPE_VAX: cpu_type_t = 1;
pub const CPU_TYPE_MC680X0: cpu_type_t = 6;
pub const CPU_TYPE_X86: cpu_type_t = 7;
pub const CPU_TYPE_I386: cpu_type_t = CPU_TYPE_X86;
pub const CPU_TYPE_X86_64: cpu_type_t = CPU_TYPE_X86 | CPU_ARCH_ABI64;
pub const CPU_TYPE_MIPS: cpu_type_t = 8;
pub const CPU_TYPE_MC98000: cpu_type_t = 10;
pub const CPU_TYPE_HPPA: cpu_type_t = 11;
pub const CPU_TYPE_ARM: cpu_type_t = 12;
pub const CPU_TYPE_ARM64: cpu_type_t = CPU_TYPE_ARM | CPU_ARCH_ABI64;
pub const CPU_TYPE_ARM64_32: cpu_type_t = CPU_TYPE_ARM | CPU_ARCH_ABI64_32;
pub const CPU_TYPE_MC88000: cpu_type_t = 13;
pub const CPU_TYPE_SPARC: cpu_type_t = 14;
pub const CPU_TYPE_I860: cpu_type_t = 15;
pub const CPU_TYPE_ALPHA: cpu_type_t = 16;
pub const CPU_TYPE_POWERPC: cpu_type_t = 18;
pub const CPU_TYPE_POWERPC64: cpu_type_t = CPU_TYPE_POWERPC | CPU_ARCH_ABI64;

/// mask for feature flags
pub const CPU_SUBTYPE_MASK: cpu_subtype_t = 0xff000000u64 as cpu_subtype_t;
/// 64 bit libraries
pub const CPU_SUBTYPE_LIB64: cpu_subtype_t = 0x80000000u64 as cpu_subtype_t;

pub const CPU_SUBTYPE_I386_ALL: cpu_subtype_t = 3;
pub const CPU_SUBTYPE_X86_64_ALL: cpu_subtype_t = 3;
pub const CPU_SUBTYPE_X86_64_H: cpu_subtype_t = 8;
pub const CPU_SUBTYPE_ARM_ALL: cpu_subtype_t = 0;
pub const CPU_SUBTYPE_ARM_V7: cpu_subtype_t = 9;
pub const CPU_SUBTYPE_ARM_V7S: cpu_subtype_t = 11;
pub const CPU_SUBTYPE_ARM64_ALL: cpu_subtype_t = 0;
pub const CPU_SUBTYPE_ARM64_V8: cpu_subtype_t = 1;
pub const CPU_SUBTYPE_ARM64E: cpu_subtype_t = 2;

pub fn get_cpu_subtype_type(subtype: cpu_subtype_t) -> cpu_subtype_t {
    subtype & !CPU_SUBTYPE_MASK
}

pub fn get_cpu_subtype_feature(subtype: cpu_subtype_t) -> cpu_subtype_t {
    ((subtype & CPU_SUBTYPE_MASK) as u32 >> 24) as cpu_subtype_t
}

/// The architecture name as `otool`/`lipo` print it.
pub fn get_arch_name(cputype: cpu_type_t, cpusubtype: cpu_subtype_t) -> &'static str {
    match (cputype, get_cpu_subtype_type(cpusubtype)) {
        (CPU_TYPE_I386, _) => "i386",
        (CPU_TYPE_X86_64, CPU_SUBTYPE_X86_64_H) => "x86_64h",
        (CPU_TYPE_X86_64, _) => "x86_64",
        (CPU_TYPE_ARM, CPU_SUBTYPE_ARM_V7) => "armv7",
        (CPU_TYPE_ARM, CPU_SUBTYPE_ARM_V7S) => "armv7s",
        (CPU_TYPE_ARM, _) => "arm",
        (CPU_TYPE_ARM64, CPU_SUBTYPE_ARM64E) => "arm64e",
        (CPU_TYPE_ARM64, _) => "arm64",
        (CPU_TYPE_ARM64_32, _) => "arm64_32",
        (CPU_TYPE_POWERPC, _) => "ppc",
        (CPU_TYPE_POWERPC64, _) => "ppc64",
        _ => "unknown",
    }
}

// Constant for the magic field of the mach_header (32-bit architectures)
//

/// the mach magic number
pub const MH_MAGIC: u32 = 0xfeedface;
/// NXSwapInt(MH_MAGIC)
pub const MH_CIGAM: u32 = 0xcefaedfe;

// Constant for the magic field of the mach_header_64 (64-bit architectures)
//

/// the 64-bit mach magic number
pub const MH_MAGIC_64: u32 = 0xfeedfacf;
/// NXSwapInt(MH_MAGIC_64)
pub const MH_CIGAM_64: u32 = 0xcffaedfe;

/// the fat magic number, always stored big endian
pub const FAT_MAGIC: u32 = 0xcafebabe;
/// NXSwapLong(FAT_MAGIC)
pub const FAT_CIGAM: u32 = 0xbebafeca;
/// the 64-bit fat magic number
pub const FAT_MAGIC_64: u32 = 0xcafebabf;

// Constants for the filetype field of the mach_header
//

/// relocatable object file
pub const MH_OBJECT: u32 = 0x1;
/// demand paged executable file
pub const MH_EXECUTE: u32 = 0x2;
/// fixed VM shared library file
pub const MH_FVMLIB: u32 = 0x3;
/// core file
pub const MH_CORE: u32 = 0x4;
/// preloaded executable file
pub const MH_PRELOAD: u32 = 0x5;
/// dynamically bound shared library
pub const MH_DYLIB: u32 = 0x6;
/// dynamic link editor
pub const MH_DYLINKER: u32 = 0x7;
/// dynamically bound bundle file
pub const MH_BUNDLE: u32 = 0x8;
/// shared library stub for static linking only, no section contents
pub const MH_DYLIB_STUB: u32 = 0x9;
/// companion file with only debug sections
pub const MH_DSYM: u32 = 0xa;
/// x86_64 kexts
pub const MH_KEXT_BUNDLE: u32 = 0xb;
/// set of mach-o's
pub const MH_FILESET: u32 = 0xc;

// Constants for the flags field of the mach_header
//

/// the object file has no undefined references
pub const MH_NOUNDEFS: u32 = 0x1;
/// the object file's undefined references are bound by the dynamic linker when loaded.
pub const MH_DYLDLINK: u32 = 0x4;
/// the image is using two-level name space bindings
pub const MH_TWOLEVEL: u32 = 0x80;
/// the final linked image contains external weak symbols
pub const MH_WEAK_DEFINES: u32 = 0x8000;
/// the final linked image uses weak symbols
pub const MH_BINDS_TO_WEAK: u32 = 0x10000;
/// the OS will load the main executable at a random address.
pub const MH_PIE: u32 = 0x200000;
/// Contains a section of type S_THREAD_LOCAL_VARIABLES
pub const MH_HAS_TLV_DESCRIPTORS: u32 = 0x800000;
/// The dylib is part of the dyld shared cache
pub const MH_DYLIB_IN_CACHE: u32 = 0x80000000;

// After MacOS X 10.1 when a new load command is added that is required to be
// understood by the dynamic linker for the image to execute properly the
// LC_REQ_DYLD bit will be or'ed into the load command constant.
//
pub const LC_REQ_DYLD: u32 = 0x80000000;

// Constants for the cmd field of all load commands, the type
//
pub const LC_SEGMENT: u32 = 0x1; /* segment of this file to be mapped */
pub const LC_SYMTAB: u32 = 0x2; /* link-edit stab symbol table info */
pub const LC_SYMSEG: u32 = 0x3; /* link-edit gdb symbol table info (obsolete) */
pub const LC_THREAD: u32 = 0x4; /* thread */
pub const LC_UNIXTHREAD: u32 = 0x5; /* unix thread (includes a stack) */
pub const LC_LOADFVMLIB: u32 = 0x6; /* load a specified fixed VM shared library */
pub const LC_IDFVMLIB: u32 = 0x7; /* fixed VM shared library identification */
pub const LC_IDENT: u32 = 0x8; /* object identification info (obsolete) */
pub const LC_FVMFILE: u32 = 0x9; /* fixed VM file inclusion (internal use) */
pub const LC_PREPAGE: u32 = 0xa; /* prepage command (internal use) */
pub const LC_DYSYMTAB: u32 = 0xb; /* dynamic link-edit symbol table info */
pub const LC_LOAD_DYLIB: u32 = 0xc; /* load a dynamically linked shared library */
pub const LC_ID_DYLIB: u32 = 0xd; /* dynamically linked shared lib ident */
pub const LC_LOAD_DYLINKER: u32 = 0xe; /* load a dynamic linker */
pub const LC_ID_DYLINKER: u32 = 0xf; /* dynamic linker identification */
pub const LC_PREBOUND_DYLIB: u32 = 0x10; /* modules prebound for a dynamically linked shared library */
pub const LC_ROUTINES: u32 = 0x11; /* image routines */
pub const LC_SUB_FRAMEWORK: u32 = 0x12; /* sub framework */
pub const LC_SUB_UMBRELLA: u32 = 0x13; /* sub umbrella */
pub const LC_SUB_CLIENT: u32 = 0x14; /* sub client */
pub const LC_SUB_LIBRARY: u32 = 0x15; /* sub library */
pub const LC_TWOLEVEL_HINTS: u32 = 0x16; /* two-level namespace lookup hints */
pub const LC_PREBIND_CKSUM: u32 = 0x17; /* prebind checksum */
pub const LC_LOAD_WEAK_DYLIB: u32 = 0x18 | LC_REQ_DYLD; /* load a dylib that is allowed to be missing */
pub const LC_SEGMENT_64: u32 = 0x19; /* 64-bit segment of this file to be mapped */
pub const LC_ROUTINES_64: u32 = 0x1a; /* 64-bit image routines */
pub const LC_UUID: u32 = 0x1b; /* the uuid */
pub const LC_RPATH: u32 = 0x1c | LC_REQ_DYLD; /* runpath additions */
pub const LC_CODE_SIGNATURE: u32 = 0x1d; /* local of code signature */
pub const LC_SEGMENT_SPLIT_INFO: u32 = 0x1e; /* local of info to split segments */
pub const LC_REEXPORT_DYLIB: u32 = 0x1f | LC_REQ_DYLD; /* load and re-export dylib */
pub const LC_LAZY_LOAD_DYLIB: u32 = 0x20; /* delay load of dylib until first use */
pub const LC_ENCRYPTION_INFO: u32 = 0x21; /* encrypted segment information */
pub const LC_DYLD_INFO: u32 = 0x22; /* compressed dyld information */
pub const LC_DYLD_INFO_ONLY: u32 = 0x22 | LC_REQ_DYLD; /* compressed dyld information only */
pub const LC_LOAD_UPWARD_DYLIB: u32 = 0x23 | LC_REQ_DYLD; /* load upward dylib */
pub const LC_VERSION_MIN_MACOSX: u32 = 0x24; /* build for MacOSX min OS version */
pub const LC_VERSION_MIN_IPHONEOS: u32 = 0x25; /* build for iPhoneOS min OS version */
pub const LC_FUNCTION_STARTS: u32 = 0x26; /* compressed table of function start addresses */
pub const LC_DYLD_ENVIRONMENT: u32 = 0x27; /* string for dyld to treat like environment variable */
pub const LC_MAIN: u32 = 0x28 | LC_REQ_DYLD; /* replacement for LC_UNIXTHREAD */
pub const LC_DATA_IN_CODE: u32 = 0x29; /* table of non-instructions in __text */
pub const LC_SOURCE_VERSION: u32 = 0x2A; /* source version used to build binary */
pub const LC_DYLIB_CODE_SIGN_DRS: u32 = 0x2B; /* Code signing DRs copied from linked dylibs */
pub const LC_ENCRYPTION_INFO_64: u32 = 0x2C; /* 64-bit encrypted segment information */
pub const LC_LINKER_OPTION: u32 = 0x2D; /* linker options in MH_OBJECT files */
pub const LC_LINKER_OPTIMIZATION_HINT: u32 = 0x2E; /* optimization hints in MH_OBJECT files */
pub const LC_VERSION_MIN_TVOS: u32 = 0x2F; /* build for AppleTV min OS version */
pub const LC_VERSION_MIN_WATCHOS: u32 = 0x30; /* build for Watch min OS version */
pub const LC_NOTE: u32 = 0x31; /* arbitrary data included within a Mach-O file */
pub const LC_BUILD_VERSION: u32 = 0x32; /* build for platform min OS version */
pub const LC_DYLD_EXPORTS_TRIE: u32 = 0x33 | LC_REQ_DYLD; /* used with linkedit_data_command, payload is trie */
pub const LC_DYLD_CHAINED_FIXUPS: u32 = 0x34 | LC_REQ_DYLD; /* used with linkedit_data_command */
pub const LC_FILESET_ENTRY: u32 = 0x35 | LC_REQ_DYLD; /* used with fileset_entry_command */

bitflags! {
    /// Constants for the flags field of the segment_command
    #[derive(Default)]
    pub struct SegmentFlags: u32 {
        /// the file contents for this segment is for the high part of the VM space,
        /// the low part is zero filled (for stacks in core files)
        const SG_HIGHVM = 0x1;
        /// this segment is the VM that is allocated by a fixed VM library,
        /// for overlap checking in the link editor
        const SG_FVMLIB = 0x2;
        /// this segment has nothing that was relocated in it and nothing relocated to it,
        /// that is it maybe safely replaced without relocation
        const SG_NORELOC = 0x4;
        /// This segment is protected.
        const SG_PROTECTED_VERSION_1 = 0x8;
        /// This segment is made read-only after fixups
        const SG_READ_ONLY = 0x10;
    }
}

bitflags! {
    /// VM protection of a segment
    #[derive(Default)]
    pub struct VmProtection: i32 {
        const VM_PROT_READ = 0x1;
        const VM_PROT_WRITE = 0x2;
        const VM_PROT_EXECUTE = 0x4;
    }
}

// The flags field of a section structure is separated into two parts a section
// type and section attributes.
//

/// 256 section types
pub const SECTION_TYPE: u32 = 0x000000ff;
/// 24 section attributes
pub const SECTION_ATTRIBUTES: u32 = 0xffffff00;

/// regular section
pub const S_REGULAR: u32 = 0x0;
/// zero fill on demand section
pub const S_ZEROFILL: u32 = 0x1;
/// section with only literal C strings
pub const S_CSTRING_LITERALS: u32 = 0x2;
/// section with only non-lazy symbol pointers
pub const S_NON_LAZY_SYMBOL_POINTERS: u32 = 0x6;
/// section with only lazy symbol pointers
pub const S_LAZY_SYMBOL_POINTERS: u32 = 0x7;
/// section with only symbol stubs, byte size of stub in the reserved2 field
pub const S_SYMBOL_STUBS: u32 = 0x8;
/// section with only function pointers for initialization
pub const S_MOD_INIT_FUNC_POINTERS: u32 = 0x9;
/// zero fill on demand section (that can be larger than 4 gigabytes)
pub const S_GB_ZEROFILL: u32 = 0xc;
/// lazy symbol pointers to lazy loaded dylibs
pub const S_LAZY_DYLIB_SYMBOL_POINTERS: u32 = 0x10;
/// template of initial values for TLVs
pub const S_THREAD_LOCAL_REGULAR: u32 = 0x11;
/// template of initial values for TLVs
pub const S_THREAD_LOCAL_ZEROFILL: u32 = 0x12;
/// TLV descriptors
pub const S_THREAD_LOCAL_VARIABLES: u32 = 0x13;

bitflags! {
    /// Constants for the section attributes part of the flags field of a section structure.
    pub struct SectionAttributes: u32 {
        /// section contains only true machine instructions
        const S_ATTR_PURE_INSTRUCTIONS = 0x80000000;
        /// section contains coalesced symbols that are not to be in a ranlib table of contents
        const S_ATTR_NO_TOC = 0x40000000;
        /// ok to strip static symbols in this section in files with the MH_DYLDLINK flag
        const S_ATTR_STRIP_STATIC_SYMS = 0x20000000;
        /// no dead stripping
        const S_ATTR_NO_DEAD_STRIP = 0x10000000;
        /// blocks are live if they reference live blocks
        const S_ATTR_LIVE_SUPPORT = 0x08000000;
        /// Used with i386 code stubs written on by dyld
        const S_ATTR_SELF_MODIFYING_CODE = 0x04000000;
        /// a debug section
        const S_ATTR_DEBUG = 0x02000000;
        /// section contains some machine instructions
        const S_ATTR_SOME_INSTRUCTIONS = 0x00000400;
        /// section has external relocation entries
        const S_ATTR_EXT_RELOC = 0x00000200;
        /// section has local relocation entries
        const S_ATTR_LOC_RELOC = 0x00000100;
    }
}

pub const SEG_PAGEZERO: &str = "__PAGEZERO";
pub const SEG_TEXT: &str = "__TEXT";
pub const SECT_TEXT: &str = "__text";
pub const SEG_DATA: &str = "__DATA";
pub const SEG_DATA_CONST: &str = "__DATA_CONST";
pub const SECT_DATA: &str = "__data";
pub const SECT_BSS: &str = "__bss";
pub const SECT_COMMON: &str = "__common";
pub const SEG_OBJC: &str = "__OBJC";
pub const SEG_LINKEDIT: &str = "__LINKEDIT";

// The n_type field really contains four fields:
//  unsigned char N_STAB:3,
//            N_PEXT:1,
//            N_TYPE:3,
//            N_EXT:1;
// which are used via the following masks.
//
pub const N_STAB: u8 = 0xe0; /* if any of these bits set, a symbolic debugging entry */
pub const N_PEXT: u8 = 0x10; /* private external symbol bit */
pub const N_TYPE: u8 = 0x0e; /* mask for the type bits */
pub const N_EXT: u8 = 0x01; /* external symbol bit, set for external symbols */

// Values for N_TYPE bits of the n_type field.
//
pub const N_UNDF: u8 = 0x0; /* undefined, n_sect == NO_SECT */
pub const N_ABS: u8 = 0x2; /* absolute, n_sect == NO_SECT */
pub const N_SECT: u8 = 0xe; /* defined in section number n_sect */
pub const N_PBUD: u8 = 0xc; /* prebound undefined (defined in a dylib) */
pub const N_INDR: u8 = 0xa; /* indirect */

/// symbol is not in any section
pub const NO_SECT: u8 = 0;

// The following are used to encode rebasing information
//
pub const REBASE_TYPE_POINTER: u8 = 1;
pub const REBASE_TYPE_TEXT_ABSOLUTE32: u8 = 2;
pub const REBASE_TYPE_TEXT_PCREL32: u8 = 3;

pub const REBASE_OPCODE_MASK: u8 = 0xF0;
pub const REBASE_IMMEDIATE_MASK: u8 = 0x0F;
pub const REBASE_OPCODE_DONE: u8 = 0x00;
pub const REBASE_OPCODE_SET_TYPE_IMM: u8 = 0x10;
pub const REBASE_OPCODE_SET_SEGMENT_AND_OFFSET_ULEB: u8 = 0x20;
pub const REBASE_OPCODE_ADD_ADDR_ULEB: u8 = 0x30;
pub const REBASE_OPCODE_ADD_ADDR_IMM_SCALED: u8 = 0x40;
pub const REBASE_OPCODE_DO_REBASE_IMM_TIMES: u8 = 0x50;
pub const REBASE_OPCODE_DO_REBASE_ULEB_TIMES: u8 = 0x60;
pub const REBASE_OPCODE_DO_REBASE_ADD_ADDR_ULEB: u8 = 0x70;
pub const REBASE_OPCODE_DO_REBASE_ULEB_TIMES_SKIPPING_ULEB: u8 = 0x80;

// The following are used to encode binding information
//
pub const BIND_TYPE_POINTER: u8 = 1;
pub const BIND_TYPE_TEXT_ABSOLUTE32: u8 = 2;
pub const BIND_TYPE_TEXT_PCREL32: u8 = 3;

pub const BIND_SPECIAL_DYLIB_SELF: i64 = 0;
pub const BIND_SPECIAL_DYLIB_MAIN_EXECUTABLE: i64 = -1;
pub const BIND_SPECIAL_DYLIB_FLAT_LOOKUP: i64 = -2;
pub const BIND_SPECIAL_DYLIB_WEAK_LOOKUP: i64 = -3;

pub const BIND_SYMBOL_FLAGS_WEAK_IMPORT: u8 = 0x1;
pub const BIND_SYMBOL_FLAGS_NON_WEAK_DEFINITION: u8 = 0x8;

pub const BIND_OPCODE_MASK: u8 = 0xF0;
pub const BIND_IMMEDIATE_MASK: u8 = 0x0F;
pub const BIND_OPCODE_DONE: u8 = 0x00;
pub const BIND_OPCODE_SET_DYLIB_ORDINAL_IMM: u8 = 0x10;
pub const BIND_OPCODE_SET_DYLIB_ORDINAL_ULEB: u8 = 0x20;
pub const BIND_OPCODE_SET_DYLIB_SPECIAL_IMM: u8 = 0x30;
pub const BIND_OPCODE_SET_SYMBOL_TRAILING_FLAGS_IMM: u8 = 0x40;
pub const BIND_OPCODE_SET_TYPE_IMM: u8 = 0x50;
pub const BIND_OPCODE_SET_ADDEND_SLEB: u8 = 0x60;
pub const BIND_OPCODE_SET_SEGMENT_AND_OFFSET_ULEB: u8 = 0x70;
pub const BIND_OPCODE_ADD_ADDR_ULEB: u8 = 0x80;
pub const BIND_OPCODE_DO_BIND: u8 = 0x90;
pub const BIND_OPCODE_DO_BIND_ADD_ADDR_ULEB: u8 = 0xA0;
pub const BIND_OPCODE_DO_BIND_ADD_ADDR_IMM_SCALED: u8 = 0xB0;
pub const BIND_OPCODE_DO_BIND_ULEB_TIMES_SKIPPING_ULEB: u8 = 0xC0;
pub const BIND_OPCODE_THREADED: u8 = 0xD0;

pub const BIND_SUBOPCODE_THREADED_SET_BIND_ORDINAL_TABLE_SIZE_ULEB: u8 = 0x00;
pub const BIND_SUBOPCODE_THREADED_APPLY: u8 = 0x01;

// The following are used on the flags byte of a terminal node
// in the export information.
//
pub const EXPORT_SYMBOL_FLAGS_KIND_MASK: u8 = 0x03;
pub const EXPORT_SYMBOL_FLAGS_KIND_REGULAR: u8 = 0x00;
pub const EXPORT_SYMBOL_FLAGS_KIND_THREAD_LOCAL: u8 = 0x01;
pub const EXPORT_SYMBOL_FLAGS_KIND_ABSOLUTE: u8 = 0x02;

bitflags! {
    pub struct ExportSymbolFlags: u32 {
        const EXPORT_SYMBOL_FLAGS_WEAK_DEFINITION = 0x04;
        const EXPORT_SYMBOL_FLAGS_REEXPORT = 0x08;
        const EXPORT_SYMBOL_FLAGS_STUB_AND_RESOLVER = 0x10;
        const EXPORT_SYMBOL_FLAGS_STATIC_RESOLVER = 0x20;
    }
}

// values for dyld_chained_fixups_header.imports_format
//
pub const DYLD_CHAINED_IMPORT: u32 = 1;
pub const DYLD_CHAINED_IMPORT_ADDEND: u32 = 2;
pub const DYLD_CHAINED_IMPORT_ADDEND64: u32 = 3;

// values for dyld_chained_starts_in_segment.pointer_format
//
pub const DYLD_CHAINED_PTR_ARM64E: u16 = 1; /* stride 8, unauth target is vmaddr */
pub const DYLD_CHAINED_PTR_64: u16 = 2; /* target is vmaddr */
pub const DYLD_CHAINED_PTR_32: u16 = 3;
pub const DYLD_CHAINED_PTR_32_CACHE: u16 = 4;
pub const DYLD_CHAINED_PTR_32_FIRMWARE: u16 = 5;
pub const DYLD_CHAINED_PTR_64_OFFSET: u16 = 6; /* target is vm offset */
pub const DYLD_CHAINED_PTR_ARM64E_KERNEL: u16 = 7; /* stride 4, unauth target is vm offset */
pub const DYLD_CHAINED_PTR_64_KERNEL_CACHE: u16 = 8;
pub const DYLD_CHAINED_PTR_ARM64E_USERLAND: u16 = 9; /* stride 8, unauth target is vm offset */
pub const DYLD_CHAINED_PTR_ARM64E_FIRMWARE: u16 = 10; /* stride 4, unauth target is vmaddr */
pub const DYLD_CHAINED_PTR_X86_64_KERNEL_CACHE: u16 = 11; /* stride 1, x86_64 kernel caches */
pub const DYLD_CHAINED_PTR_ARM64E_USERLAND24: u16 = 12; /* stride 8, unauth target is vm offset, 24-bit bind */

/// used in page_start[] to denote a page with no fixups
pub const DYLD_CHAINED_PTR_START_NONE: u16 = 0xFFFF;
/// used in page_start[] to denote a page which has multiple starts
pub const DYLD_CHAINED_PTR_START_MULTI: u16 = 0x8000;
/// used in chain_starts[] to denote last start in list for page
pub const DYLD_CHAINED_PTR_START_LAST: u16 = 0x8000;

// Known values for the platform field of LC_BUILD_VERSION.
//
pub const PLATFORM_MACOS: u32 = 1;
pub const PLATFORM_IOS: u32 = 2;
pub const PLATFORM_TVOS: u32 = 3;
pub const PLATFORM_WATCHOS: u32 = 4;
pub const PLATFORM_BRIDGEOS: u32 = 5;
pub const PLATFORM_MACCATALYST: u32 = 6;
pub const PLATFORM_IOSSIMULATOR: u32 = 7;
pub const PLATFORM_TVOSSIMULATOR: u32 = 8;
pub const PLATFORM_WATCHOSSIMULATOR: u32 = 9;
pub const PLATFORM_DRIVERKIT: u32 = 10;

// Thread state flavors
//
pub const x86_THREAD_STATE32: u32 = 1;
pub const x86_THREAD_STATE64: u32 = 4;
pub const ARM_THREAD_STATE: u32 = 1;
pub const ARM_THREAD_STATE64: u32 = 6;
