use std::fmt;

use time::macros::format_description;
use time::OffsetDateTime;

use crate::commands::{platform_name, DyLib, LcString, LoadCommand};
use crate::consts::*;
use crate::export::{ExportSymbol, ExportType};
use crate::loader::{FatHeader, MachCommand, MachHeader};
use crate::opcode::{BindRecord, BindSymbolFlags, RebaseRecord};
use crate::symbol::{Symbol, SymbolKind};

impl fmt::Display for MachHeader {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        writeln!(f, "Mach header")?;
        writeln!(
            f,
            "      magic cputype cpusubtype  caps    filetype ncmds sizeofcmds      flags"
        )?;
        writeln!(
            f,
            " 0x{:08x} {:7} {:10}  0x{:02x}  {:10} {:5} {:10} 0x{:08x}",
            self.magic,
            self.cputype,
            get_cpu_subtype_type(self.cpusubtype),
            get_cpu_subtype_feature(self.cpusubtype),
            self.filetype,
            self.ncmds,
            self.sizeofcmds,
            self.flags
        )
    }
}

impl fmt::Display for FatHeader {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        writeln!(f, "Fat headers")?;
        writeln!(f, "fat_magic 0x{:08x}", self.magic)?;
        writeln!(f, "nfat_arch {}", self.archs.len())?;

        for (i, arch) in self.archs.iter().enumerate() {
            writeln!(f, "architecture {} ({})", i, arch.arch_name())?;
            writeln!(f, "    cputype {}", arch.cputype)?;
            writeln!(f, "    cpusubtype {}", get_cpu_subtype_type(arch.cpusubtype))?;
            writeln!(f, "    capabilities 0x{:x}", get_cpu_subtype_feature(arch.cpusubtype))?;
            writeln!(f, "    offset {}", arch.offset)?;
            writeln!(f, "    size {}", arch.size)?;
            writeln!(f, "    align 2^{} ({})", arch.align, 1u64.checked_shl(arch.align).unwrap_or(0))?;
        }

        Ok(())
    }
}

/// Render a dylib time stamp the way `otool -l` does.
fn format_timestamp(timestamp: u32) -> Result<String, fmt::Error> {
    let format = format_description!(
        "[weekday repr:short] [month repr:short] [day padding:space] [hour]:[minute]:[second] [year] UTC"
    );

    OffsetDateTime::from_unix_timestamp(i64::from(timestamp))
        .map_err(|_| fmt::Error)?
        .format(&format)
        .map_err(|_| fmt::Error)
}

impl MachCommand {
    fn print_segment_command(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let MachCommand(ref cmd, cmdsize) = *self;

        if let LoadCommand::Segment {
            ref segname,
            vmaddr,
            vmsize,
            fileoff,
            filesize,
            maxprot,
            initprot,
            flags,
            ref sections,
        }
        | LoadCommand::Segment64 {
            ref segname,
            vmaddr,
            vmsize,
            fileoff,
            filesize,
            maxprot,
            initprot,
            flags,
            ref sections,
        } = *cmd
        {
            let width = if cmd.cmd() == LC_SEGMENT_64 { 16 } else { 8 };

            writeln!(f, "      cmd {}", cmd.name())?;
            writeln!(f, "  cmdsize {}", cmdsize)?;
            writeln!(f, "  segname {}", segname)?;
            writeln!(f, "   vmaddr 0x{:0width$x}", vmaddr, width = width)?;
            writeln!(f, "   vmsize 0x{:0width$x}", vmsize, width = width)?;
            writeln!(f, "  fileoff {}", fileoff)?;
            writeln!(f, " filesize {}", filesize)?;
            writeln!(f, "  maxprot 0x{:08x}", maxprot)?;
            writeln!(f, " initprot 0x{:08x}", initprot)?;
            writeln!(f, "   nsects {}", sections.len())?;
            writeln!(f, "    flags 0x{:x}", flags.bits())?;

            for section in sections {
                writeln!(f, "Section")?;
                writeln!(f, "  sectname {}", section.sectname)?;
                writeln!(
                    f,
                    "   segname {}{}",
                    section.segname,
                    if *segname != section.segname {
                        " (does not match segment)"
                    } else {
                        ""
                    }
                )?;
                writeln!(f, "      addr 0x{:0width$x}", section.addr, width = width)?;
                writeln!(f, "      size 0x{:0width$x}", section.size, width = width)?;
                writeln!(f, "    offset {}", section.offset)?;
                writeln!(
                    f,
                    "     align 2^{} ({})",
                    section.align,
                    1u64.checked_shl(section.align).unwrap_or(0)
                )?;
                writeln!(f, "    reloff {}", section.reloff)?;
                writeln!(f, "    nreloc {}", section.nreloc)?;
                writeln!(f, "     flags 0x{:08x}", u32::from(section.flags))?;
                writeln!(
                    f,
                    " reserved1 {}{}",
                    section.reserved1,
                    match section.flags.sect_type() {
                        S_SYMBOL_STUBS
                        | S_LAZY_SYMBOL_POINTERS
                        | S_LAZY_DYLIB_SYMBOL_POINTERS
                        | S_NON_LAZY_SYMBOL_POINTERS => " (index into indirect symbol table)",
                        _ => "",
                    }
                )?;
                writeln!(
                    f,
                    " reserved2 {}{}",
                    section.reserved2,
                    if section.flags.sect_type() == S_SYMBOL_STUBS {
                        " (size of stubs)"
                    } else {
                        ""
                    }
                )?;
            }
        }

        Ok(())
    }

    fn print_dyld_info_command(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let MachCommand(ref cmd, cmdsize) = *self;

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
        } = *cmd
        {
            writeln!(f, "            cmd {}", cmd.name())?;
            writeln!(f, "        cmdsize {}", cmdsize)?;
            writeln!(f, "     rebase_off 0x{:08x}", rebase_off)?;
            writeln!(f, "    rebase_size {}", rebase_size)?;
            writeln!(f, "       bind_off 0x{:08x}", bind_off)?;
            writeln!(f, "      bind_size {}", bind_size)?;
            writeln!(f, "  weak_bind_off 0x{:08x}", weak_bind_off)?;
            writeln!(f, " weak_bind_size {}", weak_bind_size)?;
            writeln!(f, "  lazy_bind_off 0x{:08x}", lazy_bind_off)?;
            writeln!(f, " lazy_bind_size {}", lazy_bind_size)?;
            writeln!(f, "     export_off 0x{:08x}", export_off)?;
            writeln!(f, "    export_size {}", export_size)?;
        }

        Ok(())
    }

    fn print_symtab_command(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let MachCommand(ref cmd, cmdsize) = *self;

        if let LoadCommand::SymTab {
            symoff,
            nsyms,
            stroff,
            strsize,
        } = *cmd
        {
            writeln!(f, "     cmd {}", cmd.name())?;
            writeln!(f, " cmdsize {}", cmdsize)?;
            writeln!(f, "  symoff {}", symoff)?;
            writeln!(f, "   nsyms {}", nsyms)?;
            writeln!(f, "  stroff {}", stroff)?;
            writeln!(f, " strsize {}", strsize)?;
        }

        Ok(())
    }

    fn print_dysymtab_command(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let MachCommand(ref cmd, cmdsize) = *self;

        if let LoadCommand::DySymTab {
            ilocalsym,
            nlocalsym,
            iextdefsym,
            nextdefsym,
            iundefsym,
            nundefsym,
            tocoff,
            ntoc,
            modtaboff,
            nmodtab,
            extrefsymoff,
            nextrefsyms,
            indirectsymoff,
            nindirectsyms,
            extreloff,
            nextrel,
            locreloff,
            nlocrel,
        } = *cmd
        {
            writeln!(f, "            cmd {}", cmd.name())?;
            writeln!(f, "        cmdsize {}", cmdsize)?;

            for &(name, value) in &[
                ("ilocalsym", ilocalsym),
                ("nlocalsym", nlocalsym),
                ("iextdefsym", iextdefsym),
                ("nextdefsym", nextdefsym),
                ("iundefsym", iundefsym),
                ("nundefsym", nundefsym),
                ("tocoff", tocoff),
                ("ntoc", ntoc),
                ("modtaboff", modtaboff),
                ("nmodtab", nmodtab),
                ("extrefsymoff", extrefsymoff),
                ("nextrefsyms", nextrefsyms),
                ("indirectsymoff", indirectsymoff),
                ("nindirectsyms", nindirectsyms),
                ("extreloff", extreloff),
                ("nextrel", nextrel),
                ("locreloff", locreloff),
                ("nlocrel", nlocrel),
            ] {
                writeln!(f, "{:>15} {}", name, value)?;
            }
        }

        Ok(())
    }

    fn print_string_command(&self, f: &mut fmt::Formatter, label: &str, s: &LcString) -> fmt::Result {
        let MachCommand(ref cmd, cmdsize) = *self;

        writeln!(f, "          cmd {}", cmd.name())?;
        writeln!(f, "      cmdsize {}", cmdsize)?;
        writeln!(f, "{:>13} {} (offset {})", label, s, s.offset())?;

        if cmd.cmd() == LC_RPATH && s.is_empty() {
            writeln!(f, "         (empty path)")?;
        }

        Ok(())
    }

    fn print_dylib_command(&self, f: &mut fmt::Formatter, dylib: &DyLib) -> fmt::Result {
        let MachCommand(ref cmd, cmdsize) = *self;

        writeln!(f, "          cmd {}", cmd.name())?;
        writeln!(f, "      cmdsize {}", cmdsize)?;
        writeln!(f, "         name {} (offset {})", dylib.name, dylib.name.offset())?;
        writeln!(f, "   time stamp {} {}", dylib.timestamp, format_timestamp(dylib.timestamp)?)?;
        writeln!(f, "      current version {}", dylib.current_version)?;
        writeln!(f, "compatibility version {}", dylib.compatibility_version)
    }

    fn print_linkedit_data_command(&self, f: &mut fmt::Formatter, off: u32, size: u32) -> fmt::Result {
        writeln!(f, "      cmd {}", self.0.name())?;
        writeln!(f, "  cmdsize {}", self.1)?;
        writeln!(f, "  dataoff {}", off)?;
        writeln!(f, " datasize {}", size)
    }
}

impl fmt::Display for MachCommand {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let MachCommand(ref cmd, cmdsize) = *self;

        match *cmd {
            LoadCommand::Segment { .. } | LoadCommand::Segment64 { .. } => self.print_segment_command(f),
            LoadCommand::DyldInfo { .. } => self.print_dyld_info_command(f),
            LoadCommand::SymTab { .. } => self.print_symtab_command(f),
            LoadCommand::DySymTab { .. } => self.print_dysymtab_command(f),
            LoadCommand::IdDyLinker(ref name) | LoadCommand::LoadDyLinker(ref name) | LoadCommand::DyLdEnv(ref name) => {
                self.print_string_command(f, "name", name)
            }
            LoadCommand::Rpath(ref path) => self.print_string_command(f, "path", path),
            LoadCommand::SubClient(ref name) => self.print_string_command(f, "client", name),
            LoadCommand::SubFramework(ref name) => self.print_string_command(f, "umbrella", name),
            LoadCommand::SubUmbrella(ref name) => self.print_string_command(f, "sub_umbrella", name),
            LoadCommand::SubLibrary(ref name) => self.print_string_command(f, "sub_library", name),
            LoadCommand::IdDyLib(ref dylib)
            | LoadCommand::LoadDyLib(ref dylib)
            | LoadCommand::LoadWeakDyLib(ref dylib)
            | LoadCommand::ReexportDyLib(ref dylib)
            | LoadCommand::LoadUpwardDylib(ref dylib)
            | LoadCommand::LazyLoadDylib(ref dylib) => self.print_dylib_command(f, dylib),
            LoadCommand::VersionMin { version, sdk, .. } => {
                writeln!(f, "      cmd {}", cmd.name())?;
                writeln!(f, "  cmdsize {}", cmdsize)?;
                writeln!(f, "  version {}", version)?;
                writeln!(f, "      sdk {}", sdk)
            }
            LoadCommand::BuildVersion {
                platform,
                minos,
                sdk,
                ref tools,
            } => {
                writeln!(f, "      cmd {}", cmd.name())?;
                writeln!(f, "  cmdsize {}", cmdsize)?;
                writeln!(f, " platform {}", platform_name(platform))?;
                writeln!(f, "    minos {}", minos)?;
                writeln!(f, "      sdk {}", sdk)?;
                writeln!(f, "   ntools {}", tools.len())?;

                for tool in tools {
                    writeln!(f, "     tool {}", tool.tool)?;
                    writeln!(f, "  version {}", tool.version)?;
                }

                Ok(())
            }
            LoadCommand::SourceVersion(version) => {
                writeln!(f, "      cmd {}", cmd.name())?;
                writeln!(f, "  cmdsize {}", cmdsize)?;
                writeln!(f, "  version {}", version)
            }
            LoadCommand::Uuid(ref uuid) => {
                writeln!(f, "     cmd {}", cmd.name())?;
                writeln!(f, " cmdsize {}", cmdsize)?;
                writeln!(f, "    uuid {}", uuid.hyphenated().to_string().to_uppercase())
            }
            LoadCommand::EntryPoint { entryoff, stacksize } => {
                writeln!(f, "       cmd {}", cmd.name())?;
                writeln!(f, "   cmdsize {}", cmdsize)?;
                writeln!(f, "  entryoff {}", entryoff)?;
                writeln!(f, " stacksize {}", stacksize)
            }
            LoadCommand::UnixThread {
                flavor,
                count,
                ref state,
            }
            | LoadCommand::Thread {
                flavor,
                count,
                ref state,
            } => {
                writeln!(f, "        cmd {}", cmd.name())?;
                writeln!(f, "    cmdsize {}", cmdsize)?;
                writeln!(f, "     flavor {}", flavor)?;
                writeln!(f, "      count {}", count)?;

                match state.pc() {
                    Some(pc) => writeln!(f, "         pc 0x{:x}", pc),
                    None => Ok(()),
                }
            }
            LoadCommand::EncryptionInfo {
                cryptoff,
                cryptsize,
                cryptid,
            }
            | LoadCommand::EncryptionInfo64 {
                cryptoff,
                cryptsize,
                cryptid,
            } => {
                writeln!(f, "          cmd {}", cmd.name())?;
                writeln!(f, "      cmdsize {}", cmdsize)?;
                writeln!(f, "     cryptoff {}", cryptoff)?;
                writeln!(f, "    cryptsize {}", cryptsize)?;
                writeln!(f, "      cryptid {}", cryptid)
            }
            LoadCommand::CodeSignature(data)
            | LoadCommand::SegmentSplitInfo(data)
            | LoadCommand::FunctionStarts(data)
            | LoadCommand::DataInCode(data)
            | LoadCommand::DylibCodeSignDrs(data)
            | LoadCommand::LinkerOptimizationHint(data)
            | LoadCommand::DyldExportsTrie(data)
            | LoadCommand::DyldChainedFixups(data) => self.print_linkedit_data_command(f, data.off, data.size),
            LoadCommand::Command { cmd: id, ref payload } => {
                writeln!(f, "      cmd {} (0x{:x})", cmd.name(), id)?;
                writeln!(f, "  cmdsize {}", cmdsize)?;
                writeln!(f, "  payload {} bytes", payload.len())
            }
        }
    }
}

impl fmt::Display for Symbol {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        if self.is_import() {
            return write!(f, "                 U {}", self.name);
        }

        let symtype = match self.kind {
            SymbolKind::Function => 't',
            SymbolKind::Class | SymbolKind::Metaclass | SymbolKind::Ivar => 'd',
            SymbolKind::Unknown => 's',
        };

        write!(
            f,
            "{:016x} {} {}",
            self.address,
            if self.external {
                symtype.to_ascii_uppercase()
            } else {
                symtype
            },
            self.name
        )
    }
}

impl fmt::Display for BindRecord {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "#{:<2} 0x{:016x} {} {} {} {} {}{}",
            self.segment_index,
            self.address,
            self.kind,
            self.bind_type,
            self.addend,
            self.library,
            self.symbol,
            if self.flags.contains(BindSymbolFlags::WEAK_IMPORT) {
                " (weak import)"
            } else {
                ""
            }
        )
    }
}

impl fmt::Display for RebaseRecord {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "#{:<2} 0x{:016x} {}",
            self.segment_index, self.address, self.rebase_type
        )
    }
}

impl fmt::Display for ExportSymbol {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self.symbol {
            ExportType::Regular { address } => write!(f, "0x{:08x} {}", address, self.name),
            ExportType::Weak { address } => write!(f, "0x{:08x} {} [weak_def]", address, self.name),
            ExportType::Stub { offset, resolver } => write!(
                f,
                "0x{:08x} {} [resolver=0x{:08x}]",
                offset, self.name, resolver
            ),
            ExportType::Reexport { ordinal, ref name } => write!(
                f,
                "[re-export] {} ({} from ordinal {})",
                self.name,
                if name.is_empty() { &self.name } else { name },
                ordinal
            ),
        }
    }
}

#[cfg(test)]
pub mod tests {
    use std::io::Write;
    use std::str;

    use crate::commands::{SectionFlags, VersionTag};
    use crate::opcode::{BindKind, SymbolType};
    use crate::symbol::SymbolSource;

    use super::*;

    macro_rules! assert_nodiff {
        ($left:expr, $right:expr) => {{
            let mut w = Vec::new();
            let mut diffs = 0;
            let left = $left.replace("\r\n", "\n");
            let right = $right.replace("\r\n", "\n");

            for diff in diff::lines(&left, &right) {
                match diff {
                    diff::Result::Left(l) => {
                        diffs += 1;
                        writeln!(w, "-{}", l).unwrap()
                    }
                    diff::Result::Both(_, _) => {}
                    diff::Result::Right(r) => {
                        diffs += 1;
                        writeln!(w, "+{}", r).unwrap()
                    }
                }
            }

            if diffs > 0 {
                info!("found {} diffs:\n{}", diffs, String::from_utf8(w).unwrap());
            }

            assert_eq!(&left, &right);
        }};
    }

    #[test]
    fn test_display_segment() {
        let _ = pretty_env_logger::try_init();

        let cmd = MachCommand(
            LoadCommand::Segment64 {
                segname: SEG_TEXT.to_owned(),
                vmaddr: 0x100000000,
                vmsize: 0x4000,
                fileoff: 0,
                filesize: 16384,
                maxprot: 5,
                initprot: 5,
                flags: SegmentFlags::empty(),
                sections: vec![crate::commands::Section {
                    sectname: SECT_TEXT.to_owned(),
                    segname: SEG_TEXT.to_owned(),
                    addr: 0x100000f00,
                    size: 0x40,
                    offset: 3840,
                    align: 4,
                    reloff: 0,
                    nreloc: 0,
                    flags: SectionFlags(0x8000_0400),
                    reserved1: 0,
                    reserved2: 0,
                    reserved3: 0,
                }],
            },
            152,
        );

        let expected = "      cmd LC_SEGMENT_64
  cmdsize 152
  segname __TEXT
   vmaddr 0x0000000100000000
   vmsize 0x0000000000004000
  fileoff 0
 filesize 16384
  maxprot 0x00000005
 initprot 0x00000005
   nsects 1
    flags 0x0
Section
  sectname __text
   segname __TEXT
      addr 0x0000000100000f00
      size 0x0000000000000040
    offset 3840
     align 2^4 (16)
    reloff 0
    nreloc 0
     flags 0x80000400
 reserved1 0
 reserved2 0
";

        assert_nodiff!(cmd.to_string(), expected);
    }

    #[test]
    fn test_display_dylib() {
        let cmd = MachCommand(
            LoadCommand::LoadDyLib(DyLib {
                name: LcString(24, "/usr/lib/libSystem.B.dylib".to_owned()),
                timestamp: 2,
                current_version: VersionTag(0x04fc_0101),
                compatibility_version: VersionTag(0x10000),
            }),
            56,
        );

        let expected = "          cmd LC_LOAD_DYLIB
      cmdsize 56
         name /usr/lib/libSystem.B.dylib (offset 24)
   time stamp 2 Thu Jan  1 00:00:02 1970 UTC
      current version 1276.1.1
compatibility version 1.0
";

        assert_nodiff!(cmd.to_string(), expected);
    }

    #[test]
    fn test_display_records() {
        let symbol = Symbol::new("_main".to_owned(), 0x100000f00, true, SymbolSource::SymTab, true);
        let import = Symbol::import("_puts".to_owned(), 1, SymbolSource::Bind);

        assert_eq!(symbol.to_string(), "0000000100000f00 T _main");
        assert_eq!(import.to_string(), "                 U _puts");

        let bind = BindRecord {
            kind: BindKind::Bind,
            segment_index: 2,
            segment_offset: 0x10,
            address: 0x100004010,
            ordinal: 1,
            library: "/usr/lib/libSystem.B.dylib".to_owned(),
            symbol: "_puts".to_owned(),
            flags: BindSymbolFlags::empty(),
            bind_type: SymbolType::Pointer,
            addend: 0,
        };

        let mut w = Vec::new();

        write!(w, "{}", bind).unwrap();

        let line = str::from_utf8(&w).unwrap();

        assert!(line.starts_with("#2  0x0000000100004010 bind"));
        assert!(line.ends_with("/usr/lib/libSystem.B.dylib _puts"));
    }
}
