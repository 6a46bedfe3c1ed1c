//! The link-edit view of one slice.
//!
//! `Image::load` runs the last step of the loader: every decoded load command
//! is dispatched in order to fill in the segments, linked images and the
//! link-edit table locations, the address space is built from the segments,
//! and then the symbol table, the dyld info opcode streams, the export trie
//! and the chained fixups are interpreted.
use std::collections::HashSet;
use std::fmt;
use std::path::Path;

use uuid::Uuid;

use crate::commands::{BuildTool, DyLib, LinkEditData, LoadCommand, Section, SourceVersionTag, VersionTag};
use crate::consts::*;
use crate::errors::{Diagnostic, Error, Result};
use crate::export::{ExportKind, ExportSymbol, ExportTrie};
use crate::fixups::{ChainedFixups, ChainedImport, ChainedRebase, FixupTarget};
use crate::layout::{Layouts, Record};
use crate::loader::{ImageHeader, LoadState, MachCommand, MachFile, MachHeader, Slice};
use crate::opcode::{interpret_binds, interpret_rebases, BindKind, BindRecord, RebaseRecord};
use crate::symbol::{NlistType, Symbol, SymbolSource, SymbolTable};
use crate::vm::{probe_page_size, AddressSpace, Detag, VirtualMemory};

pub const DEFAULT_MAX_CHAIN_STEPS: usize = 0x10000;
pub const DEFAULT_PAGE_CACHE_PAGES: usize = 256;

/// Knobs of the loader.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LoadOptions {
    /// how tag bits are stripped from addresses before translation
    pub detag: Detag,
    /// the longest fixup chain walked in one page
    pub max_chain_steps: usize,
    /// pages kept by the paged file source
    pub page_cache_pages: usize,
    pub parse_symbols: bool,
    pub parse_dyld_info: bool,
    pub parse_exports: bool,
    pub parse_chained_fixups: bool,
}

impl Default for LoadOptions {
    fn default() -> Self {
        LoadOptions {
            detag: Detag::None,
            max_chain_steps: DEFAULT_MAX_CHAIN_STEPS,
            page_cache_pages: DEFAULT_PAGE_CACHE_PAGES,
            parse_symbols: true,
            parse_dyld_info: true,
            parse_exports: true,
            parse_chained_fixups: true,
        }
    }
}

impl LoadOptions {
    pub fn detag(mut self, detag: Detag) -> Self {
        self.detag = detag;
        self
    }

    pub fn max_chain_steps(mut self, steps: usize) -> Self {
        self.max_chain_steps = steps;
        self
    }

    pub fn page_cache_pages(mut self, pages: usize) -> Self {
        self.page_cache_pages = pages;
        self
    }

    pub fn parse_symbols(mut self, enabled: bool) -> Self {
        self.parse_symbols = enabled;
        self
    }

    pub fn parse_dyld_info(mut self, enabled: bool) -> Self {
        self.parse_dyld_info = enabled;
        self
    }

    pub fn parse_exports(mut self, enabled: bool) -> Self {
        self.parse_exports = enabled;
        self
    }

    pub fn parse_chained_fixups(mut self, enabled: bool) -> Self {
        self.parse_chained_fixups = enabled;
        self
    }
}

/// A segment of the image with its sections.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Segment {
    pub name: String,
    pub vmaddr: u64,
    pub vmsize: u64,
    pub fileoff: u64,
    pub filesize: u64,
    pub maxprot: VmProtection,
    pub initprot: VmProtection,
    pub flags: SegmentFlags,
    pub sections: Vec<Section>,
}

impl Segment {
    fn from_command(cmd: &LoadCommand) -> Option<Segment> {
        match *cmd {
            LoadCommand::Segment {
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
            } => Some(Segment {
                name: segname.clone(),
                vmaddr,
                vmsize,
                fileoff,
                filesize,
                maxprot: VmProtection::from_bits_truncate(maxprot),
                initprot: VmProtection::from_bits_truncate(initprot),
                flags,
                sections: sections.clone(),
            }),
            _ => None,
        }
    }

    pub fn contains(&self, addr: u64) -> bool {
        self.vmaddr <= addr && addr - self.vmaddr < self.vmsize
    }

    /// The file backed part of the segment.
    pub fn mapped_size(&self) -> u64 {
        self.filesize.min(self.vmsize)
    }
}

/// A library this image links against, or the image itself.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct LinkedImage {
    /// install name
    pub name: String,
    pub weak: bool,
    /// the identity of this image, from `LC_ID_DYLIB`
    pub local: bool,
    pub upward: bool,
    pub reexport: bool,
    pub lazy: bool,
    pub timestamp: u32,
    pub current_version: VersionTag,
    pub compatibility_version: VersionTag,
}

impl LinkedImage {
    fn new(dylib: &DyLib) -> Self {
        LinkedImage {
            name: dylib.name.to_string(),
            timestamp: dylib.timestamp,
            current_version: dylib.current_version,
            compatibility_version: dylib.compatibility_version,
            ..Default::default()
        }
    }
}

/// The platform and versions the image was built for.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct BuildInfo {
    pub platform: u32,
    pub minos: VersionTag,
    pub sdk: VersionTag,
    pub tools: Vec<BuildTool>,
}

/// The symbol table partitions of `LC_DYSYMTAB` and the indirect symbol table.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct DynamicSymbolTable {
    pub ilocalsym: u32,
    pub nlocalsym: u32,
    pub iextdefsym: u32,
    pub nextdefsym: u32,
    pub iundefsym: u32,
    pub nundefsym: u32,
    /// symbol table indices of the lazy and non-lazy pointers and stubs
    pub indirect_symbols: Vec<u32>,
}

/// Which space an offset given to the read surface lives in.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Addr {
    /// offset from the start of the slice
    File,
    /// virtual address
    Vm,
}

/// A virtual address resolved to a file offset, or left as is.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Resolved {
    Offset(u64),
    Unresolved(u64),
}

impl Resolved {
    pub fn offset(self) -> Option<u64> {
        match self {
            Resolved::Offset(offset) => Some(offset),
            Resolved::Unresolved(_) => None,
        }
    }
}

impl fmt::Display for Resolved {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match *self {
            Resolved::Offset(offset) => write!(f, "0x{:x}", offset),
            Resolved::Unresolved(addr) => write!(f, "<unresolved 0x{:x}>", addr),
        }
    }
}

/// The name of a library ordinal, with the special ordinals spelled out.
pub fn library_name(linked_images: &[LinkedImage], ordinal: i64) -> String {
    match ordinal {
        BIND_SPECIAL_DYLIB_SELF => "this-image".to_owned(),
        BIND_SPECIAL_DYLIB_MAIN_EXECUTABLE => "main-executable".to_owned(),
        BIND_SPECIAL_DYLIB_FLAT_LOOKUP => "flat-namespace".to_owned(),
        BIND_SPECIAL_DYLIB_WEAK_LOOKUP => "weak-lookup".to_owned(),
        n if n > 0 && n as usize <= linked_images.len() => linked_images[n as usize - 1].name.clone(),
        n => format!("<ordinal {}>", n),
    }
}

/// Library ordinal of an undefined nlist entry, from the high byte of `n_desc`.
fn nlist_ordinal(n_desc: u16) -> i64 {
    match (n_desc >> 8) as u8 {
        0xff => BIND_SPECIAL_DYLIB_MAIN_EXECUTABLE,
        0xfe => BIND_SPECIAL_DYLIB_FLAT_LOOKUP,
        ordinal => i64::from(ordinal),
    }
}

/// Link-edit tables found by the dispatch pass, interpreted once all segments are known.
#[derive(Debug, Default)]
struct LinkEditTables {
    symtab: Option<(u32, u32, u32, u32)>,
    dysymtab: Option<(DynamicSymbolTable, u32, u32)>,
    rebase: LinkEditData,
    bind: LinkEditData,
    weak_bind: LinkEditData,
    lazy_bind: LinkEditData,
    export: Option<LinkEditData>,
    chained_fixups: Option<LinkEditData>,
    function_starts: Option<LinkEditData>,
    entryoff: Option<u64>,
    thread_pc: Option<u64>,
}

/// A fully loaded slice.
#[derive(Debug)]
pub struct Image {
    pub header: MachHeader,
    pub commands: Vec<MachCommand>,
    pub state: LoadState,
    layouts: Layouts,
    slice: Slice,
    vm: VirtualMemory,
    segments: Vec<Segment>,
    symbols: Vec<Symbol>,
    imports: Vec<Symbol>,
    exports: Vec<ExportSymbol>,
    linked_images: Vec<LinkedImage>,
    /// the install name and versions of a dylib
    pub identity: Option<LinkedImage>,
    pub uuid: Option<Uuid>,
    pub build: Option<BuildInfo>,
    pub source_version: Option<SourceVersionTag>,
    pub dylinker: Option<String>,
    pub rpaths: Vec<String>,
    pub sub_clients: Vec<String>,
    /// virtual address of the first instruction
    pub entry_point: Option<u64>,
    pub stack_size: u64,
    pub code_signature: Option<LinkEditData>,
    pub function_starts: Vec<u64>,
    pub dysymtab: Option<DynamicSymbolTable>,
    pub rebases: Vec<RebaseRecord>,
    /// binds of every table, in table order: bind, weak, lazy, then chained
    pub binds: Vec<BindRecord>,
    pub chained_imports: Vec<ChainedImport>,
    pub chained_rebases: Vec<ChainedRebase>,
    /// per record problems met while loading
    pub diagnostics: Vec<Diagnostic>,
}

impl Image {
    /// Load one slice.
    ///
    /// Structural problems fail the whole image; bad records of the link-edit
    /// tables are skipped and reported in `diagnostics`.
    pub fn load(slice: &Slice, opts: &LoadOptions) -> Result<Image> {
        let (header, commands, layouts) = ImageHeader::parse(slice)?.into_parts();
        let detag = opts.detag.resolve(header.cputype, header.filetype);

        let mut image = Image {
            header,
            commands: vec![],
            state: LoadState::CommandsEnumerated,
            layouts,
            slice: slice.clone(),
            vm: VirtualMemory::new(None, detag),
            segments: vec![],
            symbols: vec![],
            imports: vec![],
            exports: vec![],
            linked_images: vec![],
            identity: None,
            uuid: None,
            build: None,
            source_version: None,
            dylinker: None,
            rpaths: vec![],
            sub_clients: vec![],
            entry_point: None,
            stack_size: 0,
            code_signature: None,
            function_starts: vec![],
            dysymtab: None,
            rebases: vec![],
            binds: vec![],
            chained_imports: vec![],
            chained_rebases: vec![],
            diagnostics: vec![],
        };
        let mut tables = LinkEditTables::default();

        for MachCommand(cmd, _) in &commands {
            image.dispatch(cmd, &mut tables)?;
        }

        image.commands = commands;
        image.map_segments(detag)?;
        image.interpret(tables, opts)?;
        image.state = LoadState::Finalized;

        debug!(
            "{:?}: {} segments, {} symbols, {} imports, {} exports, {} binds, {} diagnostics",
            image.state,
            image.segments.len(),
            image.symbols.len(),
            image.imports.len(),
            image.exports.len(),
            image.binds.len(),
            image.diagnostics.len()
        );

        Ok(image)
    }

    fn dispatch(&mut self, cmd: &LoadCommand, tables: &mut LinkEditTables) -> Result<()> {
        trace!("dispatch {} command", cmd.name());

        match *cmd {
            LoadCommand::Segment { .. } | LoadCommand::Segment64 { .. } => {
                if let Some(segment) = Segment::from_command(cmd) {
                    self.check_file_range(segment.fileoff, segment.filesize)?;

                    for section in &segment.sections {
                        if section.size > 0
                            && (section.addr < segment.vmaddr
                                || section.addr.saturating_add(section.size) > segment.vmaddr.saturating_add(segment.vmsize))
                        {
                            self.report(
                                "segment",
                                format!(
                                    "section {},{} lies outside of its segment",
                                    section.segname, section.sectname
                                ),
                            );
                        }
                    }

                    debug!(
                        "segment #{} {} @ 0x{:x}-0x{:x}, file 0x{:x}+0x{:x}",
                        self.segments.len(),
                        segment.name,
                        segment.vmaddr,
                        segment.vmaddr.wrapping_add(segment.vmsize),
                        segment.fileoff,
                        segment.filesize
                    );

                    self.segments.push(segment);
                }
            }
            LoadCommand::IdDyLib(ref dylib) => {
                self.identity = Some(LinkedImage {
                    local: true,
                    ..LinkedImage::new(dylib)
                })
            }
            LoadCommand::LoadDyLib(ref dylib) => self.linked_images.push(LinkedImage::new(dylib)),
            LoadCommand::LoadWeakDyLib(ref dylib) => self.linked_images.push(LinkedImage {
                weak: true,
                ..LinkedImage::new(dylib)
            }),
            LoadCommand::ReexportDyLib(ref dylib) => self.linked_images.push(LinkedImage {
                reexport: true,
                ..LinkedImage::new(dylib)
            }),
            LoadCommand::LoadUpwardDylib(ref dylib) => self.linked_images.push(LinkedImage {
                upward: true,
                ..LinkedImage::new(dylib)
            }),
            LoadCommand::LazyLoadDylib(ref dylib) => self.linked_images.push(LinkedImage {
                lazy: true,
                ..LinkedImage::new(dylib)
            }),
            LoadCommand::Rpath(ref path) => self.rpaths.push(path.to_string()),
            LoadCommand::SubClient(ref client) => self.sub_clients.push(client.to_string()),
            LoadCommand::LoadDyLinker(ref name) => self.dylinker = Some(name.to_string()),
            LoadCommand::Uuid(uuid) => self.uuid = Some(uuid),
            LoadCommand::BuildVersion {
                platform,
                minos,
                sdk,
                ref tools,
            } => {
                self.build = Some(BuildInfo {
                    platform,
                    minos,
                    sdk,
                    tools: tools.clone(),
                })
            }
            LoadCommand::VersionMin { target, version, sdk } => {
                // LC_BUILD_VERSION wins when both are present
                if self.build.is_none() {
                    self.build = Some(BuildInfo {
                        platform: target.platform(),
                        minos: version,
                        sdk,
                        tools: vec![],
                    })
                }
            }
            LoadCommand::SourceVersion(version) => self.source_version = Some(version),
            LoadCommand::CodeSignature(data) => self.code_signature = Some(data),
            LoadCommand::FunctionStarts(data) => tables.function_starts = Some(data),
            LoadCommand::DyldExportsTrie(data) => tables.export = Some(data),
            LoadCommand::DyldChainedFixups(data) => tables.chained_fixups = Some(data),
            LoadCommand::SymTab {
                symoff,
                nsyms,
                stroff,
                strsize,
            } => tables.symtab = Some((symoff, nsyms, stroff, strsize)),
            LoadCommand::DySymTab {
                ilocalsym,
                nlocalsym,
                iextdefsym,
                nextdefsym,
                iundefsym,
                nundefsym,
                indirectsymoff,
                nindirectsyms,
                ..
            } => {
                tables.dysymtab = Some((
                    DynamicSymbolTable {
                        ilocalsym,
                        nlocalsym,
                        iextdefsym,
                        nextdefsym,
                        iundefsym,
                        nundefsym,
                        indirect_symbols: vec![],
                    },
                    indirectsymoff,
                    nindirectsyms,
                ))
            }
            LoadCommand::DyldInfo {
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
            } => {
                tables.rebase = LinkEditData {
                    off: rebase_off,
                    size: rebase_size,
                };
                tables.bind = LinkEditData {
                    off: bind_off,
                    size: bind_size,
                };
                tables.weak_bind = LinkEditData {
                    off: weak_bind_off,
                    size: weak_bind_size,
                };
                tables.lazy_bind = LinkEditData {
                    off: lazy_bind_off,
                    size: lazy_bind_size,
                };
                if export_size > 0 {
                    tables.export = Some(LinkEditData {
                        off: export_off,
                        size: export_size,
                    });
                }
            }
            LoadCommand::EntryPoint { entryoff, stacksize } => {
                tables.entryoff = Some(entryoff);
                self.stack_size = stacksize;
            }
            LoadCommand::UnixThread { ref state, .. } | LoadCommand::Thread { ref state, .. } => {
                if tables.thread_pc.is_none() {
                    tables.thread_pc = state.pc();
                }
            }
            _ => {}
        }

        Ok(())
    }

    /// Build the address space, as a page table when every segment allows it.
    fn map_segments(&mut self, detag: Detag) -> Result<()> {
        let page_size = probe_page_size(
            self.segments
                .iter()
                .filter(|segment| segment.mapped_size() > 0)
                .map(|segment| (segment.vmaddr, segment.fileoff)),
        );

        self.vm = VirtualMemory::new(page_size, detag);

        for segment in self.segments.iter().filter(|segment| segment.mapped_size() > 0) {
            self.vm.map_segment(segment.vmaddr, segment.mapped_size(), segment.fileoff)?;

            let file_end = segment.fileoff + segment.mapped_size();

            for section in &segment.sections {
                let zerofill = match section.flags.sect_type() {
                    S_ZEROFILL | S_GB_ZEROFILL | S_THREAD_LOCAL_ZEROFILL => true,
                    _ => false,
                };
                let offset = u64::from(section.offset);

                if section.size == 0 || offset == 0 || zerofill {
                    continue;
                }

                // sections only map bytes their segment holds
                if offset < segment.fileoff || offset >= file_end {
                    warn!(
                        "section {},{} @ 0x{:x} lies outside its segment file range",
                        section.segname, section.sectname, offset
                    );

                    continue;
                }

                let size = section.size.min(file_end - offset);

                self.vm.map_section(section.addr, size, offset)?;
            }
        }

        Ok(())
    }

    fn interpret(&mut self, tables: LinkEditTables, opts: &LoadOptions) -> Result<()> {
        let ptr_size = self.header.ptr_size();

        if opts.parse_symbols {
            if let Some((symoff, nsyms, stroff, strsize)) = tables.symtab {
                self.load_symbols(symoff, nsyms, stroff, strsize)?;
            }
        }

        if let Some((mut dysymtab, indirectsymoff, nindirectsyms)) = tables.dysymtab {
            let table = self.slice.read(u64::from(indirectsymoff), nindirectsyms as usize * 4)?;

            dysymtab.indirect_symbols = (0..nindirectsyms as usize)
                .map(|i| self.layouts.uint_at(&table, i * 4, 4).map(|v| v as u32))
                .collect::<Result<Vec<u32>>>()?;
            self.dysymtab = Some(dysymtab);
        }

        if opts.parse_dyld_info {
            let rebase = self.read_linkedit(tables.rebase)?;

            self.rebases = interpret_rebases(&rebase, ptr_size, &self.segments, &mut self.diagnostics);

            for &(kind, data) in &[
                (BindKind::Bind, tables.bind),
                (BindKind::WeakBind, tables.weak_bind),
                (BindKind::LazyBind, tables.lazy_bind),
            ] {
                let payload = self.read_linkedit(data)?;
                let linked_images = &self.linked_images;
                let mut records = interpret_binds(
                    &payload,
                    kind,
                    ptr_size,
                    &self.segments,
                    |ordinal| library_name(linked_images, ordinal),
                    &mut self.diagnostics,
                );

                self.binds.append(&mut records);
            }
        }

        if opts.parse_chained_fixups {
            if let Some(data) = tables.chained_fixups {
                self.load_chained_fixups(data, opts.max_chain_steps)?;
            }
        }

        self.collect_imports();

        if opts.parse_exports {
            if let Some(data) = tables.export {
                self.load_exports(data)?;
            }
        }

        if let Some(data) = tables.function_starts {
            self.load_function_starts(data)?;
        }

        self.entry_point = match (tables.thread_pc, tables.entryoff) {
            (Some(pc), _) => Some(pc),
            (None, Some(entryoff)) => self.text_segment().and_then(|text| {
                entryoff
                    .checked_sub(text.fileoff)
                    .map(|delta| text.vmaddr.wrapping_add(delta))
            }),
            (None, None) => None,
        };

        Ok(())
    }

    fn load_symbols(&mut self, symoff: u32, nsyms: u32, stroff: u32, strsize: u32) -> Result<()> {
        let ptr_size = self.header.ptr_size();
        let entry_size = self.layouts.size_of("nlist", ptr_size)?;
        let symtab = self.slice.read(u64::from(symoff), nsyms as usize * entry_size)?;
        let strtab = self.slice.read(u64::from(stroff), strsize as usize)?;
        let table = SymbolTable::parse(&self.layouts, ptr_size, &symtab, nsyms as usize, strtab)?;
        let sections = self
            .segments
            .iter()
            .flat_map(|segment| segment.sections.iter())
            .collect::<Vec<&Section>>();

        for entry in &table.entries {
            let name = match table.name(entry) {
                Ok(name) => name,
                Err(err) => {
                    warn!("symtab: symbol with string index {}, {}", entry.n_strx, err);

                    self.diagnostics.push(Diagnostic::new(
                        "symtab",
                        format!("symbol with string index {}: {}", entry.n_strx, err),
                    ));
                    continue;
                }
            };

            match entry.typ() {
                NlistType::Section(n_sect) => {
                    let in_code = sections
                        .get(usize::from(n_sect).wrapping_sub(1))
                        .map_or(false, |section| is_code(section));

                    self.symbols
                        .push(Symbol::new(name, entry.n_value, entry.is_external(), SymbolSource::SymTab, in_code));
                }
                NlistType::Absolute => {
                    self.symbols
                        .push(Symbol::new(name, entry.n_value, entry.is_external(), SymbolSource::SymTab, false));
                }
                NlistType::Undefined if entry.is_external() => {
                    self.imports.push(Symbol::import(name, nlist_ordinal(entry.n_desc), SymbolSource::SymTab));
                }
                _ => trace!("skip symbol `{}` of type {:?}", name, entry.typ()),
            }
        }

        debug!("loaded {} symbols and {} undefined symbols", self.symbols.len(), self.imports.len());

        Ok(())
    }

    fn load_chained_fixups(&mut self, data: LinkEditData, max_chain_steps: usize) -> Result<()> {
        let blob = self.read_linkedit(data)?;
        let linked_images = &self.linked_images;
        let target = FixupTarget {
            layouts: &self.layouts,
            slice: &self.slice,
            segments: &self.segments,
            image_base: self.text_segment().map_or(0, |text| text.vmaddr),
            max_chain_steps,
        };

        match ChainedFixups::parse(
            &blob,
            &target,
            |ordinal| library_name(linked_images, ordinal),
            &mut self.diagnostics,
        ) {
            Ok(fixups) => {
                self.chained_imports = fixups.imports;
                self.chained_rebases = fixups.rebases;
                self.binds.extend(fixups.binds);
            }
            Err(err) => {
                warn!("chained fixups: {}", err);

                self.diagnostics.push(Diagnostic::new("chained-fixups", err.to_string()));
            }
        }

        Ok(())
    }

    /// Imports from the bind tables first, then the undefined symbols no bind refers to.
    fn collect_imports(&mut self) {
        let undefined = std::mem::replace(&mut self.imports, vec![]);
        let mut seen = HashSet::new();

        for record in &self.binds {
            if seen.insert(record.symbol.clone()) {
                let source = match record.kind {
                    BindKind::Bind => SymbolSource::Bind,
                    BindKind::WeakBind => SymbolSource::WeakBind,
                    BindKind::LazyBind => SymbolSource::LazyBind,
                    BindKind::Chained => SymbolSource::ChainedFixups,
                };

                self.imports
                    .push(Symbol::import(record.symbol.clone(), record.ordinal, source));
            }
        }

        for symbol in undefined {
            if seen.insert(symbol.name.clone()) {
                self.imports.push(symbol);
            }
        }
    }

    fn load_exports(&mut self, data: LinkEditData) -> Result<()> {
        let payload = self.read_linkedit(data)?;

        let trie = match ExportTrie::parse(&payload, &mut self.diagnostics) {
            Ok(trie) => trie,
            Err(err) => {
                warn!("export trie: {}", err);

                self.diagnostics.push(Diagnostic::new("export-trie", err.to_string()));

                return Ok(());
            }
        };

        let text_base = self.text_segment().map_or(0, |text| text.vmaddr);
        let mut known = self
            .symbols
            .iter()
            .map(|symbol| symbol.name.clone())
            .collect::<HashSet<String>>();

        for export in &trie.symbols {
            let offset = match export.address() {
                Some(offset) => offset,
                None => continue,
            };
            let address = match export.kind {
                ExportKind::Absolute => offset,
                ExportKind::Regular | ExportKind::ThreadLocal => text_base.wrapping_add(offset),
            };

            if known.insert(export.name.clone()) {
                let in_code = self.section_for(address).map_or(false, is_code);

                self.symbols
                    .push(Symbol::new(export.name.clone(), address, true, SymbolSource::ExportTrie, in_code));
            }
        }

        self.exports = trie.symbols;

        Ok(())
    }

    fn load_function_starts(&mut self, data: LinkEditData) -> Result<()> {
        let mut address = self.text_segment().map_or(0, |text| text.vmaddr);
        let mut pos = u64::from(data.off);
        let end = pos + u64::from(data.size);

        self.check_file_range(pos, u64::from(data.size))?;

        while pos < end {
            let (delta, len) = match self.slice.read_uleb128(pos) {
                Ok(res) => res,
                Err(err) => {
                    self.report("function-starts", err.to_string());
                    break;
                }
            };

            if delta == 0 {
                break;
            }

            address = address.wrapping_add(delta);
            pos += len as u64;

            self.function_starts.push(address);
        }

        trace!("{} function starts", self.function_starts.len());

        Ok(())
    }

    fn report(&mut self, context: &str, message: String) {
        warn!("{}: {}", context, message);

        self.diagnostics.push(Diagnostic::new(context, message));
    }

    fn check_file_range(&self, offset: u64, size: u64) -> Result<()> {
        match offset.checked_add(size) {
            Some(end) if end <= self.slice.len() => Ok(()),
            _ => Err(Error::truncated(
                offset,
                size as usize,
                self.slice.len().saturating_sub(offset) as usize,
            )),
        }
    }

    fn read_linkedit(&self, data: LinkEditData) -> Result<Vec<u8>> {
        if data.size == 0 {
            Ok(vec![])
        } else {
            self.slice.read(u64::from(data.off), data.size as usize)
        }
    }

    /// The segment holding the mach header.
    fn text_segment(&self) -> Option<&Segment> {
        self.segments
            .iter()
            .find(|segment| segment.name == SEG_TEXT)
            .or_else(|| {
                self.segments
                    .iter()
                    .find(|segment| segment.fileoff == 0 && segment.filesize > 0)
            })
    }

    pub fn layouts(&self) -> &Layouts {
        &self.layouts
    }

    pub fn slice(&self) -> &Slice {
        &self.slice
    }

    pub fn vm(&self) -> &VirtualMemory {
        &self.vm
    }

    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    pub fn symbols(&self) -> &[Symbol] {
        &self.symbols
    }

    pub fn imports(&self) -> &[Symbol] {
        &self.imports
    }

    pub fn exports(&self) -> &[ExportSymbol] {
        &self.exports
    }

    pub fn linked_images(&self) -> &[LinkedImage] {
        &self.linked_images
    }

    pub fn binds_of(&self, kind: BindKind) -> impl Iterator<Item = &BindRecord> {
        self.binds.iter().filter(move |record| record.kind == kind)
    }

    pub fn segment_by_name(&self, name: &str) -> Option<&Segment> {
        self.segments.iter().find(|segment| segment.name == name)
    }

    pub fn section_for(&self, addr: u64) -> Option<&Section> {
        self.segments
            .iter()
            .flat_map(|segment| segment.sections.iter())
            .find(|section| section.contains(addr))
    }

    pub fn symbol_at(&self, addr: u64) -> Option<&Symbol> {
        self.symbols.iter().find(|symbol| symbol.address == addr)
    }

    /// The name of a library ordinal of this image.
    pub fn library_name(&self, ordinal: i64) -> String {
        library_name(&self.linked_images, ordinal)
    }

    /// Translate a virtual address to an offset in the slice.
    pub fn translate(&self, vm: u64) -> Result<u64> {
        self.vm.translate(vm)
    }

    /// Translate an offset in the slice back to a virtual address.
    pub fn reverse(&self, offset: u64) -> Result<u64> {
        self.vm.reverse(offset)
    }

    /// Translate an address, keeping it as an unresolved placeholder when it is not mapped.
    pub fn resolve_or_placeholder(&self, vm: u64) -> Resolved {
        match self.vm.translate(vm) {
            Ok(offset) => Resolved::Offset(offset),
            Err(err) => {
                trace!("{}", err);

                Resolved::Unresolved(vm)
            }
        }
    }

    fn file_offset(&self, offset: u64, addr: Addr) -> Result<u64> {
        match addr {
            Addr::File => Ok(offset),
            Addr::Vm => self.vm.translate(offset),
        }
    }

    /// Read an unsigned integer of `len` bytes in the byte order of the image.
    pub fn read_uint(&self, offset: u64, len: usize, addr: Addr) -> Result<u64> {
        let offset = self.file_offset(offset, addr)?;
        let bytes = self.slice.read(offset, len)?;

        self.layouts.uint_at(&bytes, 0, len)
    }

    /// Read a pointer sized integer.
    pub fn read_pointer(&self, offset: u64, addr: Addr) -> Result<u64> {
        self.read_uint(offset, self.header.ptr_size(), addr)
    }

    pub fn read_cstring(&self, offset: u64, addr: Addr) -> Result<String> {
        let offset = self.file_offset(offset, addr)?;

        self.slice.read_cstring(offset)
    }

    /// Decode a record of the named layout.
    pub fn read_struct(&self, offset: u64, layout: &str, addr: Addr) -> Result<Record> {
        let offset = self.file_offset(offset, addr)?;
        let ptr_size = self.header.ptr_size();
        let size = self.layouts.size_of(layout, ptr_size)?;
        let bytes = self.slice.read(offset, size)?;

        self.layouts.decode(layout, &bytes, 0, ptr_size)
    }
}

fn is_code(section: &Section) -> bool {
    section
        .flags
        .sect_attrs()
        .intersects(SectionAttributes::S_ATTR_PURE_INSTRUCTIONS | SectionAttributes::S_ATTR_SOME_INSTRUCTIONS)
}

impl MachFile {
    /// Open a file through the paged file source sized by `opts`.
    pub fn open_with<P: AsRef<Path>>(path: P, opts: &LoadOptions) -> Result<MachFile> {
        Self::open_paged(path, opts.page_cache_pages)
    }

    /// Load every slice independently.
    pub fn images(&self, opts: &LoadOptions) -> Vec<Result<Image>> {
        self.slices
            .iter()
            .map(|slice| {
                Image::load(slice, opts).map_err(|err| {
                    warn!("fail to load {} slice @ 0x{:x}, {}", slice.arch_name(), slice.base(), err);

                    err
                })
            })
            .collect()
    }
}
