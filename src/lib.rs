//! Static reconstruction of Mach-O link-edit metadata.
//!
//! A file is split into its slices, each slice is decoded into an [`Image`]:
//! segments and the address space they describe, linked libraries, the
//! symbol table, and the binds, rebases and exports recovered from the
//! dyld info opcode streams, the export trie and the chained fixups.
//!
//! ```no_run
//! use mach_linkedit::{Detag, LoadOptions, MachFile};
//!
//! let opts = LoadOptions::default().detag(Detag::Auto);
//! let file = MachFile::open_with("/usr/lib/dyld", &opts)?;
//!
//! for image in file.images(&opts) {
//!     let image = image?;
//!
//!     for bind in &image.binds {
//!         println!("{} {} @ 0x{:x}", bind.library, bind.symbol, bind.address);
//!     }
//! }
//! # Ok::<(), mach_linkedit::Error>(())
//! ```
#[macro_use]
extern crate log;
#[macro_use]
extern crate bitflags;

mod commands;
mod consts;
#[cfg(feature = "display")]
mod display;
mod errors;
mod export;
mod fixups;
mod image;
mod layout;
mod loader;
mod opcode;
pub mod patch;
mod source;
mod symbol;
mod vm;

pub use crate::commands::{
    platform_name, BuildTarget, BuildTool, DyLib, LcString, LinkEditData, LoadCommand, Section, SectionFlags,
    SourceVersionTag, ThreadState, VersionTag,
};
pub use crate::consts::*;
pub use crate::errors::{Diagnostic, Error, Result};
pub use crate::export::{ExportKind, ExportSymbol, ExportTrie, ExportType};
pub use crate::fixups::{ChainedFixups, ChainedImport, ChainedPointer, ChainedRebase, FixupTarget, PointerFormat};
pub use crate::image::{
    library_name, Addr, BuildInfo, DynamicSymbolTable, Image, LinkedImage, LoadOptions, Resolved, Segment,
    DEFAULT_MAX_CHAIN_STEPS, DEFAULT_PAGE_CACHE_PAGES,
};
pub use crate::layout::{Endian, Field, FieldType, Layout, Layouts, Record, Value};
pub use crate::loader::{FatArch, FatHeader, ImageHeader, LoadState, MachCommand, MachFile, MachHeader, Slice};
pub use crate::opcode::{
    interpret_binds, interpret_rebases, BindKind, BindOpCode, BindOpCodes, BindRecord, BindState, BindSymbolFlags, Emitted,
    RebaseOpCode, RebaseOpCodes, RebaseRecord, RebaseState, SymbolType,
};
pub use crate::source::{FileSource, MemorySource, MmapSource, PagedFileSource};
pub use crate::symbol::{Nlist, NlistType, Symbol, SymbolKind, SymbolSource, SymbolTable};
pub use crate::vm::{probe_page_size, AddressSpace, Detag, LinearVm, MappedRange, PagedVm, VirtualMemory, PAGE_SIZES};
