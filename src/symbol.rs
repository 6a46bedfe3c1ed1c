use std::fmt;

use crate::consts::*;
use crate::errors::{Error, Result};
use crate::layout::{fixed_size_string, Layouts};

const OBJC_CLASS_PREFIX: &str = "_OBJC_CLASS_$_";
const OBJC_METACLASS_PREFIX: &str = "_OBJC_METACLASS_$_";
const OBJC_IVAR_PREFIX: &str = "_OBJC_IVAR_$_";

/// What a symbol names, derived from its decoration and its section.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum SymbolKind {
    Class,
    Metaclass,
    Ivar,
    Function,
    Unknown,
}

impl SymbolKind {
    pub fn classify(name: &str, in_code: bool) -> SymbolKind {
        if name.starts_with(OBJC_CLASS_PREFIX) {
            SymbolKind::Class
        } else if name.starts_with(OBJC_METACLASS_PREFIX) {
            SymbolKind::Metaclass
        } else if name.starts_with(OBJC_IVAR_PREFIX) {
            SymbolKind::Ivar
        } else if in_code {
            SymbolKind::Function
        } else {
            SymbolKind::Unknown
        }
    }
}

/// The table a symbol was found in.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum SymbolSource {
    SymTab,
    Bind,
    WeakBind,
    LazyBind,
    ExportTrie,
    ChainedFixups,
}

impl fmt::Display for SymbolSource {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(match self {
            SymbolSource::SymTab => "symtab",
            SymbolSource::Bind => "bind",
            SymbolSource::WeakBind => "weak-bind",
            SymbolSource::LazyBind => "lazy-bind",
            SymbolSource::ExportTrie => "export-trie",
            SymbolSource::ChainedFixups => "chained-fixups",
        })
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Symbol {
    /// full, possibly decorated name
    pub name: String,
    pub kind: SymbolKind,
    /// virtual address, 0 for imports
    pub address: u64,
    pub external: bool,
    pub source: SymbolSource,
    /// library ordinal of an imported symbol
    pub ordinal: Option<i64>,
}

impl Symbol {
    pub fn new(name: String, address: u64, external: bool, source: SymbolSource, in_code: bool) -> Self {
        Symbol {
            kind: SymbolKind::classify(&name, in_code),
            name,
            address,
            external,
            source,
            ordinal: None,
        }
    }

    pub fn import(name: String, ordinal: i64, source: SymbolSource) -> Self {
        Symbol {
            kind: SymbolKind::classify(&name, false),
            name,
            address: 0,
            external: true,
            source,
            ordinal: Some(ordinal),
        }
    }

    /// The name without its Objective-C decoration.
    pub fn short_name(&self) -> &str {
        let prefix = match self.kind {
            SymbolKind::Class => OBJC_CLASS_PREFIX,
            SymbolKind::Metaclass => OBJC_METACLASS_PREFIX,
            SymbolKind::Ivar => OBJC_IVAR_PREFIX,
            SymbolKind::Function | SymbolKind::Unknown => "",
        };

        &self.name[prefix.len()..]
    }

    pub fn is_import(&self) -> bool {
        self.ordinal.is_some()
    }
}

/// The type bits of an nlist entry.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum NlistType {
    Undefined,
    Absolute,
    Section(u8),
    Prebound,
    Indirect,
    Debug(u8),
    Unknown(u8),
}

/// One entry of the symbol table.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Nlist {
    pub n_strx: u32,
    pub n_type: u8,
    pub n_sect: u8,
    pub n_desc: u16,
    pub n_value: u64,
}

impl Nlist {
    pub fn is_external(&self) -> bool {
        (self.n_type & N_EXT) == N_EXT
    }

    pub fn is_private_external(&self) -> bool {
        (self.n_type & N_PEXT) == N_PEXT
    }

    pub fn typ(&self) -> NlistType {
        if (self.n_type & N_STAB) != 0 {
            return NlistType::Debug(self.n_type);
        }

        match self.n_type & N_TYPE {
            N_UNDF => NlistType::Undefined,
            N_ABS => NlistType::Absolute,
            N_SECT => NlistType::Section(self.n_sect),
            N_PBUD => NlistType::Prebound,
            N_INDR => NlistType::Indirect,
            typ => NlistType::Unknown(typ),
        }
    }
}

/// The decoded `LC_SYMTAB` tables.
#[derive(Clone, Debug, Default)]
pub struct SymbolTable {
    pub entries: Vec<Nlist>,
    strtab: Vec<u8>,
}

impl SymbolTable {
    /// Decode `nsyms` entries from the symbol table bytes, keeping the string table for name lookups.
    pub fn parse(layouts: &Layouts, ptr_size: usize, symtab: &[u8], nsyms: usize, strtab: Vec<u8>) -> Result<Self> {
        let entry_size = layouts.size_of("nlist", ptr_size)?;

        let entries = (0..nsyms)
            .map(|i| {
                let record = layouts.decode("nlist", symtab, i * entry_size, ptr_size)?;

                Ok(Nlist {
                    n_strx: record.u32("n_strx")?,
                    n_type: record.u64("n_type")? as u8,
                    n_sect: record.u64("n_sect")? as u8,
                    n_desc: record.u64("n_desc")? as u16,
                    n_value: record.u64("n_value")?,
                })
            })
            .collect::<Result<Vec<Nlist>>>()?;

        trace!("parsed {} symbols with {} bytes string table", entries.len(), strtab.len());

        Ok(SymbolTable { entries, strtab })
    }

    /// The name of an entry, from the string table.
    pub fn name(&self, entry: &Nlist) -> Result<String> {
        let start = entry.n_strx as usize;

        if start >= self.strtab.len() {
            return Err(Error::truncated(start as u64, 1, 0));
        }

        let bytes = &self.strtab[start..];

        match bytes.iter().position(|&b| b == 0) {
            Some(_) => Ok(fixed_size_string(bytes)),
            None => Err(Error::truncated(start as u64, bytes.len() + 1, bytes.len())),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
