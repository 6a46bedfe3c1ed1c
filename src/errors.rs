use std::fmt;
use std::io;
use std::str;
use std::string;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("truncated input, need {needed} bytes at offset 0x{offset:x} but only {available} available.")]
    TruncatedInput {
        offset: u64,
        needed: usize,
        available: usize,
    },
    #[error("malformed load commands, {0}.")]
    MalformedLoadCommands(String),
    #[error("address 0x{address:x} or size 0x{size:x} is not aligned to page size 0x{page_size:x}.")]
    AlignmentError { address: u64, size: u64, page_size: u64 },
    #[error("address 0x{0:x} is not mapped by any segment.")]
    UnmappedAddress(u64),
    #[error("export trie node at offset 0x{offset:x} overruns the trie of {size} bytes.")]
    TrieOverrun { offset: usize, size: usize },
    #[error("fixup chain in segment #{segment} page #{page} exceeds {steps} steps.")]
    UnterminatedChain { segment: usize, page: usize, steps: usize },
    #[error("unsupported file type with magic 0x{0:08x}.")]
    UnsupportedFiletype(u32),
    #[error("struct layout `{0}` refers to itself.")]
    RecursiveLayout(String),
    #[error("unknown struct layout `{0}`.")]
    UnknownLayout(String),
    #[error("record of `{layout}` has no field `{field}`.")]
    MissingField { layout: String, field: String },
    #[error("field `{0}` has an unexpected type.")]
    FieldType(String),
    #[error("fail to interpret a sequence of u8 as a string, {0}.")]
    Utf8Error(#[from] str::Utf8Error),
    #[error("fail to convert a String from a UTF-8 byte vector, {0}.")]
    FromUtf8Error(#[from] string::FromUtf8Error),
    #[error("fail to parse UUID, {0}.")]
    UuidParseError(#[from] uuid::Error),
    #[error("fail to do I/O operations, {0}.")]
    IoError(#[from] io::Error),
    #[error("fail to load, {0}.")]
    LoadError(String),
    #[error("number overflowing.")]
    NumberOverflow,
}

impl Error {
    pub fn truncated(offset: u64, needed: usize, available: usize) -> Self {
        Error::TruncatedInput {
            offset,
            needed,
            available,
        }
    }

    /// Whether the error comes from input that ends too early.
    pub fn is_truncation(&self) -> bool {
        matches!(
            self,
            Error::TruncatedInput { .. } | Error::MalformedLoadCommands(_) | Error::TrieOverrun { .. }
        )
    }
}

/// A recoverable problem met while decoding one record.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Diagnostic {
    /// the table or command being decoded
    pub context: String,
    pub message: String,
}

impl Diagnostic {
    pub fn new<C: Into<String>, M: Into<String>>(context: C, message: M) -> Self {
        Diagnostic {
            context: context.into(),
            message: message.into(),
        }
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}: {}", self.context, self.message)
    }
}

pub type Result<T> = ::std::result::Result<T, Error>;
