use std::collections::HashSet;
use std::io::Cursor;

use byteorder::ReadBytesExt;

use crate::commands::CursorExt;
use crate::consts::*;
use crate::errors::{Diagnostic, Error, Result};

const CONTEXT: &str = "export-trie";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ExportKind {
    Regular,
    ThreadLocal,
    Absolute,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ExportType {
    Regular { address: u64 },
    Weak { address: u64 },
    Reexport { ordinal: u64, name: String },
    Stub { offset: u64, resolver: u64 },
}

/// A terminal node of the export trie.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ExportSymbol {
    /// the labels along the path from the root
    pub name: String,
    pub kind: ExportKind,
    pub flags: ExportSymbolFlags,
    pub symbol: ExportType,
}

impl ExportSymbol {
    /// Offset from the image base, `None` for re-exports.
    pub fn address(&self) -> Option<u64> {
        match self.symbol {
            ExportType::Reexport { .. } => None,
            ExportType::Regular { address } | ExportType::Weak { address } | ExportType::Stub { offset: address, .. } => {
                Some(address)
            }
        }
    }

    /// The name a re-export is imported under, which defaults to its own name.
    pub fn reexported_name(&self) -> Option<&str> {
        match self.symbol {
            ExportType::Reexport { ref name, .. } if name.is_empty() => Some(&self.name),
            ExportType::Reexport { ref name, .. } => Some(name),
            _ => None,
        }
    }
}

/// The decoded export trie.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ExportTrie {
    pub symbols: Vec<ExportSymbol>,
}

impl ExportTrie {
    /// Walk the whole trie.
    ///
    /// Every node and child offset must stay within `payload`, and each node is
    /// visited at most once. A terminal with an unknown kind or a label that is
    /// not UTF-8 is skipped and reported to `diagnostics`.
    pub fn parse(payload: &[u8], diagnostics: &mut Vec<Diagnostic>) -> Result<ExportTrie> {
        let mut symbols = Vec::new();

        if payload.is_empty() {
            return Ok(ExportTrie { symbols });
        }

        let mut visited = HashSet::new();
        let mut nodes = vec![(String::new(), 0usize)];

        while let Some((prefix, offset)) = nodes.pop() {
            if !visited.insert(offset) {
                return Err(Error::LoadError(format!(
                    "export trie node at offset 0x{:x} is reached twice",
                    offset
                )));
            }

            let (symbol, edges) = Self::parse_node(payload, offset, &prefix, diagnostics).map_err(|err| match err {
                Error::TruncatedInput { .. } => Error::TrieOverrun {
                    offset,
                    size: payload.len(),
                },
                err => err,
            })?;

            trace!("export trie node @ 0x{:x} `{}`, {} edges", offset, prefix, edges.len());

            if let Some((kind, flags, symbol)) = symbol {
                symbols.push(ExportSymbol {
                    name: prefix.clone(),
                    kind,
                    flags,
                    symbol,
                });
            }

            // keep the trie order when popping
            for (label, child) in edges.into_iter().rev() {
                if child >= payload.len() {
                    return Err(Error::TrieOverrun {
                        offset: child,
                        size: payload.len(),
                    });
                }

                nodes.push((prefix.clone() + &label, child));
            }
        }

        debug!("parsed {} exported symbols from {} bytes trie", symbols.len(), payload.len());

        Ok(ExportTrie { symbols })
    }

    #[allow(clippy::type_complexity)]
    fn parse_node(
        payload: &[u8],
        offset: usize,
        prefix: &str,
        diagnostics: &mut Vec<Diagnostic>,
    ) -> Result<(Option<(ExportKind, ExportSymbolFlags, ExportType)>, Vec<(String, usize)>)> {
        let mut cur = Cursor::new(payload);

        cur.set_position(offset as u64);

        let terminal_size = cur.read_uleb128()? as usize;
        let children = (cur.position() as usize).saturating_add(terminal_size);

        if children >= payload.len() {
            return Err(Error::TrieOverrun {
                offset: children,
                size: payload.len(),
            });
        }

        let symbol = if terminal_size != 0 {
            let symbol = Self::parse_terminal(&mut cur, prefix, diagnostics)?;

            if cur.position() as usize > children {
                return Err(Error::TrieOverrun {
                    offset: cur.position() as usize,
                    size: payload.len(),
                });
            }

            symbol
        } else {
            None
        };

        cur.set_position(children as u64);

        let count = cur.read_u8()?;
        let mut edges = Vec::with_capacity(count as usize);

        for _ in 0..count {
            let label = read_label(&mut cur)?;
            let child = cur.read_uleb128()? as usize;

            match String::from_utf8(label) {
                Ok(label) => edges.push((label, child)),
                Err(err) => report(
                    diagnostics,
                    format!("skip edge below `{}` to node 0x{:x}, {}", prefix, child, err),
                ),
            }
        }

        Ok((symbol, edges))
    }

    fn parse_terminal(
        cur: &mut Cursor<&[u8]>,
        prefix: &str,
        diagnostics: &mut Vec<Diagnostic>,
    ) -> Result<Option<(ExportKind, ExportSymbolFlags, ExportType)>> {
        let flags = cur.read_uleb128()?;

        let kind = match flags as u8 & EXPORT_SYMBOL_FLAGS_KIND_MASK {
            EXPORT_SYMBOL_FLAGS_KIND_REGULAR => ExportKind::Regular,
            EXPORT_SYMBOL_FLAGS_KIND_THREAD_LOCAL => ExportKind::ThreadLocal,
            EXPORT_SYMBOL_FLAGS_KIND_ABSOLUTE => ExportKind::Absolute,
            kind => {
                report(diagnostics, format!("skip `{}` with unknown export kind {}", prefix, kind));

                return Ok(None);
            }
        };

        let flags = ExportSymbolFlags::from_bits_truncate(flags as u32);

        let symbol = if flags.contains(ExportSymbolFlags::EXPORT_SYMBOL_FLAGS_REEXPORT) {
            let ordinal = cur.read_uleb128()?;
            let name = match String::from_utf8(read_label(cur)?) {
                Ok(name) => name,
                Err(err) => {
                    report(diagnostics, format!("skip re-export `{}`, {}", prefix, err));

                    return Ok(None);
                }
            };

            ExportType::Reexport { ordinal, name }
        } else if flags.contains(ExportSymbolFlags::EXPORT_SYMBOL_FLAGS_STUB_AND_RESOLVER) {
            let offset = cur.read_uleb128()?;
            let resolver = cur.read_uleb128()?;

            ExportType::Stub { offset, resolver }
        } else {
            let address = cur.read_uleb128()?;

            if flags.contains(ExportSymbolFlags::EXPORT_SYMBOL_FLAGS_WEAK_DEFINITION) {
                ExportType::Weak { address }
            } else {
                ExportType::Regular { address }
            }
        };

        Ok(Some((kind, flags, symbol)))
    }

    pub fn len(&self) -> usize {
        self.symbols.len()
    }

    pub fn is_empty(&self) -> bool {
        self.symbols.is_empty()
    }
}

fn report(diagnostics: &mut Vec<Diagnostic>, msg: String) {
    warn!("{}: {}", CONTEXT, msg);

    diagnostics.push(Diagnostic::new(CONTEXT, msg));
}

/// The raw bytes of a NUL terminated label.
fn read_label(cur: &mut Cursor<&[u8]>) -> Result<Vec<u8>> {
    let buf: &[u8] = cur.get_ref();
    let start = cur.position() as usize;
    let rest = buf.get(start..).unwrap_or(&[]);
    let len = rest
        .iter()
        .position(|&b| b == 0)
        .ok_or_else(|| Error::truncated(start as u64, rest.len() + 1, rest.len()))?;
    let label = rest[..len].to_vec();

    cur.set_position((start + len + 1) as u64);

    Ok(label)
}

#[cfg(test)]
pub mod tests {
    use std::collections::BTreeMap;

    use super::*;

    fn uleb(mut v: u64, out: &mut Vec<u8>) {
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

    /// Build a trie with one level of edges below the root, each leading to a regular export.
    fn build_trie(symbols: &[(&str, u64)]) -> Vec<u8> {
        let mut leaves = Vec::new();
        let mut leaf_offsets = Vec::new();
        let root_size = 2 + symbols.iter().map(|(name, _)| name.len() + 1 + 2).sum::<usize>();

        for &(_, address) in symbols {
            let mut info = vec![0];
            uleb(address, &mut info);

            leaf_offsets.push(root_size + leaves.len());
            uleb(info.len() as u64, &mut leaves);
            leaves.extend_from_slice(&info);
            leaves.push(0);
        }

        let mut trie = vec![0, symbols.len() as u8];

        for (&(name, _), &offset) in symbols.iter().zip(&leaf_offsets) {
            trie.extend_from_slice(name.as_bytes());
            trie.push(0);
            // two byte ULEB so that the root size is known up front
            trie.push((offset as u8 & 0x7f) | 0x80);
            trie.push((offset >> 7) as u8);
        }

        assert_eq!(trie.len(), root_size);

        trie.extend_from_slice(&leaves);
        trie
    }

    #[test]
    fn test_parse_export_trie() {
        let expected = [("_main", 0xf00u64), ("_helper", 0x1f20), ("_OBJC_CLASS_$_Foo", 0x8000)];
        let trie = ExportTrie::parse(&build_trie(&expected), &mut vec![]).unwrap();

        assert_eq!(
            trie.symbols
                .iter()
                .map(|symbol| (symbol.name.as_str(), symbol.address().unwrap()))
                .collect::<BTreeMap<&str, u64>>(),
            expected.iter().cloned().collect::<BTreeMap<&str, u64>>()
        );
        assert_eq!(trie.len(), expected.len());
        assert!(trie.symbols.iter().all(|symbol| symbol.kind == ExportKind::Regular));
    }

    #[test]
    fn test_parse_shared_prefix() {
        // root -> "_" -> { "a" (0x10, weak), "b" (reexport of "_c" from ordinal 2) }
        let trie = [
            0x00, 0x01, b'_', 0x00, 0x05, // root
            0x00, 0x02, b'a', 0x00, 0x0d, b'b', 0x00, 0x11, // "_"
            0x02, 0x04, 0x10, 0x00, // "_a"
            0x05, 0x08, 0x02, b'_', b'c', 0x00, 0x00, // "_b"
        ];
        let trie = ExportTrie::parse(&trie, &mut vec![]).unwrap();

        assert_eq!(trie.len(), 2);
        assert_eq!(trie.symbols[0].name, "_a");
        assert_eq!(trie.symbols[0].symbol, ExportType::Weak { address: 0x10 });
        assert_eq!(trie.symbols[1].name, "_b");
        assert_eq!(
            trie.symbols[1].symbol,
            ExportType::Reexport {
                ordinal: 2,
                name: "_c".to_owned()
            }
        );
        assert_eq!(trie.symbols[1].address(), None);
        assert_eq!(trie.symbols[1].reexported_name(), Some("_c"));
    }

    #[test]
    fn test_trie_overrun() {
        // child offset points past the end
        let trie = [0x00, 0x01, b'_', 0x00, 0x40];

        assert!(matches!(ExportTrie::parse(&trie, &mut vec![]), Err(Error::TrieOverrun { offset: 0x40, .. })));

        // terminal size runs past the end
        let trie = [0x20, 0x00, 0x10];

        assert!(matches!(ExportTrie::parse(&trie, &mut vec![]), Err(Error::TrieOverrun { .. })));

        // truncated edge list
        let trie = [0x00, 0x02, b'_', 0x00, 0x05];

        assert!(matches!(ExportTrie::parse(&trie, &mut vec![]), Err(Error::TrieOverrun { .. })));

        let valid = build_trie(&[("_main", 0xf00)]);

        for len in 1..valid.len() {
            match ExportTrie::parse(&valid[..len], &mut vec![]) {
                Err(Error::TrieOverrun { .. }) => {}
                res => panic!("truncated at {}: {:?}", len, res),
            }
        }
    }

    #[test]
    fn test_bad_records_keep_siblings() {
        // root -> "_" -> { "a" (0x10), "b" with export kind 3 }
        let trie = [
            0x00, 0x01, b'_', 0x00, 0x05, // root
            0x00, 0x02, b'a', 0x00, 0x0d, b'b', 0x00, 0x11, // "_"
            0x02, 0x00, 0x10, 0x00, // "_a"
            0x02, 0x03, 0x20, 0x00, // "_b"
        ];
        let mut diagnostics = vec![];
        let trie = ExportTrie::parse(&trie, &mut diagnostics).unwrap();

        assert_eq!(trie.len(), 1);
        assert_eq!(trie.symbols[0].name, "_a");
        assert_eq!(trie.symbols[0].address(), Some(0x10));
        assert_eq!(diagnostics.len(), 1);
        assert!(diagnostics[0].message.contains("unknown export kind 3"));

        // root -> { "_a" (0x10), "\xff" (0x20) }
        let trie = [
            0x00, 0x02, b'_', b'a', 0x00, 0x09, 0xff, 0x00, 0x0d, // root
            0x02, 0x00, 0x10, 0x00, // "_a"
            0x02, 0x00, 0x20, 0x00, // "\xff"
        ];
        let mut diagnostics = vec![];
        let trie = ExportTrie::parse(&trie, &mut diagnostics).unwrap();

        assert_eq!(trie.len(), 1);
        assert_eq!(trie.symbols[0].name, "_a");
        assert_eq!(diagnostics.len(), 1);
        assert_eq!(diagnostics[0].context, "export-trie");
    }

    #[test]
    fn test_trie_loop() {
        // the child points back to the root
        let trie = [0x00, 0x01, b'_', 0x00, 0x00];

        assert!(ExportTrie::parse(&trie, &mut vec![]).is_err());
    }
}
