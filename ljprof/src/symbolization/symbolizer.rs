// String formatting intentionally uses format! for clarity
#![allow(clippy::format_push_string)]

use addr2line::Context;
use anyhow::{Context as _, Result};
use gimli::{EndianRcSlice, RunTimeEndian};
use object::{Object, ObjectKind, ObjectSection, ObjectSymbol, SymbolKind};
use rustc_demangle::demangle;
use std::cell::RefCell;
use std::collections::HashMap;
use std::fs;
use std::path::Path;
use std::rc::Rc;

/// Symbolizer for resolving instruction pointers of one binary
///
/// Tries DWARF first and falls back to the ELF symbol table, so stripped-of-
/// debug-info builds (the usual OpenResty package) still get function names.
/// Results are cached per address.
pub struct Symbolizer {
    ctx: Context<EndianRcSlice<RunTimeEndian>>,
    /// Function symbols sorted by address: (start, size, name)
    symbols: Vec<(u64, u64, String)>,
    position_independent: bool,
    /// Cache of resolved frames by address
    cache: RefCell<HashMap<u64, SymbolizedFrame>>,
}

impl Symbolizer {
    /// Create a new symbolizer for the given binary
    ///
    /// # Errors
    /// Returns an error if the binary file cannot be read or parsed
    pub fn new<P: AsRef<Path>>(binary_path: P) -> Result<Self> {
        let binary_data = fs::read(binary_path.as_ref()).context("Failed to read binary file")?;

        let obj_file = object::File::parse(&*binary_data).context("Failed to parse object file")?;

        // Load DWARF debug info (empty sections when absent)
        let endian =
            if obj_file.is_little_endian() { RunTimeEndian::Little } else { RunTimeEndian::Big };

        let load_section =
            |id: gimli::SectionId| -> Result<EndianRcSlice<RunTimeEndian>, gimli::Error> {
                let data = obj_file
                    .section_by_name(id.name())
                    .and_then(|section| section.uncompressed_data().ok())
                    .unwrap_or(std::borrow::Cow::Borrowed(&[][..]));
                Ok(EndianRcSlice::new(Rc::from(&*data), endian))
            };

        let dwarf = gimli::Dwarf::load(&load_section)?;
        let ctx = Context::from_dwarf(dwarf).context("Failed to load DWARF debug information")?;

        let mut symbols: Vec<(u64, u64, String)> = obj_file
            .symbols()
            .chain(obj_file.dynamic_symbols())
            .filter(|sym| sym.kind() == SymbolKind::Text && sym.address() != 0)
            .filter_map(|sym| Some((sym.address(), sym.size(), sym.name().ok()?.to_string())))
            .collect();
        symbols.sort_unstable_by_key(|(addr, _, _)| *addr);
        symbols.dedup_by_key(|(addr, _, _)| *addr);

        Ok(Self {
            ctx,
            symbols,
            position_independent: obj_file.kind() == ObjectKind::Dynamic,
            cache: RefCell::new(HashMap::new()),
        })
    }

    /// True for PIE executables and shared objects, whose runtime addresses
    /// must be rebased before lookup.
    pub fn is_position_independent(&self) -> bool {
        self.position_independent
    }

    /// Resolve an instruction pointer (file-relative address) to source information
    ///
    /// Uses a cache to avoid re-resolving the same address multiple times.
    pub fn resolve(&self, addr: u64) -> SymbolizedFrame {
        if let Some(cached) = self.cache.borrow().get(&addr) {
            return cached.clone();
        }

        let mut result = Vec::new();

        if let Ok(mut frame_iter) = self.ctx.find_frames(addr).skip_all_loads() {
            while let Ok(Some(frame)) = frame_iter.next() {
                let function = frame
                    .function
                    .and_then(|f| f.demangle().ok().map(|s| s.to_string()))
                    .or_else(|| self.symbol_name(addr))
                    .unwrap_or_else(|| "<unknown>".to_string());

                let location = frame.location.map(|loc| SourceLocation {
                    file: loc.file.map(std::string::ToString::to_string),
                    line: loc.line,
                    column: loc.column,
                });

                result.push(InlinedFrame { function, location });
            }
        }

        if result.is_empty() {
            let function = self.symbol_name(addr).unwrap_or_else(|| "<unknown>".to_string());
            result.push(InlinedFrame { function, location: None });
        }

        let resolved = SymbolizedFrame { addr, frames: result };
        self.cache.borrow_mut().insert(addr, resolved.clone());
        resolved
    }

    /// Name of the function symbol covering `addr`, demangled.
    fn symbol_name(&self, addr: u64) -> Option<String> {
        let idx = self.symbols.partition_point(|(start, _, _)| *start <= addr);
        let (start, size, name) = self.symbols.get(idx.checked_sub(1)?)?;
        // Zero-sized symbols (hand-written assembly) cover up to the next one
        if *size != 0 && addr >= start + size {
            return None;
        }
        Some(Self::demangle_symbol(name))
    }

    /// Demangle a Rust symbol name; C names pass through unchanged
    #[must_use]
    pub fn demangle_symbol(symbol: &str) -> String {
        format!("{:#}", demangle(symbol))
    }
}

/// A resolved native frame (may contain multiple inlined frames)
#[derive(Debug, Clone)]
pub struct SymbolizedFrame {
    pub addr: u64,
    /// Innermost inlined function first
    pub frames: Vec<InlinedFrame>,
}

/// An inlined frame within a resolved frame
#[derive(Debug, Clone)]
pub struct InlinedFrame {
    pub function: String,
    pub location: Option<SourceLocation>,
}

/// Source code location
#[derive(Debug, Clone)]
pub struct SourceLocation {
    pub file: Option<String>,
    pub line: Option<u32>,
    pub column: Option<u32>,
}

impl SymbolizedFrame {
    /// Function names from the outermost inlined caller to the innermost
    #[must_use]
    pub fn names_outer_first(&self) -> Vec<String> {
        self.frames.iter().rev().map(|f| f.function.clone()).collect()
    }

    /// Format the frame for display
    #[must_use]
    pub fn format(&self, frame_num: usize) -> String {
        let mut output = String::new();

        for (idx, inlined) in self.frames.iter().enumerate() {
            let prefix = if idx == 0 { format!("#{frame_num:<2}") } else { "    ".to_string() };

            output.push_str(&format!("{} 0x{:016x} {}", prefix, self.addr, inlined.function));

            if let Some(ref loc) = inlined.location {
                if let Some(ref file) = loc.file {
                    output.push_str(&format!("\n                      at {file}"));
                    if let Some(line) = loc.line {
                        output.push_str(&format!(":{line}"));
                    }
                }
            }

            if idx < self.frames.len() - 1 {
                output.push('\n');
            }
        }

        output
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_demangle_passes_c_names() {
        assert_eq!(Symbolizer::demangle_symbol("ngx_http_lua_run_thread"), "ngx_http_lua_run_thread");
        assert_eq!(
            Symbolizer::demangle_symbol("_ZN6ljprof10aggregator15StackAggregator6insert17h0123456789abcdefE"),
            "ljprof::aggregator::StackAggregator::insert"
        );
    }

    #[test]
    fn test_format_inlined() {
        let frame = SymbolizedFrame {
            addr: 0x1234,
            frames: vec![
                InlinedFrame {
                    function: "inner".to_string(),
                    location: Some(SourceLocation {
                        file: Some("a.c".to_string()),
                        line: Some(7),
                        column: None,
                    }),
                },
                InlinedFrame { function: "outer".to_string(), location: None },
            ],
        };
        let text = frame.format(3);
        assert!(text.starts_with("#3  0x0000000000001234 inner"));
        assert!(text.contains("at a.c:7"));
        assert_eq!(frame.names_outer_first(), vec!["outer", "inner"]);
    }

    #[test]
    fn test_symbolize_own_binary() {
        let exe = std::env::current_exe().unwrap();
        let symbolizer = Symbolizer::new(&exe).unwrap();
        // An address far outside any function still yields a frame
        let frame = symbolizer.resolve(u64::MAX - 1);
        assert_eq!(frame.frames.len(), 1);
    }
}
