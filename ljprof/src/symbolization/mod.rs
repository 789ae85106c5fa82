//! # Native Symbol Resolution and Address Translation
//!
//! Converts the raw instruction pointers of sampled native stacks into
//! function names, so the native part of each folded stack is readable next
//! to its Lua frames.
//!
//! ## Lookup order
//!
//! 1. **DWARF** (`addr2line` over `gimli`, sections loaded with `object`):
//!    function, file, line and inlined callers
//! 2. **ELF symbol table**: nearest preceding function symbol, for binaries
//!    shipped without debug info
//!
//! ## PIE / ASLR
//!
//! Stack traces hold runtime addresses, symbol tables hold link-time
//! addresses. For position-independent binaries the runtime base is taken
//! from `/proc/<pid>/maps`:
//!
//! ```text
//! File Offset = Runtime Address - Base Address
//! ```
//!
//! Non-PIE executables are looked up unchanged.
//!
//! ## Module Structure
//!
//! - **`symbolizer`**: DWARF + symbol table lookup with a per-address cache
//! - **`memory_maps`**: `/proc/<pid>/maps` parsing

pub mod memory_maps;
pub mod symbolizer;

pub use memory_maps::{memory_range_in, parse_memory_maps, MemoryRange};
pub use symbolizer::{InlinedFrame, SourceLocation, SymbolizedFrame, Symbolizer};
