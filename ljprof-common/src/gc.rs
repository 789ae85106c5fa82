//! GC object headers and function records.

use crate::layout::FrameLayout;
use crate::memory::{MemoryFault, MemoryReader};
use crate::tagged::TaggedRef;

/// Kind discriminant (`gct`) found in every GC object header.
#[repr(u8)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum GcKind {
    Str = 4,
    Upval = 5,
    Thread = 6,
    Proto = 7,
    Func = 8,
    Trace = 9,
    Cdata = 10,
    Tab = 11,
    Udata = 12,
}

impl GcKind {
    #[must_use]
    pub const fn from_gct(gct: u8) -> Option<Self> {
        Some(match gct {
            4 => Self::Str,
            5 => Self::Upval,
            6 => Self::Thread,
            7 => Self::Proto,
            8 => Self::Func,
            9 => Self::Trace,
            10 => Self::Cdata,
            11 => Self::Tab,
            12 => Self::Udata,
            _ => return None,
        })
    }

    /// Decodes a `TValue` type tag, which stores the kind complemented.
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub const fn from_itype(itype: u32) -> Option<Self> {
        let gct = !itype;
        if gct > u8::MAX as u32 {
            return None;
        }
        Self::from_gct(gct as u8)
    }

    /// The `TValue` type tag for objects of this kind.
    #[must_use]
    pub const fn itype(self) -> u32 {
        !(self as u32)
    }
}

/// Common header of every collectable object.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct GcHeader {
    pub next: TaggedRef,
    pub marked: u8,
    pub gct: u8,
}

impl GcHeader {
    /// # Errors
    /// Returns [`MemoryFault`] when the header is unreadable.
    pub fn read<R: MemoryReader>(
        reader: &R,
        addr: u64,
        layout: &FrameLayout,
    ) -> Result<Self, MemoryFault> {
        Ok(Self {
            next: TaggedRef::new(reader.read_word(addr, layout.ref_size)?),
            marked: reader.read_u8(addr + u64::from(layout.gc_marked()))?,
            gct: reader.read_u8(addr + u64::from(layout.gc_kind))?,
        })
    }

    #[must_use]
    pub const fn kind(&self) -> Option<GcKind> {
        GcKind::from_gct(self.gct)
    }
}

/// Fast function id of interpreted functions.
pub const FF_LUA: u8 = 0;
/// Fast function id of plain C functions.
pub const FF_C: u8 = 1;

/// What a function object executes, selected by its `ffid`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FunctionRecord {
    /// Bytecode function; `proto` is the address of its `GCproto`.
    Interpreted { proto: u64 },
    /// C function; `entry` is the `lua_CFunction` pointer.
    Native { entry: u64 },
    /// Builtin fast function with id `ffid > 1`.
    FastPath { ffid: u8 },
}

impl FunctionRecord {
    /// Reads the function object at `func`.
    ///
    /// The prototype of a bytecode function sits immediately before its
    /// first instruction, so it is found by subtracting `sizeof(GCproto)`
    /// from the function's `pc`.
    ///
    /// # Errors
    /// Returns [`MemoryFault`] on unreadable fields or a null `pc`/entry.
    pub fn read<R: MemoryReader>(
        reader: &R,
        func: u64,
        layout: &FrameLayout,
    ) -> Result<Self, MemoryFault> {
        let ffid = reader.read_u8(func + u64::from(layout.func_ffid))?;
        match ffid {
            FF_LUA => {
                let pc_addr = func + u64::from(layout.func_pc);
                let pc = reader.read_word(pc_addr, layout.ref_size)?;
                let proto = pc
                    .checked_sub(u64::from(layout.proto_size))
                    .filter(|&p| p != 0)
                    .ok_or(MemoryFault::at(pc_addr))?;
                Ok(Self::Interpreted { proto })
            }
            FF_C => {
                let entry_addr = func + u64::from(layout.func_cfunc);
                let entry = reader.read_word(entry_addr, layout.ptr_size)?;
                if entry == 0 {
                    return Err(MemoryFault::at(entry_addr));
                }
                Ok(Self::Native { entry })
            }
            ffid => Ok(Self::FastPath { ffid }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_roundtrip_through_itype() {
        for gct in 4..=12u8 {
            let kind = GcKind::from_gct(gct).unwrap();
            assert_eq!(kind as u8, gct);
            assert_eq!(GcKind::from_itype(kind.itype()), Some(kind));
        }
    }

    #[test]
    fn test_unknown_kinds() {
        assert_eq!(GcKind::from_gct(0), None);
        assert_eq!(GcKind::from_gct(13), None);
        // LJ_TNIL is ~0u, not a GC kind
        assert_eq!(GcKind::from_itype(!0u32), None);
        // Number tags live below ~13u
        assert_eq!(GcKind::from_itype(0x1234), None);
    }
}
