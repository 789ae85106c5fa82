//! Frame model: interpreter thread state, frame links and candidate frames.

use crate::layout::FrameLayout;
use crate::memory::{MemoryFault, MemoryReader};

/// Low bits of a frame link selecting the frame type.
pub const FRAME_TYPE: u64 = 3;
/// Type bits plus the "protected" bit.
pub const FRAME_TYPEP: u64 = 7;

pub const FRAME_LUA: u64 = 0;
pub const FRAME_C: u64 = 1;
pub const FRAME_CONT: u64 = 2;
pub const FRAME_VARG: u64 = 3;
pub const FRAME_CP: u64 = 5;
pub const FRAME_PCALL: u64 = 6;
pub const FRAME_PCALLH: u64 = 7;

/// Classification of a frame from its link word.
#[repr(u8)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum FrameKind {
    /// Called from bytecode; the link is a return PC
    Lua = 0,
    /// Called from C
    C = 1,
    /// Continuation frame of a metamethod call
    Cont = 2,
    /// Vararg pseudo-frame; the real frame of the same call lies below
    Varg = 3,
    /// Protected C call (`lua_cpcall`)
    CPcall = 5,
    /// `pcall`/`xpcall`
    Pcall = 6,
    /// `pcall` with an active hook
    PcallHook = 7,
}

/// The `ftsz`/PC word stored in each frame.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FrameLink(pub u64);

impl FrameLink {
    #[must_use]
    pub const fn kind(self) -> FrameKind {
        // A return PC only guarantees the two low bits
        if self.0 & FRAME_TYPE == FRAME_LUA {
            return FrameKind::Lua;
        }
        match self.0 & FRAME_TYPEP {
            FRAME_CONT => FrameKind::Cont,
            FRAME_VARG => FrameKind::Varg,
            FRAME_CP => FrameKind::CPcall,
            FRAME_PCALL => FrameKind::Pcall,
            FRAME_PCALLH => FrameKind::PcallHook,
            _ => FrameKind::C,
        }
    }

    /// Return PC of an interpreted frame.
    #[must_use]
    pub const fn pc(self) -> u64 {
        self.0
    }

    /// Byte distance to the previous frame for non-interpreted frames.
    #[must_use]
    pub const fn delta(self) -> u64 {
        self.0 & !FRAME_TYPEP
    }
}

/// Extracts the A operand from a bytecode instruction.
#[must_use]
pub const fn bc_a(ins: u32) -> u32 {
    (ins >> 8) & 0xff
}

/// Snapshot of the `lua_State` fields the walker needs.
///
/// Read field by field while the target keeps running, so the values may be
/// mutually inconsistent. The walker bounds-checks everything it derives.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ThreadState {
    /// Address of the `lua_State` itself
    pub addr: u64,
    pub status: u8,
    pub base: u64,
    pub top: u64,
    pub stack: u64,
    pub maxstack: u64,
}

impl ThreadState {
    /// # Errors
    /// Returns [`MemoryFault`] if any field is unreadable or `addr` is null.
    pub fn read<R: MemoryReader>(
        reader: &R,
        addr: u64,
        layout: &FrameLayout,
    ) -> Result<Self, MemoryFault> {
        if addr == 0 {
            return Err(MemoryFault::at(0));
        }
        let field = |offset: u32| addr + u64::from(offset);
        Ok(Self {
            addr,
            status: reader.read_u8(field(layout.state_status))?,
            base: reader.read_word(field(layout.state_base), layout.ptr_size)?,
            top: reader.read_word(field(layout.state_top), layout.ptr_size)?,
            stack: reader.read_word(field(layout.state_stack), layout.ref_size)?,
            maxstack: reader.read_word(field(layout.state_maxstack), layout.ref_size)?,
        })
    }
}

/// A frame the walker considers a real call level.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CandidateFrame {
    /// Address of the frame's link slot
    pub frame: u64,
    /// Function object, already untagged
    pub func: u64,
    /// Call level, 0 for the innermost frame
    pub level: u32,
    /// Kind of the frame at `frame`.
    ///
    /// A vararg call occupies two frames holding the same function: the
    /// `Varg` frame on top and the structural frame it was moved from. The
    /// walker reports the upper one, so such a level carries
    /// [`FrameKind::Varg`] and the address of the vararg frame, while the
    /// structural frame below is passed over.
    pub kind: FrameKind,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_link_classification() {
        assert_eq!(FrameLink(0x5555_0000_1234).kind(), FrameKind::Lua);
        // PCs are 4-byte aligned, so bit 2 may be set on a Lua link
        assert_eq!(FrameLink(0x5555_0000_1234 | 4).kind(), FrameKind::Lua);
        assert_eq!(FrameLink(0x40 | FRAME_C).kind(), FrameKind::C);
        assert_eq!(FrameLink(0x40 | FRAME_CONT).kind(), FrameKind::Cont);
        assert_eq!(FrameLink(0x40 | FRAME_VARG).kind(), FrameKind::Varg);
        assert_eq!(FrameLink(0x40 | FRAME_CP).kind(), FrameKind::CPcall);
        assert_eq!(FrameLink(0x40 | FRAME_PCALL).kind(), FrameKind::Pcall);
        assert_eq!(FrameLink(0x40 | FRAME_PCALLH).kind(), FrameKind::PcallHook);
    }

    #[test]
    fn test_delta_strips_type_bits() {
        assert_eq!(FrameLink(0x58 | FRAME_PCALLH).delta(), 0x58);
        assert_eq!(FrameLink(0x30 | FRAME_VARG).delta(), 0x30);
    }

    #[test]
    fn test_bc_a() {
        // CALL A=5 B=2 C=1 encoded as op | A<<8 | C<<16 | B<<24
        let ins = 0x42 | (5 << 8) | (1 << 16) | (2 << 24);
        assert_eq!(bc_a(ins), 5);
    }
}
