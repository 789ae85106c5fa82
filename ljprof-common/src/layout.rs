//! Interpreter memory layout description.
//!
//! Every offset the walker and resolver dereference comes from a [`FrameLayout`]
//! instead of being compiled in. The layout is a plain `#[repr(C)]` record so
//! userspace can push it into the kernel through a single-entry array map.

/// Byte offsets and widths describing one LuaJIT build.
///
/// All offsets are relative to the start of the named object. Widths are in
/// bytes. Memory is assumed little-endian.
#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FrameLayout {
    /// Size of one stack slot (`TValue`)
    pub slot_size: u32,
    /// Extra slots reserved per frame (1 when frames carry a separate
    /// function slot below the link slot, `LJ_FR2`)
    pub frame_reserve_slots: u32,
    /// Width of `GCRef`/`MRef` fields (8 for GC64, 4 otherwise)
    pub ref_size: u32,
    /// Width of native pointers (`TValue *base`, `lua_CFunction`)
    pub ptr_size: u32,
    /// Offset of the frame link word (`ftsz`/PC) inside the frame slot
    pub link_offset: u32,
    pub _padding: u32,
    /// Mask separating pointer bits from tag bits in a GC reference
    pub gc_ptr_mask: u64,

    // lua_State
    pub state_status: u32,
    pub state_base: u32,
    pub state_top: u32,
    pub state_maxstack: u32,
    pub state_stack: u32,

    /// Offset of the `gct` kind byte in every GC object header
    pub gc_kind: u32,

    // GCfunc
    pub func_ffid: u32,
    pub func_pc: u32,
    pub func_cfunc: u32,

    // GCproto
    /// `sizeof(GCproto)`: bytecode starts right after the prototype
    pub proto_size: u32,
    pub proto_chunkname: u32,
    pub proto_firstline: u32,

    /// `sizeof(GCstr)`: string bytes start right after the header
    pub str_header_size: u32,
    pub _padding2: u32,
}

/// Pointer mask for GC64 builds (47 usable address bits)
pub const GC64_PTR_MASK: u64 = (1 << 47) - 1;

/// Pointer mask for 32-bit builds
pub const LJ32_PTR_MASK: u64 = 0xffff_ffff;

impl FrameLayout {
    /// 64-bit OpenResty LuaJIT 2.1 built with `LJ_GC64` (x86_64, aarch64).
    pub const GC64: Self = Self {
        slot_size: 8,
        frame_reserve_slots: 1,
        ref_size: 8,
        ptr_size: 8,
        link_offset: 0,
        _padding: 0,
        gc_ptr_mask: GC64_PTR_MASK,
        state_status: 11,
        state_base: 32,
        state_top: 40,
        state_maxstack: 48,
        state_stack: 56,
        gc_kind: 9,
        func_ffid: 10,
        func_pc: 32,
        func_cfunc: 40,
        proto_size: 104,
        proto_chunkname: 64,
        proto_firstline: 72,
        str_header_size: 24,
        _padding2: 0,
    };

    /// 32-bit LuaJIT: one-slot frames, function ref in the low word and
    /// the link in the high word of the same slot.
    pub const LJ32: Self = Self {
        slot_size: 8,
        frame_reserve_slots: 0,
        ref_size: 4,
        ptr_size: 4,
        link_offset: 4,
        _padding: 0,
        gc_ptr_mask: LJ32_PTR_MASK,
        state_status: 7,
        state_base: 16,
        state_top: 20,
        state_maxstack: 24,
        state_stack: 28,
        gc_kind: 5,
        func_ffid: 6,
        func_pc: 16,
        func_cfunc: 20,
        proto_size: 64,
        proto_chunkname: 40,
        proto_firstline: 44,
        str_header_size: 20,
        _padding2: 0,
    };

    /// Offset of the mark byte, which sits right before `gct`.
    #[must_use]
    pub const fn gc_marked(&self) -> u32 {
        self.gc_kind.saturating_sub(1)
    }

    /// Distance in bytes from a frame pointer down to its function slot.
    #[must_use]
    pub const fn func_slot_back(&self) -> u64 {
        (self.frame_reserve_slots as u64) * (self.slot_size as u64)
    }

    /// Number of bytes an interpreted frame steps back for a call whose
    /// base register is `a`.
    #[must_use]
    pub const fn lua_frame_back(&self, a: u32) -> u64 {
        (1 + self.frame_reserve_slots as u64 + a as u64) * (self.slot_size as u64)
    }

    /// Structural checks shared by the kernel and userspace.
    #[must_use]
    pub const fn is_consistent(&self) -> bool {
        let widths_ok = (self.ref_size == 4 || self.ref_size == 8)
            && (self.ptr_size == 4 || self.ptr_size == 8);
        widths_ok
            && self.slot_size == 8
            && self.frame_reserve_slots <= 1
            && self.link_offset + self.ref_size <= self.slot_size
            && self.gc_ptr_mask != 0
            && self.gc_kind > 0
            && self.proto_size > 0
            && self.str_header_size > 0
    }
}

impl Default for FrameLayout {
    fn default() -> Self {
        Self::GC64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_presets_are_consistent() {
        assert!(FrameLayout::GC64.is_consistent());
        assert!(FrameLayout::LJ32.is_consistent());
    }

    #[test]
    fn test_gc64_frame_arithmetic() {
        let layout = FrameLayout::GC64;
        assert_eq!(layout.func_slot_back(), 8);
        // CALL with A=3: back over function slot, link slot and 3 registers
        assert_eq!(layout.lua_frame_back(3), 5 * 8);
        assert_eq!(layout.gc_marked(), 8);
    }

    #[test]
    fn test_lj32_function_shares_link_slot() {
        let layout = FrameLayout::LJ32;
        assert_eq!(layout.func_slot_back(), 0);
        assert_eq!(layout.lua_frame_back(0), 8);
    }

    #[test]
    fn test_rejects_link_outside_slot() {
        let layout = FrameLayout {
            link_offset: 6,
            ..FrameLayout::LJ32
        };
        assert!(!layout.is_consistent());
    }
}
