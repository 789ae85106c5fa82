//! In-memory LuaJIT image for walker and resolver tests.
//!
//! Frames are pushed from the bottom of the Lua stack upward; the last frame
//! pushed is the innermost one. Every field is written through the image's
//! [`FrameLayout`], so the same builders produce GC64 and 32-bit stacks.

#![allow(dead_code)]

use ljprof::memory::SnapshotMemory;
use ljprof_common::frame::{FRAME_C, FRAME_VARG};
use ljprof_common::{FrameLayout, GcKind, TaggedRef, ThreadState};

pub const L: u64 = 0x1000;
pub const STACK: u64 = 0x10000;
pub const MAXSTACK: u64 = STACK + 0x800;
const OBJECTS: u64 = 0x20000;
const CODE: u64 = 0x40000;

/// CALL opcode; only its A operand matters to the walker
const BC_CALL: u32 = 0x42;

pub struct LuaImage {
    pub mem: SnapshotMemory,
    pub layout: FrameLayout,
    top_frame: u64,
    next_object: u64,
    next_code: u64,
}

impl LuaImage {
    pub fn new() -> Self {
        Self::with_layout(FrameLayout::GC64)
    }

    pub fn with_layout(layout: FrameLayout) -> Self {
        let mut mem = SnapshotMemory::new();

        // lua_State header
        mem.write_bytes(L, &[0u8; 0x40]);
        mem.write_u8(L + u64::from(layout.gc_kind), GcKind::Thread as u8);

        let mut image = Self { mem, layout, top_frame: 0, next_object: OBJECTS, next_code: CODE };
        // Bottom frame: L in the function slot, never walked
        let bottom = STACK + layout.func_slot_back();
        image.place(bottom, L, GcKind::Thread, 0);
        image
    }

    fn is_gc64(&self) -> bool {
        self.layout.frame_reserve_slots > 0
    }

    fn alloc(&mut self, size: u64) -> u64 {
        let addr = self.next_object;
        self.next_object += size;
        addr
    }

    fn function_header(&mut self, ffid: u8) -> u64 {
        let func = self.alloc(0x40);
        self.mem.write_bytes(func, &[0u8; 0x30]);
        self.mem.write_u8(func + u64::from(self.layout.gc_kind), GcKind::Func as u8);
        self.mem.write_u8(func + u64::from(self.layout.func_ffid), ffid);
        func
    }

    /// Bytecode function defined in `chunk` at `line`
    pub fn lua_function(&mut self, chunk: &[u8], line: i32) -> u64 {
        let func = self.function_header(0);
        let proto = self.alloc(0x100);
        let name = self.alloc(0x100);

        self.mem.write_u64(name, 0);
        self.mem.write_u8(name + u64::from(self.layout.gc_kind), GcKind::Str as u8);
        self.mem.write_c_str(name + u64::from(self.layout.str_header_size), chunk);

        let ref_size = self.layout.ref_size;
        self.mem.write_word(proto + u64::from(self.layout.proto_chunkname), ref_size, name);
        self.mem.write_i32(proto + u64::from(self.layout.proto_firstline), line);
        let pc = proto + u64::from(self.layout.proto_size);
        self.mem.write_word(func + u64::from(self.layout.func_pc), ref_size, pc);
        func
    }

    pub fn c_function(&mut self, entry: u64) -> u64 {
        let func = self.function_header(1);
        self.mem.write_word(func + u64::from(self.layout.func_cfunc), self.layout.ptr_size, entry);
        func
    }

    pub fn fast_function(&mut self, ffid: u8) -> u64 {
        self.function_header(ffid)
    }

    /// A GC object that is not a function (a table)
    pub fn table(&mut self) -> u64 {
        let table = self.alloc(0x40);
        self.mem.write_bytes(table, &[0u8; 0x10]);
        self.mem.write_u8(table + u64::from(self.layout.gc_kind), GcKind::Tab as u8);
        table
    }

    /// Writes the function slot and link of the frame at `frame`.
    ///
    /// GC64 frames keep a tagged `TValue` one slot below the link; 32-bit
    /// frames hold the function ref and the link in the two halves of one slot.
    fn place(&mut self, frame: u64, func: u64, kind: GcKind, link: u64) -> u64 {
        assert!(frame <= MAXSTACK, "image stack overflow");
        let slot = frame - self.layout.func_slot_back();
        if self.is_gc64() {
            self.mem.write_u64(slot, TaggedRef::gc64(func, kind.itype()).raw);
        } else {
            self.mem.write_word(slot, self.layout.ref_size, func);
        }
        self.mem.write_word(frame + u64::from(self.layout.link_offset), self.layout.ref_size, link);
        self.top_frame = frame;
        frame
    }

    /// Address of the link word of the frame at `frame`
    pub fn link_addr(&self, frame: u64) -> u64 {
        frame + u64::from(self.layout.link_offset)
    }

    /// Frame called from bytecode whose CALL used base register `a`
    pub fn push_lua(&mut self, func: u64, a: u32) -> u64 {
        let pc = self.next_code + 8;
        self.next_code += 16;
        self.mem.write_u32(pc - 4, BC_CALL | (a << 8));
        let frame = self.top_frame + self.layout.lua_frame_back(a);
        self.place(frame, func, GcKind::Func, pc)
    }

    /// Frame linked by a size word: `delta` bytes above the previous frame
    pub fn push_delta(&mut self, func: u64, type_bits: u64, delta: u64) -> u64 {
        assert!(delta >= 16 && delta % 8 == 0);
        let frame = self.top_frame + delta;
        self.place(frame, func, GcKind::Func, delta | type_bits)
    }

    /// C frame carrying the thread itself, as pushed by `lua_call` from C
    pub fn push_dummy(&mut self, delta: u64) -> u64 {
        let frame = self.top_frame + delta;
        self.place(frame, L, GcKind::Thread, delta | FRAME_C)
    }

    pub fn push_varg(&mut self, func: u64, delta: u64) -> u64 {
        self.push_delta(func, FRAME_VARG, delta)
    }

    /// Writes the `lua_State` fields and reads them back
    pub fn finish(&mut self) -> ThreadState {
        let base = self.top_frame + u64::from(self.layout.slot_size);
        let (ptr, gcref) = (self.layout.ptr_size, self.layout.ref_size);
        self.mem.write_u8(L + u64::from(self.layout.state_status), 0);
        self.mem.write_word(L + u64::from(self.layout.state_base), ptr, base);
        self.mem.write_word(L + u64::from(self.layout.state_top), ptr, base + 0x20);
        self.mem.write_word(L + u64::from(self.layout.state_maxstack), gcref, MAXSTACK);
        self.mem.write_word(L + u64::from(self.layout.state_stack), gcref, STACK);
        ThreadState::read(&self.mem, L, &self.layout).unwrap()
    }
}
