//! Resolution of candidate frames into displayable records.

use crate::frame::CandidateFrame;
use crate::gc::{FunctionRecord, GcHeader, GcKind};
use crate::layout::FrameLayout;
use crate::memory::{MemoryFault, MemoryReader};

/// Capacity of the chunk name buffer, terminator included.
pub const FUNC_NAME_LEN: usize = 64;

/// What a resolved frame describes.
#[repr(u8)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum FuncKind {
    Unresolved = 0,
    Lua = 1,
    C = 2,
    Fast = 3,
}

impl FuncKind {
    #[must_use]
    pub const fn from_raw(raw: u8) -> Self {
        match raw {
            1 => Self::Lua,
            2 => Self::C,
            3 => Self::Fast,
            _ => Self::Unresolved,
        }
    }
}

/// One resolved call level.
///
/// Flat so it can be copied out of the kernel as-is. Which fields carry
/// meaning depends on [`FuncKind`]; use [`ResolvedFrame::display`] to read it.
#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ResolvedFrame {
    pub level: u32,
    /// First line of the function definition (Lua frames)
    pub line: i32,
    /// C function entry point (C frames)
    pub addr: u64,
    /// Raw [`FuncKind`]
    pub kind: u8,
    /// Builtin id (fast functions)
    pub ffid: u8,
    /// Bytes of `name` before the terminator
    pub name_len: u8,
    pub _padding: [u8; 5],
    /// Chunk name, NUL-terminated (Lua frames)
    pub name: [u8; FUNC_NAME_LEN],
}

/// Borrowed view of a [`ResolvedFrame`]'s meaningful fields.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FrameDisplay<'a> {
    Source { chunk: &'a [u8], line: i32 },
    Native { addr: u64 },
    Builtin { ffid: u8 },
    Unresolved,
}

impl ResolvedFrame {
    #[must_use]
    pub const fn unresolved(level: u32) -> Self {
        Self {
            level,
            line: 0,
            addr: 0,
            kind: FuncKind::Unresolved as u8,
            ffid: 0,
            name_len: 0,
            _padding: [0; 5],
            name: [0; FUNC_NAME_LEN],
        }
    }

    /// A Lua frame; `chunk` is truncated to fit the name buffer.
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub fn lua(level: u32, chunk: &[u8], line: i32) -> Self {
        let mut frame = Self::unresolved(level);
        let len = chunk.len().min(FUNC_NAME_LEN - 1);
        frame.name[..len].copy_from_slice(&chunk[..len]);
        frame.name_len = len as u8;
        frame.line = line;
        frame.kind = FuncKind::Lua as u8;
        frame
    }

    #[must_use]
    pub const fn native(level: u32, addr: u64) -> Self {
        let mut frame = Self::unresolved(level);
        frame.addr = addr;
        frame.kind = FuncKind::C as u8;
        frame
    }

    #[must_use]
    pub const fn builtin(level: u32, ffid: u8) -> Self {
        let mut frame = Self::unresolved(level);
        frame.ffid = ffid;
        frame.kind = FuncKind::Fast as u8;
        frame
    }

    #[must_use]
    pub const fn kind(&self) -> FuncKind {
        FuncKind::from_raw(self.kind)
    }

    /// Chunk name bytes without the terminator.
    #[must_use]
    pub fn chunk_name(&self) -> &[u8] {
        let len = usize::from(self.name_len).min(FUNC_NAME_LEN - 1);
        &self.name[..len]
    }

    #[must_use]
    pub fn display(&self) -> FrameDisplay<'_> {
        match self.kind() {
            FuncKind::Lua => FrameDisplay::Source {
                chunk: self.chunk_name(),
                line: self.line,
            },
            FuncKind::C => FrameDisplay::Native { addr: self.addr },
            FuncKind::Fast => FrameDisplay::Builtin { ffid: self.ffid },
            FuncKind::Unresolved => FrameDisplay::Unresolved,
        }
    }
}

impl Default for ResolvedFrame {
    fn default() -> Self {
        Self::unresolved(0)
    }
}

/// Turns candidate frames into [`ResolvedFrame`]s.
pub struct FunctionResolver<'a, R> {
    reader: &'a R,
    layout: &'a FrameLayout,
}

impl<'a, R: MemoryReader> FunctionResolver<'a, R> {
    pub fn new(reader: &'a R, layout: &'a FrameLayout) -> Self {
        Self { reader, layout }
    }

    /// Resolves `candidate`. Any read failure yields an unresolved frame at
    /// the same level, never partial data.
    pub fn resolve(&self, candidate: &CandidateFrame) -> ResolvedFrame {
        let mut frame = ResolvedFrame::unresolved(candidate.level);
        if self.fill(candidate.func, &mut frame).is_err() {
            frame = ResolvedFrame::unresolved(candidate.level);
        }
        frame
    }

    #[allow(clippy::cast_possible_truncation)]
    fn fill(&self, func: u64, out: &mut ResolvedFrame) -> Result<(), MemoryFault> {
        if func == 0 {
            return Err(MemoryFault::at(0));
        }
        let header = GcHeader::read(self.reader, func, self.layout)?;
        if header.kind() != Some(GcKind::Func) {
            return Err(MemoryFault::at(func));
        }

        match FunctionRecord::read(self.reader, func, self.layout)? {
            FunctionRecord::Interpreted { proto } => {
                let layout = self.layout;
                out.line = self
                    .reader
                    .read_i32(proto + u64::from(layout.proto_firstline))?;
                let chunk_ref = self
                    .reader
                    .read_word(proto + u64::from(layout.proto_chunkname), layout.ref_size)?;
                let chunk = chunk_ref & layout.gc_ptr_mask;
                if chunk == 0 {
                    return Err(MemoryFault::at(proto));
                }
                let len = self
                    .reader
                    .read_c_str(chunk + u64::from(layout.str_header_size), &mut out.name)?;
                out.name_len = len.min(FUNC_NAME_LEN - 1) as u8;
                out.kind = FuncKind::Lua as u8;
            }
            FunctionRecord::Native { entry } => {
                out.addr = entry;
                out.kind = FuncKind::C as u8;
            }
            FunctionRecord::FastPath { ffid } => {
                out.ffid = ffid;
                out.kind = FuncKind::Fast as u8;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lua_frame_truncates_chunk() {
        let long = [b'a'; 100];
        let frame = ResolvedFrame::lua(2, &long, 10);
        assert_eq!(frame.chunk_name().len(), FUNC_NAME_LEN - 1);
        assert_eq!(frame.name[FUNC_NAME_LEN - 1], 0);
        assert_eq!(frame.level, 2);
    }

    #[test]
    fn test_display_variants() {
        assert_eq!(
            ResolvedFrame::lua(0, b"@a.lua", 3).display(),
            FrameDisplay::Source {
                chunk: b"@a.lua",
                line: 3
            }
        );
        assert_eq!(
            ResolvedFrame::native(1, 0x4000).display(),
            FrameDisplay::Native { addr: 0x4000 }
        );
        assert_eq!(
            ResolvedFrame::builtin(1, 21).display(),
            FrameDisplay::Builtin { ffid: 21 }
        );
        assert_eq!(ResolvedFrame::default().display(), FrameDisplay::Unresolved);
    }

    #[test]
    fn test_unknown_kind_is_unresolved() {
        let mut frame = ResolvedFrame::native(0, 1);
        frame.kind = 9;
        assert_eq!(frame.kind(), FuncKind::Unresolved);
    }
}
