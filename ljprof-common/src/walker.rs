//! Backward traversal of the interpreter's frame chain.
//!
//! The walk starts at the innermost frame (`base - 1 slot`) and follows each
//! frame's link down toward the bottom of the Lua stack. Dummy frames pushed
//! for C calls into the VM and the vararg pseudo-frames are traversed but
//! never reported, so the yielded levels match what `lua_getstack` counts.
//!
//! Every step is one fallible read; an unreadable link, a cursor outside the
//! stack or a link that does not move strictly downward ends the walk. The
//! target keeps running while it is walked, so a short walk is a normal
//! outcome.

use crate::frame::{bc_a, CandidateFrame, FrameKind, FrameLink, ThreadState};
use crate::layout::FrameLayout;
use crate::memory::{MemoryFault, MemoryReader};
use crate::tagged::TaggedRef;

/// Lazy iterator over the real frames of one Lua thread, innermost first.
pub struct FrameWalker<'a, R> {
    reader: &'a R,
    layout: &'a FrameLayout,
    state_addr: u64,
    cursor: u64,
    floor: u64,
    ceiling: u64,
    steps: u32,
    max_steps: u32,
    /// Frames still to be passed over because they belong to a pseudo-frame
    skip: u32,
    /// Real frames still to be passed over before reporting starts
    countdown: u32,
    next_level: u32,
    done: bool,
}

impl<'a, R: MemoryReader> FrameWalker<'a, R> {
    /// Prepares a walk over `state`, visiting at most `max_steps` frames
    /// (real and pseudo alike).
    pub fn new(reader: &'a R, layout: &'a FrameLayout, state: &ThreadState, max_steps: u32) -> Self {
        let slot = u64::from(layout.slot_size);
        let cursor = state.base.checked_sub(slot);
        Self {
            reader,
            layout,
            state_addr: state.addr,
            cursor: cursor.unwrap_or(0),
            floor: state.stack + layout.func_slot_back(),
            ceiling: state.maxstack,
            steps: 0,
            max_steps,
            skip: 0,
            countdown: 0,
            next_level: 0,
            done: cursor.is_none() || state.stack == 0,
        }
    }

    /// Skips the `level` innermost real frames before yielding anything.
    /// Yielded levels still start at 0.
    #[must_use]
    pub fn starting_at_level(mut self, level: u32) -> Self {
        self.countdown = level;
        self
    }

    /// Number of frames visited so far, pseudo-frames included.
    pub fn steps(&self) -> u32 {
        self.steps
    }

    fn frame_link(&self, frame: u64) -> Result<FrameLink, MemoryFault> {
        let addr = frame + u64::from(self.layout.link_offset);
        self.reader
            .read_word(addr, self.layout.ref_size)
            .map(FrameLink)
    }

    fn frame_func(&self, frame: u64) -> Result<u64, MemoryFault> {
        let addr = frame - self.layout.func_slot_back();
        let width = if self.layout.frame_reserve_slots > 0 {
            self.layout.slot_size
        } else {
            self.layout.ref_size
        };
        let slot = TaggedRef::new(self.reader.read_word(addr, width)?);
        Ok(slot.pointer(self.layout.gc_ptr_mask))
    }

    fn previous(&self, frame: u64, link: FrameLink) -> Result<u64, MemoryFault> {
        let back = if link.kind() == FrameKind::Lua {
            let pc = link.pc();
            let ins_addr = pc.checked_sub(4).ok_or(MemoryFault::at(pc))?;
            let ins = self.reader.read_u32(ins_addr)?;
            self.layout.lua_frame_back(bc_a(ins))
        } else {
            link.delta()
        };
        frame.checked_sub(back).ok_or(MemoryFault::at(frame))
    }
}

impl<R: MemoryReader> Iterator for FrameWalker<'_, R> {
    type Item = CandidateFrame;

    fn next(&mut self) -> Option<CandidateFrame> {
        while !self.done && self.steps < self.max_steps && self.cursor > self.floor {
            self.steps += 1;
            let frame = self.cursor;
            if frame > self.ceiling {
                break;
            }

            let (Ok(link), Ok(func)) = (self.frame_link(frame), self.frame_func(frame)) else {
                break;
            };

            // Dummy frames carry the thread itself in the function slot.
            if func == self.state_addr {
                self.skip += 1;
            }

            let found = if self.skip > 0 {
                self.skip -= 1;
                false
            } else if self.countdown > 0 {
                self.countdown -= 1;
                false
            } else {
                true
            };

            // The vararg frame stands for its call; the frame below is skipped
            let kind = link.kind();
            if kind == FrameKind::Varg {
                self.skip += 1;
            }

            match self.previous(frame, link) {
                Ok(prev) if prev < frame => self.cursor = prev,
                _ => self.done = true,
            }

            if found {
                let level = self.next_level;
                self.next_level += 1;
                return Some(CandidateFrame {
                    frame,
                    func,
                    level,
                    kind,
                });
            }
        }
        self.done = true;
        None
    }
}
