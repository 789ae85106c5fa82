//! Tagged GC references.
//!
//! GC64 builds overlay an internal type tag (`itype`) on the bits above a
//! 47-bit pointer. 32-bit builds keep the tag in the word next to the
//! reference; reading that pair as one little-endian `u64` puts the pointer in
//! the low half and the tag in the high half, so both schemes decode through
//! the same mask.

/// Shift of the `itype` tag in a GC64 `TValue`.
pub const GC64_TAG_SHIFT: u32 = 47;

/// A raw machine word holding a pointer and possibly a type tag.
#[repr(transparent)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct TaggedRef {
    pub raw: u64,
}

impl TaggedRef {
    #[must_use]
    pub const fn new(raw: u64) -> Self {
        Self { raw }
    }

    /// Builds a GC64 `TValue` carrying `ptr` with tag `itype`.
    #[must_use]
    pub const fn gc64(ptr: u64, itype: u32) -> Self {
        Self {
            raw: ptr | ((itype as u64) << GC64_TAG_SHIFT),
        }
    }

    /// Builds a 32-bit `TValue` (`gcr` low word, `it` high word).
    #[must_use]
    pub const fn split(ptr: u32, itype: u32) -> Self {
        Self {
            raw: (ptr as u64) | ((itype as u64) << 32),
        }
    }

    /// Pointer bits selected by `mask`.
    #[must_use]
    pub const fn pointer(self, mask: u64) -> u64 {
        self.raw & mask
    }

    /// The internal type tag. `wide` selects the GC64 scheme.
    ///
    /// GC64 tags are sign-extended from bit 47 so they compare equal to the
    /// `~kind` constants LuaJIT uses.
    #[must_use]
    #[allow(clippy::cast_possible_truncation, clippy::cast_possible_wrap, clippy::cast_sign_loss)]
    pub const fn tag(self, wide: bool) -> u32 {
        if wide {
            ((self.raw as i64) >> GC64_TAG_SHIFT) as u32
        } else {
            (self.raw >> 32) as u32
        }
    }

    #[must_use]
    pub const fn is_null(self, mask: u64) -> bool {
        self.pointer(mask) == 0
    }
}
