//! Interpreter layout configuration
//!
//! A [`LayoutConfig`] is the serializable form of [`FrameLayout`]. It comes
//! from a built-in [`LayoutPreset`] or a JSON file where missing fields take
//! their GC64 value:
//!
//! ```json
//! { "proto_size": 112, "proto_chunkname": 72, "proto_firstline": 80 }
//! ```

use ljprof_common::FrameLayout;
use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::domain::LayoutError;

/// Built-in layouts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum LayoutPreset {
    /// 64-bit LuaJIT 2.1 with GC64 (OpenResty default)
    Gc64,
    /// 32-bit LuaJIT
    Lj32,
}

impl LayoutPreset {
    #[must_use]
    pub const fn frame_layout(self) -> FrameLayout {
        match self {
            Self::Gc64 => FrameLayout::GC64,
            Self::Lj32 => FrameLayout::LJ32,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LayoutConfig {
    pub slot_size: u32,
    pub frame_reserve_slots: u32,
    pub ref_size: u32,
    pub ptr_size: u32,
    pub link_offset: u32,
    pub gc_ptr_mask: u64,
    pub state_status: u32,
    pub state_base: u32,
    pub state_top: u32,
    pub state_maxstack: u32,
    pub state_stack: u32,
    pub gc_kind: u32,
    pub func_ffid: u32,
    pub func_pc: u32,
    pub func_cfunc: u32,
    pub proto_size: u32,
    pub proto_chunkname: u32,
    pub proto_firstline: u32,
    pub str_header_size: u32,
}

impl Default for LayoutConfig {
    fn default() -> Self {
        Self::from(&FrameLayout::GC64)
    }
}

impl From<&FrameLayout> for LayoutConfig {
    fn from(layout: &FrameLayout) -> Self {
        Self {
            slot_size: layout.slot_size,
            frame_reserve_slots: layout.frame_reserve_slots,
            ref_size: layout.ref_size,
            ptr_size: layout.ptr_size,
            link_offset: layout.link_offset,
            gc_ptr_mask: layout.gc_ptr_mask,
            state_status: layout.state_status,
            state_base: layout.state_base,
            state_top: layout.state_top,
            state_maxstack: layout.state_maxstack,
            state_stack: layout.state_stack,
            gc_kind: layout.gc_kind,
            func_ffid: layout.func_ffid,
            func_pc: layout.func_pc,
            func_cfunc: layout.func_cfunc,
            proto_size: layout.proto_size,
            proto_chunkname: layout.proto_chunkname,
            proto_firstline: layout.proto_firstline,
            str_header_size: layout.str_header_size,
        }
    }
}

impl LayoutConfig {
    #[must_use]
    pub fn preset(preset: LayoutPreset) -> Self {
        Self::from(&preset.frame_layout())
    }

    /// Load and validate a JSON layout file.
    ///
    /// # Errors
    /// Returns an error if the file is unreadable, malformed or inconsistent
    pub fn from_file(path: &Path) -> Result<Self, LayoutError> {
        let text = std::fs::read_to_string(path)
            .map_err(|source| LayoutError::Read { path: path.display().to_string(), source })?;
        Self::from_json(&text)
    }

    /// # Errors
    /// Returns an error if the JSON is malformed or the layout inconsistent
    pub fn from_json(text: &str) -> Result<Self, LayoutError> {
        let config: Self = serde_json::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Layout selected on the command line: a file wins over a preset,
    /// GC64 when neither is given.
    ///
    /// # Errors
    /// Returns an error if the file cannot be loaded
    pub fn select(file: Option<&Path>, preset: Option<LayoutPreset>) -> Result<Self, LayoutError> {
        match (file, preset) {
            (Some(path), _) => Self::from_file(path),
            (None, Some(preset)) => Ok(Self::preset(preset)),
            (None, None) => Ok(Self::default()),
        }
    }

    /// Checks every field the walker relies on.
    ///
    /// # Errors
    /// Names the first offending field
    pub fn validate(&self) -> Result<(), LayoutError> {
        let invalid = |field: &'static str, reason: String| Err(LayoutError::Invalid { field, reason });

        if self.slot_size != 8 {
            return invalid("slot_size", format!("must be 8, got {}", self.slot_size));
        }
        if self.frame_reserve_slots > 1 {
            return invalid("frame_reserve_slots", format!("must be 0 or 1, got {}", self.frame_reserve_slots));
        }
        for (field, width) in [("ref_size", self.ref_size), ("ptr_size", self.ptr_size)] {
            if width != 4 && width != 8 {
                return invalid(field, format!("must be 4 or 8, got {width}"));
            }
        }
        if self.link_offset + self.ref_size > self.slot_size {
            return invalid("link_offset", format!("{} leaves no room for the link in a slot", self.link_offset));
        }
        if self.gc_ptr_mask == 0 {
            return invalid("gc_ptr_mask", "must not be zero".to_string());
        }
        if self.gc_kind == 0 {
            return invalid("gc_kind", "must follow the mark byte".to_string());
        }
        if self.proto_size == 0 {
            return invalid("proto_size", "must not be zero".to_string());
        }
        for (field, offset) in [("proto_chunkname", self.proto_chunkname), ("proto_firstline", self.proto_firstline)] {
            if offset >= self.proto_size {
                return invalid(field, format!("{offset} is outside a {}-byte prototype", self.proto_size));
            }
        }
        if self.str_header_size == 0 {
            return invalid("str_header_size", "must not be zero".to_string());
        }

        debug_assert!(self.to_frame_layout().is_consistent());
        Ok(())
    }

    #[must_use]
    pub fn to_frame_layout(&self) -> FrameLayout {
        FrameLayout {
            slot_size: self.slot_size,
            frame_reserve_slots: self.frame_reserve_slots,
            ref_size: self.ref_size,
            ptr_size: self.ptr_size,
            link_offset: self.link_offset,
            _padding: 0,
            gc_ptr_mask: self.gc_ptr_mask,
            state_status: self.state_status,
            state_base: self.state_base,
            state_top: self.state_top,
            state_maxstack: self.state_maxstack,
            state_stack: self.state_stack,
            gc_kind: self.gc_kind,
            func_ffid: self.func_ffid,
            func_pc: self.func_pc,
            func_cfunc: self.func_cfunc,
            proto_size: self.proto_size,
            proto_chunkname: self.proto_chunkname,
            proto_firstline: self.proto_firstline,
            str_header_size: self.str_header_size,
            _padding2: 0,
        }
    }
}
