//! Opaque voice identifiers.
//!
//! Layout of the 32-bit value:
//! - bits 0..12: slot index + 1 (0 means "no voice")
//! - bits 12..32: play index of the voice at the time the handle was issued
//!
//! Values carrying the `0xFFFFF000` prefix name a voice group instead, with the group
//! index in the low 12 bits.

use std::fmt;

use crate::constants::{PLAY_INDEX_BITS, PLAY_INDEX_MASK, VOICE_GROUP_PREFIX};

const SLOT_MASK: u32 = (1 << (32 - PLAY_INDEX_BITS)) - 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Handle(u32);

impl Handle {
    /// The null handle. Also the handle of the implicit root bus.
    pub const NULL: Handle = Handle(0);

    pub const fn from_raw(raw: u32) -> Self {
        Self(raw)
    }

    pub const fn raw(self) -> u32 {
        self.0
    }

    pub const fn is_null(self) -> bool {
        self.0 == 0
    }

    /// Handle for a voice living in `slot`, started with `play_index`.
    pub const fn for_voice(slot: usize, play_index: u32) -> Self {
        Self((slot as u32 + 1) | ((play_index & PLAY_INDEX_MASK) << (32 - PLAY_INDEX_BITS)))
    }

    pub const fn for_group(index: usize) -> Self {
        Self(VOICE_GROUP_PREFIX | (index as u32 & SLOT_MASK))
    }

    pub const fn is_group(self) -> bool {
        self.0 & VOICE_GROUP_PREFIX == VOICE_GROUP_PREFIX
    }

    pub fn group_index(self) -> Option<usize> {
        self.is_group().then_some((self.0 & SLOT_MASK) as usize)
    }

    /// Slot index encoded in a voice handle. `None` for null and group handles.
    pub fn slot(self) -> Option<usize> {
        if self.is_group() {
            return None;
        }
        match self.0 & SLOT_MASK {
            0 => None,
            n => Some(n as usize - 1),
        }
    }

    /// The 20-bit play index half of a voice handle.
    pub const fn play_index(self) -> u32 {
        self.0 >> (32 - PLAY_INDEX_BITS)
    }
}

impl fmt::Display for Handle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(group) = self.group_index() {
            write!(f, "group#{group}")
        } else if let Some(slot) = self.slot() {
            write!(f, "voice#{slot}@{}", self.play_index())
        } else {
            write!(f, "null")
        }
    }
}
