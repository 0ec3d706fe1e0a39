//! Timestamps and the global timestamp counter (TSC).
//!
//! A timestamp is split into a coarse part, counted in core cycles, and a
//! fine part that resolves events inside a cycle. The global fine width is
//! fixed when the system is built (3 bits on the EBAZ4205 gateware, i.e. 8
//! fine steps per 10 ns cycle). Ordering is lexicographic: coarse first, then
//! fine.
//!
//! The raw "machine unit" form packs both parts into one integer:
//!
//! ```text
//!  63                      fine_width      0
//! ┌──────────────────────────┬─────────────┐
//! │          coarse          │    fine     │
//! └──────────────────────────┴─────────────┘
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;

/// Largest supported fine timestamp width in bits.
pub const MAX_FINE_TS_WIDTH: u8 = 8;

/// A coarse/fine timestamp.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
pub struct Timestamp {
    coarse: u64,
    #[serde(default)]
    fine: u8,
}

impl Timestamp {
    /// Timestamp at the start of a core cycle.
    pub const fn new(coarse: u64) -> Self {
        Self { coarse, fine: 0 }
    }

    /// Timestamp with an explicit fine component.
    pub const fn with_fine(coarse: u64, fine: u8) -> Self {
        Self { coarse, fine }
    }

    /// Split a raw machine-unit value using the given fine width.
    pub fn from_mu(raw: u64, fine_width: u8) -> Self {
        let fine_width = fine_width.min(MAX_FINE_TS_WIDTH);
        Self {
            coarse: raw >> fine_width,
            fine: (raw & fine_mask(fine_width)) as u8,
        }
    }

    /// Pack into a raw machine-unit value.
    ///
    /// Fine bits above `fine_width` are discarded.
    pub fn to_mu(self, fine_width: u8) -> u64 {
        let fine_width = fine_width.min(MAX_FINE_TS_WIDTH);
        (self.coarse << fine_width) | (self.fine as u64 & fine_mask(fine_width))
    }

    /// Pack into a raw machine-unit value, or `None` if the coarse part
    /// does not fit above `fine_width` bits.
    pub fn checked_to_mu(self, fine_width: u8) -> Option<u64> {
        let width = fine_width.min(MAX_FINE_TS_WIDTH);
        if self.coarse.leading_zeros() < width as u32 {
            return None;
        }
        Some(self.to_mu(width))
    }

    /// Coarse (cycle) component.
    pub const fn coarse(self) -> u64 {
        self.coarse
    }

    /// Fine (sub-cycle) component.
    pub const fn fine(self) -> u8 {
        self.fine
    }

    /// Reduce the fine part to a channel's precision.
    ///
    /// The fine value is first clipped to the global width, then its low
    /// bits are cleared so that only the top `channel_width` bits remain.
    /// A channel with zero fine width therefore only sees whole cycles.
    pub fn quantize(self, global_width: u8, channel_width: u8) -> Self {
        let global_width = global_width.min(MAX_FINE_TS_WIDTH);
        let channel_width = channel_width.min(global_width);
        let fine = self.fine as u64 & fine_mask(global_width);
        let drop = global_width - channel_width;
        Self {
            coarse: self.coarse,
            fine: ((fine >> drop) << drop) as u8,
        }
    }

    /// Add whole cycles, saturating at the top of the range.
    pub fn saturating_add_cycles(self, cycles: u64) -> Self {
        Self {
            coarse: self.coarse.saturating_add(cycles),
            fine: self.fine,
        }
    }
}

impl From<u64> for Timestamp {
    fn from(coarse: u64) -> Self {
        Self::new(coarse)
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.fine == 0 {
            write!(f, "{}", self.coarse)
        } else {
            write!(f, "{}.{}", self.coarse, self.fine)
        }
    }
}

fn fine_mask(width: u8) -> u64 {
    (1u64 << width) - 1
}

/// The global timestamp counter.
///
/// Single writer: only the owning system advances or resets it. Everything
/// else reads [`Tsc::now`].
#[derive(Debug, Clone, Default)]
pub struct Tsc {
    value: u64,
}

impl Tsc {
    /// Counter starting at cycle 0.
    pub fn new() -> Self {
        Self::default()
    }

    /// Counter starting at an arbitrary cycle.
    pub fn starting_at(value: u64) -> Self {
        Self { value }
    }

    /// Current cycle.
    pub fn now(&self) -> u64 {
        self.value
    }

    /// Current cycle as a timestamp (fine part zero).
    pub fn now_timestamp(&self) -> Timestamp {
        Timestamp::new(self.value)
    }

    /// Advance by exactly one cycle.
    pub(crate) fn advance(&mut self) {
        self.value = self.value.wrapping_add(1);
    }

    /// Return to cycle 0. Channel state must already be cleared.
    pub(crate) fn reset(&mut self) {
        self.value = 0;
    }
}
