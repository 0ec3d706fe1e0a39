//! Channel phys.
//!
//! A phy is the physical end of a channel. The core drives it with one
//! strobe per output event, never before the event's timestamp, and samples
//! it once per cycle for input events. The bus protocol never looks inside;
//! phys here exist so the emulator has something observable at the edge:
//!
//! - [`Ttl`]: TTL output, input or both (`ttl_simple` / `ttl_serdes` style)
//! - [`LogPhy`]: the diagnostic log channel
//!
//! Phys also carry the monitor/injection hooks used by
//! [`moninj`](crate::rtio::moninj).

pub mod ttl;
pub mod log_channel;

pub use log_channel::LogPhy;
pub use ttl::{Ttl, TTL_ADDR_LEVEL, TTL_ADDR_SENSITIVITY};

use std::fmt;

use super::cri::Payload;
use super::timestamp::Timestamp;
use crate::board::PhyKind;

/// An output event presented to a phy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputEvent {
    /// Event timestamp (already quantized to the channel's precision).
    pub timestamp: Timestamp,
    /// Phy register address.
    pub address: u8,
    /// Data words.
    pub data: Payload,
}

/// An input event reported by a phy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InputEvent {
    /// When the phy saw the event.
    pub timestamp: Timestamp,
    /// Sampled value.
    pub data: u32,
}

/// Record of one strobe, kept by phys for inspection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Strobe {
    /// Cycle the strobe was presented.
    pub cycle: u64,
    /// Timestamp of the event.
    pub timestamp: Timestamp,
    /// Register address.
    pub address: u8,
    /// First data word.
    pub data: u32,
}

/// Interface between the core and a physical driver/sampler.
pub trait Phy: fmt::Debug + Send {
    /// Kind of phy.
    fn kind(&self) -> PhyKind;

    /// Present an output event. Called in the cycle its coarse timestamp
    /// comes due.
    fn strobe(&mut self, cycle: u64, event: &OutputEvent);

    /// Report the next input event seen at or before `cycle`.
    fn sample(&mut self, _cycle: u64) -> Option<InputEvent> {
        None
    }

    /// Feed an event from the outside world. Returns false if the phy has
    /// no input side.
    fn queue_input(&mut self, _event: InputEvent) -> bool {
        false
    }

    /// Current observable value, for monitoring.
    fn probe(&self) -> Option<u32> {
        None
    }

    /// Force (Some) or release (None) the output level. Returns false if
    /// the phy cannot be overridden.
    fn set_override(&mut self, _level: Option<bool>) -> bool {
        false
    }

    /// Active override, if any.
    fn override_level(&self) -> Option<bool> {
        None
    }

    /// Strobes presented so far.
    fn strobes(&self) -> &[Strobe] {
        &[]
    }

    /// Complete text lines received (log channel only).
    fn messages(&self) -> &[String] {
        &[]
    }

    /// Return to power-on state.
    fn reset(&mut self);
}

/// Instantiate the phy for a channel table entry.
pub fn build(kind: PhyKind, name: &str) -> Box<dyn Phy> {
    match kind {
        PhyKind::TtlOut | PhyKind::TtlIn | PhyKind::TtlInOut => Box::new(Ttl::new(kind, name)),
        PhyKind::Log => Box::new(LogPhy::new()),
    }
}
