//! rtio-emu library
//!
//! Cycle-stepped emulation of an ARTIQ-style real-time I/O system: timestamped
//! commands from a kernel and a DMA engine share one CRI bus to a core that
//! drives a fixed array of channels, while an analyzer records the traffic.

pub mod board;
pub mod config;
pub mod error;
pub mod rtio;
pub mod system;
pub mod testing;

pub use board::{ChannelSpec, PhyKind, SystemConfig};
pub use error::{ConfigError, MonInjError, TraceError};
pub use system::RtioSystem;
