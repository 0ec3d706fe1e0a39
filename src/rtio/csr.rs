//! Control/status register window.
//!
//! Logical fields only: the emulator does not assign numeric addresses. The
//! window is served by [`RtioSystem::csr_read`](crate::system::RtioSystem::csr_read)
//! and [`RtioSystem::csr_write`](crate::system::RtioSystem::csr_write), and
//! runs outside the tick loop, so reading it never disturbs a cycle.

use std::fmt;

use super::cri::Status;
use crate::board::ChannelCapability;

/// Readable fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CsrRead {
    /// Current TSC value.
    Tsc,
    /// Number of channels.
    ChannelCount,
    /// Capability of one channel.
    ChannelCapability(usize),
    /// Last error status recorded on one channel.
    ChannelLastError(usize),
    /// Records waiting in the analyzer.
    AnalyzerFillLevel,
    /// Analyzer lost records since the last drain.
    AnalyzerOverflow,
    /// Gateware identifier string.
    Ident,
}

/// Value returned by a CSR read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CsrValue {
    Counter(u64),
    Capability(Option<ChannelCapability>),
    LastError(Option<Status>),
    Flag(bool),
    Text(String),
}

impl CsrValue {
    /// Numeric view, where one exists.
    pub fn as_u64(&self) -> Option<u64> {
        match self {
            Self::Counter(v) => Some(*v),
            Self::Flag(f) => Some(*f as u64),
            Self::LastError(s) => Some(s.map_or(0, |s| s.code() as u64)),
            Self::Capability(_) | Self::Text(_) => None,
        }
    }
}

impl fmt::Display for CsrValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Counter(v) => write!(f, "{}", v),
            Self::Capability(Some(c)) => write!(f, "{}", c),
            Self::Capability(None) => write!(f, "-"),
            Self::LastError(Some(s)) => write!(f, "{}", s),
            Self::LastError(None) => write!(f, "none"),
            Self::Flag(b) => write!(f, "{}", b),
            Self::Text(s) => write!(f, "{}", s),
        }
    }
}

/// Writable controls.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CsrWrite {
    /// Reinitialize the whole system: channels, masters, then the TSC.
    Reset,
    /// Start or stop analyzer recording.
    AnalyzerEnable(bool),
    /// Empty the analyzer and clear its flags.
    AnalyzerReset,
    /// Clear one channel's last-error field.
    ClearLastError(usize),
}
