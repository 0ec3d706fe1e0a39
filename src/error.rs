//! Error types for building and loading an RTIO system.
//!
//! Bus-level outcomes (late, sequence error, collision, ...) are not Rust
//! errors. They travel back to masters as [`Status`](crate::rtio::Status)
//! values inside a [`Response`](crate::rtio::Response). The types here cover
//! everything that happens before the first cycle runs: assembling the
//! channel table, reading configuration, decoding DMA command streams.

use thiserror::Error;

use crate::rtio::Timestamp;

/// Errors raised while assembling or validating a system configuration.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// The channel table has no entries.
    #[error("channel table is empty")]
    NoChannels,

    /// More channels than the 24-bit channel field can address.
    #[error("too many channels: {count} (limit {limit})")]
    TooManyChannels {
        /// Number of channels requested.
        count: usize,
        /// Maximum addressable channel count.
        limit: usize,
    },

    /// Global fine timestamp width exceeds what a timestamp can carry.
    #[error("global fine timestamp width {width} exceeds maximum {max}")]
    FineWidthTooLarge {
        /// Requested width in bits.
        width: u8,
        /// Largest supported width.
        max: u8,
    },

    /// A channel asks for more fine timestamp precision than the TSC provides.
    #[error("channel {channel} fine timestamp width {width} exceeds global width {global}")]
    ChannelFineWidth {
        /// Channel index.
        channel: usize,
        /// Channel's requested width.
        width: u8,
        /// Global width.
        global: u8,
    },

    /// More than one log channel was declared.
    #[error("log channel declared twice (channels {first} and {second})")]
    DuplicateLogChannel {
        /// First log channel index.
        first: usize,
        /// Second log channel index.
        second: usize,
    },

    /// A buffer capacity (analyzer, FIFO) of zero.
    #[error("{what} must be non-zero")]
    ZeroCapacity {
        /// Name of the offending parameter.
        what: &'static str,
    },

    /// Unknown board preset name.
    #[error("unknown board '{0}'")]
    UnknownBoard(String),
}

/// Errors raised while decoding or recording a DMA command stream.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TraceError {
    /// A record header or payload runs past the end of the buffer.
    #[error("record at offset {offset} is truncated")]
    Truncated {
        /// Byte offset of the record start.
        offset: usize,
    },

    /// Record length is shorter than the header or not word-aligned.
    #[error("record at offset {offset} has invalid length {length}")]
    BadLength {
        /// Byte offset of the record start.
        offset: usize,
        /// Length byte found.
        length: u8,
    },

    /// The stream ended without the zero-length terminator.
    #[error("stream is missing its terminator")]
    MissingTerminator,

    /// Channel number does not fit in 24 bits.
    #[error("channel {0} does not fit the 24-bit channel field")]
    ChannelOutOfRange(u32),

    /// Payload too large to fit in one record.
    #[error("payload of {words} words does not fit in one record")]
    PayloadTooLarge {
        /// Number of data words.
        words: usize,
    },

    /// Timestamp too large to pack into 64-bit machine units.
    #[error("timestamp {0} does not fit in 64-bit machine units")]
    TimestampOverflow(Timestamp),

    /// Only output commands can be recorded.
    #[error("only output writes can be recorded into a DMA stream")]
    NotAnOutput,
}

/// Errors from the monitor/injection control plane.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum MonInjError {
    /// Channel index outside the channel table.
    #[error("no channel {0}")]
    NoSuchChannel(usize),

    /// The channel's phy has nothing to monitor.
    #[error("channel {0} has no probe")]
    NotProbed(usize),

    /// The channel's phy cannot be overridden.
    #[error("channel {0} does not support level override")]
    NotOverridable(usize),
}
