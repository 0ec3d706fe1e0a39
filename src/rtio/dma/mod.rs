//! DMA command streams.
//!
//! A DMA stream is a pre-recorded, time-ordered list of output writes laid
//! out as variable-length little-endian records:
//!
//! ```text
//! [0]       record length in bytes, including this byte (0 terminates the stream)
//! [1..4]    channel (u24)
//! [4..12]   timestamp in machine units (u64)
//! [12]      phy register address
//! [13..]    data, u32 words
//! ```
//!
//! [`DmaRecorder`] builds streams from commands, [`decode_stream`] parses
//! them back. The [`engine`] replays a decoded stream onto the bus.
//!
//! # Usage
//!
//! ```ignore
//! use rtio_emu::rtio::dma::DmaRecorder;
//!
//! let mut rec = DmaRecorder::new(3);
//! rec.output(0, Timestamp::new(100), 1)?;
//! rec.output(0, Timestamp::new(200), 0)?;
//! let stream = rec.finish();
//! ```

pub mod engine;

pub use engine::{DmaEngine, DmaError, DmaState, DmaStats};

use std::io::{Cursor, Read};

use byteorder::{LittleEndian, ReadBytesExt};

use super::cri::{Command, OpKind, Payload};
use super::timestamp::Timestamp;
use crate::error::TraceError;

/// Bytes before the data words.
pub const RECORD_HEADER_SIZE: usize = 13;

/// Most data words a single record can carry.
pub const MAX_RECORD_WORDS: usize = (u8::MAX as usize - RECORD_HEADER_SIZE) / 4;

const MAX_STREAM_CHANNEL: u32 = (1 << 24) - 1;

/// Builds a DMA stream from output commands.
#[derive(Debug, Clone)]
pub struct DmaRecorder {
    fine_ts_width: u8,
    buffer: Vec<u8>,
    records: usize,
}

impl DmaRecorder {
    /// Recorder for a system with the given global fine timestamp width.
    pub fn new(fine_ts_width: u8) -> Self {
        Self {
            fine_ts_width,
            buffer: Vec::new(),
            records: 0,
        }
    }

    /// Append one output command.
    pub fn record(&mut self, command: &Command) -> Result<(), TraceError> {
        if command.op != OpKind::Output {
            return Err(TraceError::NotAnOutput);
        }
        if command.channel > MAX_STREAM_CHANNEL {
            return Err(TraceError::ChannelOutOfRange(command.channel));
        }
        if command.data.len() > MAX_RECORD_WORDS {
            return Err(TraceError::PayloadTooLarge { words: command.data.len() });
        }

        let raw = command
            .timestamp
            .checked_to_mu(self.fine_ts_width)
            .ok_or(TraceError::TimestampOverflow(command.timestamp))?;

        let length = (RECORD_HEADER_SIZE + 4 * command.data.len()) as u8;
        let buf = &mut self.buffer;
        buf.push(length);
        buf.extend_from_slice(&command.channel.to_le_bytes()[..3]);
        buf.extend_from_slice(&raw.to_le_bytes());
        buf.push(command.address);
        for &word in &command.data {
            buf.extend_from_slice(&word.to_le_bytes());
        }
        self.records += 1;
        Ok(())
    }

    /// Append a single-word write to address 0.
    pub fn output(&mut self, channel: u32, timestamp: Timestamp, value: u32) -> Result<(), TraceError> {
        self.record(&Command::output(channel, timestamp, value))
    }

    /// Records written so far.
    pub fn len(&self) -> usize {
        self.records
    }

    pub fn is_empty(&self) -> bool {
        self.records == 0
    }

    /// Terminate and return the stream.
    pub fn finish(mut self) -> Vec<u8> {
        self.buffer.push(0);
        self.buffer
    }
}

/// Parse a terminated DMA stream into output commands.
///
/// Timestamps are offset by `offset` whole cycles, the way a playback
/// started at the kernel's current time shifts a recording.
pub fn decode_stream(data: &[u8], fine_ts_width: u8, offset: u64) -> Result<Vec<Command>, TraceError> {
    let mut cursor = Cursor::new(data);
    let mut commands = Vec::new();

    loop {
        let start = cursor.position() as usize;
        let length = cursor
            .read_u8()
            .map_err(|_| TraceError::MissingTerminator)?;
        if length == 0 {
            break;
        }
        let len = length as usize;
        if len < RECORD_HEADER_SIZE || (len - RECORD_HEADER_SIZE) % 4 != 0 {
            return Err(TraceError::BadLength { offset: start, length });
        }
        if start + len > data.len() {
            return Err(TraceError::Truncated { offset: start });
        }

        let truncated = |_| TraceError::Truncated { offset: start };
        let channel = cursor.read_u24::<LittleEndian>().map_err(truncated)?;
        let raw = cursor.read_u64::<LittleEndian>().map_err(truncated)?;
        let address = cursor.read_u8().map_err(truncated)?;

        let mut words = vec![0u8; len - RECORD_HEADER_SIZE];
        cursor.read_exact(&mut words).map_err(truncated)?;
        let payload: Payload = words
            .chunks_exact(4)
            .map(|w| u32::from_le_bytes([w[0], w[1], w[2], w[3]]))
            .collect();

        let timestamp = Timestamp::from_mu(raw, fine_ts_width).saturating_add_cycles(offset);
        log::trace!("DMA record @{}: ch{} ts={} addr={} words={}", start, channel, timestamp, address, payload.len());
        commands.push(Command::output_wide(channel, timestamp, address, payload));
    }

    Ok(commands)
}
