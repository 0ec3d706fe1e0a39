//! RTIO analyzer.
//!
//! A passive recorder of bus activity. The core hands over one
//! [`TraceRecord`] per committed transaction; the analyzer appends it to a
//! fixed-capacity ring buffer. When the buffer is full the oldest unread
//! record is overwritten and the overflow flag is raised. Recording never
//! fails and never pushes back on the core.
//!
//! Records are drained out of band ([`Analyzer::drain`]) and can be
//! serialized into the fixed-size little-endian message format the firmware
//! uploads to a host:
//!
//! ```text
//! header (16 bytes)
//!   [0..4]   record count (u32)
//!   [4]      overflow flag
//!   [5]      message size (32)
//!   [6..8]   reserved
//!   [8..16]  total records ever recorded (u64)
//!
//! message (32 bytes)
//!   [0]      kind: 0 output, 1 input, 2 exception
//!   [1]      status code (exceptions)
//!   [2]      address
//!   [3]      fine timestamp
//!   [4..8]   channel (u32)
//!   [8..16]  coarse timestamp (u64)
//!   [16..24] rtio counter when recorded (u64)
//!   [24..28] data (u32)
//!   [28..32] reserved
//! ```

use std::collections::VecDeque;

use byteorder::{ByteOrder, LittleEndian};

use super::cri::Status;
use super::timestamp::Timestamp;

/// Size of one exported message.
pub const MESSAGE_SIZE: usize = 32;

/// Size of the dump header.
pub const HEADER_SIZE: usize = 16;

/// What a trace record describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TraceKind {
    /// An output event accepted by the core.
    Output,
    /// An input event delivered to a master.
    Input,
    /// A command that ended in an error status.
    Exception(Status),
}

/// One committed transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TraceRecord {
    pub kind: TraceKind,
    pub channel: u32,
    /// Event timestamp (or command timestamp for exceptions).
    pub timestamp: Timestamp,
    /// TSC value when the transaction completed.
    pub rtio_counter: u64,
    pub address: u8,
    pub data: u32,
}

impl TraceRecord {
    /// Serialize into one analyzer message.
    pub fn encode(&self) -> [u8; MESSAGE_SIZE] {
        let mut msg = [0u8; MESSAGE_SIZE];
        let (kind, status) = match self.kind {
            TraceKind::Output => (0, 0),
            TraceKind::Input => (1, 0),
            TraceKind::Exception(status) => (2, status.code()),
        };
        msg[0] = kind;
        msg[1] = status;
        msg[2] = self.address;
        msg[3] = self.timestamp.fine();
        LittleEndian::write_u32(&mut msg[4..8], self.channel);
        LittleEndian::write_u64(&mut msg[8..16], self.timestamp.coarse());
        LittleEndian::write_u64(&mut msg[16..24], self.rtio_counter);
        LittleEndian::write_u32(&mut msg[24..28], self.data);
        msg
    }

    /// Parse one analyzer message. `None` if the kind or status is unknown.
    pub fn decode(msg: &[u8; MESSAGE_SIZE]) -> Option<Self> {
        let kind = match msg[0] {
            0 => TraceKind::Output,
            1 => TraceKind::Input,
            2 => TraceKind::Exception(Status::from_code(msg[1])?),
            _ => return None,
        };
        Some(Self {
            kind,
            channel: LittleEndian::read_u32(&msg[4..8]),
            timestamp: Timestamp::with_fine(LittleEndian::read_u64(&msg[8..16]), msg[3]),
            rtio_counter: LittleEndian::read_u64(&msg[16..24]),
            address: msg[2],
            data: LittleEndian::read_u32(&msg[24..28]),
        })
    }
}

/// Result of draining the analyzer.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AnalyzerDump {
    /// Records, oldest first.
    pub records: Vec<TraceRecord>,
    /// Records were overwritten since the previous drain.
    pub overflow: bool,
    /// Total records ever recorded, including overwritten ones.
    pub total_recorded: u64,
}

impl AnalyzerDump {
    /// Serialize header plus messages.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = vec![0u8; HEADER_SIZE];
        LittleEndian::write_u32(&mut out[0..4], self.records.len() as u32);
        out[4] = self.overflow as u8;
        out[5] = MESSAGE_SIZE as u8;
        LittleEndian::write_u64(&mut out[8..16], self.total_recorded);
        for record in &self.records {
            out.extend_from_slice(&record.encode());
        }
        out
    }
}

/// Ring-buffer trace recorder.
#[derive(Debug, Clone)]
pub struct Analyzer {
    buffer: VecDeque<TraceRecord>,
    capacity: usize,
    overflow: bool,
    enabled: bool,
    total_recorded: u64,
    overwritten: u64,
}

impl Analyzer {
    /// Enabled analyzer holding at most `capacity` records.
    pub fn new(capacity: usize) -> Self {
        Self {
            buffer: VecDeque::with_capacity(capacity),
            capacity,
            overflow: false,
            enabled: true,
            total_recorded: 0,
            overwritten: 0,
        }
    }

    /// Append a record, overwriting the oldest one if full.
    pub fn record(&mut self, record: TraceRecord) {
        if !self.enabled || self.capacity == 0 {
            return;
        }
        if self.buffer.len() == self.capacity {
            self.buffer.pop_front();
            if !self.overflow {
                log::warn!("Analyzer overflow: ring buffer of {} records wrapped", self.capacity);
            }
            self.overflow = true;
            self.overwritten += 1;
        }
        self.buffer.push_back(record);
        self.total_recorded += 1;
    }

    /// Take every buffered record. Clears the overflow flag.
    pub fn drain(&mut self) -> AnalyzerDump {
        let dump = AnalyzerDump {
            records: self.buffer.drain(..).collect(),
            overflow: self.overflow,
            total_recorded: self.total_recorded,
        };
        self.overflow = false;
        dump
    }

    /// Records currently buffered.
    pub fn fill_level(&self) -> usize {
        self.buffer.len()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Whether records were lost since the last drain.
    pub fn overflow(&self) -> bool {
        self.overflow
    }

    /// Records lost to wraparound since the last reset.
    pub fn overwritten(&self) -> u64 {
        self.overwritten
    }

    pub fn total_recorded(&self) -> u64 {
        self.total_recorded
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled;
    }

    /// Peek at buffered records without draining.
    pub fn records(&self) -> impl Iterator<Item = &TraceRecord> {
        self.buffer.iter()
    }

    /// Empty the buffer and clear all counters.
    pub fn reset(&mut self) {
        self.buffer.clear();
        self.overflow = false;
        self.total_recorded = 0;
        self.overwritten = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn output(channel: u32, ts: u64) -> TraceRecord {
        TraceRecord {
            kind: TraceKind::Output,
            channel,
            timestamp: Timestamp::new(ts),
            rtio_counter: ts,
            address: 0,
            data: 1,
        }
    }

    #[test]
    fn test_records_in_order() {
        let mut analyzer = Analyzer::new(4);
        analyzer.record(output(0, 1));
        analyzer.record(output(1, 2));
        assert_eq!(analyzer.fill_level(), 2);
        assert!(!analyzer.overflow());

        let dump = analyzer.drain();
        assert_eq!(dump.records, vec![output(0, 1), output(1, 2)]);
        assert!(!dump.overflow);
        assert_eq!(analyzer.fill_level(), 0);
    }

    #[test]
    fn test_overflow_keeps_newest() {
        let mut analyzer = Analyzer::new(3);
        for ts in 0..5 {
            analyzer.record(output(0, ts));
        }
        assert!(analyzer.overflow());
        assert_eq!(analyzer.fill_level(), 3);
        assert_eq!(analyzer.overwritten(), 2);
        assert_eq!(analyzer.total_recorded(), 5);

        let dump = analyzer.drain();
        let stamps: Vec<u64> = dump.records.iter().map(|r| r.timestamp.coarse()).collect();
        assert_eq!(stamps, vec![2, 3, 4]);
        assert!(dump.overflow);

        // Flag cleared by drain
        assert!(!analyzer.overflow());
    }

    #[test]
    fn test_disabled_records_nothing() {
        let mut analyzer = Analyzer::new(3);
        analyzer.set_enabled(false);
        analyzer.record(output(0, 1));
        assert_eq!(analyzer.fill_level(), 0);
        assert_eq!(analyzer.total_recorded(), 0);
    }

    #[test]
    fn test_message_layout() {
        let record = TraceRecord {
            kind: TraceKind::Exception(Status::Late),
            channel: 0x01_0203,
            timestamp: Timestamp::with_fine(0x1122, 5),
            rtio_counter: 0x3344,
            address: 7,
            data: 0xDEAD_BEEF,
        };
        let msg = record.encode();
        assert_eq!(msg[0], 2);
        assert_eq!(msg[1], Status::Late.code());
        assert_eq!(msg[2], 7);
        assert_eq!(msg[3], 5);
        assert_eq!(&msg[4..8], &[0x03, 0x02, 0x01, 0x00]);
        assert_eq!(&msg[24..28], &[0xEF, 0xBE, 0xAD, 0xDE]);
        assert_eq!(TraceRecord::decode(&msg), Some(record));
    }

    #[test]
    fn test_decode_rejects_unknown_kind() {
        let mut msg = output(0, 1).encode();
        msg[0] = 9;
        assert_eq!(TraceRecord::decode(&msg), None);
    }

    #[test]
    fn test_dump_bytes() {
        let mut analyzer = Analyzer::new(1);
        analyzer.record(output(0, 1));
        analyzer.record(output(0, 2));
        let bytes = analyzer.drain().to_bytes();
        assert_eq!(bytes.len(), HEADER_SIZE + MESSAGE_SIZE);
        assert_eq!(LittleEndian::read_u32(&bytes[0..4]), 1);
        assert_eq!(bytes[4], 1, "overflow flag");
        assert_eq!(bytes[5], MESSAGE_SIZE as u8);
        assert_eq!(LittleEndian::read_u64(&bytes[8..16]), 2);
    }
}
