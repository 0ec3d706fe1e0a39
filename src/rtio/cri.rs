//! Command/Response Interface (CRI) types.
//!
//! Masters hand [`Command`]s to the interconnect and get [`Response`]s back.
//! On the bus side every granted command travels as a [`Transaction`] tagged
//! with its originating [`MasterId`] and a sequence tag; the core answers with
//! a [`Completion`] carrying the same pair, which is how the interconnect
//! routes the response home.
//!
//! # Master slot state machine
//!
//! ```text
//!           submit()            granted             completed
//!   Idle ────────────► AwaitingGrant ────► AwaitingCompletion ────► Idle
//!    ▲                                                           (response parked
//!    └──────────────────── poll_response() ◄──────────────────── until polled)
//! ```
//!
//! A slot holds one command at a time. An unread response still counts as
//! outstanding, so `submit` is rejected until the master has polled it.

use std::fmt;

use serde::{Deserialize, Serialize};
use smallvec::SmallVec;
use thiserror::Error;

use super::timestamp::Timestamp;

/// Output data words. Most phys take a single word; wide phys and the log
/// channel take several.
pub type Payload = SmallVec<[u32; 4]>;

/// Operation requested by a command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OpKind {
    /// Schedule an output event at the command timestamp.
    Output,
    /// Read the next input event; waits until one arrives.
    InputRead,
    /// Read the next input event; gives up at the command timestamp.
    InputReadWithTimeout,
}

impl fmt::Display for OpKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Output => write!(f, "output"),
            Self::InputRead => write!(f, "input"),
            Self::InputReadWithTimeout => write!(f, "input_timeout"),
        }
    }
}

/// A command submitted by a master.
///
/// Ownership moves into the master on `submit` and from there to the core,
/// which consumes it exactly once.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command {
    /// Target channel index.
    pub channel: u32,
    /// Event time for outputs; deadline for `InputReadWithTimeout`.
    pub timestamp: Timestamp,
    /// What to do.
    pub op: OpKind,
    /// Phy register address (outputs only).
    pub address: u8,
    /// Data words (outputs only).
    pub data: Payload,
    /// Optional batch count. Carried end to end, not interpreted by the core.
    pub replication: Option<u32>,
}

impl Command {
    /// Single-word output write to address 0.
    pub fn output(channel: u32, timestamp: Timestamp, value: u32) -> Self {
        let mut data = Payload::new();
        data.push(value);
        Self::output_wide(channel, timestamp, 0, data)
    }

    /// Output write with an explicit address and any number of data words.
    pub fn output_wide(channel: u32, timestamp: Timestamp, address: u8, data: Payload) -> Self {
        Self {
            channel,
            timestamp,
            op: OpKind::Output,
            address,
            data,
            replication: None,
        }
    }

    /// Input read without deadline.
    pub fn input_read(channel: u32) -> Self {
        Self {
            channel,
            timestamp: Timestamp::default(),
            op: OpKind::InputRead,
            address: 0,
            data: Payload::new(),
            replication: None,
        }
    }

    /// Input read that returns `NoData` once the TSC reaches `timeout`.
    pub fn input_read_timeout(channel: u32, timeout: Timestamp) -> Self {
        Self {
            timestamp: timeout,
            op: OpKind::InputReadWithTimeout,
            ..Self::input_read(channel)
        }
    }

    /// A text message for the log channel.
    ///
    /// Bytes are packed four per word, little-endian, NUL-terminated and
    /// padded to a whole word.
    pub fn log_message(channel: u32, timestamp: Timestamp, message: &str) -> Self {
        let mut bytes = message.as_bytes().to_vec();
        bytes.push(0);
        while bytes.len() % 4 != 0 {
            bytes.push(0);
        }
        let data = bytes
            .chunks_exact(4)
            .map(|w| u32::from_le_bytes([w[0], w[1], w[2], w[3]]))
            .collect();
        Self::output_wide(channel, timestamp, 0, data)
    }

    /// Attach a replication count.
    pub fn with_replication(mut self, count: u32) -> Self {
        self.replication = Some(count);
        self
    }

    /// First data word, or 0 if there is none.
    pub fn first_word(&self) -> u32 {
        self.data.first().copied().unwrap_or(0)
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.op {
            OpKind::Output => write!(
                f,
                "output(ch={}, ts={}, addr={}, data=0x{:x})",
                self.channel,
                self.timestamp,
                self.address,
                self.first_word()
            ),
            OpKind::InputRead => write!(f, "input(ch={})", self.channel),
            OpKind::InputReadWithTimeout => {
                write!(f, "input(ch={}, timeout={})", self.channel, self.timestamp)
            }
        }
    }
}

/// Outcome of a command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Status {
    /// Command executed.
    Ok,
    /// Channel cannot take the command right now (FIFO full, read pending).
    ChannelBusy,
    /// Output timestamp earlier than the last one accepted on the channel.
    SequenceError,
    /// Output timestamp already in the past. Event dropped.
    Late,
    /// Channel does not exist or does not support the operation.
    Collision,
    /// Input read timed out with nothing received.
    NoData,
    /// Input events were lost on the channel since the last read.
    Overflow,
}

impl Status {
    /// Whether the command executed.
    pub fn is_ok(self) -> bool {
        self == Self::Ok
    }

    /// Whether this status marks a driver or configuration problem.
    ///
    /// `NoData` is an expected outcome of polling and `ChannelBusy` is
    /// transient, so neither counts.
    pub fn is_error(self) -> bool {
        matches!(self, Self::SequenceError | Self::Late | Self::Collision | Self::Overflow)
    }

    /// Small numeric code used in analyzer dumps.
    pub fn code(self) -> u8 {
        match self {
            Self::Ok => 0,
            Self::ChannelBusy => 1,
            Self::SequenceError => 2,
            Self::Late => 3,
            Self::Collision => 4,
            Self::NoData => 5,
            Self::Overflow => 6,
        }
    }

    /// Inverse of [`Status::code`].
    pub fn from_code(code: u8) -> Option<Self> {
        Some(match code {
            0 => Self::Ok,
            1 => Self::ChannelBusy,
            2 => Self::SequenceError,
            3 => Self::Late,
            4 => Self::Collision,
            5 => Self::NoData,
            6 => Self::Overflow,
            _ => return None,
        })
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Ok => "ok",
            Self::ChannelBusy => "channel-busy",
            Self::SequenceError => "sequence-error",
            Self::Late => "late",
            Self::Collision => "collision",
            Self::NoData => "no-data",
            Self::Overflow => "overflow",
        };
        f.write_str(name)
    }
}

/// Answer to a command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Response {
    /// Outcome.
    pub status: Status,
    /// Sampled data for successful input reads.
    pub data: Option<u32>,
    /// Execution timestamp for outputs, event timestamp for inputs,
    /// completion cycle for failures and timeouts.
    pub timestamp: Timestamp,
}

impl Response {
    pub fn ok(timestamp: Timestamp) -> Self {
        Self { status: Status::Ok, data: None, timestamp }
    }

    pub fn input(data: u32, timestamp: Timestamp) -> Self {
        Self { status: Status::Ok, data: Some(data), timestamp }
    }

    pub fn failed(status: Status, timestamp: Timestamp) -> Self {
        Self { status, data: None, timestamp }
    }
}

impl fmt::Display for Response {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.data {
            Some(data) => write!(f, "{} data=0x{:x} @ {}", self.status, data, self.timestamp),
            None => write!(f, "{} @ {}", self.status, self.timestamp),
        }
    }
}

/// Master identity. Also its arbitration priority: lower wins.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct MasterId(pub usize);

impl fmt::Display for MasterId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "master{}", self.0)
    }
}

/// A granted command on its way to the core.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transaction {
    /// Originating master.
    pub master: MasterId,
    /// Interconnect-assigned tag, unique per transaction.
    pub tag: u64,
    /// The command itself.
    pub command: Command,
}

/// The core's answer to a transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Completion {
    pub master: MasterId,
    pub tag: u64,
    pub response: Response,
}

/// Rejection from [`MasterSlot::submit`].
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SubmitError {
    /// A command is in flight or its response has not been read yet.
    #[error("{0} already has a command outstanding")]
    Busy(MasterId),
}

/// Result of polling a master for its response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollResult {
    /// The response to the outstanding command.
    Ready(Response),
    /// A command is outstanding; try again next cycle.
    Pending,
    /// Nothing was submitted.
    Idle,
}

impl PollResult {
    /// The response, if ready.
    pub fn ready(self) -> Option<Response> {
        match self {
            Self::Ready(response) => Some(response),
            _ => None,
        }
    }
}

/// State of a master's single in-flight slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SlotState {
    #[default]
    Idle,
    AwaitingGrant,
    AwaitingCompletion,
}

/// The single in-flight command slot every master owns.
///
/// The slot is the only thing the interconnect touches on a master: it takes
/// the pending command out on grant and delivers the completion back in.
#[derive(Debug, Clone)]
pub struct MasterSlot {
    id: MasterId,
    state: SlotState,
    command: Option<Command>,
    tag: Option<u64>,
    response: Option<Response>,
}

impl MasterSlot {
    pub fn new(id: MasterId) -> Self {
        Self {
            id,
            state: SlotState::Idle,
            command: None,
            tag: None,
            response: None,
        }
    }

    pub fn id(&self) -> MasterId {
        self.id
    }

    pub fn state(&self) -> SlotState {
        self.state
    }

    /// Whether a command is waiting for a grant.
    pub fn has_request(&self) -> bool {
        self.state == SlotState::AwaitingGrant
    }

    /// Whether a new command can be submitted.
    pub fn is_free(&self) -> bool {
        self.state == SlotState::Idle && self.response.is_none()
    }

    /// Queue a command for arbitration.
    pub fn submit(&mut self, command: Command) -> Result<(), SubmitError> {
        if !self.is_free() {
            return Err(SubmitError::Busy(self.id));
        }
        self.command = Some(command);
        self.state = SlotState::AwaitingGrant;
        Ok(())
    }

    /// Retrieve the response, freeing the slot.
    pub fn poll_response(&mut self) -> PollResult {
        if let Some(response) = self.response.take() {
            return PollResult::Ready(response);
        }
        match self.state {
            SlotState::Idle => PollResult::Idle,
            SlotState::AwaitingGrant | SlotState::AwaitingCompletion => PollResult::Pending,
        }
    }

    /// Take back a command that has not been granted yet.
    pub fn withdraw(&mut self) -> Option<Command> {
        if self.state != SlotState::AwaitingGrant {
            return None;
        }
        self.state = SlotState::Idle;
        self.command.take()
    }

    /// Bus side: hand the pending command over on grant.
    pub(crate) fn take_request(&mut self, tag: u64) -> Option<Command> {
        if self.state != SlotState::AwaitingGrant {
            return None;
        }
        let command = self.command.take()?;
        self.tag = Some(tag);
        self.state = SlotState::AwaitingCompletion;
        Some(command)
    }

    /// Bus side: deliver a completion. Refused unless the tag matches the
    /// one handed out at grant.
    pub(crate) fn complete(&mut self, tag: u64, response: Response) -> bool {
        if self.state != SlotState::AwaitingCompletion || self.tag != Some(tag) {
            return false;
        }
        self.tag = None;
        self.response = Some(response);
        self.state = SlotState::Idle;
        true
    }

    /// Drop everything, including an unread response.
    pub(crate) fn reset(&mut self) {
        self.state = SlotState::Idle;
        self.command = None;
        self.tag = None;
        self.response = None;
    }
}

/// Software-facing contract every master satisfies to attach to the
/// interconnect.
pub trait CriMaster {
    /// The master's bus slot.
    fn slot(&self) -> &MasterSlot;

    /// Mutable access to the bus slot.
    fn slot_mut(&mut self) -> &mut MasterSlot;

    /// Identity (and priority) of this master.
    fn id(&self) -> MasterId {
        self.slot().id()
    }

    /// Submit a command. Rejected while another is outstanding.
    fn submit(&mut self, command: Command) -> Result<(), SubmitError> {
        self.slot_mut().submit(command)
    }

    /// Poll for the outstanding command's response.
    fn poll_response(&mut self) -> PollResult {
        self.slot_mut().poll_response()
    }
}
