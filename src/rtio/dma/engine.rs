//! DMA replay engine: the stream-driven CRI master.
//!
//! Once started, the engine submits the decoded commands back to back, one
//! per free slot. It stalls only while its slot is occupied, and on
//! `ChannelBusy` it resubmits the same command. Any other error status is
//! latched (first one wins) and replay carries on with the next command,
//! the way the gateware DMA reports the first underflow of a playback.

use std::collections::VecDeque;

use super::decode_stream;
use crate::error::TraceError;
use crate::rtio::cri::{Command, CriMaster, MasterId, MasterSlot, PollResult, Response, Status};
use crate::rtio::timestamp::Timestamp;

/// Replay state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DmaState {
    /// Never started, or reset.
    #[default]
    Idle,
    /// Commands left to submit or a response outstanding.
    Running,
    /// Every command of the last stream has completed.
    Done,
}

/// First error seen during a replay.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DmaError {
    pub status: Status,
    pub channel: u32,
    pub timestamp: Timestamp,
}

/// Replay counters.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DmaStats {
    pub submitted: u64,
    pub completed: u64,
    pub busy_retries: u64,
    pub errors: u64,
}

/// DMA master.
#[derive(Debug, Clone)]
pub struct DmaEngine {
    slot: MasterSlot,
    fine_ts_width: u8,
    queue: VecDeque<Command>,
    /// Command whose response is outstanding.
    current: Option<Command>,
    /// `current` belongs to a replay that was restarted; drop its response.
    orphaned: bool,
    state: DmaState,
    error: Option<DmaError>,
    stats: DmaStats,
}

impl DmaEngine {
    pub fn new(id: MasterId, fine_ts_width: u8) -> Self {
        Self {
            slot: MasterSlot::new(id),
            fine_ts_width,
            queue: VecDeque::new(),
            current: None,
            orphaned: false,
            state: DmaState::Idle,
            error: None,
            stats: DmaStats::default(),
        }
    }

    /// Decode `stream` and start replaying it, shifted by `offset` cycles.
    ///
    /// A malformed stream is rejected before anything is submitted. Returns
    /// the number of commands queued.
    pub fn start(&mut self, stream: &[u8], offset: u64) -> Result<usize, TraceError> {
        let commands = decode_stream(stream, self.fine_ts_width, offset)?;
        Ok(self.start_commands(commands))
    }

    /// Start replaying already-decoded commands.
    ///
    /// Restarting a running replay abandons it. A command not yet granted is
    /// withdrawn from the bus; one already granted runs to completion and its
    /// response is discarded before the new stream is submitted.
    pub fn start_commands(&mut self, commands: Vec<Command>) -> usize {
        if self.state == DmaState::Running {
            log::warn!("DMA restarted with {} commands still queued", self.queue.len());
            if self.current.is_some() {
                if self.slot.withdraw().is_some() {
                    self.current = None;
                } else {
                    self.orphaned = true;
                }
            }
        }
        let count = commands.len();
        self.queue = commands.into();
        self.error = None;
        self.state = DmaState::Running;
        log::info!("DMA replay started: {} commands", count);
        count
    }

    pub fn state(&self) -> DmaState {
        self.state
    }

    /// Whether the engine has nothing left to do.
    pub fn is_idle(&self) -> bool {
        self.state != DmaState::Running
    }

    /// First error of the current replay.
    pub fn error(&self) -> Option<DmaError> {
        self.error
    }

    /// Commands not yet submitted.
    pub fn remaining(&self) -> usize {
        self.queue.len()
    }

    pub fn stats(&self) -> &DmaStats {
        &self.stats
    }

    /// Advance one cycle: collect the outstanding response, then submit the
    /// next command if the slot is free.
    pub fn step(&mut self) {
        if self.state != DmaState::Running {
            return;
        }

        if let Some(command) = self.current.take() {
            match self.slot.poll_response() {
                PollResult::Ready(response) if self.orphaned => {
                    log::debug!("DMA: dropped {} for {} of the abandoned replay", response, command);
                    self.orphaned = false;
                }
                PollResult::Ready(response) => self.handle_response(command, response),
                PollResult::Pending => {
                    self.current = Some(command);
                    return;
                }
                PollResult::Idle => {
                    log::error!("DMA lost its outstanding command on channel {}", command.channel);
                    self.orphaned = false;
                }
            }
        }

        if self.current.is_none() {
            if let Some(next) = self.queue.pop_front() {
                self.submit_current(next);
            }
        }

        if self.current.is_none() && self.queue.is_empty() {
            self.state = DmaState::Done;
            match self.error {
                Some(err) => log::info!(
                    "DMA replay finished: {} commands, first error {} on channel {} at {}",
                    self.stats.completed,
                    err.status,
                    err.channel,
                    err.timestamp
                ),
                None => log::info!("DMA replay finished: {} commands", self.stats.completed),
            }
        }
    }

    /// Stop and forget the current replay.
    pub fn reset(&mut self) {
        self.slot.reset();
        self.queue.clear();
        self.current = None;
        self.orphaned = false;
        self.state = DmaState::Idle;
        self.error = None;
        self.stats = DmaStats::default();
    }

    fn handle_response(&mut self, command: Command, response: Response) {
        if response.status == Status::ChannelBusy {
            log::debug!("DMA: channel {} busy, retrying", command.channel);
            self.stats.busy_retries += 1;
            self.submit_current(command);
            return;
        }

        self.stats.completed += 1;
        if response.status.is_error() {
            self.stats.errors += 1;
            if self.error.is_none() {
                self.error = Some(DmaError {
                    status: response.status,
                    channel: command.channel,
                    timestamp: command.timestamp,
                });
            }
        }
    }

    fn submit_current(&mut self, command: Command) {
        match self.slot.submit(command.clone()) {
            Ok(()) => {
                self.stats.submitted += 1;
                self.current = Some(command);
            }
            Err(e) => {
                // Slot is ours alone, so it is free whenever `current` is empty
                log::error!("DMA submit failed: {}", e);
                self.queue.push_front(command);
            }
        }
    }
}

impl CriMaster for DmaEngine {
    fn slot(&self) -> &MasterSlot {
        &self.slot
    }

    fn slot_mut(&mut self) -> &mut MasterSlot {
        &mut self.slot
    }
}
