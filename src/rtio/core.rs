//! RTIO core: the single CRI slave.
//!
//! The core is the only component that applies commands to channel state.
//! For every granted [`Transaction`] it checks, in order:
//!
//! 1. the channel exists and supports the operation (`Collision`)
//! 2. for outputs, the timestamp is not earlier than the last one accepted
//!    on that channel (`SequenceError`)
//! 3. for outputs, the timestamp has not already passed, allowing for the
//!    channel's latency margin (`Late`)
//! 4. the channel has room (`ChannelBusy`)
//!
//! Accepted outputs wait in a per-channel FIFO and are strobed into the phy
//! in the cycle their coarse timestamp comes due. Input reads are answered
//! from the channel's input FIFO, or parked until data arrives or the
//! deadline passes.
//!
//! # Cycle structure
//!
//! The owning system calls, once per cycle and in this order:
//!
//! ```text
//! begin_cycle(now)   settle channel states, sample inputs, resolve parked reads
//! execute(txn, now)  at most one granted transaction
//! end_cycle(now)     strobe outputs due at or before `now`
//! ```

use std::collections::VecDeque;
use std::sync::Arc;

use super::analyzer::{TraceKind, TraceRecord};
use super::channel::ChannelArray;
use super::cri::{Completion, MasterId, OpKind, Response, Status, Transaction};
use super::phy::{InputEvent, OutputEvent};
use super::timestamp::Timestamp;
use crate::board::SystemConfig;

/// Per-channel command state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ChannelState {
    /// Nothing queued.
    #[default]
    Idle,
    /// Accepted output events waiting for their timestamp, or a parked read.
    CommandPending,
    /// An output was strobed this cycle.
    Executing,
}

/// A read waiting for data or its deadline.
#[derive(Debug, Clone, Copy)]
struct PendingRead {
    master: MasterId,
    tag: u64,
    deadline: Option<Timestamp>,
}

/// Everything the core keeps per channel.
#[derive(Debug, Default)]
struct ChannelContext {
    state: ChannelState,
    /// Last output timestamp accepted; the monotonicity reference.
    last_accepted: Option<Timestamp>,
    last_error: Option<Status>,
    outputs: VecDeque<OutputEvent>,
    inputs: VecDeque<InputEvent>,
    input_overflow: bool,
    pending_read: Option<PendingRead>,
}

impl ChannelContext {
    fn settle(&mut self) {
        self.state = if self.outputs.is_empty() && self.pending_read.is_none() {
            ChannelState::Idle
        } else {
            ChannelState::CommandPending
        };
    }
}

/// Counters kept by the core.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CoreStats {
    pub outputs_accepted: u64,
    pub strobes: u64,
    pub inputs_delivered: u64,
    pub late: u64,
    pub sequence_errors: u64,
    pub collisions: u64,
    pub busy: u64,
    pub timeouts: u64,
    pub overflows: u64,
}

/// The RTIO core.
#[derive(Debug)]
pub struct RtioCore {
    config: Arc<SystemConfig>,
    channels: ChannelArray,
    contexts: Vec<ChannelContext>,
    trace: Vec<TraceRecord>,
    stats: CoreStats,
}

impl RtioCore {
    pub fn new(config: Arc<SystemConfig>) -> Self {
        let contexts = (0..config.channel_count()).map(|_| ChannelContext::default()).collect();
        Self {
            channels: ChannelArray::new(config.clone()),
            config,
            contexts,
            trace: Vec::new(),
            stats: CoreStats::default(),
        }
    }

    /// The channel array (read-only).
    pub fn channels(&self) -> &ChannelArray {
        &self.channels
    }

    /// Mutable channel array, for phy-level hooks (input feed, injection).
    pub(crate) fn channels_mut(&mut self) -> &mut ChannelArray {
        &mut self.channels
    }

    pub fn stats(&self) -> &CoreStats {
        &self.stats
    }

    pub fn channel_state(&self, channel: usize) -> Option<ChannelState> {
        self.contexts.get(channel).map(|c| c.state)
    }

    /// Last output timestamp accepted on a channel.
    pub fn last_accepted(&self, channel: usize) -> Option<Timestamp> {
        self.contexts.get(channel).and_then(|c| c.last_accepted)
    }

    /// Most recent error status on a channel.
    pub fn last_error(&self, channel: usize) -> Option<Status> {
        self.contexts.get(channel).and_then(|c| c.last_error)
    }

    pub fn clear_last_error(&mut self, channel: usize) {
        if let Some(ctx) = self.contexts.get_mut(channel) {
            ctx.last_error = None;
        }
    }

    /// Output events waiting in a channel's FIFO.
    pub fn pending_outputs(&self, channel: usize) -> usize {
        self.contexts.get(channel).map_or(0, |c| c.outputs.len())
    }

    /// Whether any channel still has queued outputs or a parked read.
    pub fn is_busy(&self) -> bool {
        self.contexts
            .iter()
            .any(|c| !c.outputs.is_empty() || c.pending_read.is_some())
    }

    /// Start of cycle: settle channel states, sample phys, answer parked reads.
    pub fn begin_cycle(&mut self, now: u64) -> Vec<Completion> {
        let mut completions = Vec::new();
        let depth = self.config.input_fifo_depth();

        for ch in 0..self.contexts.len() {
            if self.contexts[ch].state == ChannelState::Executing {
                self.contexts[ch].settle();
            }

            let can_input = self.channels.capability(ch).is_some_and(|c| c.can_input());
            if can_input {
                let ctx = &mut self.contexts[ch];
                if let Some(phy) = self.channels.phy_mut(ch) {
                    while let Some(event) = phy.sample(now) {
                        if ctx.inputs.len() >= depth {
                            if !ctx.input_overflow {
                                log::warn!("Channel {}: input FIFO overflow at cycle {}", ch, now);
                            }
                            ctx.input_overflow = true;
                        } else {
                            log::debug!("Channel {}: input 0x{:x} @ {}", ch, event.data, event.timestamp);
                            ctx.inputs.push_back(event);
                        }
                    }
                }
            }

            if let Some(read) = self.contexts[ch].pending_read {
                if let Some(response) = self.answer_read(ch, read.deadline, now) {
                    let ctx = &mut self.contexts[ch];
                    ctx.pending_read = None;
                    ctx.settle();
                    completions.push(Completion {
                        master: read.master,
                        tag: read.tag,
                        response,
                    });
                }
            }
        }

        completions
    }

    /// Execute one granted transaction.
    ///
    /// Returns the completion, or `None` if an input read was parked and
    /// will complete from a later [`RtioCore::begin_cycle`].
    pub fn execute(&mut self, txn: Transaction, now: u64) -> Option<Completion> {
        let Transaction { master, tag, command } = txn;
        log::debug!("Cycle {}: {} executes {}", now, master, command);

        let response = match command.op {
            OpKind::Output => self.execute_output(&command, now),
            OpKind::InputRead | OpKind::InputReadWithTimeout => {
                let deadline = (command.op == OpKind::InputReadWithTimeout).then_some(command.timestamp);
                self.execute_input(master, tag, command.channel, deadline, now)?
            }
        };

        Some(Completion { master, tag, response })
    }

    /// End of cycle: strobe every output whose coarse timestamp is due.
    pub fn end_cycle(&mut self, now: u64) {
        for ch in 0..self.contexts.len() {
            let ctx = &mut self.contexts[ch];
            let Some(phy) = self.channels.phy_mut(ch) else {
                continue;
            };
            while ctx.outputs.front().is_some_and(|e| e.timestamp.coarse() <= now) {
                let Some(event) = ctx.outputs.pop_front() else {
                    break;
                };
                log::debug!(
                    "Cycle {}: strobe ch{} addr={} data=0x{:x} (ts {})",
                    now,
                    ch,
                    event.address,
                    event.data.first().copied().unwrap_or(0),
                    event.timestamp
                );
                phy.strobe(now, &event);
                ctx.state = ChannelState::Executing;
                self.stats.strobes += 1;
            }
        }
    }

    /// Hand over trace records produced since the last call.
    pub fn take_trace(&mut self) -> Vec<TraceRecord> {
        std::mem::take(&mut self.trace)
    }

    /// Clear all channel state. Parked reads are dropped.
    pub fn reset(&mut self) {
        for ctx in &mut self.contexts {
            *ctx = ChannelContext::default();
        }
        self.channels.reset();
        self.trace.clear();
        self.stats = CoreStats::default();
    }

    fn execute_output(&mut self, command: &super::cri::Command, now: u64) -> Response {
        let ch = command.channel as usize;
        let spec = self
            .config
            .channel(ch)
            .filter(|spec| spec.capability().can_output())
            .map(|spec| (spec.latency_margin, spec.fine_ts_width));
        let Some((margin, channel_width)) = spec else {
            return self.reject(command.channel, Status::Collision, command.timestamp, now);
        };
        let timestamp = command
            .timestamp
            .quantize(self.config.fine_ts_width(), channel_width);

        let last_accepted = self.contexts[ch].last_accepted;
        let queued = self.contexts[ch].outputs.len();
        if last_accepted.is_some_and(|last| timestamp < last) {
            return self.reject(command.channel, Status::SequenceError, timestamp, now);
        }
        if timestamp.coarse().saturating_add(margin) < now {
            return self.reject(command.channel, Status::Late, timestamp, now);
        }
        if queued >= self.config.output_fifo_depth() {
            return self.reject(command.channel, Status::ChannelBusy, timestamp, now);
        }

        if let Some(count) = command.replication.filter(|&n| n != 1) {
            log::debug!("Channel {}: replication count {} carried, executing once", ch, count);
        }

        let ctx = &mut self.contexts[ch];
        ctx.last_accepted = Some(timestamp);
        ctx.outputs.push_back(OutputEvent {
            timestamp,
            address: command.address,
            data: command.data.clone(),
        });
        if ctx.state == ChannelState::Idle {
            ctx.state = ChannelState::CommandPending;
        }
        self.stats.outputs_accepted += 1;
        self.trace.push(TraceRecord {
            kind: TraceKind::Output,
            channel: command.channel,
            timestamp,
            rtio_counter: now,
            address: command.address,
            data: command.first_word(),
        });

        // An output accepted within the latency margin strobes this cycle
        Response::ok(timestamp.max(Timestamp::new(now)))
    }

    fn execute_input(
        &mut self,
        master: MasterId,
        tag: u64,
        channel: u32,
        deadline: Option<Timestamp>,
        now: u64,
    ) -> Option<Response> {
        let ch = channel as usize;
        let requested = deadline.unwrap_or_default();
        let can_input = self.channels.capability(ch).is_some_and(|c| c.can_input());
        if !can_input {
            return Some(self.reject(channel, Status::Collision, requested, now));
        }
        if self.contexts[ch].pending_read.is_some() {
            return Some(self.reject(channel, Status::ChannelBusy, requested, now));
        }

        if let Some(response) = self.answer_read(ch, deadline, now) {
            return Some(response);
        }

        log::debug!("Cycle {}: read on ch{} parked for {}", now, ch, master);
        let ctx = &mut self.contexts[ch];
        ctx.pending_read = Some(PendingRead { master, tag, deadline });
        ctx.state = ChannelState::CommandPending;
        None
    }

    /// Try to answer a read on `ch` this cycle.
    fn answer_read(&mut self, ch: usize, deadline: Option<Timestamp>, now: u64) -> Option<Response> {
        let channel = ch as u32;
        let ctx = &mut self.contexts[ch];

        if ctx.input_overflow {
            ctx.input_overflow = false;
            return Some(self.reject(channel, Status::Overflow, Timestamp::new(now), now));
        }

        // An event stamped after the deadline belongs to a later read
        let in_time = ctx
            .inputs
            .front()
            .is_some_and(|event| deadline.map_or(true, |d| event.timestamp <= d));
        if in_time {
            let Some(event) = ctx.inputs.pop_front() else {
                return None;
            };
            self.stats.inputs_delivered += 1;
            self.trace.push(TraceRecord {
                kind: TraceKind::Input,
                channel,
                timestamp: event.timestamp,
                rtio_counter: now,
                address: 0,
                data: event.data,
            });
            return Some(Response::input(event.data, event.timestamp));
        }

        match deadline {
            Some(deadline) if now >= deadline.coarse() => {
                log::debug!("Cycle {}: read on ch{} timed out", now, ch);
                self.stats.timeouts += 1;
                Some(Response::failed(Status::NoData, Timestamp::new(now)))
            }
            _ => None,
        }
    }

    /// Build a failure response and do the bookkeeping for it.
    fn reject(&mut self, channel: u32, status: Status, timestamp: Timestamp, now: u64) -> Response {
        match status {
            Status::Late => self.stats.late += 1,
            Status::SequenceError => self.stats.sequence_errors += 1,
            Status::Collision => self.stats.collisions += 1,
            Status::ChannelBusy => self.stats.busy += 1,
            Status::Overflow => self.stats.overflows += 1,
            Status::Ok | Status::NoData => {}
        }

        if status.is_error() {
            log::warn!("Cycle {}: {} on channel {} (ts {})", now, status, channel, timestamp);
            if let Some(ctx) = self.contexts.get_mut(channel as usize) {
                ctx.last_error = Some(status);
            }
            self.trace.push(TraceRecord {
                kind: TraceKind::Exception(status),
                channel,
                timestamp,
                rtio_counter: now,
                address: 0,
                data: 0,
            });
        } else {
            log::debug!("Cycle {}: {} on channel {}", now, status, channel);
        }

        Response::failed(status, Timestamp::new(now))
    }
}
