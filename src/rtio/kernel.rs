//! Kernel initiator: the software-paced CRI master.
//!
//! A kernel drives the bus one command at a time. It keeps its own timeline
//! cursor (`now`) in machine units, moves it with [`KernelInitiator::at`] and
//! [`KernelInitiator::delay`], and stamps the commands it builds with it.
//! Issuing a command does not advance the cursor.
//!
//! Two attachment flavours exist on real hardware: a CSR window (`csr`) and
//! the ACP port (`acp`). They differ only in bus latency, which the emulator
//! does not model; the flavour is kept for identification.

use super::cri::{Command, CriMaster, MasterId, MasterSlot, PollResult, Response, SubmitError};
use super::timestamp::Timestamp;
use crate::config::KiImpl;

/// The kernel's attachment to the interconnect.
#[derive(Debug, Clone)]
pub struct KernelInitiator {
    slot: MasterSlot,
    ki_impl: KiImpl,
    now: Timestamp,
}

impl KernelInitiator {
    pub fn new(id: MasterId, ki_impl: KiImpl) -> Self {
        Self {
            slot: MasterSlot::new(id),
            ki_impl,
            now: Timestamp::default(),
        }
    }

    pub fn ki_impl(&self) -> KiImpl {
        self.ki_impl
    }

    /// Timeline cursor.
    pub fn now(&self) -> Timestamp {
        self.now
    }

    /// Move the cursor to an absolute time.
    pub fn at(&mut self, timestamp: Timestamp) {
        self.now = timestamp;
    }

    /// Move the cursor forward by whole cycles.
    pub fn delay(&mut self, cycles: u64) {
        self.now = self.now.saturating_add_cycles(cycles);
    }

    /// Set an output channel's value at the cursor.
    pub fn output(&mut self, channel: u32, value: u32) -> Result<(), SubmitError> {
        self.submit(Command::output(channel, self.now, value))
    }

    /// Read the next input event on a channel, waiting as long as it takes.
    pub fn input(&mut self, channel: u32) -> Result<(), SubmitError> {
        self.submit(Command::input_read(channel))
    }

    /// Read the next input event on a channel, giving up at the cursor.
    pub fn input_until_now(&mut self, channel: u32) -> Result<(), SubmitError> {
        self.submit(Command::input_read_timeout(channel, self.now))
    }

    /// Send a text message to the log channel at the cursor.
    pub fn log(&mut self, channel: u32, message: &str) -> Result<(), SubmitError> {
        self.submit(Command::log_message(channel, self.now, message))
    }

    /// Convenience for drivers: the response if one is ready.
    pub fn take_response(&mut self) -> Option<Response> {
        self.poll_response().ready()
    }

    /// Whether the kernel can submit right now.
    pub fn is_free(&self) -> bool {
        self.slot.is_free()
    }

    /// Drop any outstanding command and rewind the cursor.
    pub fn reset(&mut self) {
        self.slot.reset();
        self.now = Timestamp::default();
    }
}

impl CriMaster for KernelInitiator {
    fn slot(&self) -> &MasterSlot {
        &self.slot
    }

    fn slot_mut(&mut self) -> &mut MasterSlot {
        &mut self.slot
    }

    fn poll_response(&mut self) -> PollResult {
        let result = self.slot.poll_response();
        if let PollResult::Ready(response) = result {
            log::debug!("{} ({}): {}", self.slot.id(), self.ki_impl, response);
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rtio::cri::{OpKind, SlotState};

    #[test]
    fn test_cursor_stamps_commands() {
        let mut ki = KernelInitiator::new(MasterId(0), KiImpl::Csr);
        ki.at(Timestamp::new(100));
        ki.delay(20);
        assert_eq!(ki.now(), Timestamp::new(120));

        ki.output(0, 1).unwrap();
        assert_eq!(ki.slot().state(), SlotState::AwaitingGrant);
        let command = ki.slot_mut().take_request(0).unwrap();
        assert_eq!(command.timestamp, Timestamp::new(120));
        assert_eq!(command.op, OpKind::Output);
        // Submitting does not move the cursor
        assert_eq!(ki.now(), Timestamp::new(120));
    }

    #[test]
    fn test_one_command_at_a_time() {
        let mut ki = KernelInitiator::new(MasterId(0), KiImpl::Acp);
        ki.output(0, 1).unwrap();
        assert_eq!(ki.output(0, 0), Err(SubmitError::Busy(MasterId(0))));
        assert_eq!(ki.poll_response(), PollResult::Pending);
    }

    #[test]
    fn test_response_frees_slot_after_poll() {
        let mut ki = KernelInitiator::new(MasterId(0), KiImpl::Csr);
        ki.at(Timestamp::new(50));
        ki.input_until_now(2).unwrap();
        ki.slot_mut().take_request(7).unwrap();
        assert!(ki.slot_mut().complete(7, Response::ok(Timestamp::new(50))));
        assert!(!ki.is_free(), "unread response keeps the slot busy");
        assert_eq!(ki.take_response(), Some(Response::ok(Timestamp::new(50))));
        assert!(ki.is_free());
    }

    #[test]
    fn test_reset_rewinds() {
        let mut ki = KernelInitiator::new(MasterId(0), KiImpl::Csr);
        ki.at(Timestamp::new(9));
        ki.log(2, "hi").unwrap();
        ki.reset();
        assert!(ki.is_free());
        assert_eq!(ki.now(), Timestamp::default());
    }
}
