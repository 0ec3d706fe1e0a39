//! The complete RTIO system and its tick loop.
//!
//! [`RtioSystem`] owns one of everything: the TSC, the kernel initiator, the
//! DMA engine, the interconnect, the core (with its channel array) and the
//! analyzer. [`RtioSystem::tick`] advances all of them by one cycle:
//!
//! ```text
//! 1. core.begin_cycle(now)       parked reads resolve, inputs sampled
//! 2. route completions           back to the masters that asked
//! 3. interconnect.arbitrate()    at most one grant
//! 4. core.execute(grant)         immediate completion routed
//! 5. core.end_cycle(now)         due outputs strobed into phys
//! 6. analyzer <- trace records   best effort, never blocks
//! 7. dma.step()                  collect response, submit next
//! 8. tsc.advance()
//! ```
//!
//! The kernel is paced from outside: a driver calls into
//! [`RtioSystem::kernel_mut`] between ticks, one command at a time.
//!
//! # Usage
//!
//! ```ignore
//! use rtio_emu::board::SystemConfig;
//! use rtio_emu::rtio::Timestamp;
//! use rtio_emu::system::RtioSystem;
//!
//! let mut system = RtioSystem::new(SystemConfig::generic()?);
//! system.kernel_mut().at(Timestamp::new(100));
//! system.kernel_mut().output(0, 1)?;
//! let response = system.await_kernel(1000);
//! system.run_until(101);
//! ```

use std::sync::Arc;

use crate::board::SystemConfig;
use crate::config::KiImpl;
use crate::error::{MonInjError, TraceError};
use crate::rtio::analyzer::{Analyzer, AnalyzerDump};
use crate::rtio::core::RtioCore;
use crate::rtio::cri::{Completion, CriMaster, MasterId, Response, SlotState};
use crate::rtio::csr::{CsrRead, CsrValue, CsrWrite};
use crate::rtio::dma::DmaEngine;
use crate::rtio::interconnect::CriInterconnect;
use crate::rtio::kernel::KernelInitiator;
use crate::rtio::moninj;
use crate::rtio::phy::InputEvent;
use crate::rtio::timestamp::{Timestamp, Tsc};

/// Bus identity of the kernel initiator. Highest priority.
pub const KERNEL_MASTER: MasterId = MasterId(0);

/// Bus identity of the DMA engine.
pub const DMA_MASTER: MasterId = MasterId(1);

/// A complete RTIO instance.
#[derive(Debug)]
pub struct RtioSystem {
    config: Arc<SystemConfig>,
    tsc: Tsc,
    kernel: KernelInitiator,
    dma: DmaEngine,
    interconnect: CriInterconnect,
    core: RtioCore,
    analyzer: Analyzer,
}

impl RtioSystem {
    /// Build a system around a frozen configuration.
    ///
    /// The kernel initiator flavour follows the gateware identifier
    /// (`acpki_` prefix for ACP).
    pub fn new(config: Arc<SystemConfig>) -> Self {
        let ki_impl = if config.ident().starts_with("acpki_") {
            KiImpl::Acp
        } else {
            KiImpl::Csr
        };
        log::info!(
            "RTIO system '{}': {} channels, fine width {}, analyzer {} records",
            config.ident(),
            config.channel_count(),
            config.fine_ts_width(),
            config.analyzer_capacity()
        );
        Self {
            tsc: Tsc::new(),
            kernel: KernelInitiator::new(KERNEL_MASTER, ki_impl),
            dma: DmaEngine::new(DMA_MASTER, config.fine_ts_width()),
            interconnect: CriInterconnect::new(vec![KERNEL_MASTER, DMA_MASTER]),
            core: RtioCore::new(config.clone()),
            analyzer: Analyzer::new(config.analyzer_capacity()),
            config,
        }
    }

    pub fn config(&self) -> &Arc<SystemConfig> {
        &self.config
    }

    /// Current TSC value.
    pub fn now(&self) -> u64 {
        self.tsc.now()
    }

    pub fn tsc(&self) -> &Tsc {
        &self.tsc
    }

    pub fn kernel(&self) -> &KernelInitiator {
        &self.kernel
    }

    pub fn kernel_mut(&mut self) -> &mut KernelInitiator {
        &mut self.kernel
    }

    pub fn dma(&self) -> &DmaEngine {
        &self.dma
    }

    pub fn dma_mut(&mut self) -> &mut DmaEngine {
        &mut self.dma
    }

    /// Decode a DMA stream and start replaying it, shifted by `offset` cycles.
    pub fn start_dma(&mut self, stream: &[u8], offset: u64) -> Result<usize, TraceError> {
        self.dma.start(stream, offset)
    }

    pub fn interconnect(&self) -> &CriInterconnect {
        &self.interconnect
    }

    pub fn core(&self) -> &RtioCore {
        &self.core
    }

    pub fn analyzer(&self) -> &Analyzer {
        &self.analyzer
    }

    /// Take everything the analyzer holds. Does not touch the core.
    pub fn drain_analyzer(&mut self) -> AnalyzerDump {
        self.analyzer.drain()
    }

    /// Advance every component by one cycle.
    pub fn tick(&mut self) {
        let now = self.tsc.now();

        for completion in self.core.begin_cycle(now) {
            self.route(completion);
        }

        let grant = {
            let mut slots = [self.kernel.slot_mut(), self.dma.slot_mut()];
            self.interconnect.arbitrate(&mut slots)
        };
        if let Some(txn) = grant {
            if let Some(completion) = self.core.execute(txn, now) {
                self.route(completion);
            }
        }

        self.core.end_cycle(now);

        for record in self.core.take_trace() {
            self.analyzer.record(record);
        }

        self.dma.step();
        self.tsc.advance();
    }

    /// Tick until the TSC reaches `cycle`.
    pub fn run_until(&mut self, cycle: u64) {
        while self.tsc.now() < cycle {
            self.tick();
        }
    }

    /// Run for up to `max_cycles` cycles.
    ///
    /// Stops early once nothing is in flight anywhere. Returns the number
    /// of cycles actually executed.
    pub fn run(&mut self, max_cycles: u64) -> u64 {
        let start = self.tsc.now();
        for _ in 0..max_cycles {
            if self.is_quiescent() {
                break;
            }
            self.tick();
        }
        self.tsc.now() - start
    }

    /// Tick until the kernel's outstanding command completes, for at most
    /// `max_cycles` cycles, and return its response.
    pub fn await_kernel(&mut self, max_cycles: u64) -> Option<Response> {
        for _ in 0..max_cycles {
            if let Some(response) = self.kernel.take_response() {
                return Some(response);
            }
            if self.kernel.slot().state() == SlotState::Idle {
                return None;
            }
            self.tick();
        }
        self.kernel.take_response()
    }

    /// Whether no master has work outstanding and no channel has queued
    /// events or parked reads.
    pub fn is_quiescent(&self) -> bool {
        self.kernel.slot().state() == SlotState::Idle
            && self.dma.is_idle()
            && self.interconnect.in_flight() == 0
            && !self.core.is_busy()
    }

    /// Feed an input event into a channel's phy.
    pub fn inject_input(&mut self, channel: usize, timestamp: Timestamp, data: u32) -> bool {
        self.core
            .channels_mut()
            .phy_mut(channel)
            .is_some_and(|phy| phy.queue_input(InputEvent { timestamp, data }))
    }

    /// Monitor a channel's current value.
    pub fn probe(&self, channel: usize) -> Result<u32, MonInjError> {
        moninj::probe(self.core.channels(), channel)
    }

    /// Override (or release) a channel's output level.
    pub fn inject(&mut self, channel: usize, level: Option<bool>) -> Result<(), MonInjError> {
        moninj::inject(self.core.channels_mut(), channel, level)
    }

    /// Read a control/status field.
    pub fn csr_read(&self, field: CsrRead) -> CsrValue {
        match field {
            CsrRead::Tsc => CsrValue::Counter(self.tsc.now()),
            CsrRead::ChannelCount => CsrValue::Counter(self.config.channel_count() as u64),
            CsrRead::ChannelCapability(ch) => CsrValue::Capability(self.core.channels().capability(ch)),
            CsrRead::ChannelLastError(ch) => CsrValue::LastError(self.core.last_error(ch)),
            CsrRead::AnalyzerFillLevel => CsrValue::Counter(self.analyzer.fill_level() as u64),
            CsrRead::AnalyzerOverflow => CsrValue::Flag(self.analyzer.overflow()),
            CsrRead::Ident => CsrValue::Text(self.config.ident().to_string()),
        }
    }

    /// Write a control field.
    pub fn csr_write(&mut self, field: CsrWrite) {
        match field {
            CsrWrite::Reset => self.reset(),
            CsrWrite::AnalyzerEnable(enabled) => self.analyzer.set_enabled(enabled),
            CsrWrite::AnalyzerReset => self.analyzer.reset(),
            CsrWrite::ClearLastError(ch) => self.core.clear_last_error(ch),
        }
    }

    /// Reinitialize: channel state first, then the masters, then the TSC.
    pub fn reset(&mut self) {
        self.core.reset();
        self.interconnect.reset();
        self.kernel.reset();
        self.dma.reset();
        self.analyzer.reset();
        self.tsc.reset();
        log::info!("RTIO system '{}' reset", self.config.ident());
    }

    /// Print run statistics.
    pub fn print_summary(&self) {
        let stats = self.core.stats();
        println!("TSC: {}", self.tsc.now());
        println!("Core:");
        println!("  Outputs accepted: {}  strobed: {}", stats.outputs_accepted, stats.strobes);
        println!("  Inputs delivered: {}  timeouts: {}", stats.inputs_delivered, stats.timeouts);
        println!(
            "  Errors: late={} sequence={} collision={} busy={} overflow={}",
            stats.late, stats.sequence_errors, stats.collisions, stats.busy, stats.overflows
        );
        self.interconnect.print_summary();
        let dma = self.dma.stats();
        println!("DMA: {:?}, {} completed, {} busy retries", self.dma.state(), dma.completed, dma.busy_retries);
        if let Some(err) = self.dma.error() {
            println!("  First error: {} on channel {} at {}", err.status, err.channel, err.timestamp);
        }
        println!(
            "Analyzer: {}/{} records{}",
            self.analyzer.fill_level(),
            self.analyzer.capacity(),
            if self.analyzer.overflow() { " (overflow)" } else { "" }
        );
    }

    fn route(&mut self, completion: Completion) {
        let mut slots = [self.kernel.slot_mut(), self.dma.slot_mut()];
        self.interconnect.route(completion, &mut slots);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::board::{ChannelCapability, SystemConfigBuilder};
    use crate::rtio::analyzer::TraceKind;
    use crate::rtio::cri::{PollResult, Status};
    use crate::rtio::dma::{DmaRecorder, DmaState};

    fn system() -> RtioSystem {
        RtioSystem::new(SystemConfig::generic().unwrap())
    }

    fn dma_stream(channel: u32, stamps: &[u64]) -> Vec<u8> {
        let mut rec = DmaRecorder::new(3);
        for (i, &ts) in stamps.iter().enumerate() {
            rec.output(channel, Timestamp::new(ts), (i % 2) as u32).unwrap();
        }
        rec.finish()
    }

    #[test]
    fn test_tsc_advances_one_per_tick() {
        let mut system = system();
        assert_eq!(system.now(), 0);
        system.tick();
        system.tick();
        assert_eq!(system.now(), 2);
        system.run_until(10);
        assert_eq!(system.now(), 10);
    }

    #[test]
    fn test_output_strobed_at_timestamp() {
        let mut system = system();
        system.run_until(95);

        system.kernel_mut().at(Timestamp::new(100));
        system.kernel_mut().output(0, 1).unwrap();
        let response = system.await_kernel(10).unwrap();
        assert_eq!(response, Response::ok(Timestamp::new(100)));
        assert_eq!(system.now(), 96, "answered in the cycle it was granted");

        system.run_until(100);
        assert!(system.core().channels().phy(0).unwrap().strobes().is_empty());
        assert_eq!(system.probe(0), Ok(0));

        system.tick();
        let strobes = system.core().channels().phy(0).unwrap().strobes();
        assert_eq!(strobes.len(), 1);
        assert_eq!(strobes[0].cycle, 100);
        assert_eq!(system.probe(0), Ok(1));
    }

    #[test]
    fn test_sequence_error_on_earlier_timestamp() {
        let mut system = system();
        let kernel = system.kernel_mut();
        kernel.at(Timestamp::new(200));
        kernel.output(0, 1).unwrap();
        assert!(system.await_kernel(10).unwrap().status.is_ok());

        system.kernel_mut().at(Timestamp::new(199));
        system.kernel_mut().output(0, 0).unwrap();
        assert_eq!(system.await_kernel(10).unwrap().status, Status::SequenceError);
        assert_eq!(system.core().last_accepted(0), Some(Timestamp::new(200)));
        assert_eq!(
            system.csr_read(CsrRead::ChannelLastError(0)),
            CsrValue::LastError(Some(Status::SequenceError))
        );
    }

    #[test]
    fn test_late_dma_output_has_no_effect() {
        let mut system = system();
        system.run_until(110);
        system.start_dma(&dma_stream(1, &[10]), 0).unwrap();
        system.run(10);

        assert_eq!(system.dma().state(), DmaState::Done);
        let err = system.dma().error().unwrap();
        assert_eq!(err.status, Status::Late);
        assert_eq!(err.channel, 1);

        system.run_until(200);
        assert!(system.core().channels().phy(1).unwrap().strobes().is_empty());
        assert_eq!(system.probe(1), Ok(0));
    }

    #[test]
    fn test_dma_restart_mid_replay_finishes() {
        let mut system = system();
        system.start_dma(&dma_stream(1, &[1000, 1010]), 0).unwrap();
        system.tick();
        system.start_dma(&dma_stream(1, &[2000]), 0).unwrap();
        system.run_until(2100);

        assert_eq!(system.dma().state(), DmaState::Done);
        assert_eq!(system.dma().remaining(), 0);
        assert!(system.dma().slot().is_free());
        let strobes = system.core().channels().phy(1).unwrap().strobes();
        assert_eq!(strobes.len(), 1, "only the new stream reaches the phy");
        assert_eq!(strobes[0].cycle, 2000);
        assert_eq!(system.run(10), 0);
    }

    #[test]
    fn test_input_timeout_exactly_at_deadline() {
        let mut system = system();
        system.run_until(100);
        system.kernel_mut().at(Timestamp::new(150));
        system.kernel_mut().input_until_now(2).unwrap();

        let mut answered_at = None;
        while system.now() < 300 {
            let cycle = system.now();
            system.tick();
            if let Some(response) = system.kernel_mut().take_response() {
                answered_at = Some((cycle, response));
                break;
            }
        }
        let (cycle, response) = answered_at.unwrap();
        assert_eq!(cycle, 150);
        assert_eq!(response.status, Status::NoData);
        assert_eq!(response.timestamp, Timestamp::new(150));
    }

    #[test]
    fn test_input_delivered_before_deadline() {
        let mut system = system();
        system.kernel_mut().at(Timestamp::new(50));
        system.kernel_mut().input_until_now(2).unwrap();
        assert!(system.inject_input(2, Timestamp::new(20), 1));

        let response = system.await_kernel(100).unwrap();
        assert_eq!(response, Response::input(1, Timestamp::new(20)));
        assert_eq!(system.now(), 21);
    }

    #[test]
    fn test_interleaved_masters_get_own_responses() {
        let mut system = system();
        // Kernel parks a read on the input channel
        system.kernel_mut().input(2).unwrap();
        system.tick();
        assert_eq!(system.kernel_mut().poll_response(), PollResult::Pending);

        // DMA streams outputs while the read is parked
        system.start_dma(&dma_stream(0, &[50, 60, 70, 80]), 0).unwrap();
        system.run_until(20);
        assert_eq!(system.dma().state(), DmaState::Done);
        assert_eq!(system.dma().stats().completed, 4);
        assert!(system.dma().error().is_none());
        assert_eq!(system.kernel_mut().poll_response(), PollResult::Pending);

        // Input arrives; only the kernel sees it
        system.inject_input(2, Timestamp::new(25), 1);
        let response = system.await_kernel(20).unwrap();
        assert_eq!(response, Response::input(1, Timestamp::new(25)));
        assert_eq!(system.interconnect().misroutes(), 0);
        assert_eq!(system.interconnect().in_flight(), 0);
    }

    #[test]
    fn test_kernel_wins_same_cycle_contention() {
        for _ in 0..3 {
            let mut system = system();
            system.start_dma(&dma_stream(1, &[100]), 0).unwrap();
            system.tick(); // DMA submits at end of cycle 0
            system.kernel_mut().at(Timestamp::new(100));
            system.kernel_mut().output(0, 1).unwrap();

            // Cycle 1: both waiting, kernel granted
            system.tick();
            assert!(system.kernel_mut().take_response().is_some());
            assert_eq!(system.dma().stats().completed, 0);
            assert_eq!(system.interconnect().contention_count(), 1);

            // Cycle 2: DMA granted
            system.tick();
            system.tick();
            assert_eq!(system.dma().stats().completed, 1);
            let stats = system.interconnect().master_stats(DMA_MASTER).unwrap();
            assert_eq!(stats.stalls, 1);
        }
    }

    #[test]
    fn test_analyzer_overflow_does_not_stall_core() {
        let config = SystemConfigBuilder::from_config(&SystemConfig::generic().unwrap())
            .analyzer_capacity(4)
            .build()
            .unwrap();
        let mut system = RtioSystem::new(config);
        let stamps: Vec<u64> = (0..20).map(|i| 1000 + i).collect();
        system.start_dma(&dma_stream(0, &stamps), 0).unwrap();
        system.run(100);

        assert_eq!(system.dma().stats().completed, 20);
        assert!(system.dma().error().is_none());
        assert_eq!(system.csr_read(CsrRead::AnalyzerOverflow), CsrValue::Flag(true));
        assert_eq!(system.csr_read(CsrRead::AnalyzerFillLevel), CsrValue::Counter(4));

        let dump = system.drain_analyzer();
        assert!(dump.overflow);
        assert_eq!(dump.total_recorded, 20);
        let last: Vec<u64> = dump.records.iter().map(|r| r.timestamp.coarse()).collect();
        assert_eq!(last, vec![1016, 1017, 1018, 1019]);
        assert_eq!(system.csr_read(CsrRead::AnalyzerOverflow), CsrValue::Flag(false));
    }

    #[test]
    fn test_trace_records_errors() {
        let mut system = system();
        system.kernel_mut().output(7, 1).unwrap();
        assert_eq!(system.await_kernel(5).unwrap().status, Status::Collision);
        let dump = system.drain_analyzer();
        assert_eq!(dump.records.len(), 1);
        assert_eq!(dump.records[0].kind, TraceKind::Exception(Status::Collision));
        assert_eq!(dump.records[0].channel, 7);
    }

    #[test]
    fn test_log_channel_message() {
        let mut system = system();
        let log = system.config().log_channel().unwrap() as u32;
        system.kernel_mut().at(Timestamp::new(5));
        system.kernel_mut().log(log, "hello").unwrap();
        assert!(system.await_kernel(5).unwrap().status.is_ok());
        system.run(20);
        let phy = system.core().channels().phy(log as usize).unwrap();
        assert_eq!(phy.messages(), ["hello".to_string()]);
    }

    #[test]
    fn test_moninj_override() {
        let mut system = system();
        system.inject(0, Some(true)).unwrap();
        system.kernel_mut().at(Timestamp::new(3));
        system.kernel_mut().output(0, 0).unwrap();
        system.await_kernel(5).unwrap();
        system.run_until(10);
        assert_eq!(system.probe(0), Ok(1));
        system.inject(0, None).unwrap();
        assert_eq!(system.probe(0), Ok(0));
    }

    #[test]
    fn test_csr_window() {
        let mut system = system();
        system.run_until(7);
        assert_eq!(system.csr_read(CsrRead::Tsc), CsrValue::Counter(7));
        assert_eq!(system.csr_read(CsrRead::ChannelCount), CsrValue::Counter(4));
        assert_eq!(
            system.csr_read(CsrRead::ChannelCapability(2)),
            CsrValue::Capability(Some(ChannelCapability::InOut))
        );
        assert_eq!(system.csr_read(CsrRead::Ident), CsrValue::Text("generic".into()));

        system.csr_write(CsrWrite::AnalyzerEnable(false));
        system.kernel_mut().at(Timestamp::new(20));
        system.kernel_mut().output(0, 1).unwrap();
        system.await_kernel(5).unwrap();
        assert_eq!(system.csr_read(CsrRead::AnalyzerFillLevel), CsrValue::Counter(0));

        system.kernel_mut().at(Timestamp::new(1));
        system.kernel_mut().output(0, 1).unwrap();
        system.await_kernel(5).unwrap();
        system.csr_write(CsrWrite::ClearLastError(0));
        assert_eq!(system.csr_read(CsrRead::ChannelLastError(0)), CsrValue::LastError(None));
    }

    #[test]
    fn test_reset_returns_to_power_on() {
        let mut system = system();
        system.kernel_mut().at(Timestamp::new(500));
        system.kernel_mut().output(0, 1).unwrap();
        system.start_dma(&dma_stream(1, &[600, 700]), 0).unwrap();
        system.run_until(50);

        system.csr_write(CsrWrite::Reset);
        assert_eq!(system.now(), 0);
        assert!(system.is_quiescent());
        assert_eq!(system.core().last_accepted(0), None);
        assert_eq!(system.analyzer().fill_level(), 0);

        // Timestamps from before the reset are no longer a sequence reference
        system.kernel_mut().at(Timestamp::new(10));
        system.kernel_mut().output(0, 1).unwrap();
        assert!(system.await_kernel(5).unwrap().status.is_ok());
    }

    #[test]
    fn test_acp_ident_selects_kernel_flavour() {
        let system = RtioSystem::new(SystemConfig::ebaz4205(KiImpl::Acp).unwrap());
        assert_eq!(system.kernel().ki_impl(), KiImpl::Acp);
        assert_eq!(system.config().log_channel(), Some(2));
    }
}
