//! Scenario runner: drive a whole system from a TOML description.
//!
//! A scenario names a board, a list of kernel steps, DMA playbacks and
//! external input events, then runs the tick loop and checks the statuses
//! that come back.
//!
//! # Example Scenario
//!
//! ```toml
//! [scenario]
//! name = "blink_and_listen"
//!
//! [system]
//! board = "generic"
//! analyzer_capacity = 64
//!
//! [[kernel]]
//! op = "output"
//! channel = 0
//! timestamp = 100
//! value = 1
//! expect = "ok"
//!
//! [[kernel]]
//! op = "input_timeout"
//! channel = 2
//! timestamp = 200
//! expect = "no_data"
//!
//! [[dma]]
//! start = 10
//! records = [
//!     { channel = 1, timestamp = 5, value = 1 },
//! ]
//! expect_error = "late"
//!
//! [[input]]
//! channel = 2
//! timestamp = 150
//! value = 1
//!
//! [run]
//! cycles = 1000
//! ```
//!
//! Kernel steps run one after another: each is submitted once the previous
//! response has been collected and the TSC has reached its `at` cycle. DMA
//! playbacks start in order, each once the engine is idle and the TSC has
//! reached its `start` cycle.

use std::collections::VecDeque;
use std::path::Path;

use serde::Deserialize;
use thiserror::Error;

use crate::board::SystemConfig;
use crate::config::Config;
use crate::error::{ConfigError, TraceError};
use crate::rtio::analyzer::AnalyzerDump;
use crate::rtio::cri::{Response, Status, SubmitError};
use crate::rtio::dma::{DmaError, DmaRecorder};
use crate::rtio::phy::Strobe;
use crate::rtio::timestamp::Timestamp;
use crate::system::RtioSystem;

/// Errors that stop a scenario before or while it runs.
#[derive(Debug, Error)]
pub enum ScenarioError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },

    #[error("invalid scenario: {0}")]
    Parse(#[from] toml::de::Error),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("DMA playback {index}: {source}")]
    Dma { index: usize, source: TraceError },

    #[error("kernel step {index}: {source}")]
    Submit { index: usize, source: SubmitError },
}

/// A parsed scenario file.
#[derive(Debug, Clone, Deserialize)]
pub struct Scenario {
    #[serde(default)]
    pub scenario: ScenarioInfo,
    /// Board and buffer settings, same keys as `rtio-emu.toml`.
    #[serde(default)]
    pub system: Config,
    #[serde(default)]
    pub kernel: Vec<KernelStep>,
    #[serde(default)]
    pub dma: Vec<DmaPlayback>,
    #[serde(default)]
    pub input: Vec<InputDef>,
    #[serde(default)]
    pub run: RunDef,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ScenarioInfo {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub description: String,
}

/// Kernel operation kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KernelOp {
    Output,
    Input,
    InputTimeout,
    Log,
}

/// One kernel command.
#[derive(Debug, Clone, Deserialize)]
pub struct KernelStep {
    pub op: KernelOp,
    pub channel: u32,
    /// Cursor position for outputs, deadline for timed reads.
    #[serde(default)]
    pub timestamp: u64,
    /// Fine part of the timestamp.
    #[serde(default)]
    pub fine: u8,
    #[serde(default)]
    pub value: u32,
    #[serde(default)]
    pub message: String,
    /// Earliest cycle to submit at.
    #[serde(default)]
    pub at: u64,
    /// Status the response must carry.
    pub expect: Option<Status>,
}

/// One DMA record.
#[derive(Debug, Clone, Deserialize)]
pub struct DmaRecordDef {
    pub channel: u32,
    pub timestamp: u64,
    #[serde(default)]
    pub value: u32,
}

/// A DMA playback.
#[derive(Debug, Clone, Deserialize)]
pub struct DmaPlayback {
    /// Cycle to start at.
    #[serde(default)]
    pub start: u64,
    /// Cycles added to every recorded timestamp.
    #[serde(default)]
    pub offset: u64,
    pub records: Vec<DmaRecordDef>,
    /// First error the playback must latch. `"ok"` asserts none.
    pub expect_error: Option<Status>,
}

/// An external input event.
#[derive(Debug, Clone, Deserialize)]
pub struct InputDef {
    pub channel: usize,
    pub timestamp: u64,
    #[serde(default = "default_level")]
    pub value: u32,
}

fn default_level() -> u32 {
    1
}

#[derive(Debug, Clone, Deserialize)]
pub struct RunDef {
    /// Hard cycle limit.
    #[serde(default = "default_cycles")]
    pub cycles: u64,
}

impl Default for RunDef {
    fn default() -> Self {
        Self { cycles: default_cycles() }
    }
}

fn default_cycles() -> u64 {
    10_000
}

/// Outcome of one kernel step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StepOutcome {
    pub index: usize,
    pub op: KernelOp,
    pub submitted_at: u64,
    /// Cycle the response came back in, `None` if it never did.
    pub completed_at: Option<u64>,
    pub response: Option<Response>,
    pub expected: Option<Status>,
}

impl StepOutcome {
    pub fn passed(&self) -> bool {
        match (self.expected, self.response) {
            (Some(expected), Some(response)) => response.status == expected,
            (Some(_), None) => false,
            (None, _) => true,
        }
    }
}

/// Outcome of one DMA playback.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DmaOutcome {
    pub index: usize,
    pub started_at: Option<u64>,
    pub finished: bool,
    pub error: Option<DmaError>,
    pub expected: Option<Status>,
}

impl DmaOutcome {
    pub fn passed(&self) -> bool {
        match self.expected {
            None => true,
            Some(_) if !self.finished => false,
            Some(Status::Ok) => self.error.is_none(),
            Some(status) => self.error.is_some_and(|e| e.status == status),
        }
    }
}

/// Everything a scenario run produced.
#[derive(Debug, Clone)]
pub struct ScenarioReport {
    pub name: String,
    pub ident: String,
    pub cycles: u64,
    pub kernel: Vec<StepOutcome>,
    pub dma: Vec<DmaOutcome>,
    /// (channel, strobe) in channel order.
    pub strobes: Vec<(usize, Strobe)>,
    pub messages: Vec<String>,
    pub trace: AnalyzerDump,
}

impl ScenarioReport {
    /// Whether every expectation held.
    pub fn passed(&self) -> bool {
        self.kernel.iter().all(StepOutcome::passed) && self.dma.iter().all(DmaOutcome::passed)
    }

    /// Print a human-readable report.
    pub fn print_summary(&self) {
        println!("Scenario: {} on {} ({} cycles)", self.name, self.ident, self.cycles);

        if !self.kernel.is_empty() {
            println!();
            println!("Kernel:");
            for step in &self.kernel {
                let mark = if step.passed() { "ok  " } else { "FAIL" };
                let response = step
                    .response
                    .map(|r| r.to_string())
                    .unwrap_or_else(|| "no response".to_string());
                let expected = step
                    .expected
                    .map(|s| format!(" (expected {})", s))
                    .unwrap_or_default();
                match step.completed_at {
                    Some(done) => println!(
                        "  [{}] #{} {:?} @{} -> {} @{}{}",
                        mark, step.index, step.op, step.submitted_at, response, done, expected
                    ),
                    None => println!("  [{}] #{} {:?} @{} -> {}{}", mark, step.index, step.op, step.submitted_at, response, expected),
                }
            }
        }

        if !self.dma.is_empty() {
            println!();
            println!("DMA:");
            for job in &self.dma {
                let mark = if job.passed() { "ok  " } else { "FAIL" };
                let error = match job.error {
                    Some(e) => format!("{} on channel {} at {}", e.status, e.channel, e.timestamp),
                    None => "no error".to_string(),
                };
                println!("  [{}] #{} started={:?} finished={} {}", mark, job.index, job.started_at, job.finished, error);
            }
        }

        if !self.strobes.is_empty() {
            println!();
            println!("Strobes:");
            for (channel, strobe) in &self.strobes {
                println!(
                    "  ch{} cycle {} ts {} addr {} data 0x{:x}",
                    channel, strobe.cycle, strobe.timestamp, strobe.address, strobe.data
                );
            }
        }

        if !self.messages.is_empty() {
            println!();
            println!("Log channel:");
            for line in &self.messages {
                println!("  {}", line);
            }
        }

        println!();
        println!(
            "Analyzer: {} records{}",
            self.trace.records.len(),
            if self.trace.overflow { " (overflow)" } else { "" }
        );
        for record in &self.trace.records {
            println!(
                "  {:?} ch{} ts {} at {} data 0x{:x}",
                record.kind, record.channel, record.timestamp, record.rtio_counter, record.data
            );
        }

        println!();
        println!("Result: {}", if self.passed() { "PASS" } else { "FAIL" });
    }
}

impl Scenario {
    /// Load a scenario file.
    pub fn from_file(path: &Path) -> Result<Self, ScenarioError> {
        let content = std::fs::read_to_string(path).map_err(|source| ScenarioError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::parse(&content)
    }

    /// Parse scenario text.
    pub fn parse(content: &str) -> Result<Self, ScenarioError> {
        Ok(toml::from_str(content)?)
    }

    /// Freeze the `[system]` section. Boards default to `generic`.
    pub fn system_config(&self) -> Result<std::sync::Arc<SystemConfig>, ConfigError> {
        let mut config = self.system.clone();
        config.board.get_or_insert_with(|| "generic".to_string());
        SystemConfig::from_config(&config)
    }

    /// Build the system and run the scenario to completion or the cycle limit.
    pub fn run(&self) -> Result<ScenarioReport, ScenarioError> {
        let config = self.system_config()?;
        let fine_width = config.fine_ts_width();
        let mut system = RtioSystem::new(config);
        log::info!("Running scenario '{}'", self.scenario.name);

        for input in &self.input {
            if !system.inject_input(input.channel, Timestamp::new(input.timestamp), input.value) {
                log::warn!("Input on channel {} ignored: no input side", input.channel);
            }
        }

        let mut streams = VecDeque::new();
        for (index, job) in self.dma.iter().enumerate() {
            let mut rec = DmaRecorder::new(fine_width);
            for r in &job.records {
                rec.output(r.channel, Timestamp::new(r.timestamp), r.value)
                    .map_err(|source| ScenarioError::Dma { index, source })?;
            }
            streams.push_back((index, rec.finish()));
        }

        let mut kernel_outcomes: Vec<StepOutcome> = Vec::new();
        let mut dma_outcomes: Vec<DmaOutcome> = self
            .dma
            .iter()
            .enumerate()
            .map(|(index, job)| DmaOutcome {
                index,
                started_at: None,
                finished: false,
                error: None,
                expected: job.expect_error,
            })
            .collect();
        let mut active_dma: Option<usize> = None;
        let mut next_step = 0;
        let mut waiting = false;

        while system.now() < self.run.cycles {
            let now = system.now();

            // DMA: close the finished playback, start the next one
            if let Some(index) = active_dma {
                if system.dma().is_idle() {
                    dma_outcomes[index].finished = true;
                    dma_outcomes[index].error = system.dma().error();
                    active_dma = None;
                }
            }
            if active_dma.is_none() {
                let ready = streams
                    .front()
                    .is_some_and(|(index, _)| self.dma[*index].start <= now);
                if ready {
                    if let Some((index, stream)) = streams.pop_front() {
                        system
                            .start_dma(&stream, self.dma[index].offset)
                            .map_err(|source| ScenarioError::Dma { index, source })?;
                        dma_outcomes[index].started_at = Some(now);
                        active_dma = Some(index);
                    }
                }
            }

            // Kernel: submit the next step when the previous one is answered
            if !waiting {
                if let Some(step) = self.kernel.get(next_step) {
                    if step.at <= now {
                        self.submit_step(&mut system, step)
                            .map_err(|source| ScenarioError::Submit { index: next_step, source })?;
                        kernel_outcomes.push(StepOutcome {
                            index: next_step,
                            op: step.op,
                            submitted_at: now,
                            completed_at: None,
                            response: None,
                            expected: step.expect,
                        });
                        next_step += 1;
                        waiting = true;
                    }
                }
            }

            let done = !waiting
                && next_step == self.kernel.len()
                && active_dma.is_none()
                && streams.is_empty()
                && system.is_quiescent();
            if done {
                break;
            }

            system.tick();

            if waiting {
                if let Some(response) = system.kernel_mut().take_response() {
                    if let Some(outcome) = kernel_outcomes.last_mut() {
                        outcome.completed_at = Some(now);
                        outcome.response = Some(response);
                    }
                    waiting = false;
                }
            }
        }

        if let Some(index) = active_dma {
            dma_outcomes[index].finished = system.dma().is_idle();
            dma_outcomes[index].error = system.dma().error();
        }

        let mut strobes = Vec::new();
        let mut messages = Vec::new();
        let channels = system.core().channels();
        for ch in 0..channels.len() {
            if let Some(phy) = channels.phy(ch) {
                strobes.extend(phy.strobes().iter().map(|s| (ch, *s)));
                messages.extend(phy.messages().iter().cloned());
            }
        }

        let report = ScenarioReport {
            name: self.scenario.name.clone(),
            ident: system.config().ident().to_string(),
            cycles: system.now(),
            kernel: kernel_outcomes,
            dma: dma_outcomes,
            strobes,
            messages,
            trace: system.drain_analyzer(),
        };
        if report.passed() {
            log::info!("Scenario '{}' passed", report.name);
        } else {
            log::warn!("Scenario '{}' failed", report.name);
        }
        Ok(report)
    }

    fn submit_step(&self, system: &mut RtioSystem, step: &KernelStep) -> Result<(), SubmitError> {
        let kernel = system.kernel_mut();
        kernel.at(Timestamp::with_fine(step.timestamp, step.fine));
        match step.op {
            KernelOp::Output => kernel.output(step.channel, step.value),
            KernelOp::Input => kernel.input(step.channel),
            KernelOp::InputTimeout => kernel.input_until_now(step.channel),
            KernelOp::Log => kernel.log(step.channel, &step.message),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const BLINK: &str = r#"
[scenario]
name = "blink"

[system]
board = "generic"

[[kernel]]
op = "output"
channel = 0
timestamp = 20
value = 1
expect = "ok"

[[kernel]]
op = "output"
channel = 0
timestamp = 19
expect = "sequence_error"

[[kernel]]
op = "output"
channel = 0
timestamp = 30
value = 0
expect = "ok"
"#;

    #[test]
    fn test_parse_scenario() {
        let scenario = Scenario::parse(BLINK).unwrap();
        assert_eq!(scenario.scenario.name, "blink");
        assert_eq!(scenario.kernel.len(), 3);
        assert_eq!(scenario.kernel[1].expect, Some(Status::SequenceError));
        assert_eq!(scenario.run.cycles, 10_000);
        assert!(scenario.dma.is_empty());
    }

    #[test]
    fn test_run_blink() {
        let report = Scenario::parse(BLINK).unwrap().run().unwrap();
        assert!(report.passed());
        assert_eq!(report.ident, "generic");
        let cycles: Vec<u64> = report.strobes.iter().map(|(_, s)| s.cycle).collect();
        assert_eq!(cycles, vec![20, 30]);
        assert_eq!(report.trace.records.len(), 3);
        assert!(report.cycles >= 30);
        assert!(report.cycles < 10_000, "stops once everything settles");
    }

    #[test]
    fn test_run_dma_and_inputs() {
        let text = r#"
[[kernel]]
op = "input_timeout"
channel = 2
timestamp = 100
expect = "ok"

[[kernel]]
op = "input_timeout"
channel = 2
timestamp = 200
at = 150
expect = "no_data"

[[dma]]
start = 50
records = [
    { channel = 1, timestamp = 10, value = 1 },
    { channel = 1, timestamp = 80, value = 1 },
]
expect_error = "late"

[[input]]
channel = 2
timestamp = 40
"#;
        let report = Scenario::parse(text).unwrap().run().unwrap();
        assert!(report.passed(), "{:?}", report);
        assert_eq!(report.kernel[0].completed_at, Some(40));
        assert_eq!(report.kernel[0].response, Some(Response::input(1, Timestamp::new(40))));
        assert_eq!(report.kernel[1].completed_at, Some(200));
        assert_eq!(report.dma[0].started_at, Some(50));
        // The late record is dropped, the second still plays
        let ch1: Vec<u64> = report.strobes.iter().filter(|(c, _)| *c == 1).map(|(_, s)| s.cycle).collect();
        assert_eq!(ch1, vec![80]);
    }

    #[test]
    fn test_failed_expectation_reported() {
        let text = r#"
[[kernel]]
op = "output"
channel = 0
timestamp = 0
at = 5
expect = "ok"
"#;
        let report = Scenario::parse(text).unwrap().run().unwrap();
        assert!(!report.passed());
        assert_eq!(report.kernel[0].response.map(|r| r.status), Some(Status::Late));
    }

    #[test]
    fn test_log_message() {
        let text = r#"
[system]
board = "ebaz4205"

[[kernel]]
op = "log"
channel = 2
timestamp = 10
message = "hello from kernel"
"#;
        let report = Scenario::parse(text).unwrap().run().unwrap();
        assert_eq!(report.ident, "EBAZ4205");
        assert_eq!(report.messages, vec!["hello from kernel".to_string()]);
    }

    #[test]
    fn test_bad_scenarios() {
        assert!(matches!(Scenario::parse("[[kernel]]\nop = \"jump\"\nchannel = 0"), Err(ScenarioError::Parse(_))));

        let unknown_board = Scenario::parse("[system]\nboard = \"zedboard\"").unwrap();
        assert!(matches!(
            unknown_board.run(),
            Err(ScenarioError::Config(ConfigError::UnknownBoard(_)))
        ));

        let bad_channel = Scenario::parse("[[dma]]\nrecords = [{ channel = 16777216, timestamp = 0 }]").unwrap();
        assert!(matches!(bad_channel.run(), Err(ScenarioError::Dma { index: 0, .. })));
    }
}
