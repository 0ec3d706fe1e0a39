//! Test harness for running scenario files through the emulator.
//!
//! This module provides infrastructure for:
//! - Describing a run (board, kernel steps, DMA playbacks, inputs) in TOML
//! - Running it through the full tick loop
//! - Checking returned statuses against expectations
//!
//! # Usage
//!
//! ```bash
//! cargo run -- run scenarios/blink.toml
//! ```

pub mod scenario;

pub use scenario::{Scenario, ScenarioError, ScenarioReport, StepOutcome, DmaOutcome};
