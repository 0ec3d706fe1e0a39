//! Real-time I/O: the CRI bus and everything attached to it.
//!
//! Masters submit timestamped commands, a shared interconnect grants one per
//! cycle, and the core applies it to the channel array. The analyzer
//! watches what the core commits.
//!
//! # Architecture
//!
//! - [`timestamp`]: timestamps and the global TSC
//! - [`cri`]: commands, responses, and the master slot protocol
//! - [`kernel`]: software-paced master
//! - [`dma`]: stream recorder and replay master
//! - [`interconnect`]: fixed-priority arbiter and completion router
//! - [`core`]: the single CRI slave
//! - [`channel`] / [`phy`]: the channel array and its endpoints
//! - [`analyzer`]: trace ring buffer
//! - [`moninj`]: probe and override side channel
//! - [`csr`]: control/status register fields
//!
//! ```text
//!  KernelInitiator ─┐                     ┌─► ChannelArray ─► phys
//!                   ├─► CriInterconnect ─► RtioCore
//!  DmaEngine ───────┘         ▲           └─► Analyzer
//!                             └── completions
//! ```
//!
//! The components are stepped together by
//! [`RtioSystem`](crate::system::RtioSystem).

pub mod analyzer;
pub mod channel;
pub mod core;
pub mod cri;
pub mod csr;
pub mod dma;
pub mod interconnect;
pub mod kernel;
pub mod moninj;
pub mod phy;
pub mod timestamp;

pub use analyzer::{Analyzer, AnalyzerDump, TraceKind, TraceRecord};
pub use channel::ChannelArray;
pub use self::core::{ChannelState, CoreStats, RtioCore};
pub use cri::{
    Command, Completion, CriMaster, MasterId, MasterSlot, OpKind, Payload, PollResult, Response,
    SlotState, Status, SubmitError, Transaction,
};
pub use csr::{CsrRead, CsrValue, CsrWrite};
pub use dma::{DmaEngine, DmaError, DmaRecorder, DmaState};
pub use interconnect::CriInterconnect;
pub use kernel::KernelInitiator;
pub use timestamp::{Timestamp, Tsc};
