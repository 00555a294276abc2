//! x86 execution core for the pcbox PC emulator.
//!
//! This crate covers operand resolution, the two-operand ALU group, the REP
//! string engine and cycle accounting. Memory, paging, port devices and
//! interrupt delivery sit behind [`CpuBus`] and the caller-owned
//! [`CycleClock`] / [`PendingEvents`].
//!
//! The entry point is [`interp::step`], which runs or continues one decoded
//! instruction against a [`CpuState`].

#![forbid(unsafe_code)]

pub mod addressing;
pub mod config;
pub mod fault;
pub mod interp;
pub mod mem;
pub mod state;
pub mod timing;

pub use config::CoreConfig;
pub use fault::{Fault, MemoryFaultKind};
pub use interp::{step, DecodedInst, InstKind, StepExit, StepResult};
pub use mem::{Access, CpuBus, FlatTestBus};
pub use state::{AddrSize, CpuMode, CpuState, Flags, PendingEvents, SegReg, Segment, Width};
pub use timing::{CpuGeneration, CycleClock};
