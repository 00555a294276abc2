//! Interpreter entry point for decoded instructions.

pub mod alu;
pub mod arith;
pub mod string;

use crate::config::CoreConfig;
use crate::fault::Fault;
use crate::mem::CpuBus;
use crate::state::CpuState;
use crate::timing::CycleClock;

use arith::{exec_alu, AluInst};
use string::{exec_string, DecodedStringInst, RepPhase};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstKind {
    Alu(AluInst),
    String(DecodedStringInst),
}

/// An instruction as handed over by the decoder.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DecodedInst {
    /// Encoded length in bytes, prefixes included.
    pub len: u32,
    pub kind: InstKind,
}

impl DecodedInst {
    pub fn alu(len: u32, inst: AluInst) -> Self {
        Self {
            len,
            kind: InstKind::Alu(inst),
        }
    }

    pub fn string(len: u32, inst: DecodedStringInst) -> Self {
        Self {
            len,
            kind: InstKind::String(inst),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepExit {
    /// Instruction retired; EIP points past it.
    Continue,
    /// REP instruction yielded with work left; EIP still points at it.
    RepYield,
    /// Aborted (or a fault was already latched). EIP still points at the
    /// instruction and `CpuState::fault` holds the fault.
    Fault(Fault),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StepResult {
    pub exit: StepExit,
    pub cycles: u64,
}

impl StepResult {
    fn new(exit: StepExit, cycles: u64) -> Self {
        Self { exit, cycles }
    }
}

/// Execute (or continue) one instruction.
pub fn step<B: CpuBus + ?Sized>(
    cfg: &CoreConfig,
    state: &mut CpuState,
    bus: &mut B,
    clock: &mut CycleClock,
    inst: &DecodedInst,
) -> StepResult {
    if let Some(fault) = state.fault {
        return StepResult::new(StepExit::Fault(fault), 0);
    }

    match &inst.kind {
        InstKind::Alu(alu) => match exec_alu(cfg, state, bus, clock, alu) {
            Ok(cycles) => {
                state.advance_eip(inst.len);
                StepResult::new(StepExit::Continue, u64::from(cycles))
            }
            Err(fault) => {
                tracing::debug!(eip = state.eip(), "alu instruction aborted: {fault}");
                state.fault = Some(fault);
                StepResult::new(StepExit::Fault(fault), 0)
            }
        },
        InstKind::String(s) => {
            let out = exec_string(cfg, state, bus, clock, s);
            let exit = match out.phase {
                RepPhase::Idle | RepPhase::Done => {
                    state.advance_eip(inst.len);
                    StepExit::Continue
                }
                RepPhase::Iterating => StepExit::RepYield,
                RepPhase::Aborted(fault) => {
                    state.fault = Some(fault);
                    StepExit::Fault(fault)
                }
            };
            StepResult::new(exit, out.cycles)
        }
    }
}
