//! Cycle accounting.
//!
//! Each CPU generation gets one static [`CostTable`]. The interpreter charges
//! costs against a caller-owned [`CycleClock`]; REP string loops additionally
//! compute a [`RepDeadline`] so that long repeats give the scheduler a chance
//! to service timers and interrupts.

use serde::{Deserialize, Serialize};

use crate::state::Width;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CpuGeneration {
    I286,
    I386Sx,
    I386Dx,
    I486Slc,
    I486Dlc,
    /// Intel/AMD 486SX/DX/DX4 and RapidCAD.
    I486,
    Cx486,
    Cx5x86,
    WinChip,
    /// Pentium, Pentium MMX, K6.
    Pentium,
}

impl CpuGeneration {
    pub const ALL: [CpuGeneration; 10] = [
        CpuGeneration::I286,
        CpuGeneration::I386Sx,
        CpuGeneration::I386Dx,
        CpuGeneration::I486Slc,
        CpuGeneration::I486Dlc,
        CpuGeneration::I486,
        CpuGeneration::Cx486,
        CpuGeneration::Cx5x86,
        CpuGeneration::WinChip,
        CpuGeneration::Pentium,
    ];

    /// 386 or later (32-bit register file, eligible for the recompiler slice).
    pub fn is_386_or_later(self) -> bool {
        !matches!(self, CpuGeneration::I286)
    }

    /// 486-class core timings (including the 486-on-386-bus parts).
    pub fn is_486_class(self) -> bool {
        !matches!(
            self,
            CpuGeneration::I286 | CpuGeneration::I386Sx | CpuGeneration::I386Dx
        )
    }

    pub fn costs(self) -> &'static CostTable {
        &COST_TABLES[self as usize]
    }
}

/// Generic ALU timings, named after the operand locations (destination first).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AluTimings {
    /// register dest, register src
    pub rr: u32,
    /// register dest, memory src
    pub rm: u32,
    /// memory dest, register src
    pub mr: u32,
    /// register dest, memory src, 32-bit
    pub rml: u32,
    /// memory dest, register src, 32-bit
    pub mrl: u32,
}

/// `(register form, memory form)` costs for instructions with fixed timings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PairCost {
    pub reg: u32,
    pub mem: u32,
}

impl PairCost {
    pub fn pick(self, memory: bool) -> u32 {
        if memory {
            self.mem
        } else {
            self.reg
        }
    }
}

/// Per-element string instruction costs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StringTimings {
    pub movs: u32,
    pub stos: u32,
    pub lods: u32,
    pub cmps: u32,
    pub scas: u32,
    pub ins: u32,
    pub outs: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CostTable {
    pub alu: AluTimings,
    /// CMP r/m,reg and TEST r/m,reg.
    pub cmp_test: PairCost,
    /// CMP r/m,imm.
    pub cmp_imm: PairCost,
    pub string: StringTimings,
    /// Cycles a REP loop may consume per dispatch in the interpreter.
    pub rep_slice: i64,
    /// Same, when the block recompiler is driving a 386+ core.
    pub rep_slice_recompiler: i64,
}

/// Which operands of an ALU instruction live in memory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OperandForm {
    RegReg,
    /// register destination, memory source
    RegMem,
    /// memory destination, register source
    MemReg,
    AccImm,
    RegImm,
    MemImm,
}

impl OperandForm {
    pub fn touches_memory(self) -> bool {
        matches!(
            self,
            OperandForm::RegMem | OperandForm::MemReg | OperandForm::MemImm
        )
    }
}

/// Cost class of an ALU operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AluCostClass {
    /// Read-modify-write (ADD, OR, ADC, SBB, AND, SUB, XOR).
    Generic,
    Cmp,
    Test,
}

impl CostTable {
    pub fn alu(&self, class: AluCostClass, form: OperandForm, width: Width) -> u32 {
        let t = &self.alu;
        let long = width == Width::Dword;
        match (class, form) {
            (_, OperandForm::AccImm) => t.rr,
            (_, OperandForm::RegMem) => {
                if long {
                    t.rml
                } else {
                    t.rm
                }
            }
            (AluCostClass::Generic, OperandForm::RegReg | OperandForm::RegImm) => t.rr,
            (AluCostClass::Generic, OperandForm::MemImm) => t.mr,
            (AluCostClass::Generic, OperandForm::MemReg) => {
                if long {
                    t.mrl
                } else {
                    t.mr
                }
            }
            (AluCostClass::Cmp, OperandForm::RegImm | OperandForm::MemImm) => {
                self.cmp_imm.pick(form.touches_memory())
            }
            (AluCostClass::Cmp | AluCostClass::Test, _) => {
                self.cmp_test.pick(form.touches_memory())
            }
        }
    }

    pub fn rep_slice(&self, recompiler: bool) -> i64 {
        if recompiler {
            self.rep_slice_recompiler
        } else {
            self.rep_slice
        }
    }
}

const STRING_386: StringTimings = StringTimings {
    movs: 4,
    stos: 5,
    lods: 5,
    cmps: 9,
    scas: 8,
    ins: 15,
    outs: 14,
};

const STRING_486: StringTimings = StringTimings {
    movs: 3,
    stos: 4,
    lods: 4,
    cmps: 7,
    scas: 5,
    ins: 15,
    outs: 14,
};

const CMP_TEST_386: PairCost = PairCost { reg: 2, mem: 5 };
const CMP_TEST_486: PairCost = PairCost { reg: 1, mem: 2 };
const CMP_IMM_386: PairCost = PairCost { reg: 2, mem: 7 };
const CMP_IMM_486: PairCost = PairCost { reg: 1, mem: 2 };

const fn table(alu: AluTimings, is486: bool, is386: bool) -> CostTable {
    CostTable {
        alu,
        cmp_test: if is486 { CMP_TEST_486 } else { CMP_TEST_386 },
        cmp_imm: if is486 { CMP_IMM_486 } else { CMP_IMM_386 },
        string: if is486 { STRING_486 } else { STRING_386 },
        rep_slice: 100,
        rep_slice_recompiler: if is386 { 1000 } else { 100 },
    }
}

const fn alu(rr: u32, rm: u32, mr: u32, rml: u32, mrl: u32) -> AluTimings {
    AluTimings {
        rr,
        rm,
        mr,
        rml,
        mrl,
    }
}

// Indexed by `CpuGeneration as usize`.
static COST_TABLES: [CostTable; 10] = [
    table(alu(2, 7, 7, 9, 11), false, false), // I286
    table(alu(2, 6, 7, 8, 11), false, true),  // I386Sx
    table(alu(2, 6, 7, 6, 7), false, true),   // I386Dx
    table(alu(1, 3, 5, 5, 7), true, true),    // I486Slc
    table(alu(1, 3, 3, 3, 3), true, true),    // I486Dlc
    table(alu(1, 2, 3, 2, 3), true, true),    // I486
    table(alu(1, 3, 3, 3, 3), true, true),    // Cx486
    table(alu(1, 1, 2, 1, 2), true, true),    // Cx5x86
    table(alu(1, 2, 2, 2, 2), true, true),    // WinChip
    table(alu(1, 2, 3, 2, 3), true, true),    // Pentium
];

/// Remaining cycles before the emulator must return to its scheduler.
///
/// The counter is signed: instructions may overshoot the budget and the
/// debt carries into the next slice.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CycleClock {
    remaining: i64,
}

impl CycleClock {
    pub fn new(budget: i64) -> Self {
        Self { remaining: budget }
    }

    pub fn remaining(&self) -> i64 {
        self.remaining
    }

    pub fn charge(&mut self, cycles: u32) {
        self.remaining -= i64::from(cycles);
    }

    /// Grant another scheduler slice.
    pub fn add(&mut self, cycles: i64) {
        self.remaining += cycles;
    }

    pub fn is_exhausted(&self) -> bool {
        self.remaining <= 0
    }
}

/// Loop-local stop point for one REP dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RepDeadline {
    end: i64,
}

impl RepDeadline {
    pub fn new(clock: &CycleClock, slice: i64, single_step: bool) -> Self {
        let end = if single_step {
            // Checked only after an element completes, so exactly one runs.
            clock.remaining() + 1
        } else {
            clock.remaining() - slice
        };
        Self { end }
    }

    pub fn expired(&self, clock: &CycleClock) -> bool {
        clock.remaining() < self.end
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tables_are_indexed_by_generation() {
        assert_eq!(CpuGeneration::I286.costs().alu.rm, 7);
        assert_eq!(CpuGeneration::I386Dx.costs().alu.mrl, 7);
        assert_eq!(CpuGeneration::I486.costs().alu.mr, 3);
        assert_eq!(CpuGeneration::Cx5x86.costs().alu.rm, 1);
    }

    #[test]
    fn early_generations_pay_more_for_memory_operands() {
        for gen in CpuGeneration::ALL {
            let c = gen.costs();
            assert!(c.alu.rr <= c.alu.rm, "{gen:?}");
            assert!(c.alu.rr <= c.alu.mr, "{gen:?}");
        }
        let early = CpuGeneration::I386Sx.costs();
        let late = CpuGeneration::I486.costs();
        assert!(early.alu.mr > late.alu.mr);
        assert!(early.string.movs > late.string.movs);
        assert!(early.string.scas > late.string.scas);
    }

    #[test]
    fn alu_cost_selects_long_variants_for_dwords() {
        let c = CpuGeneration::I386Sx.costs();
        assert_eq!(c.alu(AluCostClass::Generic, OperandForm::MemReg, Width::Word), 7);
        assert_eq!(c.alu(AluCostClass::Generic, OperandForm::MemReg, Width::Dword), 11);
        assert_eq!(c.alu(AluCostClass::Generic, OperandForm::RegMem, Width::Dword), 8);
        assert_eq!(c.alu(AluCostClass::Generic, OperandForm::MemImm, Width::Dword), 7);
        assert_eq!(c.alu(AluCostClass::Cmp, OperandForm::MemImm, Width::Byte), 7);
        assert_eq!(c.alu(AluCostClass::Test, OperandForm::MemReg, Width::Byte), 5);
        assert_eq!(c.alu(AluCostClass::Cmp, OperandForm::AccImm, Width::Byte), 2);
    }

    #[test]
    fn generation_classes_match_tables() {
        for gen in CpuGeneration::ALL {
            let c = gen.costs();
            assert_eq!(c.string == STRING_486, gen.is_486_class(), "{gen:?}");
            assert_eq!(c.rep_slice_recompiler == 1000, gen.is_386_or_later(), "{gen:?}");
        }
    }

    #[test]
    fn recompiler_slice_only_applies_to_386_and_later() {
        assert_eq!(CpuGeneration::I286.costs().rep_slice(true), 100);
        assert_eq!(CpuGeneration::I386Dx.costs().rep_slice(true), 1000);
        assert_eq!(CpuGeneration::I386Dx.costs().rep_slice(false), 100);
    }

    #[test]
    fn deadline_expires_after_slice() {
        let mut clock = CycleClock::new(500);
        let deadline = RepDeadline::new(&clock, 100, false);
        clock.charge(100);
        assert!(!deadline.expired(&clock));
        clock.charge(1);
        assert!(deadline.expired(&clock));
    }

    #[test]
    fn single_step_deadline_stops_after_first_element() {
        let mut clock = CycleClock::new(-20);
        let deadline = RepDeadline::new(&clock, 100, true);
        clock.charge(1);
        assert!(deadline.expired(&clock));
    }

    #[test]
    fn clock_carries_debt() {
        let mut clock = CycleClock::new(3);
        clock.charge(5);
        assert!(clock.is_exhausted());
        assert_eq!(clock.remaining(), -2);
        clock.add(10);
        assert_eq!(clock.remaining(), 8);
    }
}
