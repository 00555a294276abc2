//! The two-operand ALU group: ADD, OR, ADC, SBB, AND, SUB, XOR, CMP and TEST.
//!
//! All encodings funnel into [`exec_alu`], which is generic over width,
//! address size and operand location.

use crate::addressing::{read_operand, resolve, write_operand, Operand, OperandEncoding};
use crate::config::CoreConfig;
use crate::fault::Fault;
use crate::interp::alu::{add_with_flags, logic_flags, sub_with_flags, FlagOutcome};
use crate::mem::{Access, CpuBus};
use crate::state::{gpr, AddrSize, CpuState, Flags, SegReg, Width};
use crate::timing::{AluCostClass, CycleClock, OperandForm};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AluOp {
    Add,
    Or,
    Adc,
    Sbb,
    And,
    Sub,
    Xor,
    Cmp,
    Test,
}

impl AluOp {
    /// Operation selected by the `/reg` field of the 0x80/0x81/0x83 group.
    pub fn from_group(reg: u8) -> Self {
        match reg & 7 {
            0 => AluOp::Add,
            1 => AluOp::Or,
            2 => AluOp::Adc,
            3 => AluOp::Sbb,
            4 => AluOp::And,
            5 => AluOp::Sub,
            6 => AluOp::Xor,
            _ => AluOp::Cmp,
        }
    }

    pub fn writes_result(self) -> bool {
        !matches!(self, AluOp::Cmp | AluOp::Test)
    }

    pub fn uses_carry(self) -> bool {
        matches!(self, AluOp::Adc | AluOp::Sbb)
    }

    pub fn cost_class(self) -> AluCostClass {
        match self {
            AluOp::Cmp => AluCostClass::Cmp,
            AluOp::Test => AluCostClass::Test,
            _ => AluCostClass::Generic,
        }
    }

    pub fn evaluate(self, dst: u32, src: u32, carry_in: bool, width: Width) -> (u32, FlagOutcome) {
        match self {
            AluOp::Add => add_with_flags(dst, src, false, width),
            AluOp::Adc => add_with_flags(dst, src, carry_in, width),
            AluOp::Sub | AluOp::Cmp => sub_with_flags(dst, src, false, width),
            AluOp::Sbb => sub_with_flags(dst, src, carry_in, width),
            AluOp::Or => logic_flags(dst | src, width),
            AluOp::And | AluOp::Test => logic_flags(dst & src, width),
            AluOp::Xor => logic_flags(dst ^ src, width),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AluForm {
    /// `op r/m, reg`: destination is the r/m operand.
    RmReg { enc: OperandEncoding },
    /// `op reg, r/m`: destination is the reg field.
    RegRm { enc: OperandEncoding },
    /// `op AL/AX/EAX, imm`.
    AccImm { imm: u32 },
    /// `op r/m, imm`.
    RmImm { enc: OperandEncoding, imm: u32 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AluInst {
    pub op: AluOp,
    pub width: Width,
    pub addr_size: AddrSize,
    pub seg_override: Option<SegReg>,
    pub form: AluForm,
}

impl AluInst {
    pub fn new(op: AluOp, width: Width, addr_size: AddrSize, form: AluForm) -> Self {
        Self {
            op,
            width,
            addr_size,
            seg_override: None,
            form,
        }
    }

    pub fn with_override(mut self, seg: SegReg) -> Self {
        self.seg_override = Some(seg);
        self
    }
}

fn reg_operand(index: u8, width: Width) -> Operand {
    Operand::Reg {
        index: index as usize,
        width,
    }
}

/// Execute one ALU instruction. Returns the cycles charged.
///
/// A fault leaves registers, memory and flags exactly as they were.
pub fn exec_alu<B: CpuBus + ?Sized>(
    cfg: &CoreConfig,
    state: &mut CpuState,
    bus: &mut B,
    clock: &mut CycleClock,
    inst: &AluInst,
) -> Result<u32, Fault> {
    let op = inst.op;
    let width = inst.width;
    let carry_in = op.uses_carry() && state.flag(Flags::CF);
    let dst_access = if op.writes_result() {
        Access::Write
    } else {
        Access::Read
    };

    let (dst, src_val, form) = match inst.form {
        AluForm::RmReg { enc } => {
            let dst = resolve(state, bus, &enc, width, inst.addr_size, inst.seg_override, dst_access)?;
            let src = state.read_gpr(enc.modrm.reg() as usize, width);
            let form = if dst.is_memory() {
                OperandForm::MemReg
            } else {
                OperandForm::RegReg
            };
            (dst, src, form)
        }
        AluForm::RegRm { enc } => {
            let src = resolve(state, bus, &enc, width, inst.addr_size, inst.seg_override, Access::Read)?;
            let form = if src.is_memory() {
                OperandForm::RegMem
            } else {
                OperandForm::RegReg
            };
            let src_val = read_operand(state, bus, src)?;
            (reg_operand(enc.modrm.reg(), width), src_val, form)
        }
        AluForm::AccImm { imm } => (
            reg_operand(gpr::EAX as u8, width),
            imm & width.mask(),
            OperandForm::AccImm,
        ),
        AluForm::RmImm { enc, imm } => {
            let dst = resolve(state, bus, &enc, width, inst.addr_size, inst.seg_override, dst_access)?;
            let form = if dst.is_memory() {
                OperandForm::MemImm
            } else {
                OperandForm::RegImm
            };
            (dst, imm & width.mask(), form)
        }
    };

    let dst_val = read_operand(state, bus, dst)?;
    let (result, outcome) = op.evaluate(dst_val, src_val, carry_in, width);

    if op.writes_result() {
        write_operand(state, bus, dst, result)?;
    }
    outcome.apply(state);

    let cycles = cfg.costs().alu(op.cost_class(), form, width);
    clock.charge(cycles);
    Ok(cycles)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn group_field_maps_in_encoding_order() {
        let ops: Vec<AluOp> = (0..8).map(AluOp::from_group).collect();
        assert_eq!(
            ops,
            [
                AluOp::Add,
                AluOp::Or,
                AluOp::Adc,
                AluOp::Sbb,
                AluOp::And,
                AluOp::Sub,
                AluOp::Xor,
                AluOp::Cmp
            ]
        );
    }

    #[test]
    fn compare_classes_do_not_store() {
        assert!(!AluOp::Cmp.writes_result());
        assert!(!AluOp::Test.writes_result());
        assert!(AluOp::Sbb.writes_result());
        assert_eq!(AluOp::Test.cost_class(), AluCostClass::Test);
    }

    #[test]
    fn sbb_subtracts_carry() {
        let (r, f) = AluOp::Sbb.evaluate(5, 2, true, Width::Byte);
        assert_eq!(r, 2);
        assert!(!f.cf());
        let (r, _) = AluOp::Sbb.evaluate(5, 2, false, Width::Byte);
        assert_eq!(r, 3);
    }
}
