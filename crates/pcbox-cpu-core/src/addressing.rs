//! ModRM/SIB operand resolution for 16- and 32-bit addressing.

use crate::fault::Fault;
use crate::mem::{read_sized, write_sized, Access, CpuBus};
use crate::state::{gpr, AddrSize, CpuState, SegReg, Width};

/// Split ModRM byte. Only [`ModRm::from_byte`] builds one, so every field is
/// within 0..=3 or 0..=7.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ModRm {
    mode: u8,
    reg: u8,
    rm: u8,
}

impl ModRm {
    pub const fn from_byte(byte: u8) -> Self {
        Self {
            mode: byte >> 6,
            reg: (byte >> 3) & 7,
            rm: byte & 7,
        }
    }

    pub const fn mode(self) -> u8 {
        self.mode
    }

    pub const fn reg(self) -> u8 {
        self.reg
    }

    pub const fn rm(self) -> u8 {
        self.rm
    }

    pub const fn is_register(self) -> bool {
        self.mode == 3
    }
}

/// Decoded operand bytes. `disp` is already sign-extended by the decoder;
/// `sib` is ignored unless 32-bit addressing selects it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct OperandEncoding {
    pub modrm: ModRm,
    pub sib: u8,
    pub disp: i32,
}

impl OperandEncoding {
    pub const fn new(modrm: u8, sib: u8, disp: i32) -> Self {
        Self {
            modrm: ModRm::from_byte(modrm),
            sib,
            disp,
        }
    }

    /// `mod = 3` register form.
    pub const fn reg(rm: u8) -> Self {
        Self::new(0xC0 | (rm & 7), 0, 0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operand {
    Reg { index: usize, width: Width },
    Mem { seg: SegReg, offset: u32, width: Width },
}

impl Operand {
    pub fn is_memory(&self) -> bool {
        matches!(self, Operand::Mem { .. })
    }
}

fn reg16(state: &CpuState, index: usize) -> u32 {
    state.gpr[index] & 0xFFFF
}

fn ea16(state: &CpuState, m: ModRm, disp: i32) -> (SegReg, u32) {
    let (base, default_seg) = match m.rm {
        0 => (reg16(state, gpr::EBX) + reg16(state, gpr::ESI), SegReg::Ds),
        1 => (reg16(state, gpr::EBX) + reg16(state, gpr::EDI), SegReg::Ds),
        2 => (reg16(state, gpr::EBP) + reg16(state, gpr::ESI), SegReg::Ss),
        3 => (reg16(state, gpr::EBP) + reg16(state, gpr::EDI), SegReg::Ss),
        4 => (reg16(state, gpr::ESI), SegReg::Ds),
        5 => (reg16(state, gpr::EDI), SegReg::Ds),
        6 if m.mode == 0 => (0, SegReg::Ds),
        6 => (reg16(state, gpr::EBP), SegReg::Ss),
        _ => (reg16(state, gpr::EBX), SegReg::Ds),
    };
    (default_seg, base.wrapping_add(disp as u32) & 0xFFFF)
}

fn base_seg(base: usize) -> SegReg {
    match base {
        gpr::ESP | gpr::EBP => SegReg::Ss,
        _ => SegReg::Ds,
    }
}

fn ea32(state: &CpuState, m: ModRm, sib: u8, disp: i32) -> (SegReg, u32) {
    let disp = disp as u32;
    if m.rm != 4 {
        if m.mode == 0 && m.rm == 5 {
            return (SegReg::Ds, disp);
        }
        let base = m.rm as usize;
        return (base_seg(base), state.gpr[base].wrapping_add(disp));
    }

    let scale = sib >> 6;
    let index = ((sib >> 3) & 7) as usize;
    let base = (sib & 7) as usize;

    let scaled = if index == gpr::ESP {
        0
    } else {
        state.gpr[index] << scale
    };
    let (seg, base_val) = if base == gpr::EBP && m.mode == 0 {
        (SegReg::Ds, 0)
    } else {
        (base_seg(base), state.gpr[base])
    };
    (seg, base_val.wrapping_add(scaled).wrapping_add(disp))
}

/// Default segment and offset of a memory operand, or `None` for a register
/// operand. Performs no access checks.
pub fn effective_address(
    state: &CpuState,
    enc: &OperandEncoding,
    addr_size: AddrSize,
) -> Option<(SegReg, u32)> {
    if enc.modrm.is_register() {
        return None;
    }
    Some(match addr_size {
        AddrSize::A16 => ea16(state, enc.modrm, enc.disp),
        AddrSize::A32 => ea32(state, enc.modrm, enc.sib, enc.disp),
    })
}

/// Resolve the r/m operand and validate it for `access`.
///
/// No data is fetched; a rejected access leaves the machine untouched.
pub fn resolve<B: CpuBus + ?Sized>(
    state: &CpuState,
    bus: &mut B,
    enc: &OperandEncoding,
    width: Width,
    addr_size: AddrSize,
    seg_override: Option<SegReg>,
    access: Access,
) -> Result<Operand, Fault> {
    let Some((default_seg, offset)) = effective_address(state, enc, addr_size) else {
        return Ok(Operand::Reg {
            index: enc.modrm.rm as usize,
            width,
        });
    };
    let seg = seg_override.unwrap_or(default_seg);
    bus.check_access(state.segment(seg), offset, width.bytes(), access)
        .map_err(|f| f.in_segment(seg))?;
    Ok(Operand::Mem { seg, offset, width })
}

pub fn read_operand<B: CpuBus + ?Sized>(
    state: &CpuState,
    bus: &mut B,
    op: Operand,
) -> Result<u32, Fault> {
    match op {
        Operand::Reg { index, width } => Ok(state.read_gpr(index, width)),
        Operand::Mem { seg, offset, width } => {
            read_sized(bus, state.segment(seg), offset, width).map_err(|f| f.in_segment(seg))
        }
    }
}

pub fn write_operand<B: CpuBus + ?Sized>(
    state: &mut CpuState,
    bus: &mut B,
    op: Operand,
    val: u32,
) -> Result<(), Fault> {
    match op {
        Operand::Reg { index, width } => {
            state.write_gpr(index, width, val);
            Ok(())
        }
        Operand::Mem { seg, offset, width } => {
            write_sized(bus, state.segment(seg), offset, width, val).map_err(|f| f.in_segment(seg))
        }
    }
}
