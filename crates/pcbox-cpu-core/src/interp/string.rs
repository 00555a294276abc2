//! MOVS/STOS/LODS/CMPS/SCAS/INS/OUTS with REP, REPE and REPNE.
//!
//! A REP instruction runs element by element until its count reaches zero,
//! a compare terminates it, or it runs out of time. Running out of time is
//! not an error: the instruction returns [`RepPhase::Iterating`], EIP stays
//! on it, and the next dispatch picks up from the architectural registers.
//! Nothing else survives between dispatches.

use crate::config::CoreConfig;
use crate::fault::Fault;
use crate::interp::alu;
use crate::mem::{read_sized, write_sized, Access, CpuBus};
use crate::state::{gpr, AddrSize, CpuState, Flags, SegReg, Width};
use crate::timing::{CycleClock, RepDeadline, StringTimings};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum RepPrefix {
    #[default]
    None,
    F2,
    F3,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RepMode {
    None,
    Rep,
    Repe,
    Repne,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum StringOp {
    Movs,
    Stos,
    Lods,
    Cmps,
    Scas,
    Ins,
    Outs,
}

impl StringOp {
    fn cost(self, t: &StringTimings) -> u32 {
        match self {
            StringOp::Movs => t.movs,
            StringOp::Stos => t.stos,
            StringOp::Lods => t.lods,
            StringOp::Cmps => t.cmps,
            StringOp::Scas => t.scas,
            StringOp::Ins => t.ins,
            StringOp::Outs => t.outs,
        }
    }

    fn compares(self) -> bool {
        matches!(self, StringOp::Cmps | StringOp::Scas)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DecodedStringInst {
    pub op: StringOp,
    pub width: Width,
    pub addr_size: AddrSize,
    pub rep: RepPrefix,
    /// Applies to the source (DS:SI) only; the destination is always ES.
    pub seg_override: Option<SegReg>,
}

impl DecodedStringInst {
    pub fn new(op: StringOp, width: Width, addr_size: AddrSize, rep: RepPrefix) -> Self {
        Self {
            op,
            width,
            addr_size,
            rep,
            seg_override: None,
        }
    }

    pub fn with_override(mut self, seg: SegReg) -> Self {
        self.seg_override = Some(seg);
        self
    }

    pub fn rep_mode(&self) -> RepMode {
        effective_rep_mode(self.op, self.rep)
    }
}

fn effective_rep_mode(op: StringOp, rep: RepPrefix) -> RepMode {
    match rep {
        RepPrefix::None => RepMode::None,
        RepPrefix::F3 if op.compares() => RepMode::Repe,
        RepPrefix::F2 if op.compares() => RepMode::Repne,
        RepPrefix::F3 | RepPrefix::F2 => RepMode::Rep,
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RepPhase {
    /// Count was already zero: nothing touched.
    Idle,
    /// Yielded with work left; EIP must stay on the instruction.
    Iterating,
    Done,
    Aborted(Fault),
}

impl RepPhase {
    pub fn is_complete(self) -> bool {
        matches!(self, RepPhase::Idle | RepPhase::Done)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct StringOutcome {
    pub phase: RepPhase,
    /// Elements completed during this dispatch.
    pub elements: u32,
    pub cycles: u64,
}

fn addr_width(addr_size: AddrSize) -> Width {
    match addr_size {
        AddrSize::A16 => Width::Word,
        AddrSize::A32 => Width::Dword,
    }
}

fn read_count(state: &CpuState, addr_size: AddrSize) -> u32 {
    state.read_gpr(gpr::ECX, addr_width(addr_size))
}

fn write_count(state: &mut CpuState, addr_size: AddrSize, value: u32) {
    state.write_gpr(gpr::ECX, addr_width(addr_size), value);
}

fn read_si(state: &CpuState, addr_size: AddrSize) -> u32 {
    state.read_gpr(gpr::ESI, addr_width(addr_size))
}

fn write_si(state: &mut CpuState, addr_size: AddrSize, value: u32) {
    state.write_gpr(gpr::ESI, addr_width(addr_size), value);
}

fn read_di(state: &CpuState, addr_size: AddrSize) -> u32 {
    state.read_gpr(gpr::EDI, addr_width(addr_size))
}

fn write_di(state: &mut CpuState, addr_size: AddrSize, value: u32) {
    state.write_gpr(gpr::EDI, addr_width(addr_size), value);
}

fn add_wrapping(value: u32, delta: i32, addr_size: AddrSize) -> u32 {
    value.wrapping_add(delta as u32) & addr_size.mask()
}

/// Registers a REP loop works on, loaded once per dispatch.
///
/// The working copies are written back only after an element has finished
/// every access, so a faulting element leaves SI/DI/count where it started.
#[derive(Clone, Copy, Debug)]
pub struct RepContext {
    pub mode: RepMode,
    pub count: u32,
    pub si: u32,
    pub di: u32,
    /// Signed element stride, negative when DF is set.
    pub delta: i32,
    pub deadline: Option<RepDeadline>,
}

impl RepContext {
    pub fn load(
        state: &CpuState,
        inst: &DecodedStringInst,
        clock: &CycleClock,
        cfg: &CoreConfig,
    ) -> Self {
        let mode = inst.rep_mode();
        let bytes = inst.width.bytes() as i32;
        let deadline = (mode != RepMode::None)
            .then(|| RepDeadline::new(clock, cfg.rep_slice(), single_step(state)));
        Self {
            mode,
            count: match mode {
                RepMode::None => 1,
                _ => read_count(state, inst.addr_size),
            },
            si: read_si(state, inst.addr_size),
            di: read_di(state, inst.addr_size),
            delta: if state.flag(Flags::DF) { -bytes } else { bytes },
            deadline,
        }
    }

    fn commit(&self, state: &mut CpuState, addr_size: AddrSize) {
        write_si(state, addr_size, self.si);
        write_di(state, addr_size, self.di);
        if self.mode != RepMode::None {
            write_count(state, addr_size, self.count);
        }
    }

    /// REPE/REPNE early exit, checked against the flags of the element just run.
    fn condition_fails(&self, state: &CpuState) -> bool {
        match self.mode {
            RepMode::Repe => !state.flag(Flags::ZF),
            RepMode::Repne => state.flag(Flags::ZF),
            RepMode::None | RepMode::Rep => false,
        }
    }
}

/// TF set, or a trap armed by the surrounding machine.
fn single_step(state: &CpuState) -> bool {
    state.flag(Flags::TF) || state.pending.trap
}

/// One element. On success SI/DI in `ctx` have moved; on failure nothing
/// architectural has changed.
fn run_element<B: CpuBus + ?Sized>(
    state: &mut CpuState,
    bus: &mut B,
    inst: &DecodedStringInst,
    ctx: &mut RepContext,
) -> Result<(), Fault> {
    let width = inst.width;
    let bytes = width.bytes();
    let addr_size = inst.addr_size;
    let src_reg = inst.seg_override.unwrap_or(SegReg::Ds);
    let src_seg = *state.segment(src_reg);
    let es = *state.segment(SegReg::Es);
    let on_src = |f: Fault| f.in_segment(src_reg);
    let on_es = |f: Fault| f.in_segment(SegReg::Es);
    let port = state.read_gpr(gpr::EDX, Width::Word) as u16;

    match inst.op {
        StringOp::Movs => {
            bus.check_access(&es, ctx.di, bytes, Access::Write).map_err(on_es)?;
            let val = read_sized(bus, &src_seg, ctx.si, width).map_err(on_src)?;
            write_sized(bus, &es, ctx.di, width, val).map_err(on_es)?;
            ctx.si = add_wrapping(ctx.si, ctx.delta, addr_size);
            ctx.di = add_wrapping(ctx.di, ctx.delta, addr_size);
        }
        StringOp::Stos => {
            bus.check_access(&es, ctx.di, bytes, Access::Write).map_err(on_es)?;
            let val = state.read_gpr(gpr::EAX, width);
            write_sized(bus, &es, ctx.di, width, val).map_err(on_es)?;
            ctx.di = add_wrapping(ctx.di, ctx.delta, addr_size);
        }
        StringOp::Lods => {
            let val = read_sized(bus, &src_seg, ctx.si, width).map_err(on_src)?;
            state.write_gpr(gpr::EAX, width, val);
            ctx.si = add_wrapping(ctx.si, ctx.delta, addr_size);
        }
        StringOp::Cmps => {
            let src = read_sized(bus, &src_seg, ctx.si, width).map_err(on_src)?;
            let dst = read_sized(bus, &es, ctx.di, width).map_err(on_es)?;
            // CMPS subtracts the destination (ES:DI) from the source.
            let (_, flags) = alu::sub_with_flags(src, dst, false, width);
            flags.apply(state);
            ctx.si = add_wrapping(ctx.si, ctx.delta, addr_size);
            ctx.di = add_wrapping(ctx.di, ctx.delta, addr_size);
        }
        StringOp::Scas => {
            let mem = read_sized(bus, &es, ctx.di, width).map_err(on_es)?;
            let acc = state.read_gpr(gpr::EAX, width);
            let (_, flags) = alu::sub_with_flags(acc, mem, false, width);
            flags.apply(state);
            ctx.di = add_wrapping(ctx.di, ctx.delta, addr_size);
        }
        StringOp::Ins => {
            bus.check_io_perm(port, bytes)?;
            bus.check_access(&es, ctx.di, bytes, Access::Write).map_err(on_es)?;
            let val = bus.io_read(port, width)?;
            write_sized(bus, &es, ctx.di, width, val).map_err(on_es)?;
            ctx.di = add_wrapping(ctx.di, ctx.delta, addr_size);
        }
        StringOp::Outs => {
            bus.check_io_perm(port, bytes)?;
            let val = read_sized(bus, &src_seg, ctx.si, width).map_err(on_src)?;
            bus.io_write(port, width, val)?;
            ctx.si = add_wrapping(ctx.si, ctx.delta, addr_size);
        }
    }
    Ok(())
}

/// Run a string instruction for at most one scheduler slice.
///
/// The caller advances EIP only when the returned phase is complete.
pub fn exec_string<B: CpuBus + ?Sized>(
    cfg: &CoreConfig,
    state: &mut CpuState,
    bus: &mut B,
    clock: &mut CycleClock,
    inst: &DecodedStringInst,
) -> StringOutcome {
    let mut ctx = RepContext::load(state, inst, clock, cfg);
    let mut out = StringOutcome {
        phase: RepPhase::Idle,
        elements: 0,
        cycles: 0,
    };
    if ctx.count == 0 {
        return out;
    }

    let cost = inst.op.cost(&cfg.costs().string);
    loop {
        let mut next = ctx;
        if let Err(fault) = run_element(state, bus, inst, &mut next) {
            tracing::debug!(
                op = ?inst.op,
                count = ctx.count,
                elements = out.elements,
                "string instruction aborted: {fault}"
            );
            out.phase = RepPhase::Aborted(fault);
            return out;
        }
        ctx = next;
        if ctx.mode != RepMode::None {
            ctx.count -= 1;
        }
        ctx.commit(state, inst.addr_size);
        clock.charge(cost);
        out.elements += 1;
        out.cycles += u64::from(cost);

        let Some(deadline) = ctx.deadline else {
            out.phase = RepPhase::Done;
            return out;
        };
        if ctx.count == 0 || ctx.condition_fails(state) {
            out.phase = RepPhase::Done;
            return out;
        }
        if deadline.expired(clock) || state.pending.interrupt {
            tracing::trace!(
                op = ?inst.op,
                remaining = ctx.count,
                elements = out.elements,
                "rep yield"
            );
            out.phase = RepPhase::Iterating;
            return out;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rep_prefixes_map_per_operation() {
        assert_eq!(effective_rep_mode(StringOp::Movs, RepPrefix::F2), RepMode::Rep);
        assert_eq!(effective_rep_mode(StringOp::Stos, RepPrefix::F3), RepMode::Rep);
        assert_eq!(effective_rep_mode(StringOp::Cmps, RepPrefix::F3), RepMode::Repe);
        assert_eq!(effective_rep_mode(StringOp::Scas, RepPrefix::F2), RepMode::Repne);
        assert_eq!(effective_rep_mode(StringOp::Lods, RepPrefix::None), RepMode::None);
    }

    #[test]
    fn pointers_wrap_at_address_size() {
        assert_eq!(add_wrapping(0xFFFF, 1, AddrSize::A16), 0);
        assert_eq!(add_wrapping(0, -2, AddrSize::A16), 0xFFFE);
        assert_eq!(add_wrapping(0xFFFF, 1, AddrSize::A32), 0x1_0000);
        assert_eq!(add_wrapping(0, -4, AddrSize::A32), 0xFFFF_FFFC);
    }

    #[test]
    fn count_uses_cx_or_ecx() {
        let mut state = CpuState::default();
        state.gpr[gpr::ECX] = 0x0001_0003;
        assert_eq!(read_count(&state, AddrSize::A16), 3);
        assert_eq!(read_count(&state, AddrSize::A32), 0x0001_0003);
        write_count(&mut state, AddrSize::A16, 0);
        assert_eq!(state.gpr[gpr::ECX], 0x0001_0000);
    }
}
