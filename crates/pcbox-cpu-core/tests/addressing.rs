use pcbox_cpu_core::addressing::{
    effective_address, read_operand, resolve, write_operand, ModRm, Operand, OperandEncoding,
};
use pcbox_cpu_core::fault::VECTOR_SS;
use pcbox_cpu_core::state::gpr;
use pcbox_cpu_core::{
    Access, AddrSize, CpuMode, CpuState, Fault, FlatTestBus, MemoryFaultKind, SegReg, Segment, Width,
};

fn ea(state: &CpuState, modrm: u8, sib: u8, disp: i32, addr_size: AddrSize) -> (SegReg, u32) {
    effective_address(state, &OperandEncoding::new(modrm, sib, disp), addr_size).unwrap()
}

#[test]
fn sixteen_bit_forms() {
    let mut s = CpuState::new(CpuMode::Bit16);
    s.gpr[gpr::EBX] = 0x1000;
    s.gpr[gpr::EBP] = 0x2000;
    s.gpr[gpr::ESI] = 0x0010;
    s.gpr[gpr::EDI] = 0x0020;

    assert_eq!(ea(&s, 0x00, 0, 0, AddrSize::A16), (SegReg::Ds, 0x1010));
    assert_eq!(ea(&s, 0x01, 0, 0, AddrSize::A16), (SegReg::Ds, 0x1020));
    assert_eq!(ea(&s, 0x02, 0, 0, AddrSize::A16), (SegReg::Ss, 0x2010));
    assert_eq!(ea(&s, 0x03, 0, 0, AddrSize::A16), (SegReg::Ss, 0x2020));
    assert_eq!(ea(&s, 0x04, 0, 0, AddrSize::A16), (SegReg::Ds, 0x0010));
    assert_eq!(ea(&s, 0x05, 0, 0, AddrSize::A16), (SegReg::Ds, 0x0020));
    assert_eq!(ea(&s, 0x06, 0, 0x1234, AddrSize::A16), (SegReg::Ds, 0x1234));
    assert_eq!(ea(&s, 0x46, 0, -2, AddrSize::A16), (SegReg::Ss, 0x1FFE));
    assert_eq!(ea(&s, 0x87, 0, 0x100, AddrSize::A16), (SegReg::Ds, 0x1100));
}

#[test]
fn sixteen_bit_offsets_wrap() {
    let mut s = CpuState::new(CpuMode::Bit16);
    s.gpr[gpr::EBX] = 0xFFF0;
    s.gpr[gpr::ESI] = 0x0020;
    assert_eq!(ea(&s, 0x40, 0, 0x7F, AddrSize::A16), (SegReg::Ds, 0x008F));
    // Upper halves of the registers do not take part.
    s.gpr[gpr::EBX] = 0xABCD_0001;
    assert_eq!(ea(&s, 0x07, 0, 0, AddrSize::A16), (SegReg::Ds, 0x0001));
}

#[test]
fn thirty_two_bit_base_index_scale() {
    let mut s = CpuState::new(CpuMode::Bit32);
    s.gpr[gpr::EAX] = 0x1000;
    s.gpr[gpr::ECX] = 0x10;
    s.gpr[gpr::EBP] = 0x8000;

    // [eax+ecx*4+8]
    assert_eq!(ea(&s, 0x44, 0x88, 8, AddrSize::A32), (SegReg::Ds, 0x1048));
    // [ebp+ecx*2]
    assert_eq!(ea(&s, 0x44, 0x4D, 0, AddrSize::A32), (SegReg::Ss, 0x8020));
    // [ecx*8+disp32]: mod 0 with SIB base 5 has no base register.
    assert_eq!(ea(&s, 0x04, 0xCD, 0x100, AddrSize::A32), (SegReg::Ds, 0x180));
    // SIB index 4 means no index.
    assert_eq!(ea(&s, 0x04, 0x20, 0, AddrSize::A32), (SegReg::Ds, 0x1000));
    // [disp32]
    assert_eq!(ea(&s, 0x05, 0, 0x4000, AddrSize::A32), (SegReg::Ds, 0x4000));
    // [ebp+disp8]
    assert_eq!(ea(&s, 0x45, 0, -0x10, AddrSize::A32), (SegReg::Ss, 0x7FF0));
}

#[test]
fn thirty_two_bit_arithmetic_wraps() {
    let mut s = CpuState::new(CpuMode::Bit32);
    s.gpr[gpr::EDX] = 0xFFFF_FFF0;
    assert_eq!(ea(&s, 0x82, 0, 0x20, AddrSize::A32), (SegReg::Ds, 0x10));
}

#[test]
fn resolve_applies_override_and_checks_access() {
    let mut s = CpuState::new(CpuMode::Bit16);
    let mut bus = FlatTestBus::new(0x2_0000);
    s.gpr[gpr::EBP] = 0x10;
    s.set_segment(SegReg::Fs, Segment::real_mode(0x1000));

    let enc = OperandEncoding::new(0x46, 0, 0);
    let op = resolve(&s, &mut bus, &enc, Width::Word, AddrSize::A16, Some(SegReg::Fs), Access::Write).unwrap();
    assert_eq!(
        op,
        Operand::Mem {
            seg: SegReg::Fs,
            offset: 0x10,
            width: Width::Word
        }
    );

    write_operand(&mut s, &mut bus, op, 0xBEEF).unwrap();
    assert_eq!(bus.slice(0x1_0010, 2), &[0xEF, 0xBE]);
    assert_eq!(read_operand(&s, &mut bus, op).unwrap(), 0xBEEF);
}

#[test]
fn resolve_rejects_access_past_limit() {
    let mut s = CpuState::new(CpuMode::Bit16);
    let mut bus = FlatTestBus::new(0x1_0000);
    let mut ss = Segment::real_mode(0);
    ss.limit = 0x100;
    s.set_segment(SegReg::Ss, ss);
    s.gpr[gpr::EBP] = 0xFF;

    // dword at [bp] straddles the limit
    let err = resolve(&s, &mut bus, &OperandEncoding::new(0x46, 0, 0), Width::Dword, AddrSize::A16, None, Access::Read)
        .unwrap_err();
    assert_eq!(
        err,
        Fault::memory(0xFF, Access::Read, MemoryFaultKind::SegmentLimit).in_segment(SegReg::Ss)
    );
    assert_eq!(err.vector(), VECTOR_SS);
}

#[test]
fn register_operand_has_no_side_effects() {
    let mut s = CpuState::new(CpuMode::Bit16);
    let mut bus = FlatTestBus::new(0);
    s.gpr[gpr::EBX] = 0x1234;

    // mod 3, rm 7 is BH for byte operands.
    let op = resolve(&s, &mut bus, &OperandEncoding::reg(7), Width::Byte, AddrSize::A16, None, Access::Write).unwrap();
    assert_eq!(op, Operand::Reg { index: 7, width: Width::Byte });
    assert_eq!(read_operand(&s, &mut bus, op).unwrap(), 0x12);

    write_operand(&mut s, &mut bus, op, 0xAB).unwrap();
    assert_eq!(s.gpr[gpr::EBX], 0xAB34);
}

#[test]
fn every_modrm_byte_decodes_to_valid_register_numbers() {
    let mut s = CpuState::new(CpuMode::Bit32);
    let mut bus = FlatTestBus::new(0);
    s.gpr = [0x10, 0x11, 0x12, 0x13, 0x14, 0x15, 0x16, 0x17];

    for byte in 0..=u8::MAX {
        let m = ModRm::from_byte(byte);
        assert!(m.mode() <= 3 && m.reg() <= 7 && m.rm() <= 7, "{byte:#04x}");
        if !m.is_register() {
            continue;
        }
        let op = resolve(&s, &mut bus, &OperandEncoding::new(byte, 0, 0), Width::Dword, AddrSize::A32, None, Access::Read)
            .unwrap();
        assert_eq!(op, Operand::Reg { index: usize::from(byte & 7), width: Width::Dword });
        assert_eq!(read_operand(&s, &mut bus, op).unwrap(), 0x10 + u32::from(byte & 7));
    }
}
