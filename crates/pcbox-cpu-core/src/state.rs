use bitflags::bitflags;

use crate::fault::Fault;

bitflags! {
    /// EFLAGS bits the execution core reads or writes.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct Flags: u32 {
        const CF = 1 << 0;
        const RESERVED1 = 1 << 1;
        const PF = 1 << 2;
        const AF = 1 << 4;
        const ZF = 1 << 6;
        const SF = 1 << 7;
        const TF = 1 << 8;
        const IF = 1 << 9;
        const DF = 1 << 10;
        const OF = 1 << 11;

        /// The six arithmetic status flags produced by ALU evaluations.
        const STATUS = Self::CF.bits()
            | Self::PF.bits()
            | Self::AF.bits()
            | Self::ZF.bits()
            | Self::SF.bits()
            | Self::OF.bits();
    }
}

impl Default for Flags {
    fn default() -> Self {
        Flags::RESERVED1
    }
}

/// General purpose register numbers as encoded in ModRM/SIB fields.
pub mod gpr {
    pub const EAX: usize = 0;
    pub const ECX: usize = 1;
    pub const EDX: usize = 2;
    pub const EBX: usize = 3;
    pub const ESP: usize = 4;
    pub const EBP: usize = 5;
    pub const ESI: usize = 6;
    pub const EDI: usize = 7;
}

/// Operand width of a single access.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Width {
    Byte,
    Word,
    Dword,
}

impl Width {
    pub const fn bytes(self) -> u32 {
        match self {
            Width::Byte => 1,
            Width::Word => 2,
            Width::Dword => 4,
        }
    }

    pub const fn bits(self) -> u32 {
        self.bytes() * 8
    }

    pub const fn mask(self) -> u32 {
        match self {
            Width::Byte => 0xFF,
            Width::Word => 0xFFFF,
            Width::Dword => 0xFFFF_FFFF,
        }
    }

    pub const fn sign_bit(self) -> u32 {
        1 << (self.bits() - 1)
    }
}

/// Effective address size (the 0x67 prefix toggles between the two).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AddrSize {
    A16,
    A32,
}

impl AddrSize {
    pub const fn mask(self) -> u32 {
        match self {
            AddrSize::A16 => 0xFFFF,
            AddrSize::A32 => 0xFFFF_FFFF,
        }
    }
}

/// Code segment size; determines the instruction pointer width.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CpuMode {
    Bit16,
    Bit32,
}

impl CpuMode {
    pub fn ip_mask(self) -> u32 {
        match self {
            CpuMode::Bit16 => 0xFFFF,
            CpuMode::Bit32 => 0xFFFF_FFFF,
        }
    }

    pub fn default_addr_size(self) -> AddrSize {
        match self {
            CpuMode::Bit16 => AddrSize::A16,
            CpuMode::Bit32 => AddrSize::A32,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SegReg {
    Es = 0,
    Cs = 1,
    Ss = 2,
    Ds = 3,
    Fs = 4,
    Gs = 5,
}

pub const SEG_ACCESS_PRESENT: u8 = 1 << 7;
pub const SEG_ACCESS_CODE: u8 = 1 << 3;
/// Writable for data segments, readable for code segments.
pub const SEG_ACCESS_RW: u8 = 1 << 1;

/// Hidden (cached) part of a segment register.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Segment {
    pub selector: u16,
    pub base: u32,
    pub limit: u32,
    pub access: u8,
}

impl Segment {
    /// Segment as loaded by a real-mode `MOV sreg`: 64 KiB read/write data.
    pub fn real_mode(selector: u16) -> Self {
        Self {
            selector,
            base: u32::from(selector) << 4,
            limit: 0xFFFF,
            access: SEG_ACCESS_PRESENT | SEG_ACCESS_RW | 0x11,
        }
    }

    /// Flat 4 GiB read/write data segment.
    pub fn flat() -> Self {
        Self {
            selector: 0,
            base: 0,
            limit: 0xFFFF_FFFF,
            access: SEG_ACCESS_PRESENT | SEG_ACCESS_RW | 0x11,
        }
    }

    pub fn is_present(&self) -> bool {
        self.access & SEG_ACCESS_PRESENT != 0
    }

    pub fn is_code(&self) -> bool {
        self.access & SEG_ACCESS_CODE != 0
    }

    pub fn is_writable(&self) -> bool {
        !self.is_code() && self.access & SEG_ACCESS_RW != 0
    }

    pub fn is_readable(&self) -> bool {
        !self.is_code() || self.access & SEG_ACCESS_RW != 0
    }

    pub fn linear(&self, offset: u32) -> u32 {
        self.base.wrapping_add(offset)
    }
}

/// Events raised by the rest of the machine that force a REP loop to stop
/// after its current element.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PendingEvents {
    /// Single-step trap armed for this instruction.
    pub trap: bool,
    /// A maskable or non-maskable interrupt is waiting for an instruction boundary.
    pub interrupt: bool,
}

#[derive(Debug, Clone)]
pub struct CpuState {
    pub gpr: [u32; 8],
    eip: u32,
    pub flags: Flags,
    pub segments: [Segment; 6],
    pub mode: CpuMode,
    pub pending: PendingEvents,
    pub fault: Option<Fault>,
}

impl Default for CpuState {
    fn default() -> Self {
        Self::new(CpuMode::Bit16)
    }
}

impl CpuState {
    pub fn new(mode: CpuMode) -> Self {
        let seg = match mode {
            CpuMode::Bit16 => Segment::real_mode(0),
            CpuMode::Bit32 => Segment::flat(),
        };
        Self {
            gpr: [0; 8],
            eip: 0,
            flags: Flags::default(),
            segments: [seg; 6],
            mode,
            pending: PendingEvents::default(),
            fault: None,
        }
    }

    pub fn eip(&self) -> u32 {
        self.eip & self.mode.ip_mask()
    }

    pub fn set_eip(&mut self, eip: u32) {
        self.eip = eip & self.mode.ip_mask();
    }

    pub fn advance_eip(&mut self, delta: u32) {
        self.set_eip(self.eip().wrapping_add(delta));
    }

    pub fn segment(&self, seg: SegReg) -> &Segment {
        &self.segments[seg as usize]
    }

    pub fn set_segment(&mut self, seg: SegReg, value: Segment) {
        self.segments[seg as usize] = value;
    }

    pub fn flag(&self, flag: Flags) -> bool {
        self.flags.contains(flag)
    }

    pub fn set_flag(&mut self, flag: Flags, value: bool) {
        self.flags.set(flag, value);
    }

    /// Replace the status flags, leaving control flags (TF/IF/DF) untouched.
    pub fn commit_status(&mut self, status: Flags) {
        self.flags = (self.flags - Flags::STATUS) | (status & Flags::STATUS) | Flags::RESERVED1;
    }

    /// Read a general purpose register through its `width` view.
    ///
    /// For byte accesses, register numbers 4-7 name AH/CH/DH/BH.
    pub fn read_gpr(&self, index: usize, width: Width) -> u32 {
        match width {
            Width::Byte if index >= 4 => (self.gpr[index - 4] >> 8) & 0xFF,
            Width::Byte => self.gpr[index] & 0xFF,
            Width::Word => self.gpr[index] & 0xFFFF,
            Width::Dword => self.gpr[index],
        }
    }

    pub fn write_gpr(&mut self, index: usize, width: Width, val: u32) {
        match width {
            Width::Byte if index >= 4 => {
                let cur = self.gpr[index - 4];
                self.gpr[index - 4] = (cur & !0xFF00) | ((val & 0xFF) << 8);
            }
            Width::Byte => {
                let cur = self.gpr[index];
                self.gpr[index] = (cur & !0xFF) | (val & 0xFF);
            }
            Width::Word => {
                let cur = self.gpr[index];
                self.gpr[index] = (cur & !0xFFFF) | (val & 0xFFFF);
            }
            Width::Dword => self.gpr[index] = val,
        }
    }

    /// Clear the latched fault. Called by the fault-dispatch layer once it has
    /// decided how to handle it.
    pub fn take_fault(&mut self) -> Option<Fault> {
        self.fault.take()
    }
}
