use std::collections::BTreeSet;

use crate::fault::{Fault, MemoryFaultKind};
use crate::state::{Segment, Width};

/// Access intent used for segment validation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Access {
    Read,
    Write,
}

/// Memory and port I/O as seen by the execution core.
///
/// Every call may fail; the core checks each result and aborts the current
/// instruction (or string element) on the first fault. Segment-limit and
/// paging policy live entirely behind this trait.
pub trait CpuBus {
    /// Validate `len` bytes at `seg:offset` for `access` without touching memory.
    fn check_access(
        &mut self,
        seg: &Segment,
        offset: u32,
        len: u32,
        access: Access,
    ) -> Result<(), Fault>;

    fn read_u8(&mut self, seg: &Segment, offset: u32) -> Result<u8, Fault>;
    fn read_u16(&mut self, seg: &Segment, offset: u32) -> Result<u16, Fault>;
    fn read_u32(&mut self, seg: &Segment, offset: u32) -> Result<u32, Fault>;

    fn write_u8(&mut self, seg: &Segment, offset: u32, val: u8) -> Result<(), Fault>;
    fn write_u16(&mut self, seg: &Segment, offset: u32, val: u16) -> Result<(), Fault>;
    fn write_u32(&mut self, seg: &Segment, offset: u32, val: u32) -> Result<(), Fault>;

    /// I/O permission check for `len` consecutive ports starting at `port`.
    ///
    /// Real mode and CPL <= IOPL contexts have no bitmap to consult, so the
    /// default allows everything.
    fn check_io_perm(&mut self, _port: u16, _len: u32) -> Result<(), Fault> {
        Ok(())
    }

    fn io_read(&mut self, port: u16, width: Width) -> Result<u32, Fault>;
    fn io_write(&mut self, port: u16, width: Width, val: u32) -> Result<(), Fault>;
}

pub fn read_sized<B: CpuBus + ?Sized>(
    bus: &mut B,
    seg: &Segment,
    offset: u32,
    width: Width,
) -> Result<u32, Fault> {
    match width {
        Width::Byte => bus.read_u8(seg, offset).map(u32::from),
        Width::Word => bus.read_u16(seg, offset).map(u32::from),
        Width::Dword => bus.read_u32(seg, offset),
    }
}

pub fn write_sized<B: CpuBus + ?Sized>(
    bus: &mut B,
    seg: &Segment,
    offset: u32,
    width: Width,
    val: u32,
) -> Result<(), Fault> {
    match width {
        Width::Byte => bus.write_u8(seg, offset, val as u8),
        Width::Word => bus.write_u16(seg, offset, val as u16),
        Width::Dword => bus.write_u32(seg, offset, val),
    }
}

/// Flat-memory bus used by unit tests and benches.
///
/// Linear addresses map 1:1 onto a byte vector. Segment limits and
/// read/write permissions are enforced from the cached segment, and ports in
/// the denied set fail the I/O permission check.
#[derive(Debug, Clone)]
pub struct FlatTestBus {
    mem: Vec<u8>,
    denied_ports: BTreeSet<u16>,
}

impl FlatTestBus {
    pub fn new(size: usize) -> Self {
        Self {
            mem: vec![0; size],
            denied_ports: BTreeSet::new(),
        }
    }

    pub fn load(&mut self, addr: u32, data: &[u8]) {
        let start = addr as usize;
        let end = start + data.len();
        self.mem[start..end].copy_from_slice(data);
    }

    pub fn slice(&self, addr: u32, len: usize) -> &[u8] {
        let start = addr as usize;
        let end = start + len;
        &self.mem[start..end]
    }

    pub fn deny_port(&mut self, port: u16) {
        self.denied_ports.insert(port);
    }

    fn validate(&self, seg: &Segment, offset: u32, len: u32, access: Access) -> Result<u32, Fault> {
        if !seg.is_present() {
            return Err(Fault::memory(offset, access, MemoryFaultKind::Permission));
        }
        let allowed = match access {
            Access::Read => seg.is_readable(),
            Access::Write => seg.is_writable(),
        };
        if !allowed {
            return Err(Fault::memory(offset, access, MemoryFaultKind::Permission));
        }
        let last = offset
            .checked_add(len.saturating_sub(1))
            .ok_or(Fault::memory(offset, access, MemoryFaultKind::SegmentLimit))?;
        if last > seg.limit {
            return Err(Fault::memory(offset, access, MemoryFaultKind::SegmentLimit));
        }
        let linear = seg.linear(offset);
        let end = linear as usize + len as usize;
        if end > self.mem.len() {
            return Err(Fault::memory(offset, access, MemoryFaultKind::Unmapped));
        }
        Ok(linear)
    }

    fn read_bytes<const N: usize>(&self, seg: &Segment, offset: u32) -> Result<[u8; N], Fault> {
        let start = self.validate(seg, offset, N as u32, Access::Read)? as usize;
        let mut buf = [0u8; N];
        buf.copy_from_slice(&self.mem[start..start + N]);
        Ok(buf)
    }

    fn write_bytes(&mut self, seg: &Segment, offset: u32, bytes: &[u8]) -> Result<(), Fault> {
        let start = self.validate(seg, offset, bytes.len() as u32, Access::Write)? as usize;
        self.mem[start..start + bytes.len()].copy_from_slice(bytes);
        Ok(())
    }
}

impl CpuBus for FlatTestBus {
    fn check_access(
        &mut self,
        seg: &Segment,
        offset: u32,
        len: u32,
        access: Access,
    ) -> Result<(), Fault> {
        self.validate(seg, offset, len, access).map(|_| ())
    }

    fn read_u8(&mut self, seg: &Segment, offset: u32) -> Result<u8, Fault> {
        self.read_bytes::<1>(seg, offset).map(|b| b[0])
    }

    fn read_u16(&mut self, seg: &Segment, offset: u32) -> Result<u16, Fault> {
        self.read_bytes::<2>(seg, offset).map(u16::from_le_bytes)
    }

    fn read_u32(&mut self, seg: &Segment, offset: u32) -> Result<u32, Fault> {
        self.read_bytes::<4>(seg, offset).map(u32::from_le_bytes)
    }

    fn write_u8(&mut self, seg: &Segment, offset: u32, val: u8) -> Result<(), Fault> {
        self.write_bytes(seg, offset, &[val])
    }

    fn write_u16(&mut self, seg: &Segment, offset: u32, val: u16) -> Result<(), Fault> {
        self.write_bytes(seg, offset, &val.to_le_bytes())
    }

    fn write_u32(&mut self, seg: &Segment, offset: u32, val: u32) -> Result<(), Fault> {
        self.write_bytes(seg, offset, &val.to_le_bytes())
    }

    fn check_io_perm(&mut self, port: u16, len: u32) -> Result<(), Fault> {
        for i in 0..len {
            let p = port.wrapping_add(i as u16);
            if self.denied_ports.contains(&p) {
                return Err(Fault::IoPermission { port: p });
            }
        }
        Ok(())
    }

    fn io_read(&mut self, _port: u16, width: Width) -> Result<u32, Fault> {
        // Floating bus.
        Ok(width.mask())
    }

    fn io_write(&mut self, _port: u16, _width: Width, _val: u32) -> Result<(), Fault> {
        Ok(())
    }
}
