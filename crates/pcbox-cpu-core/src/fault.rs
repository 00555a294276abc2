//! Access faults raised below the execution core.
//!
//! The memory and port layers report failures through [`Fault`]; the core only
//! propagates them. Deciding whether a fault is a retryable page-in or an
//! exception to deliver belongs to the fault-dispatch layer that owns
//! [`crate::state::CpuState::take_fault`].

use thiserror::Error;

use crate::mem::Access;
use crate::state::SegReg;

/// Architectural #SS vector.
pub const VECTOR_SS: u8 = 12;
/// Architectural #GP vector.
pub const VECTOR_GP: u8 = 13;
/// Architectural #PF vector.
pub const VECTOR_PF: u8 = 14;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemoryFaultKind {
    /// Offset (plus access length) beyond the cached segment limit.
    SegmentLimit,
    /// Segment not present, or not readable/writable for the requested access.
    Permission,
    /// No backing storage or translation for the linear address.
    Unmapped,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum Fault {
    #[error("memory fault ({kind:?}) on {access:?} at offset {offset:#010x}")]
    Memory {
        offset: u32,
        access: Access,
        kind: MemoryFaultKind,
        /// Segment register the access went through. The bus reports `None`;
        /// the core fills it in on the way out.
        seg: Option<SegReg>,
    },

    #[error("I/O permission denied for port {port:#06x}")]
    IoPermission { port: u16 },
}

impl Fault {
    pub fn memory(offset: u32, access: Access, kind: MemoryFaultKind) -> Self {
        Fault::Memory {
            offset,
            access,
            kind,
            seg: None,
        }
    }

    /// Tag a memory fault with the segment register used for the access.
    pub fn in_segment(self, seg: SegReg) -> Self {
        match self {
            Fault::Memory {
                offset,
                access,
                kind,
                ..
            } => Fault::Memory {
                offset,
                access,
                kind,
                seg: Some(seg),
            },
            other => other,
        }
    }

    pub fn segment(&self) -> Option<SegReg> {
        match self {
            Fault::Memory { seg, .. } => *seg,
            Fault::IoPermission { .. } => None,
        }
    }

    /// Exception vector the fault-dispatch layer should raise if it does not
    /// resolve the fault itself.
    pub fn vector(&self) -> u8 {
        match self {
            Fault::Memory {
                kind: MemoryFaultKind::Unmapped,
                ..
            } => VECTOR_PF,
            Fault::Memory {
                kind: MemoryFaultKind::SegmentLimit,
                seg: Some(SegReg::Ss),
                ..
            } => VECTOR_SS,
            Fault::Memory { .. } | Fault::IoPermission { .. } => VECTOR_GP,
        }
    }

    pub fn is_io(&self) -> bool {
        matches!(self, Fault::IoPermission { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn vectors_follow_fault_kind() {
        let gp = Fault::memory(0x10, Access::Write, MemoryFaultKind::SegmentLimit);
        assert_eq!(gp.vector(), VECTOR_GP);

        let pf = Fault::memory(0x10, Access::Read, MemoryFaultKind::Unmapped);
        assert_eq!(pf.vector(), VECTOR_PF);

        let io = Fault::IoPermission { port: 0x60 };
        assert_eq!(io.vector(), VECTOR_GP);
        assert!(io.is_io());
    }

    #[test]
    fn stack_segment_limit_raises_ss() {
        let limit = Fault::memory(0xFFFE, Access::Read, MemoryFaultKind::SegmentLimit);
        assert_eq!(limit.segment(), None);
        assert_eq!(limit.vector(), VECTOR_GP);

        let stack = limit.in_segment(SegReg::Ss);
        assert_eq!(stack.segment(), Some(SegReg::Ss));
        assert_eq!(stack.vector(), VECTOR_SS);
        assert_eq!(limit.in_segment(SegReg::Es).vector(), VECTOR_GP);

        let stack_pf = Fault::memory(0, Access::Write, MemoryFaultKind::Unmapped).in_segment(SegReg::Ss);
        assert_eq!(stack_pf.vector(), VECTOR_PF);

        let io = Fault::IoPermission { port: 0x60 };
        assert_eq!(io.in_segment(SegReg::Ss), io);
    }

    #[test]
    fn display_includes_location() {
        let f = Fault::IoPermission { port: 0x3F8 };
        assert_eq!(f.to_string(), "I/O permission denied for port 0x03f8");
    }
}
