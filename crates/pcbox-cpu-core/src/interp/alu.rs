//! Status-flag computation for the arithmetic and logic classes.
//!
//! Every function here is pure: it takes operand values and returns the
//! result together with a [`FlagOutcome`]. Nothing is written to the CPU
//! until the caller has finished its memory accesses.

use crate::state::{CpuState, Flags, Width};

/// The six status flags produced by one evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FlagOutcome(Flags);

impl FlagOutcome {
    pub fn flags(self) -> Flags {
        self.0
    }

    pub fn cf(self) -> bool {
        self.0.contains(Flags::CF)
    }

    pub fn pf(self) -> bool {
        self.0.contains(Flags::PF)
    }

    pub fn af(self) -> bool {
        self.0.contains(Flags::AF)
    }

    pub fn zf(self) -> bool {
        self.0.contains(Flags::ZF)
    }

    pub fn sf(self) -> bool {
        self.0.contains(Flags::SF)
    }

    pub fn of(self) -> bool {
        self.0.contains(Flags::OF)
    }

    /// Commit into `state`, replacing all six status flags at once.
    pub fn apply(self, state: &mut CpuState) {
        state.commit_status(self.0);
    }
}

fn parity(byte: u8) -> bool {
    byte.count_ones() % 2 == 0
}

fn result_flags(result: u32, width: Width) -> Flags {
    let mut f = Flags::empty();
    f.set(Flags::ZF, result == 0);
    f.set(Flags::SF, result & width.sign_bit() != 0);
    f.set(Flags::PF, parity(result as u8));
    f
}

pub fn add_with_flags(dest: u32, src: u32, carry_in: bool, width: Width) -> (u32, FlagOutcome) {
    let mask = width.mask();
    let dest = dest & mask;
    let src = src & mask;
    let full = u64::from(dest) + u64::from(src) + u64::from(carry_in);
    let result = (full as u32) & mask;

    let sb = width.sign_bit();
    let mut f = result_flags(result, width);
    f.set(Flags::CF, full > u64::from(mask));
    f.set(Flags::OF, (dest ^ result) & (src ^ result) & sb != 0);
    f.set(Flags::AF, (dest ^ src ^ result) & 0x10 != 0);

    (result, FlagOutcome(f))
}

pub fn sub_with_flags(dest: u32, src: u32, borrow_in: bool, width: Width) -> (u32, FlagOutcome) {
    let mask = width.mask();
    let dest = dest & mask;
    let src = src & mask;
    let subtrahend = u64::from(src) + u64::from(borrow_in);
    let result = (u64::from(dest).wrapping_sub(subtrahend) as u32) & mask;

    let sb = width.sign_bit();
    let mut f = result_flags(result, width);
    f.set(Flags::CF, u64::from(dest) < subtrahend);
    // Sign of the true operand, not src + borrow, which may wrap to 0 at the top of the range.
    f.set(Flags::OF, (dest ^ src) & (dest ^ result) & sb != 0);
    f.set(Flags::AF, (dest ^ src ^ result) & 0x10 != 0);

    (result, FlagOutcome(f))
}

/// OR/AND/XOR/TEST. CF and OF are cleared; AF is left clear.
pub fn logic_flags(result: u32, width: Width) -> (u32, FlagOutcome) {
    let result = result & width.mask();
    (result, FlagOutcome(result_flags(result, width)))
}
