//! Defines the [`ProgramCounter`] type.

use num_traits::ToPrimitive;

use crate::error::Error;
use crate::Word;

/// The **Program Counter**, the index of the next instruction to be fetched from the
/// instructions region of the [`Memory`](crate::memory::Memory).
///
/// # Invariants
///
/// The value is never negative, but it is *not* guaranteed to reference a valid line: jumps are
/// not checked, and the validity of the address is only verified when the next instruction is
/// fetched.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ProgramCounter(usize);

impl ProgramCounter {
    /// Creates a new [`ProgramCounter`] pointing to the first instruction.
    #[inline(always)]
    pub const fn new() -> Self {
        Self(0)
    }

    /// Returns the current value of the program counter.
    #[inline(always)]
    pub const fn get(&self) -> usize {
        self.0
    }

    /// Sets the program counter to `address`.
    #[inline(always)]
    pub fn jump(&mut self, address: usize) {
        self.0 = address;
    }

    /// Sets the program counter to the address held by an operand.
    ///
    /// Negative operands cannot be represented by the program counter and are rejected with
    /// [`Error::InvalidProgramCounter`] right away.
    pub fn jump_to_word(&mut self, target: Word, program_len: usize) -> Result<(), Error> {
        let address = target.to_usize().ok_or(Error::InvalidProgramCounter {
            pc: target,
            len: program_len,
        })?;
        self.jump(address);
        Ok(())
    }

    /// Advances the program counter to the next instruction.
    #[inline(always)]
    pub fn increment(&mut self) {
        self.0 = self.0.wrapping_add(1);
    }

    /// Resets the program counter to the first instruction.
    #[inline(always)]
    pub fn reset(&mut self) {
        self.0 = 0;
    }
}
