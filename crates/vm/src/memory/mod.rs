//! Defines the [`Memory`] type, responsible for representing the memory of the machine.
//!
//! # Regions
//!
//! The memory is split into two regions that never alias:
//!
//! - The *instructions region* holds the raw text of the program, one instruction per line. It
//!   is loaded once, before a run starts, and is never modified afterwards. A line is addressed
//!   by its index, which is what the [`ProgramCounter`](crate::pc::ProgramCounter) holds.
//!
//! - The *stack region* is the [`OperandStack`], the only memory instructions are able to
//!   write to.

mod stack;

pub use self::stack::*;

/// Represents the memory of the machine.
///
/// More information on memory can be found in [module-level documentation](self).
#[derive(Default, Debug)]
pub struct Memory {
    /// The lines of the loaded program.
    instructions: Box<[String]>,
    /// The operand stack.
    stack: OperandStack,
}

impl Memory {
    /// Creates a new [`Memory`] holding the provided program and an empty stack.
    pub fn new<I, S>(program: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            instructions: program.into_iter().map(Into::into).collect(),
            stack: OperandStack::new(),
        }
    }

    /// Returns the instructions region.
    #[inline(always)]
    pub fn instructions(&self) -> &[String] {
        &self.instructions
    }

    /// Returns the raw line at `address`, if any.
    #[inline]
    pub fn instruction(&self, address: usize) -> Option<&str> {
        self.instructions.get(address).map(String::as_str)
    }

    /// Returns the stack region.
    #[inline(always)]
    pub fn stack(&self) -> &OperandStack {
        &self.stack
    }

    /// Returns the stack region, mutably.
    #[inline(always)]
    pub fn stack_mut(&mut self) -> &mut OperandStack {
        &mut self.stack
    }
}
