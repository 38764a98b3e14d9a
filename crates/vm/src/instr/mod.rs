//! Defines the [`Instruction`] trait, implemented by every opcode the machine understands, as
//! well as the decoding of raw program lines.
//!
//! # Program Lines
//!
//! A program is a sequence of text lines. Each line is one of:
//!
//! - blank, or a no-op placeholder ([`NOOP_MNEMONIC`], either alone or as the sole parameter of
//!   the line). Those act as jump targets and are skipped by the engine.
//! - the halt marker ([`HALT_MNEMONIC`]), which ends the run.
//! - a mnemonic, optionally followed by whitespace-delimited integer parameters.
//!
//! Mnemonics are case-insensitive.

use std::fmt;

use bitflags::bitflags;

use crate::error::Error;
use crate::host::Host;
use crate::memory::OperandStack;
use crate::{ExecutionContext, Word};

mod ops;
mod registry;

pub use self::ops::*;
pub use self::registry::*;

/// The mnemonic ending a run.
pub const HALT_MNEMONIC: &str = "HLT";

/// The mnemonic of a line that does nothing.
pub const NOOP_MNEMONIC: &str = "NOP";

bitflags! {
    /// Static properties of an [`Instruction`].
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct InstructionFlags: u8 {
        /// The instruction updates the **Program Counter** itself.
        ///
        /// When this flag is not set, the counter is incremented once after the instruction
        /// has been executed.
        const CONTROL_TRANSFER = 1 << 0;
        /// The instruction cannot run without a parameter.
        const NEEDS_PARAMETER = 1 << 1;
        /// The instruction reads a value from the host's input source.
        const READS_INPUT = 1 << 2;
        /// The instruction writes a value to the host's output sink.
        const WRITES_OUTPUT = 1 << 3;
    }
}

/// A stateless unit of behavior, identified by its mnemonic.
pub trait Instruction: Send + Sync {
    /// The mnemonic of the instruction, in upper case.
    fn mnemonic(&self) -> &'static str;

    /// The static properties of the instruction.
    #[inline(always)]
    fn flags(&self) -> InstructionFlags {
        InstructionFlags::empty()
    }

    /// Performs the effect specific to this instruction.
    ///
    /// Implementations flagged with [`InstructionFlags::CONTROL_TRANSFER`] must update the
    /// **Program Counter** here. The others must leave it alone.
    fn execute(&self, step: &mut StepContext) -> Result<(), Error>;

    /// Runs the instruction: checks its parameters, executes it, then advances the
    /// **Program Counter** unless the instruction owns control flow.
    fn run(&self, step: &mut StepContext) -> Result<(), Error> {
        let flags = self.flags();

        if flags.contains(InstructionFlags::NEEDS_PARAMETER) && step.params.is_empty() {
            return Err(Error::MissingParameter(self.mnemonic()));
        }

        self.execute(step)?;

        if !flags.contains(InstructionFlags::CONTROL_TRANSFER) {
            step.context.pc.increment();
        }

        Ok(())
    }
}

impl fmt::Debug for dyn Instruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Instruction")
            .field("mnemonic", &self.mnemonic())
            .field("flags", &self.flags())
            .finish()
    }
}

/// The state an [`Instruction`] is executed against.
pub struct StepContext<'a> {
    /// The execution context of the run.
    pub context: &'a mut ExecutionContext,
    /// The parameters of the line being executed.
    pub params: &'a [Word],
    /// The host providing input and output.
    pub host: &'a dyn Host,
}

impl<'a> StepContext<'a> {
    /// Creates a new [`StepContext`].
    #[inline]
    pub fn new(context: &'a mut ExecutionContext, params: &'a [Word], host: &'a dyn Host) -> Self {
        Self {
            context,
            params,
            host,
        }
    }

    /// Returns the operand stack.
    #[inline(always)]
    pub fn stack(&mut self) -> &mut OperandStack {
        self.context.memory.stack_mut()
    }

    /// Returns the first parameter of the line.
    #[inline]
    pub fn param(&self, mnemonic: &'static str) -> Result<Word, Error> {
        self.params
            .first()
            .copied()
            .ok_or(Error::MissingParameter(mnemonic))
    }

    /// Replaces the two topmost operands with `op(next, top)`.
    ///
    /// The result is computed before the stack is touched, so a failing operation leaves the
    /// stack unchanged.
    pub fn binary<F>(&mut self, op: F) -> Result<(), Error>
    where
        F: FnOnce(Word, Word) -> Result<Word, Error>,
    {
        let stack = self.stack();
        let &[.., next, top] = stack.as_slice() else {
            return Err(Error::StackUnderflow);
        };

        let result = op(next, top)?;
        stack.retreat()?;
        stack.overwrite(result)
    }

    /// Replaces the topmost operand with `op(top)`.
    pub fn unary<F>(&mut self, op: F) -> Result<(), Error>
    where
        F: FnOnce(Word) -> Result<Word, Error>,
    {
        let stack = self.stack();
        let result = op(stack.peek()?)?;
        stack.overwrite(result)
    }
}

impl fmt::Debug for StepContext<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StepContext")
            .field("context", &self.context)
            .field("params", &self.params)
            .finish_non_exhaustive()
    }
}

/// A decoded program line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Line<'a> {
    /// The halt marker.
    Halt,
    /// A blank line or a no-op placeholder.
    NoOp,
    /// An instruction to dispatch.
    Op {
        /// The mnemonic, as written in the program.
        mnemonic: &'a str,
        /// The raw parameter tokens. Empty when the line has none.
        ///
        /// They are only parsed once the mnemonic has been resolved, see [`parse_params`].
        operands: Vec<&'a str>,
    },
}

impl<'a> Line<'a> {
    /// Splits a raw line into its mnemonic and parameter tokens.
    pub fn decode(raw: &'a str) -> Self {
        let mut tokens = raw.split_whitespace();

        let Some(mnemonic) = tokens.next() else {
            return Self::NoOp;
        };

        if mnemonic.eq_ignore_ascii_case(HALT_MNEMONIC) {
            return Self::Halt;
        }

        let operands: Vec<&str> = tokens.collect();
        let sole_noop_param = matches!(
            operands.as_slice(),
            [param] if param.eq_ignore_ascii_case(NOOP_MNEMONIC)
        );
        let is_noop = mnemonic.eq_ignore_ascii_case(NOOP_MNEMONIC) || sole_noop_param;
        if is_noop {
            return Self::NoOp;
        }

        Self::Op { mnemonic, operands }
    }
}

/// Parses the parameter tokens of the line found at `address`.
pub fn parse_params<S: AsRef<str>>(operands: &[S], address: usize) -> Result<Vec<Word>, Error> {
    operands
        .iter()
        .map(|token| {
            let token = token.as_ref();
            token.parse::<Word>().map_err(|_| Error::InvalidParameter {
                token: token.to_owned(),
                line: address,
            })
        })
        .collect()
}
