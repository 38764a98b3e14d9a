//! Defines the [`Error`] type of the crate.

use thiserror::Error;

use crate::Word;

/// A result type whose error defaults to the crate's [`Error`].
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// An error that might occur when configuring the interpreter or executing a program.
///
/// Except for [`Error::InvalidArgument`] and [`Error::AlreadyRunning`], which are returned
/// synchronously to the caller, every variant is fatal to the run in progress: the loop stops
/// and the error is reported through the host's fatal-error callback.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Error {
    /// The engine was asked to do something it is not configured for, such as starting a run
    /// without a bound execution context.
    #[error("invalid argument: {0}")]
    InvalidArgument(&'static str),
    /// A run was started while another run was still active on the same engine.
    #[error("a program is already running")]
    AlreadyRunning,

    /// The **Program Counter** references a position outside of the instruction sequence.
    #[error("invalid program counter: {pc} (program has {len} instructions)")]
    InvalidProgramCounter {
        /// The offending value of the program counter.
        pc: Word,
        /// The number of lines in the instructions region.
        len: usize,
    },
    /// The mnemonic of the fetched line is not registered.
    #[error("unknown instruction `{0}`")]
    UnknownInstruction(String),
    /// Two instruction implementations declared the same mnemonic.
    #[error("duplicate mnemonic `{0}`")]
    DuplicateMnemonic(&'static str),
    /// A parameter token could not be parsed as an integer.
    #[error("invalid parameter `{token}` at line {line}")]
    InvalidParameter {
        /// The raw parameter text.
        token: String,
        /// The index of the offending line.
        line: usize,
    },
    /// The instruction requires a parameter but the line did not provide one.
    #[error("`{0}` requires a parameter")]
    MissingParameter(&'static str),

    /// An instruction needed more operands than the stack holds.
    #[error("stack underflow")]
    StackUnderflow,
    /// A division or remainder had a zero divisor.
    #[error("division by zero")]
    DivisionByZero,
    /// An arithmetic result did not fit in a machine word.
    #[error("arithmetic overflow in `{0}`")]
    ArithmeticOverflow(&'static str),

    /// A host callback panicked during the run.
    #[error("the run panicked: {0}")]
    Panicked(String),
}
